//! Configuration ingress (spec.md §6): turns an already-parsed hierarchical
//! tree into running `Node`s wired into an `Engine`. The tree is represented
//! in-crate as `serde_json::Value` (`ConfigNode`), the same choice the
//! teacher makes for its own scene/config serialization (`core/src/scene.rs`,
//! `Cargo.toml`'s `serde_json` dependency) rather than a bespoke parser.
//! Literal XML-to-tree parsing is the out-of-scope collaborator's job
//! (spec.md §1); `ingest` consumes the already-parsed tree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::engine::Engine;
use crate::error::ConfigError;
use crate::handler::active_select::{ActiveSelectHandler, ActiveSlot};
use crate::handler::bypass::{BypassDirection, BypassHandler};
use crate::handler::mirror::MirrorHandler;
use crate::handler::mux::MuxHandler;
use crate::handler::mux_value_filter::MuxValueFilterHandler;
use crate::handler::remap::RemapHandler;
use crate::handler::value_filter::{ValueFilterHandler, DEFAULT_PRECISION};
use crate::handler::{Handler, HandlerCommon, DEFAULT_FAILOVER_MS, DEFAULT_REACTION_TIMEOUT_MS};
use crate::ids::{NodeId, ProtocolId, Role};
use crate::model::{RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, ValueRange};
use crate::node::{Node, QueueListener};
use crate::processor::midi::{MidiAssignment, MidiAssignmentKind, MidiProcessor};
use crate::processor::noproto::{AnimationMode, NoProtocolProcessor};
use crate::processor::ocp1::{Ocp1ConnectionMode, Ocp1Processor, OnoTable};
use crate::processor::osc::{AddressDialect, OscProcessor};
use crate::processor::rttrpm::RttrpmProcessor;
use crate::processor::{Processor, ProcessorListener};

/// Thin accessor wrapper over a `serde_json::Value` subtree (spec.md §6
/// "hierarchical; content negotiated with the configuration ingress
/// collaborator").
#[derive(Debug, Clone)]
pub struct ConfigNode<'a>(pub &'a Value);

impl<'a> ConfigNode<'a> {
    pub fn field(&self, key: &str) -> Option<ConfigNode<'a>> {
        self.0.get(key).map(ConfigNode)
    }

    pub fn require(&self, key: &str) -> Result<ConfigNode<'a>, ConfigError> {
        self.field(key).ok_or_else(|| ConfigError::MissingElement(key.to_string()))
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.0.as_str()
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.0.as_u64()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.0.as_f64().map(|v| v as f32)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    pub fn items(&self) -> &'a [Value] {
        self.0.as_array().map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Parses the field as a ROI name via `RemoteObjectIdentifier`'s own
    /// `Deserialize` impl (its derive already accepts bare variant-name
    /// strings, so no separate name table is needed here).
    pub fn as_roi(&self) -> Result<Roi, ConfigError> {
        serde_json::from_value(self.0.clone()).map_err(|e| ConfigError::Invalid(format!("bad ROI name: {}", e)))
    }
}

/// One `ActiveObjects`/`MutedObjects` entry: `channels` × `records`
/// Cartesian product, records omitted yields `second = -1` (spec.md §6).
fn expand_objects(node: &ConfigNode) -> Result<Vec<RemoteObject>, ConfigError> {
    let mut out = Vec::new();
    for entry in node.items() {
        let entry = ConfigNode(entry);
        let roi = entry.require("roi")?.as_roi()?;
        let channels: Vec<i32> = entry
            .field("channels")
            .map(|c| c.items().iter().filter_map(|v| v.as_i64()).map(|v| v as i32).collect())
            .unwrap_or_default();
        let records: Vec<i32> = entry
            .field("records")
            .map(|c| c.items().iter().filter_map(|v| v.as_i64()).map(|v| v as i32).collect())
            .unwrap_or_default();
        let channels = if channels.is_empty() { vec![crate::model::INVALID_ADDRESS_VALUE] } else { channels };
        if records.is_empty() {
            for &ch in &channels {
                out.push(RemoteObject::new(roi, Addr::channel(ch)));
            }
        } else {
            for &ch in &channels {
                for &rec in &records {
                    out.push(RemoteObject::new(roi, Addr::channel_record(ch, rec)));
                }
            }
        }
    }
    Ok(out)
}

fn parse_protocol_type(s: &str) -> Result<&'static str, ConfigError> {
    match s {
        "OCA" | "OSC" | "YamahaOSC" | "ADMOSC" | "RemapOSC" | "MIDI" | "RTTrPM" | "NoProtocol" => {
            Ok(match s {
                "OCA" => "OCA",
                "OSC" => "OSC",
                "YamahaOSC" => "YamahaOSC",
                "ADMOSC" => "ADMOSC",
                "RemapOSC" => "RemapOSC",
                "MIDI" => "MIDI",
                "RTTrPM" => "RTTrPM",
                _ => "NoProtocol",
            })
        }
        other => Err(ConfigError::Invalid(format!("unknown ProtocolA/B Type '{}'", other))),
    }
}

fn build_midi_assignment(entry: &ConfigNode) -> Result<MidiAssignment, ConfigError> {
    let roi = entry.require("roi")?.as_roi()?;
    let kind = match entry.require("kind")?.as_str().unwrap_or("") {
        "NoteOn" => MidiAssignmentKind::NoteOn,
        "NoteOff" => MidiAssignmentKind::NoteOff,
        "ControlChange" => MidiAssignmentKind::ControlChange,
        "ProgramChange" => MidiAssignmentKind::ProgramChange,
        "PitchBend" => MidiAssignmentKind::PitchBend,
        "Aftertouch" => MidiAssignmentKind::Aftertouch,
        "ChannelPressure" => MidiAssignmentKind::ChannelPressure,
        other => return Err(ConfigError::Invalid(format!("unknown MIDI assignment kind '{}'", other))),
    };
    let channel = entry.field("channel").and_then(|c| c.as_u64()).unwrap_or(0) as u8;
    let command_range = entry.field("command_range").and_then(|r| {
        let items = r.items();
        match (items.first().and_then(|v| v.as_u64()), items.get(1).and_then(|v| v.as_u64())) {
            (Some(lo), Some(hi)) => Some((lo as u8, hi as u8)),
            _ => None,
        }
    });
    let value_range = entry.field("value_range").and_then(|r| {
        let items = r.items();
        match (items.first().and_then(|v| v.as_f64()), items.get(1).and_then(|v| v.as_f64())) {
            (Some(lo), Some(hi)) => Some(ValueRange::new(lo as f32, hi as f32)),
            _ => None,
        }
    });
    Ok(MidiAssignment {
        roi,
        kind,
        channel,
        command_range,
        value_range,
    })
}

/// Builds one `Processor` for a `ProtocolA`/`ProtocolB` entry (spec.md §6),
/// wiring a `QueueListener` bound to `node_id`/`role`/`queue_tx` so its
/// decoded messages reach that Node's inbound queue (spec.md §9 "Listener
/// callbacks crossing threads").
fn build_processor(
    entry: &ConfigNode,
    node_id: NodeId,
    role: Role,
    queue_tx: crossbeam_channel::Sender<crate::node::InboundMessage>,
) -> Result<Processor, ConfigError> {
    let id = ProtocolId(entry.require("id")?.as_u64().ok_or_else(|| ConfigError::Invalid("ProtocolA/B Id must be an integer".into()))?);
    ProtocolId::observe(id.0);
    let type_str = entry.require("type")?.as_str().ok_or_else(|| ConfigError::Invalid("ProtocolA/B Type must be a string".into()))?;
    let proto_type = parse_protocol_type(type_str)?;
    let uses_active = entry.field("uses_active_objects").and_then(|v| v.as_bool()).unwrap_or(false);
    let polling_ms = entry.field("polling_interval_ms").and_then(|v| v.as_u64()).unwrap_or(100);
    let ip_address = entry.field("ip_address").and_then(|v| v.as_str().map(str::to_owned));
    let client_port = entry.field("client_port").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
    let host_port = entry.field("host_port").and_then(|v| v.as_u64()).unwrap_or(0) as u16;

    let listener: Arc<dyn ProcessorListener> = Arc::new(QueueListener::new(node_id, role, queue_tx));

    let processor = match proto_type {
        "OSC" | "YamahaOSC" | "ADMOSC" | "RemapOSC" => {
            let dialect = match proto_type {
                "OSC" => AddressDialect::DbAudio1,
                "YamahaOSC" => AddressDialect::YamahaOsc,
                "ADMOSC" => AddressDialect::AdmOsc,
                _ => AddressDialect::Remap,
            };
            let p = OscProcessor::new(
                id,
                role,
                dialect,
                ip_address.as_deref(),
                client_port,
                host_port,
                uses_active,
                polling_ms,
                Some(listener),
            )
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            Processor::Osc(p)
        }
        "OCA" => {
            let mode = match entry.field("ocp1_connection_mode").and_then(|v| v.as_str()) {
                Some("server") => Ocp1ConnectionMode::Server,
                _ => Ocp1ConnectionMode::Client,
            };
            let address = ip_address
                .map(|ip| format!("{}:{}", ip, host_port))
                .ok_or_else(|| ConfigError::MissingElement("ProtocolA/B IpAddress for OCA".into()))?;
            let mut ono_table: OnoTable = HashMap::new();
            if let Some(table) = entry.field("ono_table") {
                for entry in table.items() {
                    let entry = ConfigNode(entry);
                    let roi = entry.require("roi")?.as_roi()?;
                    let first = entry.field("channel").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
                    let second = entry.field("record").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
                    let ono = entry.require("ono")?.as_u64().unwrap_or(0) as u32;
                    ono_table.insert(RemoteObject::new(roi, Addr::channel_record(first, second)), ono);
                }
            }
            Processor::Ocp1(Ocp1Processor::new(id, role, mode, address, ono_table, uses_active, polling_ms, Some(listener)))
        }
        "MIDI" => {
            let mut assignments = Vec::new();
            if let Some(list) = entry.field("midi_assignments") {
                for entry in list.items() {
                    assignments.push(build_midi_assignment(&ConfigNode(entry))?);
                }
            }
            let output_device = entry.field("output_device").and_then(|v| v.as_str().map(str::to_owned));
            Processor::Midi(MidiProcessor::new(id, role, assignments, output_device, uses_active, polling_ms, Some(listener)))
        }
        "RTTrPM" => Processor::Rttrpm(RttrpmProcessor::new(id, role, host_port, Some(listener))),
        _ => {
            let animation = match entry.field("animation").and_then(|v| v.as_str()) {
                Some("Circular") => AnimationMode::Circular,
                Some("PseudoRandom") => AnimationMode::PseudoRandom,
                _ => AnimationMode::None,
            };
            Processor::NoProtocol(NoProtocolProcessor::new(id, role, animation, Some(listener)))
        }
    };
    Ok(processor)
}

fn build_handler(object_handling: &ConfigNode, a_ids: Vec<ProtocolId>, b_ids: Vec<ProtocolId>) -> Result<Handler, ConfigError> {
    let mode = object_handling.require("mode")?.as_str().ok_or_else(|| ConfigError::Invalid("ObjectHandling Mode must be a string".into()))?;
    let reaction_timeout = Duration::from_millis(
        object_handling.field("reaction_timeout_ms").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_REACTION_TIMEOUT_MS),
    );
    let precision = object_handling.field("data_precision").and_then(|v| v.as_f32()).unwrap_or(DEFAULT_PRECISION);
    let a_chan_cnt = object_handling.field("protocol_a_ch_cnt").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let b_chan_cnt = object_handling.field("protocol_b_ch_cnt").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let failover = Duration::from_millis(
        object_handling.field("failover_time_ms").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_FAILOVER_MS),
    );

    let common = HandlerCommon::new(a_ids, b_ids, reaction_timeout, None);
    let handler = match mode {
        "Bypass" => Handler::Bypass(BypassHandler::new(common, BypassDirection::Both)),
        "Forward_A_to_B_only" => Handler::Bypass(BypassHandler::new(common, BypassDirection::AToBOnly)),
        "Reverse_B_to_A_only" => Handler::Bypass(BypassHandler::new(common, BypassDirection::BToAOnly)),
        "Remap_A_X_Y_to_B_XY" => Handler::Remap(RemapHandler::new(common)),
        "Mux_nA_to_mB" => Handler::Mux(MuxHandler::new(common, a_chan_cnt, b_chan_cnt)),
        "Mux_nA_to_mB_withValFilter" => {
            Handler::MuxValueFilter(MuxValueFilterHandler::new(common, a_chan_cnt, b_chan_cnt, precision))
        }
        "Forward_only_valueChanges" | "DS100_DeviceSimulation" => {
            Handler::ValueFilter(ValueFilterHandler::new(common, precision))
        }
        "Mirror_dualA_withValFilter" => Handler::Mirror(MirrorHandler::new(common, failover, precision)),
        "A1active_withValFilter" => Handler::ActiveSelect(ActiveSelectHandler::new(common, ActiveSlot::A1, precision)),
        "A2active_withValFilter" => Handler::ActiveSelect(ActiveSelectHandler::new(common, ActiveSlot::A2, precision)),
        other => return Err(ConfigError::UnknownMode(other.to_string())),
    };
    Ok(handler)
}

/// Ingests one `Node` entry: builds its handler and processors and wires
/// `ActiveObjects`/`MutedObjects` (spec.md §6).
fn build_node(entry: &ConfigNode) -> Result<Arc<Node>, ConfigError> {
    let node_id = NodeId(entry.require("id")?.as_u64().ok_or_else(|| ConfigError::Invalid("Node Id must be an integer".into()))? as u32);
    NodeId::observe(node_id.0);

    let protocol_a_entries: Vec<ConfigNode> = entry.field("protocol_a").map(|c| c.items().iter().map(ConfigNode).collect()).unwrap_or_default();
    let protocol_b_entries: Vec<ConfigNode> = entry.field("protocol_b").map(|c| c.items().iter().map(ConfigNode).collect()).unwrap_or_default();
    if protocol_a_entries.is_empty() || protocol_b_entries.is_empty() {
        return Err(ConfigError::MissingElement(format!("Node {} requires at least one ProtocolA and ProtocolB", node_id)));
    }

    let protocol_id = |e: &ConfigNode| -> Result<ProtocolId, ConfigError> {
        e.require("id")
            .and_then(|v| v.as_u64().ok_or_else(|| ConfigError::Invalid("ProtocolA/B Id must be an integer".into())))
            .map(ProtocolId)
    };
    let a_ids = protocol_a_entries.iter().map(&protocol_id).collect::<Result<Vec<_>, _>>()?;
    let b_ids = protocol_b_entries.iter().map(&protocol_id).collect::<Result<Vec<_>, _>>()?;
    let mut seen = std::collections::HashSet::new();
    for &id in a_ids.iter().chain(b_ids.iter()) {
        if !seen.insert(id) {
            return Err(ConfigError::DuplicateId(format!("protocol id {} reused within Node {}", id, node_id)));
        }
    }

    let object_handling = entry.require("object_handling")?;
    let handler = build_handler(&object_handling, a_ids, b_ids)?;
    let node = Node::new(node_id, handler);

    for e in &protocol_a_entries {
        let processor = build_processor(e, node_id, Role::A, node.queue_sender())?;
        for ro in expand_objects(&e.field("active_objects").unwrap_or(ConfigNode(&Value::Array(vec![]))))? {
            processor.common().add_active_object(ro);
        }
        for ro in expand_objects(&e.field("muted_objects").unwrap_or(ConfigNode(&Value::Array(vec![]))))? {
            processor.common().add_muted_object(ro);
        }
        node.add_processor(Role::A, processor);
    }
    for e in &protocol_b_entries {
        let processor = build_processor(e, node_id, Role::B, node.queue_sender())?;
        for ro in expand_objects(&e.field("active_objects").unwrap_or(ConfigNode(&Value::Array(vec![]))))? {
            processor.common().add_active_object(ro);
        }
        for ro in expand_objects(&e.field("muted_objects").unwrap_or(ConfigNode(&Value::Array(vec![]))))? {
            processor.common().add_muted_object(ro);
        }
        node.add_processor(Role::B, processor);
    }

    Ok(node)
}

/// Ingests a root configuration tree (spec.md §6 top level: a list of
/// `Node` elements) into a fresh, not-yet-started `Engine`.
pub fn ingest(root: &Value) -> Result<Engine, ConfigError> {
    let root = ConfigNode(root);
    let nodes_field = root.require("nodes")?;
    let mut nodes = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();
    for entry in nodes_field.items() {
        let entry = ConfigNode(entry);
        let id = entry.require("id")?.as_u64().ok_or_else(|| ConfigError::Invalid("Node Id must be an integer".into()))?;
        if !seen_ids.insert(id) {
            return Err(ConfigError::DuplicateId(format!("node id {}", id)));
        }
        nodes.push(build_node(&entry)?);
    }
    Ok(Engine::new(nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_bypass_tree() -> Value {
        json!({
            "nodes": [{
                "id": 1,
                "object_handling": { "mode": "Bypass" },
                "protocol_a": [{
                    "id": 1, "type": "NoProtocol"
                }],
                "protocol_b": [{
                    "id": 2, "type": "NoProtocol"
                }]
            }]
        })
    }

    #[test]
    fn ingests_a_minimal_bypass_node() {
        let engine = ingest(&minimal_bypass_tree()).unwrap();
        assert_eq!(engine.node_ids(), vec![NodeId(1)]);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let mut tree = minimal_bypass_tree();
        let dup = tree["nodes"][0].clone();
        tree["nodes"].as_array_mut().unwrap().push(dup);
        assert!(matches!(ingest(&tree), Err(ConfigError::DuplicateId(_))));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut tree = minimal_bypass_tree();
        tree["nodes"][0]["object_handling"]["mode"] = json!("NotARealMode");
        assert!(matches!(ingest(&tree), Err(ConfigError::UnknownMode(_))));
    }

    #[test]
    fn active_objects_cartesian_product_expands_channels_and_records() {
        let tree = json!([
            { "roi": "CoordinateMapping_SourcePosition_XYZ", "channels": [1, 2], "records": [1, 2] }
        ]);
        let objects = expand_objects(&ConfigNode(&tree)).unwrap();
        assert_eq!(objects.len(), 4);
        assert!(objects.contains(&RemoteObject::new(Roi::CoordinateMapping_SourcePosition_XYZ, Addr::channel_record(2, 1))));
    }

    #[test]
    fn active_objects_without_records_use_invalid_second() {
        let tree = json!([{ "roi": "MatrixInput_Mute", "channels": [5] }]);
        let objects = expand_objects(&ConfigNode(&tree)).unwrap();
        assert_eq!(objects, vec![RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(5))]);
    }

    #[test]
    fn mirror_mode_ingests_with_two_a_protocols() {
        let mut tree = minimal_bypass_tree();
        tree["nodes"][0]["object_handling"]["mode"] = json!("Mirror_dualA_withValFilter");
        tree["nodes"][0]["protocol_a"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "id": 3, "type": "NoProtocol" }));
        let engine = ingest(&tree).unwrap();
        let node = engine.node(NodeId(1)).unwrap();
        assert_eq!(node.protocol_ids(Role::A).len(), 2);
    }
}
