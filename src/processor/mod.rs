//! Protocol Processor contract (spec.md §4.2) and the variants that
//! implement it. Dispatch over the known wire protocols is a closed tagged
//! enum (`Processor`) rather than an inheritance hierarchy, per the
//! "Polymorphism by variant" design note (spec.md §9) — the same move the
//! teacher's `ProtocolDevice` enum (`core/src/protocol/device.rs`) already
//! makes for "one of several transport kinds behind a uniform contract".

pub mod midi;
pub mod noproto;
pub mod ocp1;
pub mod osc;
pub mod rttrpm;

use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

use crate::error::EngineError;
use crate::ids::{ProtocolId, Role};
use crate::model::{RemoteObject, RemoteObjectMessageData, RemoteObjectMessageMetaInfo};

/// Receives decoded messages from a processor (spec.md §4.2
/// "onProtocolMessageReceived"). `Node` is the only production
/// implementation; tests may supply their own.
pub trait ProcessorListener: Send {
    fn on_protocol_message_received(
        &self,
        source: ProtocolId,
        roi: crate::model::RemoteObjectIdentifier,
        addressing: crate::model::RemoteObjectAddressing,
        data: RemoteObjectMessageData,
        meta: RemoteObjectMessageMetaInfo,
    );
}

/// Shared state every processor variant carries: active/mute lists, a
/// polling interval, and the listener registry (spec.md §4.2 common
/// contract).
pub struct ProcessorCommon {
    pub id: ProtocolId,
    pub role: Role,
    pub uses_active_objects: bool,
    pub polling_interval_ms: u64,
    active_objects: Mutex<BTreeSet<RemoteObject>>,
    muted_objects: Mutex<BTreeSet<RemoteObject>>,
}

impl ProcessorCommon {
    pub fn new(id: ProtocolId, role: Role, uses_active_objects: bool, polling_interval_ms: u64) -> Self {
        let mut active = BTreeSet::new();
        if uses_active_objects {
            // ROI_HeartbeatPing/Pong are always active when active objects
            // are enabled, regardless of configuration (spec.md §4.2).
            active.insert(RemoteObject::new(
                crate::model::RemoteObjectIdentifier::HeartbeatPing,
                crate::model::RemoteObjectAddressing::NONE,
            ));
            active.insert(RemoteObject::new(
                crate::model::RemoteObjectIdentifier::HeartbeatPong,
                crate::model::RemoteObjectAddressing::NONE,
            ));
        }
        ProcessorCommon {
            id,
            role,
            uses_active_objects,
            polling_interval_ms,
            active_objects: Mutex::new(active),
            muted_objects: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn add_active_object(&self, ro: RemoteObject) {
        self.active_objects.lock().expect("poisoned").insert(ro);
    }

    pub fn active_objects(&self) -> Vec<RemoteObject> {
        self.active_objects.lock().expect("poisoned").iter().copied().collect()
    }

    pub fn add_muted_object(&self, ro: RemoteObject) {
        self.muted_objects.lock().expect("poisoned").insert(ro);
    }

    /// Whether `(roi, addressing)` should be dropped silently on send or
    /// receive (spec.md §4.2 "Muting").
    pub fn is_muted(&self, ro: &RemoteObject) -> bool {
        self.muted_objects.lock().expect("poisoned").contains(ro)
    }
}

/// `(ipAddress, clientPort, hostPort)` plus auto-detect bookkeeping shared
/// by every UDP/TCP processor variant (spec.md §4.2.1).
pub struct NetworkProcessorBase {
    configured_ip: Mutex<Option<IpAddr>>,
    pub client_port: u16,
    pub host_port: u16,
    /// Guarded because auto-detect mode is written from the transport
    /// thread and read from the send path (spec.md §5, "OSC processor's
    /// client-connection parameters ... guarded by a critical section").
    detected_peer: Mutex<Option<IpAddr>>,
    ignored_peers: Mutex<HashSet<IpAddr>>,
}

impl NetworkProcessorBase {
    pub fn new(ip_address: Option<&str>, client_port: u16, host_port: u16) -> Result<Self, EngineError> {
        let configured_ip = match ip_address {
            Some(s) => Some(
                s.parse::<IpAddr>()
                    .map_err(|e| EngineError::new(format!("invalid IP address '{}': {}", s, e)))?,
            ),
            None => None,
        };
        Ok(NetworkProcessorBase {
            configured_ip: Mutex::new(configured_ip),
            client_port,
            host_port,
            detected_peer: Mutex::new(None),
            ignored_peers: Mutex::new(HashSet::new()),
        })
    }

    pub fn is_auto_detect(&self) -> bool {
        self.configured_ip.lock().expect("poisoned").is_none()
    }

    /// In auto-detect mode, accepts the first sender's address and treats
    /// every later packet from a different address as "ignored" (spec.md
    /// §4.2.1). Returns whether this packet should be processed.
    pub fn accept_or_ignore(&self, from: IpAddr) -> bool {
        if let Some(configured) = *self.configured_ip.lock().expect("poisoned") {
            return configured == from;
        }
        let mut detected = self.detected_peer.lock().expect("poisoned");
        match *detected {
            None => {
                *detected = Some(from);
                true
            }
            Some(addr) if addr == from => true,
            Some(_) => {
                self.ignored_peers.lock().expect("poisoned").insert(from);
                false
            }
        }
    }

    pub fn effective_peer(&self) -> Option<IpAddr> {
        self.configured_ip
            .lock()
            .expect("poisoned")
            .or(*self.detected_peer.lock().expect("poisoned"))
    }
}

/// The uniform capability interface every protocol processor implements
/// (spec.md §4.2). A capability interface/trait, per the "Polymorphism by
/// variant" design note (spec.md §9) rather than an abstract base class.
pub trait ProtocolProcessor: Send {
    fn id(&self) -> ProtocolId;
    fn role(&self) -> Role;
    fn processor_type(&self) -> &'static str;

    fn start(&mut self) -> bool;
    fn stop(&mut self) -> bool;

    fn send_remote_object_message(
        &mut self,
        roi: crate::model::RemoteObjectIdentifier,
        data: &RemoteObjectMessageData,
        external_id: Option<ProtocolId>,
    ) -> bool;
}

/// Closed tagged enum over the five wire-protocol variants (spec.md §4.2,
/// §9 "Polymorphism by variant"). `Node` stores processors as this enum
/// rather than `Box<dyn ProtocolProcessor>` so the known variant set stays
/// closed and exhaustive matches catch new variants at compile time.
pub enum Processor {
    Osc(osc::OscProcessor),
    Ocp1(ocp1::Ocp1Processor),
    Midi(midi::MidiProcessor),
    Rttrpm(rttrpm::RttrpmProcessor),
    NoProtocol(noproto::NoProtocolProcessor),
}

impl Processor {
    pub fn common(&self) -> &ProcessorCommon {
        match self {
            Processor::Osc(p) => p.common(),
            Processor::Ocp1(p) => p.common(),
            Processor::Midi(p) => p.common(),
            Processor::Rttrpm(p) => p.common(),
            Processor::NoProtocol(p) => p.common(),
        }
    }
}

impl ProtocolProcessor for Processor {
    fn id(&self) -> ProtocolId {
        match self {
            Processor::Osc(p) => p.id(),
            Processor::Ocp1(p) => p.id(),
            Processor::Midi(p) => p.id(),
            Processor::Rttrpm(p) => p.id(),
            Processor::NoProtocol(p) => p.id(),
        }
    }

    fn role(&self) -> Role {
        match self {
            Processor::Osc(p) => p.role(),
            Processor::Ocp1(p) => p.role(),
            Processor::Midi(p) => p.role(),
            Processor::Rttrpm(p) => p.role(),
            Processor::NoProtocol(p) => p.role(),
        }
    }

    fn processor_type(&self) -> &'static str {
        match self {
            Processor::Osc(p) => p.processor_type(),
            Processor::Ocp1(p) => p.processor_type(),
            Processor::Midi(p) => p.processor_type(),
            Processor::Rttrpm(p) => p.processor_type(),
            Processor::NoProtocol(p) => p.processor_type(),
        }
    }

    fn start(&mut self) -> bool {
        match self {
            Processor::Osc(p) => p.start(),
            Processor::Ocp1(p) => p.start(),
            Processor::Midi(p) => p.start(),
            Processor::Rttrpm(p) => p.start(),
            Processor::NoProtocol(p) => p.start(),
        }
    }

    fn stop(&mut self) -> bool {
        match self {
            Processor::Osc(p) => p.stop(),
            Processor::Ocp1(p) => p.stop(),
            Processor::Midi(p) => p.stop(),
            Processor::Rttrpm(p) => p.stop(),
            Processor::NoProtocol(p) => p.stop(),
        }
    }

    fn send_remote_object_message(
        &mut self,
        roi: crate::model::RemoteObjectIdentifier,
        data: &RemoteObjectMessageData,
        external_id: Option<ProtocolId>,
    ) -> bool {
        match self {
            Processor::Osc(p) => p.send_remote_object_message(roi, data, external_id),
            Processor::Ocp1(p) => p.send_remote_object_message(roi, data, external_id),
            Processor::Midi(p) => p.send_remote_object_message(roi, data, external_id),
            Processor::Rttrpm(p) => p.send_remote_object_message(roi, data, external_id),
            Processor::NoProtocol(p) => p.send_remote_object_message(roi, data, external_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_objects_are_active_whenever_active_objects_are_used() {
        let common = ProcessorCommon::new(ProtocolId(1), Role::A, true, 100);
        let actives = common.active_objects();
        assert!(actives
            .iter()
            .any(|ro| ro.roi == crate::model::RemoteObjectIdentifier::HeartbeatPing));
        assert!(actives
            .iter()
            .any(|ro| ro.roi == crate::model::RemoteObjectIdentifier::HeartbeatPong));
    }

    #[test]
    fn auto_detect_accepts_first_sender_then_ignores_others() {
        let net = NetworkProcessorBase::new(None, 9000, 9001).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(net.accept_or_ignore(a));
        assert!(net.accept_or_ignore(a));
        assert!(!net.accept_or_ignore(b));
    }

    #[test]
    fn configured_ip_rejects_every_other_sender() {
        let net = NetworkProcessorBase::new(Some("10.0.0.1"), 9000, 9001).unwrap();
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(!net.accept_or_ignore(other));
    }

    #[test]
    fn invalid_ip_syntax_is_rejected() {
        assert!(NetworkProcessorBase::new(Some("not-an-ip"), 1, 2).is_err());
    }
}
