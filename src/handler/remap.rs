//! Remap A-X/Y to B-XY (spec.md §4.3 table, S2): merges separate X/Y
//! messages arriving from role A into a combined XY sent to role B, and
//! splits a combined XY arriving from role B into X and Y sent to role A.
//! A 3-float position is cached per `(channel, record)` to preserve Z across
//! the split/merge (spec.md §4.3 "Remap" row).

use std::collections::HashMap;
use std::sync::Mutex;

use super::{forward_to_all, would_loop, HandlerCommon, HandlerSink, ObjectDataHandler};
use crate::ids::{ProtocolId, Role};
use crate::model::{
    PositionVariant, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo,
};

pub struct RemapHandler {
    common: HandlerCommon,
    /// `(channel, record) -> (x, y, z)`, preserved across X/Y/XY splits and
    /// merges (spec.md §4.3 "per `(channel, record)` a 3-float position is
    /// cached to preserve Z").
    positions: Mutex<HashMap<Addr, (f32, f32, f32)>>,
}

impl RemapHandler {
    pub fn new(common: HandlerCommon) -> Self {
        RemapHandler {
            common,
            positions: Mutex::new(HashMap::new()),
        }
    }

    fn update(&self, addressing: Addr, variant: PositionVariant, data: &Data) -> (f32, f32, f32) {
        let mut positions = self.positions.lock().expect("poisoned");
        let entry = positions.entry(addressing).or_insert((0.0, 0.0, 0.0));
        let values = data.as_floats().unwrap_or_default();
        match variant {
            PositionVariant::Xyz => {
                entry.0 = values.first().copied().unwrap_or(entry.0);
                entry.1 = values.get(1).copied().unwrap_or(entry.1);
                entry.2 = values.get(2).copied().unwrap_or(entry.2);
            }
            PositionVariant::Xy => {
                entry.0 = values.first().copied().unwrap_or(entry.0);
                entry.1 = values.get(1).copied().unwrap_or(entry.1);
            }
            PositionVariant::X => entry.0 = values.first().copied().unwrap_or(entry.0),
            PositionVariant::Y => entry.1 = values.first().copied().unwrap_or(entry.1),
        }
        *entry
    }
}

impl ObjectDataHandler for RemapHandler {
    fn on_received_message_from_protocol(
        &mut self,
        sink: &mut dyn HandlerSink,
        source: ProtocolId,
        roi: Roi,
        addressing: Addr,
        data: Data,
        meta: MetaInfo,
    ) {
        self.common.touch(source);
        let Some(role) = self.common.role_of(source) else {
            return;
        };
        if matches!(roi, Roi::HeartbeatPing | Roi::HeartbeatPong) {
            let targets: &[ProtocolId] = match role {
                Role::A => &self.common.protocol_b_ids,
                Role::B => &self.common.protocol_a_ids,
            };
            forward_to_all(sink, targets, source, roi, &data, &meta);
            return;
        }

        let Some(variant) = roi.position_variant() else {
            // Not a positioning ROI: bypass unchanged in the direction of
            // the originating role.
            let targets: &[ProtocolId] = match role {
                Role::A => &self.common.protocol_b_ids,
                Role::B => &self.common.protocol_a_ids,
            };
            forward_to_all(sink, targets, source, roi, &data, &meta);
            return;
        };
        let Some(family) = roi.position_family() else { return };

        match role {
            Role::A => {
                // Merge A's X/Y (or XYZ) updates into a combined XY sent to B.
                let (x, y, _z) = self.update(addressing, variant, &data);
                let xy_roi = family.variant(PositionVariant::Xy);
                let xy_data = Data::from_floats(addressing, &[x, y]);
                for &target in &self.common.protocol_b_ids {
                    if would_loop(&meta, target) {
                        continue;
                    }
                    sink.send_message_to(target, xy_roi, &xy_data, meta.external_id);
                }
            }
            Role::B => {
                // Split B's combined XY into X and Y sent to A.
                let (x, y, _z) = self.update(addressing, variant, &data);
                let x_roi = family.variant(PositionVariant::X);
                let y_roi = family.variant(PositionVariant::Y);
                let x_data = Data::from_float(addressing, x);
                let y_data = Data::from_float(addressing, y);
                for &target in &self.common.protocol_a_ids {
                    if would_loop(&meta, target) {
                        continue;
                    }
                    sink.send_message_to(target, x_roi, &x_data, meta.external_id);
                    sink.send_message_to(target, y_roi, &y_data, meta.external_id);
                }
            }
        }
    }

    fn common(&self) -> &HandlerCommon {
        &self.common
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct RecordingSink {
        sent: Vec<(ProtocolId, Roi, Vec<f32>)>,
    }
    impl HandlerSink for RecordingSink {
        fn send_message_to(&mut self, protocol_id: ProtocolId, roi: Roi, data: &Data, _external_id: Option<ProtocolId>) -> bool {
            self.sent.push((protocol_id, roi, data.as_floats().unwrap_or_default()));
            true
        }
    }

    fn handler() -> RemapHandler {
        let common = HandlerCommon::new(vec![ProtocolId(1)], vec![ProtocolId(2)], Duration::from_millis(5100), None);
        RemapHandler::new(common)
    }

    #[test]
    fn s2_x_then_y_from_a_produce_growing_xy_on_b() {
        let mut h = handler();
        let mut sink = RecordingSink { sent: vec![] };
        let addr = Addr::channel_record(1, 1);

        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::CoordinateMapping_SourcePosition_X,
            addr,
            Data::from_float(addr, 0.25),
            MetaInfo::unsolicited(),
        );
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::CoordinateMapping_SourcePosition_Y,
            addr,
            Data::from_float(addr, 0.75),
            MetaInfo::unsolicited(),
        );

        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[0].2, vec![0.25, 0.0]);
        assert_eq!(sink.sent[1].2, vec![0.25, 0.75]);
    }

    #[test]
    fn xy_from_b_splits_into_x_and_y_sent_to_a() {
        let mut h = handler();
        let mut sink = RecordingSink { sent: vec![] };
        let addr = Addr::channel_record(1, 1);

        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(2),
            Roi::CoordinateMapping_SourcePosition_XY,
            addr,
            Data::from_floats(addr, &[0.1, 0.9]),
            MetaInfo::unsolicited(),
        );

        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[0].1, Roi::CoordinateMapping_SourcePosition_X);
        assert_eq!(sink.sent[0].2, vec![0.1]);
        assert_eq!(sink.sent[1].1, Roi::CoordinateMapping_SourcePosition_Y);
        assert_eq!(sink.sent[1].2, vec![0.9]);
    }
}
