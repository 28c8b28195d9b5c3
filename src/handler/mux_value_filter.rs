//! Mux-with-value-filter (spec.md §4.3 table): combines channel muxing
//! (`handler::mux`) with the forward-only-value-changes filter
//! (`handler::value_filter`), keyed on the *mapped* (flat) addressing
//! rather than the original one, so two source channels that flatten to
//! the same target slot share one change-tracking entry.

use super::mux::{flatten_channel, unflatten_channel};
use super::{would_loop, HandlerCommon, HandlerSink, ObjectDataHandler};
use crate::cache::ValueCache;
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo, ValueType,
};

pub struct MuxValueFilterHandler {
    common: HandlerCommon,
    pub a_chan_count: i32,
    pub b_chan_count: i32,
    pub precision: f32,
    /// Keyed on the flattened addressing, shared by both directions since
    /// the flat index is the common coordinate space.
    flat_cache: ValueCache,
}

impl MuxValueFilterHandler {
    pub fn new(common: HandlerCommon, a_chan_count: i32, b_chan_count: i32, precision: f32) -> Self {
        MuxValueFilterHandler {
            common,
            a_chan_count,
            b_chan_count,
            precision,
            flat_cache: ValueCache::new(),
        }
    }

    fn changed(&mut self, roi: Roi, flat_addr: Addr, data: &Data) -> bool {
        if matches!(roi, Roi::HeartbeatPing | Roi::HeartbeatPong) || data.value_count == 0 {
            return true;
        }
        let ro = RemoteObject::new(roi, flat_addr);
        let changed = match self.flat_cache.peek(&ro) {
            None => true,
            Some(existing) => match data.value_type {
                ValueType::Float => {
                    let old = existing.as_floats().unwrap_or_default();
                    let new = data.as_floats().unwrap_or_default();
                    old.len() != new.len()
                        || old.iter().zip(new.iter()).any(|(a, b)| (a - b).abs() > self.precision)
                }
                _ => existing.payload != data.payload || existing.value_type != data.value_type,
            },
        };
        if changed {
            self.flat_cache.set(ro, data.clone());
        }
        changed
    }
}

impl ObjectDataHandler for MuxValueFilterHandler {
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

        if matches!(roi, Roi::HeartbeatPing | Roi::HeartbeatPong) || !roi.is_channel_addressing() {
            let targets: &[ProtocolId] = match role {
                Role::A => &self.common.protocol_b_ids,
                Role::B => &self.common.protocol_a_ids,
            };
            for &target in targets {
                if target != source && !would_loop(&meta, target) {
                    sink.send_message_to(target, roi, &data, meta.external_id);
                }
            }
            return;
        }

        let (src_ids, src_count, dst_ids, dst_count) = match role {
            Role::A => (
                &self.common.protocol_a_ids,
                self.a_chan_count,
                &self.common.protocol_b_ids,
                self.b_chan_count,
            ),
            Role::B => (
                &self.common.protocol_b_ids,
                self.b_chan_count,
                &self.common.protocol_a_ids,
                self.a_chan_count,
            ),
        };
        let Some(flat) = flatten_channel(src_ids, src_count, source, addressing.first) else {
            return;
        };
        let flat_addr = Addr::channel_record(flat, addressing.second);
        if !self.changed(roi, flat_addr, &data) {
            return;
        }
        let Some((target, local_channel)) = unflatten_channel(dst_ids, dst_count, flat) else {
            return;
        };
        if would_loop(&meta, target) {
            return;
        }
        let mapped_data = Data {
            addressing: Addr::channel_record(local_channel, addressing.second),
            ..data
        };
        sink.send_message_to(target, roi, &mapped_data, meta.external_id);
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
        sent: Vec<(ProtocolId, Addr)>,
    }
    impl HandlerSink for RecordingSink {
        fn send_message_to(&mut self, protocol_id: ProtocolId, _roi: Roi, data: &Data, _external_id: Option<ProtocolId>) -> bool {
            self.sent.push((protocol_id, data.addressing));
            true
        }
    }

    fn handler() -> MuxValueFilterHandler {
        let common = HandlerCommon::new(vec![ProtocolId(1)], vec![ProtocolId(10)], Duration::from_millis(5100), None);
        MuxValueFilterHandler::new(common, 4, 4, 0.01)
    }

    #[test]
    fn repeated_value_on_same_flat_slot_is_filtered() {
        let mut h = handler();
        let mut sink = RecordingSink { sent: vec![] };
        let addr = Addr::channel(2);
        for _ in 0..2 {
            h.on_received_message_from_protocol(
                &mut sink,
                ProtocolId(1),
                Roi::MatrixInput_Gain,
                addr,
                Data::from_float(addr, -6.0),
                MetaInfo::unsolicited(),
            );
        }
        assert_eq!(sink.sent.len(), 1);
    }
}
