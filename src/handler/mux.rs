//! Mux nA<->mB (spec.md §4.3 table, P6): flattens each role's channels into
//! a contiguous index (`protocolIndex * chanCount + localChannel`), then
//! splits that flat index into the other role's channel layout.

use super::{would_loop, HandlerCommon, HandlerSink, ObjectDataHandler};
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo,
};

/// Flattens `(protocol index within `ids`, 1-based local channel)` into a
/// single 0-based index (spec.md §4.3 "Mux"). Returns `None` if `source_id`
/// is not a member of `ids` or `local_channel` is non-positive.
pub fn flatten_channel(ids: &[ProtocolId], chan_count: i32, source_id: ProtocolId, local_channel: i32) -> Option<i32> {
    if local_channel < 1 {
        return None;
    }
    let index = ids.iter().position(|&id| id == source_id)? as i32;
    Some(index * chan_count + (local_channel - 1))
}

/// Inverse of [`flatten_channel`]: splits a flat index back into the target
/// protocol id within `ids` and its 1-based local channel (spec.md §4.3,
/// P6 "round trip").
pub fn unflatten_channel(ids: &[ProtocolId], chan_count: i32, flat: i32) -> Option<(ProtocolId, i32)> {
    if chan_count <= 0 || flat < 0 {
        return None;
    }
    let index = (flat / chan_count) as usize;
    let local = flat % chan_count + 1;
    ids.get(index).map(|&id| (id, local))
}

pub struct MuxHandler {
    common: HandlerCommon,
    pub a_chan_count: i32,
    pub b_chan_count: i32,
}

impl MuxHandler {
    pub fn new(common: HandlerCommon, a_chan_count: i32, b_chan_count: i32) -> Self {
        MuxHandler {
            common,
            a_chan_count,
            b_chan_count,
        }
    }
}

impl ObjectDataHandler for MuxHandler {
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
        let Some((target, local_channel)) = unflatten_channel(dst_ids, dst_count, flat) else {
            return;
        };
        if would_loop(&meta, target) {
            return;
        }
        let mapped_addr = Addr::channel_record(local_channel, addressing.second);
        let mapped_data = Data {
            addressing: mapped_addr,
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

    #[test]
    fn p6_round_trip_restores_original_channel() {
        let a_ids = vec![ProtocolId(1), ProtocolId(2)];
        let b_ids = vec![ProtocolId(10)];
        let flat = flatten_channel(&a_ids, 8, ProtocolId(2), 3).unwrap();
        let (back_id, back_channel) = unflatten_channel(&a_ids, 8, flat).unwrap();
        assert_eq!(back_id, ProtocolId(2));
        assert_eq!(back_channel, 3);
        let _ = b_ids;
    }

    #[test]
    fn flattening_is_contiguous_across_protocol_index() {
        let ids = vec![ProtocolId(1), ProtocolId(2)];
        assert_eq!(flatten_channel(&ids, 4, ProtocolId(1), 1).unwrap(), 0);
        assert_eq!(flatten_channel(&ids, 4, ProtocolId(1), 4).unwrap(), 3);
        assert_eq!(flatten_channel(&ids, 4, ProtocolId(2), 1).unwrap(), 4);
    }

    struct RecordingSink {
        sent: Vec<(ProtocolId, Addr)>,
    }
    impl HandlerSink for RecordingSink {
        fn send_message_to(&mut self, protocol_id: ProtocolId, _roi: Roi, data: &Data, _external_id: Option<ProtocolId>) -> bool {
            self.sent.push((protocol_id, data.addressing));
            true
        }
    }

    #[test]
    fn remaps_channel_across_roles_with_different_counts() {
        use std::time::Duration;
        let common = HandlerCommon::new(
            vec![ProtocolId(1), ProtocolId(2)],
            vec![ProtocolId(10)],
            Duration::from_millis(5100),
            None,
        );
        let mut h = MuxHandler::new(common, 4, 8);
        let mut sink = RecordingSink { sent: vec![] };
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(2),
            Roi::MatrixInput_Mute,
            Addr::channel(2),
            Data::from_int(Addr::channel(2), 1),
            MetaInfo::unsolicited(),
        );
        // A#2 (index 1) local channel 2 -> flat = 1*4 + 1 = 5 -> B chan_count 8 -> index 0, local 6.
        assert_eq!(sink.sent, vec![(ProtocolId(10), Addr::channel(6))]);
    }
}
