//! A1active/A2active-with-value-filter (spec.md §4.3 table): of two
//! A-protocols, only traffic from the selected one (A#1 or A#2) and from any
//! B protocol is forwarded, under value-change filtering. "Is this protocol
//! a B protocol" is tested via membership in `protocol_b_ids` (ambiguity #2,
//! spec.md §9/SPEC_FULL.md §4 — never the negation of A membership).

use super::{forward_to_all, HandlerCommon, HandlerSink, ObjectDataHandler};
use crate::cache::ValueCache;
use crate::ids::ProtocolId;
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo, ValueType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSlot {
    A1,
    A2,
}

pub struct ActiveSelectHandler {
    common: HandlerCommon,
    slot: ActiveSlot,
    precision: f32,
    a_cache: ValueCache,
    b_cache: ValueCache,
}

impl ActiveSelectHandler {
    pub fn new(common: HandlerCommon, slot: ActiveSlot, precision: f32) -> Self {
        assert!(common.protocol_a_ids.len() >= 2, "A1active/A2active requires at least two A protocols");
        ActiveSelectHandler {
            common,
            slot,
            precision,
            a_cache: ValueCache::new(),
            b_cache: ValueCache::new(),
        }
    }

    fn active_a(&self) -> ProtocolId {
        match self.slot {
            ActiveSlot::A1 => self.common.protocol_a_ids[0],
            ActiveSlot::A2 => self.common.protocol_a_ids[1],
        }
    }

    fn changed(cache: &mut ValueCache, roi: Roi, addressing: Addr, data: &Data, precision: f32) -> bool {
        let ro = RemoteObject::new(roi, addressing);
        let changed = match cache.peek(&ro) {
            None => true,
            Some(existing) => match data.value_type {
                ValueType::Float => {
                    let old = existing.as_floats().unwrap_or_default();
                    let new = data.as_floats().unwrap_or_default();
                    old.len() != new.len() || old.iter().zip(new.iter()).any(|(a, b)| (a - b).abs() > precision)
                }
                _ => existing.payload != data.payload || existing.value_type != data.value_type,
            },
        };
        if changed {
            cache.set(ro, data.clone());
        }
        changed
    }
}

impl ObjectDataHandler for ActiveSelectHandler {
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

        if matches!(roi, Roi::HeartbeatPing | Roi::HeartbeatPong) {
            return;
        }

        // Ambiguity #2: "is protocol B" is membership in protocol_b_ids.
        if self.common.is_b(source) {
            if data.value_count != 0 && !Self::changed(&mut self.b_cache, roi, addressing, &data, self.precision) {
                return;
            }
            let active = self.active_a();
            forward_to_all(sink, std::slice::from_ref(&active), source, roi, &data, &meta);
            return;
        }

        if source != self.active_a() {
            // Traffic from the non-selected A protocol is dropped.
            return;
        }
        if data.value_count != 0 && !Self::changed(&mut self.a_cache, roi, addressing, &data, self.precision) {
            return;
        }
        forward_to_all(sink, &self.common.protocol_b_ids, source, roi, &data, &meta);
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
        sent: Vec<(ProtocolId, Roi)>,
    }
    impl HandlerSink for RecordingSink {
        fn send_message_to(&mut self, protocol_id: ProtocolId, roi: Roi, _data: &Data, _external_id: Option<ProtocolId>) -> bool {
            self.sent.push((protocol_id, roi));
            true
        }
    }

    fn handler(slot: ActiveSlot) -> ActiveSelectHandler {
        let common = HandlerCommon::new(
            vec![ProtocolId(1), ProtocolId(2)],
            vec![ProtocolId(10)],
            Duration::from_millis(5100),
            None,
        );
        ActiveSelectHandler::new(common, slot, 0.0)
    }

    #[test]
    fn only_the_active_a_protocol_is_forwarded() {
        let mut h = handler(ActiveSlot::A1);
        let mut sink = RecordingSink { sent: vec![] };
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(2),
            Roi::MatrixInput_Mute,
            Addr::channel(1),
            Data::from_int(Addr::channel(1), 1),
            MetaInfo::unsolicited(),
        );
        assert!(sink.sent.is_empty());

        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::MatrixInput_Mute,
            Addr::channel(1),
            Data::from_int(Addr::channel(1), 1),
            MetaInfo::unsolicited(),
        );
        assert_eq!(sink.sent, vec![(ProtocolId(10), Roi::MatrixInput_Mute)]);
    }

    #[test]
    fn b_traffic_always_forwards_to_the_active_a() {
        let mut h = handler(ActiveSlot::A2);
        let mut sink = RecordingSink { sent: vec![] };
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(10),
            Roi::MatrixInput_Mute,
            Addr::channel(1),
            Data::from_int(Addr::channel(1), 1),
            MetaInfo::unsolicited(),
        );
        assert_eq!(sink.sent, vec![(ProtocolId(2), Roi::MatrixInput_Mute)]);
    }
}
