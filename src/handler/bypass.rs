//! Bypass / Forward-A-to-B-only / Reverse-B-to-A-only (spec.md §4.3 table):
//! the three directional modes that differ only in which origin role is
//! allowed to forward, so they share one struct parameterized by direction.

use super::{forward_to_all, HandlerCommon, HandlerSink, ObjectDataHandler};
use crate::ids::ProtocolId;
use crate::model::{
    RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassDirection {
    /// A<->B, no filtering (spec.md §4.3 "Bypass").
    Both,
    /// Drop B-origin messages (spec.md §4.3 "Forward A->B only").
    AToBOnly,
    /// Drop A-origin messages (spec.md §4.3 "Reverse B->A only").
    BToAOnly,
}

pub struct BypassHandler {
    common: HandlerCommon,
    direction: BypassDirection,
}

impl BypassHandler {
    pub fn new(common: HandlerCommon, direction: BypassDirection) -> Self {
        BypassHandler { common, direction }
    }
}

impl ObjectDataHandler for BypassHandler {
    fn on_received_message_from_protocol(
        &mut self,
        sink: &mut dyn HandlerSink,
        source: ProtocolId,
        roi: Roi,
        _addressing: Addr,
        data: Data,
        meta: MetaInfo,
    ) {
        self.common.touch(source);
        let Some(source_role) = self.common.role_of(source) else {
            return;
        };
        let is_b_origin = self.common.is_b(source);
        let allowed = match self.direction {
            BypassDirection::Both => true,
            BypassDirection::AToBOnly => !is_b_origin,
            BypassDirection::BToAOnly => is_b_origin,
        };
        if !allowed {
            return;
        }
        let targets: &[ProtocolId] = match source_role {
            crate::ids::Role::A => &self.common.protocol_b_ids,
            crate::ids::Role::B => &self.common.protocol_a_ids,
        };
        forward_to_all(sink, targets, source, roi, &data, &meta);
    }

    fn common(&self) -> &HandlerCommon {
        &self.common
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Role;
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

    fn handler(direction: BypassDirection) -> BypassHandler {
        let common = HandlerCommon::new(
            vec![ProtocolId(1)],
            vec![ProtocolId(2)],
            Duration::from_millis(5100),
            None,
        );
        BypassHandler::new(common, direction)
    }

    #[test]
    fn s1_bypass_forwards_a_origin_to_b() {
        let mut h = handler(BypassDirection::Both);
        let mut sink = RecordingSink { sent: vec![] };
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::MatrixInput_Mute,
            Addr::channel(3),
            Data::from_int(Addr::channel(3), 1),
            MetaInfo::unsolicited(),
        );
        assert_eq!(sink.sent, vec![(ProtocolId(2), Roi::MatrixInput_Mute)]);
    }

    #[test]
    fn forward_a_to_b_only_drops_b_origin_traffic() {
        let mut h = handler(BypassDirection::AToBOnly);
        let mut sink = RecordingSink { sent: vec![] };
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(2),
            Roi::MatrixInput_Mute,
            Addr::channel(3),
            Data::from_int(Addr::channel(3), 1),
            MetaInfo::unsolicited(),
        );
        assert!(sink.sent.is_empty());
        assert_eq!(h.common().role_of(ProtocolId(2)), Some(Role::B));
    }

    #[test]
    fn p5_set_acknowledgement_never_loops_back_to_originator() {
        let mut h = handler(BypassDirection::Both);
        let mut sink = RecordingSink { sent: vec![] };
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::MatrixInput_Mute,
            Addr::channel(1),
            Data::from_int(Addr::channel(1), 1),
            MetaInfo::set_acknowledgement(ProtocolId(2)),
        );
        assert!(sink.sent.is_empty());
    }
}
