//! Forward-only-value-changes (spec.md §4.3 table, P2): forwards a message
//! only when it differs from the last value seen from that side by more
//! than the configured precision. Keeps a split `a_cache`/`b_cache`
//! (ambiguity #3, spec.md §9/SPEC_FULL.md §4 — the source's single merged
//! `m_currentValues` is a bug, not a behavior to reproduce) and walks the
//! *requesting* side's cache for `GetAllKnownValues` (ambiguity #1).

use super::{forward_to_all, HandlerCommon, HandlerSink, ObjectDataHandler};
use crate::cache::ValueCache;
use crate::ids::{ProtocolId, Role};
use crate::model::{
    MessageCategory, RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo, ValueType,
};

/// Default `DataPrecision` (spec.md §6) when a Node's configuration omits it.
pub const DEFAULT_PRECISION: f32 = 0.0;

pub struct ValueFilterHandler {
    common: HandlerCommon,
    a_cache: ValueCache,
    b_cache: ValueCache,
    pub precision: f32,
}

impl ValueFilterHandler {
    pub fn new(common: HandlerCommon, precision: f32) -> Self {
        ValueFilterHandler {
            common,
            a_cache: ValueCache::new(),
            b_cache: ValueCache::new(),
            precision,
        }
    }

    /// P2: true iff `data` should be forwarded — it differs from the cached
    /// value (beyond `precision` for floats), is a zero-arity polling
    /// request, or is a heartbeat. Updates the cache as a side effect when
    /// it does forward.
    fn should_forward(cache: &mut ValueCache, roi: Roi, addressing: Addr, data: &Data, precision: f32) -> bool {
        if matches!(roi, Roi::HeartbeatPing | Roi::HeartbeatPong) || data.value_count == 0 {
            return true;
        }
        let ro = RemoteObject::new(roi, addressing);
        let changed = match cache.peek(&ro) {
            None => true,
            Some(existing) => match data.value_type {
                ValueType::Float => {
                    let old = existing.as_floats().unwrap_or_default();
                    let new = data.as_floats().unwrap_or_default();
                    old.len() != new.len()
                        || old.iter().zip(new.iter()).any(|(a, b)| (a - b).abs() > precision)
                }
                _ => existing.payload != data.payload || existing.value_type != data.value_type,
            },
        };
        if changed {
            cache.set(ro, data.clone());
        }
        changed
    }

    /// `GetAllKnownValues` reply: walks the *requesting* side's cache and
    /// sends every entry back to the requester (ambiguity #1 fix).
    fn send_value_cache_to_protocol(&self, sink: &mut dyn HandlerSink, requester: ProtocolId) {
        let cache = if self.common.is_b(requester) { &self.b_cache } else { &self.a_cache };
        for (ro, data) in cache.iter() {
            sink.send_message_to(requester, ro.roi, data, None);
        }
    }
}

impl ObjectDataHandler for ValueFilterHandler {
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

        if roi == Roi::GetAllKnownValues {
            self.send_value_cache_to_protocol(sink, source);
            return;
        }

        let cache = match role {
            Role::A => &mut self.a_cache,
            Role::B => &mut self.b_cache,
        };
        // Set-acknowledgements are not written into the change-tracking
        // cache for the acknowledged peer, so a later genuine change can
        // still reach peers that never observed it (spec.md §4.3 "Mirror"
        // row note, reused here for the general ack-suppression case).
        if meta.category != MessageCategory::SetAcknowledgement
            && !Self::should_forward(cache, roi, addressing, &data, self.precision)
        {
            return;
        }

        let targets: &[ProtocolId] = match role {
            Role::A => &self.common.protocol_b_ids,
            Role::B => &self.common.protocol_a_ids,
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
    use std::time::Duration;

    struct RecordingSink {
        sent: Vec<(ProtocolId, Roi, Option<f32>)>,
    }
    impl HandlerSink for RecordingSink {
        fn send_message_to(&mut self, protocol_id: ProtocolId, roi: Roi, data: &Data, _external_id: Option<ProtocolId>) -> bool {
            self.sent.push((protocol_id, roi, data.as_float()));
            true
        }
    }

    fn handler(precision: f32) -> ValueFilterHandler {
        let common = HandlerCommon::new(vec![ProtocolId(1)], vec![ProtocolId(2)], Duration::from_millis(5100), None);
        ValueFilterHandler::new(common, precision)
    }

    #[test]
    fn s3_repeated_value_within_precision_is_filtered() {
        let mut h = handler(0.01);
        let mut sink = RecordingSink { sent: vec![] };
        let addr = Addr::channel(1);
        let mut send = |h: &mut ValueFilterHandler, v: f32| {
            h.on_received_message_from_protocol(
                &mut sink,
                ProtocolId(1),
                Roi::MatrixInput_Gain,
                addr,
                Data::from_float(addr, v),
                MetaInfo::unsolicited(),
            );
        };
        send(&mut h, 0.500);
        send(&mut h, 0.5005);
        send(&mut h, 0.520);
        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[0].2, Some(0.500));
        assert_eq!(sink.sent[1].2, Some(0.520));
    }

    #[test]
    fn zero_arity_polling_request_always_forwards() {
        let mut h = handler(0.01);
        let mut sink = RecordingSink { sent: vec![] };
        let addr = Addr::channel(1);
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::MatrixInput_Gain,
            addr,
            Data::empty(addr),
            MetaInfo::unsolicited(),
        );
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(1),
            Roi::MatrixInput_Gain,
            addr,
            Data::empty(addr),
            MetaInfo::unsolicited(),
        );
        assert_eq!(sink.sent.len(), 2);
    }

    #[test]
    fn get_all_known_values_walks_the_requesters_own_cache() {
        let mut h = handler(0.0);
        let mut sink = RecordingSink { sent: vec![] };
        let addr = Addr::channel(1);
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(2),
            Roi::MatrixInput_Gain,
            addr,
            Data::from_float(addr, -6.0),
            MetaInfo::unsolicited(),
        );
        sink.sent.clear();
        h.on_received_message_from_protocol(
            &mut sink,
            ProtocolId(2),
            Roi::GetAllKnownValues,
            Addr::NONE,
            Data::empty(Addr::NONE),
            MetaInfo::unsolicited(),
        );
        assert_eq!(sink.sent, vec![(ProtocolId(2), Roi::MatrixInput_Gain, Some(-6.0))]);
    }
}
