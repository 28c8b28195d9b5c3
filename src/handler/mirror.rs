//! Mirror-dualA-with-value-filter (spec.md §4.3 table, P4, S4): exactly two
//! A-protocols. The "master" forwards to B and is mirrored to the "slave";
//! if the master is silent longer than the failover window while traffic
//! arrives on the slave, master/slave swap atomically. Set-acknowledgement
//! messages are not written into the change-tracking cache for the
//! acknowledging peer, so the ack can still propagate to a bridged peer
//! that has not yet observed the update (spec.md §4.3 "Mirror" row).

use std::sync::Mutex;
use std::time::Duration;

use super::{would_loop, HandlerCommon, HandlerSink, ObjectDataHandler, OnlineState};
use crate::cache::ValueCache;
use crate::ids::ProtocolId;
use crate::model::{
    MessageCategory, RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo, ValueType,
};

pub struct MirrorHandler {
    common: HandlerCommon,
    /// Which of `common.protocol_a_ids[0]`/`[1]` currently holds the
    /// master role; the other is the slave.
    master_index: Mutex<usize>,
    failover: Duration,
    precision: f32,
    a_cache: ValueCache,
    b_cache: ValueCache,
}

impl MirrorHandler {
    pub fn new(common: HandlerCommon, failover: Duration, precision: f32) -> Self {
        assert_eq!(common.protocol_a_ids.len(), 2, "Mirror_dualA requires exactly two A protocols");
        assert_eq!(common.protocol_b_ids.len(), 1, "Mirror_dualA requires exactly one B protocol");
        let master = common.protocol_a_ids[0];
        common.set_state(master, OnlineState::MASTER);
        let slave = common.protocol_a_ids[1];
        common.set_state(slave, OnlineState::SLAVE);
        MirrorHandler {
            common,
            master_index: Mutex::new(0),
            failover,
            precision,
            a_cache: ValueCache::new(),
            b_cache: ValueCache::new(),
        }
    }

    fn master(&self) -> ProtocolId {
        self.common.protocol_a_ids[*self.master_index.lock().expect("poisoned")]
    }

    fn slave(&self) -> ProtocolId {
        let idx = *self.master_index.lock().expect("poisoned");
        self.common.protocol_a_ids[1 - idx]
    }

    /// P4: if the master has been silent longer than `failover` while the
    /// slave just produced traffic, atomically swap roles and notify the
    /// state listener.
    fn maybe_failover(&self) {
        let master = self.master();
        let stale = match self.common.last_seen(master) {
            Some(t) => t.elapsed() > self.failover,
            None => true,
        };
        if !stale {
            return;
        }
        let mut idx = self.master_index.lock().expect("poisoned");
        *idx = 1 - *idx;
        let new_master = self.common.protocol_a_ids[*idx];
        let new_slave = self.common.protocol_a_ids[1 - *idx];
        drop(idx);
        self.common.set_state(new_master, OnlineState::UP | OnlineState::MASTER);
        self.common.set_state(new_slave, OnlineState::UP | OnlineState::SLAVE);
    }

    fn b_id(&self) -> ProtocolId {
        self.common.protocol_b_ids[0]
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

impl ObjectDataHandler for MirrorHandler {
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

        if source == self.b_id() {
            // B-origin traffic always targets the current master.
            let write_cache = meta.category != MessageCategory::SetAcknowledgement;
            if write_cache && !Self::changed(&mut self.a_cache, roi, addressing, &data, self.precision) {
                return;
            }
            let master = self.master();
            if !would_loop(&meta, master) {
                sink.send_message_to(master, roi, &data, meta.external_id);
            }
            return;
        }

        if source == self.slave() {
            // Slave traffic never reaches B directly, but may trigger
            // failover if the master has gone silent (P4, S4).
            self.maybe_failover();
            if source != self.slave() {
                // Failover happened; re-dispatch as the (new) master path.
                self.on_received_message_from_protocol(sink, source, roi, addressing, data, meta);
            }
            return;
        }

        if source == self.master() {
            let write_cache = meta.category != MessageCategory::SetAcknowledgement;
            if write_cache && !Self::changed(&mut self.b_cache, roi, addressing, &data, self.precision) {
                return;
            }
            let b = self.b_id();
            if !would_loop(&meta, b) {
                sink.send_message_to(b, roi, &data, meta.external_id);
            }
            // Mirror the master's update onto the slave so both A peers
            // observe the same state (spec.md §4.3 "mirrored to the other A").
            let slave = self.slave();
            if !would_loop(&meta, slave) {
                sink.send_message_to(slave, roi, &data, meta.external_id);
            }
        }
    }

    fn common(&self) -> &HandlerCommon {
        &self.common
    }
}
