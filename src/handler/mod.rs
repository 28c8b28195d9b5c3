//! Object-Data-Handler contract and variants (spec.md §4.3): the routing/
//! filtering/transformation policy a `Node` applies between its role-A and
//! role-B processors. Dispatch is a closed tagged enum (`Handler`) over the
//! known modes, per the "Polymorphism by variant" design note (spec.md §9),
//! the same move `processor::Processor` makes for wire protocols.
//!
//! `Handler` never holds a back-reference to its owning `Node` (spec.md §9
//! "Cyclic parent pointers"): `Node::dispatch` passes itself as a
//! `&dyn HandlerSink` for the duration of one call instead.

pub mod active_select;
pub mod bypass;
pub mod mirror;
pub mod mux;
pub mod mux_value_filter;
pub mod remap;
pub mod value_filter;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cache::ValueCache;
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo,
};

/// Default reaction timeout after which a silent protocol is flipped to
/// `Down` (spec.md §4.3).
pub const DEFAULT_REACTION_TIMEOUT_MS: u64 = 5100;

/// Default mirror failover window (spec.md §4.3 "Mirror-dualA").
pub const DEFAULT_FAILOVER_MS: u64 = 1000;

/// `Up`/`Down` and `Master`/`Slave` are mutually exclusive bit-pairs
/// combined via bitwise OR (spec.md §4.3 "per-protocol online state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineState(u8);

impl OnlineState {
    pub const DOWN: OnlineState = OnlineState(0b0000);
    pub const UP: OnlineState = OnlineState(0b0001);
    pub const MASTER: OnlineState = OnlineState(0b0010);
    pub const SLAVE: OnlineState = OnlineState(0b0100);

    pub fn is_up(self) -> bool {
        self.0 & Self::UP.0 != 0
    }

    pub fn is_master(self) -> bool {
        self.0 & Self::MASTER.0 != 0
    }

    pub fn is_slave(self) -> bool {
        self.0 & Self::SLAVE.0 != 0
    }
}

impl std::ops::BitOr for OnlineState {
    type Output = OnlineState;
    fn bitor(self, rhs: OnlineState) -> OnlineState {
        OnlineState(self.0 | rhs.0)
    }
}

/// Telemetry hook for per-protocol online-state transitions (spec.md §4.3
/// "a state listener for telemetry", invariant P4).
pub trait HandlerStateListener: Send + Sync {
    fn on_protocol_state_changed(&self, protocol_id: ProtocolId, state: OnlineState);
}

/// What a handler is allowed to do back into its owning `Node` for the
/// duration of one `on_received_message_from_protocol` call (spec.md §9).
pub trait HandlerSink {
    fn send_message_to(
        &mut self,
        protocol_id: ProtocolId,
        roi: Roi,
        data: &Data,
        external_id: Option<ProtocolId>,
    ) -> bool;
}

/// State shared by every handler variant (spec.md §4.3 "Shared state").
pub struct HandlerCommon {
    pub protocol_a_ids: Vec<ProtocolId>,
    pub protocol_b_ids: Vec<ProtocolId>,
    online_state: Mutex<HashMap<ProtocolId, OnlineState>>,
    /// Guarded because the reaction timer reads it while the Node worker
    /// thread writes it on every received message (spec.md §5 "handler's
    /// per-protocol last-seen timestamp map").
    last_seen: Mutex<HashMap<ProtocolId, Instant>>,
    pub reaction_timeout: Duration,
    state_listener: Option<Arc<dyn HandlerStateListener>>,
}

impl HandlerCommon {
    pub fn new(
        protocol_a_ids: Vec<ProtocolId>,
        protocol_b_ids: Vec<ProtocolId>,
        reaction_timeout: Duration,
        state_listener: Option<Arc<dyn HandlerStateListener>>,
    ) -> Self {
        let mut online = HashMap::new();
        for &id in protocol_a_ids.iter().chain(protocol_b_ids.iter()) {
            online.insert(id, OnlineState::DOWN);
        }
        HandlerCommon {
            protocol_a_ids,
            protocol_b_ids,
            online_state: Mutex::new(online),
            last_seen: Mutex::new(HashMap::new()),
            reaction_timeout,
            state_listener,
        }
    }

    /// Ambiguity #2 (spec.md §9, SPEC_FULL.md §4): "is this a B protocol" is
    /// always membership in `protocol_b_ids`, never the negation of
    /// membership in `protocol_a_ids`.
    pub fn role_of(&self, id: ProtocolId) -> Option<Role> {
        if self.protocol_a_ids.contains(&id) {
            Some(Role::A)
        } else if self.protocol_b_ids.contains(&id) {
            Some(Role::B)
        } else {
            None
        }
    }

    pub fn is_b(&self, id: ProtocolId) -> bool {
        self.protocol_b_ids.contains(&id)
    }

    /// Records traffic and flips the protocol `Up` (set bit, Master/Slave
    /// bits preserved) if it had been `Down` (spec.md §4.3 "last seen...
    /// updated on any incoming message").
    pub fn touch(&self, id: ProtocolId) {
        self.last_seen.lock().expect("poisoned").insert(id, Instant::now());
        let mut state = self.online_state.lock().expect("poisoned");
        let current = *state.get(&id).unwrap_or(&OnlineState::DOWN);
        let updated = if !current.is_up() {
            current | OnlineState::UP
        } else {
            current
        };
        state.insert(id, updated);
        drop(state);
        self.fire(id, updated);
    }

    pub fn state_of(&self, id: ProtocolId) -> OnlineState {
        *self.online_state.lock().expect("poisoned").get(&id).unwrap_or(&OnlineState::DOWN)
    }

    pub fn set_state(&self, id: ProtocolId, state: OnlineState) {
        self.online_state.lock().expect("poisoned").insert(id, state);
        self.fire(id, state);
    }

    pub fn last_seen(&self, id: ProtocolId) -> Option<Instant> {
        self.last_seen.lock().expect("poisoned").get(&id).copied()
    }

    fn fire(&self, id: ProtocolId, state: OnlineState) {
        if let Some(l) = &self.state_listener {
            l.on_protocol_state_changed(id, state);
        }
    }

    /// Periodic sweep (spec.md §4.3 "a periodic timer flips silent
    /// protocols to Down"): every protocol whose last-seen is older than
    /// `reaction_timeout` and is currently `Up` transitions to `Down`.
    pub fn sweep_reaction_timeouts(&self) {
        let now = Instant::now();
        let stale: Vec<ProtocolId> = self
            .last_seen
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|(_, t)| now.duration_since(**t) > self.reaction_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            let mut state = self.online_state.lock().expect("poisoned");
            let current = *state.get(&id).unwrap_or(&OnlineState::DOWN);
            if current.is_up() {
                let down = OnlineState(current.0 & !OnlineState::UP.0);
                state.insert(id, down);
                drop(state);
                self.fire(id, down);
            }
        }
    }
}

/// P5 (spec.md §8): a `SetAcknowledgement` whose `external_id` equals
/// `target` must never be re-sent to `target`.
pub fn would_loop(meta: &MetaInfo, target: ProtocolId) -> bool {
    meta.would_loop_back_to(target)
}

/// The XYZ/XY/X/Y family-coherence invariant common to every handler mode
/// (spec.md §4.3 "positioning ROIs", P3): folds an incoming position
/// message into `cache`'s XYZ entry for `addressing` and returns every
/// variant ROI whose cached value is now current, so the caller can emit
/// them upstream.
pub fn apply_position_update(cache: &mut ValueCache, roi: Roi, addressing: Addr, data: &Data) -> Vec<(Roi, Data)> {
    let Some(family) = roi.position_family() else {
        return vec![(roi, data.clone())];
    };
    let Some(variant) = roi.position_variant() else {
        return vec![(roi, data.clone())];
    };

    let xyz_key = RemoteObject::new(family.variant(crate::model::PositionVariant::Xyz), addressing);
    let (mut x, mut y, mut z) = cache.get_triple_float(&xyz_key);
    let values = data.as_floats().unwrap_or_default();
    match variant {
        crate::model::PositionVariant::Xyz => {
            x = values.first().copied().unwrap_or(x);
            y = values.get(1).copied().unwrap_or(y);
            z = values.get(2).copied().unwrap_or(z);
        }
        crate::model::PositionVariant::Xy => {
            x = values.first().copied().unwrap_or(x);
            y = values.get(1).copied().unwrap_or(y);
        }
        crate::model::PositionVariant::X => {
            x = values.first().copied().unwrap_or(x);
        }
        crate::model::PositionVariant::Y => {
            y = values.first().copied().unwrap_or(y);
        }
    }
    cache.set(xyz_key, Data::from_floats(addressing, &[x, y, z]));

    vec![
        (family.variant(crate::model::PositionVariant::Xyz), Data::from_floats(addressing, &[x, y, z])),
        (family.variant(crate::model::PositionVariant::Xy), Data::from_floats(addressing, &[x, y])),
        (family.variant(crate::model::PositionVariant::X), Data::from_float(addressing, x)),
        (family.variant(crate::model::PositionVariant::Y), Data::from_float(addressing, y)),
    ]
}

/// Forwards `(roi, data)` to every id in `targets`, skipping the origin and
/// any id the message would loop back to (spec.md §4.3 common invariants).
pub fn forward_to_all(
    sink: &mut dyn HandlerSink,
    targets: &[ProtocolId],
    source: ProtocolId,
    roi: Roi,
    data: &Data,
    meta: &MetaInfo,
) {
    for &target in targets {
        if target == source || would_loop(meta, target) {
            continue;
        }
        sink.send_message_to(target, roi, data, meta.external_id);
    }
}

/// The uniform capability every handler mode implements (spec.md §4.3).
pub trait ObjectDataHandler: Send {
    fn on_received_message_from_protocol(
        &mut self,
        sink: &mut dyn HandlerSink,
        source: ProtocolId,
        roi: Roi,
        addressing: Addr,
        data: Data,
        meta: MetaInfo,
    );

    fn common(&self) -> &HandlerCommon;
}

/// Closed tagged enum over the eleven configured object-handling modes
/// (spec.md §6 `ObjectHandling/@Mode`, §9 "Polymorphism by variant").
pub enum Handler {
    Bypass(bypass::BypassHandler),
    Remap(remap::RemapHandler),
    Mux(mux::MuxHandler),
    ValueFilter(value_filter::ValueFilterHandler),
    MuxValueFilter(mux_value_filter::MuxValueFilterHandler),
    Mirror(mirror::MirrorHandler),
    ActiveSelect(active_select::ActiveSelectHandler),
}

impl Handler {
    pub fn on_received_message_from_protocol(
        &mut self,
        sink: &mut dyn HandlerSink,
        source: ProtocolId,
        roi: Roi,
        addressing: Addr,
        data: Data,
        meta: MetaInfo,
    ) {
        match self {
            Handler::Bypass(h) => h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta),
            Handler::Remap(h) => h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta),
            Handler::Mux(h) => h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta),
            Handler::ValueFilter(h) => h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta),
            Handler::MuxValueFilter(h) => {
                h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta)
            }
            Handler::Mirror(h) => h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta),
            Handler::ActiveSelect(h) => h.on_received_message_from_protocol(sink, source, roi, addressing, data, meta),
        }
    }

    pub fn common(&self) -> &HandlerCommon {
        match self {
            Handler::Bypass(h) => h.common(),
            Handler::Remap(h) => h.common(),
            Handler::Mux(h) => h.common(),
            Handler::ValueFilter(h) => h.common(),
            Handler::MuxValueFilter(h) => h.common(),
            Handler::Mirror(h) => h.common(),
            Handler::ActiveSelect(h) => h.common(),
        }
    }

    pub fn sweep_reaction_timeouts(&self) {
        self.common().sweep_reaction_timeouts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProtocolId;
    use crate::model::{RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi};

    #[test]
    fn touch_flips_a_down_protocol_up() {
        let common = HandlerCommon::new(vec![ProtocolId(1)], vec![ProtocolId(2)], Duration::from_millis(100), None);
        assert!(!common.state_of(ProtocolId(1)).is_up());
        common.touch(ProtocolId(1));
        assert!(common.state_of(ProtocolId(1)).is_up());
    }

    #[test]
    fn sweep_flips_stale_protocol_down() {
        let common = HandlerCommon::new(vec![ProtocolId(1)], vec![ProtocolId(2)], Duration::from_millis(10), None);
        common.touch(ProtocolId(1));
        std::thread::sleep(Duration::from_millis(25));
        common.sweep_reaction_timeouts();
        assert!(!common.state_of(ProtocolId(1)).is_up());
    }

    #[test]
    fn role_of_uses_b_membership_not_a_negation() {
        let common = HandlerCommon::new(vec![ProtocolId(1)], vec![ProtocolId(2)], Duration::from_millis(100), None);
        assert_eq!(common.role_of(ProtocolId(2)), Some(Role::B));
        assert!(common.is_b(ProtocolId(2)));
        assert!(!common.is_b(ProtocolId(1)));
        assert_eq!(common.role_of(ProtocolId(99)), None);
    }

    #[test]
    fn p3_xy_then_x_update_preserves_other_component() {
        let mut cache = ValueCache::new();
        let addr = Addr::channel_record(1, 1);
        apply_position_update(
            &mut cache,
            Roi::CoordinateMapping_SourcePosition_XY,
            addr,
            &Data::from_floats(addr, &[0.25, 0.75]),
        );
        let variants = apply_position_update(
            &mut cache,
            Roi::CoordinateMapping_SourcePosition_X,
            addr,
            &Data::from_float(addr, 0.9),
        );
        let xyz = variants
            .iter()
            .find(|(r, _)| *r == Roi::CoordinateMapping_SourcePosition_XYZ)
            .unwrap();
        assert_eq!(xyz.1.as_floats().unwrap(), vec![0.9, 0.75, 0.0]);
    }
}
