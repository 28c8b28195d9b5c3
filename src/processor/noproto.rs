//! "No-protocol" processor (spec.md §4.2.6): an in-process simulator used
//! to develop/test handler configurations without real hardware. No
//! teacher file simulates a DS100-like device, so defaults (64 inputs, 4
//! mapping areas, 10 scenes) and the animation modes are taken directly
//! from spec.md §4.2.6.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ProcessorCommon, ProcessorListener, ProtocolProcessor};
use crate::cache::ValueCache;
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo,
};
use crate::timer::TimerThread;

pub const DEFAULT_INPUT_COUNT: i32 = 64;
pub const DEFAULT_MAPPING_COUNT: i32 = 4;
pub const DEFAULT_SCENE_COUNT: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationMode {
    None,
    Circular,
    PseudoRandom,
}

/// A small xorshift64 generator. Dropped the teacher's `rand` dependency
/// (DESIGN.md) since this is the only remaining randomness consumer and a
/// non-cryptographic deterministic-seed generator is all it needs.
struct Xorshift64 {
    state: AtomicU64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Xorshift64 {
            state: AtomicU64::new(if seed == 0 { 0x9E3779B97F4A7C15 } else { seed }),
        }
    }

    fn next_f32(&self) -> f32 {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        (x >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// State a running timer thread needs to touch: the simulated cache, the
/// animation RNG/phase, and the listener. Held behind an `Arc` so the
/// animation and active-object poll timers (spec.md §4.2.6, §4.2 "Active-
/// object timer") can reach it without a back-reference to the owning
/// `NoProtocolProcessor` (spec.md §9 "Cyclic parent pointers").
struct NoProtocolShared {
    id: ProtocolId,
    cache: Mutex<ValueCache>,
    rng: Xorshift64,
    phase: Mutex<f32>,
    listener: Option<Arc<dyn ProcessorListener>>,
}

impl NoProtocolShared {
    fn tick_animation(&self, animation: AnimationMode) {
        if matches!(animation, AnimationMode::None) {
            return;
        }
        let mut cache = self.cache.lock().expect("poisoned");
        for ch in 1..=DEFAULT_INPUT_COUNT {
            let addr = Addr::channel_record(ch, 1);
            let ro = RemoteObject::new(Roi::CoordinateMapping_SourcePosition_XYZ, addr);
            let (x, y) = match animation {
                AnimationMode::Circular => {
                    let mut phase = self.phase.lock().expect("poisoned");
                    *phase += 0.05;
                    (0.5 + 0.4 * phase.cos(), 0.5 + 0.4 * phase.sin())
                }
                AnimationMode::PseudoRandom => (self.rng.next_f32(), self.rng.next_f32()),
                AnimationMode::None => unreachable!(),
            };
            cache.set(ro, Data::from_floats(addr, &[x, y, 0.0]));
            if let Some(l) = &self.listener {
                l.on_protocol_message_received(
                    self.id,
                    Roi::CoordinateMapping_SourcePosition_XYZ,
                    addr,
                    Data::from_floats(addr, &[x, y, 0.0]),
                    MetaInfo::unsolicited(),
                );
            }
        }
    }

    /// Answers one active-object query from the simulated cache (spec.md
    /// §4.2.6 "reply synthesis for any value-request"); the active-object
    /// poll timer calls this once per active `RemoteObject` per tick.
    fn answer_query(&self, roi: Roi, addressing: Addr) {
        let ro = RemoteObject::new(roi, addressing);
        let reply = self.cache.lock().expect("poisoned").get(ro).clone();
        if let Some(l) = &self.listener {
            l.on_protocol_message_received(self.id, roi, addressing, reply, MetaInfo::unsolicited());
        }
    }
}

pub struct NoProtocolProcessor {
    common: ProcessorCommon,
    shared: Arc<NoProtocolShared>,
    animation: AnimationMode,
    running: Arc<AtomicBool>,
    /// Drives `tick_animation` at the polling interval (spec.md §4.2.6).
    animation_timer: Option<TimerThread>,
    /// Drives the shared §4.2 active-object timer.
    active_timer: Option<TimerThread>,
}

impl NoProtocolProcessor {
    pub fn new(
        id: ProtocolId,
        role: Role,
        animation: AnimationMode,
        listener: Option<Arc<dyn ProcessorListener>>,
    ) -> Self {
        let mut cache = ValueCache::new();
        Self::seed_defaults(&mut cache);
        NoProtocolProcessor {
            common: ProcessorCommon::new(id, role, false, 0),
            shared: Arc::new(NoProtocolShared {
                id,
                cache: Mutex::new(cache),
                rng: Xorshift64::new(id.0),
                phase: Mutex::new(0.0),
                listener,
            }),
            animation,
            running: Arc::new(AtomicBool::new(false)),
            animation_timer: None,
            active_timer: None,
        }
    }

    pub fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    /// Initializes synthetic defaults: 64 inputs, 4 mapping areas, 10
    /// scenes, en-space ("english"/default-locale) names (spec.md §4.2.6).
    fn seed_defaults(cache: &mut ValueCache) {
        for ch in 1..=DEFAULT_INPUT_COUNT {
            let addr = Addr::channel(ch);
            cache.set(
                RemoteObject::new(Roi::MatrixInput_Mute, addr),
                Data::from_int(addr, 0),
            );
            cache.set(
                RemoteObject::new(Roi::MatrixInput_Gain, addr),
                Data::from_float(addr, 0.0),
            );
            cache.set(
                RemoteObject::new(Roi::MatrixInput_Name, addr),
                Data::from_string(addr, &format!("Input {}", ch)),
            );
            for record in 1..=DEFAULT_MAPPING_COUNT {
                let mapped = Addr::channel_record(ch, record);
                cache.set(
                    RemoteObject::new(Roi::CoordinateMapping_SourcePosition_XYZ, mapped),
                    Data::from_floats(mapped, &[0.5, 0.5, 0.0]),
                );
            }
        }
        for scene in 1..=DEFAULT_SCENE_COUNT {
            let addr = Addr::channel(scene);
            cache.set(
                RemoteObject::new(Roi::Scene_Name, addr),
                Data::from_string(addr, &format!("Scene {}", scene)),
            );
        }
    }

    fn tick_animation(&self) {
        self.shared.tick_animation(self.animation);
    }

    pub fn cache_get(&self, ro: &RemoteObject) -> Data {
        let mut cache = self.shared.cache.lock().expect("poisoned");
        cache.get(*ro).clone()
    }
}

impl ProtocolProcessor for NoProtocolProcessor {
    fn id(&self) -> ProtocolId {
        self.common.id
    }

    fn role(&self) -> Role {
        self.common.role
    }

    fn processor_type(&self) -> &'static str {
        "NoProtocol"
    }

    fn start(&mut self) -> bool {
        self.running.store(true, Ordering::SeqCst);

        if !matches!(self.animation, AnimationMode::None) {
            let shared = self.shared.clone();
            let animation = self.animation;
            let interval = Duration::from_millis(if self.common.polling_interval_ms > 0 {
                self.common.polling_interval_ms
            } else {
                100
            });
            self.animation_timer = Some(TimerThread::start(
                &format!("noproto-anim-{}", self.common.id),
                interval,
                interval,
                move || shared.tick_animation(animation),
            ));
        }

        // Shared §4.2 active-object timer: re-query every active object at
        // the configured interval (spec.md §4.2 "default implementation
        // issues a value-query").
        if self.common.uses_active_objects && self.common.polling_interval_ms > 0 {
            let shared = self.shared.clone();
            let actives = self.common.active_objects();
            let interval = Duration::from_millis(self.common.polling_interval_ms);
            self.active_timer = Some(TimerThread::start(
                &format!("noproto-poll-{}", self.common.id),
                interval,
                interval,
                move || {
                    for ro in &actives {
                        shared.answer_query(ro.roi, ro.addressing);
                    }
                },
            ));
        }
        true
    }

    fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.animation_timer = None;
        self.active_timer = None;
        true
    }

    /// Provides reply synthesis for any value-request (spec.md §4.2.6):
    /// an empty-payload request is answered from the simulated cache; a
    /// non-empty request writes through and is echoed back.
    fn send_remote_object_message(
        &mut self,
        roi: Roi,
        data: &Data,
        _external_id: Option<ProtocolId>,
    ) -> bool {
        let ro = RemoteObject::new(roi, data.addressing);
        let mut cache = self.shared.cache.lock().expect("poisoned");
        if data.value_count == 0 {
            let reply = cache.get(ro).clone();
            drop(cache);
            if let Some(l) = &self.shared.listener {
                l.on_protocol_message_received(self.common.id, roi, data.addressing, reply, MetaInfo::unsolicited());
            }
        } else {
            cache.set(ro, data.clone());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_inputs_mappings_and_scenes() {
        let proc = NoProtocolProcessor::new(ProtocolId(1), Role::A, AnimationMode::None, None);
        let ro = RemoteObject::new(Roi::MatrixInput_Name, Addr::channel(64));
        assert_eq!(proc.cache_get(&ro).as_string(), Some("Input 64".to_string()));
        let scene_ro = RemoteObject::new(Roi::Scene_Name, Addr::channel(10));
        assert_eq!(proc.cache_get(&scene_ro).as_string(), Some("Scene 10".to_string()));
    }

    #[test]
    fn circular_animation_moves_position_over_ticks() {
        let proc = NoProtocolProcessor::new(ProtocolId(2), Role::A, AnimationMode::Circular, None);
        let ro = RemoteObject::new(Roi::CoordinateMapping_SourcePosition_XYZ, Addr::channel_record(1, 1));
        let before = proc.cache_get(&ro);
        proc.tick_animation();
        let after = proc.cache_get(&ro);
        assert_ne!(before.as_floats(), after.as_floats());
    }

    #[test]
    fn empty_payload_request_replies_from_cache() {
        let mut proc = NoProtocolProcessor::new(ProtocolId(3), Role::A, AnimationMode::None, None);
        let query = Data::empty(Addr::channel(1));
        assert!(proc.send_remote_object_message(Roi::MatrixInput_Gain, &query, None));
    }

    struct RecordingListener {
        seen: Mutex<Vec<Roi>>,
    }
    impl ProcessorListener for RecordingListener {
        fn on_protocol_message_received(
            &self,
            _source: ProtocolId,
            roi: Roi,
            _addressing: Addr,
            _data: Data,
            _meta: MetaInfo,
        ) {
            self.seen.lock().unwrap().push(roi);
        }
    }

    #[test]
    fn active_object_timer_polls_the_cache_on_start() {
        let listener = Arc::new(RecordingListener { seen: Mutex::new(vec![]) });
        let mut proc = NoProtocolProcessor::new(ProtocolId(4), Role::A, AnimationMode::None, Some(listener.clone()));
        proc.common.uses_active_objects = true;
        proc.common.polling_interval_ms = 10;
        proc.common.add_active_object(RemoteObject::new(Roi::MatrixInput_Gain, Addr::channel(1)));
        proc.start();
        std::thread::sleep(std::time::Duration::from_millis(45));
        proc.stop();
        assert!(listener.seen.lock().unwrap().iter().any(|r| *r == Roi::MatrixInput_Gain));
    }
}
