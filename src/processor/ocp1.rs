//! OCP.1 processor (spec.md §4.2.3): TCP (AES70 binary framing), client or
//! server mode. The pending-handle tables are guarded by a mutex because
//! responses arrive on a separate IPC/socket thread than the one invoking
//! `send_remote_object_message` (spec.md §5), the same handoff shape as the
//! teacher's `Mutex<BTreeMap<..>>` device registries (`core/src/device_map.rs`).

use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ProcessorCommon, ProcessorListener, ProtocolProcessor};
use crate::ids::{ProtocolId, Role};
use crate::model::{
    RemoteObject, RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi,
    RemoteObjectMessageData as Data, RemoteObjectMessageMetaInfo as MetaInfo,
};
use crate::timer::TimerThread;

/// Placeholder wire frame for the OCP.1 keep-alive (spec.md §4.2.3); real
/// AES70 framing is the out-of-scope collaborator's concern (spec.md §1),
/// same placeholder-byte-frame level of fidelity as the scene-action write
/// below.
const KEEPALIVE_FRAME: &[u8] = b"OCP1_KEEPALIVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ocp1ConnectionMode {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PendingKind {
    Subscription,
    Get,
    Set,
}

#[derive(Debug, Clone, Copy)]
struct PendingHandle {
    kind: PendingKind,
    ro: RemoteObject,
    /// For `Set`: the protocol id whose write this acknowledges, used to
    /// tag the forwarded ack with `SetAcknowledgement` (spec.md §4.2.3,
    /// §4.3 loop prevention).
    requester: Option<ProtocolId>,
}

/// Precomputed `(ROI, addressing) -> ONo` table. A real deployment derives
/// this from the device's object tree; here it's injected by configuration
/// (spec.md §4.2.3 "Object-to-ONo mapping").
pub type OnoTable = HashMap<RemoteObject, u32>;

/// State the active-object poll timer and keepalive timer need to touch
/// (spec.md §4.2, §4.2.3), held behind an `Arc` rather than a back-
/// reference to the owning `Ocp1Processor` (spec.md §9 "Cyclic parent
/// pointers") — the same pattern `noproto::NoProtocolShared` uses.
struct Ocp1Shared {
    id: ProtocolId,
    ono_table: OnoTable,
    next_handle: AtomicU32,
    pending: Mutex<HashMap<u32, PendingHandle>>,
    cache: Mutex<crate::cache::ValueCache>,
    listener: Option<Arc<dyn ProcessorListener>>,
}

impl Ocp1Shared {
    fn next_handle(&self) -> u32 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn notify(&self, roi: Roi, addressing: Addr, data: Data, meta: MetaInfo) {
        if let Some(l) = &self.listener {
            l.on_protocol_message_received(self.id, roi, addressing, data, meta);
        }
    }
}

pub struct Ocp1Processor {
    common: ProcessorCommon,
    mode: Ocp1ConnectionMode,
    address: String,
    shared: Arc<Ocp1Shared>,
    connected: Arc<AtomicBool>,
    stream: Option<TcpStream>,
    /// Drives the shared §4.2 active-object timer (re-query every active
    /// object at the configured interval).
    active_timer: Option<TimerThread>,
    /// Drives the §4.2.3 keep-alive frame emission.
    keepalive_timer: Option<TimerThread>,
}

/// ROIs that proxy through the triple-float XYZ object: incoming/outgoing
/// X, Y, XY requests are rewritten to the XYZ object and post-processed to
/// also emit the X/Y/XY variants to listeners (spec.md §4.2.3).
fn is_proxied_positioning(roi: Roi) -> bool {
    matches!(
        roi,
        Roi::CoordinateMapping_SourcePosition_X
            | Roi::CoordinateMapping_SourcePosition_Y
            | Roi::CoordinateMapping_SourcePosition_XY
            | Roi::SourcePosition_X
            | Roi::SourcePosition_Y
            | Roi::SourcePosition_XY
    )
}

impl Ocp1Processor {
    pub fn new(
        id: ProtocolId,
        role: Role,
        mode: Ocp1ConnectionMode,
        address: String,
        ono_table: OnoTable,
        uses_active_objects: bool,
        polling_interval_ms: u64,
        listener: Option<Arc<dyn ProcessorListener>>,
    ) -> Self {
        Ocp1Processor {
            common: ProcessorCommon::new(id, role, uses_active_objects, polling_interval_ms),
            mode,
            address,
            shared: Arc::new(Ocp1Shared {
                id,
                ono_table,
                next_handle: AtomicU32::new(1),
                pending: Mutex::new(HashMap::new()),
                cache: Mutex::new(crate::cache::ValueCache::new()),
                listener,
            }),
            connected: Arc::new(AtomicBool::new(false)),
            stream: None,
            active_timer: None,
            keepalive_timer: None,
        }
    }

    pub fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    /// On connect: subscribe all active ROIs, then query their initial
    /// values (spec.md §4.2.3, invariant P8).
    fn on_connected(&self) {
        for ro in self.common.active_objects() {
            let handle = self.shared.next_handle();
            self.shared.pending.lock().expect("poisoned").insert(
                handle,
                PendingHandle {
                    kind: PendingKind::Subscription,
                    ro,
                    requester: None,
                },
            );
        }
        for ro in self.common.active_objects() {
            let handle = self.shared.next_handle();
            self.shared.pending.lock().expect("poisoned").insert(
                handle,
                PendingHandle {
                    kind: PendingKind::Get,
                    ro,
                    requester: None,
                },
            );
        }
    }

    /// Flushes pending tables and clears the cache (spec.md §4.2.3 "On
    /// disconnect").
    fn on_disconnected(&self) {
        self.shared.pending.lock().expect("poisoned").clear();
        self.shared.cache.lock().expect("poisoned").clear();
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().expect("poisoned").len()
    }

    /// Processes an OK response for `handle`: pops the pending entry,
    /// updates the cache for Get responses, and for proxied positioning
    /// objects also emits the X/Y/XY variants (spec.md §4.2.3, §4.3
    /// "positioning ROIs" invariant).
    pub fn handle_ok_response(&self, handle: u32, data: Option<Data>) {
        let pending = self.shared.pending.lock().expect("poisoned").remove(&handle);
        let Some(pending) = pending else { return };
        match pending.kind {
            PendingKind::Subscription => {}
            PendingKind::Get => {
                if let Some(data) = data {
                    self.shared.cache.lock().expect("poisoned").set(pending.ro, data.clone());
                    self.shared.notify(pending.ro.roi, pending.ro.addressing, data, MetaInfo::unsolicited());
                    if is_proxied_positioning(pending.ro.roi) {
                        self.emit_position_variants(pending.ro);
                    }
                }
            }
            PendingKind::Set => {
                if let Some(requester) = pending.requester {
                    let meta = MetaInfo::set_acknowledgement(requester);
                    if let Some(data) = data {
                        self.shared.notify(pending.ro.roi, pending.ro.addressing, data, meta);
                    }
                }
            }
        }
    }

    /// Logs a non-zero status and cleans up only the offending handle,
    /// without tearing down the connection (spec.md §5 "Cancellation /
    /// timeout").
    pub fn handle_error_response(&self, handle: u32, status: u32) {
        crate::log_warn!(None, "OCP.1 handle {} returned non-zero status {}", handle, status);
        self.shared.pending.lock().expect("poisoned").remove(&handle);
    }

    fn emit_position_variants(&self, xyz_ro: RemoteObject) {
        let (x, y, _z) = self
            .shared
            .cache
            .lock()
            .expect("poisoned")
            .get_triple_float(&xyz_ro);
        self.shared.notify(
            Roi::CoordinateMapping_SourcePosition_X,
            xyz_ro.addressing,
            Data::from_float(xyz_ro.addressing, x),
            MetaInfo::unsolicited(),
        );
        self.shared.notify(
            Roi::CoordinateMapping_SourcePosition_Y,
            xyz_ro.addressing,
            Data::from_float(xyz_ro.addressing, y),
            MetaInfo::unsolicited(),
        );
        self.shared.notify(
            Roi::CoordinateMapping_SourcePosition_XY,
            xyz_ro.addressing,
            Data::from_floats(xyz_ro.addressing, &[x, y]),
            MetaInfo::unsolicited(),
        );
    }

    /// Scene_Recall/Next/Previous address the Scene-Agent's dedicated
    /// methods rather than a value set (spec.md §4.2.3).
    fn is_scene_action(roi: Roi) -> bool {
        matches!(roi, Roi::Scene_Recall | Roi::Scene_Next | Roi::Scene_Previous)
    }
}

impl ProtocolProcessor for Ocp1Processor {
    fn id(&self) -> ProtocolId {
        self.common.id
    }

    fn role(&self) -> Role {
        self.common.role
    }

    fn processor_type(&self) -> &'static str {
        "OCA"
    }

    fn start(&mut self) -> bool {
        let stream = match self.mode {
            Ocp1ConnectionMode::Client => TcpStream::connect(&self.address),
            Ocp1ConnectionMode::Server => TcpListener::bind(&self.address).and_then(|l| {
                let (s, _) = l.accept()?;
                Ok(s)
            }),
        };
        match stream {
            Ok(s) => {
                let _ = s.set_nodelay(true);
                self.stream = Some(s);
                self.connected.store(true, Ordering::SeqCst);
                self.on_connected();

                // Shared §4.2 active-object timer: re-query every active
                // object at the configured interval.
                if self.common.uses_active_objects && self.common.polling_interval_ms > 0 {
                    if let Ok(mut poll_stream) = self.stream.as_ref().expect("just set").try_clone() {
                        let shared = self.shared.clone();
                        let actives = self.common.active_objects();
                        let interval = Duration::from_millis(self.common.polling_interval_ms);
                        self.active_timer = Some(TimerThread::start(
                            &format!("ocp1-poll-{}", self.common.id),
                            interval,
                            interval,
                            move || {
                                for ro in &actives {
                                    let Some(&_ono) = shared.ono_table.get(ro) else { continue };
                                    let handle = shared.next_handle();
                                    shared.pending.lock().expect("poisoned").insert(
                                        handle,
                                        PendingHandle {
                                            kind: PendingKind::Get,
                                            ro: *ro,
                                            requester: None,
                                        },
                                    );
                                    let _ = poll_stream.write_all(&handle.to_be_bytes());
                                }
                            },
                        ));
                    }
                }

                // §4.2.3 heartbeat: one keep-alive frame per active-object
                // interval, independent of whether there are active objects.
                if self.common.polling_interval_ms > 0 {
                    if let Ok(mut keepalive_stream) = self.stream.as_ref().expect("just set").try_clone() {
                        let interval = Duration::from_millis(self.common.polling_interval_ms);
                        self.keepalive_timer = Some(TimerThread::start(
                            &format!("ocp1-keepalive-{}", self.common.id),
                            interval,
                            interval,
                            move || {
                                let _ = keepalive_stream.write_all(KEEPALIVE_FRAME);
                            },
                        ));
                    }
                }

                true
            }
            Err(e) => {
                crate::log_error!(None, "OCP.1 {:?} connect failed: {}", self.mode, e);
                false
            }
        }
    }

    fn stop(&mut self) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.active_timer = None;
        self.keepalive_timer = None;
        self.stream = None;
        self.on_disconnected();
        true
    }

    fn send_remote_object_message(
        &mut self,
        roi: Roi,
        data: &Data,
        external_id: Option<ProtocolId>,
    ) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        let ro = RemoteObject::new(roi, data.addressing);
        if self.common.is_muted(&ro) {
            return true;
        }
        if Self::is_scene_action(roi) {
            return self.stream.as_mut().map(|s| s.write_all(b"SCENE").is_ok()).unwrap_or(false);
        }
        let Some(&_ono) = self.shared.ono_table.get(&ro) else {
            return false;
        };
        let handle = self.shared.next_handle();
        let is_write = data.value_count > 0;
        self.shared.pending.lock().expect("poisoned").insert(
            handle,
            PendingHandle {
                kind: if is_write { PendingKind::Set } else { PendingKind::Get },
                ro,
                requester: external_id,
            },
        );
        match &mut self.stream {
            Some(s) => s.write_all(&handle.to_be_bytes()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(roi: Roi, addressing: Addr) -> OnoTable {
        let mut t = HashMap::new();
        t.insert(RemoteObject::new(roi, addressing), 1);
        t
    }

    #[test]
    fn p8_connect_issues_one_subscribe_then_one_get_per_active_object() {
        let processor = Ocp1Processor::new(
            ProtocolId(1),
            Role::A,
            Ocp1ConnectionMode::Client,
            "127.0.0.1:0".to_string(),
            table(Roi::MatrixInput_Mute, Addr::channel(1)),
            true,
            0,
            None,
        );
        processor.common.add_active_object(RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(1)));
        processor.on_connected();
        // 1 active object + heartbeat ping/pong => 3 actives, 2 phases (sub+get) each.
        assert_eq!(processor.pending_count(), 6);
    }

    #[test]
    fn p8_disconnect_clears_all_pending_handles() {
        let processor = Ocp1Processor::new(
            ProtocolId(1),
            Role::A,
            Ocp1ConnectionMode::Client,
            "127.0.0.1:0".to_string(),
            table(Roi::MatrixInput_Mute, Addr::channel(1)),
            true,
            0,
            None,
        );
        processor.common.add_active_object(RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(1)));
        processor.on_connected();
        processor.on_disconnected();
        assert_eq!(processor.pending_count(), 0);
    }

    #[test]
    fn ok_response_pops_the_pending_handle() {
        let processor = Ocp1Processor::new(
            ProtocolId(1),
            Role::A,
            Ocp1ConnectionMode::Client,
            "127.0.0.1:0".to_string(),
            table(Roi::MatrixInput_Mute, Addr::channel(1)),
            false,
            0,
            None,
        );
        processor.shared.pending.lock().unwrap().insert(
            42,
            PendingHandle {
                kind: PendingKind::Get,
                ro: RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(1)),
                requester: None,
            },
        );
        processor.handle_ok_response(42, Some(Data::from_int(Addr::channel(1), 1)));
        assert_eq!(processor.pending_count(), 0);
    }

    #[test]
    fn start_drives_active_object_polling_and_keepalive_over_the_socket() {
        use std::io::Read;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind harness");
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = std::thread::spawn(move || listener.accept().unwrap().0);

        let mut processor = Ocp1Processor::new(
            ProtocolId(1),
            Role::A,
            Ocp1ConnectionMode::Client,
            addr,
            table(Roi::MatrixInput_Mute, Addr::channel(1)),
            true,
            10,
            None,
        );
        processor.common.add_active_object(RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(1)));
        assert!(processor.start());

        let mut server_side = accepted.join().unwrap();
        server_side.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 4];
        server_side.read_exact(&mut buf).expect("poll or keepalive bytes arrive");
        processor.stop();
    }
}
