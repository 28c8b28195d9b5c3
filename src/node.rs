//! `Node` (spec.md §4.4): owns its role-A and role-B processors and one
//! handler, runs the worker-thread dispatch loop, and queues inter-processor
//! messages. Grounded on `core/src/schedule.rs`'s worker-loop shape
//! (`ThreadBuilder` + `crossbeam_channel::recv_timeout`) — the same pattern
//! `timer::TimerThread` generalizes, applied here to a message queue instead
//! of a periodic tick.
//!
//! Parent back-references are avoided per spec.md §9 "Cyclic parent
//! pointers": the worker thread holds an `Arc<Node>` (its own strong
//! reference, not a pointer *back* from a child), and handlers receive a
//! `&mut dyn HandlerSink` borrowing the `Node` only for the duration of one
//! dispatch call rather than storing a reference to it.
//!
//! The "asynchronously post a callback message to registered node-listeners
//! for logging" step (spec.md §4.4) is the `logger` module's existing
//! `Embedded` channel fan-out (spec.md §4.5) rather than a second listener
//! registry: `dispatch` logs through `log_debug!` tagged with this node's id,
//! which the `Logger` already routes to whichever mode `Engine` configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thread_priority::{ThreadBuilder, ThreadPriority};

use crate::handler::{Handler, HandlerSink};
use crate::ids::{NodeId, ProtocolId, Role};
use crate::model::{
    RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi, RemoteObjectMessageData as Data,
    RemoteObjectMessageMetaInfo as MetaInfo,
};
use crate::processor::{Processor, ProcessorListener, ProtocolProcessor};

/// One entry on the inbound queue: a deep-copied, payload-owning snapshot of
/// a decoded message plus which processor/role it arrived from (spec.md
/// §4.4 "entries are deep-copies of `(nodeId, senderProtocolId,
/// senderType, roi, data, meta)`").
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub node_id: NodeId,
    pub sender_protocol_id: ProtocolId,
    pub sender_role: Role,
    pub roi: Roi,
    pub addressing: Addr,
    pub data: Data,
    pub meta: MetaInfo,
}

/// Wraps the Node's inbound `Sender` as a `ProcessorListener`: every
/// processor is constructed with one of these (cloned per processor) so a
/// foreign transport thread never touches the handler or Value Caches
/// directly (spec.md §9 "Listener callbacks crossing threads").
pub struct QueueListener {
    node_id: NodeId,
    role: Role,
    tx: Sender<InboundMessage>,
}

impl QueueListener {
    pub fn new(node_id: NodeId, role: Role, tx: Sender<InboundMessage>) -> Self {
        QueueListener { node_id, role, tx }
    }
}

impl ProcessorListener for QueueListener {
    fn on_protocol_message_received(&self, source: ProtocolId, roi: Roi, addressing: Addr, data: Data, meta: MetaInfo) {
        let _ = self.tx.send(InboundMessage {
            node_id: self.node_id,
            sender_protocol_id: source,
            sender_role: self.role,
            roi,
            addressing,
            data,
            meta,
        });
    }
}

/// Borrows `Node` for the lifetime of one handler dispatch call (spec.md §9
/// "Cyclic parent pointers" — an id-lookup handle rather than a stored
/// parent pointer).
struct NodeSink<'a> {
    node: &'a Node,
}

impl<'a> HandlerSink for NodeSink<'a> {
    fn send_message_to(&mut self, protocol_id: ProtocolId, roi: Roi, data: &Data, external_id: Option<ProtocolId>) -> bool {
        self.node.send_message_to(protocol_id, roi, data, external_id)
    }
}

pub struct Node {
    pub id: NodeId,
    processors_a: Mutex<HashMap<ProtocolId, Processor>>,
    processors_b: Mutex<HashMap<ProtocolId, Processor>>,
    handler: Mutex<Handler>,
    inbound_tx: Sender<InboundMessage>,
    inbound_rx: Receiver<InboundMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl Node {
    pub fn new(id: NodeId, handler: Handler) -> Arc<Node> {
        // spec.md §4.4/§5: "grows by 1024 on overflow" describes an
        // unbounded queue in effect; `unbounded()` gives that behavior with
        // the teacher's own channel primitive (DESIGN.md Open Question #2).
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(Node {
            id,
            processors_a: Mutex::new(HashMap::new()),
            processors_b: Mutex::new(HashMap::new()),
            handler: Mutex::new(handler),
            inbound_tx: tx,
            inbound_rx: rx,
            worker: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The sender side of the inbound queue; used to build each processor's
    /// `QueueListener` at configuration time.
    pub fn queue_sender(&self) -> Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    pub fn add_processor(&self, role: Role, processor: Processor) {
        let map = match role {
            Role::A => &self.processors_a,
            Role::B => &self.processors_b,
        };
        map.lock().expect("poisoned").insert(processor.id(), processor);
    }

    pub fn remove_processor(&self, role: Role, id: ProtocolId) -> Option<Processor> {
        let map = match role {
            Role::A => &self.processors_a,
            Role::B => &self.processors_b,
        };
        map.lock().expect("poisoned").remove(&id)
    }

    pub fn protocol_ids(&self, role: Role) -> Vec<ProtocolId> {
        let map = match role {
            Role::A => &self.processors_a,
            Role::B => &self.processors_b,
        };
        map.lock().expect("poisoned").keys().copied().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: calling `start` on an already-running Node is a no-op
    /// that still returns `true` (spec.md §4.2 "must be safe to call across
    /// config changes").
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return true;
        }
        for p in self.processors_a.lock().expect("poisoned").values_mut() {
            p.start();
        }
        for p in self.processors_b.lock().expect("poisoned").values_mut() {
            p.start();
        }

        let node = self.clone();
        let rx = self.inbound_rx.clone();
        let running = self.running.clone();
        let handle = ThreadBuilder::default()
            .name(format!("node-{}", self.id.0))
            .priority(ThreadPriority::Min)
            .spawn(move |_| {
                while running.load(Ordering::SeqCst) {
                    match rx.recv_timeout(Duration::from_millis(25)) {
                        Ok(msg) => node.dispatch(msg),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn node worker thread");
        *self.worker.lock().expect("poisoned") = Some(handle);
        true
    }

    /// Joins the worker thread within a bounded time (spec.md §5
    /// "Cancellation/timeout", ≤100 ms — the 25 ms recv timeout bounds the
    /// loop's reaction to the stop flag well under that).
    pub fn stop(self: &Arc<Self>) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return true;
        }
        if let Some(j) = self.worker.lock().expect("poisoned").take() {
            let _ = j.join();
        }
        for p in self.processors_a.lock().expect("poisoned").values_mut() {
            p.stop();
        }
        for p in self.processors_b.lock().expect("poisoned").values_mut() {
            p.stop();
        }
        true
    }

    /// Worker-thread body (spec.md §4.4): drops internal-only ROIs (except
    /// the `GetAllKnownValues` exception, per
    /// `RemoteObjectIdentifier::is_internal_only`), logs the event, then
    /// synchronously invokes the handler.
    fn dispatch(&self, msg: InboundMessage) {
        if msg.roi.is_internal_only() {
            return;
        }
        crate::log_debug!(
            Some(self.id),
            "{:?}{} from protocol {}",
            msg.roi,
            msg.addressing,
            msg.sender_protocol_id
        );
        let mut sink = NodeSink { node: self };
        self.handler.lock().expect("poisoned").on_received_message_from_protocol(
            &mut sink,
            msg.sender_protocol_id,
            msg.roi,
            msg.addressing,
            msg.data,
            msg.meta,
        );
    }

    /// `sendMessageTo` (spec.md §4.4): dispatches to the processor owned by
    /// this node in either role map; returns `false` if `protocol_id` is
    /// unknown to this Node.
    pub fn send_message_to(&self, protocol_id: ProtocolId, roi: Roi, data: &Data, external_id: Option<ProtocolId>) -> bool {
        if let Some(p) = self.processors_a.lock().expect("poisoned").get_mut(&protocol_id) {
            return p.send_remote_object_message(roi, data, external_id);
        }
        if let Some(p) = self.processors_b.lock().expect("poisoned").get_mut(&protocol_id) {
            return p.send_remote_object_message(roi, data, external_id);
        }
        false
    }

    /// Replaces the handler (spec.md §4.4 "the handler is replaced if its
    /// mode changes"). Running state and processor registries are
    /// untouched.
    pub fn replace_handler(&self, handler: Handler) {
        *self.handler.lock().expect("poisoned") = handler;
    }

    /// Periodic reaction-timeout sweep for the owned handler (spec.md §4.3);
    /// a caller (typically `Engine`) drives this from its own timer thread.
    pub fn sweep_handler_timeouts(&self) {
        self.handler.lock().expect("poisoned").sweep_reaction_timeouts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::bypass::{BypassDirection, BypassHandler};
    use crate::handler::HandlerCommon;
    use crate::model::RemoteObjectIdentifier as Roi;
    use crate::processor::noproto::{AnimationMode, NoProtocolProcessor};
    use std::time::Duration as StdDuration;

    fn bypass_handler(a: Vec<ProtocolId>, b: Vec<ProtocolId>) -> Handler {
        let common = HandlerCommon::new(a, b, StdDuration::from_millis(5100), None);
        Handler::Bypass(BypassHandler::new(common, BypassDirection::Both))
    }

    #[test]
    fn worker_loop_dispatches_queued_messages_through_the_handler() {
        let node = Node::new(NodeId(1), bypass_handler(vec![ProtocolId(1)], vec![ProtocolId(2)]));

        let tx = node.queue_sender();
        let a = NoProtocolProcessor::new(ProtocolId(1), Role::A, AnimationMode::None, None);
        let b = NoProtocolProcessor::new(ProtocolId(2), Role::B, AnimationMode::None, None);
        node.add_processor(Role::A, Processor::NoProtocol(a));
        node.add_processor(Role::B, Processor::NoProtocol(b));
        node.start();

        tx.send(InboundMessage {
            node_id: NodeId(1),
            sender_protocol_id: ProtocolId(1),
            sender_role: Role::A,
            roi: Roi::MatrixInput_Mute,
            addressing: Addr::channel(1),
            data: Data::from_int(Addr::channel(1), 1),
            meta: MetaInfo::unsolicited(),
        })
        .unwrap();

        std::thread::sleep(StdDuration::from_millis(80));
        // B's simulated cache should now hold the written-through value.
        if let Processor::NoProtocol(p) = node.processors_b.lock().unwrap().get(&ProtocolId(2)).unwrap() {
            let ro = crate::model::RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(1));
            assert_eq!(p.cache_get(&ro).as_int(), Some(1));
        } else {
            panic!("expected NoProtocol processor");
        }
        node.stop();
    }

    #[test]
    fn internal_only_roi_is_dropped_before_dispatch() {
        let node = Node::new(NodeId(2), bypass_handler(vec![ProtocolId(1)], vec![ProtocolId(2)]));
        node.start();
        let tx = node.queue_sender();
        tx.send(InboundMessage {
            node_id: NodeId(2),
            sender_protocol_id: ProtocolId(1),
            sender_role: Role::A,
            roi: Roi::BridgingMAX,
            addressing: Addr::NONE,
            data: Data::empty(Addr::NONE),
            meta: MetaInfo::unsolicited(),
        })
        .unwrap();
        std::thread::sleep(StdDuration::from_millis(50));
        // No panic / no processor to deliver to: dropped silently.
        node.stop();
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let node = Node::new(NodeId(3), bypass_handler(vec![ProtocolId(1)], vec![ProtocolId(2)]));
        assert!(node.start());
        assert!(node.start());
        assert!(node.stop());
        assert!(node.stop());
    }

    #[test]
    fn send_message_to_unknown_protocol_returns_false() {
        let node = Node::new(NodeId(4), bypass_handler(vec![ProtocolId(1)], vec![ProtocolId(2)]));
        assert!(!node.send_message_to(ProtocolId(99), Roi::MatrixInput_Mute, &Data::empty(Addr::NONE), None));
    }
}
