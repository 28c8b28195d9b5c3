//! `Engine` (spec.md §4.5): owns every configured `Node`, starts/stops them
//! as a unit, and fans node worker-thread log events out to an embedding
//! application. Grounded on `core/src/init.rs`'s `start_scheduler_and_world`,
//! which owns and starts the teacher's long-lived worker components the
//! same way this owns and starts Nodes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ids::NodeId;
use crate::logger::{EngineLogMessage, Logger};
use crate::node::Node;

pub struct Engine {
    nodes: HashMap<NodeId, Arc<Node>>,
    running: bool,
}

impl Engine {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Engine {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            running: false,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Switches the process-wide logger into `Embedded` mode so every Node's
    /// worker-thread log events reach the returned receiver (spec.md §4.5
    /// "Fan-out of node logging callbacks to a configured log target").
    pub fn enable_log_fan_out(&self) -> crossbeam_channel::Receiver<EngineLogMessage> {
        Logger::set_embedded_mode()
    }

    /// Starts every node (spec.md §4.4 "idempotent"). Returns `false` if any
    /// node failed to start; nodes already started are left running.
    pub fn start(&mut self) -> bool {
        let mut all_ok = true;
        for node in self.nodes.values() {
            if !node.start() {
                crate::log_error!(Some(node.id), "failed to start");
                all_ok = false;
            }
        }
        self.running = true;
        all_ok
    }

    /// Stops every node and joins their worker threads (spec.md §4.5).
    pub fn stop(&mut self) {
        for node in self.nodes.values() {
            node.stop();
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Drives every node's handler reaction-timeout sweep (spec.md §4.3); an
    /// embedding application calls this from its own periodic timer, the way
    /// `core/src/schedule.rs`'s tick drives per-tick teacher bookkeeping.
    pub fn sweep_handler_timeouts(&self) {
        for node in self.nodes.values() {
            node.sweep_handler_timeouts();
        }
    }
}
