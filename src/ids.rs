//! Id types and the process-wide monotonic counters that produce them
//! (spec.md §3 "Ids", §9 "Global counter").

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_PROTOCOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a `Node` within an `Engine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Pushes an externally-observed id into the generator so that ids read
    /// back from a configuration tree never collide with freshly-generated
    /// ones (spec.md §9 "Global counter").
    pub fn observe(id: u32) {
        NEXT_NODE_ID.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node#{}", self.0)
    }
}

/// Identifies a `ProtocolProcessor` within a `Node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProtocolId(pub u64);

impl ProtocolId {
    pub fn next() -> Self {
        ProtocolId(NEXT_PROTOCOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn observe(id: u64) {
        NEXT_PROTOCOL_ID.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Protocol#{}", self.0)
    }
}

/// Which peer group within a Node a processor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Role {
    A,
    B,
}
