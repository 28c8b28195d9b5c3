//! RemoteProtocolBridgeCore: a library for bridging heterogeneous
//! remote-control protocols (d&b DS100 OSC, OCA/OCP.1, MIDI, RTTrPM, and a
//! no-protocol simulator) through a uniform object-data model.
//!
//! Grounded on `sova-org-Sova/core` (see `DESIGN.md`): `model` plays the role
//! of the teacher's `protocol/payload.rs` envelope, `processor` generalizes
//! `protocol/device.rs`'s `ProtocolDevice` contract into a closed enum over
//! the wire protocols this spec covers, `handler` is this crate's own
//! addition (the teacher has no object-routing layer), and `node`/`engine`
//! generalize the worker-thread shape of `schedule.rs`/`world.rs` and the
//! wiring pattern of `init.rs`.
//!
//! The crate is a library only (spec.md §1); no binary, no CLI, no XML
//! configuration parsing. An embedding application parses its own
//! configuration format into a `serde_json::Value` tree and hands it to
//! [`config::ingest`] to build a running [`engine::Engine`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod ids;
pub mod logger;
pub mod model;
pub mod node;
pub mod processor;
pub mod timer;

pub use config::{ingest, ConfigNode};
pub use engine::Engine;
pub use error::{ConfigError, EngineError};
pub use ids::{NodeId, ProtocolId, Role};
pub use logger::{EngineLogMessage, Logger, Severity};
pub use node::Node;
pub use processor::{Processor, ProcessorListener};
