//! The remote-object data model (spec.md §3): identifiers, addressing,
//! message payloads and the engineering-unit value-range table.

pub mod addressing;
pub mod message;
pub mod roi;
pub mod value_range;

pub use addressing::{RemoteObjectAddressing, INVALID_ADDRESS_VALUE};
pub use message::{
    MessageCategory, RemoteObject, RemoteObjectMessageData, RemoteObjectMessageDataRef,
    RemoteObjectMessageMetaInfo, ValueType,
};
pub use roi::{PositionFamily, PositionVariant, RemoteObjectIdentifier};
pub use value_range::{remap, value_range_for, ValueRange};
