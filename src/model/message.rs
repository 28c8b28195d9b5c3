//! `RemoteObjectMessageData`, `RemoteObjectMessageMetaInfo` and
//! `RemoteObject` (spec.md §3).
//!
//! Payload ownership (spec.md §9 "Payload ownership") is expressed with
//! Rust's own move/borrow distinction instead of a `payloadOwned` flag:
//! `RemoteObjectMessageData` always owns its buffer (the `payloadCopy`
//! operation from the source spec is just `Clone`/`to_owned`), while
//! `RemoteObjectMessageDataRef` is a zero-copy borrowed view an encoder can
//! build over an existing buffer without allocating, and which must be
//! turned into an owned `RemoteObjectMessageData` before crossing a queue
//! boundary (spec.md §3 Lifecycle, "when queued across threads it is
//! payloadCopy-ed").

use super::addressing::RemoteObjectAddressing;
use super::roi::RemoteObjectIdentifier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    None,
    Int,
    Float,
    String,
}

impl ValueType {
    fn element_size(self) -> Option<usize> {
        match self {
            ValueType::None => Some(0),
            ValueType::Int => Some(std::mem::size_of::<i32>()),
            ValueType::Float => Some(std::mem::size_of::<f32>()),
            ValueType::String => None,
        }
    }
}

/// An owned, typed message payload. Invariant (spec.md §3):
/// `payload.len() == value_count * sizeof(value_type)` for numeric types;
/// for `String`, `value_count` is the byte length of `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObjectMessageData {
    pub addressing: RemoteObjectAddressing,
    pub value_type: ValueType,
    pub value_count: u32,
    pub payload: Vec<u8>,
}

impl RemoteObjectMessageData {
    pub fn empty(addressing: RemoteObjectAddressing) -> Self {
        RemoteObjectMessageData {
            addressing,
            value_type: ValueType::None,
            value_count: 0,
            payload: Vec::new(),
        }
    }

    pub fn from_int(addressing: RemoteObjectAddressing, value: i32) -> Self {
        RemoteObjectMessageData {
            addressing,
            value_type: ValueType::Int,
            value_count: 1,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_float(addressing: RemoteObjectAddressing, value: f32) -> Self {
        Self::from_floats(addressing, &[value])
    }

    pub fn from_floats(addressing: RemoteObjectAddressing, values: &[f32]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        RemoteObjectMessageData {
            addressing,
            value_type: ValueType::Float,
            value_count: values.len() as u32,
            payload,
        }
    }

    pub fn from_string(addressing: RemoteObjectAddressing, value: &str) -> Self {
        RemoteObjectMessageData {
            addressing,
            value_type: ValueType::String,
            value_count: value.len() as u32,
            payload: value.as_bytes().to_vec(),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        if self.value_type != ValueType::Int || self.payload.len() < 4 {
            return None;
        }
        Some(i32::from_le_bytes(self.payload[0..4].try_into().ok()?))
    }

    pub fn as_floats(&self) -> Option<Vec<f32>> {
        if self.value_type != ValueType::Float {
            return None;
        }
        Some(
            self.payload
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        )
    }

    pub fn as_float(&self) -> Option<f32> {
        self.as_floats().and_then(|v| v.first().copied())
    }

    pub fn as_string(&self) -> Option<String> {
        if self.value_type != ValueType::String {
            return None;
        }
        String::from_utf8(self.payload.clone()).ok()
    }

    /// Reallocates iff `new.payload.len()` differs from the current buffer
    /// length, otherwise copies in place, preserving the allocation
    /// (spec.md §3 Lifecycle, `ValueCache::set`).
    pub fn assign_reusing_buffer(&mut self, new: RemoteObjectMessageData) {
        self.addressing = new.addressing;
        self.value_type = new.value_type;
        self.value_count = new.value_count;
        if self.payload.len() == new.payload.len() {
            self.payload.copy_from_slice(&new.payload);
        } else {
            self.payload = new.payload;
        }
    }

    /// Asserts the §3 size invariant; used by decoders before handing data
    /// to a handler.
    pub fn is_well_formed(&self) -> bool {
        match self.value_type.element_size() {
            Some(sz) => self.payload.len() == sz * self.value_count as usize,
            None => self.payload.len() == self.value_count as usize,
        }
    }
}

/// A borrowed, zero-copy view over a payload an encoder already holds.
/// Call `.to_owned_data()` (the `payloadCopy` operation) before the data
/// must outlive the borrow, e.g. before enqueuing across a thread boundary.
#[derive(Debug, Clone, Copy)]
pub struct RemoteObjectMessageDataRef<'a> {
    pub addressing: RemoteObjectAddressing,
    pub value_type: ValueType,
    pub value_count: u32,
    pub payload: &'a [u8],
}

impl<'a> RemoteObjectMessageDataRef<'a> {
    pub fn to_owned_data(&self) -> RemoteObjectMessageData {
        RemoteObjectMessageData {
            addressing: self.addressing,
            value_type: self.value_type,
            value_count: self.value_count,
            payload: self.payload.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    None,
    Unsolicited,
    SetAcknowledgement,
}

/// Carries the originating protocol id through a round trip so
/// set-acknowledgements are not reflected back to the originator
/// (spec.md §3, §4.3 "Common forwarding invariants").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectMessageMetaInfo {
    pub category: MessageCategory,
    pub external_id: Option<crate::ids::ProtocolId>,
}

impl RemoteObjectMessageMetaInfo {
    pub const NONE: RemoteObjectMessageMetaInfo = RemoteObjectMessageMetaInfo {
        category: MessageCategory::None,
        external_id: None,
    };

    pub fn unsolicited() -> Self {
        RemoteObjectMessageMetaInfo {
            category: MessageCategory::Unsolicited,
            external_id: None,
        }
    }

    pub fn set_acknowledgement(external_id: crate::ids::ProtocolId) -> Self {
        RemoteObjectMessageMetaInfo {
            category: MessageCategory::SetAcknowledgement,
            external_id: Some(external_id),
        }
    }

    /// P5: a `SetAcknowledgement` whose `externalId == target` must not be
    /// re-sent to that protocol (loop prevention, spec.md §4.3, §8).
    pub fn would_loop_back_to(&self, target: crate::ids::ProtocolId) -> bool {
        self.category == MessageCategory::SetAcknowledgement && self.external_id == Some(target)
    }
}

/// `(ROI, Addressing)`, total-ordered lexicographically and used as the
/// Value Cache's map key (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteObject {
    pub roi: RemoteObjectIdentifier,
    pub addressing: RemoteObjectAddressing,
}

impl RemoteObject {
    pub fn new(roi: RemoteObjectIdentifier, addressing: RemoteObjectAddressing) -> Self {
        RemoteObject { roi, addressing }
    }
}

impl std::fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{}", self.roi, self.addressing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::addressing::RemoteObjectAddressing as Addr;
    use crate::model::roi::RemoteObjectIdentifier as Roi;

    #[test]
    fn float_round_trips_through_bytes() {
        let d = RemoteObjectMessageData::from_floats(Addr::NONE, &[1.0, 2.5, -3.0]);
        assert!(d.is_well_formed());
        assert_eq!(d.as_floats().unwrap(), vec![1.0, 2.5, -3.0]);
    }

    #[test]
    fn reassign_reuses_buffer_when_size_matches() {
        let mut d = RemoteObjectMessageData::from_int(Addr::NONE, 1);
        let ptr_before = d.payload.as_ptr();
        d.assign_reusing_buffer(RemoteObjectMessageData::from_int(Addr::NONE, 2));
        assert_eq!(d.payload.as_ptr(), ptr_before);
        assert_eq!(d.as_int(), Some(2));
    }

    #[test]
    fn reassign_reallocates_when_size_differs() {
        let mut d = RemoteObjectMessageData::from_int(Addr::NONE, 1);
        d.assign_reusing_buffer(RemoteObjectMessageData::from_floats(Addr::NONE, &[1.0, 2.0]));
        assert_eq!(d.as_floats().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn set_acknowledgement_loop_detection() {
        let pid = crate::ids::ProtocolId(7);
        let meta = RemoteObjectMessageMetaInfo::set_acknowledgement(pid);
        assert!(meta.would_loop_back_to(pid));
        assert!(!meta.would_loop_back_to(crate::ids::ProtocolId(8)));
    }

    #[test]
    fn remote_object_total_order_is_lexicographic() {
        let a = RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(1));
        let b = RemoteObject::new(Roi::MatrixInput_Mute, Addr::channel(2));
        assert!(a < b);
    }
}
