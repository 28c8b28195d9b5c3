//! `RemoteObjectAddressing` — the `(channel, record)` pair that disambiguates
//! which instance of an ROI is meant (spec.md §3).

use serde::{Deserialize, Serialize};

/// Marks "not applicable" for either half of an addressing pair.
pub const INVALID_ADDRESS_VALUE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteObjectAddressing {
    /// 1-based channel/source index, or `INVALID_ADDRESS_VALUE`.
    pub first: i32,
    /// 1-based record/mapping-area index, or `INVALID_ADDRESS_VALUE`.
    pub second: i32,
}

impl RemoteObjectAddressing {
    pub const NONE: RemoteObjectAddressing = RemoteObjectAddressing {
        first: INVALID_ADDRESS_VALUE,
        second: INVALID_ADDRESS_VALUE,
    };

    pub fn channel(first: i32) -> Self {
        RemoteObjectAddressing {
            first,
            second: INVALID_ADDRESS_VALUE,
        }
    }

    pub fn channel_record(first: i32, second: i32) -> Self {
        RemoteObjectAddressing { first, second }
    }

    pub fn has_channel(&self) -> bool {
        self.first != INVALID_ADDRESS_VALUE
    }

    pub fn has_record(&self) -> bool {
        self.second != INVALID_ADDRESS_VALUE
    }
}

impl std::fmt::Display for RemoteObjectAddressing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_addressing_has_neither_channel_nor_record() {
        assert!(!RemoteObjectAddressing::NONE.has_channel());
        assert!(!RemoteObjectAddressing::NONE.has_record());
    }

    #[test]
    fn channel_only_addressing() {
        let a = RemoteObjectAddressing::channel(3);
        assert!(a.has_channel());
        assert!(!a.has_record());
    }
}
