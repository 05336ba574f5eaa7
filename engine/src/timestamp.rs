//! Three-state timestamps.
//!
//! On the wire a timestamp is a plain millisecond count where `0` is the
//! priority flag. Inside the engine the three meanings are kept apart so that
//! "never set" can never be mistaken for "apply unconditionally".

use crate::{error::Result, Error, Millis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire encoding of [`Timestamp::Priority`].
pub const PRIORITY_WIRE: Millis = 0;

/// When a value was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ms", rename_all = "camelCase")]
pub enum Timestamp {
    /// No write has been observed for this slot.
    #[default]
    Unset,
    /// Apply unconditionally, ignoring ordering.
    Priority,
    /// Milliseconds since the Unix epoch.
    At(Millis),
}

impl Timestamp {
    /// Decode a wire `lastModified` value.
    pub fn from_wire(ms: Millis) -> Self {
        if ms == PRIORITY_WIRE {
            Timestamp::Priority
        } else {
            Timestamp::At(ms)
        }
    }

    /// Encode for the wire.
    ///
    /// `Unset` has no wire form and surfaces as [`Error::ClockUnsynced`]: a
    /// caller must never let it degrade into a `0` that peers would read as
    /// the priority flag. A genuine epoch-zero `At(0)` is rejected for the
    /// same reason.
    pub fn to_wire(self) -> Result<Millis> {
        match self {
            Timestamp::Unset => Err(Error::ClockUnsynced),
            Timestamp::Priority => Ok(PRIORITY_WIRE),
            Timestamp::At(PRIORITY_WIRE) => Err(Error::InvalidPayload(
                "epoch-zero timestamp collides with the priority flag".into(),
            )),
            Timestamp::At(ms) => Ok(ms),
        }
    }

    pub fn is_priority(self) -> bool {
        matches!(self, Timestamp::Priority)
    }

    pub fn is_set(self) -> bool {
        !matches!(self, Timestamp::Unset)
    }

    /// The millisecond value, if this is a concrete point in time.
    pub fn millis(self) -> Option<Millis> {
        match self {
            Timestamp::At(ms) => Some(ms),
            _ => None,
        }
    }

    /// Key used by last-write-wins ordering. `Unset` sorts below every
    /// concrete time; priority is resolved before this is consulted.
    pub(crate) fn lww_key(self) -> Option<Millis> {
        self.millis()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Unset => write!(f, "unset"),
            Timestamp::Priority => write!(f, "priority"),
            Timestamp::At(ms) => write!(f, "{}", ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_zero_is_priority() {
        assert_eq!(Timestamp::from_wire(0), Timestamp::Priority);
        assert_eq!(Timestamp::from_wire(1737123456789), Timestamp::At(1737123456789));
    }

    #[test]
    fn unset_never_encodes() {
        assert_eq!(Timestamp::Unset.to_wire(), Err(Error::ClockUnsynced));
        assert_eq!(Timestamp::Priority.to_wire(), Ok(0));
        assert_eq!(Timestamp::At(42).to_wire(), Ok(42));
        assert!(matches!(
            Timestamp::At(0).to_wire(),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn lww_key_orders_unset_first() {
        assert!(Timestamp::Unset.lww_key() < Timestamp::At(1).lww_key());
        assert!(Timestamp::At(1).lww_key() < Timestamp::At(2).lww_key());
    }

    #[test]
    fn serialization_format() {
        let json = serde_json::to_string(&Timestamp::At(5)).unwrap();
        assert_eq!(json, r#"{"kind":"at","ms":5}"#);
        let json = serde_json::to_string(&Timestamp::Priority).unwrap();
        assert_eq!(json, r#"{"kind":"priority"}"#);
        let parsed: Timestamp = serde_json::from_str(r#"{"kind":"unset"}"#).unwrap();
        assert_eq!(parsed, Timestamp::Unset);
    }
}
