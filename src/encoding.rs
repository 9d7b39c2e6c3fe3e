//! Node encodings.
//!
//! Both encodings share the double array and every allocator algorithm; they
//! differ only in how a slot's `base` field is read.
//!
//! * [`Standard`]: `base` is the child offset as-is. A key's value lives in
//!   the `base` of its label-0 child (the terminal).
//! * [`Reduced`]: the child offset is stored as `-base - 1`. A non-negative
//!   `base` is the value itself, held by a leaf with no children, so keys
//!   without extensions need no terminal slot.

use crate::error::{CedarError, Result};

/// Reserved reduced-encoding value marking a leaf whose value is not yet set.
/// Stored values must stay below it.
pub const VALUE_LIMIT: i32 = i32::MAX - 1;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Standard {}
    impl Sealed for super::Reduced {}
}

/// Node encoding of a [`Cedar`](crate::Cedar) trie. Sealed.
pub trait Encoding: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    const NAME: &'static str;
    const REDUCED: bool;
    /// Raw `base` of the root in a fresh trie.
    const ROOT_BASE: i32;

    /// Child offset of a slot holding `raw`. Negative means no children.
    fn child_base(raw: i32) -> i32;

    /// Raw form of child offset `base`.
    fn encode_base(base: i32) -> i32;

    /// Whether `raw` is a value stored directly in a leaf.
    fn is_value_leaf(raw: i32) -> bool;

    /// Raw `base` of a freshly claimed slot reached through `label`.
    fn fresh(label: u8) -> i32;

    fn check_value(value: i32) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Standard;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Reduced;

impl Encoding for Standard {
    const NAME: &'static str = "standard";
    const REDUCED: bool = false;
    const ROOT_BASE: i32 = 0;

    #[inline]
    fn child_base(raw: i32) -> i32 {
        raw
    }

    #[inline]
    fn encode_base(base: i32) -> i32 {
        base
    }

    #[inline]
    fn is_value_leaf(_: i32) -> bool {
        false
    }

    #[inline]
    fn fresh(label: u8) -> i32 {
        if label == 0 {
            0
        } else {
            -1
        }
    }

    fn check_value(_: i32) -> Result<()> {
        Ok(())
    }
}

impl Encoding for Reduced {
    const NAME: &'static str = "reduced";
    const REDUCED: bool = true;
    const ROOT_BASE: i32 = -1;

    #[inline]
    fn child_base(raw: i32) -> i32 {
        -(raw + 1)
    }

    #[inline]
    fn encode_base(base: i32) -> i32 {
        -base - 1
    }

    #[inline]
    fn is_value_leaf(raw: i32) -> bool {
        raw >= 0
    }

    #[inline]
    fn fresh(_: u8) -> i32 {
        VALUE_LIMIT
    }

    fn check_value(value: i32) -> Result<()> {
        if (0..VALUE_LIMIT).contains(&value) {
            Ok(())
        } else {
            Err(CedarError::ValueOutOfRange(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduced_base_round_trip() {
        for base in [0, 1, 255, 256, 1 << 20, i32::MAX - 1] {
            let raw = Reduced::encode_base(base);
            assert!(raw < 0);
            assert!(!Reduced::is_value_leaf(raw));
            assert_eq!(Reduced::child_base(raw), base);
        }
        assert_eq!(Reduced::child_base(Reduced::ROOT_BASE), 0);
        assert!(Reduced::child_base(7) < 0);
        assert!(Reduced::child_base(VALUE_LIMIT) < 0);
    }

    #[test]
    fn test_value_ranges() {
        assert!(Standard::check_value(-5).is_ok());
        assert!(Standard::check_value(i32::MAX).is_ok());
        assert!(Reduced::check_value(0).is_ok());
        assert!(Reduced::check_value(VALUE_LIMIT - 1).is_ok());
        assert!(matches!(Reduced::check_value(-1), Err(CedarError::ValueOutOfRange(-1))));
        assert!(Reduced::check_value(VALUE_LIMIT).is_err());
    }

    #[test]
    fn test_fresh_slots() {
        assert_eq!(Standard::fresh(0), 0);
        assert_eq!(Standard::fresh(b'a'), -1);
        assert_eq!(Reduced::fresh(b'a'), VALUE_LIMIT);
    }
}
