//! Construction options.

use crate::error::{CedarError, Result};

/// How the double array grows when every allocated block is in use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Growth {
    /// Double the capacity.
    #[default]
    Doubling,
    /// Add this many 256-slot blocks, never more than the current capacity.
    Linear { blocks: u32 },
}

impl Growth {
    /// Largest linear step that still fits in the image flags word.
    pub const MAX_LINEAR_BLOCKS: u32 = (i32::MAX >> 1) as u32;

    /// Slots to add to a double array holding `capacity` slots.
    pub(crate) fn step(self, capacity: usize) -> usize {
        match self {
            Growth::Doubling => capacity,
            Growth::Linear { blocks } => (blocks as usize * 256).min(capacity),
        }
    }
}

/// Tuning knobs for a trie.
///
/// ```
/// use cedar_rs::{Cedar, Growth, Options};
///
/// let opts = Options::default().ordered(false).max_trial(4).growth(Growth::Linear { blocks: 8 });
/// let trie: Cedar = Cedar::with_options(opts).unwrap();
/// assert!(!trie.is_ordered());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Options {
    /// Keep sibling chains sorted by label so enumeration is lexicographic.
    pub ordered: bool,
    /// Failed placements after which a block stops being searched.
    pub max_trial: i32,
    pub growth: Growth,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ordered: true,
            max_trial: 1,
            growth: Growth::Doubling,
        }
    }
}

impl Options {
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn max_trial(mut self, max_trial: i32) -> Self {
        self.max_trial = max_trial;
        self
    }

    pub fn growth(mut self, growth: Growth) -> Self {
        self.growth = growth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_trial < 1 {
            return Err(CedarError::InvalidOptions("max_trial must be at least 1"));
        }
        if let Growth::Linear { blocks } = self.growth {
            if blocks == 0 {
                return Err(CedarError::InvalidOptions("linear growth needs at least one block"));
            }
            if blocks > Growth::MAX_LINEAR_BLOCKS {
                return Err(CedarError::InvalidOptions("linear growth step too large"));
            }
        }
        Ok(())
    }

    /// Packs `ordered` (bit 0) and the linear step (bits 1..) into the
    /// image flags word. A zero step means doubling.
    pub(crate) fn flags(&self) -> i32 {
        let step = match self.growth {
            Growth::Doubling => 0,
            Growth::Linear { blocks } => blocks as i32,
        };
        (step << 1) | self.ordered as i32
    }

    pub(crate) fn from_flags(flags: i32, max_trial: i32) -> Result<Self> {
        if flags < 0 {
            return Err(CedarError::Corrupt("negative flags word"));
        }
        let step = (flags >> 1) as u32;
        let opts = Self {
            ordered: flags & 1 != 0,
            max_trial,
            growth: if step == 0 {
                Growth::Doubling
            } else {
                Growth::Linear { blocks: step }
            },
        };
        opts.validate()
            .map_err(|_| CedarError::Corrupt("header options out of range"))?;
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert!(opts.ordered);
        assert_eq!(opts.max_trial, 1);
        assert_eq!(opts.growth, Growth::Doubling);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            Options::default().max_trial(0).validate(),
            Err(CedarError::InvalidOptions(_))
        ));
        assert!(matches!(
            Options::default().growth(Growth::Linear { blocks: 0 }).validate(),
            Err(CedarError::InvalidOptions(_))
        ));
        assert!(matches!(
            Options::default()
                .growth(Growth::Linear { blocks: Growth::MAX_LINEAR_BLOCKS + 1 })
                .validate(),
            Err(CedarError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_flags_round_trip() {
        for opts in [
            Options::default(),
            Options::default().ordered(false),
            Options::default().growth(Growth::Linear { blocks: 3 }).max_trial(5),
            Options::default()
                .ordered(false)
                .growth(Growth::Linear { blocks: Growth::MAX_LINEAR_BLOCKS }),
        ] {
            assert_eq!(Options::from_flags(opts.flags(), opts.max_trial).unwrap(), opts);
        }
        assert!(Options::from_flags(-1, 1).is_err());
        assert!(Options::from_flags(0, 0).is_err());
    }

    #[test]
    fn test_growth_step() {
        assert_eq!(Growth::Doubling.step(512), 512);
        assert_eq!(Growth::Linear { blocks: 1 }.step(512), 256);
        assert_eq!(Growth::Linear { blocks: 8 }.step(512), 512);
    }
}
