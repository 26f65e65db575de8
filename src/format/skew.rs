/// Sector interleave (skew) tables

use crate::error::{H8dError, Result};
use crate::format::constants::{H17_INTERLEAVE, SECTORS_PER_TRACK};

/// Logical to physical sector mapping for one track
///
/// `physical(n)` gives the physical slot holding logical sector `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkewTable {
    interleave: usize,
    physical_of: Vec<usize>,
}

impl SkewTable {
    /// Build a skew table for an interleave factor and track length
    ///
    /// Logical sectors are laid down one at a time: each goes into the current
    /// physical slot, after which the cursor advances by `interleave`. When the
    /// cursor lands on a slot that is already taken it steps forward one slot
    /// at a time until a free one is found. The cursor wraps modulo
    /// `sectors_per_track`.
    pub fn new(interleave: usize, sectors_per_track: usize) -> Result<Self> {
        if interleave == 0 || sectors_per_track == 0 {
            return Err(H8dError::invalid_format(format!(
                "skew needs interleave and sectors >= 1 (got {}, {})",
                interleave, sectors_per_track
            )));
        }

        let mut logical_at: Vec<Option<usize>> = vec![None; sectors_per_track];
        let mut slot = 0;
        let mut logical = 0;

        while logical < sectors_per_track {
            if logical_at[slot].is_none() {
                logical_at[slot] = Some(logical);
                logical += 1;
                slot += interleave;
            } else {
                slot += 1;
            }
            slot %= sectors_per_track;
        }

        let mut physical_of = vec![0; sectors_per_track];
        for (slot, logical) in logical_at.into_iter().enumerate() {
            if let Some(logical) = logical {
                physical_of[logical] = slot;
            }
        }

        Ok(Self {
            interleave,
            physical_of,
        })
    }

    /// The skew used by HDOS and CP/M on hard-sectored H17 disks
    pub fn h17() -> Self {
        Self::new(H17_INTERLEAVE, SECTORS_PER_TRACK).unwrap_or_else(|_| unreachable!())
    }

    /// Interleave factor
    pub fn interleave(&self) -> usize {
        self.interleave
    }

    /// Sectors per track covered by the table
    pub fn len(&self) -> usize {
        self.physical_of.len()
    }

    /// Always false, a table covers at least one sector
    pub fn is_empty(&self) -> bool {
        self.physical_of.is_empty()
    }

    /// Physical slot of a logical sector (wraps past the end of the track)
    pub fn physical(&self, logical: usize) -> usize {
        self.physical_of[logical % self.physical_of.len()]
    }

    /// The whole logical to physical mapping
    pub fn as_slice(&self) -> &[usize] {
        &self.physical_of
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_h17_skew() {
        let skew = SkewTable::new(4, 10).unwrap();
        assert_eq!(skew.as_slice(), &[0, 4, 8, 2, 6, 1, 5, 9, 3, 7]);
        assert_eq!(SkewTable::h17(), skew);
    }

    #[test]
    fn test_no_interleave() {
        let skew = SkewTable::new(1, 16).unwrap();
        assert_eq!(skew.as_slice(), (0..16).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_h37_skew() {
        let skew = SkewTable::new(3, 5).unwrap();
        assert_eq!(skew.as_slice(), &[0, 3, 1, 4, 2]);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SkewTable::new(0, 10).is_err());
        assert!(SkewTable::new(4, 0).is_err());
    }

    #[test]
    fn test_physical_wraps() {
        let skew = SkewTable::h17();
        assert_eq!(skew.physical(11), 4);
    }

    proptest! {
        #[test]
        fn prop_skew_is_permutation(interleave in 1usize..40, spt in 1usize..64) {
            let skew = SkewTable::new(interleave, spt).unwrap();
            let mut seen = skew.as_slice().to_vec();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..spt).collect::<Vec<_>>());
            prop_assert_eq!(skew.physical(0), 0);
        }
    }
}
