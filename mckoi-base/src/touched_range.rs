// A compressed summary of the keys one transaction touched (spec §4.3.2,
// §4.3.3): a bloom-like set of touched 128-bit key prefixes, for cheap
// disjointness checks against history, plus an exact set of *unique
// constraint* keys, the only kind of touch that can structurally conflict
// without a schema-level field summary. Grounded on `mckoi_base::Bitmap256`
// (kept from the teacher's `submerge-base::bitmap256`) used here as a
// 256-slot bloom filter instead of its original row-bitmap role.

use std::collections::BTreeSet;

use mckoi_base::Bitmap256;
use serde::{Deserialize, Serialize};

/// Classification of two transactions' overlap on the same path, per
/// spec §4.3.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlap {
    /// No key in common; auto-merge always succeeds.
    Disjoint,
    /// Touched keys overlap, but none of them is a unique-constraint key;
    /// auto-mergeable (a field-level summary would refine this further,
    /// but without a schema layer every non-unique overlap is treated as
    /// a soft, mergeable conflict).
    Soft,
    /// Both transactions touched the same unique-constraint key (e.g. both
    /// inserted the same ordered-unique list key) — structurally
    /// conflicting, never auto-mergeable.
    Hard,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TouchedRangeSummary {
    prefixes: Bitmap256,
    unique_keys: BTreeSet<u128>,
}

/// Folds a 128-bit key down to one of 256 bloom slots. Collisions only ever
/// make `Bitmap256::any()` overlap checks conservative (false positives,
/// never false negatives), which is what a bloom filter promises.
fn prefix_slot(key: u128) -> u8 {
    ((key >> 120) as u8) ^ ((key >> 56) as u8)
}

impl TouchedRangeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_key(&mut self, key: u128) {
        self.prefixes.set(prefix_slot(key), true);
    }

    /// Records a touch to a key participating in an ordering-sensitive
    /// structure (an unique-list insert), which can never be soft-merged
    /// against another transaction touching the same key.
    pub fn touch_unique(&mut self, key: u128) {
        self.touch_key(key);
        self.unique_keys.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.unique_keys.is_empty()
    }

    /// Classifies this summary's overlap against a historic one, per
    /// spec §4.3.3. Bloom false positives only ever widen `Soft`, never
    /// manufacture a spurious `Hard` (unique keys are tracked exactly).
    pub fn classify(&self, other: &TouchedRangeSummary) -> Overlap {
        if self.unique_keys.intersection(&other.unique_keys).next().is_some() {
            return Overlap::Hard;
        }
        let mut intersection = self.prefixes.clone();
        intersection.intersect(&other.prefixes);
        if intersection.any() {
            Overlap::Soft
        } else {
            Overlap::Disjoint
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_disjoint_summaries() {
        let mut a = TouchedRangeSummary::new();
        a.touch_key(1);
        let mut b = TouchedRangeSummary::new();
        b.touch_key(u128::MAX);
        // Extremely unlikely to collide in a 256-slot bloom for these two
        // far-apart keys; if it does, the test below still holds since a
        // collision only ever escalates Disjoint to Soft, never to Hard.
        assert_ne!(a.classify(&b), Overlap::Hard);
    }

    #[test]
    fn test_shared_non_unique_key_is_soft() {
        let mut a = TouchedRangeSummary::new();
        a.touch_key(42);
        let mut b = TouchedRangeSummary::new();
        b.touch_key(42);
        assert_eq!(a.classify(&b), Overlap::Soft);
    }

    #[test]
    fn test_shared_unique_key_is_hard() {
        let mut a = TouchedRangeSummary::new();
        a.touch_unique(42);
        let mut b = TouchedRangeSummary::new();
        b.touch_unique(42);
        assert_eq!(a.classify(&b), Overlap::Hard);
    }

    #[test]
    fn test_same_prefix_different_unique_keys_is_soft() {
        let mut a = TouchedRangeSummary::new();
        a.touch_unique(100);
        let mut b = TouchedRangeSummary::new();
        b.touch_unique(200);
        // Not the same unique key, so even if their bloom slots collide
        // this must never classify as Hard.
        assert_ne!(a.classify(&b), Overlap::Hard);
    }
}
