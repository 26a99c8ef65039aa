use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured 128-bit key = (type: 16 bits, secondary: 48 bits,
/// primary: 64 bits). Ordering is lexicographic on the full 128 bits. The
/// engine is oblivious to semantics; schema layers encode table/column/row
/// references into the key space. Packing the three fields into a single
/// `u128` in big-endian field order means the derived integer ordering
/// *is* the lexicographic ordering the spec requires, with no custom
/// `Ord` impl needed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(u128);

const SECONDARY_MASK: u128 = (1_u128 << 48) - 1;

impl Key {
    pub const MIN: Key = Key(0);
    pub const MAX: Key = Key(u128::MAX);

    pub fn new(ty: u16, secondary: u64, primary: u64) -> Self {
        let secondary = (secondary as u128) & SECONDARY_MASK;
        let packed = ((ty as u128) << 112) | (secondary << 64) | (primary as u128);
        Key(packed)
    }

    pub fn ty(&self) -> u16 {
        (self.0 >> 112) as u16
    }

    pub fn secondary(&self) -> u64 {
        ((self.0 >> 64) & SECONDARY_MASK) as u64
    }

    pub fn primary(&self) -> u64 {
        self.0 as u64
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn from_u128(v: u128) -> Self {
        Key(v)
    }

    /// Key immediately following this one, or `None` at `Key::MAX`. Used to
    /// build half-open key ranges for touched-range summaries.
    pub fn successor(&self) -> Option<Key> {
        self.0.checked_add(1).map(Key)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key(ty={:#x}, sec={:#x}, pri={:#x})",
            self.ty(),
            self.secondary(),
            self.primary()
        )
    }
}
