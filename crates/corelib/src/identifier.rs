//! Fixed-width identifier algebra on the circular key space.
//!
//! An [`Identifier`] is an unsigned integer of `N` bytes (`N` up to 255,
//! typically 20 for `m = 160`) stored little-endian (byte 0 is least
//! significant), matching the wire representation in the Node record
//! header. All routing in the ring reduces to comparison, circular
//! in-betweenness, and modular addition of a power of two on this type.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// An identifier on the circular `2^(8*len)` key space.
///
/// Two identifiers are only meaningfully comparable when they share the
/// same byte count; comparing identifiers of different widths is a caller
/// error (see `spec.md` §4.1) and every operation here returns
/// [`Error::WidthMismatch`] rather than silently padding or truncating.
#[derive(Clone, Eq, Hash)]
pub struct Identifier {
    /// Little-endian bytes; `bytes[0]` is the least significant byte.
    bytes: Vec<u8>,
}

impl Identifier {
    /// Builds an identifier directly from little-endian bytes.
    pub fn from_le_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Builds an identifier from a big-endian byte slice, as produced by a
    /// hash function such as SHA-1. The bytes are reversed into the
    /// little-endian representation the ring operates on.
    pub fn from_be_hash(hash: &[u8]) -> Self {
        let mut bytes = hash.to_vec();
        bytes.reverse();
        Self { bytes }
    }

    /// The zero identifier of the given byte width.
    pub fn zero(len: u8) -> Self {
        Self { bytes: vec![0u8; len as usize] }
    }

    /// Number of bytes this identifier is made of.
    pub fn len(&self) -> u8 {
        self.bytes.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Little-endian byte representation.
    pub fn as_le_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn check_same_width(&self, other: &Self) -> Result<()> {
        if self.bytes.len() != other.bytes.len() {
            Err(Error::WidthMismatch(self.len(), other.len()))
        } else {
            Ok(())
        }
    }

    /// Strict order on same-width identifiers.
    ///
    /// Panics in debug builds (and degrades to comparing lengths-then-bytes
    /// in release builds) when the widths differ, since the contract
    /// explicitly leaves cross-width comparison undefined; callers that can
    /// receive mixed widths should use [`Identifier::try_cmp`] instead.
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering> {
        self.check_same_width(other)?;
        Ok(self.bytes.iter().rev().cmp(other.bytes.iter().rev()))
    }

    /// `self == other`, same-width only.
    pub fn try_eq(&self, other: &Self) -> Result<bool> {
        Ok(self.try_cmp(other)? == Ordering::Equal)
    }

    /// Half-open arc `(low, high]` walked clockwise — "in between" as
    /// defined in `spec.md` §3:
    ///
    /// - `low == high`: every identifier except `high` is in between (the
    ///   whole ring minus the single point `high`).
    /// - `high > low` (no wrap): membership is `low < x <= high`.
    /// - `high < low` (wrap): membership is `x > low || x <= high`.
    pub fn in_between(&self, low: &Self, high: &Self) -> Result<bool> {
        self.check_same_width(low)?;
        self.check_same_width(high)?;
        let lh = low.try_cmp(high)?;
        if lh == Ordering::Equal {
            return Ok(self.try_cmp(high)? != Ordering::Equal);
        }
        if lh == Ordering::Less {
            Ok(self.try_cmp(low)? == Ordering::Greater && self.try_cmp(high)? != Ordering::Greater)
        } else {
            Ok(self.try_cmp(low)? == Ordering::Greater || self.try_cmp(high)? != Ordering::Greater)
        }
    }

    /// `self += 2^power mod 2^(8*len)`, with carry propagating through the
    /// byte array and any carry past the top byte silently dropped.
    ///
    /// `power >= 8 * len` is a caller error.
    pub fn add_power_of_two(&self, power: u16) -> Result<Self> {
        let len = self.len();
        if power as usize >= 8 * len as usize {
            return Err(Error::PowerOutOfRange(power, len));
        }
        let byte_index = (power / 8) as usize;
        let bit_index = (power % 8) as u32;
        let mut bytes = self.bytes.clone();
        let mut carry: u16 = 1u16 << bit_index;
        for b in bytes.iter_mut().skip(byte_index) {
            let sum = *b as u16 + carry;
            *b = (sum & 0xFF) as u8;
            carry = sum >> 8;
            if carry == 0 {
                break;
            }
        }
        // Carry past the top byte models `mod 2^(8*len)` and is dropped.
        Ok(Self { bytes })
    }

    /// The `m` finger-target identifiers `self + 2^i` for `i` in `[0, m)`,
    /// precomputed once per VNode at construction time.
    pub fn finger_targets(&self, m: usize) -> Result<Vec<Self>> {
        (0..m as u16).map(|i| self.add_power_of_two(i)).collect()
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.len() == other.bytes.len() && self.bytes == other.bytes
    }
}

/// `Ord`/`PartialOrd` are provided for use as map keys; they assume
/// same-width identifiers (as every identifier on a single ring is) and
/// fall back to ordering shorter-before-longer if widths ever differ,
/// rather than panicking inside a `BTreeMap` invariant.
impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.bytes.len().cmp(&other.bytes.len()) {
            Ordering::Equal => self.bytes.iter().rev().cmp(other.bytes.iter().rev()),
            other_ord => other_ord,
        }
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes.iter().rev() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: u64, len: u8) -> Identifier {
        let mut bytes = n.to_le_bytes().to_vec();
        bytes.resize(len as usize, 0);
        Identifier::from_le_bytes(bytes)
    }

    #[test]
    fn ordering_is_little_endian() {
        assert!(id(1, 4) < id(2, 4));
        assert!(id(255, 4) < id(256, 4));
    }

    #[test]
    fn in_between_no_wrap() {
        let low = id(10, 4);
        let high = id(20, 4);
        assert!(id(15, 4).in_between(&low, &high).unwrap());
        assert!(!id(10, 4).in_between(&low, &high).unwrap());
        assert!(id(20, 4).in_between(&low, &high).unwrap());
        assert!(!id(25, 4).in_between(&low, &high).unwrap());
    }

    #[test]
    fn in_between_wrap() {
        let low = id(250, 4);
        let high = id(5, 4);
        assert!(id(2, 4).in_between(&low, &high).unwrap());
        assert!(id(252, 4).in_between(&low, &high).unwrap());
        assert!(!id(10, 4).in_between(&low, &high).unwrap());
    }

    #[test]
    fn in_between_equal_bounds_is_everything_but_high() {
        let p = id(42, 4);
        assert!(id(0, 4).in_between(&p, &p).unwrap());
        assert!(id(99, 4).in_between(&p, &p).unwrap());
        assert!(!p.in_between(&p, &p).unwrap());
    }

    #[test]
    fn add_power_of_two_wraps_modulo() {
        let max = Identifier::from_le_bytes(vec![0xFF, 0xFF]);
        let wrapped = max.add_power_of_two(0).unwrap();
        assert_eq!(wrapped, Identifier::zero(2));
    }

    #[test]
    fn add_power_of_two_out_of_range() {
        let x = Identifier::zero(2);
        assert!(x.add_power_of_two(16).is_err());
        assert!(x.add_power_of_two(15).is_ok());
    }

    #[test]
    fn width_mismatch_is_an_error_not_a_panic() {
        let a = Identifier::zero(4);
        let b = Identifier::zero(8);
        assert!(a.in_between(&b, &b).is_err());
        assert!(a.add_power_of_two(3).is_ok());
    }

    proptest! {
        #[test]
        fn prop_add_power_of_two_matches_modular_arithmetic(x in any::<u64>(), i in 0u16..64) {
            let ident = Identifier::from_le_bytes(x.to_le_bytes().to_vec());
            let got = ident.add_power_of_two(i).unwrap();
            let expected = x.wrapping_add(1u64 << i);
            let expected_id = Identifier::from_le_bytes(expected.to_le_bytes().to_vec());
            prop_assert_eq!(got, expected_id);
        }

        #[test]
        fn prop_arc_partitions_the_circle(
            x in any::<u32>(), low in any::<u32>(), high in any::<u32>()
        ) {
            let x = Identifier::from_le_bytes(x.to_le_bytes().to_vec());
            let low = Identifier::from_le_bytes(low.to_le_bytes().to_vec());
            let high = Identifier::from_le_bytes(high.to_le_bytes().to_vec());
            let forward = x.in_between(&low, &high).unwrap();
            let backward = x.in_between(&high, &low).unwrap();
            if x != high {
                prop_assert!(!(forward && backward));
            }
        }
    }
}
