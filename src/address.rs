//! The address space of the abstract machine.
//!
//! An [`Address`] is the one scalar the machine uses as a "location". It falls into exactly one of
//! four disjoint categories:
//!
//! - **Null**: no location at all.
//! - **Constant**: an abstract integer, i.e. a [`Sign`] set. Never refers to the store.
//! - **Relocation**: a temporary id naming an entry of a [`ValueTable`][crate::reloc::ValueTable].
//!   Only meaningful while one interpretation step is in progress.
//! - **Heap**: a `(block, offset)` pair naming a committed cell of a [`Store`][crate::store::Store].
//!
//! Addresses are decoded into the enum once and pattern-matched afterwards. The packed 32-bit
//! form (see [`Address::encode`]) is what hashing and ordering are defined on:
//!
//! ```text
//! 0xFFFF_FFFF                   null
//! 0xFFFF_FF00 | sign bits       constant
//! 0x8000_0000 | id              relocation   (id < 0x7FFF_FF00)
//! block << 14 | offset          heap         (block < 0x2_0000, offset < 0x4000)
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Set of sign classes an abstract integer may belong to.
///
/// The three classes are independent bits, so a value of this type is an element of the
/// powerset lattice over `{-, 0, +}`:
///
/// ```text
///           ⊤
///       /   |   \
///     ≤0   ≠0   ≥0
///    / \  / \  / \
///   -   0   +
///    \  |  /
///       ⊥
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Sign(u8);

impl Sign {
    /// `⊥`: no possible value.
    pub const EMPTY: Sign = Sign(0);
    /// `-`: strictly negative.
    pub const NEGATIVE: Sign = Sign(0b001);
    /// `0`: exactly zero.
    pub const ZERO: Sign = Sign(0b010);
    /// `+`: strictly positive.
    pub const POSITIVE: Sign = Sign(0b100);
    /// `⊤`: any value.
    pub const TOP: Sign = Sign(0b111);

    /// Boolean `true` (encoded as `1`).
    pub const TRUE: Sign = Sign::POSITIVE;
    /// Boolean `false` (encoded as `0`).
    pub const FALSE: Sign = Sign::ZERO;

    /// The three singleton classes, in order `-`, `0`, `+`.
    pub const CLASSES: [Sign; 3] = [Sign::NEGATIVE, Sign::ZERO, Sign::POSITIVE];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Sign class of a concrete integer.
    pub fn of(value: i64) -> Self {
        match value.cmp(&0) {
            Ordering::Less => Sign::NEGATIVE,
            Ordering::Equal => Sign::ZERO,
            Ordering::Greater => Sign::POSITIVE,
        }
    }

    /// Sign class of a concrete floating point number. `NaN` may compare any way.
    pub fn of_float(value: f64) -> Self {
        match value.partial_cmp(&0.0) {
            Some(Ordering::Less) => Sign::NEGATIVE,
            Some(Ordering::Equal) => Sign::ZERO,
            Some(Ordering::Greater) => Sign::POSITIVE,
            None => Sign::TOP,
        }
    }

    /// Boolean constant.
    pub fn of_bool(value: bool) -> Self {
        if value {
            Sign::TRUE
        } else {
            Sign::FALSE
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Sign) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Sign) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn has_negative(self) -> bool {
        self.intersects(Sign::NEGATIVE)
    }
    pub const fn has_zero(self) -> bool {
        self.intersects(Sign::ZERO)
    }
    pub const fn has_positive(self) -> bool {
        self.intersects(Sign::POSITIVE)
    }

    pub const fn union(self, other: Sign) -> Sign {
        Sign(self.0 | other.0)
    }

    pub const fn without(self, other: Sign) -> Sign {
        Sign(self.0 & !other.0)
    }

    /// Iterate over the singleton classes contained in this set.
    pub fn classes(self) -> impl Iterator<Item = Sign> {
        Sign::CLASSES.into_iter().filter(move |&s| self.contains(s))
    }
}

impl BitOr for Sign {
    type Output = Sign;

    fn bitor(self, rhs: Sign) -> Sign {
        self.union(rhs)
    }
}

impl BitOrAssign for Sign {
    fn bitor_assign(&mut self, rhs: Sign) {
        *self = self.union(rhs);
    }
}

impl BitAnd for Sign {
    type Output = Sign;

    fn bitand(self, rhs: Sign) -> Sign {
        Sign(self.0 & rhs.0)
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.0 {
            0b000 => "⊥",
            0b001 => "-",
            0b010 => "0",
            0b100 => "+",
            0b011 => "≤0",
            0b110 => "≥0",
            0b101 => "≠0",
            _ => "⊤",
        };
        write!(f, "{}", s)
    }
}

/// Raw encoding of the null address.
pub const NULL: u32 = 0xFFFF_FFFF;
/// Prefix of constant addresses; the low three bits carry the [`Sign`].
pub const CONST_PREFIX: u32 = 0xFFFF_FF00;
/// Prefix of relocation addresses.
pub const RELOC_PREFIX: u32 = 0x8000_0000;
/// Number of distinct relocation ids.
pub const MAX_RELOC: u32 = CONST_PREFIX - RELOC_PREFIX;
/// Bits of a heap address used by the offset within a block.
pub const OFFSET_BITS: u32 = 14;
/// Number of store blocks a heap address can name.
pub const MAX_BLOCKS: u32 = RELOC_PREFIX >> OFFSET_BITS;

/// A location of the abstract machine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Address {
    #[default]
    Null,
    Const(Sign),
    Reloc(u32),
    Heap { block: u32, offset: u32 },
}

impl Address {
    /// Constant address of an abstract integer.
    pub const fn constant(sign: Sign) -> Self {
        Address::Const(sign)
    }

    /// Heap address of a store cell.
    pub fn heap(block: u32, offset: u32) -> Self {
        assert!(block < MAX_BLOCKS, "Block {} is out of range", block);
        assert!(offset < (1 << OFFSET_BITS), "Offset {} is out of range", offset);
        Address::Heap { block, offset }
    }

    /// Pack into the 32-bit scalar form.
    pub fn encode(self) -> u32 {
        match self {
            Address::Null => NULL,
            Address::Const(sign) => CONST_PREFIX | sign.bits() as u32,
            Address::Reloc(id) => RELOC_PREFIX | id,
            Address::Heap { block, offset } => (block << OFFSET_BITS) | offset,
        }
    }

    /// Unpack the 32-bit scalar form.
    ///
    /// Ranges are tested in the order relocation, constant, heap. Values in the gap between the
    /// constant prefix and null decode to [`Address::Null`].
    pub fn decode(raw: u32) -> Self {
        if raw == NULL {
            Address::Null
        } else if (RELOC_PREFIX..CONST_PREFIX).contains(&raw) {
            Address::Reloc(raw - RELOC_PREFIX)
        } else if raw & !0b111 == CONST_PREFIX {
            Address::Const(Sign::from_bits(raw as u8))
        } else if raw < RELOC_PREFIX {
            Address::Heap {
                block: raw >> OFFSET_BITS,
                offset: raw & ((1 << OFFSET_BITS) - 1),
            }
        } else {
            Address::Null
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Address::Null)
    }
    pub fn is_const(self) -> bool {
        matches!(self, Address::Const(_))
    }
    pub fn is_reloc(self) -> bool {
        matches!(self, Address::Reloc(_))
    }
    pub fn is_heap(self) -> bool {
        matches!(self, Address::Heap { .. })
    }

    /// The abstract integer of a constant address.
    pub fn sign(self) -> Option<Sign> {
        match self {
            Address::Const(sign) => Some(sign),
            _ => None,
        }
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encode().cmp(&other.encode())
    }
}

impl From<Sign> for Address {
    fn from(sign: Sign) -> Self {
        Address::Const(sign)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Null => write!(f, "null"),
            Address::Const(sign) => write!(f, "const({})", sign),
            Address::Reloc(id) => write!(f, "reloc#{}", id),
            Address::Heap { block, offset } => write!(f, "@{}:{:#x}", block, offset),
        }
    }
}
