//! Sign-interval arithmetic over constant addresses.
//!
//! Each binary operator is defined by a table over the singleton classes `{-, 0, +}` and lifted to
//! arbitrary [`Sign`] sets pointwise: the result is the union, over every class of the left
//! operand and every class of the right operand, of the classes the concrete operation can yield.
//!
//! ```text
//!   add | -    0    +        mul | -  0  +
//!  -----+--------------     -----+---------
//!    -  | -    -    ⊤          - | +  0  -
//!    0  | -    0    +          0 | 0  0  0
//!    +  | ⊤    +    +          + | -  0  +
//! ```
//!
//! None of these functions touch a store.

use log::debug;

use crate::address::{Address, Sign};

/// Result of an operation that divides.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Quotient {
    /// Possible signs of the result, over the non-zero part of the divisor.
    pub sign: Sign,
    /// The divisor may be zero.
    pub divides_by_zero: bool,
}

fn lift2(a: Sign, b: Sign, table: impl Fn(Sign, Sign) -> Sign) -> Sign {
    let mut result = Sign::EMPTY;
    for x in a.classes() {
        for y in b.classes() {
            result |= table(x, y);
        }
    }
    result
}

fn lift1(a: Sign, table: impl Fn(Sign) -> Sign) -> Sign {
    a.classes().fold(Sign::EMPTY, |acc, x| acc | table(x))
}

fn add_class(x: Sign, y: Sign) -> Sign {
    match (x, y) {
        (Sign::ZERO, y) => y,
        (x, Sign::ZERO) => x,
        (x, y) if x == y => x,
        _ => Sign::TOP,
    }
}

fn mul_class(x: Sign, y: Sign) -> Sign {
    if x == Sign::ZERO || y == Sign::ZERO {
        Sign::ZERO
    } else if x == y {
        Sign::POSITIVE
    } else {
        Sign::NEGATIVE
    }
}

// Truncating division; `y` is never zero here.
fn div_class(x: Sign, y: Sign) -> Sign {
    if x == Sign::ZERO {
        Sign::ZERO
    } else if x == y {
        Sign::POSITIVE | Sign::ZERO
    } else {
        Sign::NEGATIVE | Sign::ZERO
    }
}

// Remainder takes the sign of the dividend.
fn rem_class(x: Sign, _y: Sign) -> Sign {
    if x == Sign::ZERO {
        Sign::ZERO
    } else {
        x | Sign::ZERO
    }
}

fn neg_class(x: Sign) -> Sign {
    match x {
        Sign::NEGATIVE => Sign::POSITIVE,
        Sign::POSITIVE => Sign::NEGATIVE,
        _ => Sign::ZERO,
    }
}

// `!x == -x - 1`
fn not_class(x: Sign) -> Sign {
    match x {
        Sign::NEGATIVE => Sign::ZERO | Sign::POSITIVE,
        _ => Sign::NEGATIVE,
    }
}

fn and_class(x: Sign, y: Sign) -> Sign {
    match (x, y) {
        (Sign::ZERO, _) | (_, Sign::ZERO) => Sign::ZERO,
        (Sign::NEGATIVE, Sign::NEGATIVE) => Sign::NEGATIVE,
        _ => Sign::ZERO | Sign::POSITIVE,
    }
}

fn or_class(x: Sign, y: Sign) -> Sign {
    match (x, y) {
        (Sign::NEGATIVE, _) | (_, Sign::NEGATIVE) => Sign::NEGATIVE,
        (Sign::ZERO, y) => y,
        (x, _) => x,
    }
}

fn xor_class(x: Sign, y: Sign) -> Sign {
    match (x, y) {
        (Sign::ZERO, y) => y,
        (x, Sign::ZERO) => x,
        (x, y) if x == y => Sign::ZERO | Sign::POSITIVE,
        _ => Sign::NEGATIVE,
    }
}

pub fn add(a: Sign, b: Sign) -> Sign {
    lift2(a, b, add_class)
}

/// Subtraction. An empty result means the operation has no possible value, which comparisons use
/// to detect an unreachable outcome.
pub fn sub(a: Sign, b: Sign) -> Sign {
    add(a, neg(b))
}

pub fn mul(a: Sign, b: Sign) -> Sign {
    lift2(a, b, mul_class)
}

pub fn div(a: Sign, b: Sign) -> Quotient {
    Quotient {
        sign: lift2(a, b.without(Sign::ZERO), div_class),
        divides_by_zero: b.has_zero(),
    }
}

pub fn rem(a: Sign, b: Sign) -> Quotient {
    Quotient {
        sign: lift2(a, b.without(Sign::ZERO), rem_class),
        divides_by_zero: b.has_zero(),
    }
}

pub fn neg(a: Sign) -> Sign {
    lift1(a, neg_class)
}

pub fn not(a: Sign) -> Sign {
    lift1(a, not_class)
}

pub fn bitwise_and(a: Sign, b: Sign) -> Sign {
    lift2(a, b, and_class)
}

pub fn bitwise_or(a: Sign, b: Sign) -> Sign {
    lift2(a, b, or_class)
}

pub fn bitwise_xor(a: Sign, b: Sign) -> Sign {
    lift2(a, b, xor_class)
}

/// Shifts are not modelled: any non-empty operands may produce any sign.
pub fn shift(a: Sign, b: Sign) -> Sign {
    if a.is_empty() || b.is_empty() {
        Sign::EMPTY
    } else {
        Sign::TOP
    }
}

/// Comparison (`cmp`): the sign of `a - b`.
pub fn compare(a: Sign, b: Sign) -> Sign {
    let result = sub(a, b);
    debug!("compare(a = {}, b = {}) -> {}", a, b, result);
    result
}

/// Lift a sign operator to constant addresses. Non-constant operands yield `None`.
pub fn on_addresses(a: Address, b: Address, op: impl Fn(Sign, Sign) -> Sign) -> Option<Address> {
    Some(Address::Const(op(a.sign()?, b.sign()?)))
}
