//! Error taxonomy of the abstract machine.
//!
//! Every fallible operation reports through [`Error`]. Nothing here is fatal to an analysis:
//! the block interpreter logs the error of a failed instruction and moves on to the next one.

use crate::address::Address;
use crate::program::{BlockIndex, InstIndex};

/// Abstract machine result type
pub type Result<T> = std::result::Result<T, Error>;

/// Possible abstract machine errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Address space of the store or of the relocation table is used up.
    #[error("out of {0} space")]
    Exhausted(&'static str),

    /// The address is null, a constant, or otherwise does not name a store cell.
    #[error("invalid address {0}")]
    InvalidAddress(Address),

    /// The address is well-formed but nothing is stored there.
    #[error("no value stored at {0}")]
    Unoccupied(Address),

    /// Register index beyond the register file of the frame.
    #[error("register {register} out of range (frame has {size} registers)")]
    RegisterOutOfRange { register: usize, size: usize },

    /// The cell holds a value of a different kind than the operation requires.
    #[error("expected {expected} at {address}")]
    UnexpectedValue {
        address: Address,
        expected: &'static str,
    },

    /// The feature is not modelled yet.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The instruction cannot be interpreted as encoded.
    #[error("malformed instruction #{instruction}: {reason}")]
    MalformedInstruction {
        instruction: InstIndex,
        reason: String,
    },

    /// No metadata for the class.
    #[error("unknown class {0}")]
    UnknownClass(String),

    /// The class chain has no such field.
    #[error("unknown field {classpath}/{field}")]
    UnknownField { classpath: String, field: String },

    /// Branch or entry refers to a block the program does not contain.
    #[error("unknown block {0}")]
    UnknownBlock(BlockIndex),

    /// Block range refers to an instruction the program does not contain.
    #[error("unknown instruction #{0}")]
    UnknownInstruction(InstIndex),
}

impl Error {
    pub(crate) fn malformed(instruction: InstIndex, reason: impl Into<String>) -> Self {
        Error::MalformedInstruction {
            instruction,
            reason: reason.into(),
        }
    }
}
