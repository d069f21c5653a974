//! # cesk-rs: an abstract CESK machine for Dalvik bytecode
//!
//! **`cesk-rs`** interprets Android bytecode methods over approximate state to estimate the shape
//! of the heap and the flow of values through registers and object fields.
//!
//! ## How it works
//!
//! The machine state is a [`Frame`][crate::frame::Frame]: a register file in which every register
//! holds a *set* of addresses, over a [`Store`][crate::store::Store] mapping heap addresses to
//! values. Integers are abstracted to their possible signs, and all objects created by one
//! instruction are summarized as a single abstract object, so the state stays finite.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: address sets are hash-consed in the
//!   [`SetPool`][crate::set::SetPool] owned by a [`Machine`][crate::machine::Machine], and passed
//!   around as lightweight [`SetRef`][crate::set::SetRef] handles.
//! - **Copy-on-write stores**: forking a frame shares every store block until one side writes.
//! - **Allocation-site summarization**: new values go through a relocation table and are joined
//!   into the cell of their allocation site when it already exists.
//! - **Skip and continue**: unsupported or malformed instructions are logged and skipped.
//!
//! ## Basic Usage
//!
//! ```rust
//! use cesk_rs::address::Sign;
//! use cesk_rs::class::ClassTable;
//! use cesk_rs::graph::BlockGraph;
//! use cesk_rs::instruction::{BinaryOp, Instruction, Operand};
//! use cesk_rs::machine::Machine;
//! use cesk_rs::program::Program;
//!
//! // 1. Class metadata and the machine
//! let classes = ClassTable::new();
//! let m = Machine::new(&classes);
//!
//! // 2. A method with a single block: r2 = 5 * -3
//! let mut program = Program::new();
//! let code = program.push_code([
//!     Instruction::constant(0, Operand::int(5)),
//!     Instruction::constant(1, Operand::int(-3)),
//!     Instruction::binop(BinaryOp::Mul, 2, Operand::register(0), Operand::register(1)),
//! ]);
//! let entry = program.push_block(code, 3, vec![]).unwrap();
//!
//! // 3. Build the block graph and interpret the entry block
//! let graph = BlockGraph::new(&program, entry, &m).unwrap();
//! let output = graph.interpret(&program, entry, &m).unwrap();
//! assert_eq!(output.register(2).unwrap(), m.sets().singleton(Sign::NEGATIVE.into()));
//! ```
//!
//! ## Core Components
//!
//! - **[`address`]** and **[`arith`]**: the address space and sign arithmetic.
//! - **[`set`]**, **[`value`]**, **[`store`]**, **[`reloc`]**: what the machine stores.
//! - **[`frame`]**, **[`interp`]**, **[`graph`]**: the machine itself.
//! - **[`instruction`]**, **[`program`]**, **[`class`]**: what the front end hands over.

pub mod address;
pub mod arith;
pub mod cache;
pub mod class;
pub mod error;
pub mod frame;
pub mod graph;
pub mod instruction;
pub mod interp;
pub mod machine;
pub mod object;
pub mod program;
pub mod reloc;
pub mod set;
pub mod store;
pub mod table;
pub mod utils;
pub mod value;
