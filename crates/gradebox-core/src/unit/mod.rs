//! Unit toolchain: the managed execution environment graded submissions
//! are written for.
//!
//! - [`ir`]: `Unit` / `Function` / `Instr`, the rewritable intermediate form
//! - [`compile`]: unit-assembly source to IR
//! - [`vm`]: interpreter run inside the sandbox process

pub mod compile;
pub mod ir;
pub mod vm;

pub use compile::{compile_unit, CompileError};
pub use ir::{Function, Instr, Unit};
pub use vm::{execute, execute_logged, Invocation, Trap, VmLimits, VmOptions};
