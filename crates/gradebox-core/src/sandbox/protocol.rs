//! Wire protocol between the executor and the `gradebox-sandbox` process.
//!
//! The parent writes one JSON [`SandboxRequest`] to the child's stdin and
//! closes it. The child writes program output to stdout, a diagnostic line
//! to stderr on abnormal termination, and reports the termination kind via
//! its exit code. Logged invocations, if any, are written as a JSON array
//! to [`INVOCATION_LOG`] in its working directory.

use serde::{Deserialize, Serialize};

use crate::unit::{Trap, Unit, VmLimits};

/// Program completed normally.
pub const EXIT_OK: i32 = 0;
/// Program faulted (failed instruction, bad argument, overflow).
pub const EXIT_FAULT: i32 = 1;
/// Request could not be read or decoded.
pub const EXIT_PROTOCOL: i32 = 2;
/// Stack or call depth exhausted.
pub const EXIT_RESOURCE: i32 = 3;
/// Execution environment partially applied, or missing for `frame`.
pub const EXIT_CONFIG: i32 = 4;
/// Checkpoint observed the budget was exhausted.
pub const EXIT_SOFT_TIMEOUT: i32 = 124;

/// File the child writes its invocation log to, relative to its cwd.
pub const INVOCATION_LOG: &str = "invocations.json";

/// One execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub unit: Unit,
    pub entry: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Checkpoint budget in milliseconds; absent when enforcement is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_ms: Option<u64>,
    pub limits: VmLimits,
}

/// Exit code for a trap.
pub fn exit_code(trap: &Trap) -> i32 {
    match trap {
        Trap::Fault(_) => EXIT_FAULT,
        Trap::ResourceExhausted(_) => EXIT_RESOURCE,
        Trap::SoftTimeout { .. } => EXIT_SOFT_TIMEOUT,
        Trap::ConfigMismatch(_) => EXIT_CONFIG,
    }
}
