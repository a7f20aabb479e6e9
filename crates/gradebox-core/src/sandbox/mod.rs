//! Sandbox: isolated execution of instrumented units.
//!
//! Every criterion runs in a freshly spawned `gradebox-sandbox` process
//! holding one worker-pool slot. Two watchdog layers apply: the injected
//! checkpoint (soft, cooperative, inside the child) and the wall-clock kill
//! (hard, mandatory, in the parent).
//!
//! # Modules
//!
//! - [`protocol`]: `SandboxRequest` and exit codes shared with the child
//! - [`capture`]: bounded stdout/stderr capture, diagnostic clipping
//! - [`pool`]: `WorkerPool` / `IsolationSlot`
//! - [`executor`]: `SandboxExecutor`, outcome classification
//! - [`error`]: `SandboxError` / `SandboxResult`

pub mod capture;
pub mod error;
pub mod executor;
pub mod pool;
pub mod protocol;

pub use capture::{bound_diagnostic, read_capped, Captured};
pub use error::{SandboxError, SandboxResult};
pub use executor::{classify, ExecutorSettings, RawExecution, SandboxExecutor, Termination};
pub use pool::{IsolationSlot, WorkerPool};
pub use protocol::SandboxRequest;
