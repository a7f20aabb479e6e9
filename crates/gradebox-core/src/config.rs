//! Grader deployment configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! Binaries layer CLI flags and `GRADEBOX_*` environment variables on top.
//!
//! ```toml
//! timeout_enforcement = true
//! watchdog_grace_ms = 500
//! pool_slots = 4
//!
//! [environment]
//! GRADEBOX_GRAPHICS_BACKEND = "software"
//! GRADEBOX_DISPLAY_SCALE = "100"
//! GRADEBOX_AUTOMATION_BACKEND = "headless"
//! GRADEBOX_FONT_RENDERING = "fixed"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionEnvironment, GradeError, Result};
use crate::sandbox::ExecutorSettings;
use crate::unit::VmLimits;

/// File name of the sandbox runner binary.
pub const SANDBOX_BINARY: &str = "gradebox-sandbox";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraderConfig {
    /// Inject checkpoint hooks. Off by default; the watchdog is always on.
    pub timeout_enforcement: bool,
    /// Hard watchdog fires at criterion timeout + this grace
    pub watchdog_grace_ms: u64,
    /// Captured stdout per sandbox
    pub output_cap_bytes: usize,
    /// Captured stderr and outcome diagnostics
    pub diagnostic_cap_bytes: usize,
    /// Concurrent sandbox processes
    pub pool_slots: usize,
    /// Sandbox binary; defaults to `gradebox-sandbox` next to the current executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_program: Option<PathBuf>,
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
    /// Headless flag bundle for GUI criteria
    pub environment: BTreeMap<String, String>,
}

impl Default for GraderConfig {
    fn default() -> Self {
        let limits = VmLimits::default();
        Self {
            timeout_enforcement: false,
            watchdog_grace_ms: 500,
            output_cap_bytes: 64 * 1024,
            diagnostic_cap_bytes: 4 * 1024,
            pool_slots: 4,
            sandbox_program: None,
            max_stack_depth: limits.max_stack_depth,
            max_call_depth: limits.max_call_depth,
            environment: ExecutionEnvironment::headless_flags(),
        }
    }
}

impl GraderConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GradeError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| GradeError::Config(format!("{}: {e}", path.display())))
    }

    /// Reject settings no deployment can run with.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("pool_slots", self.pool_slots),
            ("output_cap_bytes", self.output_cap_bytes),
            ("diagnostic_cap_bytes", self.diagnostic_cap_bytes),
            ("max_stack_depth", self.max_stack_depth),
            ("max_call_depth", self.max_call_depth),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, v)| *v == 0) {
            return Err(GradeError::Config(format!("{name} must be > 0")));
        }
        ExecutionEnvironment::from_flags(&self.environment)?;
        Ok(())
    }

    pub fn limits(&self) -> VmLimits {
        VmLimits {
            max_stack_depth: self.max_stack_depth,
            max_call_depth: self.max_call_depth,
        }
    }

    /// Resolve the sandbox binary path.
    pub fn sandbox_program(&self) -> Result<PathBuf> {
        if let Some(path) = &self.sandbox_program {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe()?;
        Ok(exe.with_file_name(format!("{SANDBOX_BINARY}{}", std::env::consts::EXE_SUFFIX)))
    }

    pub fn executor_settings(&self) -> Result<ExecutorSettings> {
        Ok(ExecutorSettings {
            program: self.sandbox_program()?,
            watchdog_grace: Duration::from_millis(self.watchdog_grace_ms),
            output_cap: self.output_cap_bytes,
            diagnostic_cap: self.diagnostic_cap_bytes,
            limits: self.limits(),
        })
    }
}
