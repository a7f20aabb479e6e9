//! Headless execution environment flags.
//!
//! GUI-touching criteria run with a fixed bundle of four flags. The bundle
//! is applied as a whole or not at all: any subset, and any value other
//! than the headless one, is a [`ConfigMismatchError`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const GRAPHICS_BACKEND: &str = "GRADEBOX_GRAPHICS_BACKEND";
pub const DISPLAY_SCALE: &str = "GRADEBOX_DISPLAY_SCALE";
pub const AUTOMATION_BACKEND: &str = "GRADEBOX_AUTOMATION_BACKEND";
pub const FONT_RENDERING: &str = "GRADEBOX_FONT_RENDERING";

/// All flag names, in the order they are applied.
pub const FLAG_NAMES: [&str; 4] = [
    GRAPHICS_BACKEND,
    DISPLAY_SCALE,
    AUTOMATION_BACKEND,
    FONT_RENDERING,
];

/// Partial or malformed application of the environment bundle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution environment mismatch: {reason}")]
pub struct ConfigMismatchError {
    pub reason: String,
}

impl ConfigMismatchError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The complete flag bundle for deterministic headless execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    pub graphics_backend: String,
    /// Percent
    pub display_scale: u32,
    pub automation_backend: String,
    pub font_rendering: String,
}

impl Default for ExecutionEnvironment {
    fn default() -> Self {
        Self::headless()
    }
}

impl ExecutionEnvironment {
    /// Software renderer, 100% scaling, non-interactive input driver, fixed
    /// rasterizer.
    pub fn headless() -> Self {
        Self {
            graphics_backend: "software".to_string(),
            display_scale: 100,
            automation_backend: "headless".to_string(),
            font_rendering: "fixed".to_string(),
        }
    }

    /// Default flag map as written in configuration files.
    pub fn headless_flags() -> BTreeMap<String, String> {
        Self::headless()
            .vars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Build the bundle from a flag map. Every flag must be present with its
    /// headless value; unknown flags are rejected as well.
    pub fn from_flags(flags: &BTreeMap<String, String>) -> Result<Self, ConfigMismatchError> {
        let unknown: Vec<&str> = flags
            .keys()
            .map(String::as_str)
            .filter(|k| !FLAG_NAMES.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigMismatchError::new(format!(
                "unknown flags: {}",
                unknown.join(", ")
            )));
        }
        Self::from_lookup(|name| flags.get(name).cloned())
    }

    /// Read the bundle from the current process environment.
    ///
    /// `Ok(None)` when no flag is set, `Err` when only some are.
    pub fn from_process_env() -> Result<Option<Self>, ConfigMismatchError> {
        let any_set = FLAG_NAMES.iter().any(|name| std::env::var_os(name).is_some());
        if !any_set {
            return Ok(None);
        }
        Self::from_lookup(|name| std::env::var(name).ok()).map(Some)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigMismatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing: Vec<&str> = FLAG_NAMES
            .iter()
            .copied()
            .filter(|name| lookup(name).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigMismatchError::new(format!(
                "missing flags: {}",
                missing.join(", ")
            )));
        }

        let get = |name: &str| lookup(name).unwrap_or_default();
        let scale = get(DISPLAY_SCALE);
        let display_scale = scale.trim().parse::<u32>().map_err(|_| {
            ConfigMismatchError::new(format!("{DISPLAY_SCALE} is not a percentage: {scale}"))
        })?;

        let env = Self {
            graphics_backend: get(GRAPHICS_BACKEND).trim().to_string(),
            display_scale,
            automation_backend: get(AUTOMATION_BACKEND).trim().to_string(),
            font_rendering: get(FONT_RENDERING).trim().to_string(),
        };
        env.ensure_headless()?;
        Ok(env)
    }

    /// Reject any value that differs from [`ExecutionEnvironment::headless`].
    fn ensure_headless(&self) -> Result<(), ConfigMismatchError> {
        let expected = Self::headless();
        let wrong: Vec<String> = self
            .vars()
            .into_iter()
            .zip(expected.vars())
            .filter(|((_, actual), (_, want))| actual != want)
            .map(|((name, actual), (_, want))| format!("{name}={actual} (expected {want})"))
            .collect();
        if wrong.is_empty() {
            Ok(())
        } else {
            Err(ConfigMismatchError::new(format!(
                "non-headless values: {}",
                wrong.join(", ")
            )))
        }
    }

    /// The bundle as environment variables for a child process.
    pub fn vars(&self) -> [(&'static str, String); 4] {
        [
            (GRAPHICS_BACKEND, self.graphics_backend.clone()),
            (DISPLAY_SCALE, self.display_scale.to_string()),
            (AUTOMATION_BACKEND, self.automation_backend.clone()),
            (FONT_RENDERING, self.font_rendering.clone()),
        ]
    }
}
