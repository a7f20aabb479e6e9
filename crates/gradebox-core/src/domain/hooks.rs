//! Per-criterion execution hooks.
//!
//! Hooks let a criterion observe or replace individual functions of the
//! unit under test:
//! - `log`: record every call of a function together with its top operands
//! - `substitute`: replace a function body by a fixed stub
//! - `reference`: run the rubric's reference implementation of a function
//!   instead of the submitted one
//!
//! The rewrite itself lives in [`crate::instrument::apply_hooks`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Most operands a logged call may record.
pub const MAX_LOGGED_OPERANDS: u16 = 16;

/// Stub body: pop `pop` operands, push `push` in order, return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Substitution {
    pub pop: u16,
    pub push: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionHooks {
    /// Function name -> number of operands to record per call
    pub log: BTreeMap<String, u16>,
    pub substitute: BTreeMap<String, Substitution>,
    /// Functions delegated to the reference unit
    pub reference: BTreeSet<String>,
}

impl ExecutionHooks {
    pub fn is_empty(&self) -> bool {
        self.log.is_empty() && self.substitute.is_empty() && self.reference.is_empty()
    }

    /// Problems that do not depend on the submission.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, operands) in &self.log {
            if *operands > MAX_LOGGED_OPERANDS {
                out.push(format!(
                    "log {name}: at most {MAX_LOGGED_OPERANDS} operands, got {operands}"
                ));
            }
        }
        for name in self.substitute.keys() {
            if self.reference.contains(name) {
                out.push(format!("{name} is both substituted and delegated to the reference"));
            }
        }
        out
    }
}
