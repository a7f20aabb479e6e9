//! Expected-outcome predicates.
//!
//! A closed set of checks applied to a sandbox's captured stdout and
//! invocation log, plus one structural check applied to the compiled unit
//! without running it. Custom checks are data, never code, so the grading
//! core never runs anything outside the sandbox.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::unit::{Instr, Invocation, Unit};

/// How a criterion decides Pass/Fail from captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Output equals `expected` after line-ending normalisation and
    /// trailing-whitespace trimming.
    ExactMatch { expected: String },
    /// Numeric tokens of the output match `expected` element-wise within
    /// `tolerance`.
    ToleranceMatch { expected: Vec<f64>, tolerance: f64 },
    Custom { check: CustomCheck },
    /// The unit declares the listed functions. Checked on the compiled
    /// unit; nothing is executed.
    Structure { functions: Vec<RequiredFunction> },
}

/// One function a structural check requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequiredFunction {
    pub name: String,
    /// Exact number of local slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locals: Option<u16>,
    /// Functions it must call directly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
}

/// Data-only custom checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CustomCheck {
    ContainsAll { needles: Vec<String> },
    MatchesRegex { pattern: String },
    /// Partial credit: fraction of `expected_lines` present in the output.
    LineFraction { expected_lines: Vec<String> },
    /// Logged calls of `function`, which must be hooked with `log`.
    Invocations {
        function: String,
        /// Exact number of calls
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        /// Operand lists that must each appear in some call
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        operands: Vec<Vec<i64>>,
    },
}

/// Result of applying a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    /// 1.0 when passed, otherwise the partial-credit fraction (0.0 for
    /// boolean predicates).
    pub credit: f64,
    pub detail: Option<String>,
}

impl Verdict {
    fn pass() -> Self {
        Self {
            passed: true,
            credit: 1.0,
            detail: None,
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            credit: 0.0,
            detail: Some(detail.into()),
        }
    }
}

/// Canonical form for exact comparison.
pub fn normalize_output(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

fn numeric_tokens(text: &str) -> Vec<f64> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|tok| tok.parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .collect()
}

impl Predicate {
    /// Check parameters; returns human-readable problems.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            Predicate::ExactMatch { .. } => {}
            Predicate::ToleranceMatch {
                expected,
                tolerance,
            } => {
                if !tolerance.is_finite() || *tolerance < 0.0 {
                    out.push(format!("tolerance must be finite and >= 0, got {tolerance}"));
                }
                if expected.iter().any(|e| !e.is_finite()) {
                    out.push("expected values must be finite".to_string());
                }
            }
            Predicate::Custom { check } => match check {
                CustomCheck::ContainsAll { needles } => {
                    if needles.is_empty() {
                        out.push("contains_all needs at least one needle".to_string());
                    }
                }
                CustomCheck::MatchesRegex { pattern } => {
                    if let Err(e) = Regex::new(pattern) {
                        out.push(format!("invalid regex {pattern:?}: {e}"));
                    }
                }
                CustomCheck::LineFraction { expected_lines } => {
                    if expected_lines.is_empty() {
                        out.push("line_fraction needs at least one expected line".to_string());
                    }
                }
                CustomCheck::Invocations {
                    function,
                    count,
                    operands,
                } => {
                    if function.is_empty() {
                        out.push("invocations needs a function".to_string());
                    }
                    if count.is_none() && operands.is_empty() {
                        out.push(format!("invocations of {function}: nothing to check"));
                    }
                }
            },
            Predicate::Structure { functions } => {
                if functions.is_empty() {
                    out.push("structure needs at least one function".to_string());
                }
            }
        }
        out
    }

    /// Checked on the compiled unit instead of a sandbox run.
    pub fn is_structural(&self) -> bool {
        matches!(self, Predicate::Structure { .. })
    }

    /// Function whose invocation log this predicate reads, if any.
    pub fn logged_function(&self) -> Option<&str> {
        match self {
            Predicate::Custom {
                check: CustomCheck::Invocations { function, .. },
            } => Some(function),
            _ => None,
        }
    }

    /// Apply the predicate to captured stdout.
    pub fn evaluate(&self, output: &str) -> Verdict {
        self.evaluate_run(output, &[])
    }

    /// Apply the predicate to a finished run's stdout and invocation log.
    pub fn evaluate_run(&self, output: &str, invocations: &[Invocation]) -> Verdict {
        match self {
            Predicate::ExactMatch { expected } => {
                let actual = normalize_output(output);
                let expected = normalize_output(expected);
                if actual == expected {
                    Verdict::pass()
                } else {
                    Verdict::fail(format!("expected {expected:?}, got {actual:?}"))
                }
            }
            Predicate::ToleranceMatch {
                expected,
                tolerance,
            } => {
                let actual = numeric_tokens(output);
                if actual.len() != expected.len() {
                    return Verdict::fail(format!(
                        "expected {} numbers, got {}",
                        expected.len(),
                        actual.len()
                    ));
                }
                match actual
                    .iter()
                    .zip(expected)
                    .position(|(a, e)| (a - e).abs() > *tolerance)
                {
                    None => Verdict::pass(),
                    Some(i) => Verdict::fail(format!(
                        "value {i}: expected {} ± {tolerance}, got {}",
                        expected[i], actual[i]
                    )),
                }
            }
            Predicate::Custom { check } => check.evaluate(output, invocations),
            Predicate::Structure { .. } => {
                Verdict::fail("structure checks inspect the unit, not its output")
            }
        }
    }

    /// Apply a structural predicate to the submitted unit, `None` when the
    /// submission lacks it. Credit is the fraction of satisfied functions.
    pub fn check_structure(&self, unit: Option<&Unit>) -> Verdict {
        let Predicate::Structure { functions } = self else {
            return Verdict::fail("not a structure check");
        };
        let Some(unit) = unit else {
            return Verdict::fail("unit not submitted");
        };
        let problems: Vec<String> = functions
            .iter()
            .filter_map(|required| structure_problem(unit, required))
            .collect();
        if problems.is_empty() {
            return Verdict::pass();
        }
        let satisfied = functions.len() - problems.len();
        Verdict {
            passed: false,
            credit: satisfied as f64 / functions.len() as f64,
            detail: Some(problems.join("; ")),
        }
    }
}

fn structure_problem(unit: &Unit, required: &RequiredFunction) -> Option<String> {
    let Some((_, func)) = unit.function(&required.name) else {
        return Some(format!("function {} does not exist", required.name));
    };
    if let Some(locals) = required.locals {
        if func.locals != locals {
            return Some(format!(
                "function {} has {} locals, expected {locals}",
                required.name, func.locals
            ));
        }
    }
    let called: Vec<&str> = func
        .body
        .iter()
        .filter_map(|instr| match instr {
            Instr::Call(idx) => unit.functions.get(*idx).map(|f| f.name.as_str()),
            _ => None,
        })
        .collect();
    let missing: Vec<&str> = required
        .calls
        .iter()
        .map(String::as_str)
        .filter(|callee| !called.contains(callee))
        .collect();
    if !missing.is_empty() {
        return Some(format!(
            "function {} does not call {}",
            required.name,
            missing.join(", ")
        ));
    }
    None
}

impl CustomCheck {
    fn evaluate(&self, output: &str, invocations: &[Invocation]) -> Verdict {
        match self {
            CustomCheck::ContainsAll { needles } => {
                let missing: Vec<&str> = needles
                    .iter()
                    .map(String::as_str)
                    .filter(|n| !output.contains(n))
                    .collect();
                if missing.is_empty() {
                    Verdict::pass()
                } else {
                    Verdict::fail(format!("missing: {}", missing.join(", ")))
                }
            }
            CustomCheck::MatchesRegex { pattern } => match Regex::new(pattern) {
                Ok(re) if re.is_match(output) => Verdict::pass(),
                Ok(_) => Verdict::fail(format!("output does not match {pattern:?}")),
                Err(e) => Verdict::fail(format!("invalid regex {pattern:?}: {e}")),
            },
            CustomCheck::LineFraction { expected_lines } => {
                if expected_lines.is_empty() {
                    return Verdict::pass();
                }
                let normalized = normalize_output(output);
                let present: Vec<&str> = normalized.lines().collect();
                let hits = expected_lines
                    .iter()
                    .filter(|line| present.contains(&line.trim_end()))
                    .count();
                if hits == expected_lines.len() {
                    Verdict::pass()
                } else {
                    Verdict {
                        passed: false,
                        credit: hits as f64 / expected_lines.len() as f64,
                        detail: Some(format!(
                            "{hits}/{} expected lines present",
                            expected_lines.len()
                        )),
                    }
                }
            }
            CustomCheck::Invocations {
                function,
                count,
                operands,
            } => {
                let calls: Vec<&Invocation> = invocations
                    .iter()
                    .filter(|inv| &inv.function == function)
                    .collect();
                if let Some(expected) = count {
                    if calls.len() != *expected {
                        return Verdict::fail(format!(
                            "{function} called {} times, expected {expected}",
                            calls.len()
                        ));
                    }
                }
                let absent: Vec<String> = operands
                    .iter()
                    .filter(|want| !calls.iter().any(|inv| &inv.operands == *want))
                    .map(|want| format!("{want:?}"))
                    .collect();
                if absent.is_empty() {
                    Verdict::pass()
                } else {
                    Verdict::fail(format!("{function} never called with {}", absent.join(", ")))
                }
            }
        }
    }
}
