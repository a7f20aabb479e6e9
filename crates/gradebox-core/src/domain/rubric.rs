//! Rubric and criterion definitions.
//!
//! A [`RubricDraft`] is what an author submits; [`RubricDraft::seal`]
//! validates it and produces an immutable [`Rubric`] carrying a content
//! digest over its criteria and reference units.

use std::collections::{BTreeMap, HashMap, HashSet};

use gradebox_state::ContentDigest;
use serde::{Deserialize, Serialize};

use super::error::{GradeError, Result};
use super::hooks::ExecutionHooks;
use super::predicate::Predicate;
use crate::unit::{compile_unit, Unit};

/// Shortest accepted criterion timeout. Spawning the sandbox counts against
/// the budget, so anything lower times out on a loaded host.
pub const MIN_TIMEOUT_MS: u64 = 50;

fn default_true() -> bool {
    true
}

/// What to run for a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDescriptor {
    /// Name of the submission unit containing the entry function
    pub unit: String,
    /// Entry function; structure criteria leave it empty
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Runs with the headless execution environment applied
    #[serde(default)]
    pub gui: bool,
    /// Criteria that must Pass before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "ExecutionHooks::is_empty")]
    pub hooks: ExecutionHooks,
}

/// How a failed criterion is credited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    /// A Fail earns its predicate's partial credit
    #[default]
    Partial,
    /// Only a Pass earns anything
    AllOrNothing,
}

/// One weighted, independently gradable check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub weight: f64,
    pub timeout_ms: u64,
    pub descriptor: ExecutionDescriptor,
    pub predicate: Predicate,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub scoring: Scoring,
}

impl Criterion {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Unpublished rubric as submitted by an author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricDraft {
    pub assignment_id: String,
    pub version: u32,
    pub criteria: Vec<Criterion>,
    /// Reference implementations by unit name, as unit-assembly source
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reference: BTreeMap<String, String>,
}

/// Published, immutable rubric snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    assignment_id: String,
    version: u32,
    criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    reference: BTreeMap<String, String>,
    digest: String,
}

impl RubricDraft {
    /// Parse a draft from TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GradeError::Config(format!("rubric TOML: {e}")))
    }

    /// Every rule the draft breaks.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.assignment_id.trim().is_empty() {
            out.push("assignment_id must not be empty".to_string());
        }

        let mut compiled = HashMap::new();
        for (name, source) in &self.reference {
            match compile_unit(name, source) {
                Ok(unit) => {
                    compiled.insert(name.as_str(), unit);
                }
                Err(e) => out.push(format!("reference {e}")),
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for criterion in &self.criteria {
            let id = criterion.id.as_str();
            if id.trim().is_empty() {
                out.push("criterion id must not be empty".to_string());
            }
            if !criterion.weight.is_finite() || criterion.weight < 0.0 {
                out.push(format!(
                    "{id}: weight must be finite and >= 0, got {}",
                    criterion.weight
                ));
            }
            if criterion.timeout_ms < MIN_TIMEOUT_MS {
                out.push(format!("{id}: timeout_ms must be >= {MIN_TIMEOUT_MS}"));
            }
            let descriptor = &criterion.descriptor;
            if descriptor.unit.is_empty() {
                out.push(format!("{id}: descriptor needs a unit"));
            }
            if descriptor.entry.is_empty() && !criterion.predicate.is_structural() {
                out.push(format!("{id}: descriptor needs an entry function"));
            }
            for problem in descriptor.hooks.violations() {
                out.push(format!("{id}: {problem}"));
            }
            for function in &descriptor.hooks.reference {
                let known = compiled
                    .get(descriptor.unit.as_str())
                    .is_some_and(|unit| unit.function(function).is_some());
                if !known {
                    out.push(format!(
                        "{id}: no reference implementation of {}.{function}",
                        descriptor.unit
                    ));
                }
            }
            if let Some(function) = criterion.predicate.logged_function() {
                if !descriptor.hooks.log.contains_key(function) {
                    out.push(format!("{id}: invocations of {function} are not logged"));
                }
            }
            for dep in &criterion.descriptor.depends_on {
                if dep == id {
                    out.push(format!("{id}: depends on itself"));
                } else if !seen.contains(dep.as_str()) {
                    // Unknown ids and forward references both land here.
                    out.push(format!("{id}: dependency {dep} is not an earlier criterion"));
                }
            }
            for problem in criterion.predicate.violations() {
                out.push(format!("{id}: {problem}"));
            }
            if !seen.insert(id) {
                out.push(format!("duplicate criterion id {id}"));
            }
        }
        out
    }

    /// Validate and freeze into a [`Rubric`].
    pub fn seal(self) -> Result<Rubric> {
        let violations = self.violations();
        if !violations.is_empty() {
            return Err(GradeError::InvalidRubric {
                assignment_id: self.assignment_id,
                violations,
            });
        }
        let digest = content_digest(&self.criteria, &self.reference)?;
        Ok(Rubric {
            assignment_id: self.assignment_id,
            version: self.version,
            criteria: self.criteria,
            reference: self.reference,
            digest,
        })
    }
}

fn content_digest(criteria: &[Criterion], reference: &BTreeMap<String, String>) -> Result<String> {
    // Rubrics without references keep the criteria-only digest.
    let digest = if reference.is_empty() {
        ContentDigest::of_json(&criteria)?
    } else {
        ContentDigest::of_json(&(criteria, reference))?
    };
    Ok(digest.to_string())
}

impl Rubric {
    pub fn assignment_id(&self) -> &str {
        &self.assignment_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// SHA-256 over the canonical JSON of the criteria and references.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// All criteria in rubric order, disabled included.
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Enabled criteria in rubric order.
    pub fn enabled_criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|c| c.enabled)
    }

    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.id == id)
    }

    /// Reference sources by unit name.
    pub fn reference(&self) -> &BTreeMap<String, String> {
        &self.reference
    }

    /// Compile every reference unit.
    pub fn reference_units(&self) -> Result<HashMap<String, Unit>> {
        self.reference
            .iter()
            .map(|(name, source)| {
                compile_unit(name, source)
                    .map(|unit| (name.clone(), unit))
                    .map_err(|e| GradeError::InvalidRubric {
                        assignment_id: self.assignment_id.clone(),
                        violations: vec![format!("reference {e}")],
                    })
            })
            .collect()
    }

    /// Sum of enabled weights, the normalisation denominator.
    pub fn enabled_weight(&self) -> f64 {
        self.enabled_criteria().map(|c| c.weight).sum()
    }

    /// Recompute the digest and compare with the stored one.
    pub fn verify_digest(&self) -> Result<()> {
        let actual = content_digest(&self.criteria, &self.reference)?;
        if actual != self.digest {
            return Err(GradeError::DigestMismatch {
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(id: &str, deps: &[&str]) -> Criterion {
        Criterion {
            id: id.to_string(),
            weight: 1.0,
            timeout_ms: 1000,
            descriptor: ExecutionDescriptor {
                unit: "main".to_string(),
                entry: "main".to_string(),
                args: vec![],
                gui: false,
                depends_on: deps.iter().map(|d| d.to_string()).collect(),
                hooks: ExecutionHooks::default(),
            },
            predicate: Predicate::ExactMatch {
                expected: "ok".to_string(),
            },
            enabled: true,
            scoring: Scoring::Partial,
        }
    }

    fn draft(criteria: Vec<Criterion>) -> RubricDraft {
        RubricDraft {
            assignment_id: "hexgrid".to_string(),
            version: 1,
            criteria,
            reference: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_draft_seals_with_digest() {
        let rubric = draft(vec![criterion("a", &[]), criterion("b", &["a"])])
            .seal()
            .unwrap();
        assert_eq!(rubric.digest().len(), 64);
        assert_eq!(rubric.enabled_weight(), 2.0);
        rubric.verify_digest().unwrap();
    }

    #[test]
    fn digest_depends_on_criteria() {
        let a = draft(vec![criterion("a", &[])]).seal().unwrap();
        let mut c = criterion("a", &[]);
        c.weight = 2.0;
        let b = draft(vec![c]).seal().unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = draft(vec![criterion("a", &[]), criterion("a", &[])])
            .seal()
            .unwrap_err();
        match err {
            GradeError::InvalidRubric { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("duplicate")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn forward_and_unknown_dependencies_rejected() {
        let forward = draft(vec![criterion("a", &["b"]), criterion("b", &[])]);
        assert_eq!(forward.violations().len(), 1);

        let unknown = draft(vec![criterion("a", &["ghost"])]);
        assert_eq!(unknown.violations().len(), 1);

        let itself = draft(vec![criterion("a", &["a"])]);
        assert!(itself.violations()[0].contains("itself"));
    }

    #[test]
    fn bad_weight_and_timeout_rejected() {
        let mut neg = criterion("a", &[]);
        neg.weight = -1.0;
        let mut nan = criterion("b", &[]);
        nan.weight = f64::NAN;
        let mut zero = criterion("c", &[]);
        zero.timeout_ms = 0;
        let mut short = criterion("d", &[]);
        short.timeout_ms = MIN_TIMEOUT_MS - 1;
        let problems = draft(vec![neg, nan, zero, short]).violations();
        assert_eq!(problems.len(), 4);
        assert!(problems[3].contains("timeout_ms must be >= 50"));

        let mut floor = criterion("e", &[]);
        floor.timeout_ms = MIN_TIMEOUT_MS;
        assert!(draft(vec![floor]).violations().is_empty());
    }

    #[test]
    fn structure_criteria_need_no_entry() {
        let mut c = criterion("shape", &[]);
        c.descriptor.entry.clear();
        c.predicate = Predicate::Structure {
            functions: vec![crate::domain::RequiredFunction {
                name: "area".to_string(),
                locals: None,
                calls: vec![],
            }],
        };
        assert!(draft(vec![c.clone()]).violations().is_empty());

        c.predicate = Predicate::ExactMatch {
            expected: "ok".to_string(),
        };
        assert!(draft(vec![c]).violations()[0].contains("entry function"));
    }

    #[test]
    fn hook_targets_checked_against_references() {
        let mut delegated = criterion("a", &[]);
        delegated.descriptor.hooks.reference.insert("abs".to_string());
        delegated.descriptor.hooks.reference.insert("ghost".to_string());

        let mut logged = criterion("b", &[]);
        logged.predicate = Predicate::Custom {
            check: crate::domain::CustomCheck::Invocations {
                function: "abs".to_string(),
                count: Some(1),
                operands: vec![],
            },
        };

        let mut d = draft(vec![delegated, logged]);
        d.reference
            .insert("main".to_string(), "fn abs\n  arg 0\nend\n".to_string());
        d.reference.insert("broken".to_string(), "fn\n".to_string());
        let problems = d.violations();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(problems[0].starts_with("reference broken:1:"));
        assert!(problems[1].contains("no reference implementation of main.ghost"));
        assert!(problems[2].contains("invocations of abs are not logged"));
    }

    #[test]
    fn references_change_digest_and_compile_on_demand() {
        let plain = draft(vec![criterion("a", &[])]).seal().unwrap();
        let mut d = draft(vec![criterion("a", &[])]);
        d.reference
            .insert("main".to_string(), "fn abs\n  arg 0\nend\n".to_string());
        let with_ref = d.seal().unwrap();
        assert_ne!(plain.digest(), with_ref.digest());
        with_ref.verify_digest().unwrap();

        let units = with_ref.reference_units().unwrap();
        assert!(units["main"].function("abs").is_some());
        assert!(plain.reference_units().unwrap().is_empty());
    }

    #[test]
    fn all_or_nothing_from_toml() {
        let text = r#"
assignment_id = "hexgrid"
version = 1

[[criteria]]
id = "strict"
weight = 2.0
timeout_ms = 500
scoring = "all_or_nothing"
predicate = { kind = "exact_match", expected = "1" }
descriptor = { unit = "main", entry = "main", hooks = { log = { abs = 1 } } }
"#;
        let draft = RubricDraft::from_toml_str(text).unwrap();
        assert_eq!(draft.criteria[0].scoring, Scoring::AllOrNothing);
        assert_eq!(draft.criteria[0].descriptor.hooks.log["abs"], 1);
    }

    #[test]
    fn disabled_criteria_leave_enabled_weight() {
        let mut off = criterion("b", &[]);
        off.enabled = false;
        off.weight = 5.0;
        let rubric = draft(vec![criterion("a", &[]), off]).seal().unwrap();
        assert_eq!(rubric.enabled_weight(), 1.0);
        assert_eq!(rubric.enabled_criteria().count(), 1);
        assert_eq!(rubric.criteria().len(), 2);
    }

    #[test]
    fn tampered_snapshot_fails_digest_check() {
        let rubric = draft(vec![criterion("a", &[])]).seal().unwrap();
        let mut value = serde_json::to_value(&rubric).unwrap();
        value["criteria"][0]["weight"] = serde_json::json!(9.0);
        let tampered: Rubric = serde_json::from_value(value).unwrap();
        assert!(matches!(
            tampered.verify_digest(),
            Err(GradeError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn draft_from_toml() {
        let text = r#"
assignment_id = "hexgrid"
version = 3

[[criteria]]
id = "sum"
weight = 1.0
timeout_ms = 500
predicate = { kind = "exact_match", expected = "3" }

[criteria.descriptor]
unit = "main"
entry = "sum"
args = ["1", "2"]
"#;
        let draft = RubricDraft::from_toml_str(text).unwrap();
        assert_eq!(draft.version, 3);
        assert!(draft.criteria[0].enabled);
        assert_eq!(draft.criteria[0].descriptor.args, vec!["1", "2"]);
        draft.seal().unwrap();
    }
}
