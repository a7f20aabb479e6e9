//! Result aggregation: outcomes + rubric → [`ScoreReport`].
//!
//! Pure and deterministic. The same outcomes and rubric always produce the
//! same report, including `generated_at`, which is taken from the latest
//! outcome rather than the wall clock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gradebox_state::RunId;

use crate::domain::{
    Criterion, CriterionScore, GradeError, Outcome, OutcomeResult, ReportStatus, Result, Rubric,
    ScoreReport, Scoring, Submission,
};

/// Score a completed run.
///
/// `total_score = Σ weight·credit / Σ enabled weight`, where an
/// all-or-nothing criterion contributes no credit unless it passed. Every enabled
/// criterion needs exactly one outcome; anything else is an error rather
/// than a silently skewed score.
pub fn aggregate(
    submission: &Submission,
    run_id: &RunId,
    outcomes: &[Outcome],
    rubric: &Rubric,
) -> Result<ScoreReport> {
    let total_weight = nonempty_weight(rubric)?;

    let mut by_id: HashMap<&str, &Outcome> = HashMap::with_capacity(outcomes.len());
    for outcome in outcomes {
        let id = outcome.criterion_id.as_str();
        match rubric.criterion(id) {
            Some(c) if c.enabled => {}
            _ => return Err(GradeError::UnexpectedOutcome(id.to_string())),
        }
        if by_id.insert(id, outcome).is_some() {
            return Err(GradeError::DuplicateOutcome(id.to_string()));
        }
    }

    let mut breakdown = Vec::with_capacity(by_id.len());
    let mut earned_weight = 0.0;
    for criterion in rubric.enabled_criteria() {
        let outcome = by_id
            .get(criterion.id.as_str())
            .ok_or_else(|| GradeError::MissingOutcome(criterion.id.clone()))?;
        let credit = credit_of(criterion, outcome);
        let earned = criterion.weight * credit;
        earned_weight += earned;
        breakdown.push(CriterionScore {
            criterion_id: criterion.id.clone(),
            weight: criterion.weight,
            result: outcome.result,
            credit,
            earned,
            reason: outcome.reason,
            elapsed_ms: outcome.elapsed_ms,
            diagnostic: outcome.diagnostic.clone(),
        });
    }

    let generated_at = outcomes
        .iter()
        .map(|o| o.finished_at)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Ok(ScoreReport {
        submission_id: submission.id,
        run_id: run_id.clone(),
        assignment_id: rubric.assignment_id().to_string(),
        rubric_version: rubric.version(),
        rubric_digest: rubric.digest().to_string(),
        status: ReportStatus::Graded,
        total_score: earned_weight / total_weight,
        earned_weight,
        total_weight,
        breakdown,
        failure: None,
        generated_at,
    })
}

/// Report for a run whose units did not compile: score 0, no breakdown.
pub fn compile_failure_report(
    submission: &Submission,
    run_id: &RunId,
    rubric: &Rubric,
    diagnostic: String,
) -> ScoreReport {
    ScoreReport {
        submission_id: submission.id,
        run_id: run_id.clone(),
        assignment_id: rubric.assignment_id().to_string(),
        rubric_version: rubric.version(),
        rubric_digest: rubric.digest().to_string(),
        status: ReportStatus::Failed,
        total_score: 0.0,
        earned_weight: 0.0,
        total_weight: rubric.enabled_weight(),
        breakdown: Vec::new(),
        failure: Some(diagnostic),
        generated_at: Utc::now(),
    }
}

/// Enabled weight, or `EmptyRubric` when nothing can be scored.
pub fn nonempty_weight(rubric: &Rubric) -> Result<f64> {
    let total = rubric.enabled_weight();
    if total > 0.0 {
        Ok(total)
    } else {
        Err(GradeError::EmptyRubric {
            assignment_id: rubric.assignment_id().to_string(),
            version: rubric.version(),
        })
    }
}

fn credit_of(criterion: &Criterion, outcome: &Outcome) -> f64 {
    match outcome.result {
        OutcomeResult::Pass => 1.0,
        OutcomeResult::Fail if criterion.scoring == Scoring::AllOrNothing => 0.0,
        OutcomeResult::Fail => outcome.credit,
        OutcomeResult::Timeout | OutcomeResult::Error => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomCheck, ExecutionDescriptor, Predicate, ReasonCode, RubricDraft};
    use std::collections::BTreeMap;

    fn criterion(id: &str, weight: f64, enabled: bool) -> Criterion {
        Criterion {
            id: id.to_string(),
            weight,
            timeout_ms: 1000,
            descriptor: ExecutionDescriptor {
                unit: "main".to_string(),
                entry: "main".to_string(),
                args: vec![],
                gui: false,
                depends_on: vec![],
                hooks: Default::default(),
            },
            predicate: Predicate::Custom {
                check: CustomCheck::LineFraction {
                    expected_lines: vec!["x".to_string()],
                },
            },
            enabled,
            scoring: Scoring::Partial,
        }
    }

    fn rubric(criteria: Vec<Criterion>) -> Rubric {
        RubricDraft {
            assignment_id: "hexgrid".to_string(),
            version: 3,
            criteria,
            reference: BTreeMap::new(),
        }
        .seal()
        .unwrap()
    }

    fn submission() -> Submission {
        Submission::new("alice", "hexgrid", BTreeMap::new())
    }

    fn worked_example() -> (Rubric, Vec<Outcome>) {
        let rubric = rubric(vec![
            criterion("A", 1.0, true),
            criterion("B", 1.0, true),
            criterion("C", 2.0, true),
        ]);
        let outcomes = vec![
            Outcome::pass("A", 4),
            Outcome::fail("B", 0.0, 5, "mismatch"),
            Outcome::fail("C", 0.5, 6, "half the lines"),
        ];
        (rubric, outcomes)
    }

    #[test]
    fn all_or_nothing_drops_partial_credit() {
        let mut strict = criterion("C", 2.0, true);
        strict.scoring = Scoring::AllOrNothing;
        let rubric = rubric(vec![criterion("A", 1.0, true), strict]);
        let outcomes = vec![
            Outcome::fail("A", 0.5, 4, "half"),
            Outcome::fail("C", 0.5, 5, "half"),
        ];
        let report = aggregate(&submission(), &RunId::new(), &outcomes, &rubric).unwrap();
        assert_eq!(report.breakdown[0].earned, 0.5);
        assert_eq!(report.breakdown[1].credit, 0.0);
        assert_eq!(report.breakdown[1].earned, 0.0);
        assert!((report.total_score - 0.5 / 3.0).abs() < 1e-12);

        let passed = vec![Outcome::fail("A", 0.5, 4, "half"), Outcome::pass("C", 5)];
        let report = aggregate(&submission(), &RunId::new(), &passed, &rubric).unwrap();
        assert_eq!(report.breakdown[1].earned, 2.0);
    }

    #[test]
    fn worked_example_scores_half() {
        let (rubric, outcomes) = worked_example();
        let report = aggregate(&submission(), &RunId::new(), &outcomes, &rubric).unwrap();
        assert_eq!(report.total_weight, 4.0);
        assert_eq!(report.earned_weight, 2.0);
        assert!((report.total_score - 0.5).abs() < 1e-12);
        assert_eq!(report.status, ReportStatus::Graded);
        assert_eq!(report.rubric_version, 3);
        let ids: Vec<_> = report.breakdown.iter().map(|s| s.criterion_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(report.breakdown[2].earned, 1.0);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let (rubric, outcomes) = worked_example();
        let sub = submission();
        let run = RunId::new();
        let first = aggregate(&sub, &run, &outcomes, &rubric).unwrap();
        let mut shuffled = outcomes.clone();
        shuffled.reverse();
        let second = aggregate(&sub, &run, &shuffled, &rubric).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn timeout_and_error_earn_nothing() {
        let rubric = rubric(vec![criterion("A", 1.0, true), criterion("B", 3.0, true)]);
        let outcomes = vec![
            Outcome::timeout("A", ReasonCode::Checkpoint, 100, ""),
            Outcome::error("B", ReasonCode::Fault, 2, "division by zero"),
        ];
        let report = aggregate(&submission(), &RunId::new(), &outcomes, &rubric).unwrap();
        assert_eq!(report.total_score, 0.0);
        assert_eq!(report.tally(), (0, 0, 1, 1));
    }

    #[test]
    fn disabled_criteria_excluded_from_denominator() {
        let rubric = rubric(vec![criterion("A", 1.0, true), criterion("B", 9.0, false)]);
        let report =
            aggregate(&submission(), &RunId::new(), &[Outcome::pass("A", 1)], &rubric).unwrap();
        assert_eq!(report.total_weight, 1.0);
        assert_eq!(report.total_score, 1.0);
        assert_eq!(report.breakdown.len(), 1);
    }

    #[test]
    fn outcome_for_disabled_criterion_is_rejected() {
        let rubric = rubric(vec![criterion("A", 1.0, true), criterion("B", 1.0, false)]);
        let outcomes = vec![Outcome::pass("A", 1), Outcome::pass("B", 1)];
        let err = aggregate(&submission(), &RunId::new(), &outcomes, &rubric).unwrap_err();
        assert!(matches!(err, GradeError::UnexpectedOutcome(id) if id == "B"));
    }

    #[test]
    fn missing_outcome_is_an_error() {
        let (rubric, mut outcomes) = worked_example();
        outcomes.pop();
        let err = aggregate(&submission(), &RunId::new(), &outcomes, &rubric).unwrap_err();
        assert!(matches!(err, GradeError::MissingOutcome(id) if id == "C"));
    }

    #[test]
    fn duplicate_outcome_is_an_error() {
        let (rubric, mut outcomes) = worked_example();
        outcomes.push(Outcome::pass("A", 1));
        let err = aggregate(&submission(), &RunId::new(), &outcomes, &rubric).unwrap_err();
        assert!(matches!(err, GradeError::DuplicateOutcome(id) if id == "A"));
    }

    #[test]
    fn zero_enabled_weight_is_empty_rubric() {
        let rubric = rubric(vec![criterion("A", 0.0, true), criterion("B", 2.0, false)]);
        let err =
            aggregate(&submission(), &RunId::new(), &[Outcome::pass("A", 1)], &rubric).unwrap_err();
        assert!(matches!(err, GradeError::EmptyRubric { version: 3, .. }));
    }

    #[test]
    fn compile_failure_report_has_no_breakdown() {
        let (rubric, _) = worked_example();
        let report = compile_failure_report(
            &submission(),
            &RunId::new(),
            &rubric,
            "main:3: unknown instruction `pusj`".to_string(),
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.total_score, 0.0);
        assert!(report.breakdown.is_empty());
        assert!(report.failure.as_deref().unwrap().contains("pusj"));
    }
}
