//! Decision fusion
//!
//! Turns the per-agent outcomes of one dispatch into a single
//! identified / ambiguous / unknown verdict. Pure and deterministic: no I/O,
//! no clock, no shared state.
//!
//! # Algorithm
//!
//! 1. Keep outcomes with `score > 0.0` (failed agents carry 0.0 and drop out).
//! 2. Stable-sort descending by score; the first five become `candidates`.
//! 3. No candidates → `unknown` with identity `{null, 0.0}`.
//! 4. `max < threshold` → `unknown` with identity `{null, max}`.
//! 5. `max - runner_up > margin` → `identified`, otherwise `ambiguous`. Both
//!    report the top candidate as identity.

use crate::types::{AgentOutcome, Candidate, Decision, FusionVerdict, Identity};
use serde::{Deserialize, Serialize};

/// Maximum number of candidates reported in a verdict.
pub const MAX_CANDIDATES: usize = 5;

/// Global threshold/margin pair applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionPolicy {
    /// Minimum top score required to identify anyone.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Minimum gap between the top two scores for an unambiguous match.
    #[serde(default = "default_margin")]
    pub margin: f64,
}

fn default_threshold() -> f64 {
    0.75
}

fn default_margin() -> f64 {
    0.10
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            margin: default_margin(),
        }
    }
}

impl FusionPolicy {
    pub fn new(threshold: f64, margin: f64) -> Self {
        Self { threshold, margin }
    }
}

/// Fuse agent outcomes into a verdict.
pub fn fuse(outcomes: &[AgentOutcome], policy: &FusionPolicy) -> FusionVerdict {
    let mut ranked: Vec<&AgentOutcome> = outcomes.iter().filter(|o| o.score > 0.0).collect();
    // sort_by is stable, so equal scores keep dispatch order
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let candidates: Vec<Candidate> = ranked
        .iter()
        .take(MAX_CANDIDATES)
        .map(|o| Candidate {
            name: o.agent_name.clone(),
            score: o.score,
        })
        .collect();

    let Some(top) = ranked.first() else {
        return FusionVerdict {
            decision: Decision::Unknown,
            identity: Identity {
                name: None,
                score: 0.0,
            },
            candidates,
        };
    };

    let max = top.score;
    let runner_up = ranked.get(1).map(|o| o.score).unwrap_or(0.0);

    let (decision, identity) = if max < policy.threshold {
        (
            Decision::Unknown,
            Identity {
                name: None,
                score: max,
            },
        )
    } else {
        let decision = if (max - runner_up) > policy.margin {
            Decision::Identified
        } else {
            Decision::Ambiguous
        };
        (
            decision,
            Identity {
                name: Some(top.agent_name.clone()),
                score: max,
            },
        )
    };

    FusionVerdict {
        decision,
        identity,
        candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureReason;
    use rstest::rstest;

    fn scored(pairs: &[(&str, f64)]) -> Vec<AgentOutcome> {
        pairs
            .iter()
            .map(|(name, score)| {
                AgentOutcome::success(*name, *score, serde_json::json!({ "score": score }), 1.0)
            })
            .collect()
    }

    #[test]
    fn test_empty_outcomes_are_unknown() {
        let verdict = fuse(&[], &FusionPolicy::default());
        assert_eq!(verdict.decision, Decision::Unknown);
        assert_eq!(verdict.identity.name, None);
        assert_eq!(verdict.identity.score, 0.0);
        assert!(verdict.candidates.is_empty());
    }

    #[test]
    fn test_clear_winner_is_identified() {
        let outcomes = scored(&[("Ana", 0.90), ("Luis", 0.40), ("Pedro", 0.10)]);
        let verdict = fuse(&outcomes, &FusionPolicy::default());

        assert_eq!(verdict.decision, Decision::Identified);
        assert_eq!(verdict.identity.name.as_deref(), Some("Ana"));
        assert_eq!(verdict.identity.score, 0.90);
        let names: Vec<&str> = verdict.candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Luis", "Pedro"]);
    }

    #[test]
    fn test_close_race_is_ambiguous() {
        let outcomes = scored(&[("Luis", 0.80), ("Ana", 0.85)]);
        let verdict = fuse(&outcomes, &FusionPolicy::default());

        assert_eq!(verdict.decision, Decision::Ambiguous);
        assert_eq!(verdict.identity.name.as_deref(), Some("Ana"));
        assert_eq!(verdict.identity.score, 0.85);
    }

    #[test]
    fn test_low_scores_surface_max_without_name() {
        let outcomes = scored(&[("Ana", 0.60), ("Luis", 0.50)]);
        let verdict = fuse(&outcomes, &FusionPolicy::default());

        assert_eq!(verdict.decision, Decision::Unknown);
        assert_eq!(verdict.identity.name, None);
        assert_eq!(verdict.identity.score, 0.60);
        assert_eq!(verdict.candidates.len(), 2);
    }

    #[test]
    fn test_failed_agents_are_excluded_from_candidacy() {
        let mut outcomes = scored(&[("Ana", 0.92)]);
        outcomes.push(AgentOutcome::failed("Luis", FailureReason::Timeout, 3000.0));
        let verdict = fuse(&outcomes, &FusionPolicy::default());

        assert_eq!(verdict.decision, Decision::Identified);
        assert_eq!(verdict.candidates.len(), 1);
        assert_eq!(verdict.candidates[0].name, "Ana");
    }

    #[test]
    fn test_all_failed_is_unknown_with_zero_score() {
        let outcomes = vec![
            AgentOutcome::failed("Ana", FailureReason::BadStatus, 4.0),
            AgentOutcome::failed("Luis", FailureReason::TransportError, 2.0),
        ];
        let verdict = fuse(&outcomes, &FusionPolicy::default());
        assert_eq!(verdict.decision, Decision::Unknown);
        assert_eq!(verdict.identity.score, 0.0);
        assert!(verdict.candidates.is_empty());
    }

    #[test]
    fn test_single_agent_above_threshold_uses_zero_runner_up() {
        let outcomes = scored(&[("Ana", 0.80)]);
        let verdict = fuse(&outcomes, &FusionPolicy::default());
        assert_eq!(verdict.decision, Decision::Identified);
    }

    #[test]
    fn test_candidates_capped_and_sorted() {
        let outcomes = scored(&[
            ("a", 0.10),
            ("b", 0.70),
            ("c", 0.30),
            ("d", 0.90),
            ("e", 0.50),
            ("f", 0.20),
            ("g", 0.60),
        ]);
        let verdict = fuse(&outcomes, &FusionPolicy::default());

        assert_eq!(verdict.candidates.len(), MAX_CANDIDATES);
        assert!(
            verdict
                .candidates
                .windows(2)
                .all(|w| w[0].score >= w[1].score)
        );
        assert_eq!(verdict.candidates[0].name, "d");
        assert_eq!(verdict.candidates[4].name, "c");
    }

    #[test]
    fn test_ties_keep_dispatch_order() {
        let outcomes = scored(&[("first", 0.9), ("second", 0.9)]);
        let verdict = fuse(&outcomes, &FusionPolicy::default());
        assert_eq!(verdict.decision, Decision::Ambiguous);
        assert_eq!(verdict.identity.name.as_deref(), Some("first"));
    }

    #[rstest]
    #[case(&[("a", 0.95), ("b", 0.70)], 0.75, 0.10, Decision::Identified)]
    #[case(&[("a", 0.95), ("b", 0.90)], 0.75, 0.10, Decision::Ambiguous)]
    #[case(&[("a", 0.74)], 0.75, 0.10, Decision::Unknown)]
    #[case(&[("a", 0.75)], 0.75, 0.10, Decision::Identified)]
    #[case(&[("a", 0.60), ("b", 0.20)], 0.50, 0.30, Decision::Identified)]
    #[case(&[("a", 0.60), ("b", 0.40)], 0.50, 0.30, Decision::Ambiguous)]
    fn test_policy_table(
        #[case] pairs: &[(&str, f64)],
        #[case] threshold: f64,
        #[case] margin: f64,
        #[case] expected: Decision,
    ) {
        let verdict = fuse(&scored(pairs), &FusionPolicy::new(threshold, margin));
        assert_eq!(verdict.decision, expected);
        if expected == Decision::Unknown {
            assert!(verdict.identity.name.is_none());
        } else {
            assert_eq!(verdict.identity.name.as_deref(), Some("a"));
        }
    }
}
