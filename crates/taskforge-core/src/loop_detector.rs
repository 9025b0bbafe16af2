//! Loop Detector: counts step iterations and response similarity, emitting
//! actions the Leader loop uses to defend against livelock.
//!
//! No teacher module owns this shape directly; it follows the design note
//! in spec.md §9 ("no shared mutable globals — these are fields of an
//! explicit value created by the Leader loop") and the corpus convention
//! of wrapping a small state machine as an owned struct with `&mut self`
//! transitions (e.g. `hitl_controls::engine`'s checkpoint evaluation).

use std::collections::HashMap;

use crate::domain::EscalationTarget;

#[derive(Debug, Clone, PartialEq)]
pub enum LoopDetectionResult {
    Ok,
    StepIterationExceeded { step: String, n: u32, max: u32 },
    SimilarResponse { step: String, similarity: f64 },
    TransitionPattern { occurrences: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopAction {
    Ok,
    Abort { reason: String },
    Escalate { target: EscalationTarget },
    ForceContinue { warning: Option<String> },
    RetryWithHint { hint: String },
}

#[derive(Debug, Clone)]
pub struct LoopDetectorConfig {
    pub similarity_threshold: f64,
    pub max_step_iterations: u32,
    pub transition_pattern_window: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            max_step_iterations: 10,
            transition_pattern_window: 6,
        }
    }
}

#[derive(Default)]
struct StepHistory {
    iterations: u32,
    responses: Vec<String>,
}

/// Per-session/per-run livelock defense. Created fresh by the Leader loop
/// for each `LeaderSession` — never a module-level cache.
pub struct LoopDetector {
    config: LoopDetectorConfig,
    steps: HashMap<String, StepHistory>,
    transitions: Vec<(String, String, String)>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            steps: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    pub fn record_step_execution(&mut self, step: &str) -> LoopDetectionResult {
        let entry = self.steps.entry(step.to_string()).or_default();
        entry.iterations += 1;
        if entry.iterations > self.config.max_step_iterations {
            return LoopDetectionResult::StepIterationExceeded {
                step: step.to_string(),
                n: entry.iterations,
                max: self.config.max_step_iterations,
            };
        }
        LoopDetectionResult::Ok
    }

    /// Record a response and check it against the step's history. The
    /// same `(step, text)` recorded twice in a row yields
    /// `SimilarResponse` on the second call.
    pub fn record_response(&mut self, step: &str, text: &str) -> LoopDetectionResult {
        let entry = self.steps.entry(step.to_string()).or_default();
        let mut max_similarity = 0.0_f64;
        for prior in &entry.responses {
            let sim = jaccard_shingle_similarity(prior, text, 3);
            if sim > max_similarity {
                max_similarity = sim;
            }
        }
        entry.responses.push(text.to_string());
        if max_similarity > self.config.similarity_threshold {
            return LoopDetectionResult::SimilarResponse {
                step: step.to_string(),
                similarity: max_similarity,
            };
        }
        LoopDetectionResult::Ok
    }

    pub fn record_transition(&mut self, from: &str, to: &str, reason: &str) -> LoopDetectionResult {
        self.transitions
            .push((from.to_string(), to.to_string(), reason.to_string()));
        let window = self.config.transition_pattern_window.min(self.transitions.len());
        let recent = &self.transitions[self.transitions.len() - window..];
        let occurrences = recent
            .iter()
            .filter(|(f, t, _)| f == from && t == to)
            .count() as u32;
        if occurrences >= 3 {
            return LoopDetectionResult::TransitionPattern { occurrences };
        }
        LoopDetectionResult::Ok
    }

    /// Map a detection result to the action the caller should take.
    pub fn action_for(&self, result: &LoopDetectionResult) -> LoopAction {
        match result {
            LoopDetectionResult::Ok => LoopAction::Ok,
            LoopDetectionResult::StepIterationExceeded { step, n, max } => LoopAction::Abort {
                reason: format!("step '{step}' exceeded {max} iterations (reached {n})"),
            },
            LoopDetectionResult::SimilarResponse { step, similarity } => LoopAction::RetryWithHint {
                hint: format!(
                    "the response for step '{step}' repeated near-identically (similarity {similarity:.2}); try a materially different approach"
                ),
            },
            LoopDetectionResult::TransitionPattern { occurrences } => LoopAction::Escalate {
                target: if *occurrences >= 5 {
                    EscalationTarget::User
                } else {
                    EscalationTarget::Planner
                },
            },
        }
    }
}

/// Normalized string distance via k-shingle Jaccard index.
fn jaccard_shingle_similarity(a: &str, b: &str, k: usize) -> f64 {
    if a == b {
        return 1.0;
    }
    let shingles = |s: &str| -> std::collections::HashSet<String> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < k {
            return std::iter::once(s.to_string()).collect();
        }
        (0..=chars.len() - k)
            .map(|i| chars[i..i + k].iter().collect())
            .collect()
    };
    let sa = shingles(a);
    let sb = shingles(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_iteration_under_max_is_ok() {
        let mut detector = LoopDetector::new(LoopDetectorConfig {
            max_step_iterations: 3,
            ..Default::default()
        });
        assert_eq!(detector.record_step_execution("plan"), LoopDetectionResult::Ok);
        assert_eq!(detector.record_step_execution("plan"), LoopDetectionResult::Ok);
    }

    #[test]
    fn step_iteration_exceeded_past_max() {
        let mut detector = LoopDetector::new(LoopDetectorConfig {
            max_step_iterations: 2,
            ..Default::default()
        });
        detector.record_step_execution("plan");
        detector.record_step_execution("plan");
        let result = detector.record_step_execution("plan");
        assert!(matches!(
            result,
            LoopDetectionResult::StepIterationExceeded { n: 3, max: 2, .. }
        ));
    }

    #[test]
    fn identical_response_twice_is_flagged_similar() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        assert_eq!(
            detector.record_response("judge", "same text every time"),
            LoopDetectionResult::Ok
        );
        let result = detector.record_response("judge", "same text every time");
        assert!(matches!(result, LoopDetectionResult::SimilarResponse { .. }));
    }

    #[test]
    fn distinct_responses_are_not_flagged() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        detector.record_response("judge", "alpha beta gamma delta");
        let result = detector.record_response("judge", "completely unrelated wording here");
        assert_eq!(result, LoopDetectionResult::Ok);
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let sim = jaccard_shingle_similarity("hello world", "hello world", 3);
        assert!((sim - 1.0).abs() < f64::EPSILON);
        let sim2 = jaccard_shingle_similarity("hello world", "goodbye moon", 3);
        assert!((0.0..1.0).contains(&sim2));
    }

    #[test]
    fn repeated_transition_triggers_pattern_action() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        detector.record_transition("READY", "RUNNING", "claimed");
        detector.record_transition("RUNNING", "READY", "continuation");
        detector.record_transition("READY", "RUNNING", "claimed");
        detector.record_transition("RUNNING", "READY", "continuation");
        detector.record_transition("READY", "RUNNING", "claimed");
        let result = detector.record_transition("RUNNING", "READY", "continuation");
        assert!(matches!(result, LoopDetectionResult::TransitionPattern { .. }));
    }

    #[test]
    fn action_for_step_exceeded_is_abort() {
        let detector = LoopDetector::new(LoopDetectorConfig::default());
        let action = detector.action_for(&LoopDetectionResult::StepIterationExceeded {
            step: "plan".into(),
            n: 11,
            max: 10,
        });
        assert!(matches!(action, LoopAction::Abort { .. }));
    }
}
