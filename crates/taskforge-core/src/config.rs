//! Configuration: every tunable named across spec.md §5/§8, as an
//! immutable struct with the spec-mandated defaults. Passed down from the
//! CLI layer (clap, `#[arg(long, env)]`) the way `aivcs-cli::main::Cli`
//! derives its global flags — library callers get the same defaults via
//! `Default` without touching the CLI.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLimits {
    pub user: u32,
    pub planner: u32,
    pub logic_validator: u32,
    pub external_advisor: u32,
}

impl Default for EscalationLimits {
    fn default() -> Self {
        Self {
            user: 10,
            planner: 3,
            logic_validator: 5,
            external_advisor: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskforgeConfig {
    pub max_workers: usize,
    pub leader_max_iterations: u32,
    pub similarity_threshold: f64,
    pub escalation_limits: EscalationLimits,
    pub max_quality_retries: u32,
    pub max_consecutive_json_errors: u32,
    pub quality_threshold: u32,
    pub max_replan_iterations: u32,
    pub judgement_max_iterations: u32,
    pub serial_chain_task_retries: u32,
    pub judge_log_budget_bytes: usize,
    pub judge_log_head_bytes: usize,
    pub planning_history_limit: usize,
    pub enhanced_instruction_char_budget: usize,
}

impl Default for TaskforgeConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            leader_max_iterations: 1000,
            similarity_threshold: 0.9,
            escalation_limits: EscalationLimits::default(),
            max_quality_retries: 5,
            max_consecutive_json_errors: 3,
            quality_threshold: 60,
            max_replan_iterations: 3,
            judgement_max_iterations: 3,
            serial_chain_task_retries: 3,
            judge_log_budget_bytes: 150 * 1024,
            judge_log_head_bytes: 10 * 1024,
            planning_history_limit: 100,
            enhanced_instruction_char_budget: 8000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = TaskforgeConfig::default();
        assert_eq!(cfg.max_workers, 1);
        assert_eq!(cfg.leader_max_iterations, 1000);
        assert!((cfg.similarity_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(cfg.escalation_limits.user, 10);
        assert_eq!(cfg.escalation_limits.planner, 3);
        assert_eq!(cfg.escalation_limits.logic_validator, 5);
        assert_eq!(cfg.escalation_limits.external_advisor, 5);
        assert_eq!(cfg.max_quality_retries, 5);
        assert_eq!(cfg.quality_threshold, 60);
        assert_eq!(cfg.max_replan_iterations, 3);
        assert_eq!(cfg.judge_log_budget_bytes, 150 * 1024);
        assert_eq!(cfg.judge_log_head_bytes, 10 * 1024);
    }
}
