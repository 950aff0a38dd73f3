//! Optimization strategies.
//!
//! One implementation per [`Goal`]; the optimizer swaps the active one on
//! `set_goal` without touching the task lifecycle code. A strategy runs once
//! per poll tick, after the rip-list analyzer has updated every task.

use serde::Serialize;

use rqsched_core::{CoreId, Goal, GoalConfig};

use crate::fairness::FairnessStrategy;
use crate::state::EngineState;
use crate::utilization::UtilizationStrategy;

/// A core migration decided during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub task: String,
    pub from: CoreId,
    pub to: CoreId,
}

pub trait Strategy: Send {
    fn goal(&self) -> Goal;

    /// Whether an overloaded core refuses new job starts.
    fn blocks_overloaded_start(&self) -> bool {
        false
    }

    /// Update per-task metrics and migrate tasks. `online` has one entry per
    /// core.
    fn optimize(&mut self, state: &mut EngineState, online: &[bool]) -> Vec<Migration>;
}

/// Build the strategy for a goal config.
pub fn strategy_for(config: &GoalConfig) -> Box<dyn Strategy> {
    match config.goal {
        Goal::None => Box::new(NoOptimization),
        Goal::Fairness => Box::new(FairnessStrategy::new(config.accept)),
        Goal::Utilization => Box::new(UtilizationStrategy),
    }
}

/// `Goal::None`: no migrations; `to_schedule` follows arrival times only.
pub struct NoOptimization;

impl Strategy for NoOptimization {
    fn goal(&self) -> Goal {
        Goal::None
    }

    fn optimize(&mut self, state: &mut EngineState, _online: &[bool]) -> Vec<Migration> {
        state.clear_overload();
        Vec::new()
    }
}
