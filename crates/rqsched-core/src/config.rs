//! rqsched.toml configuration parser and the optimizer goal payload.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TaskClass, TaskDescriptor, TaskStrategy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("query interval must be greater than zero")]
    ZeroInterval,
    #[error("invalid task {name}: {reason}")]
    InvalidTask { name: String, reason: String },
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),
    #[error("malformed goal payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Which optimization the poll loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    #[default]
    None,
    Fairness,
    Utilization,
}

/// Strategy parameters installed through `set_goal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalConfig {
    pub goal: Goal,
    /// Maximum tolerated spread of fairness values on one core.
    #[serde(default = "default_accept")]
    pub accept: u32,
    /// Poll loop interval in milliseconds.
    #[serde(default = "default_query_intervall_ms")]
    pub query_intervall_ms: u64,
}

fn default_accept() -> u32 {
    5
}

fn default_query_intervall_ms() -> u64 {
    1000
}

impl Default for GoalConfig {
    fn default() -> Self {
        Self {
            goal: Goal::None,
            accept: default_accept(),
            query_intervall_ms: default_query_intervall_ms(),
        }
    }
}

impl GoalConfig {
    /// Parse and validate a JSON goal payload.
    pub fn from_json(payload: &str) -> Result<Self, ConfigError> {
        let config: GoalConfig = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_intervall_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn query_intervall(&self) -> Duration {
        Duration::from_millis(self.query_intervall_ms)
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub controller: ControllerSection,
    #[serde(default)]
    pub goal: GoalConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Physical core count; probed from the monitor when absent.
    pub num_pcores: Option<usize>,
    pub num_rqs: usize,
    #[serde(default = "default_rip_list_capacity")]
    pub rip_list_capacity: usize,
    #[serde(default = "default_max_rq_depth")]
    pub max_rq_depth: usize,
}

fn default_rip_list_capacity() -> usize {
    256
}

fn default_max_rq_depth() -> usize {
    64
}

/// A task declared in the config file, allocated at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub foc_id: u32,
    pub inter_arrival_ms: u64,
    pub deadline_ms: u64,
    #[serde(default)]
    pub wcet_ms: u64,
    #[serde(default)]
    pub prio: u32,
    #[serde(default)]
    pub task_class: TaskClass,
    #[serde(default)]
    pub task_strategy: TaskStrategy,
}

impl TaskConfig {
    pub fn to_descriptor(&self, task_id: u32) -> TaskDescriptor {
        TaskDescriptor {
            name: self.name.clone(),
            task_id,
            foc_id: self.foc_id,
            inter_arrival: Duration::from_millis(self.inter_arrival_ms),
            deadline: Duration::from_millis(self.deadline_ms),
            wcet: Duration::from_millis(self.wcet_ms),
            prio: self.prio,
            task_class: self.task_class,
            task_strategy: self.task_strategy,
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.goal.validate()?;

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.inter_arrival_ms == 0 {
                return Err(ConfigError::InvalidTask {
                    name: task.name.clone(),
                    reason: "inter_arrival_ms must be greater than zero".to_string(),
                });
            }
            if task.deadline_ms == 0 {
                return Err(ConfigError::InvalidTask {
                    name: task.name.clone(),
                    reason: "deadline_ms must be greater than zero".to_string(),
                });
            }
            if !seen.insert(task.name.as_str()) {
                return Err(ConfigError::DuplicateTask(task.name.clone()));
            }
        }
        Ok(())
    }

    /// Descriptors for all configured tasks, numbered in file order.
    pub fn task_descriptors(&self) -> Vec<TaskDescriptor> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(i, t)| t.to_descriptor(i as u32))
            .collect()
    }

    /// A minimal four-core config with no tasks.
    pub fn scaffold() -> Self {
        ControllerConfig {
            controller: ControllerSection {
                num_pcores: Some(4),
                num_rqs: 4,
                rip_list_capacity: default_rip_list_capacity(),
                max_rq_depth: default_max_rq_depth(),
            },
            goal: GoalConfig::default(),
            tasks: Vec::new(),
        }
    }
}
