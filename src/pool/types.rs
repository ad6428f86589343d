use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Working,
    Error,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// An agent that can execute tasks. Serializable; any live process handle
/// lives in the pool, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub state: AgentState,
    pub current_task: Option<String>,
    pub branch_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub total_execution_secs: f64,
}

impl Agent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: AgentState::Idle,
            current_task: None,
            branch_name: None,
            created_at: Utc::now(),
            last_heartbeat: Utc::now(),
            completed_tasks: 0,
            failed_tasks: 0,
            total_execution_secs: 0.0,
        }
    }
}

/// A unit of work executed by an agent as a subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub command: Vec<String>,
    pub working_directory: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    pub timeout_secs: u64,
    /// 1-10, higher dispatches first
    pub priority: u8,
    /// 1-10, effort estimate
    pub complexity: u8,
    pub status: TaskStatus,
    pub assigned_agent: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    pub exit_code: Option<i32>,
}

impl Task {
    pub fn new(title: impl Into<String>, command: Vec<String>, working_directory: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            command,
            working_directory: working_directory.into(),
            environment: HashMap::new(),
            timeout_secs: 300,
            priority: 5,
            complexity: 5,
            status: TaskStatus::Pending,
            assigned_agent: None,
            start_time: None,
            end_time: None,
            output: String::new(),
            error: String::new(),
            exit_code: None,
        }
    }
}
