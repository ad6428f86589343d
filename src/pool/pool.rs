use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use statig::prelude::*;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::collaboration::AgentDirectory;
use crate::config::PoolConfig;
use crate::error::{PolymergeError, Result};

use super::state_machine::{current_agent_state, AgentLifecycle, LifecycleEvent};
use super::types::{Agent, AgentState, Task, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PoolStateFile {
    agents: Vec<Agent>,
    tasks: Vec<Task>,
    completed_tasks: Vec<String>,
    saved_at: Option<chrono::DateTime<Utc>>,
}

/// Pool-wide status snapshot, readable without an active pool process
/// thanks to the persisted state file.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub running: bool,
    pub total_agents: usize,
    pub idle_agents: usize,
    pub working_agents: usize,
    pub queued_tasks: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
}

#[derive(Debug, Clone)]
struct QueuedTask {
    priority: u8,
    sequence: u64,
    task_id: String,
}

/// Task queue and agent lifecycle manager.
///
/// Tasks dispatch by priority (FIFO within a priority) to idle agents,
/// creating agents on demand up to the configured maximum. Pool state
/// persists as JSON so status can be inspected after a restart; reloaded
/// agents come back idle with no process attached.
pub struct AgentPool {
    config: PoolConfig,
    work_dir: PathBuf,
    agents: Mutex<HashMap<String, Agent>>,
    machines: Mutex<HashMap<String, StateMachine<AgentLifecycle>>>,
    tasks: Mutex<HashMap<String, Task>>,
    queue: Mutex<Vec<QueuedTask>>,
    completed: Mutex<Vec<String>>,
    sequence: AtomicU64,
    agent_counter: AtomicU64,
    running: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentPool {
    pub fn new(config: PoolConfig, base_dir: impl AsRef<Path>) -> Self {
        let work_dir = base_dir.as_ref().join(&config.work_dir);
        let state = Self::load_state(&work_dir.join("pool_state.json"));

        let mut agents = HashMap::new();
        let mut machines = HashMap::new();
        for mut agent in state.agents {
            // No live process survives a restart.
            agent.state = AgentState::Idle;
            agent.current_task = None;
            machines.insert(
                agent.id.clone(),
                AgentLifecycle::new(agent.id.clone()).state_machine(),
            );
            agents.insert(agent.id.clone(), agent);
        }

        let mut tasks = HashMap::new();
        for task in state.tasks {
            tasks.insert(task.id.clone(), task);
        }

        let agent_counter = agents.len() as u64;
        Self {
            config,
            work_dir,
            agents: Mutex::new(agents),
            machines: Mutex::new(machines),
            tasks: Mutex::new(tasks),
            queue: Mutex::new(Vec::new()),
            completed: Mutex::new(state.completed_tasks),
            sequence: AtomicU64::new(0),
            agent_counter: AtomicU64::new(agent_counter),
            running: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn state_file(&self) -> PathBuf {
        self.work_dir.join("pool_state.json")
    }

    fn load_state(path: &Path) -> PoolStateFile {
        if !path.exists() {
            return PoolStateFile::default();
        }
        match std::fs::read_to_string(path)
            .map_err(PolymergeError::from)
            .and_then(|raw| Ok(serde_json::from_str::<PoolStateFile>(&raw)?))
        {
            Ok(state) => {
                info!(
                    agents = state.agents.len(),
                    tasks = state.tasks.len(),
                    "Loaded agent pool state"
                );
                state
            }
            Err(error) => {
                warn!(%error, "Failed to load pool state, starting fresh");
                PoolStateFile::default()
            }
        }
    }

    async fn save_state(&self) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;

        let state = PoolStateFile {
            agents: self.agents.lock().await.values().cloned().collect(),
            tasks: self.tasks.lock().await.values().cloned().collect(),
            completed_tasks: self.completed.lock().await.clone(),
            saved_at: Some(Utc::now()),
        };

        let lock_file = File::create(self.work_dir.join("pool_state.lock"))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;
        std::fs::write(self.state_file(), serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }

    /// Validate and enqueue a new task. Title and command are required.
    pub async fn create_task(
        &self,
        title: &str,
        command: Vec<String>,
        working_directory: &str,
        description: &str,
    ) -> Result<Task> {
        if title.trim().is_empty() {
            return Err(PolymergeError::Validation(
                "task title must not be empty".to_string(),
            ));
        }
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(PolymergeError::Validation(
                "task command must not be empty".to_string(),
            ));
        }

        let mut task = Task::new(title, command, working_directory);
        task.description = description.to_string();
        self.enqueue_task(task.clone()).await;
        Ok(task)
    }

    /// Enqueue an already-built task, keeping the queue ordered by priority
    /// (FIFO within each priority).
    pub async fn enqueue_task(&self, task: Task) {
        let entry = QueuedTask {
            priority: task.priority,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            task_id: task.id.clone(),
        };

        self.tasks.lock().await.insert(task.id.clone(), task);

        let mut queue = self.queue.lock().await;
        let position = queue
            .iter()
            .position(|queued| queued.priority < entry.priority)
            .unwrap_or(queue.len());
        queue.insert(position, entry);
        info!(queued = queue.len(), "Task enqueued");
    }

    /// Start the dispatcher loop.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Agent pool is already running");
            return;
        }
        info!(max_agents = self.config.max_agents, "Starting agent pool");

        let pool = Arc::clone(self);
        let interval = Duration::from_secs(self.config.dispatch_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            while pool.running.load(Ordering::SeqCst) {
                pool.dispatch_once().await;
                tokio::time::sleep(interval).await;
            }
        });
        self.handles.lock().await.push(handle);
    }

    /// Stop the pool: cancel the dispatcher, terminate agents, persist.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping agent pool");

        {
            let mut handles = self.handles.lock().await;
            for handle in handles.drain(..) {
                handle.abort();
                let _ = handle.await;
            }
        }

        {
            let mut machines = self.machines.lock().await;
            let mut agents = self.agents.lock().await;
            for (agent_id, machine) in machines.iter_mut() {
                machine.handle(&LifecycleEvent::Terminate);
                if let Some(agent) = agents.get_mut(agent_id) {
                    agent.state = AgentState::Terminated;
                    agent.current_task = None;
                }
            }
        }

        if let Err(error) = self.save_state().await {
            warn!(%error, "Failed to persist pool state on stop");
        }
        info!("Agent pool stopped");
    }

    /// One dispatcher iteration: assign the highest-priority pending task
    /// to an idle agent, creating one if the pool is under capacity.
    async fn dispatch_once(self: &Arc<Self>) {
        let next = { self.queue.lock().await.first().cloned() };
        let Some(next) = next else {
            return;
        };

        let Some(agent_id) = self.find_or_create_idle_agent().await else {
            return;
        };

        {
            let mut queue = self.queue.lock().await;
            queue.retain(|queued| queued.task_id != next.task_id);
        }

        {
            let mut tasks = self.tasks.lock().await;
            let Some(task) = tasks.get_mut(&next.task_id) else {
                return;
            };
            task.status = TaskStatus::Assigned;
            task.assigned_agent = Some(agent_id.clone());
        }

        {
            let mut machines = self.machines.lock().await;
            if let Some(machine) = machines.get_mut(&agent_id) {
                machine.handle(&LifecycleEvent::Assign {
                    agent_id: agent_id.clone(),
                    task_id: next.task_id.clone(),
                });
            }
            let mut agents = self.agents.lock().await;
            if let Some(agent) = agents.get_mut(&agent_id) {
                agent.state = AgentState::Working;
                agent.current_task = Some(next.task_id.clone());
                agent.last_heartbeat = Utc::now();
            }
        }

        info!(task_id = %next.task_id, agent_id = %agent_id, "Assigned task to agent");

        let pool = Arc::clone(self);
        let task_id = next.task_id.clone();
        let handle = tokio::spawn(async move {
            pool.execute_task(agent_id, task_id).await;
        });
        self.handles.lock().await.push(handle);
    }

    async fn find_or_create_idle_agent(&self) -> Option<String> {
        let mut agents = self.agents.lock().await;
        if let Some(agent) = agents.values().find(|agent| agent.state == AgentState::Idle) {
            return Some(agent.id.clone());
        }

        if agents.len() >= self.config.max_agents {
            return None;
        }

        let number = self.agent_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let agent_id = format!("agent-{number}");
        agents.insert(agent_id.clone(), Agent::new(agent_id.clone()));
        self.machines.lock().await.insert(
            agent_id.clone(),
            AgentLifecycle::new(agent_id.clone()).state_machine(),
        );
        info!(agent_id = %agent_id, "Created agent");
        Some(agent_id)
    }

    /// Run a task's command as a subprocess with timeout enforcement and
    /// captured output.
    async fn execute_task(self: Arc<Self>, agent_id: String, task_id: String) {
        let task_snapshot = {
            let mut tasks = self.tasks.lock().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            task.status = TaskStatus::Running;
            task.start_time = Some(Utc::now());
            task.clone()
        };

        info!(agent_id = %agent_id, task_id = %task_id, "Agent starting task");

        let mut command = Command::new(&task_snapshot.command[0]);
        command
            .args(&task_snapshot.command[1..])
            .current_dir(&task_snapshot.working_directory)
            .envs(&task_snapshot.environment)
            .env("POLYMERGE_AGENT_ID", &agent_id)
            .env("POLYMERGE_TASK_ID", &task_id)
            .kill_on_drop(true);

        let deadline = Duration::from_secs(task_snapshot.timeout_secs.max(1));
        let outcome = timeout(deadline, command.output()).await;

        let completed = {
            let mut tasks = self.tasks.lock().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            task.end_time = Some(Utc::now());

            match outcome {
                Ok(Ok(output)) => {
                    task.output = String::from_utf8_lossy(&output.stdout).into_owned();
                    task.error = String::from_utf8_lossy(&output.stderr).into_owned();
                    task.exit_code = output.status.code();
                    if output.status.success() {
                        task.status = TaskStatus::Completed;
                        true
                    } else {
                        task.status = TaskStatus::Failed;
                        false
                    }
                }
                Ok(Err(error)) => {
                    task.status = TaskStatus::Failed;
                    task.error = format!("failed to spawn command: {error}");
                    false
                }
                Err(_) => {
                    // kill_on_drop reaps the child when the future is dropped.
                    task.status = TaskStatus::Failed;
                    task.error = format!(
                        "task timed out after {} seconds",
                        task_snapshot.timeout_secs
                    );
                    false
                }
            }
        };

        let elapsed = {
            let tasks = self.tasks.lock().await;
            tasks
                .get(&task_id)
                .and_then(|task| match (task.start_time, task.end_time) {
                    (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
                    _ => None,
                })
                .unwrap_or(0.0)
        };

        {
            let mut machines = self.machines.lock().await;
            let mut agents = self.agents.lock().await;
            if let Some(machine) = machines.get_mut(&agent_id) {
                let event = if completed {
                    LifecycleEvent::TaskCompleted
                } else {
                    LifecycleEvent::TaskFailed { fatal: false }
                };
                machine.handle(&event);
                if let Some(agent) = agents.get_mut(&agent_id) {
                    agent.state = current_agent_state(machine);
                    agent.current_task = None;
                    agent.last_heartbeat = Utc::now();
                    agent.total_execution_secs += elapsed;
                    if completed {
                        agent.completed_tasks += 1;
                    } else {
                        agent.failed_tasks += 1;
                    }
                }
            }
        }

        if completed {
            self.completed.lock().await.push(task_id.clone());
            info!(task_id = %task_id, "Task completed");
        } else {
            warn!(task_id = %task_id, "Task failed");
        }

        if let Err(error) = self.save_state().await {
            warn!(%error, "Failed to persist pool state");
        }
    }

    /// Move a pending task to cancelled and drop it from the queue.
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(task_id).ok_or_else(|| {
            PolymergeError::Validation(format!("task {task_id} not found"))
        })?;
        if task.status != TaskStatus::Pending {
            return Err(PolymergeError::Validation(format!(
                "task {task_id} is not pending"
            )));
        }
        task.status = TaskStatus::Cancelled;
        drop(tasks);

        self.queue
            .lock()
            .await
            .retain(|queued| queued.task_id != task_id);
        Ok(())
    }

    /// Manually recover an agent out of the error state.
    pub async fn recover_agent(&self, agent_id: &str) -> Result<()> {
        let mut machines = self.machines.lock().await;
        let machine = machines.get_mut(agent_id).ok_or_else(|| {
            PolymergeError::Validation(format!("agent {agent_id} not found"))
        })?;
        machine.handle(&LifecycleEvent::Recover);

        let mut agents = self.agents.lock().await;
        if let Some(agent) = agents.get_mut(agent_id) {
            agent.state = current_agent_state(machine);
        }
        Ok(())
    }

    pub async fn get_pool_status(&self) -> PoolStatus {
        let agents = self.agents.lock().await;
        let idle = agents
            .values()
            .filter(|agent| agent.state == AgentState::Idle)
            .count();
        let working = agents
            .values()
            .filter(|agent| agent.state == AgentState::Working)
            .count();

        PoolStatus {
            running: self.running.load(Ordering::SeqCst),
            total_agents: agents.len(),
            idle_agents: idle,
            working_agents: working,
            queued_tasks: self.queue.lock().await.len(),
            total_tasks: self.tasks.lock().await.len(),
            completed_tasks: self.completed.lock().await.len(),
        }
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let tasks = self.tasks.lock().await;
        let mut listed: Vec<Task> = tasks
            .values()
            .filter(|task| status.map(|wanted| task.status == wanted).unwrap_or(true))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        listed
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let agents = self.agents.lock().await;
        let mut listed: Vec<Agent> = agents.values().cloned().collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        listed
    }

    /// Pending task ids in dispatch order, for introspection.
    pub async fn queued_task_ids(&self) -> Vec<String> {
        self.queue
            .lock()
            .await
            .iter()
            .map(|queued| queued.task_id.clone())
            .collect()
    }
}

#[async_trait]
impl AgentDirectory for AgentPool {
    async fn agent_ids(&self) -> Vec<String> {
        self.agents.lock().await.keys().cloned().collect()
    }

    async fn idle_agents(&self) -> Vec<String> {
        self.agents
            .lock()
            .await
            .values()
            .filter(|agent| agent.state == AgentState::Idle)
            .map(|agent| agent.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool(dir: &TempDir) -> AgentPool {
        AgentPool::new(PoolConfig::default(), dir.path())
    }

    #[tokio::test]
    async fn create_task_validates_required_fields() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        let missing_title = pool.create_task("", vec!["true".to_string()], "/tmp", "").await;
        assert!(matches!(missing_title, Err(PolymergeError::Validation(_))));

        let missing_command = pool.create_task("work", vec![], "/tmp", "").await;
        assert!(matches!(missing_command, Err(PolymergeError::Validation(_))));
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_fifo() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        let mut low = Task::new("low", vec!["true".to_string()], "/tmp");
        low.priority = 2;
        let mut high = Task::new("high", vec!["true".to_string()], "/tmp");
        high.priority = 9;
        let mut second_high = Task::new("high-2", vec!["true".to_string()], "/tmp");
        second_high.priority = 9;

        pool.enqueue_task(low.clone()).await;
        pool.enqueue_task(high.clone()).await;
        pool.enqueue_task(second_high.clone()).await;

        let order = pool.queued_task_ids().await;
        assert_eq!(order, vec![high.id, second_high.id, low.id]);
    }

    #[tokio::test]
    async fn cancel_only_applies_to_pending_tasks() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        let task = pool
            .create_task("work", vec!["true".to_string()], "/tmp", "")
            .await
            .unwrap();

        pool.cancel_task(&task.id).await.unwrap();
        assert_eq!(
            pool.get_task(&task.id).await.unwrap().status,
            TaskStatus::Cancelled
        );
        assert!(pool.cancel_task(&task.id).await.is_err());
        assert!(pool.queued_task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn state_survives_restart_with_agents_reset_to_idle() {
        let dir = TempDir::new().unwrap();
        {
            let pool = Arc::new(pool(&dir));
            pool.create_task("work", vec!["true".to_string()], "/tmp", "")
                .await
                .unwrap();
            // Force an agent into existence, then persist.
            pool.find_or_create_idle_agent().await.unwrap();
            pool.save_state().await.unwrap();
        }

        let reloaded = pool(&dir);
        let status = reloaded.get_pool_status().await;
        assert_eq!(status.total_agents, 1);
        assert_eq!(status.idle_agents, 1);
        assert_eq!(status.total_tasks, 1);
        assert!(!status.running);
    }
}
