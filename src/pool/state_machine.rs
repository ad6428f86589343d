use statig::prelude::*;

use super::types::AgentState;

/// Events driving one agent's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Assign { agent_id: String, task_id: String },
    TaskCompleted,
    TaskFailed { fatal: bool },
    Recover,
    Terminate,
}

/// Per-agent lifecycle: idle -> working -> {idle | error} -> terminated.
/// Three consecutive failures, or one fatal failure, park the agent in the
/// error state until an explicit recover.
#[derive(Default)]
pub struct AgentLifecycle {
    pub agent_id: String,
    pub current_task: Option<String>,
    pub consecutive_failures: u32,
}

impl AgentLifecycle {
    pub fn new(agent_id: String) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current_task.is_some()
    }
}

const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[state_machine(initial = "State::idle()")]
impl AgentLifecycle {
    #[state]
    fn idle(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Assign { agent_id, task_id } => {
                if *agent_id != self.agent_id {
                    tracing::error!(
                        expected = %self.agent_id,
                        actual = %agent_id,
                        "Agent id mismatch on assignment"
                    );
                    return Handled;
                }
                self.current_task = Some(task_id.clone());
                tracing::info!(
                    agent_id = %self.agent_id,
                    task_id = %task_id,
                    "Agent assigned task"
                );
                Transition(State::working())
            }
            LifecycleEvent::Terminate => Transition(State::terminated()),
            _ => Handled,
        }
    }

    #[state]
    fn working(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::TaskCompleted => {
                self.current_task = None;
                self.consecutive_failures = 0;
                tracing::info!(agent_id = %self.agent_id, "Agent completed task");
                Transition(State::idle())
            }
            LifecycleEvent::TaskFailed { fatal } => {
                self.current_task = None;
                self.consecutive_failures += 1;
                if *fatal || self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!(
                        agent_id = %self.agent_id,
                        failures = self.consecutive_failures,
                        "Agent entering error state"
                    );
                    Transition(State::error())
                } else {
                    Transition(State::idle())
                }
            }
            LifecycleEvent::Terminate => {
                self.current_task = None;
                Transition(State::terminated())
            }
            _ => Handled,
        }
    }

    #[state]
    fn error(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Recover => {
                self.consecutive_failures = 0;
                tracing::info!(agent_id = %self.agent_id, "Agent recovered");
                Transition(State::idle())
            }
            LifecycleEvent::Terminate => Transition(State::terminated()),
            _ => Handled,
        }
    }

    #[state]
    fn terminated(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        // Terminal state.
        let _ = event;
        Handled
    }
}

/// Translate the machine's current state to the serializable agent state.
pub fn current_agent_state(machine: &StateMachine<AgentLifecycle>) -> AgentState {
    match machine.state() {
        State::Idle {} => AgentState::Idle,
        State::Working {} => AgentState::Working,
        State::Error {} => AgentState::Error,
        State::Terminated {} => AgentState::Terminated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assign(agent_id: &str, task_id: &str) -> LifecycleEvent {
        LifecycleEvent::Assign {
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
        }
    }

    #[test]
    fn happy_path_cycles_idle_working_idle() {
        let mut machine = AgentLifecycle::new("agent-1".to_string()).state_machine();
        assert_eq!(current_agent_state(&machine), AgentState::Idle);

        machine.handle(&assign("agent-1", "task-1"));
        assert_eq!(current_agent_state(&machine), AgentState::Working);

        machine.handle(&LifecycleEvent::TaskCompleted);
        assert_eq!(current_agent_state(&machine), AgentState::Idle);
    }

    #[test]
    fn mismatched_agent_id_is_rejected() {
        let mut machine = AgentLifecycle::new("agent-1".to_string()).state_machine();
        machine.handle(&assign("agent-2", "task-1"));
        assert_eq!(current_agent_state(&machine), AgentState::Idle);
    }

    #[test]
    fn repeated_failures_park_the_agent_in_error() {
        let mut machine = AgentLifecycle::new("agent-1".to_string()).state_machine();
        for round in 0..3 {
            machine.handle(&assign("agent-1", &format!("task-{round}")));
            machine.handle(&LifecycleEvent::TaskFailed { fatal: false });
        }
        assert_eq!(current_agent_state(&machine), AgentState::Error);

        machine.handle(&LifecycleEvent::Recover);
        assert_eq!(current_agent_state(&machine), AgentState::Idle);
    }

    #[test]
    fn fatal_failure_goes_straight_to_error() {
        let mut machine = AgentLifecycle::new("agent-1".to_string()).state_machine();
        machine.handle(&assign("agent-1", "task-1"));
        machine.handle(&LifecycleEvent::TaskFailed { fatal: true });
        assert_eq!(current_agent_state(&machine), AgentState::Error);
    }

    #[test]
    fn terminated_is_terminal() {
        let mut machine = AgentLifecycle::new("agent-1".to_string()).state_machine();
        machine.handle(&LifecycleEvent::Terminate);
        assert_eq!(current_agent_state(&machine), AgentState::Terminated);

        machine.handle(&assign("agent-1", "task-1"));
        assert_eq!(current_agent_state(&machine), AgentState::Terminated);
    }
}
