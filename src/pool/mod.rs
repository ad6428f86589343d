// Agent pool - task queue, agent lifecycle state machines, and the
// dispatcher that runs tasks as subprocesses.

pub mod pool;
pub mod state_machine;
pub mod types;

pub use pool::{AgentPool, PoolStatus};
pub use state_machine::{AgentLifecycle, LifecycleEvent};
pub use types::{Agent, AgentState, Task, TaskStatus};
