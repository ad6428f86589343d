// Inter-agent collaboration - message bus, shared knowledge base, and
// multi-party sessions.

pub mod engine;
pub mod messages;

use async_trait::async_trait;

pub use engine::{CollaborationEngine, CollaborationStats, CollaborationSummary};
pub use messages::{
    CollaborationMessage, CollaborationMode, CollaborationSession, MessagePriority, MessageType,
    SharedKnowledge,
};

/// Source of truth for which agents exist. Implemented by the agent pool;
/// tests use `FixedDirectory`.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// All registered agent ids.
    async fn agent_ids(&self) -> Vec<String>;

    /// Agents currently idle and able to pick up work.
    async fn idle_agents(&self) -> Vec<String>;
}

/// Static agent directory for tests and single-process embeddings.
pub struct FixedDirectory {
    agents: Vec<String>,
}

impl FixedDirectory {
    pub fn new<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: agents.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AgentDirectory for FixedDirectory {
    async fn agent_ids(&self) -> Vec<String> {
        self.agents.clone()
    }

    async fn idle_agents(&self) -> Vec<String> {
        self.agents.clone()
    }
}
