use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// How a group of agents coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaborationMode {
    Isolated,
    Cooperative,
    Synchronized,
    Hierarchical,
    PeerToPeer,
}

impl CollaborationMode {
    pub fn slug(self) -> &'static str {
        match self {
            CollaborationMode::Isolated => "isolated",
            CollaborationMode::Cooperative => "cooperative",
            CollaborationMode::Synchronized => "synchronized",
            CollaborationMode::Hierarchical => "hierarchical",
            CollaborationMode::PeerToPeer => "peer_to_peer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    StatusUpdate,
    DependencyChange,
    ConflictAlert,
    HelpRequest,
    KnowledgeShare,
    TaskHandoff,
    ReviewRequest,
    SyncRequest,
    Broadcast,
}

impl MessageType {
    pub fn slug(self) -> &'static str {
        match self {
            MessageType::StatusUpdate => "status_update",
            MessageType::DependencyChange => "dependency_change",
            MessageType::ConflictAlert => "conflict_alert",
            MessageType::HelpRequest => "help_request",
            MessageType::KnowledgeShare => "knowledge_share",
            MessageType::TaskHandoff => "task_handoff",
            MessageType::ReviewRequest => "review_request",
            MessageType::SyncRequest => "sync_request",
            MessageType::Broadcast => "broadcast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessagePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
    Emergency = 5,
}

/// Message exchanged between agents. `recipient: None` means broadcast.
#[derive(Debug, Clone)]
pub struct CollaborationMessage {
    pub id: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub subject: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub requires_ack: bool,
    pub acknowledged: bool,
}

impl CollaborationMessage {
    /// Expired messages are dropped at delivery time, never handed out.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Utc::now() > deadline)
            .unwrap_or(false)
    }
}

/// Knowledge item shared between agents. `access_count` mutates on read.
#[derive(Debug, Clone)]
pub struct SharedKnowledge {
    pub id: String,
    pub contributor: String,
    pub knowledge_type: String,
    pub content: Value,
    pub relevance_score: f64,
    pub tags: Vec<String>,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// A decision logged inside a collaboration session.
#[derive(Debug, Clone)]
pub struct SessionDecision {
    pub agent_id: String,
    pub decided_at: DateTime<Utc>,
    pub decision: Value,
}

/// Multi-party session with shared mutable context.
#[derive(Debug, Clone)]
pub struct CollaborationSession {
    pub id: String,
    pub participants: Vec<String>,
    pub mode: CollaborationMode,
    pub purpose: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub shared_context: HashMap<String, Value>,
    pub decisions: Vec<SessionDecision>,
    pub outcomes: Vec<String>,
}
