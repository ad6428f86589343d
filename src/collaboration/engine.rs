use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CollaborationConfig;
use crate::error::{PolymergeError, Result};

use super::messages::{
    CollaborationMessage, CollaborationMode, CollaborationSession, MessagePriority, MessageType,
    SessionDecision, SharedKnowledge,
};
use super::AgentDirectory;

#[derive(Debug, Clone, Default)]
pub struct CollaborationStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub expired_dropped: u64,
    pub acknowledgments_cleared: u64,
    pub knowledge_shared: u64,
    pub knowledge_accessed: u64,
    pub sessions_created: u64,
    pub successful_collaborations: u64,
    pub dependencies_tracked: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CollaborationSummary {
    pub stats: CollaborationStats,
    pub active_sessions: usize,
    pub queue_depths: HashMap<String, usize>,
    pub pending_acknowledgments: usize,
    pub knowledge_count: usize,
    pub knowledge_by_type: HashMap<String, usize>,
}

/// A dependency change queued for propagation to other agents.
#[derive(Debug, Clone)]
pub struct DependencyChange {
    pub file_path: String,
    pub changed_by: String,
    pub change_type: String,
    pub details: Value,
    pub affected_files: Vec<String>,
}

/// Message bus, shared knowledge base, and session coordinator for the
/// agent fleet.
///
/// Delivery semantics: per-agent FIFO queues, at-most-once delivery per
/// `receive_messages` call, expired messages dropped at delivery time. A
/// background task purges expired pending acknowledgments.
pub struct CollaborationEngine {
    directory: Arc<dyn AgentDirectory>,
    config: CollaborationConfig,
    queues: Mutex<HashMap<String, VecDeque<CollaborationMessage>>>,
    history: Mutex<Vec<CollaborationMessage>>,
    pending_acks: Mutex<HashMap<String, CollaborationMessage>>,
    knowledge: Mutex<HashMap<String, SharedKnowledge>>,
    knowledge_index: Mutex<HashMap<String, Vec<String>>>,
    sessions: Mutex<HashMap<String, CollaborationSession>>,
    session_history: Mutex<Vec<CollaborationSession>>,
    dependency_graph: Mutex<HashMap<String, HashSet<String>>>,
    propagation_queue: Mutex<VecDeque<DependencyChange>>,
    stats: std::sync::Mutex<CollaborationStats>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CollaborationEngine {
    pub fn new(directory: Arc<dyn AgentDirectory>, config: CollaborationConfig) -> Self {
        Self {
            directory,
            config,
            queues: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            pending_acks: Mutex::new(HashMap::new()),
            knowledge: Mutex::new(HashMap::new()),
            knowledge_index: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            session_history: Mutex::new(Vec::new()),
            dependency_graph: Mutex::new(HashMap::new()),
            propagation_queue: Mutex::new(VecDeque::new()),
            stats: std::sync::Mutex::new(CollaborationStats::default()),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Send a message to one agent, or to every other agent when
    /// `recipient` is `None`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_message(
        &self,
        sender: &str,
        recipient: Option<&str>,
        message_type: MessageType,
        subject: &str,
        content: Value,
        priority: MessagePriority,
        expires_in: Option<Duration>,
        requires_ack: bool,
    ) -> String {
        let message = CollaborationMessage {
            id: format!("msg-{}", Uuid::new_v4()),
            sender: sender.to_string(),
            recipient: recipient.map(|id| id.to_string()),
            message_type,
            priority,
            subject: subject.to_string(),
            content,
            created_at: Utc::now(),
            expires_at: expires_in.map(|ttl| Utc::now() + ttl),
            requires_ack,
            acknowledged: false,
        };

        let targets: Vec<String> = match recipient {
            Some(recipient) => vec![recipient.to_string()],
            None => self
                .directory
                .agent_ids()
                .await
                .into_iter()
                .filter(|agent| agent != sender)
                .collect(),
        };

        {
            let mut queues = self.queues.lock().await;
            for target in &targets {
                let queue = queues.entry(target.clone()).or_default();
                queue.push_back(message.clone());
                while queue.len() > self.config.max_queue_size {
                    queue.pop_front();
                    warn!(agent = %target, "Trimmed oldest message from oversized queue");
                }
            }
        }

        if requires_ack {
            self.pending_acks
                .lock()
                .await
                .insert(message.id.clone(), message.clone());
        }

        self.history.lock().await.push(message.clone());
        self.stats.lock().unwrap().messages_sent += 1;

        debug!(
            message_id = %message.id,
            sender = %sender,
            recipient = recipient.unwrap_or("all"),
            "Message sent"
        );
        message.id
    }

    /// Dequeue up to `max_messages` live messages for an agent. Delivered
    /// messages leave the queue; expired messages are silently dropped.
    pub async fn receive_messages(
        &self,
        agent_id: &str,
        max_messages: Option<usize>,
    ) -> Vec<CollaborationMessage> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(agent_id) else {
            return Vec::new();
        };

        let mut delivered = Vec::new();
        let mut dropped = 0u64;
        while let Some(message) = queue.pop_front() {
            if message.is_expired() {
                dropped += 1;
                continue;
            }
            delivered.push(message);
            if max_messages.map(|max| delivered.len() >= max).unwrap_or(false) {
                break;
            }
        }

        let mut stats = self.stats.lock().unwrap();
        stats.messages_delivered += delivered.len() as u64;
        stats.expired_dropped += dropped;

        delivered
    }

    /// Clear a pending acknowledgment. Only the addressed agent (or anyone,
    /// for broadcasts) may acknowledge.
    pub async fn acknowledge_message(&self, agent_id: &str, message_id: &str) {
        let mut pending = self.pending_acks.lock().await;
        let matches = pending
            .get(message_id)
            .map(|message| {
                message
                    .recipient
                    .as_deref()
                    .map(|recipient| recipient == agent_id)
                    .unwrap_or(true)
            })
            .unwrap_or(false);

        if matches {
            pending.remove(message_id);
            self.stats.lock().unwrap().acknowledgments_cleared += 1;
            info!(message_id = %message_id, agent = %agent_id, "Message acknowledged");
        }
    }

    pub async fn pending_acknowledgment_count(&self) -> usize {
        self.pending_acks.lock().await.len()
    }

    /// Store a knowledge item and notify the fleet.
    pub async fn share_knowledge(
        &self,
        contributor: &str,
        knowledge_type: &str,
        content: Value,
        tags: Vec<String>,
        relevance_score: f64,
    ) -> String {
        let id = format!("know-{}", Uuid::new_v4());
        let knowledge = SharedKnowledge {
            id: id.clone(),
            contributor: contributor.to_string(),
            knowledge_type: knowledge_type.to_string(),
            content: content.clone(),
            relevance_score,
            tags: tags.clone(),
            access_count: 0,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
        };

        {
            let mut store = self.knowledge.lock().await;
            let mut index = self.knowledge_index.lock().await;
            for tag in &knowledge.tags {
                index.entry(tag.clone()).or_default().push(id.clone());
            }
            store.insert(id.clone(), knowledge);
        }
        self.stats.lock().unwrap().knowledge_shared += 1;

        let summary = content
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        self.send_message(
            contributor,
            None,
            MessageType::KnowledgeShare,
            &format!("New {knowledge_type} knowledge available"),
            json!({
                "knowledge_id": id,
                "knowledge_type": knowledge_type,
                "tags": tags,
                "summary": summary,
            }),
            MessagePriority::Low,
            None,
            false,
        )
        .await;

        info!(knowledge_id = %id, contributor = %contributor, "Knowledge shared");
        id
    }

    /// Retrieve knowledge by id, tags, or type. Every returned item's
    /// access count is bumped.
    pub async fn access_knowledge(
        &self,
        knowledge_id: Option<&str>,
        tags: Option<&[String]>,
        knowledge_type: Option<&str>,
        limit: usize,
    ) -> Vec<SharedKnowledge> {
        let mut store = self.knowledge.lock().await;

        let candidate_ids: Vec<String> = if let Some(id) = knowledge_id {
            store.contains_key(id).then(|| vec![id.to_string()]).unwrap_or_default()
        } else if let Some(tags) = tags {
            let index = self.knowledge_index.lock().await;
            let mut ids: HashSet<String> = HashSet::new();
            for tag in tags {
                if let Some(tagged) = index.get(tag) {
                    ids.extend(tagged.iter().cloned());
                }
            }
            ids.into_iter().collect()
        } else {
            store.keys().cloned().collect()
        };

        let mut results: Vec<SharedKnowledge> = candidate_ids
            .iter()
            .filter_map(|id| store.get(id))
            .filter(|knowledge| {
                knowledge_type
                    .map(|wanted| knowledge.knowledge_type == wanted)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        results.truncate(limit);

        {
            let mut stats = self.stats.lock().unwrap();
            stats.knowledge_accessed += results.len() as u64;
        }
        for found in &mut results {
            if let Some(stored) = store.get_mut(&found.id) {
                stored.access_count += 1;
                stored.last_accessed = Utc::now();
                found.access_count = stored.access_count;
            }
        }

        results
    }

    /// Open a session; every listed participant (plus the initiator) gets
    /// an invitation that requires acknowledgment.
    pub async fn create_collaboration_session(
        &self,
        initiator: &str,
        mut participants: Vec<String>,
        mode: CollaborationMode,
        purpose: &str,
        initial_context: Option<HashMap<String, Value>>,
    ) -> String {
        if !participants.iter().any(|participant| participant == initiator) {
            participants.push(initiator.to_string());
        }

        let session_id = format!("collab-{}", Uuid::new_v4());
        let session = CollaborationSession {
            id: session_id.clone(),
            participants: participants.clone(),
            mode,
            purpose: purpose.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            shared_context: initial_context.unwrap_or_default(),
            decisions: Vec::new(),
            outcomes: Vec::new(),
        };
        self.sessions.lock().await.insert(session_id.clone(), session);
        self.stats.lock().unwrap().sessions_created += 1;

        for participant in &participants {
            if participant == initiator {
                continue;
            }
            self.send_message(
                initiator,
                Some(participant),
                MessageType::SyncRequest,
                &format!("Collaboration session invitation: {purpose}"),
                json!({
                    "session_id": session_id,
                    "mode": mode.slug(),
                    "purpose": purpose,
                    "participants": participants,
                }),
                MessagePriority::High,
                None,
                true,
            )
            .await;
        }

        info!(
            session_id = %session_id,
            participants = participants.len(),
            "Collaboration session created"
        );
        session_id
    }

    /// Merge an update into the session's shared context and broadcast it
    /// to the other participants.
    pub async fn update_session_context(
        &self,
        session_id: &str,
        agent_id: &str,
        context_update: HashMap<String, Value>,
    ) -> Result<()> {
        let participants = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(session_id).ok_or_else(|| {
                PolymergeError::Validation(format!("session {session_id} not found"))
            })?;
            if !session.participants.iter().any(|participant| participant == agent_id) {
                return Err(PolymergeError::Validation(format!(
                    "agent {agent_id} not in session {session_id}"
                )));
            }
            session.shared_context.extend(context_update.clone());
            session.participants.clone()
        };

        let updated_keys: Vec<&String> = context_update.keys().collect();
        for participant in &participants {
            if participant == agent_id {
                continue;
            }
            self.send_message(
                agent_id,
                Some(participant),
                MessageType::StatusUpdate,
                &format!("Session {session_id} context updated"),
                json!({
                    "session_id": session_id,
                    "updated_keys": updated_keys,
                    "update": context_update,
                }),
                MessagePriority::Normal,
                None,
                false,
            )
            .await;
        }
        Ok(())
    }

    pub async fn add_session_decision(
        &self,
        session_id: &str,
        agent_id: &str,
        decision: Value,
    ) -> Result<()> {
        let participants = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(session_id).ok_or_else(|| {
                PolymergeError::Validation(format!("session {session_id} not found"))
            })?;
            if !session.participants.iter().any(|participant| participant == agent_id) {
                return Err(PolymergeError::Validation(format!(
                    "agent {agent_id} not in session {session_id}"
                )));
            }
            session.decisions.push(SessionDecision {
                agent_id: agent_id.to_string(),
                decided_at: Utc::now(),
                decision: decision.clone(),
            });
            session.participants.clone()
        };

        for participant in &participants {
            if participant == agent_id {
                continue;
            }
            self.send_message(
                agent_id,
                Some(participant),
                MessageType::StatusUpdate,
                &format!("Session {session_id} decision recorded"),
                json!({ "session_id": session_id, "decision": decision }),
                MessagePriority::Normal,
                None,
                false,
            )
            .await;
        }
        Ok(())
    }

    /// Close a session and move it to the history.
    pub async fn end_collaboration_session(
        &self,
        session_id: &str,
        outcomes: Option<Vec<String>>,
    ) -> Result<()> {
        let mut session = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| PolymergeError::Validation(format!("session {session_id} not found")))?;

        session.ended_at = Some(Utc::now());
        if let Some(outcomes) = outcomes {
            session.outcomes = outcomes;
        }
        if !session.outcomes.is_empty() {
            self.stats.lock().unwrap().successful_collaborations += 1;
        }
        self.session_history.lock().await.push(session);

        info!(session_id = %session_id, "Collaboration session ended");
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Option<CollaborationSession> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Record a dependency change, extend the dependency graph, and alert
    /// the other agents.
    pub async fn track_dependency_change(
        &self,
        file_path: &str,
        changed_by: &str,
        change_type: &str,
        details: Value,
        affected_files: Option<Vec<String>>,
    ) {
        let affected = match &affected_files {
            Some(files) => files.clone(),
            None => {
                let graph = self.dependency_graph.lock().await;
                graph
                    .get(file_path)
                    .map(|dependents| dependents.iter().cloned().collect())
                    .unwrap_or_default()
            }
        };

        if let Some(files) = &affected_files {
            let mut graph = self.dependency_graph.lock().await;
            let dependents = graph.entry(file_path.to_string()).or_default();
            for file in files {
                dependents.insert(file.clone());
            }
        }

        let change = DependencyChange {
            file_path: file_path.to_string(),
            changed_by: changed_by.to_string(),
            change_type: change_type.to_string(),
            details: details.clone(),
            affected_files: affected.clone(),
        };
        self.propagation_queue.lock().await.push_back(change);
        self.stats.lock().unwrap().dependencies_tracked += 1;

        if !affected.is_empty() {
            self.send_message(
                changed_by,
                None,
                MessageType::DependencyChange,
                &format!("Dependency change in {file_path}"),
                json!({
                    "file_path": file_path,
                    "change_type": change_type,
                    "details": details,
                    "affected_files": affected,
                }),
                MessagePriority::High,
                None,
                false,
            )
            .await;
        }
    }

    /// Find the best-suited idle helper by matching knowledge tags against
    /// the problem type and send it a help request. `None` when no agent
    /// scores above zero.
    pub async fn request_help(
        &self,
        requester: &str,
        problem_type: &str,
        problem_description: &str,
        context: Value,
    ) -> Option<String> {
        let idle = self.directory.idle_agents().await;
        let knowledge = self.knowledge.lock().await;

        let mut best: Option<(String, f64)> = None;
        for candidate in idle {
            if candidate == requester {
                continue;
            }
            let score = knowledge
                .values()
                .filter(|item| item.contributor == candidate)
                .filter(|item| item.tags.iter().any(|tag| tag == problem_type))
                .count() as f64
                * 0.2;
            if score > best.as_ref().map(|(_, best_score)| *best_score).unwrap_or(0.0) {
                best = Some((candidate, score));
            }
        }
        drop(knowledge);

        let (helper, _) = best?;
        self.send_message(
            requester,
            Some(&helper),
            MessageType::HelpRequest,
            &format!("Help needed: {problem_type}"),
            json!({
                "problem_type": problem_type,
                "description": problem_description,
                "context": context,
            }),
            MessagePriority::High,
            None,
            true,
        )
        .await;

        info!(helper = %helper, requester = %requester, "Help requested");
        Some(helper)
    }

    /// Ask up to two available agents to review a branch. Review requests
    /// expire after a day.
    pub async fn initiate_code_review(
        &self,
        author: &str,
        branch_name: &str,
        files_changed: Vec<String>,
        review_type: &str,
        priority: MessagePriority,
    ) -> Vec<String> {
        let reviewers: Vec<String> = self
            .directory
            .agent_ids()
            .await
            .into_iter()
            .filter(|agent| agent != author)
            .take(2)
            .collect();

        for reviewer in &reviewers {
            self.send_message(
                author,
                Some(reviewer),
                MessageType::ReviewRequest,
                &format!("Code review request for {branch_name}"),
                json!({
                    "branch_name": branch_name,
                    "files_changed": files_changed,
                    "review_type": review_type,
                    "author": author,
                }),
                priority,
                Some(Duration::hours(24)),
                true,
            )
            .await;
        }

        info!(author = %author, reviewers = reviewers.len(), "Code review initiated");
        reviewers
    }

    /// Start the background purge task: expired pending acknowledgments,
    /// stale sessions, and cold knowledge.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Collaboration engine already running");
            return;
        }
        info!("Starting collaboration engine");

        let engine = Arc::clone(self);
        let interval = StdDuration::from_secs(self.config.purge_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            while engine.running.load(Ordering::SeqCst) {
                engine.purge_tick().await;
                tokio::time::sleep(interval).await;
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Stop background work: flip the flag, cancel, and join.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        info!("Collaboration engine stopped");
    }

    async fn purge_tick(&self) {
        // Expired pending acknowledgments are abandoned.
        {
            let mut pending = self.pending_acks.lock().await;
            let expired: Vec<String> = pending
                .iter()
                .filter(|(_, message)| message.is_expired())
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                warn!(message_id = %id, "Acknowledgment expired");
                pending.remove(&id);
            }
        }

        // Sessions idle past the timeout are force-ended.
        let stale: Vec<String> = {
            let sessions = self.sessions.lock().await;
            let timeout = Duration::hours(self.config.session_timeout_hours);
            sessions
                .values()
                .filter(|session| Utc::now() - session.started_at > timeout)
                .map(|session| session.id.clone())
                .collect()
        };
        for session_id in stale {
            warn!(session_id = %session_id, "Session timed out");
            let _ = self
                .end_collaboration_session(&session_id, Some(vec!["Session timed out".to_string()]))
                .await;
        }

        // Cold knowledge ages out.
        {
            let cutoff = Utc::now() - Duration::days(self.config.knowledge_retention_days);
            let mut store = self.knowledge.lock().await;
            let mut index = self.knowledge_index.lock().await;
            let removable: Vec<String> = store
                .values()
                .filter(|item| item.last_accessed < cutoff && item.access_count < 5)
                .map(|item| item.id.clone())
                .collect();
            for id in removable {
                if let Some(item) = store.remove(&id) {
                    for tag in &item.tags {
                        if let Some(tagged) = index.get_mut(tag) {
                            tagged.retain(|entry| entry != &id);
                        }
                    }
                }
            }
        }
    }

    pub async fn get_collaboration_summary(&self) -> CollaborationSummary {
        let queues = self.queues.lock().await;
        let queue_depths: HashMap<String, usize> = queues
            .iter()
            .map(|(agent, queue)| (agent.clone(), queue.len()))
            .collect();
        drop(queues);

        let knowledge = self.knowledge.lock().await;
        let mut knowledge_by_type: HashMap<String, usize> = HashMap::new();
        for item in knowledge.values() {
            *knowledge_by_type.entry(item.knowledge_type.clone()).or_default() += 1;
        }
        let knowledge_count = knowledge.len();
        drop(knowledge);

        CollaborationSummary {
            stats: self.stats.lock().unwrap().clone(),
            active_sessions: self.sessions.lock().await.len(),
            queue_depths,
            pending_acknowledgments: self.pending_acks.lock().await.len(),
            knowledge_count,
            knowledge_by_type,
        }
    }
}
