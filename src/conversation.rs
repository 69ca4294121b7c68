//! Per-task conversation memory.
//!
//! Each task id owns its own transcript, held in a [`ConversationManager`]
//! map. A transcript is guarded by its own async mutex, so two chats for the
//! same task run one after the other while chats for different tasks never
//! touch each other's memory.
//!
//! # States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Uninitialized` | no in-process memory yet |
//! | `RehydratedEmpty` | memory is exactly the system turn |
//! | `Active` | memory holds the system turn plus at least one exchange |
//!
//! The record store holds the authoritative transcript (non-system turns
//! only). After every answer the transcript is written back from a spawned
//! task; the caller gets a [`PendingPersist`] it may await to learn whether
//! the write landed. Writes for one task are serialized and carry the
//! memory revision they snapshot, so an older transcript never overwrites a
//! newer one.
//!
//! At most `capacity` sessions are kept. Past that, the least recently used
//! idle sessions are dropped; they rehydrate from the store on next use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pagewise_core::model::ModelClient;
use pagewise_core::models::{Role, Turn};
use pagewise_core::store::RecordStore;

use crate::retrieve::Retriever;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about a web page. \
Ground your answers in the provided context when it is given, and say so when the context does not contain the answer.";

const CONTEXT_LEAD: &str = "Use the following context: ";
const QUESTION_SEPARATOR: &str = " to answer the following question: ";

/// Wrap a user message with retrieved context.
pub fn wrap_with_context(context: &str, message: &str) -> String {
    format!("{}{}{}{}", CONTEXT_LEAD, context, QUESTION_SEPARATOR, message)
}

/// Recover the question from a context-wrapped user turn.
///
/// Unwrapped content is returned unchanged.
/// Retrieved context is page chunks joined by spaces; a separator found
/// there would be page text, so the first one after the lead is taken.
pub fn strip_context_prefix(content: &str) -> &str {
    content
        .strip_prefix(CONTEXT_LEAD)
        .and_then(|rest| rest.split_once(QUESTION_SEPARATOR))
        .map(|(_, question)| question)
        .unwrap_or(content)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Uninitialized,
    RehydratedEmpty,
    Active,
}

/// Result of loading a transcript from the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RehydrateOutcome {
    /// This many persisted turns were restored.
    Restored(usize),
    /// Nothing persisted; memory was reset.
    Empty,
    /// The store could not be read; memory was reset.
    Unavailable(String),
}

/// Result of writing a transcript back to the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Applied,
    /// A newer transcript for the task was already written.
    Superseded,
    Failed(String),
}

impl std::fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistOutcome::Applied => write!(f, "conversation saved"),
            PersistOutcome::Superseded => write!(f, "a newer conversation was already saved"),
            PersistOutcome::Failed(e) => write!(f, "conversation not saved: {}", e),
        }
    }
}

/// Handle on an in-flight transcript write.
pub struct PendingPersist(JoinHandle<PersistOutcome>);

impl PendingPersist {
    /// Wait for the write to finish.
    pub async fn confirm(self) -> PersistOutcome {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(e) => PersistOutcome::Failed(format!("persist task did not complete: {}", e)),
        }
    }
}

pub struct ChatReply {
    pub answer: String,
    pub persistence: PendingPersist,
}

/// In-process transcript for one task. Position 0 is always the system turn
/// once initialized.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
    state: ConversationState,
    /// Bumped on every pushed turn; never reset.
    revision: u64,
}

impl ConversationMemory {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            state: ConversationState::Uninitialized,
            revision: 0,
        }
    }

    fn reset(&mut self) {
        self.turns = vec![Turn::system(SYSTEM_PROMPT)];
        self.state = ConversationState::RehydratedEmpty;
    }

    fn restore(&mut self, persisted: Vec<Turn>) -> usize {
        self.reset();
        self.turns
            .extend(persisted.into_iter().filter(|t| t.role != Role::System));
        let restored = self.turns.len() - 1;
        if restored > 0 {
            self.state = ConversationState::Active;
        }
        restored
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.state = ConversationState::Active;
        self.revision += 1;
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Turns after the system turn, in order.
    pub fn history(&self) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|t| t.role != Role::System)
            .cloned()
            .collect()
    }
}

/// Sessions kept in memory before idle ones are evicted.
pub const DEFAULT_SESSION_CAPACITY: usize = 1024;

struct Session {
    memory: AsyncMutex<ConversationMemory>,
    /// Revision of the newest transcript written to the store.
    written: AsyncMutex<u64>,
}

impl Session {
    fn new() -> Self {
        Self {
            memory: AsyncMutex::new(ConversationMemory::new()),
            written: AsyncMutex::new(0),
        }
    }
}

struct SessionSlot {
    session: Arc<Session>,
    last_used: Instant,
}

pub struct ConversationManager {
    store: Arc<dyn RecordStore>,
    model: Arc<dyn ModelClient>,
    retriever: Arc<Retriever>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    capacity: usize,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        model: Arc<dyn ModelClient>,
        retriever: Arc<Retriever>,
    ) -> Self {
        Self {
            store,
            model,
            retriever,
            sessions: Mutex::new(HashMap::new()),
            capacity: DEFAULT_SESSION_CAPACITY,
        }
    }

    /// Keep at most `capacity` sessions (minimum 1).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn session(&self, task_id: &str) -> Arc<Session> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = sessions
            .entry(task_id.to_string())
            .or_insert_with(|| SessionSlot {
                session: Arc::new(Session::new()),
                last_used: Instant::now(),
            });
        slot.last_used = Instant::now();
        let session = slot.session.clone();

        if sessions.len() > self.capacity {
            evict_idle(&mut sessions, self.capacity);
        }
        session
    }

    /// Number of sessions currently held in memory.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn state(&self, task_id: &str) -> ConversationState {
        self.session(task_id).memory.lock().await.state()
    }

    /// Snapshot of the in-process transcript, system turn included.
    pub async fn transcript(&self, task_id: &str) -> Vec<Turn> {
        self.session(task_id).memory.lock().await.turns().to_vec()
    }

    /// Replace memory with the system turn alone.
    pub async fn reset(&self, task_id: &str) {
        self.session(task_id).memory.lock().await.reset();
    }

    /// Reload the persisted transcript, falling back to a reset.
    pub async fn rehydrate(&self, task_id: &str) -> RehydrateOutcome {
        let session = self.session(task_id);
        let mut memory = session.memory.lock().await;
        self.rehydrate_locked(task_id, &mut memory).await
    }

    async fn rehydrate_locked(
        &self,
        task_id: &str,
        memory: &mut ConversationMemory,
    ) -> RehydrateOutcome {
        match self.store.get_conversation(task_id).await {
            Ok(Some(turns)) if !turns.is_empty() => {
                let restored = memory.restore(turns);
                if restored == 0 {
                    return RehydrateOutcome::Empty;
                }
                debug!(task_id, restored, "rehydrated conversation");
                RehydrateOutcome::Restored(restored)
            }
            Ok(_) => {
                memory.reset();
                RehydrateOutcome::Empty
            }
            Err(e) => {
                warn!(task_id, error = %e, "conversation store unavailable, starting fresh");
                memory.reset();
                RehydrateOutcome::Unavailable(format!("{:#}", e))
            }
        }
    }

    /// Answer `message` within `task_id`'s conversation.
    ///
    /// A session that was never rehydrated is rehydrated first.
    ///
    /// # Errors
    ///
    /// Retrieval and model failures propagate. On a model failure the user
    /// turn stays in memory without an answer.
    pub async fn chat(&self, task_id: &str, message: &str) -> Result<ChatReply> {
        let session = self.session(task_id);
        let mut memory = session.memory.lock().await;

        if memory.state() == ConversationState::Uninitialized {
            debug!(task_id, "chat on uninitialized session, rehydrating");
            self.rehydrate_locked(task_id, &mut memory).await;
        }

        let context = self.retriever.retrieve(task_id, message).await?;
        let content = if context.is_empty() {
            message.to_string()
        } else {
            wrap_with_context(&context, message)
        };
        memory.push(Turn::user(content));

        let answer = self
            .model
            .complete_with_history(memory.turns())
            .await
            .context("Chat completion failed")?;
        memory.push(Turn::assistant(answer.clone()));

        info!(task_id, turns = memory.turns().len(), "chat answered");

        let persistence = PendingPersist(tokio::spawn(persist_transcript(
            self.store.clone(),
            session.clone(),
            task_id.to_string(),
            memory.revision,
            memory.history(),
        )));

        Ok(ChatReply {
            answer,
            persistence,
        })
    }
}

/// Drop the least recently used sessions nobody holds until the map fits.
///
/// A session referenced elsewhere (a chat in progress, a pending write) is
/// never dropped, so the map may stay above `capacity` while those finish.
fn evict_idle(sessions: &mut HashMap<String, SessionSlot>, capacity: usize) {
    let mut idle: Vec<(Instant, String)> = sessions
        .iter()
        .filter(|(_, slot)| Arc::strong_count(&slot.session) == 1)
        .map(|(task_id, slot)| (slot.last_used, task_id.clone()))
        .collect();
    idle.sort();

    let excess = sessions.len().saturating_sub(capacity);
    for (_, task_id) in idle.into_iter().take(excess) {
        sessions.remove(&task_id);
        debug!(task_id = %task_id, "evicted idle conversation session");
    }
}

/// Write the transcript, then mirror it into the task's cache entry.
///
/// Writes for one session run one at a time. A snapshot older than what the
/// store already holds is dropped. Only the transcript write decides the
/// outcome; the cache mirror is logged and otherwise ignored.
async fn persist_transcript(
    store: Arc<dyn RecordStore>,
    session: Arc<Session>,
    task_id: String,
    revision: u64,
    turns: Vec<Turn>,
) -> PersistOutcome {
    let mut written = session.written.lock().await;
    if *written >= revision {
        debug!(task_id = %task_id, revision, written = *written, "stale transcript not written");
        return PersistOutcome::Superseded;
    }

    if let Err(e) = store.set_conversation(&task_id, &turns).await {
        warn!(task_id = %task_id, error = %e, "failed to persist conversation");
        return PersistOutcome::Failed(format!("{:#}", e));
    }
    *written = revision;

    if let Err(e) = mirror_into_cache(store.as_ref(), &task_id, turns).await {
        debug!(task_id = %task_id, error = %e, "conversation not mirrored into cache");
    }
    PersistOutcome::Applied
}

async fn mirror_into_cache(store: &dyn RecordStore, task_id: &str, turns: Vec<Turn>) -> Result<()> {
    let Some(url) = store.find_url_for_task(task_id).await? else {
        return Ok(());
    };
    let Some(mut entry) = store.get_cache(&url).await? else {
        return Ok(());
    };
    entry.conversation = turns;
    store.set_cache(&url, &entry).await
}
