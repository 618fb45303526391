//! Session manager: per-session conversation state, provider binding, and
//! the public turn contract.
//!
//! Sessions are cached in memory and loaded from the store on demand; all
//! mutation funnels through methods taking the session id. The turn loop
//! itself lives in [`super::turn`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use drost_domain::config::RouteConfig;
use drost_domain::message::ChatMessage;
use drost_domain::session::{SessionOrigin, SessionRecord, SkillInjectionMode};
use drost_domain::stream::{TurnEvent, Usage};
use drost_domain::{Error, Result};
use drost_providers::{CancelToken, FailoverState, ProviderManager};
use drost_sessions::{SessionFileStore, TranscriptWriter};
use drost_tools::ToolRuntime;

use crate::lifecycle::DegradedReasons;

/// Callback receiving this turn's stream events.
pub type EventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests / outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnRunRequest {
    pub session_id: String,
    pub input: String,
    pub input_images: Vec<String>,
    /// Route selection; its primary provider overrides the session binding.
    pub route_id: Option<String>,
    /// When set, only these registry tools are exposed to the model.
    pub available_tools: Option<Vec<String>>,
    pub cancel: CancelToken,
    pub on_event: Option<EventSink>,
}

impl TurnRunRequest {
    pub fn text(session_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            input: input.into(),
            input_images: Vec::new(),
            route_id: None,
            available_tools: None,
            cancel: CancelToken::new(),
            on_event: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub provider_id: String,
    pub response: String,
    pub usage: Usage,
}

/// Partial metadata update.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub provider_route_id: Option<String>,
    pub skill_injection_mode: Option<SkillInjectionMode>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionSlot {
    record: SessionRecord,
    turn_in_progress: bool,
}

pub struct SessionManager {
    pub(crate) store: Arc<SessionFileStore>,
    pub(crate) transcripts: Arc<TranscriptWriter>,
    pub(crate) providers: Arc<ProviderManager>,
    pub(crate) failover: Arc<FailoverState>,
    pub(crate) tools: Arc<ToolRuntime>,
    pub(crate) routes: HashMap<String, RouteConfig>,
    pub(crate) max_tool_calls: u32,
    pub(crate) degraded: Arc<DegradedReasons>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionFileStore>,
        transcripts: Arc<TranscriptWriter>,
        providers: Arc<ProviderManager>,
        failover: Arc<FailoverState>,
        tools: Arc<ToolRuntime>,
        routes: Vec<RouteConfig>,
        max_tool_calls: u32,
        degraded: Arc<DegradedReasons>,
    ) -> Self {
        Self {
            store,
            transcripts,
            providers,
            failover,
            tools,
            routes: routes.into_iter().map(|r| (r.id.clone(), r)).collect(),
            max_tool_calls,
            degraded,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    // ── Public contract ────────────────────────────────────────────

    /// Idempotent: loads from the store when present, creates with the
    /// default provider otherwise.
    pub fn ensure_session(
        &self,
        session_id: &str,
        provider_id: Option<&str>,
        title: Option<String>,
        origin: Option<SessionOrigin>,
    ) -> Result<SessionRecord> {
        if let Some(record) = self.cached_record(session_id) {
            return Ok(record);
        }

        if let Some(record) = self.store.load(session_id)?.record {
            return Ok(self.install(record));
        }

        let provider = match provider_id {
            Some(id) => {
                if !self.providers.contains(id) {
                    return Err(Error::UnknownProvider(id.to_owned()));
                }
                Some(id.to_owned())
            }
            None => self.providers.default_provider_id().map(str::to_owned),
        };

        let mut record = SessionRecord::new(session_id, provider);
        record.metadata.title = title;
        record.metadata.origin = origin;
        self.persist(&mut record)?;
        tracing::info!(session_id, "session created");
        Ok(self.install(record))
    }

    /// Execute one turn. Blocks until the turn loop terminates; events are
    /// streamed through `req.on_event` as they happen.
    pub async fn run_turn(&self, req: TurnRunRequest) -> Result<TurnOutcome> {
        let mut record = self.begin_turn(&req.session_id)?;
        let result = super::turn::run_turn_loop(self, &req, &mut record).await;
        // The invariant: turn_in_progress is false after RunTurn completes,
        // regardless of outcome. The record is written back as persisted.
        self.end_turn(&req.session_id, record);
        result
    }

    /// Record a pending provider switch, applied at the next turn boundary.
    pub fn queue_provider_switch(&self, session_id: &str, provider_id: &str) -> Result<()> {
        if !self.providers.contains(provider_id) {
            return Err(Error::UnknownProvider(provider_id.to_owned()));
        }
        self.mutate_record(session_id, |record| {
            record.pending_provider_id = Some(provider_id.to_owned());
        })
    }

    pub fn get_history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self.get_record(session_id)?.history)
    }

    /// Snapshot of the session record.
    pub fn get_record(&self, session_id: &str) -> Result<SessionRecord> {
        if let Some(record) = self.cached_record(session_id) {
            return Ok(record);
        }
        match self.store.load(session_id)?.record {
            Some(record) => Ok(self.install(record)),
            None => Err(Error::UnknownSession(session_id.to_owned())),
        }
    }

    pub fn list_sessions(&self) -> Result<Vec<(String, drost_sessions::IndexEntry)>> {
        self.store.list()
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().remove(session_id);
        if self.store.delete(session_id)? {
            tracing::info!(session_id, "session deleted");
            Ok(())
        } else {
            Err(Error::UnknownSession(session_id.to_owned()))
        }
    }

    pub fn rename_session(&self, from: &str, to: &str) -> Result<()> {
        {
            let sessions = self.sessions.lock();
            if sessions.get(from).is_some_and(|s| s.turn_in_progress) {
                return Err(Error::TurnInProgress(from.to_owned()));
            }
        }
        self.store.rename(from, to)?;
        self.sessions.lock().remove(from);
        Ok(())
    }

    /// Drop the in-memory copy and reload from disk.
    pub fn hydrate_session(&self, session_id: &str) -> Result<SessionRecord> {
        self.sessions.lock().remove(session_id);
        self.get_record(session_id)
    }

    pub fn update_session_metadata(
        &self,
        session_id: &str,
        patch: MetadataPatch,
    ) -> Result<SessionRecord> {
        self.mutate_record(session_id, |record| {
            if let Some(title) = patch.title.clone() {
                record.metadata.title = Some(title);
            }
            if let Some(route) = patch.provider_route_id.clone() {
                record.metadata.provider_route_id = Some(route);
            }
            if let Some(mode) = patch.skill_injection_mode {
                record.metadata.skill_injection_mode = Some(mode);
            }
        })?;
        self.get_record(session_id)
    }

    /// Whether a turn is currently executing for a session.
    pub fn turn_in_progress(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|s| s.turn_in_progress)
    }

    pub fn route(&self, route_id: &str) -> Option<&RouteConfig> {
        self.routes.get(route_id)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn cached_record(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.record.clone())
    }

    fn install(&self, record: SessionRecord) -> SessionRecord {
        let mut sessions = self.sessions.lock();
        let slot = sessions
            .entry(record.session_id.clone())
            .or_insert_with(|| SessionSlot {
                record: record.clone(),
                turn_in_progress: false,
            });
        slot.record.clone()
    }

    fn begin_turn(&self, session_id: &str) -> Result<SessionRecord> {
        // Load outside the map lock if needed.
        if self.cached_record(session_id).is_none() {
            match self.store.load(session_id)?.record {
                Some(record) => {
                    self.install(record);
                }
                None => return Err(Error::UnknownSession(session_id.to_owned())),
            }
        }

        let mut sessions = self.sessions.lock();
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_owned()))?;
        if slot.turn_in_progress {
            return Err(Error::TurnInProgress(session_id.to_owned()));
        }
        slot.turn_in_progress = true;
        Ok(slot.record.clone())
    }

    fn end_turn(&self, session_id: &str, mut record: SessionRecord) {
        let mut sessions = self.sessions.lock();
        if let Some(slot) = sessions.get_mut(session_id) {
            slot.turn_in_progress = false;
            // A switch queued while the turn ran still applies at the next
            // boundary.
            if record.pending_provider_id.is_none() {
                record.pending_provider_id = slot.record.pending_provider_id.take();
            }
            slot.record = record;
        }
    }

    fn mutate_record(
        &self,
        session_id: &str,
        mutate: impl FnOnce(&mut SessionRecord),
    ) -> Result<()> {
        let mut record = self.get_record(session_id)?;
        mutate(&mut record);
        self.persist(&mut record)?;
        let mut sessions = self.sessions.lock();
        if let Some(slot) = sessions.get_mut(session_id) {
            slot.record = record;
        }
        Ok(())
    }

    /// Save a record, recording a degradation note when the history budget
    /// dropped anything.
    pub(crate) fn persist(&self, record: &mut SessionRecord) -> Result<()> {
        let report = self.store.save(record)?;
        if report.trim.trimmed {
            self.degraded.push(format!(
                "history budget dropped {} message(s) ({} chars) from session '{}'",
                report.trim.dropped_messages,
                report.trim.dropped_characters,
                record.session_id
            ));
        }
        Ok(())
    }
}
