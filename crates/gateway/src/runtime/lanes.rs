//! Orchestration lane scheduler.
//!
//! One lane per session enforces at-most-one-active and a mode-specific
//! admission policy: `queue`, `interrupt`, `collect`, `steer` (interrupt
//! semantics), `steer_backlog` (queue semantics). Lane state is mirrored
//! to a snapshot file on every mutation so queued inputs survive a crash.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use drost_domain::config::{DropPolicy, LaneMode, OrchestrationConfig};
use drost_providers::CancelToken;

use crate::events::EventBroadcaster;

use super::cancel::CancelMap;
use super::manager::{EventSink, SessionManager, TurnOutcome, TurnRunRequest};

pub const LANE_SNAPSHOT_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A lane-delivered failure; cloneable so one result can fan out to every
/// contributor of a collect turn.
#[derive(Debug, Clone, Serialize)]
pub struct LaneError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for LaneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub type LaneResult = std::result::Result<TurnOutcome, LaneError>;

/// One inbound request for a lane.
pub struct LaneSubmission {
    pub input: String,
    pub input_images: Vec<String>,
    pub route_id: Option<String>,
    pub on_event: Option<EventSink>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lane internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingTurn {
    input: String,
    input_images: Vec<String>,
    route_id: Option<String>,
    responders: Vec<oneshot::Sender<LaneResult>>,
    sinks: Vec<EventSink>,
    cancel: CancelToken,
}

impl PendingTurn {
    fn reject(self, code: &str, message: &str) {
        let error = LaneError {
            code: code.to_owned(),
            message: message.to_owned(),
        };
        for tx in self.responders {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

struct ActiveTurn {
    input: String,
    cancel: CancelToken,
    interrupted: Arc<AtomicBool>,
}

struct LaneState {
    mode: LaneMode,
    cap: usize,
    drop_policy: DropPolicy,
    collect_debounce_ms: u64,
    queue: VecDeque<PendingTurn>,
    active: Option<ActiveTurn>,
    collect_pending: Vec<PendingTurn>,
    collect_epoch: u64,
    pump_running: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSnapshot {
    pub session_id: String,
    pub mode: LaneMode,
    pub cap: usize,
    pub drop_policy: DropPolicy,
    pub collect_debounce_ms: u64,
    pub queued_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_input: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSnapshotFile {
    pub version: u32,
    pub updated_at: chrono::DateTime<Utc>,
    pub lanes: Vec<LaneSnapshot>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LaneScheduler {
    manager: Arc<SessionManager>,
    config: OrchestrationConfig,
    lanes: Mutex<HashMap<String, Arc<Mutex<LaneState>>>>,
    cancel_map: Arc<CancelMap>,
    events: EventBroadcaster,
    snapshot_path: Option<PathBuf>,
    stopping: AtomicBool,
    snapshot_seq: AtomicU64,
    // Handle to ourselves for the pump and debounce tasks we spawn.
    self_ref: Weak<LaneScheduler>,
}

impl LaneScheduler {
    pub fn new(
        manager: Arc<SessionManager>,
        config: OrchestrationConfig,
        events: EventBroadcaster,
        snapshot_path: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            manager,
            config,
            lanes: Mutex::new(HashMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            events,
            snapshot_path,
            stopping: AtomicBool::new(false),
            snapshot_seq: AtomicU64::new(0),
            self_ref: weak.clone(),
        })
    }

    // ── Submission ─────────────────────────────────────────────────

    /// Submit one turn. The receiver resolves when the turn completes, is
    /// dropped by admission, or is cancelled.
    pub fn submit(
        &self,
        session_id: &str,
        submission: LaneSubmission,
    ) -> oneshot::Receiver<LaneResult> {
        let (tx, rx) = oneshot::channel();

        if self.stopping.load(Ordering::Acquire) {
            let _ = tx.send(Err(LaneError {
                code: "gateway_stopping".into(),
                message: "Gateway is stopping".into(),
            }));
            return rx;
        }

        let pending = PendingTurn {
            input: submission.input,
            input_images: submission.input_images,
            route_id: submission.route_id,
            responders: vec![tx],
            sinks: submission.on_event.into_iter().collect(),
            cancel: CancelToken::new(),
        };

        let lane_arc = self.lane(session_id);
        let mode = {
            let mut lane = lane_arc.lock();
            match lane.mode {
                LaneMode::Queue | LaneMode::SteerBacklog => {
                    self.admit_queued(&mut lane, pending);
                }
                LaneMode::Interrupt | LaneMode::Steer => {
                    self.admit_interrupting(&mut lane, pending);
                }
                LaneMode::Collect => {
                    lane.collect_pending.push(pending);
                    lane.collect_epoch += 1;
                    let epoch = lane.collect_epoch;
                    let debounce = lane.collect_debounce_ms;
                    if let Some(scheduler) = self.self_ref.upgrade() {
                        let session = session_id.to_owned();
                        tokio::spawn(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(debounce))
                                .await;
                            scheduler.flush_collect(&session, epoch);
                        });
                    }
                }
            }
            lane.mode
        };

        self.persist_snapshot();
        if mode != LaneMode::Collect {
            self.ensure_pump(session_id);
        }
        rx
    }

    /// Cancel the active turn of a session (control-plane stop).
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.cancel_map.cancel(session_id)
    }

    /// Reject everything and cancel all active turns; submissions after
    /// this resolve with "Gateway is stopping".
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let lanes: Vec<(String, Arc<Mutex<LaneState>>)> = self
            .lanes
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (_, lane_arc) in &lanes {
            let mut lane = lane_arc.lock();
            if let Some(active) = &lane.active {
                active.cancel.cancel();
            }
            for pending in lane.queue.drain(..) {
                pending.reject("gateway_stopping", "Gateway is stopping");
            }
            for pending in lane.collect_pending.drain(..) {
                pending.reject("gateway_stopping", "Gateway is stopping");
            }
        }
        self.cancel_map.cancel_all();
        self.persist_snapshot();
    }

    // ── Admission ──────────────────────────────────────────────────

    fn admit_queued(&self, lane: &mut LaneState, pending: PendingTurn) {
        if lane.queue.len() >= lane.cap {
            match lane.drop_policy {
                DropPolicy::New => {
                    pending.reject("dropped", "dropped by capacity");
                    return;
                }
                // `summarize` is reserved; it degrades to `old`.
                DropPolicy::Old | DropPolicy::Summarize => {
                    if let Some(oldest) = lane.queue.pop_front() {
                        oldest.reject("dropped", "dropped by capacity");
                    }
                }
            }
        }
        lane.queue.push_back(pending);
    }

    fn admit_interrupting(&self, lane: &mut LaneState, pending: PendingTurn) {
        if let Some(active) = &lane.active {
            active.interrupted.store(true, Ordering::Release);
            active.cancel.cancel();
        }
        for queued in lane.queue.drain(..) {
            queued.reject("dropped", "dropped by interrupt");
        }
        for queued in lane.collect_pending.drain(..) {
            queued.reject("dropped", "dropped by interrupt");
        }
        lane.queue.push_back(pending);
    }

    /// Merge the collect window into one synthetic turn once the debounce
    /// timer fires without newer arrivals.
    fn flush_collect(&self, session_id: &str, epoch: u64) {
        let lane_arc = self.lane(session_id);
        {
            let mut lane = lane_arc.lock();
            if lane.collect_epoch != epoch || lane.collect_pending.is_empty() {
                return;
            }

            let mut contributors = std::mem::take(&mut lane.collect_pending);
            let merged_input = contributors
                .iter()
                .map(|c| c.input.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let mut merged = PendingTurn {
                input: merged_input,
                input_images: Vec::new(),
                route_id: contributors.iter().find_map(|c| c.route_id.clone()),
                responders: Vec::new(),
                sinks: Vec::new(),
                cancel: CancelToken::new(),
            };
            for contributor in contributors.drain(..) {
                merged.input_images.extend(contributor.input_images);
                merged.responders.extend(contributor.responders);
                merged.sinks.extend(contributor.sinks);
            }
            self.admit_queued(&mut lane, merged);
        }
        self.persist_snapshot();
        self.ensure_pump(session_id);
    }

    // ── Pump ───────────────────────────────────────────────────────

    fn lane(&self, session_id: &str) -> Arc<Mutex<LaneState>> {
        let mut lanes = self.lanes.lock();
        lanes
            .entry(session_id.to_owned())
            .or_insert_with(|| {
                let (mode, cap, drop_policy, debounce) = self.config.for_session(session_id);
                Arc::new(Mutex::new(LaneState {
                    mode,
                    cap,
                    drop_policy,
                    collect_debounce_ms: debounce,
                    queue: VecDeque::new(),
                    active: None,
                    collect_pending: Vec::new(),
                    collect_epoch: 0,
                    pump_running: false,
                }))
            })
            .clone()
    }

    fn ensure_pump(&self, session_id: &str) {
        let Some(scheduler) = self.self_ref.upgrade() else {
            return;
        };
        let lane_arc = self.lane(session_id);
        {
            let mut lane = lane_arc.lock();
            if lane.pump_running || lane.queue.is_empty() {
                return;
            }
            lane.pump_running = true;
        }

        let session = session_id.to_owned();
        tokio::spawn(async move {
            scheduler.pump(&session, lane_arc).await;
        });
    }

    async fn pump(self: Arc<Self>, session_id: &str, lane_arc: Arc<Mutex<LaneState>>) {
        loop {
            let (turn, interrupted_flag) = {
                let mut lane = lane_arc.lock();
                match lane.queue.pop_front() {
                    Some(turn) => {
                        let interrupted = Arc::new(AtomicBool::new(false));
                        lane.active = Some(ActiveTurn {
                            input: turn.input.clone(),
                            cancel: turn.cancel.clone(),
                            interrupted: interrupted.clone(),
                        });
                        (turn, interrupted)
                    }
                    None => {
                        lane.pump_running = false;
                        break;
                    }
                }
            };
            self.cancel_map.track(session_id, turn.cancel.clone());
            self.persist_snapshot();

            // Fan out every event to each contributor and the /events feed.
            let sinks = turn.sinks;
            let broadcaster = self.events.clone();
            let session_for_events = session_id.to_owned();
            let fan_out: EventSink = Arc::new(move |event| {
                broadcaster.publish_turn(&session_for_events, &event);
                for sink in &sinks {
                    (sink.as_ref())(event.clone());
                }
            });

            let request = TurnRunRequest {
                session_id: session_id.to_owned(),
                input: turn.input,
                input_images: turn.input_images,
                route_id: turn.route_id,
                available_tools: None,
                cancel: turn.cancel.clone(),
                on_event: Some(fan_out),
            };

            let result = self.manager.run_turn(request).await;
            let lane_result: LaneResult = match result {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    let interrupted = interrupted_flag.load(Ordering::Acquire);
                    let message = if interrupted
                        && matches!(e, drost_domain::Error::Cancelled(_))
                    {
                        "turn cancelled by interrupt".to_owned()
                    } else {
                        e.to_string()
                    };
                    Err(LaneError {
                        code: e.code().to_owned(),
                        message,
                    })
                }
            };

            for tx in turn.responders {
                let _ = tx.send(lane_result.clone());
            }

            {
                let mut lane = lane_arc.lock();
                lane.active = None;
            }
            self.cancel_map.remove(session_id);
            self.persist_snapshot();

            if self.stopping.load(Ordering::Acquire) {
                let mut lane = lane_arc.lock();
                for pending in lane.queue.drain(..) {
                    pending.reject("gateway_stopping", "Gateway is stopping");
                }
                lane.pump_running = false;
                break;
            }
        }
    }

    // ── Snapshot persistence / restore ─────────────────────────────

    pub fn snapshot(&self) -> LaneSnapshotFile {
        let lanes = self.lanes.lock();
        let mut entries: Vec<LaneSnapshot> = lanes
            .iter()
            .map(|(session_id, lane_arc)| {
                let lane = lane_arc.lock();
                LaneSnapshot {
                    session_id: session_id.clone(),
                    mode: lane.mode,
                    cap: lane.cap,
                    drop_policy: lane.drop_policy,
                    collect_debounce_ms: lane.collect_debounce_ms,
                    queued_inputs: lane.queue.iter().map(|t| t.input.clone()).collect(),
                    active_input: lane.active.as_ref().map(|a| a.input.clone()),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        LaneSnapshotFile {
            version: LANE_SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            lanes: entries,
        }
    }

    fn persist_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let file = self.snapshot();
        let seq = self.snapshot_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp.{seq}"));
        let result = serde_json::to_string_pretty(&file)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(&tmp, json))
            .and_then(|()| std::fs::rename(&tmp, path));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist lane snapshot");
        }
    }

    /// Restore lanes from a snapshot written by a previous process.
    /// Queued inputs are requeued as fire-and-forget turns; an in-flight
    /// input is requeued at the head with a fresh cancellation token.
    pub fn restore(&self, file: LaneSnapshotFile) {
        if file.version != LANE_SNAPSHOT_VERSION {
            tracing::warn!(version = file.version, "unknown lane snapshot version, skipping");
            return;
        }

        for entry in file.lanes {
            let lane_arc = {
                let mut lanes = self.lanes.lock();
                lanes
                    .entry(entry.session_id.clone())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(LaneState {
                            mode: entry.mode,
                            cap: entry.cap,
                            drop_policy: entry.drop_policy,
                            collect_debounce_ms: entry.collect_debounce_ms,
                            queue: VecDeque::new(),
                            active: None,
                            collect_pending: Vec::new(),
                            collect_epoch: 0,
                            pump_running: false,
                        }))
                    })
                    .clone()
            };

            {
                let mut lane = lane_arc.lock();
                let inputs = entry
                    .active_input
                    .into_iter()
                    .chain(entry.queued_inputs)
                    .take(lane.cap);
                for input in inputs {
                    lane.queue.push_back(PendingTurn {
                        input,
                        input_images: Vec::new(),
                        route_id: None,
                        responders: Vec::new(),
                        sinks: Vec::new(),
                        cancel: CancelToken::new(),
                    });
                }
            }
            tracing::info!(session_id = %entry.session_id, "lane restored from snapshot");
            self.ensure_pump(&entry.session_id);
        }
    }

    /// Load and restore the snapshot file, if any.
    pub fn restore_from_disk(&self) -> std::io::Result<usize> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<LaneSnapshotFile>(&raw) {
            Ok(file) => {
                let count = file.lanes.len();
                self.restore(file);
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "lane snapshot unreadable, starting with empty lanes");
                Ok(0)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
