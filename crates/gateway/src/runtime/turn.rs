//! The turn loop: provider invocation with failover, tool-call parsing and
//! dispatch, budget enforcement, and finalization.

use std::sync::OnceLock;

use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;

use drost_domain::message::ChatMessage;
use drost_domain::stream::{StreamEvent, TurnEvent, Usage};
use drost_domain::tool::{ToolCall, ToolOutcome};
use drost_domain::{Error, Result};
use drost_providers::TurnRequest;
use drost_sessions::TranscriptWriter;

use super::manager::{SessionManager, TurnOutcome, TurnRunRequest};
use super::toolcall;
use drost_domain::config::RouteConfig;
use drost_domain::session::SessionRecord;

/// Consecutive identical validation failures before the loop is stopped.
const VALIDATION_LOOP_LIMIT: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event emission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Emitter<'a> {
    sink: Option<&'a super::manager::EventSink>,
    transcripts: &'a TranscriptWriter,
    session_id: &'a str,
}

impl Emitter<'_> {
    fn emit(&self, event: TurnEvent) {
        if let Ok(value) = serde_json::to_value(&event) {
            let _ = self.transcripts.append_event(self.session_id, &value);
        }
        if let Some(sink) = self.sink {
            (sink.as_ref())(event);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delta accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fold a delta into the buffer, deduping providers that stream cumulative
/// snapshots instead of diffs: a delta that extends the whole buffer
/// replaces it.
fn absorb_delta(buf: &mut String, delta: &str) {
    if !buf.is_empty() && delta.len() >= buf.len() && delta.starts_with(buf.as_str()) {
        buf.clear();
        buf.push_str(delta);
    } else {
        buf.push_str(delta);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-web heuristic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn auto_web_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(search|news|today|latest|current|headlines|weather|price)\b")
            .expect("auto web regex")
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter invocation with failover
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Collected {
    text: String,
    native_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

/// Invoke the active provider, retrying and walking the fallback chain on
/// retryable failures. A fallback that succeeds rebinds the session's
/// active provider for the rest of the turn and subsequent turns.
async fn invoke_with_failover(
    mgr: &SessionManager,
    record: &mut SessionRecord,
    active: &mut String,
    route: Option<&RouteConfig>,
    messages: &[ChatMessage],
    wire_tools: Vec<drost_domain::tool::ToolDefinition>,
    req: &TurnRunRequest,
    emitter: &Emitter<'_>,
) -> Result<Collected> {
    let failover_cfg = mgr.failover.config().clone();
    let chain = mgr.failover.select_chain(active, route);
    let mut last_error: Option<Error> = None;

    for (position, provider_id) in chain.iter().enumerate() {
        // The head of the chain gets the configured same-provider retries;
        // fallbacks get one attempt each.
        let attempts = if position == 0 {
            1 + failover_cfg.max_retries
        } else {
            1
        };

        for attempt in 0..attempts {
            if req.cancel.is_cancelled() {
                return Err(Error::Cancelled("turn cancelled".into()));
            }
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    failover_cfg.retry_delay_ms,
                ))
                .await;
            }

            let adapter = mgr.providers.get(provider_id)?;
            let turn_req = TurnRequest {
                messages: messages.to_vec(),
                tools: wire_tools.clone(),
                model: None,
                cancel: req.cancel.clone(),
            };

            match adapter.run_turn(&turn_req).await {
                Ok(stream) => match consume_stream(stream, provider_id, req, emitter).await {
                    Ok(collected) => {
                        mgr.failover.record_success(provider_id);
                        if provider_id != active {
                            tracing::warn!(
                                from = %active,
                                to = %provider_id,
                                "failover rebound session provider"
                            );
                            record.active_provider_id = Some(provider_id.clone());
                            *active = provider_id.clone();
                        }
                        return Ok(collected);
                    }
                    Err(e) if e.is_retryable() => {
                        emitter.emit(TurnEvent::ProviderError {
                            provider_id: provider_id.clone(),
                            message: e.to_string(),
                        });
                        mgr.failover.record_failure(provider_id);
                        last_error = Some(e);
                    }
                    Err(e) => {
                        emitter.emit(TurnEvent::ProviderError {
                            provider_id: provider_id.clone(),
                            message: e.to_string(),
                        });
                        return Err(e);
                    }
                },
                Err(e) if e.is_retryable() => {
                    emitter.emit(TurnEvent::ProviderError {
                        provider_id: provider_id.clone(),
                        message: e.to_string(),
                    });
                    mgr.failover.record_failure(provider_id);
                    last_error = Some(e);
                }
                Err(e) => {
                    emitter.emit(TurnEvent::ProviderError {
                        provider_id: provider_id.clone(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::ProviderTransport {
        provider: active.clone(),
        message: "all providers in the failover chain failed".into(),
    }))
}

async fn consume_stream(
    mut stream: drost_domain::stream::BoxStream<'static, Result<StreamEvent>>,
    provider_id: &str,
    req: &TurnRunRequest,
    emitter: &Emitter<'_>,
) -> Result<Collected> {
    let mut text = String::new();
    let mut native_calls = Vec::new();
    let mut usage: Option<Usage> = None;

    while let Some(item) = stream.next().await {
        if req.cancel.is_cancelled() {
            return Err(Error::Cancelled("turn cancelled".into()));
        }
        match item? {
            StreamEvent::Delta { text: delta } => {
                emitter.emit(TurnEvent::ResponseDelta {
                    text: delta.clone(),
                });
                absorb_delta(&mut text, &delta);
            }
            StreamEvent::ToolCall { id, name, input } => {
                native_calls.push(ToolCall { id, name, input });
            }
            StreamEvent::Done { usage: u, .. } => {
                if let Some(u) = u {
                    emitter.emit(TurnEvent::UsageUpdated { usage: u.clone() });
                    usage = Some(u);
                }
            }
            StreamEvent::Error { message } => {
                return Err(Error::ProviderTransport {
                    provider: provider_id.to_owned(),
                    message,
                });
            }
        }
    }

    Ok(Collected {
        text,
        native_calls,
        usage,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) async fn run_turn_loop(
    mgr: &SessionManager,
    req: &TurnRunRequest,
    record: &mut SessionRecord,
) -> Result<TurnOutcome> {
    let emitter = Emitter {
        sink: req.on_event.as_ref(),
        transcripts: &mgr.transcripts,
        session_id: &req.session_id,
    };

    // 1. Provider binding: pending switch applies at this boundary only;
    //    a route's primary overrides it.
    if let Some(pending) = record.pending_provider_id.take() {
        if mgr.providers.contains(&pending) {
            record.active_provider_id = Some(pending);
        } else {
            tracing::warn!(provider_id = %pending, "pending provider vanished, keeping current");
        }
    }

    let route = match req.route_id.as_deref() {
        Some(rid) => Some(
            mgr.route(rid)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown route '{rid}'")))?,
        ),
        None => None,
    };
    if let Some(route) = &route {
        if !mgr.providers.contains(&route.primary_provider_id) {
            return Err(Error::UnknownProvider(route.primary_provider_id.clone()));
        }
        record.active_provider_id = Some(route.primary_provider_id.clone());
        record.metadata.provider_route_id = Some(route.id.clone());
    }

    let mut active = record
        .active_provider_id
        .clone()
        .or_else(|| mgr.providers.default_provider_id().map(str::to_owned))
        .ok_or_else(|| Error::UnknownProvider("no provider configured".into()))?;
    record.active_provider_id = Some(active.clone());

    // 2. Append the user message and persist before any provider I/O.
    let user_msg = ChatMessage::user(&req.input).with_images(req.input_images.clone());
    record.history.push(user_msg);
    record.touch();
    mgr.persist(record)?;
    let _ = mgr.transcripts.append(
        &req.session_id,
        &[TranscriptWriter::line("user", &req.input)],
    );

    // 3. Tool mode.
    let capabilities = mgr.providers.capabilities(&active)?;
    let mut defs = mgr.tools.definitions();
    if let Some(filter) = &req.available_tools {
        defs.retain(|d| filter.iter().any(|f| f == &d.name));
    }
    let native_mode = capabilities.native_tool_calls && !defs.is_empty();
    let tool_names: Vec<String> = defs.iter().map(|d| d.name.clone()).collect();

    // 4. Loop state.
    let mut total_usage = Usage::default();
    let mut tool_calls_used: u32 = 0;
    let mut any_tool_ran = false;
    let mut auto_web_attempted = false;
    let mut validation_streak: Option<(String, u32)> = None;
    let max_rounds = mgr.max_tool_calls as usize + 4;

    for _round in 0..max_rounds {
        // Build the wire conversation.
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(record.history.len() + 1);
        if !native_mode && !defs.is_empty() {
            messages.push(ChatMessage::system(toolcall::text_mode_system_prompt(
                &tool_names,
            )));
        }
        messages.extend(record.history.iter().cloned());

        let wire_tools = if native_mode { defs.clone() } else { Vec::new() };
        let collected = invoke_with_failover(
            mgr,
            record,
            &mut active,
            route.as_ref(),
            &messages,
            wire_tools,
            req,
            &emitter,
        )
        .await?;

        if let Some(u) = &collected.usage {
            total_usage.add(u);
        }

        // ── Native tool calls ──────────────────────────────────────
        if !collected.native_calls.is_empty() {
            record.history.push(ChatMessage::tool(toolcall::native_calls_envelope(
                &collected.native_calls,
            )));

            let mut aborted: Option<String> = None;
            for call in &collected.native_calls {
                if tool_calls_used >= mgr.max_tool_calls {
                    aborted = Some(budget_message(mgr.max_tool_calls));
                    break;
                }
                tool_calls_used += 1;
                any_tool_ran = true;

                let stop = dispatch_one(
                    mgr,
                    req,
                    record,
                    &active,
                    &call.name,
                    call.id.as_deref(),
                    call.input.clone(),
                    &mut validation_streak,
                    &emitter,
                )
                .await?;
                if let Some(reason) = stop {
                    aborted = Some(reason);
                    break;
                }
            }

            if let Some(message) = aborted {
                return finalize_abort(mgr, req, record, &active, message, total_usage, &emitter);
            }
            continue;
        }

        // ── Text-protocol directive ────────────────────────────────
        if let Some(directive) = toolcall::extract_directive(&collected.text) {
            if tool_calls_used >= mgr.max_tool_calls {
                let message = budget_message(mgr.max_tool_calls);
                return finalize_abort(mgr, req, record, &active, message, total_usage, &emitter);
            }
            tool_calls_used += 1;
            any_tool_ran = true;

            let stop = dispatch_one(
                mgr,
                req,
                record,
                &active,
                &directive.name,
                None,
                directive.input,
                &mut validation_streak,
                &emitter,
            )
            .await?;
            if let Some(reason) = stop {
                return finalize_abort(mgr, req, record, &active, reason, total_usage, &emitter);
            }
            continue;
        }

        // ── Auto-web heuristic (at most once per turn) ─────────────
        if !any_tool_ran
            && !auto_web_attempted
            && tool_names.iter().any(|n| n == "web")
            && tool_calls_used < mgr.max_tool_calls
        {
            if let Some(query) = record.last_user_text().map(str::to_owned) {
                if auto_web_re().is_match(&query) {
                    auto_web_attempted = true;
                    any_tool_ran = true;
                    tool_calls_used += 1;

                    let input = serde_json::json!({ "action": "search", "query": query });
                    let stop = dispatch_one(
                        mgr,
                        req,
                        record,
                        &active,
                        "web",
                        None,
                        input,
                        &mut validation_streak,
                        &emitter,
                    )
                    .await?;
                    if let Some(reason) = stop {
                        return finalize_abort(
                            mgr,
                            req,
                            record,
                            &active,
                            reason,
                            total_usage,
                            &emitter,
                        );
                    }
                    continue;
                }
            }
        }

        // ── Finalize ───────────────────────────────────────────────
        return finalize_success(
            mgr,
            req,
            record,
            &active,
            collected.text,
            total_usage,
            &emitter,
        );
    }

    // Safety valve: the budget checks above should stop the loop first.
    let message = budget_message(mgr.max_tool_calls);
    finalize_abort(mgr, req, record, &active, message, total_usage, &emitter)
}

fn budget_message(max: u32) -> String {
    format!("Tool call budget exceeded ({max})")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one tool call, append its `TOOL_RESULT` message, and track the
/// consecutive-validation-failure streak. Returns `Some(reason)` when the
/// turn must abort.
#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    mgr: &SessionManager,
    req: &TurnRunRequest,
    record: &mut SessionRecord,
    active: &str,
    name: &str,
    call_id: Option<&str>,
    mut input: Value,
    validation_streak: &mut Option<(String, u32)>,
    emitter: &Emitter<'_>,
) -> Result<Option<String>> {
    if req.cancel.is_cancelled() {
        return Err(Error::Cancelled("turn cancelled".into()));
    }

    // Normalize known shapes: a bare `web` call means "search for what the
    // user just said".
    if name == "web" && (input.is_null() || input.as_object().is_some_and(|o| o.is_empty())) {
        let query = record.last_user_text().unwrap_or_default().to_owned();
        input = serde_json::json!({ "action": "search", "query": query });
    }

    let sink = |event: TurnEvent| emitter.emit(event);
    let dispatched = mgr
        .tools
        .run_tool(&req.session_id, name, input.clone(), Some(active), Some(&sink))
        .await;

    let outcome = match dispatched {
        Ok(outcome) => {
            *validation_streak = None;
            outcome
        }
        Err(Error::Validation { message, issues }) => {
            let signature = format!("{name}:{input}");
            let streak = match validation_streak.take() {
                Some((prev, count)) if prev == signature => count + 1,
                _ => 1,
            };
            *validation_streak = Some((signature, streak));

            let outcome = ToolOutcome {
                ok: false,
                output: None,
                error: Some(format!(
                    "{message}: {}",
                    issues
                        .iter()
                        .map(|i| format!("{} {}", i.path, i.message))
                        .collect::<Vec<_>>()
                        .join("; ")
                )),
                code: Some("validation_error".into()),
            };
            record.history.push(ChatMessage::tool(toolcall::tool_result_envelope(
                name, call_id, &outcome,
            )));

            if streak >= VALIDATION_LOOP_LIMIT {
                return Ok(Some(format!(
                    "Stopping: tool '{name}' rejected the same input {VALIDATION_LOOP_LIMIT} times in a row."
                )));
            }
            return Ok(None);
        }
        Err(Error::Cancelled(reason)) => return Err(Error::Cancelled(reason)),
        Err(e) => {
            *validation_streak = None;
            ToolOutcome::failure(e.code(), e.to_string())
        }
    };

    record.history.push(ChatMessage::tool(toolcall::tool_result_envelope(
        name, call_id, &outcome,
    )));
    let _ = mgr.transcripts.append(
        &req.session_id,
        &[TranscriptWriter::line(
            "tool",
            &toolcall::tool_result_envelope(name, call_id, &outcome),
        )],
    );
    Ok(None)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn finalize_success(
    mgr: &SessionManager,
    req: &TurnRunRequest,
    record: &mut SessionRecord,
    active: &str,
    text: String,
    usage: Usage,
    emitter: &Emitter<'_>,
) -> Result<TurnOutcome> {
    record.history.push(ChatMessage::assistant(&text));
    record.touch();
    mgr.persist(record)?;
    let _ = mgr.transcripts.append(
        &req.session_id,
        &[TranscriptWriter::line("assistant", &text)],
    );

    emitter.emit(TurnEvent::ResponseCompleted { text: text.clone() });

    Ok(TurnOutcome {
        provider_id: active.to_owned(),
        response: text,
        usage,
    })
}

/// A loop abort (budget, validation streak) still terminates the history
/// with a single assistant message; the submitter sees a normal outcome
/// plus a `provider.error` event.
fn finalize_abort(
    mgr: &SessionManager,
    req: &TurnRunRequest,
    record: &mut SessionRecord,
    active: &str,
    message: String,
    usage: Usage,
    emitter: &Emitter<'_>,
) -> Result<TurnOutcome> {
    emitter.emit(TurnEvent::ProviderError {
        provider_id: active.to_owned(),
        message: message.clone(),
    });
    finalize_success(mgr, req, record, active, message, usage, emitter)
}
