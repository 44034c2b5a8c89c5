//! Dispatcher
//!
//! Single entry point for tool calls. Each call:
//! 1. Validates the task and resolves the tool
//! 2. Checks the lock table for every path the tool will mutate
//! 3. Invokes the tool (locally or through the proxy) behind a panic guard
//! 4. Folds the outcome into a stamped envelope and records it
//!
//! Nothing a tool does can escape as an `Err` or a panic; every call ends in
//! an envelope.

use crate::cli::config::ToolsConfig;
use crate::errors::{EngineError, Result};
use crate::locks::{task_lock_key, LockTable, Requester};
use crate::logging::TaskProcessLog;
use crate::proxy::DispatchRequest;
use crate::task::TaskRegistry;
use crate::tools::catalog::ToolCatalog;
use crate::tools::state::{CallEvent, CallState};
use crate::tools::types::{ExecutionEnvelope, Tool, ToolContext, ToolKind, ToolStats};
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Envelopes of recently completed requests, keyed by request id, plus the
/// requests still running. An id is in at most one of the two maps.
#[derive(Debug, Default)]
struct ReplayCache {
    capacity: usize,
    entries: HashMap<String, ReplayEntry>,
    order: VecDeque<String>,
    in_flight: HashMap<String, InFlight>,
}

#[derive(Debug, Clone)]
struct ReplayEntry {
    task_id: String,
    tool_name: String,
    envelope: ExecutionEnvelope,
}

#[derive(Debug)]
struct InFlight {
    task_id: String,
    tool_name: String,
    done: watch::Receiver<Option<ExecutionEnvelope>>,
}

/// What to do with a request carrying an id
enum Admission {
    /// First sighting: run it and publish the envelope through the sender
    Run(watch::Sender<Option<ExecutionEnvelope>>),
    /// Same id still running: wait for its envelope
    Wait(watch::Receiver<Option<ExecutionEnvelope>>),
    /// Already answered, or the id belongs to a different call
    Answer(ExecutionEnvelope),
    /// Replay state unavailable; run without it
    Untracked,
}

/// Clears the in-flight slot if the running call is dropped before finishing
struct InFlightGuard<'a> {
    replay: &'a Mutex<ReplayCache>,
    request_id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut replay) = self.replay.lock() {
            replay.in_flight.remove(self.request_id);
        }
    }
}

impl ReplayCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    fn get(&self, request_id: &str) -> Option<&ReplayEntry> {
        self.entries.get(request_id)
    }

    fn insert(&mut self, request_id: String, entry: ReplayEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(request_id.clone(), entry).is_none() {
            self.order.push_back(request_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// Tool call dispatcher
pub struct Dispatcher {
    tasks: Arc<TaskRegistry>,
    locks: Arc<LockTable>,
    catalog: Arc<ToolCatalog>,

    /// Bound for process-spawning tools when the call gives none
    default_timeout: Duration,

    max_output_size: usize,

    replay: Mutex<ReplayCache>,
    stats: Mutex<ToolStats>,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<TaskRegistry>,
        locks: Arc<LockTable>,
        catalog: Arc<ToolCatalog>,
        config: &ToolsConfig,
    ) -> Self {
        Self {
            tasks,
            locks,
            catalog,
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            max_output_size: config.max_output_bytes,
            replay: Mutex::new(ReplayCache::new(config.replay_capacity)),
            stats: Mutex::new(ToolStats::default()),
        }
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Snapshot of dispatch statistics
    pub fn stats(&self) -> ToolStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Execute `tool_name` against `task_id`
    pub async fn execute(&self, task_id: &str, tool_name: &str, params: Value) -> ExecutionEnvelope {
        self.execute_request(DispatchRequest::new(task_id, tool_name, params))
            .await
    }

    /// Execute a wire request, honouring its `request_id` for replay.
    ///
    /// A duplicate that arrives while the first call is still running waits
    /// for that call's envelope instead of running the tool again.
    pub async fn execute_request(&self, request: DispatchRequest) -> ExecutionEnvelope {
        let DispatchRequest {
            task_id,
            tool_name,
            params,
            request_id,
        } = request;

        let Some(id) = request_id else {
            return self.dispatch_traced(&task_id, &tool_name, params).await;
        };

        match self.admit(&id, &task_id, &tool_name) {
            Admission::Answer(envelope) => envelope,
            Admission::Untracked => self.dispatch_traced(&task_id, &tool_name, params).await,
            Admission::Wait(mut done) => {
                debug!(request_id = %id, "waiting on in-flight request");
                let finished = done
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|envelope| envelope.clone());
                finished.unwrap_or_else(|| {
                    ExecutionEnvelope::failure(format!(
                        "request_id {} was abandoned before it completed",
                        id
                    ))
                    .stamped(&task_id, &tool_name, Duration::ZERO)
                })
            }
            Admission::Run(publish) => {
                let _guard = InFlightGuard {
                    replay: &self.replay,
                    request_id: &id,
                };
                let envelope = self.dispatch_traced(&task_id, &tool_name, params).await;

                if let Ok(mut replay) = self.replay.lock() {
                    replay.in_flight.remove(&id);
                    replay.insert(
                        id.clone(),
                        ReplayEntry {
                            task_id,
                            tool_name,
                            envelope: envelope.clone(),
                        },
                    );
                }
                publish.send_replace(Some(envelope.clone()));
                envelope
            }
        }
    }

    async fn dispatch_traced(&self, task_id: &str, tool_name: &str, params: Value) -> ExecutionEnvelope {
        let span = tracing::info_span!("dispatch", task_id = %task_id, tool = %tool_name);
        self.dispatch(task_id, tool_name, params)
            .instrument(span)
            .await
    }

    /// Check and register `request_id` under one lock
    fn admit(&self, request_id: &str, task_id: &str, tool_name: &str) -> Admission {
        let Ok(mut replay) = self.replay.lock() else {
            return Admission::Untracked;
        };

        let owner = replay
            .get(request_id)
            .map(|entry| (entry.task_id.as_str(), entry.tool_name.as_str()))
            .or_else(|| {
                replay
                    .in_flight
                    .get(request_id)
                    .map(|running| (running.task_id.as_str(), running.tool_name.as_str()))
            });
        if let Some((owner_task, owner_tool)) = owner {
            if owner_task != task_id || owner_tool != tool_name {
                warn!(request_id, "request id reused for a different call");
                return Admission::Answer(
                    ExecutionEnvelope::failure(format!(
                        "request_id {} was already used for {} on task {}",
                        request_id, owner_tool, owner_task
                    ))
                    .stamped(task_id, tool_name, Duration::ZERO),
                );
            }
        }

        if let Some(entry) = replay.get(request_id) {
            debug!(request_id, "replaying stored envelope");
            return Admission::Answer(entry.envelope.clone());
        }
        if let Some(running) = replay.in_flight.get(request_id) {
            return Admission::Wait(running.done.clone());
        }

        let (publish, done) = watch::channel(None);
        replay.in_flight.insert(
            request_id.to_string(),
            InFlight {
                task_id: task_id.to_string(),
                tool_name: tool_name.to_string(),
                done,
            },
        );
        Admission::Run(publish)
    }

    async fn dispatch(&self, task_id: &str, tool_name: &str, params: Value) -> ExecutionEnvelope {
        let start = Instant::now();
        let mut state = CallState::Pending;

        let (envelope, final_state) = match self.prepare(&mut state, task_id, tool_name, &params).await {
            Ok((tool, ctx)) => self.invoke(state, tool, &ctx, params.clone()).await,
            Err(e) => {
                debug!(error = %e, "call rejected before invocation");
                (ExecutionEnvelope::from_error(&e), advance(state, CallEvent::Fail))
            }
        };

        let elapsed = start.elapsed();
        let envelope = envelope.stamped(task_id, tool_name, elapsed);

        if envelope.success {
            info!(state = final_state.as_str(), elapsed_ms = elapsed.as_millis() as u64, "tool call finished");
        } else {
            warn!(
                state = final_state.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = envelope.error.as_deref().unwrap_or_default(),
                "tool call failed"
            );
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.record(envelope.success, final_state == CallState::TimedOut, elapsed);
        }

        let log = TaskProcessLog::new(&self.tasks.workspace_path(task_id), task_id);
        if self.tasks.exists(task_id) {
            if let Err(e) = log.record(tool_name, final_state, &params, &envelope).await {
                warn!(error = %e, path = %log.path().display(), "failed to append process log");
            }
        }

        envelope
    }

    /// Task lookup, tool resolution and lock checks. No side effects.
    async fn prepare(
        &self,
        state: &mut CallState,
        task_id: &str,
        tool_name: &str,
        params: &Value,
    ) -> Result<(Arc<dyn Tool>, ToolContext)> {
        if !self.tasks.exists(task_id) {
            return Err(EngineError::Validation(format!("Task not found: {}", task_id)));
        }
        *state = state.transition(CallEvent::Resolve)?;

        let tool = self
            .catalog
            .get(tool_name)
            .await
            .ok_or_else(|| EngineError::Validation(format!("Unknown tool: {}", tool_name)))?;

        let timeout = params["timeout"]
            .as_u64()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let ctx = ToolContext::new(task_id, self.tasks.workspace_path(task_id))?
            .with_timeout(timeout)
            .with_max_output_size(self.max_output_size)
            .with_requester(Requester::from_params(params));

        for param in &tool.descriptor().path_params {
            let Some(path) = params[param].as_str().filter(|p| !p.is_empty()) else {
                continue;
            };
            let key = task_lock_key(&ctx.jail, task_id, path)?;
            self.locks.check_access(&key, &ctx.requester)?;
        }

        Ok((tool, ctx))
    }

    async fn invoke(
        &self,
        state: CallState,
        tool: Arc<dyn Tool>,
        ctx: &ToolContext,
        params: Value,
    ) -> (ExecutionEnvelope, CallState) {
        let event = match tool.descriptor().kind {
            ToolKind::Local => CallEvent::RunLocal,
            ToolKind::Proxy => CallEvent::Forward,
        };
        let state = advance(state, event);

        let outcome = AssertUnwindSafe(tool.execute(ctx, params))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(envelope)) => {
                let event = if envelope.success {
                    CallEvent::Complete
                } else {
                    CallEvent::Fail
                };
                (envelope, advance(state, event))
            }
            Ok(Err(e @ EngineError::Timeout { .. })) => {
                (ExecutionEnvelope::from_error(&e), advance(state, CallEvent::Expire))
            }
            Ok(Err(e)) => (ExecutionEnvelope::from_error(&e), advance(state, CallEvent::Fail)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "tool panicked");
                (
                    ExecutionEnvelope::failure(format!("Tool panicked: {}", message)),
                    advance(state, CallEvent::Fail),
                )
            }
        }
    }
}

/// Apply `event`, logging (not propagating) an impossible transition
fn advance(state: CallState, event: CallEvent) -> CallState {
    match state.transition(event) {
        Ok(next) => next,
        Err(e) => {
            error!(error = %e, "call state machine violated");
            CallState::Failed
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
