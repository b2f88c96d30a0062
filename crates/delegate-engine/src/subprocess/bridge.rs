//! Stream-json to execution-state bridge.
//!
//! [`StreamEventProcessor`] consumes one stdout line at a time and builds the
//! [`ExecutionState`] of a single attempt. It returns [`StreamUpdate`]s for
//! the caller to forward to observers and the state tracker.
//!
//! Each tool-call id accumulates fragments independently, so calls streamed
//! in parallel never cut each other short. A streamed call is reported once
//! its fragments are complete: at a terminal event or when the stream ends.
//! Approval requests stay buffered until an auto-approval for that id or a
//! successful terminal result.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use delegate_core::ndjson::{self, InitEvent, ResultEvent, StreamMessage, ToolCallDelta};

use super::executor::{ExitReport, ProcessExit};

/// Identity announced by the child.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredIdentity {
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl DiscoveredIdentity {
    pub const fn is_empty(&self) -> bool {
        self.agent_id.is_none() && self.conversation_id.is_none()
    }
}

/// A tool call surfaced to observers, arguments fully concatenated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: String,
}

/// Usage statistics from the terminal result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub duration_ms: u64,
    pub total_tokens: Option<u64>,
}

/// Something observers should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    IdentityDiscovered(DiscoveredIdentity),
    ToolCallReported(ToolCallRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Streaming,
    AwaitingApproval,
    Approved,
}

#[derive(Debug)]
struct PendingCall {
    name: Option<String>,
    args: String,
    state: CallState,
}

/// Mutable state of one attempt.
#[derive(Debug, Default)]
pub struct ExecutionState {
    identity: DiscoveredIdentity,
    pending: HashMap<String, PendingCall>,
    /// Pending ids in first-seen order.
    pending_order: Vec<String>,
    reported: HashSet<String>,
    result: Option<String>,
    result_seen: bool,
    is_error: bool,
    error: Option<String>,
    stats: UsageStats,
    saw_terminal: bool,
}

impl ExecutionState {
    pub const fn identity(&self) -> &DiscoveredIdentity {
        &self.identity
    }

    /// Accumulated arguments of a call that has not been reported yet.
    pub fn pending_args(&self, id: &str) -> Option<&str> {
        self.pending.get(id).map(|c| c.args.as_str())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_reported(&self, id: &str) -> bool {
        self.reported.contains(id)
    }

    pub fn reported_count(&self) -> usize {
        self.reported.len()
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub const fn stats(&self) -> UsageStats {
        self.stats
    }

    pub const fn saw_terminal(&self) -> bool {
        self.saw_terminal
    }
}

/// A successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSuccess {
    pub report: String,
    pub stats: UsageStats,
}

/// A failed attempt, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub message: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl AttemptFailure {
    /// Text the failure classifier looks at.
    pub fn diagnostic_text(&self) -> String {
        if self.stderr.trim().is_empty() || self.message.contains(self.stderr.trim()) {
            self.message.clone()
        } else {
            format!("{}\n{}", self.message, self.stderr.trim())
        }
    }
}

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed(AttemptSuccess),
    Failed(AttemptFailure),
    Interrupted,
}

/// What an attempt leaves behind once its state is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub outcome: AttemptOutcome,
    pub identity: DiscoveredIdentity,
    pub stats: Option<UsageStats>,
}

/// Incremental processor for one attempt's stdout.
#[derive(Debug, Default)]
pub struct StreamEventProcessor {
    state: ExecutionState,
    /// Target of id-less continuation chunks.
    last_call_id: Option<String>,
    last_line: Option<String>,
}

impl StreamEventProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Process one stdout line. Malformed lines are dropped.
    pub fn process_line(&mut self, line: &str) -> Vec<StreamUpdate> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        self.last_line = Some(line.to_string());

        match ndjson::parse_line(line) {
            Ok(msg) => self.apply(msg),
            Err(e) => {
                debug!(error = %e, "Dropping malformed stream line");
                Vec::new()
            }
        }
    }

    fn apply(&mut self, msg: StreamMessage) -> Vec<StreamUpdate> {
        let mut updates = Vec::new();
        match msg {
            StreamMessage::ToolCall(deltas) => {
                for delta in deltas {
                    self.accumulate(delta, CallState::Streaming);
                }
            }
            StreamMessage::ApprovalRequest(deltas) => {
                for delta in deltas {
                    self.accumulate(delta, CallState::AwaitingApproval);
                }
            }
            StreamMessage::Init(init) => self.capture_identity(init, &mut updates),
            StreamMessage::AutoApproval(delta) => self.approve(delta, &mut updates),
            StreamMessage::Result(result) => self.apply_result(result, &mut updates),
            StreamMessage::Error(err) => {
                self.seal_streamed_calls(&mut updates);
                debug!(error = %err.message, "Child reported an error event");
                self.state.error = Some(err.message);
                self.state.saw_terminal = true;
            }
            StreamMessage::Other { msg_type } => {
                trace!(msg_type, "Ignoring stream event");
            }
        }
        updates
    }

    fn capture_identity(&mut self, init: InitEvent, updates: &mut Vec<StreamUpdate>) {
        let identity = &mut self.state.identity;
        let mut changed = false;
        if identity.agent_id.is_none() && init.agent_id.is_some() {
            identity.agent_id = init.agent_id;
            changed = true;
        }
        if identity.conversation_id.is_none() && init.conversation_id.is_some() {
            identity.conversation_id = init.conversation_id;
            changed = true;
        }
        if changed {
            updates.push(StreamUpdate::IdentityDiscovered(identity.clone()));
        }
    }

    fn accumulate(&mut self, delta: ToolCallDelta, kind: CallState) {
        let Some(id) = delta.id.or_else(|| self.last_call_id.clone()) else {
            trace!("Dropping tool call fragment without an id");
            return;
        };
        self.last_call_id = Some(id.clone());
        if self.state.reported.contains(&id) {
            // Sealed by an auto-approval; its arguments are final.
            trace!(tool_call_id = %id, "Ignoring fragment of a reported tool call");
            return;
        }

        let call = match self.state.pending.entry(id.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.state.pending_order.push(id.clone());
                entry.insert(PendingCall {
                    name: None,
                    args: String::new(),
                    state: kind,
                })
            }
        };
        if call.name.is_none() {
            call.name = delta.name;
        }
        if let Some(fragment) = delta.arguments {
            call.args.push_str(&fragment);
        }

        if kind == CallState::AwaitingApproval && call.state == CallState::Streaming {
            call.state = CallState::AwaitingApproval;
        }
    }

    fn approve(&mut self, delta: ToolCallDelta, updates: &mut Vec<StreamUpdate>) {
        let Some(id) = delta.id.or_else(|| self.last_call_id.clone()) else {
            return;
        };
        if self.state.reported.contains(&id) {
            return;
        }
        if let Some(call) = self.state.pending.get_mut(&id) {
            if call.name.is_none() {
                call.name = delta.name;
            }
            if call.args.is_empty() {
                call.args = delta.arguments.unwrap_or_default();
            }
            call.state = CallState::Approved;
        } else {
            self.state.pending_order.push(id.clone());
            self.state.pending.insert(
                id.clone(),
                PendingCall {
                    name: delta.name,
                    args: delta.arguments.unwrap_or_default(),
                    state: CallState::Approved,
                },
            );
        }
        self.try_report(&id, updates);
    }

    fn apply_result(&mut self, result: ResultEvent, updates: &mut Vec<StreamUpdate>) {
        self.capture_identity(
            InitEvent {
                agent_id: result.agent_id,
                conversation_id: result.conversation_id,
                model: None,
            },
            updates,
        );

        self.state.result_seen = true;
        self.state.saw_terminal = true;
        self.state.is_error = result.is_error;
        self.state.result = result.result;
        if let Some(error) = result.error.filter(|_| result.is_error) {
            self.state.error = Some(error);
        }
        self.state.stats = UsageStats {
            duration_ms: result.duration_ms,
            total_tokens: result.usage.total(),
        };

        self.seal_streamed_calls(updates);
        if !result.is_error {
            // Calls that were approved but never surfaced on their own.
            for id in self.state.pending_order.clone() {
                self.try_report(&id, updates);
            }
        }
    }

    /// Report every streamed call in first-seen order; approval requests stay
    /// buffered.
    fn seal_streamed_calls(&mut self, updates: &mut Vec<StreamUpdate>) {
        let streamed: Vec<String> = self
            .state
            .pending_order
            .iter()
            .filter(|id| {
                self.state
                    .pending
                    .get(*id)
                    .is_some_and(|c| matches!(c.state, CallState::Streaming | CallState::Approved))
            })
            .cloned()
            .collect();
        for id in streamed {
            self.try_report(&id, updates);
        }
    }

    fn try_report(&mut self, id: &str, updates: &mut Vec<StreamUpdate>) {
        if self.state.reported.contains(id) {
            return;
        }
        let Some(name) = self.state.pending.get(id).and_then(|c| c.name.clone()) else {
            return;
        };
        let Some(call) = self.state.pending.remove(id) else {
            return;
        };
        self.state.pending_order.retain(|p| p != id);
        self.state.reported.insert(id.to_string());
        debug!(tool_call_id = id, tool = %name, "Tool call observed");
        updates.push(StreamUpdate::ToolCallReported(ToolCallRecord {
            id: id.to_string(),
            name,
            args: call.args,
        }));
    }

    /// Treat the last line as a result when the child never sent a terminal event.
    fn recover_from_last_line(&mut self, updates: &mut Vec<StreamUpdate>) {
        let Some(line) = self.last_line.take() else {
            return;
        };
        let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(&line) else {
            return;
        };
        if !obj.contains_key("result") {
            return;
        }
        obj.insert("type".to_string(), Value::String("result".to_string()));
        if let Ok(StreamMessage::Result(result)) = ndjson::parse_value(&Value::Object(obj)) {
            debug!("Recovered terminal result from last output line");
            self.apply_result(result, updates);
        }
    }

    /// Close the stream and compute the attempt outcome.
    pub fn finish(mut self, exit: &ExitReport) -> (Vec<StreamUpdate>, AttemptReport) {
        let mut updates = Vec::new();
        self.seal_streamed_calls(&mut updates);
        if exit.exit != ProcessExit::Interrupted && !self.state.saw_terminal {
            self.recover_from_last_line(&mut updates);
        }

        let outcome = self.outcome(exit);
        let stats = self.state.result_seen.then_some(self.state.stats);
        let report = AttemptReport {
            outcome,
            identity: self.state.identity,
            stats,
        };
        (updates, report)
    }

    fn outcome(&mut self, exit: &ExitReport) -> AttemptOutcome {
        let code = match exit.exit {
            ProcessExit::Interrupted => return AttemptOutcome::Interrupted,
            ProcessExit::Exited { code } => code,
        };
        let state = &mut self.state;

        if state.result_seen && !state.is_error {
            return AttemptOutcome::Completed(AttemptSuccess {
                report: state.result.take().unwrap_or_default(),
                stats: state.stats,
            });
        }

        let stderr = exit.stderr.trim();
        let message = state
            .error
            .take()
            .or_else(|| {
                state.is_error.then(|| {
                    state
                        .result
                        .take()
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Subagent reported an error".to_string())
                })
            })
            .or_else(|| (code != Some(0) && !stderr.is_empty()).then(|| stderr.to_string()))
            .unwrap_or_else(|| match code {
                Some(0) => "Subagent exited without producing a result".to_string(),
                Some(c) => format!("Subagent exited with code {c}"),
                None => "Subagent was terminated by a signal".to_string(),
            });

        AttemptOutcome::Failed(AttemptFailure {
            message,
            stderr: exit.stderr.clone(),
            exit_code: code,
        })
    }
}
