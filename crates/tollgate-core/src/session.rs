//! The session orchestrator: one runtime turn per `send`, every tool call
//! routed through the permission layer.

use futures_util::{Stream, StreamExt, stream};
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tollgate_permissions::{
    ApprovalCorrelator, ApprovalRequest, AuditEntry, AuditResult, AuditSink, CheckDetail,
    Decision, Outcome, PendingApproval, PermissionEngine, Resolution,
};
use tollgate_types::{
    Action, AgentRuntime, QueryRequest, RuntimeError, RuntimeEvent, RuntimeStream,
    ToolAuthorizer, ToolPermission,
};

/// File in the working directory used as the system prompt when none is given.
pub const SYSTEM_PROMPT_FILE: &str = "SOUL.md";

/// Normalized events yielded by [`Session::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A tool call was authorized and is about to run.
    ToolStart {
        tool_name: String,
        input: serde_json::Value,
    },
    /// A tool call was refused by settings or by a human.
    ToolDenied { tool_name: String, reason: String },
    /// A tool call is waiting for a human decision.
    PermissionRequest(ApprovalRequest),
    /// The tool's content block finished.
    ToolEnd { tool_name: String },
    /// Assistant text, outside tool blocks.
    Text(String),
    /// The turn finished.
    Result {
        content: String,
        session_id: Option<String>,
    },
    /// The runtime failed. Always the last event of the turn.
    Error(String),
}

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    /// The engine is deciding a tool call.
    Evaluating,
    /// A tool call is suspended on a human decision.
    AwaitingHuman,
    /// A human decision is being applied.
    Applying,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Working directory passed to the runtime. Defaults to the current dir.
    pub cwd: Option<PathBuf>,
    /// Overrides the `SOUL.md` system prompt.
    pub system_prompt: Option<String>,
    /// Runtime session to resume on the first turn.
    pub resume: Option<String>,
}

/// State shared between the session, its turns and their authorizers.
struct Inner {
    engine: Arc<PermissionEngine>,
    correlator: ApprovalCorrelator,
    audit: Arc<dyn AuditSink>,
    session_id: Mutex<Option<String>>,
    state: Mutex<TurnState>,
}

impl Inner {
    fn set_state(&self, state: TurnState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> TurnState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn audit(&self, action: &Action, detail: &CheckDetail, result: AuditResult) {
        self.audit.append(&AuditEntry::new(action, detail, result));
    }

    /// Apply and audit a decision that arrived after its turn was dropped.
    /// There is no tool call left to allow, but a session grant still counts.
    fn settle_orphaned(&self, action: &Action, detail: &CheckDetail, resolution: &Resolution) {
        let result = audit_result(resolution);
        if *resolution == Resolution::Decided(Decision::AllowForSession) {
            self.engine
                .record_session_grant(&action.tool_name, &action.input);
        }
        tracing::info!(
            tool = %action.tool_name,
            result = ?result,
            "approval settled after its turn ended"
        );
        self.audit(action, detail, result);
    }

    fn set_session_id(&self, id: String) {
        let mut current = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() != Some(id.as_str()) {
            tracing::debug!(session_id = %id, "runtime session id");
            *current = Some(id);
        }
    }
}

/// A conversation with the agent runtime, gated by the permission layer.
pub struct Session {
    inner: Arc<Inner>,
    runtime: Arc<dyn AgentRuntime>,
    cwd: PathBuf,
    system_prompt: Option<String>,
}

impl Session {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        engine: Arc<PermissionEngine>,
        correlator: ApprovalCorrelator,
        audit: Arc<dyn AuditSink>,
        options: SessionOptions,
    ) -> Self {
        let cwd = options
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let system_prompt = options
            .system_prompt
            .or_else(|| load_system_prompt(&cwd));

        Self {
            inner: Arc::new(Inner {
                engine,
                correlator,
                audit,
                session_id: Mutex::new(options.resume),
                state: Mutex::new(TurnState::Idle),
            }),
            runtime,
            cwd,
            system_prompt,
        }
    }

    /// Submit a message and stream the turn's normalized events.
    ///
    /// Nothing happens until the stream is first polled. Dropping the stream
    /// abandons the turn. Its pending approvals stay resolvable until they
    /// are answered or time out, and are audited either way.
    pub fn send(&self, prompt: &str) -> impl Stream<Item = SessionEvent> + Send + use<> {
        let turn = Turn {
            phase: Phase::NotStarted(prompt.to_string()),
            buffer: VecDeque::new(),
            current_tool: None,
            inner: Arc::clone(&self.inner),
            runtime: Arc::clone(&self.runtime),
            cwd: self.cwd.clone(),
            system_prompt: self.system_prompt.clone(),
        };
        stream::unfold(turn, |mut turn| async move {
            let event = turn.next_event().await?;
            Some((event, turn))
        })
    }

    pub fn engine(&self) -> &Arc<PermissionEngine> {
        &self.inner.engine
    }

    /// The correlator to hand to the approval channel for resolving requests.
    pub fn correlator(&self) -> &ApprovalCorrelator {
        &self.inner.correlator
    }

    /// The runtime's session id, once reported.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id()
    }

    pub fn state(&self) -> TurnState {
        self.inner.state()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Forget all "allow for session" grants. Pending approvals are kept.
    pub fn reset_session_grants(&self) {
        self.inner.engine.reset_session_grants();
    }
}

fn load_system_prompt(cwd: &std::path::Path) -> Option<String> {
    let path = cwd.join(SYSTEM_PROMPT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) if !content.trim().is_empty() => Some(content),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

enum Phase {
    NotStarted(String),
    Streaming {
        stream: RuntimeStream,
        notices: mpsc::UnboundedReceiver<SessionEvent>,
    },
    Finished,
}

enum Polled {
    Notice(SessionEvent),
    Runtime(Option<Result<RuntimeEvent, RuntimeError>>),
}

/// One in-flight turn. Owns everything it needs so the event stream is `'static`.
///
/// Dropping it mid-stream returns the session to `Idle`.
struct Turn {
    phase: Phase,
    buffer: VecDeque<SessionEvent>,
    current_tool: Option<String>,
    inner: Arc<Inner>,
    runtime: Arc<dyn AgentRuntime>,
    cwd: PathBuf,
    system_prompt: Option<String>,
}

impl Turn {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Some(event);
            }

            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::NotStarted(prompt) => self.start(prompt).await,
                Phase::Streaming {
                    mut stream,
                    mut notices,
                } => {
                    // Authorizer notices first: they belong before the event
                    // the runtime emits once the hook returns.
                    let polled = tokio::select! {
                        biased;
                        Some(notice) = notices.recv() => Polled::Notice(notice),
                        item = stream.next() => Polled::Runtime(item),
                    };
                    let item = match polled {
                        Polled::Notice(notice) => {
                            self.buffer.push_back(notice);
                            self.phase = Phase::Streaming { stream, notices };
                            continue;
                        }
                        Polled::Runtime(item) => item,
                    };
                    while let Ok(notice) = notices.try_recv() {
                        self.buffer.push_back(notice);
                    }
                    match item {
                        Some(Ok(event)) => {
                            self.apply(event);
                            self.phase = Phase::Streaming { stream, notices };
                        }
                        Some(Err(e)) => {
                            tracing::warn!(runtime = self.runtime.name(), "runtime error: {e}");
                            self.inner.set_state(TurnState::Failed);
                            self.buffer.push_back(SessionEvent::Error(e.to_string()));
                        }
                        None => self.inner.set_state(TurnState::Completed),
                    }
                }
            }
        }
    }

    async fn start(&mut self, prompt: String) {
        let request = QueryRequest {
            prompt,
            resume: self.inner.session_id(),
            cwd: self.cwd.clone(),
            system_prompt: self.system_prompt.clone(),
        };
        tracing::debug!(
            runtime = self.runtime.name(),
            resume = request.resume.as_deref(),
            "starting turn"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let authorizer = Arc::new(SessionAuthorizer {
            inner: Arc::clone(&self.inner),
            notices: tx,
        });
        self.inner.set_state(TurnState::Streaming);

        match self.runtime.query(request, authorizer).await {
            Ok(stream) => {
                self.phase = Phase::Streaming {
                    stream,
                    notices: rx,
                };
            }
            Err(e) => {
                tracing::warn!(runtime = self.runtime.name(), "failed to start turn: {e}");
                self.inner.set_state(TurnState::Failed);
                self.buffer.push_back(SessionEvent::Error(e.to_string()));
            }
        }
    }

    fn apply(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Init { session_id } => self.inner.set_session_id(session_id),
            RuntimeEvent::ToolUseStart { name, .. } => self.current_tool = Some(name),
            RuntimeEvent::TextDelta { text } => {
                if self.current_tool.is_none() {
                    self.buffer.push_back(SessionEvent::Text(text));
                }
            }
            RuntimeEvent::ContentBlockStop => {
                if let Some(tool_name) = self.current_tool.take() {
                    self.buffer.push_back(SessionEvent::ToolEnd { tool_name });
                }
            }
            RuntimeEvent::Result {
                content,
                session_id,
            } => {
                if let Some(id) = session_id {
                    self.inner.set_session_id(id);
                }
                self.buffer.push_back(SessionEvent::Result {
                    content,
                    session_id: self.inner.session_id(),
                });
            }
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if matches!(self.phase, Phase::Streaming { .. }) {
            tracing::debug!(runtime = self.runtime.name(), "turn dropped mid-stream");
            self.inner.set_state(TurnState::Idle);
        }
    }
}

fn audit_result(resolution: &Resolution) -> AuditResult {
    match resolution {
        Resolution::Decided(Decision::Allow) => AuditResult::UserAllowed,
        Resolution::Decided(Decision::AllowForSession) => AuditResult::UserSessionGrant,
        Resolution::Decided(Decision::Deny { .. }) => AuditResult::UserDenied,
        Resolution::TimedOut(_) | Resolution::Abandoned => AuditResult::ApprovalTimeout,
    }
}

/// A tool call suspended on a human decision.
///
/// If the hook future is dropped mid-wait, the wait moves to a background
/// task so the request stays resolvable and still gets its audit entry.
struct AwaitingApproval {
    pending: Option<PendingApproval>,
    inner: Arc<Inner>,
    action: Action,
    detail: CheckDetail,
}

impl AwaitingApproval {
    async fn wait(&mut self) -> Resolution {
        let resolution = match self.pending.as_mut() {
            Some(pending) => pending.wait_resolution().await,
            None => Resolution::Abandoned,
        };
        self.pending = None;
        resolution
    }
}

impl Drop for AwaitingApproval {
    fn drop(&mut self) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let action = self.action.clone();
        let detail = self.detail.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(request_id = %pending.id(), "turn dropped, approval stays open");
                handle.spawn(async move {
                    let resolution = pending.wait_resolution().await;
                    inner.settle_orphaned(&action, &detail, &resolution);
                });
            }
            Err(_) => {
                drop(pending);
                inner.settle_orphaned(&action, &detail, &Resolution::Abandoned);
            }
        }
    }
}

/// The runtime's per-call hook for one turn.
struct SessionAuthorizer {
    inner: Arc<Inner>,
    notices: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionAuthorizer {
    fn notify(&self, event: SessionEvent) {
        // The turn stream may already be gone; the decision still stands.
        let _ = self.notices.send(event);
    }

    fn audit(&self, action: &Action, detail: &CheckDetail, result: AuditResult) {
        self.inner.audit(action, detail, result);
    }

    fn allow(&self, action: Action) -> ToolPermission {
        self.notify(SessionEvent::ToolStart {
            tool_name: action.tool_name.clone(),
            input: action.input.clone(),
        });
        ToolPermission::Allow {
            updated_input: action.input,
        }
    }

    fn deny(&self, action: &Action, reason: String) -> ToolPermission {
        self.notify(SessionEvent::ToolDenied {
            tool_name: action.tool_name.clone(),
            reason: reason.clone(),
        });
        ToolPermission::Deny { message: reason }
    }

    async fn decide(&self, action: Action) -> ToolPermission {
        self.inner.set_state(TurnState::Evaluating);
        let detail = self.inner.engine.evaluate(&action);

        let permission = match detail.outcome {
            Outcome::Allow => {
                self.audit(&action, &detail, AuditResult::Allow);
                self.allow(action)
            }
            Outcome::Deny => {
                self.audit(&action, &detail, AuditResult::Deny);
                let reason = match &detail.pattern {
                    Some(pattern) => format!("Denied by settings ({pattern})"),
                    None => "Denied by settings".to_string(),
                };
                self.deny(&action, reason)
            }
            Outcome::Ask | Outcome::AskDestructive => {
                let is_destructive = detail.outcome == Outcome::AskDestructive;
                let (request, pending) = self.inner.correlator.request(&action, is_destructive);
                let mut awaiting = AwaitingApproval {
                    pending: Some(pending),
                    inner: Arc::clone(&self.inner),
                    action: action.clone(),
                    detail: detail.clone(),
                };
                self.notify(SessionEvent::PermissionRequest(request));

                self.inner.set_state(TurnState::AwaitingHuman);
                let resolution = awaiting.wait().await;
                self.inner.set_state(TurnState::Applying);
                self.apply_resolution(action, &detail, resolution)
            }
        };

        self.inner.set_state(TurnState::Streaming);
        permission
    }

    fn apply_resolution(
        &self,
        action: Action,
        detail: &CheckDetail,
        resolution: Resolution,
    ) -> ToolPermission {
        let result = audit_result(&resolution);
        tracing::info!(
            tool = %action.tool_name,
            result = ?result,
            "approval decision applied"
        );

        match resolution.into_decision() {
            Decision::Allow => {
                self.audit(&action, detail, result);
                self.allow(action)
            }
            Decision::AllowForSession => {
                self.inner
                    .engine
                    .record_session_grant(&action.tool_name, &action.input);
                self.audit(&action, detail, result);
                self.allow(action)
            }
            Decision::Deny { reason } => {
                self.audit(&action, detail, result);
                self.deny(&action, reason)
            }
        }
    }
}

impl ToolAuthorizer for SessionAuthorizer {
    fn authorize<'a>(
        &'a self,
        tool_name: &'a str,
        input: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = ToolPermission> + Send + 'a>> {
        Box::pin(self.decide(Action::new(tool_name, input.clone())))
    }
}
