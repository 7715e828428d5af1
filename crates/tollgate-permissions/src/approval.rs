//! Approval correlation between suspended tool calls and human decisions.
//!
//! ```text
//! request()  → new UUID, store oneshot sender, publish to channel
//!      │
//!      ├─ pending: HashMap<id, oneshot::Sender<Decision>>
//!      │
//! resolve()  → remove sender, complete the waiter (at most once)
//! wait()     → decision, or deny once the deadline passes
//! ```

use crate::channel::ApprovalChannel;
use crate::types::{ApprovalRequest, Decision, DecisionPayload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tollgate_types::Action;
use uuid::Uuid;

/// How long an approval may stay unanswered before it is denied.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Decision>>>>;

fn lock(map: &PendingMap) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Decision>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a pending approval ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A decision arrived through [`ApprovalCorrelator::resolve`].
    Decided(Decision),
    /// Nobody answered within the timeout.
    TimedOut(Duration),
    /// Every correlator was dropped before a decision arrived.
    Abandoned,
}

impl Resolution {
    /// The decision to apply. Anything but an explicit answer is a deny.
    pub fn into_decision(self) -> Decision {
        match self {
            Self::Decided(decision) => decision,
            Self::TimedOut(after) => {
                Decision::deny(format!("Approval timed out after {}s", after.as_secs()))
            }
            Self::Abandoned => Decision::deny("Approval request was abandoned"),
        }
    }
}

/// Tracks outstanding approval requests by id.
///
/// Cloning shares the same pending map, so the channel side can hold a
/// clone and resolve requests while the session awaits them.
#[derive(Clone)]
pub struct ApprovalCorrelator {
    pending: PendingMap,
    channel: Option<Arc<dyn ApprovalChannel>>,
    timeout: Duration,
}

impl ApprovalCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            channel: None,
            timeout,
        }
    }

    /// Publish every new request to `channel`.
    pub fn with_channel(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open an approval request for an action and publish it.
    ///
    /// Returns the request (for display) and the handle to await its decision.
    pub fn request(&self, action: &Action, is_destructive: bool) -> (ApprovalRequest, PendingApproval) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        let request = ApprovalRequest {
            id: id.clone(),
            tool_name: action.tool_name.clone(),
            input: action.input.clone(),
            is_destructive,
        };
        tracing::info!(
            request_id = %id,
            tool = %request.tool_name,
            destructive = is_destructive,
            "approval requested"
        );
        if let Some(channel) = &self.channel {
            channel.publish(&request);
        }

        let pending = PendingApproval {
            id,
            rx,
            pending: Arc::downgrade(&self.pending),
            timeout: self.timeout,
            deadline: Instant::now() + self.timeout,
        };
        (request, pending)
    }

    /// Deliver a decision for a pending request.
    ///
    /// Returns `true` if a waiting request received it; `false` if the id is
    /// unknown, already resolved, expired, or its waiter is gone.
    pub fn resolve(&self, id: &str, decision: Decision) -> bool {
        // Send while holding the lock so a concurrent timeout sees the decision.
        let mut pending = lock(&self.pending);
        let Some(sender) = pending.remove(id) else {
            tracing::warn!(request_id = %id, "ignoring decision for unknown or already resolved approval");
            return false;
        };
        let delivered = sender.send(decision).is_ok();
        drop(pending);

        if !delivered {
            tracing::warn!(request_id = %id, "approval waiter went away before the decision arrived");
            return false;
        }
        tracing::debug!(request_id = %id, "approval resolved");
        true
    }

    /// Deliver a decision in the approval channel's callback shape.
    pub fn resolve_payload(&self, payload: &DecisionPayload) -> bool {
        self.resolve(&payload.id, payload.decision())
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Default for ApprovalCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_TIMEOUT)
    }
}

/// Handle to await the decision for one approval request.
///
/// The timeout runs from the moment the request was opened, however many
/// times the wait is interrupted. Dropping the handle withdraws the request.
pub struct PendingApproval {
    id: String,
    rx: oneshot::Receiver<Decision>,
    pending: Weak<Mutex<HashMap<String, oneshot::Sender<Decision>>>>,
    timeout: Duration,
    deadline: Instant,
}

impl PendingApproval {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the decision. An unanswered request becomes a deny.
    pub async fn wait(mut self) -> Decision {
        self.wait_resolution().await.into_decision()
    }

    /// Wait for the request to end, reporting how it ended.
    ///
    /// Cancelling this future leaves the request pending, so the wait can be
    /// resumed. Once it has returned, the handle is spent.
    pub async fn wait_resolution(&mut self) -> Resolution {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(decision)) => Resolution::Decided(decision),
            Ok(Err(_)) => {
                tracing::warn!(request_id = %self.id, "approval abandoned");
                Resolution::Abandoned
            }
            Err(_) => {
                let withdrawn = self.withdraw();
                // resolve() took the sender first: its decision wins the race.
                if !withdrawn {
                    if let Ok(decision) = self.rx.try_recv() {
                        return Resolution::Decided(decision);
                    }
                }
                tracing::warn!(
                    request_id = %self.id,
                    "approval timed out after {}s",
                    self.timeout.as_secs()
                );
                Resolution::TimedOut(self.timeout)
            }
        }
    }

    /// Remove this request from the pending map. Returns whether it was still there.
    fn withdraw(&self) -> bool {
        match self.pending.upgrade() {
            Some(pending) => lock(&pending).remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        self.withdraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn edit() -> Action {
        Action::new("Edit", json!({ "file_path": "/tmp/x" }))
    }

    #[tokio::test]
    async fn test_request_and_resolve() {
        let correlator = ApprovalCorrelator::default();
        let (request, pending) = correlator.request(&edit(), false);
        assert_eq!(request.tool_name, "Edit");
        assert!(!request.is_destructive);
        assert_eq!(pending.id(), request.id);
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.resolve(&request.id, Decision::Allow));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(pending.wait().await, Decision::Allow);
    }

    #[tokio::test]
    async fn test_second_resolve_is_noop() {
        let correlator = ApprovalCorrelator::default();
        let (request, pending) = correlator.request(&edit(), false);

        assert!(correlator.resolve(&request.id, Decision::AllowForSession));
        assert!(!correlator.resolve(&request.id, Decision::deny("too late")));
        assert_eq!(pending.wait().await, Decision::AllowForSession);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let correlator = ApprovalCorrelator::default();
        assert!(!correlator.resolve("nonexistent", Decision::Allow));
    }

    #[tokio::test]
    async fn test_unique_ids() {
        let correlator = ApprovalCorrelator::default();
        let (a, _pa) = correlator.request(&edit(), false);
        let (b, _pb) = correlator.request(&edit(), false);
        assert_ne!(a.id, b.id);
        assert_eq!(correlator.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let correlator = ApprovalCorrelator::default();
        let (a, pending_a) = correlator.request(&edit(), false);
        let (b, pending_b) = correlator.request(&edit(), true);

        assert!(correlator.resolve(&b.id, Decision::deny("no")));
        assert!(correlator.is_pending(&a.id));
        assert_eq!(pending_b.wait().await, Decision::deny("no"));

        assert!(correlator.resolve(&a.id, Decision::Allow));
        assert_eq!(pending_a.wait().await, Decision::Allow);
    }

    #[tokio::test]
    async fn test_timeout_denies_and_removes() {
        let correlator = ApprovalCorrelator::new(Duration::from_millis(20));
        let (request, pending) = correlator.request(&edit(), false);

        match pending.wait().await {
            Decision::Deny { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected deny, got {other:?}"),
        }
        assert!(!correlator.is_pending(&request.id));
        assert!(!correlator.resolve(&request.id, Decision::Allow));
    }

    #[tokio::test]
    async fn test_timeout_resolution_kind() {
        let correlator = ApprovalCorrelator::new(Duration::from_millis(20));
        let (_request, mut pending) = correlator.request(&edit(), false);
        assert_eq!(
            pending.wait_resolution().await,
            Resolution::TimedOut(Duration::from_millis(20))
        );
    }

    #[tokio::test]
    async fn test_dropped_correlator_abandons_waiter() {
        let correlator = ApprovalCorrelator::default();
        let (_request, mut pending) = correlator.request(&edit(), false);
        drop(correlator);
        assert_eq!(pending.wait_resolution().await, Resolution::Abandoned);
    }

    #[tokio::test]
    async fn test_timeout_after_sender_was_taken() {
        let correlator = ApprovalCorrelator::new(Duration::from_millis(20));
        let (request, mut pending) = correlator.request(&edit(), false);

        // Taken out of the map, as resolve() does, but never sent.
        let sender = lock(&correlator.pending).remove(&request.id).unwrap();
        assert_eq!(
            pending.wait_resolution().await,
            Resolution::TimedOut(Duration::from_millis(20))
        );
        drop(sender);
    }

    #[tokio::test]
    async fn test_interrupted_wait_keeps_request_and_deadline() {
        let correlator = ApprovalCorrelator::new(Duration::from_millis(200));
        let (request, mut pending) = correlator.request(&edit(), false);

        let interrupted =
            tokio::time::timeout(Duration::from_millis(10), pending.wait_resolution()).await;
        assert!(interrupted.is_err());
        assert!(correlator.is_pending(&request.id));

        assert!(correlator.resolve(&request.id, Decision::Allow));
        assert_eq!(
            pending.wait_resolution().await,
            Resolution::Decided(Decision::Allow)
        );
    }

    #[test]
    fn test_resolution_into_decision() {
        assert_eq!(
            Resolution::Decided(Decision::Allow).into_decision(),
            Decision::Allow
        );
        assert_eq!(
            Resolution::TimedOut(Duration::from_secs(300)).into_decision(),
            Decision::deny("Approval timed out after 300s")
        );
        assert!(!Resolution::Abandoned.into_decision().is_allowed());
    }

    #[tokio::test]
    async fn test_dropped_handle_withdraws_request() {
        let correlator = ApprovalCorrelator::default();
        let (request, pending) = correlator.request(&edit(), false);
        drop(pending);
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.resolve(&request.id, Decision::Allow));
    }

    #[tokio::test]
    async fn test_publishes_to_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let correlator = ApprovalCorrelator::default().with_channel(Arc::new(tx));
        let (request, _pending) = correlator.request(&edit(), true);

        let published = rx.recv().await.unwrap();
        assert_eq!(published, request);
        assert!(published.is_destructive);
    }

    #[tokio::test]
    async fn test_resolve_payload() {
        let correlator = ApprovalCorrelator::default();
        let (request, pending) = correlator.request(&edit(), false);
        let payload: DecisionPayload = serde_json::from_value(json!({
            "id": request.id,
            "decision": "deny",
            "message": "use a branch"
        }))
        .unwrap();

        assert!(correlator.resolve_payload(&payload));
        assert_eq!(pending.wait().await, Decision::deny("use a branch"));
    }

    #[tokio::test]
    async fn test_concurrent_resolution() {
        let correlator = ApprovalCorrelator::default();
        let mut handles = vec![];

        for _ in 0..10 {
            let (request, pending) = correlator.request(&edit(), false);
            let resolver = correlator.clone();
            handles.push(tokio::spawn(async move {
                let waiter = tokio::spawn(pending.wait());
                let first = resolver.resolve(&request.id, Decision::Allow);
                let second = resolver.resolve(&request.id, Decision::Allow);
                (first, second, waiter.await.unwrap())
            }));
        }

        for handle in handles {
            let (first, second, decision) = handle.await.unwrap();
            assert!(first);
            assert!(!second);
            assert_eq!(decision, Decision::Allow);
        }
        assert_eq!(correlator.pending_count(), 0);
    }
}
