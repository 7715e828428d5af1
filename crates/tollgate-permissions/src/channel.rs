//! Outbound boundary to the approval channel (chat UI, terminal, ...).

use crate::types::ApprovalRequest;
use tokio::sync::mpsc;

/// Receives approval requests for display.
///
/// `publish` must not block: the channel renders the request on its own
/// schedule and later calls back into
/// [`ApprovalCorrelator::resolve`](crate::ApprovalCorrelator::resolve).
pub trait ApprovalChannel: Send + Sync {
    fn publish(&self, request: &ApprovalRequest);
}

impl ApprovalChannel for mpsc::UnboundedSender<ApprovalRequest> {
    fn publish(&self, request: &ApprovalRequest) {
        if self.send(request.clone()).is_err() {
            tracing::warn!(
                request_id = %request.id,
                "approval channel closed; request will time out"
            );
        }
    }
}
