use crate::domain::event::TransactionEvent;
use crate::domain::ports::NotificationSink;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Publishes transaction events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, event: &TransactionEvent) -> Result<()> {
        let txn = event.transaction();
        info!(
            event = event.name(),
            txn = %txn.id,
            state = %txn.state,
            amount = txn.amount,
            currency = %txn.currency,
            "transaction event"
        );
        Ok(())
    }
}
