use crate::domain::account::AccountId;
use crate::domain::money::Amount;
use crate::domain::ports::{GatewayResult, GatewayStatus, PaymentGateway};
use crate::domain::transaction::GatewayReference;
use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

/// A gateway that approves every authorization on the spot.
///
/// Used by the batch CLI, where external accounts stand in for funding
/// sources and there is no real network behind them.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantGateway;

#[async_trait]
impl PaymentGateway for InstantGateway {
    async fn authorize(
        &self,
        reference: &GatewayReference,
        amount: Amount,
        source: AccountId,
        destination: AccountId,
    ) -> Result<GatewayResult> {
        debug!(%reference, amount = amount.minor_units(), %source, %destination, "authorized");
        Ok(GatewayResult::Approved(reference.clone()))
    }

    async fn query_status(&self, _reference: &GatewayReference) -> Result<GatewayStatus> {
        Ok(GatewayStatus::Approved)
    }

    async fn reverse(&self, reference: &GatewayReference) -> Result<()> {
        debug!(%reference, "reversed");
        Ok(())
    }
}
