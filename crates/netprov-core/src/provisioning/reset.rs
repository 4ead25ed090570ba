//! Connection reset
//!
//! Re-submits an active contract's binding or credential unchanged. The
//! device drops and re-establishes the subscriber's live session when the
//! object is written; a rejected in-place write falls back to remove and
//! recreate.

use serde::Serialize;
use tracing::info;

use super::ProvisioningEngine;
use crate::model::{AuthMethod, ContractStatus};
use crate::upsert::{UpsertAction, ensure};
use crate::{Error, Result};

/// Result of a connection reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub contract_id: i64,
    pub method: AuthMethod,
    /// `None` when access is delegated externally (RADIUS)
    pub action: Option<UpsertAction>,
    pub degraded: bool,
}

impl ProvisioningEngine {
    /// Force the subscriber's live session to restart
    ///
    /// Only `active` contracts can be reset. Repeating a reset is harmless.
    pub async fn reset_connection(&self, contract_id: i64) -> Result<ResetOutcome> {
        let contract = self.contract(contract_id).await?;
        if contract.status != ContractStatus::Active {
            return Err(Error::consistency(format!(
                "Contract {} is {:?}; only active contracts can be reset",
                contract.id, contract.status
            )));
        }

        if contract.auth_method == AuthMethod::Radius {
            info!(contract_id, "RADIUS contract; reset is handled by the RADIUS server");
            return Ok(ResetOutcome {
                contract_id,
                method: contract.auth_method,
                action: None,
                degraded: false,
            });
        }

        let placement = self.placement(&contract).await?;
        let access = self.access_for(&contract, &placement)?;
        let Some(spec) = access.spec() else {
            return Err(Error::consistency(format!(
                "Contract {} has no device access object",
                contract.id
            )));
        };

        let _guard = self
            .locks
            .acquire_if(self.config.serialize_per_router, placement.router.id)
            .await;
        let session = self.opener.open(&placement.router).await?;
        let result = ensure(&session, spec.forced()).await;
        session.close().await;
        let upserted = result?;

        info!(
            contract_id,
            action = ?upserted.action,
            degraded = upserted.degraded,
            "Connection reset"
        );
        Ok(ResetOutcome {
            contract_id,
            method: contract.auth_method,
            action: Some(upserted.action),
            degraded: upserted.degraded,
        })
    }
}
