//! Permission + quota gate in front of every turn.
//!
//! Permission is checked first; a deny returns before quota state is
//! touched. On allow, quota is reserved optimistically and later either
//! committed (turn completed) or released (turn failed or cancelled).

use std::sync::Arc;

use cp_domain::error::{Error, Result};
use cp_domain::ids::ReservationId;

/// Action name checked against the permission service for chat turns.
pub const ACTION_CHAT: &str = "copilot.chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// A successful quota reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    pub reservation_id: ReservationId,
    pub estimated_cost: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound service traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait PermissionService: Send + Sync {
    async fn check(&self, principal: &str, workspace: &str, action: &str)
        -> Result<PermissionDecision>;
}

/// Reservation-based quota ledger.
#[async_trait::async_trait]
pub trait QuotaService: Send + Sync {
    /// Hold `estimated_cost` units. Fails with `QuotaExceeded`.
    async fn reserve(
        &self,
        principal: &str,
        workspace: &str,
        estimated_cost: u64,
    ) -> Result<ReservationId>;

    /// Convert a reservation into a charge of `actual_cost`.
    async fn commit(&self, reservation: &ReservationId, actual_cost: u64) -> Result<()>;

    /// Drop a reservation without charging.
    async fn release(&self, reservation: &ReservationId) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AccessGate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AccessGate {
    permissions: Arc<dyn PermissionService>,
    quota: Arc<dyn QuotaService>,
}

impl AccessGate {
    pub fn new(permissions: Arc<dyn PermissionService>, quota: Arc<dyn QuotaService>) -> Self {
        Self { permissions, quota }
    }

    /// Check permission only. A deny becomes `PermissionDenied`.
    pub async fn check(&self, principal: &str, workspace: &str, action: &str) -> Result<()> {
        match self.permissions.check(principal, workspace, action).await? {
            PermissionDecision::Allow => Ok(()),
            PermissionDecision::Deny => {
                tracing::info!(
                    principal = %principal,
                    workspace = %workspace,
                    action = %action,
                    "permission denied"
                );
                Err(Error::PermissionDenied {
                    principal: principal.to_owned(),
                    workspace: workspace.to_owned(),
                    action: action.to_owned(),
                })
            }
        }
    }

    /// Permission check, then quota reservation.
    pub async fn authorize(
        &self,
        principal: &str,
        workspace: &str,
        estimated_cost: u64,
    ) -> Result<(PermissionDecision, QuotaDecision)> {
        self.check(principal, workspace, ACTION_CHAT).await?;

        let reservation_id = self
            .quota
            .reserve(principal, workspace, estimated_cost)
            .await?;

        Ok((
            PermissionDecision::Allow,
            QuotaDecision {
                reservation_id,
                estimated_cost,
            },
        ))
    }

    pub async fn commit(&self, decision: &QuotaDecision, actual_cost: u64) -> Result<()> {
        self.quota.commit(&decision.reservation_id, actual_cost).await
    }

    pub async fn release(&self, decision: &QuotaDecision) -> Result<()> {
        self.quota.release(&decision.reservation_id).await
    }
}
