//! In-memory reservation ledger.
//!
//! [`QuotaLedger`] tracks, per (principal, workspace), the cost units
//! charged so far and those currently held by open reservations, and
//! checks both against the principal's limit from [`QuotaConfig`]. A
//! reservation is later committed (charged at the actual cost) or
//! released (dropped without charge).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use cp_domain::config::QuotaConfig;
use cp_domain::error::{Error, Result};
use cp_domain::ids::ReservationId;
use cp_domain::trace::TraceEvent;

use crate::runtime::access::QuotaService;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type LedgerKey = (String, String);

#[derive(Default)]
struct Account {
    charged: u64,
    reserved: u64,
}

struct Reservation {
    key: LedgerKey,
    amount: u64,
}

#[derive(Default)]
struct Ledger {
    accounts: HashMap<LedgerKey, Account>,
    reservations: HashMap<ReservationId, Reservation>,
}

/// Snapshot of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub principal: String,
    pub workspace: String,
    pub charged: u64,
    pub reserved: u64,
    pub limit: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QuotaLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe ledger; one lock covers accounts and reservations so a
/// reserve check and its hold are a single step.
pub struct QuotaLedger {
    config: QuotaConfig,
    ledger: Mutex<Ledger>,
}

impl QuotaLedger {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn snapshot(&self, principal: &str, workspace: &str) -> QuotaStatus {
        let ledger = self.ledger.lock();
        let key = (principal.to_owned(), workspace.to_owned());
        let (charged, reserved) = ledger
            .accounts
            .get(&key)
            .map(|a| (a.charged, a.reserved))
            .unwrap_or((0, 0));
        QuotaStatus {
            principal: principal.to_owned(),
            workspace: workspace.to_owned(),
            charged,
            reserved,
            limit: self.config.limit_for(principal),
        }
    }

    /// Number of reservations neither committed nor released.
    pub fn open_reservations(&self) -> usize {
        self.ledger.lock().reservations.len()
    }

    fn try_reserve(&self, principal: &str, workspace: &str, estimate: u64) -> Result<ReservationId> {
        let limit = self.config.limit_for(principal);
        let key = (principal.to_owned(), workspace.to_owned());

        let mut ledger = self.ledger.lock();
        let account = ledger.accounts.entry(key.clone()).or_default();
        let used = account.charged.saturating_add(account.reserved);

        if let Some(limit) = limit {
            if used.saturating_add(estimate) > limit {
                return Err(Error::QuotaExceeded {
                    used,
                    requested: estimate,
                    limit,
                });
            }
        }

        account.reserved = account.reserved.saturating_add(estimate);
        let id = ReservationId::new();
        ledger.reservations.insert(
            id.clone(),
            Reservation {
                key,
                amount: estimate,
            },
        );
        Ok(id)
    }

    /// Remove a reservation and its hold, charging `charge` if given.
    fn settle(&self, reservation: &ReservationId, charge: Option<u64>) -> Result<()> {
        let mut ledger = self.ledger.lock();
        let held = ledger
            .reservations
            .remove(reservation)
            .ok_or_else(|| Error::Other(format!("unknown reservation {reservation}")))?;

        let account = ledger.accounts.entry(held.key).or_default();
        account.reserved = account.reserved.saturating_sub(held.amount);
        if let Some(cost) = charge {
            account.charged = account.charged.saturating_add(cost);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl QuotaService for QuotaLedger {
    async fn reserve(
        &self,
        principal: &str,
        workspace: &str,
        estimated_cost: u64,
    ) -> Result<ReservationId> {
        let id = self.try_reserve(principal, workspace, estimated_cost)?;
        TraceEvent::QuotaReserved {
            principal: principal.to_owned(),
            workspace: workspace.to_owned(),
            reservation_id: id.to_string(),
            estimated_cost,
        }
        .emit();
        Ok(id)
    }

    async fn commit(&self, reservation: &ReservationId, actual_cost: u64) -> Result<()> {
        self.settle(reservation, Some(actual_cost))?;
        TraceEvent::QuotaSettled {
            reservation_id: reservation.to_string(),
            charged: actual_cost,
        }
        .emit();
        Ok(())
    }

    async fn release(&self, reservation: &ReservationId) -> Result<()> {
        self.settle(reservation, None)?;
        TraceEvent::QuotaSettled {
            reservation_id: reservation.to_string(),
            charged: 0,
        }
        .emit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(limit: Option<u64>) -> QuotaLedger {
        QuotaLedger::new(QuotaConfig {
            default_limit: limit,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn unlimited_by_default() {
        let q = ledger(None);
        for _ in 0..100 {
            q.reserve("u", "w", 1_000).await.unwrap();
        }
        assert_eq!(q.snapshot("u", "w").reserved, 100_000);
    }

    #[tokio::test]
    async fn reservations_count_against_limit() {
        let q = ledger(Some(10));
        q.reserve("u", "w", 6).await.unwrap();
        let err = q.reserve("u", "w", 5).await.unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                used: 6,
                requested: 5,
                limit: 10
            }
        ));
    }

    #[tokio::test]
    async fn commit_charges_actual_cost() {
        let q = ledger(Some(10));
        let r = q.reserve("u", "w", 6).await.unwrap();
        q.commit(&r, 2).await.unwrap();

        let s = q.snapshot("u", "w");
        assert_eq!((s.charged, s.reserved), (2, 0));
        // Freed headroom is reusable.
        q.reserve("u", "w", 8).await.unwrap();
    }

    #[tokio::test]
    async fn release_charges_nothing() {
        let q = ledger(Some(10));
        let r = q.reserve("u", "w", 6).await.unwrap();
        q.release(&r).await.unwrap();

        let s = q.snapshot("u", "w");
        assert_eq!((s.charged, s.reserved), (0, 0));
        assert_eq!(q.open_reservations(), 0);
    }

    #[tokio::test]
    async fn settling_twice_fails() {
        let q = ledger(None);
        let r = q.reserve("u", "w", 1).await.unwrap();
        q.release(&r).await.unwrap();
        assert!(q.commit(&r, 1).await.is_err());
        assert_eq!(q.snapshot("u", "w").charged, 0);
    }

    #[tokio::test]
    async fn saturated_account_is_refused_not_wrapped() {
        let q = ledger(Some(10));
        let r = q.reserve("u", "w", 1).await.unwrap();
        q.commit(&r, u64::MAX).await.unwrap();
        let err = q.reserve("u", "w", 5).await.unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                used: u64::MAX,
                requested: 5,
                limit: 10
            }
        ));

        let open = ledger(None);
        let r = open.reserve("u", "w", 1).await.unwrap();
        open.commit(&r, u64::MAX).await.unwrap();
        open.reserve("u", "w", u64::MAX).await.unwrap();
        open.reserve("u", "w", 1).await.unwrap();
        let s = open.snapshot("u", "w");
        assert_eq!((s.charged, s.reserved), (u64::MAX, u64::MAX));
    }

    #[tokio::test]
    async fn accounts_are_per_workspace_and_principal_override() {
        let mut config = QuotaConfig {
            default_limit: Some(1),
            ..Default::default()
        };
        config.per_principal.insert("vip".into(), 100);
        let q = QuotaLedger::new(config);

        q.reserve("u", "a", 1).await.unwrap();
        q.reserve("u", "b", 1).await.unwrap();
        assert!(q.reserve("u", "a", 1).await.is_err());
        q.reserve("vip", "a", 50).await.unwrap();
    }
}
