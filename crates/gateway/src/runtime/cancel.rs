//! Per-turn cancellation tokens.
//!
//! Each in-flight turn owns a `CancellationToken` plus the quota
//! reservation taken for it. Whoever finalizes the turn first (the
//! completion path or an explicit cancel) takes the entry out of the map
//! and is then solely responsible for settling the reservation.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cp_domain::ids::TurnId;

use crate::runtime::access::QuotaDecision;

/// State held for a turn between dispatch and finalization.
#[derive(Debug, Clone)]
pub struct ActiveTurn {
    pub token: CancellationToken,
    pub reservation: QuotaDecision,
}

#[derive(Default)]
pub struct CancelMap {
    turns: Mutex<HashMap<TurnId, ActiveTurn>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a turn and return the token its producer task watches.
    pub fn register(&self, turn_id: &TurnId, reservation: QuotaDecision) -> CancellationToken {
        let token = CancellationToken::new();
        self.turns.lock().insert(
            turn_id.clone(),
            ActiveTurn {
                token: token.clone(),
                reservation,
            },
        );
        token
    }

    /// Remove and return the turn's entry. Only the first caller gets it.
    pub fn take(&self, turn_id: &TurnId) -> Option<ActiveTurn> {
        self.turns.lock().remove(turn_id)
    }
}
