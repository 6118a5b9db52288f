use candid::Principal;
use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::types::GameError;

thread_local! {
    static PENDING_CALLERS: RefCell<BTreeSet<Principal>> = RefCell::new(BTreeSet::new());
    static PENDING_ROUNDS: RefCell<BTreeSet<u64>> = RefCell::new(BTreeSet::new());
}

/// Prevents a caller from entering a second ledger operation while one is
/// suspended across an inter-canister call. RAII: the slot is released on
/// drop even if the operation fails.
pub struct CallerGuard {
    caller: Principal,
}

impl CallerGuard {
    pub fn new(caller: Principal) -> Result<Self, GameError> {
        PENDING_CALLERS.with(|ops| {
            let mut ops = ops.borrow_mut();
            if !ops.insert(caller) {
                return Err(GameError::OperationInProgress);
            }
            Ok(Self { caller })
        })
    }
}

impl Drop for CallerGuard {
    fn drop(&mut self) {
        PENDING_CALLERS.with(|ops| {
            ops.borrow_mut().remove(&self.caller);
        });
    }
}

/// Serializes seed requests per round across their await points, so a round
/// cannot be transitioned twice by interleaved requests.
pub struct RoundGuard {
    round_id: u64,
}

impl RoundGuard {
    pub fn new(round_id: u64) -> Result<Self, GameError> {
        PENDING_ROUNDS.with(|ops| {
            let mut ops = ops.borrow_mut();
            if !ops.insert(round_id) {
                return Err(GameError::OperationInProgress);
            }
            Ok(Self { round_id })
        })
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        PENDING_ROUNDS.with(|ops| {
            ops.borrow_mut().remove(&self.round_id);
        });
    }
}
