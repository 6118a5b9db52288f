use candid::{Nat, Principal};
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;

use crate::guard::CallerGuard;
use crate::types::{
    Account, GameError, StorablePrincipal, TransferArg, TransferError, TransferFromArgs,
    TransferFromError, CKUSDT_CANISTER_ID, CKUSDT_TRANSFER_FEE, MIN_DEPOSIT, MIN_WITHDRAWAL,
};
use crate::Memory;

const USER_BALANCES_MEMORY_ID: u8 = 6;

thread_local! {
    static USER_BALANCES: RefCell<StableBTreeMap<StorablePrincipal, u64, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(USER_BALANCES_MEMORY_ID))),
        )
    );
}

fn ledger_principal() -> Principal {
    Principal::from_text(CKUSDT_CANISTER_ID).expect("Invalid ckUSDT canister ID")
}

// =============================================================================
// INTERNAL LEDGER
// =============================================================================

pub fn balance_of(owner: Principal) -> u64 {
    USER_BALANCES.with(|balances| {
        balances
            .borrow()
            .get(&StorablePrincipal(owner))
            .unwrap_or(0)
    })
}

/// Fails early when a future credit would overflow the recipient's balance,
/// so settlement can make the final credit infallible.
pub fn ensure_can_credit(owner: Principal, amount: u64) -> Result<(), GameError> {
    balance_of(owner)
        .checked_add(amount)
        .map(|_| ())
        .ok_or(GameError::ArithmeticOverflow)
}

pub fn credit(owner: Principal, amount: u64) -> Result<u64, GameError> {
    USER_BALANCES.with(|balances| {
        let mut balances = balances.borrow_mut();
        let key = StorablePrincipal(owner);
        let current = balances.get(&key).unwrap_or(0);
        let updated = current
            .checked_add(amount)
            .ok_or(GameError::ArithmeticOverflow)?;
        balances.insert(key, updated);
        Ok(updated)
    })
}

pub fn debit(owner: Principal, amount: u64) -> Result<u64, GameError> {
    USER_BALANCES.with(|balances| {
        let mut balances = balances.borrow_mut();
        let key = StorablePrincipal(owner);
        let current = balances.get(&key).unwrap_or(0);
        let updated = current
            .checked_sub(amount)
            .ok_or(GameError::InsufficientBalance {
                required: amount,
                available: current,
            })?;
        balances.insert(key, updated);
        Ok(updated)
    })
}

// =============================================================================
// TOKEN BOUNDARY (ckUSDT, ICRC-1/2)
// =============================================================================

/// Pulls `amount` from the caller's ckUSDT account (requires a prior ICRC-2
/// approval) and credits it to their internal balance.
pub async fn deposit(caller: Principal, amount: u64) -> Result<u64, GameError> {
    let _guard = CallerGuard::new(caller)?;

    if amount < MIN_DEPOSIT {
        return Err(GameError::AmountTooSmall { minimum: MIN_DEPOSIT });
    }

    transfer_from(caller, amount).await?;
    credit(caller, amount)
}

/// Sends `amount` of the caller's internal balance back to their ckUSDT
/// account. The internal debit happens before the ledger call; a definite
/// ledger failure rolls it back, while a rejected call leaves the debit in
/// place and surfaces the error (the transfer outcome is unknown).
pub async fn withdraw_balance(caller: Principal, amount: u64) -> Result<u64, GameError> {
    let _guard = CallerGuard::new(caller)?;

    if amount < MIN_WITHDRAWAL {
        return Err(GameError::AmountTooSmall {
            minimum: MIN_WITHDRAWAL,
        });
    }
    let send_amount = amount - CKUSDT_TRANSFER_FEE;

    debit(caller, amount)?;

    match transfer_to(caller, send_amount).await {
        Ok(()) => Ok(send_amount),
        Err(TransferOutcome::Definite(message)) => {
            credit(caller, amount)?;
            Err(GameError::TransferFailed { message })
        }
        Err(TransferOutcome::Uncertain(message)) => Err(GameError::TransferFailed {
            message: format!("withdrawal outcome uncertain, balance debited: {}", message),
        }),
    }
}

enum TransferOutcome {
    Definite(String),
    Uncertain(String),
}

async fn transfer_from(user: Principal, amount: u64) -> Result<(), GameError> {
    let args = TransferFromArgs {
        spender_subaccount: None,
        from: Account::from(user),
        to: Account::from(ic_cdk::id()),
        amount: Nat::from(amount),
        // The sender pays the ledger fee on top of the deposited amount.
        fee: Some(Nat::from(CKUSDT_TRANSFER_FEE)),
        memo: None,
        created_at_time: None,
    };

    let (result,): (Result<Nat, TransferFromError>,) =
        ic_cdk::api::call::call(ledger_principal(), "icrc2_transfer_from", (args,))
            .await
            .map_err(|(code, msg)| GameError::TransferFailed {
                message: format!("ledger call rejected: {:?} {}", code, msg),
            })?;

    result.map(|_| ()).map_err(|e| GameError::TransferFailed {
        message: format!("{:?}", e),
    })
}

async fn transfer_to(user: Principal, amount: u64) -> Result<(), TransferOutcome> {
    let args = TransferArg {
        from_subaccount: None,
        to: Account::from(user),
        amount: Nat::from(amount),
        fee: Some(Nat::from(CKUSDT_TRANSFER_FEE)),
        memo: None,
        created_at_time: None,
    };

    let (result,): (Result<Nat, TransferError>,) =
        ic_cdk::api::call::call(ledger_principal(), "icrc1_transfer", (args,))
            .await
            .map_err(|(code, msg)| {
                TransferOutcome::Uncertain(format!("ledger call rejected: {:?} {}", code, msg))
            })?;

    result
        .map(|_| ())
        .map_err(|e| TransferOutcome::Definite(format!("{:?}", e)))
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    USER_BALANCES.with(|balances| {
        let mut balances = balances.borrow_mut();
        let keys: Vec<StorablePrincipal> = balances.iter().map(|(k, _)| k).collect();
        for key in keys {
            balances.remove(&key);
        }
    });
}
