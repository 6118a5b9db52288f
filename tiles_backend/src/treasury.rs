use candid::Principal;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableCell;
use std::cell::RefCell;

use crate::accounting;
use crate::events::{self, GameEvent};
use crate::types::{GameError, OPERATOR_PRINCIPAL};
use crate::Memory;

const POOL_MEMORY_ID: u8 = 4;

thread_local! {
    static POOL_BALANCE: RefCell<StableCell<u64, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(POOL_MEMORY_ID))),
            0u64,
        )
        .expect("Failed to initialize POOL_BALANCE")
    );
}

pub fn balance() -> u64 {
    POOL_BALANCE.with(|pool| *pool.borrow().get())
}

fn set_balance(value: u64) {
    POOL_BALANCE.with(|pool| {
        pool.borrow_mut()
            .set(value)
            .expect("Failed to update POOL_BALANCE");
    });
}

/// Creation-time solvency check: the pool must cover the worst-case payout
/// of the round being opened. Deliberately per-round — liabilities of other
/// unsettled rounds are not summed.
pub fn ensure_can_cover(required: u64) -> Result<(), GameError> {
    let available = balance();
    if available < required {
        return Err(GameError::InsufficientLiquidity {
            required,
            available,
        });
    }
    Ok(())
}

pub fn credit(amount: u64) -> Result<u64, GameError> {
    let updated = balance()
        .checked_add(amount)
        .ok_or(GameError::ArithmeticOverflow)?;
    set_balance(updated);
    Ok(updated)
}

pub fn debit(amount: u64) -> Result<u64, GameError> {
    let current = balance();
    let updated = current
        .checked_sub(amount)
        .ok_or(GameError::InsufficientBalance {
            required: amount,
            available: current,
        })?;
    set_balance(updated);
    Ok(updated)
}

pub fn require_operator(caller: Principal) -> Result<(), GameError> {
    let operator =
        Principal::from_text(OPERATOR_PRINCIPAL).map_err(|_| GameError::Unauthorized)?;
    if caller != operator {
        return Err(GameError::Unauthorized);
    }
    Ok(())
}

pub fn is_operator(caller: Principal) -> bool {
    require_operator(caller).is_ok()
}

/// Moves `amount` from the caller's internal balance into the pool. Open to
/// anyone.
pub fn fund(caller: Principal, now: u64, amount: u64) -> Result<u64, GameError> {
    if amount == 0 {
        return Err(GameError::AmountTooSmall { minimum: 1 });
    }
    accounting::debit(caller, amount)?;
    let updated = match credit(amount) {
        Ok(updated) => updated,
        Err(e) => {
            accounting::credit(caller, amount)?;
            return Err(e);
        }
    };
    events::record(
        now,
        GameEvent::PoolFunded {
            from: caller,
            amount,
        },
    );
    Ok(updated)
}

/// Moves `amount` from the pool to `to`'s internal balance. Operator only.
pub fn withdraw(caller: Principal, now: u64, to: Principal, amount: u64) -> Result<u64, GameError> {
    require_operator(caller)?;
    if amount == 0 {
        return Err(GameError::AmountTooSmall { minimum: 1 });
    }
    accounting::ensure_can_credit(to, amount)?;
    let updated = debit(amount)?;
    accounting::credit(to, amount)?;
    events::record(now, GameEvent::PoolWithdrawn { to, amount });
    Ok(updated)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    set_balance(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> Principal {
        Principal::from_text(OPERATOR_PRINCIPAL).unwrap()
    }

    fn user(byte: u8) -> Principal {
        Principal::from_slice(&[byte])
    }

    fn fresh() {
        reset_for_tests();
        accounting::reset_for_tests();
        events::reset_for_tests();
    }

    #[test]
    fn test_ensure_can_cover_boundary() {
        fresh();
        credit(200).unwrap();
        assert!(ensure_can_cover(200).is_ok());
        assert_eq!(
            ensure_can_cover(201),
            Err(GameError::InsufficientLiquidity {
                required: 201,
                available: 200
            })
        );
    }

    #[test]
    fn test_debit_underflow() {
        fresh();
        credit(50).unwrap();
        assert_eq!(
            debit(51),
            Err(GameError::InsufficientBalance {
                required: 51,
                available: 50
            })
        );
        assert_eq!(balance(), 50);
    }

    #[test]
    fn test_fund_moves_internal_balance_into_pool() {
        fresh();
        let alice = user(1);
        accounting::credit(alice, 1_000).unwrap();
        assert_eq!(fund(alice, 5, 400).unwrap(), 400);
        assert_eq!(accounting::balance_of(alice), 600);
        assert_eq!(balance(), 400);
        assert_eq!(events::event_count(), 1);
    }

    #[test]
    fn test_fund_requires_balance() {
        fresh();
        let alice = user(1);
        assert!(matches!(
            fund(alice, 5, 400),
            Err(GameError::InsufficientBalance { .. })
        ));
        assert_eq!(balance(), 0);
    }

    #[test]
    fn test_withdraw_is_operator_only() {
        fresh();
        credit(500).unwrap();
        assert_eq!(
            withdraw(user(1), 5, user(1), 100),
            Err(GameError::Unauthorized)
        );
        assert_eq!(balance(), 500);

        assert_eq!(withdraw(operator(), 5, user(2), 100).unwrap(), 400);
        assert_eq!(accounting::balance_of(user(2)), 100);
    }

    #[test]
    fn test_withdraw_insufficient_pool() {
        fresh();
        credit(50).unwrap();
        assert_eq!(
            withdraw(operator(), 5, user(2), 100),
            Err(GameError::InsufficientBalance {
                required: 100,
                available: 50
            })
        );
        assert_eq!(balance(), 50);
        assert_eq!(accounting::balance_of(user(2)), 0);
    }
}
