use candid::Principal;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::{StableBTreeMap, StableCell};
use std::cell::RefCell;

use crate::accounting;
use crate::board;
use crate::events::{self, GameEvent};
use crate::payout::{self, CAP_MULTIPLIER};
use crate::treasury;
use crate::types::{
    GameError, GameStats, Round, RoundOutcome, RoundStatus, RoundSummary, RoundView, TileReveal,
    FEE_BPS, MAX_ACTIVE_ROUNDS_PER_PLAYER, MAX_DIM, MAX_STAKE, MIN_STAKE,
};
use crate::Memory;

const ROUNDS_MEMORY_ID: u8 = 0;
const NEXT_ROUND_ID_MEMORY_ID: u8 = 1;
const CORRELATIONS_MEMORY_ID: u8 = 2;
const STATS_MEMORY_ID: u8 = 3;

thread_local! {
    // Append-only round table: rounds are settled in place, never removed,
    // so any settled board can be re-derived from its stored seed.
    static ROUNDS: RefCell<StableBTreeMap<u64, Round, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(ROUNDS_MEMORY_ID))),
        )
    );

    static NEXT_ROUND_ID: RefCell<StableCell<u64, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(NEXT_ROUND_ID_MEMORY_ID))),
            0u64,
        )
        .expect("Failed to initialize NEXT_ROUND_ID")
    );

    // In-flight randomness requests: correlation id -> round id. An entry is
    // consumed by the first delivery; duplicates find nothing.
    static CORRELATIONS: RefCell<StableBTreeMap<u64, u64, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(CORRELATIONS_MEMORY_ID))),
        )
    );

    static STATS: RefCell<StableCell<GameStats, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(STATS_MEMORY_ID))),
            GameStats::default(),
        )
        .expect("Failed to initialize STATS")
    );
}

// =============================================================================
// STORAGE HELPERS
// =============================================================================

fn load(round_id: u64) -> Result<Round, GameError> {
    ROUNDS.with(|rounds| {
        rounds
            .borrow()
            .get(&round_id)
            .ok_or(GameError::UnknownRound { round_id })
    })
}

fn store(round_id: u64, round: Round) {
    ROUNDS.with(|rounds| {
        rounds.borrow_mut().insert(round_id, round);
    });
}

fn next_round_id() -> u64 {
    NEXT_ROUND_ID.with(|cell| {
        let mut cell = cell.borrow_mut();
        let current = *cell.get();
        cell.set(current + 1).expect("Failed to increment NEXT_ROUND_ID");
        current
    })
}

fn update_stats(apply: impl FnOnce(&mut GameStats)) {
    STATS.with(|stats| {
        let mut cell = stats.borrow_mut();
        let mut current = cell.get().clone();
        apply(&mut current);
        cell.set(current).expect("Failed to update STATS");
    });
}

fn active_round_count(owner: Principal) -> usize {
    ROUNDS.with(|rounds| {
        rounds
            .borrow()
            .iter()
            .filter(|(_, round)| round.owner == owner && round.status != RoundStatus::Settled)
            .count()
    })
}

// =============================================================================
// ROUND CREATION
// =============================================================================

pub fn create_round(
    caller: Principal,
    now: u64,
    rows: u8,
    cols: u8,
    bombs: u8,
    stake: u64,
) -> Result<u64, GameError> {
    if rows == 0 || rows > MAX_DIM || cols == 0 || cols > MAX_DIM {
        return Err(GameError::InvalidDimensions { rows, cols });
    }
    let cells = rows * cols;
    if bombs == 0 || bombs >= cells {
        return Err(GameError::InvalidBombCount { bombs, cells });
    }
    if stake < MIN_STAKE || stake > MAX_STAKE {
        return Err(GameError::InvalidStake { stake });
    }
    if active_round_count(caller) >= MAX_ACTIVE_ROUNDS_PER_PLAYER {
        return Err(GameError::TooManyActiveRounds {
            limit: MAX_ACTIVE_ROUNDS_PER_PLAYER as u64,
        });
    }

    // The pool must cover this round's worst case before the stake joins it.
    let worst_case = payout::payout(stake, CAP_MULTIPLIER)?;
    treasury::ensure_can_cover(worst_case)?;

    accounting::debit(caller, stake)?;
    if let Err(e) = treasury::credit(stake) {
        accounting::credit(caller, stake)?;
        return Err(e);
    }

    let round_id = next_round_id();
    store(
        round_id,
        Round {
            owner: caller,
            rows,
            cols,
            bombs,
            stake,
            status: RoundStatus::Created,
            pending_request: None,
            seed: None,
            bomb_cells: board::CellSet::new(),
            revealed_cells: board::CellSet::new(),
            safe_reveals: 0,
            outcome: None,
            created_at: now,
        },
    );

    update_stats(|stats| {
        stats.total_rounds += 1;
        stats.total_staked += stake;
    });
    events::record(
        now,
        GameEvent::RoundCreated {
            round_id,
            owner: caller,
            rows,
            cols,
            bombs,
            stake,
        },
    );
    Ok(round_id)
}

// =============================================================================
// SEED REQUEST / DELIVERY
// =============================================================================

/// Validations run before the fee quote is fetched. Only the round owner or
/// the operator may request a seed, and only while the round is freshly
/// created.
pub fn prepare_seed_request(caller: Principal, round_id: u64) -> Result<(), GameError> {
    let round = load(round_id)?;
    if round.owner != caller && !treasury::is_operator(caller) {
        return Err(GameError::NotOwner);
    }
    if round.status != RoundStatus::Created {
        return Err(GameError::InvalidState {
            current: round.status,
        });
    }
    Ok(())
}

/// The pool pays the randomness fee, exactly at the quote.
pub fn pay_request_fee(fee: u64) -> Result<(), GameError> {
    let available = treasury::balance();
    if available < fee {
        return Err(GameError::InsufficientFee {
            quoted: fee,
            available,
        });
    }
    treasury::debit(fee).map(|_| ())
}

/// Returns a paid fee to the pool when the randomness request itself fails.
pub fn refund_request_fee(fee: u64) {
    let _ = treasury::credit(fee);
}

pub fn commit_seed_request(
    now: u64,
    round_id: u64,
    correlation_id: u64,
    fee: u64,
) -> Result<(), GameError> {
    let mut round = load(round_id)?;
    if round.status != RoundStatus::Created {
        return Err(GameError::InvalidState {
            current: round.status,
        });
    }
    round.status = RoundStatus::SeedRequested;
    round.pending_request = Some(correlation_id);
    store(round_id, round);
    CORRELATIONS.with(|map| {
        map.borrow_mut().insert(correlation_id, round_id);
    });
    events::record(
        now,
        GameEvent::SeedRequested {
            round_id,
            correlation_id,
            fee,
        },
    );
    Ok(())
}

/// Callback target for the randomness canister. A correlation id resolves at
/// most once: the first delivery consumes it and populates the board; any
/// replay finds no matching entry.
pub fn deliver_seed(
    caller: Principal,
    now: u64,
    correlation_id: u64,
    seed: [u8; 32],
) -> Result<u64, GameError> {
    if caller != crate::randomness::service_principal() {
        return Err(GameError::Unauthorized);
    }

    let round_id = CORRELATIONS.with(|map| {
        map.borrow()
            .get(&correlation_id)
            .ok_or(GameError::UnknownCorrelation { correlation_id })
    })?;
    let mut round = load(round_id)?;
    if round.status != RoundStatus::SeedRequested {
        return Err(GameError::InvalidState {
            current: round.status,
        });
    }

    round.bomb_cells = board::place_bombs(&seed, round.cell_count(), round.bombs)?;
    round.seed = Some(seed);
    round.status = RoundStatus::Active;
    round.pending_request = None;

    CORRELATIONS.with(|map| {
        map.borrow_mut().remove(&correlation_id);
    });
    store(round_id, round);
    events::record(now, GameEvent::SeedFulfilled { round_id });
    Ok(round_id)
}

// =============================================================================
// REVEAL / SETTLEMENT
// =============================================================================

pub fn reveal_tile(
    caller: Principal,
    now: u64,
    round_id: u64,
    row: u8,
    col: u8,
) -> Result<TileReveal, GameError> {
    let round = load(round_id)?;
    if round.owner != caller {
        return Err(GameError::NotOwner);
    }
    if round.status != RoundStatus::Active {
        return Err(GameError::NotActive {
            current: round.status,
        });
    }
    let cell = round.cell_index(row, col)?;
    if round.revealed_cells.contains(cell) {
        return Err(GameError::AlreadyRevealed { row, col });
    }

    if round.bomb_cells.contains(cell) {
        let stake_lost = round.stake;
        let mut settled = round;
        settled.revealed_cells.insert(cell);
        settled.stake = 0;
        settled.status = RoundStatus::Settled;
        settled.outcome = Some(RoundOutcome::Loss);
        let safe_reveals = settled.safe_reveals;
        store(round_id, settled);

        update_stats(|stats| stats.total_busted += 1);
        events::record(
            now,
            GameEvent::TileRevealed {
                round_id,
                cell,
                bomb: true,
            },
        );
        events::record(now, GameEvent::BombHit { round_id, stake_lost });
        return Ok(TileReveal {
            bomb: true,
            settled: true,
            safe_reveals,
            multiplier: 0,
            payout: 0,
        });
    }

    // Compute the whole prospective transition before touching any state.
    let safe_reveals = round.safe_reveals + 1;
    let m = payout::multiplier(round.bombs, round.cell_count(), safe_reveals)?;
    let gross = payout::payout(round.stake, m)?;
    let cap_payout = payout::payout(round.stake, CAP_MULTIPLIER)?;
    let cleared = safe_reveals == round.max_safe();

    if gross >= cap_payout || cleared {
        // Auto-settle: the payout is capped here, before any value moves.
        let amount = gross.min(cap_payout);
        settle_win(now, round_id, round, cell, safe_reveals, amount)?;
        return Ok(TileReveal {
            bomb: false,
            settled: true,
            safe_reveals,
            multiplier: m as u64,
            payout: amount,
        });
    }

    let mut updated = round;
    updated.revealed_cells.insert(cell);
    updated.safe_reveals = safe_reveals;
    store(round_id, updated);
    events::record(
        now,
        GameEvent::TileRevealed {
            round_id,
            cell,
            bomb: false,
        },
    );
    Ok(TileReveal {
        bomb: false,
        settled: false,
        safe_reveals,
        multiplier: m as u64,
        payout: 0,
    })
}

/// Settles a winning reveal. The pool debit comes first and aborts the whole
/// transition on failure; the owner's credit is pre-checked so it cannot
/// fail after the round has mutated.
fn settle_win(
    now: u64,
    round_id: u64,
    round: Round,
    cell: u8,
    safe_reveals: u8,
    amount: u64,
) -> Result<(), GameError> {
    let owner = round.owner;
    accounting::ensure_can_credit(owner, amount)?;
    treasury::debit(amount).map_err(|e| GameError::TransferFailed {
        message: format!("pool cannot cover payout: {}", e),
    })?;

    let mut settled = round;
    settled.revealed_cells.insert(cell);
    settled.safe_reveals = safe_reveals;
    settled.stake = 0;
    settled.status = RoundStatus::Settled;
    settled.outcome = Some(RoundOutcome::Won { payout: amount });
    store(round_id, settled);

    update_stats(|stats| stats.total_paid_out += amount);
    accounting::credit(owner, amount)?;
    events::record(
        now,
        GameEvent::TileRevealed {
            round_id,
            cell,
            bomb: false,
        },
    );
    events::record(now, GameEvent::CashedOut { round_id, payout: amount });
    Ok(())
}

pub fn cash_out(caller: Principal, now: u64, round_id: u64) -> Result<u64, GameError> {
    let round = load(round_id)?;
    if round.owner != caller {
        return Err(GameError::NotOwner);
    }
    if round.status != RoundStatus::Active {
        return Err(GameError::NotActive {
            current: round.status,
        });
    }

    let m = payout::multiplier(round.bombs, round.cell_count(), round.safe_reveals)?;
    let gross = payout::payout(round.stake, m)?;
    let net = payout::net_of_fee(gross, FEE_BPS)?;

    accounting::ensure_can_credit(caller, net)?;
    treasury::debit(net).map_err(|e| GameError::TransferFailed {
        message: format!("pool cannot cover payout: {}", e),
    })?;

    let mut settled = round;
    settled.stake = 0;
    settled.status = RoundStatus::Settled;
    settled.outcome = Some(RoundOutcome::Won { payout: net });
    store(round_id, settled);

    update_stats(|stats| {
        stats.total_cashouts += 1;
        stats.total_paid_out += net;
    });
    accounting::credit(caller, net)?;
    events::record(now, GameEvent::CashedOut { round_id, payout: net });
    Ok(net)
}

// =============================================================================
// QUERIES
// =============================================================================

/// What a cash-out would pay right now; zero unless the round is active.
pub fn quote_payout(round_id: u64) -> u64 {
    let Ok(round) = load(round_id) else {
        return 0;
    };
    if round.status != RoundStatus::Active {
        return 0;
    }
    payout::multiplier(round.bombs, round.cell_count(), round.safe_reveals)
        .and_then(|m| payout::payout(round.stake, m))
        .and_then(|gross| payout::net_of_fee(gross, FEE_BPS))
        .unwrap_or(0)
}

pub fn round_view(round_id: u64) -> Result<RoundView, GameError> {
    let round = load(round_id)?;
    let cells = round.cell_count();
    let revealed = (0..cells).map(|i| round.revealed_cells.contains(i)).collect();
    let multiplier = if round.status == RoundStatus::Active {
        payout::multiplier(round.bombs, cells, round.safe_reveals).unwrap_or(0) as u64
    } else {
        0
    };
    let settled = round.status == RoundStatus::Settled;
    Ok(RoundView {
        round_id,
        owner: round.owner,
        rows: round.rows,
        cols: round.cols,
        bombs: round.bombs,
        status: round.status,
        stake: round.stake,
        safe_reveals: round.safe_reveals,
        revealed,
        multiplier,
        outcome: round.outcome,
        // A live board must not be reconstructable: seed and placement stay
        // hidden until settlement.
        seed: if settled { round.seed } else { None },
        bomb_cells: if settled {
            Some(round.bomb_cells.indices())
        } else {
            None
        },
        created_at: round.created_at,
    })
}

pub fn is_revealed(round_id: u64, row: u8, col: u8) -> Result<bool, GameError> {
    let round = load(round_id)?;
    let cell = round.cell_index(row, col)?;
    Ok(round.revealed_cells.contains(cell))
}

pub fn recent_rounds(caller: Principal, limit: u32) -> Vec<RoundSummary> {
    ROUNDS.with(|rounds| {
        rounds
            .borrow()
            .iter()
            .rev()
            .filter(|(_, round)| round.owner == caller)
            .take(limit as usize)
            .map(|(round_id, round)| RoundSummary {
                round_id,
                rows: round.rows,
                cols: round.cols,
                bombs: round.bombs,
                status: round.status,
                stake: round.stake,
                created_at: round.created_at,
            })
            .collect()
    })
}

pub fn stats() -> GameStats {
    STATS.with(|stats| stats.borrow().get().clone())
}

/// Replays the bomb placement for a seed so a settled round can be verified
/// by anyone.
pub fn audit_board(seed: [u8; 32], rows: u8, cols: u8, bombs: u8) -> Result<Vec<u8>, GameError> {
    if rows == 0 || rows > MAX_DIM || cols == 0 || cols > MAX_DIM {
        return Err(GameError::InvalidDimensions { rows, cols });
    }
    Ok(board::place_bombs(&seed, rows * cols, bombs)?.indices())
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    ROUNDS.with(|rounds| {
        let mut rounds = rounds.borrow_mut();
        let keys: Vec<u64> = rounds.iter().map(|(k, _)| k).collect();
        for key in keys {
            rounds.remove(&key);
        }
    });
    CORRELATIONS.with(|map| {
        let mut map = map.borrow_mut();
        let keys: Vec<u64> = map.iter().map(|(k, _)| k).collect();
        for key in keys {
            map.remove(&key);
        }
    });
    NEXT_ROUND_ID.with(|cell| {
        cell.borrow_mut().set(0).expect("reset NEXT_ROUND_ID");
    });
    STATS.with(|cell| {
        cell.borrow_mut().set(GameStats::default()).expect("reset STATS");
    });
}

// =============================================================================
// UNIT TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::WAD;
    use crate::randomness;

    const NOW: u64 = 1_700_000_000_000_000_000;
    const STAKE: u64 = 100_000; // 0.1 USDT

    fn player() -> Principal {
        Principal::from_slice(&[0xAB])
    }

    fn stranger() -> Principal {
        Principal::from_slice(&[0xCD])
    }

    fn service() -> Principal {
        randomness::service_principal()
    }

    fn seed(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    fn fresh(pool: u64, player_balance: u64) {
        reset_for_tests();
        crate::treasury::reset_for_tests();
        crate::accounting::reset_for_tests();
        crate::events::reset_for_tests();
        if pool > 0 {
            crate::treasury::credit(pool).unwrap();
        }
        if player_balance > 0 {
            accounting::credit(player(), player_balance).unwrap();
        }
    }

    /// Drives a created round through the seed request and delivery.
    fn activate(round_id: u64, correlation_id: u64, s: [u8; 32]) {
        pay_request_fee(0).unwrap();
        commit_seed_request(NOW, round_id, correlation_id, 0).unwrap();
        deliver_seed(service(), NOW, correlation_id, s).unwrap();
    }

    fn to_coords(cell: u8, cols: u8) -> (u8, u8) {
        (cell / cols, cell % cols)
    }

    fn safe_cells(s: &[u8; 32], cells: u8, bombs: u8) -> Vec<u8> {
        let mask = board::place_bombs(s, cells, bombs).unwrap();
        (0..cells).filter(|c| !mask.contains(*c)).collect()
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    #[test]
    fn test_create_round_validations() {
        fresh(10_000_000, 10_000_000);
        let p = player();
        assert_eq!(
            create_round(p, NOW, 0, 5, 3, STAKE),
            Err(GameError::InvalidDimensions { rows: 0, cols: 5 })
        );
        assert_eq!(
            create_round(p, NOW, 11, 5, 3, STAKE),
            Err(GameError::InvalidDimensions { rows: 11, cols: 5 })
        );
        assert_eq!(
            create_round(p, NOW, 5, 5, 0, STAKE),
            Err(GameError::InvalidBombCount { bombs: 0, cells: 25 })
        );
        assert_eq!(
            create_round(p, NOW, 5, 5, 25, STAKE),
            Err(GameError::InvalidBombCount { bombs: 25, cells: 25 })
        );
        assert_eq!(
            create_round(p, NOW, 5, 5, 3, MIN_STAKE - 1),
            Err(GameError::InvalidStake { stake: MIN_STAKE - 1 })
        );
        assert_eq!(
            create_round(p, NOW, 5, 5, 3, MAX_STAKE + 1),
            Err(GameError::InvalidStake { stake: MAX_STAKE + 1 })
        );
        // Nothing was staked by the failed attempts.
        assert_eq!(accounting::balance_of(p), 10_000_000);
        assert_eq!(stats().total_rounds, 0);
    }

    #[test]
    fn test_create_round_stakes_funds_and_records() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 5, 5, 5, STAKE).unwrap();
        assert_eq!(id, 0);
        assert_eq!(accounting::balance_of(player()), 0);
        assert_eq!(crate::treasury::balance(), 1_000_000 + STAKE);

        let view = round_view(id).unwrap();
        assert_eq!(view.status, RoundStatus::Created);
        assert_eq!(view.stake, STAKE);
        assert_eq!(view.safe_reveals, 0);
        assert!(view.seed.is_none());
        assert_eq!(stats().total_rounds, 1);
        assert_eq!(stats().total_staked, STAKE);
        assert_eq!(crate::events::event_count(), 1);
    }

    #[test]
    fn test_create_round_insufficient_liquidity() {
        // Scenario: stake 100k against a 150k pool fails; the cap needs 200k.
        fresh(150_000, STAKE);
        assert_eq!(
            create_round(player(), NOW, 2, 2, 1, STAKE),
            Err(GameError::InsufficientLiquidity {
                required: 200_000,
                available: 150_000
            })
        );
        assert_eq!(accounting::balance_of(player()), STAKE);
        assert_eq!(crate::treasury::balance(), 150_000);
    }

    #[test]
    fn test_create_round_requires_player_balance() {
        fresh(1_000_000, STAKE - 1);
        assert!(matches!(
            create_round(player(), NOW, 2, 2, 1, STAKE),
            Err(GameError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_create_round_active_limit() {
        fresh(100_000_000, 10 * STAKE);
        for _ in 0..MAX_ACTIVE_ROUNDS_PER_PLAYER {
            create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        }
        assert_eq!(
            create_round(player(), NOW, 2, 2, 1, STAKE),
            Err(GameError::TooManyActiveRounds {
                limit: MAX_ACTIVE_ROUNDS_PER_PLAYER as u64
            })
        );
    }

    // -------------------------------------------------------------------------
    // Seed request & delivery
    // -------------------------------------------------------------------------

    #[test]
    fn test_seed_request_lifecycle() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();

        assert_eq!(
            prepare_seed_request(stranger(), id),
            Err(GameError::NotOwner)
        );
        prepare_seed_request(player(), id).unwrap();

        pay_request_fee(0).unwrap();
        commit_seed_request(NOW, id, 99, 0).unwrap();
        let view = round_view(id).unwrap();
        assert_eq!(view.status, RoundStatus::SeedRequested);

        // A second request is no longer valid.
        assert_eq!(
            prepare_seed_request(player(), id),
            Err(GameError::InvalidState {
                current: RoundStatus::SeedRequested
            })
        );

        deliver_seed(service(), NOW, 99, seed(1)).unwrap();
        let view = round_view(id).unwrap();
        assert_eq!(view.status, RoundStatus::Active);
        assert!(view.seed.is_none()); // hidden until settlement
    }

    #[test]
    fn test_pay_request_fee_checks_pool() {
        fresh(100, 0);
        assert_eq!(
            pay_request_fee(101),
            Err(GameError::InsufficientFee {
                quoted: 101,
                available: 100
            })
        );
        pay_request_fee(60).unwrap();
        assert_eq!(crate::treasury::balance(), 40);
        refund_request_fee(60);
        assert_eq!(crate::treasury::balance(), 100);
    }

    #[test]
    fn test_deliver_seed_populates_board() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 3, 3, 2, STAKE).unwrap();
        activate(id, 7, seed(42));

        let round = load(id).unwrap();
        assert_eq!(round.status, RoundStatus::Active);
        assert_eq!(round.seed, Some(seed(42)));
        assert_eq!(round.bomb_cells.len(), 2);
        assert_eq!(round.bomb_cells, board::place_bombs(&seed(42), 9, 2).unwrap());
        assert!(round.pending_request.is_none());
    }

    #[test]
    fn test_deliver_seed_rejects_unknown_correlation() {
        fresh(1_000_000, STAKE);
        assert_eq!(
            deliver_seed(service(), NOW, 12345, seed(1)),
            Err(GameError::UnknownCorrelation {
                correlation_id: 12345
            })
        );
    }

    #[test]
    fn test_deliver_seed_duplicate_does_not_rerandomize() {
        // Scenario: a second delivery for a consumed correlation id fails and
        // leaves the board untouched.
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 7, seed(1));
        let first_board = load(id).unwrap().bomb_cells;

        assert_eq!(
            deliver_seed(service(), NOW, 7, seed(2)),
            Err(GameError::UnknownCorrelation { correlation_id: 7 })
        );
        assert_eq!(load(id).unwrap().bomb_cells, first_board);
        assert_eq!(load(id).unwrap().seed, Some(seed(1)));
    }

    #[test]
    fn test_deliver_seed_rejects_foreign_caller() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        pay_request_fee(0).unwrap();
        commit_seed_request(NOW, id, 7, 0).unwrap();
        assert_eq!(
            deliver_seed(stranger(), NOW, 7, seed(1)),
            Err(GameError::Unauthorized)
        );
        // The correlation is still pending for the real service.
        deliver_seed(service(), NOW, 7, seed(1)).unwrap();
    }

    // -------------------------------------------------------------------------
    // Reveal
    // -------------------------------------------------------------------------

    #[test]
    fn test_two_by_two_ramp_and_auto_settle_at_cap() {
        // Scenario: 2x2, one bomb, stake 100k; multipliers run 0.2, 0.8, 1.4,
        // 2.0 and the third safe reveal auto-settles at the cap paying 200k.
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));

        assert_eq!(quote_payout(id), STAKE / 5); // 0.2x before any reveal

        let safe = safe_cells(&seed(5), 4, 1);
        assert_eq!(safe.len(), 3);

        let (r, c) = to_coords(safe[0], 2);
        let first = reveal_tile(player(), NOW, id, r, c).unwrap();
        assert!(!first.bomb && !first.settled);
        assert_eq!(first.multiplier, WAD as u64 * 8 / 10);
        assert_eq!(quote_payout(id), STAKE * 8 / 10);

        let (r, c) = to_coords(safe[1], 2);
        let second = reveal_tile(player(), NOW, id, r, c).unwrap();
        assert!(!second.settled);
        assert_eq!(second.multiplier, WAD as u64 * 14 / 10);

        let (r, c) = to_coords(safe[2], 2);
        let third = reveal_tile(player(), NOW, id, r, c).unwrap();
        assert!(third.settled && !third.bomb);
        assert_eq!(third.multiplier, 2 * WAD as u64);
        assert_eq!(third.payout, 2 * STAKE);

        assert_eq!(accounting::balance_of(player()), 2 * STAKE);
        assert_eq!(crate::treasury::balance(), 1_000_000 + STAKE - 2 * STAKE);

        let view = round_view(id).unwrap();
        assert_eq!(view.status, RoundStatus::Settled);
        assert_eq!(view.stake, 0);
        assert_eq!(view.outcome, Some(RoundOutcome::Won { payout: 2 * STAKE }));
        assert_eq!(view.seed, Some(seed(5)));
        assert_eq!(view.bomb_cells.unwrap().len(), 1);
        assert_eq!(quote_payout(id), 0);
        assert_eq!(stats().total_paid_out, 2 * STAKE);
    }

    #[test]
    fn test_reveal_bomb_loses_stake() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));

        let bomb = board::place_bombs(&seed(5), 4, 1).unwrap().indices()[0];
        let (r, c) = to_coords(bomb, 2);
        let result = reveal_tile(player(), NOW, id, r, c).unwrap();
        assert!(result.bomb && result.settled);
        assert_eq!(result.payout, 0);
        assert_eq!(result.multiplier, 0);

        let view = round_view(id).unwrap();
        assert_eq!(view.status, RoundStatus::Settled);
        assert_eq!(view.stake, 0);
        assert_eq!(view.outcome, Some(RoundOutcome::Loss));

        // The stake stays in the pool; the player gets nothing back.
        assert_eq!(accounting::balance_of(player()), 0);
        assert_eq!(crate::treasury::balance(), 1_000_000 + STAKE);
        assert_eq!(stats().total_busted, 1);

        assert_eq!(
            reveal_tile(player(), NOW, id, r, c),
            Err(GameError::NotActive {
                current: RoundStatus::Settled
            })
        );
    }

    #[test]
    fn test_reveal_validations() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();

        // Not yet active.
        assert_eq!(
            reveal_tile(player(), NOW, id, 0, 0),
            Err(GameError::NotActive {
                current: RoundStatus::Created
            })
        );

        activate(id, 1, seed(5));
        assert_eq!(
            reveal_tile(stranger(), NOW, id, 0, 0),
            Err(GameError::NotOwner)
        );
        assert_eq!(
            reveal_tile(player(), NOW, id, 2, 0),
            Err(GameError::OutOfBounds { row: 2, col: 0 })
        );
        assert_eq!(
            reveal_tile(player(), NOW, 999, 0, 0),
            Err(GameError::UnknownRound { round_id: 999 })
        );
    }

    #[test]
    fn test_reveal_already_revealed_mutates_nothing() {
        // Scenario: re-revealing a cell fails and leaves every field as-is.
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 3, 3, 1, STAKE).unwrap();
        activate(id, 1, seed(9));

        let safe = safe_cells(&seed(9), 9, 1);
        let (r, c) = to_coords(safe[0], 3);
        reveal_tile(player(), NOW, id, r, c).unwrap();
        let before = round_view(id).unwrap();
        let pool_before = crate::treasury::balance();

        assert_eq!(
            reveal_tile(player(), NOW, id, r, c),
            Err(GameError::AlreadyRevealed { row: r, col: c })
        );
        let after = round_view(id).unwrap();
        assert_eq!(after.safe_reveals, before.safe_reveals);
        assert_eq!(after.revealed, before.revealed);
        assert_eq!(after.status, RoundStatus::Active);
        assert_eq!(crate::treasury::balance(), pool_before);
    }

    #[test]
    fn test_revealed_and_bombs_stay_disjoint() {
        // Reveal every safe cell of a larger board: after each safe reveal
        // the revealed set and the bomb set must not intersect, and the safe
        // counter must track the revealed population exactly.
        fresh(10_000_000, STAKE);
        let id = create_round(player(), NOW, 5, 5, 5, STAKE).unwrap();
        activate(id, 1, seed(77));

        let bombs = board::place_bombs(&seed(77), 25, 5).unwrap();
        for (n, cell) in safe_cells(&seed(77), 25, 5).into_iter().enumerate() {
            let (r, c) = to_coords(cell, 5);
            let result = reveal_tile(player(), NOW, id, r, c).unwrap();
            assert!(!result.bomb);
            assert_eq!(result.safe_reveals as usize, n + 1);

            let round = load(id).unwrap();
            assert!(!round.revealed_cells.intersects(&bombs));
            assert_eq!(round.safe_reveals, round.revealed_cells.len());
            if result.settled {
                assert_eq!(result.safe_reveals, 20);
                assert_eq!(result.payout, 2 * STAKE);
            }
        }
        assert_eq!(round_view(id).unwrap().status, RoundStatus::Settled);
    }

    // -------------------------------------------------------------------------
    // Cash-out
    // -------------------------------------------------------------------------

    #[test]
    fn test_cash_out_after_one_reveal() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));

        let safe = safe_cells(&seed(5), 4, 1);
        let (r, c) = to_coords(safe[0], 2);
        reveal_tile(player(), NOW, id, r, c).unwrap();

        assert_eq!(cash_out(stranger(), NOW, id), Err(GameError::NotOwner));

        let paid = cash_out(player(), NOW, id).unwrap();
        assert_eq!(paid, STAKE * 8 / 10);
        assert_eq!(accounting::balance_of(player()), paid);
        assert_eq!(crate::treasury::balance(), 1_000_000 + STAKE - paid);

        let view = round_view(id).unwrap();
        assert_eq!(view.status, RoundStatus::Settled);
        assert_eq!(view.outcome, Some(RoundOutcome::Won { payout: paid }));
        assert_eq!(stats().total_cashouts, 1);

        assert_eq!(
            cash_out(player(), NOW, id),
            Err(GameError::NotActive {
                current: RoundStatus::Settled
            })
        );
    }

    #[test]
    fn test_cash_out_with_zero_reveals_pays_base() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));
        assert_eq!(cash_out(player(), NOW, id).unwrap(), STAKE / 5);
    }

    #[test]
    fn test_cash_out_requires_active() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        assert_eq!(
            cash_out(player(), NOW, id),
            Err(GameError::NotActive {
                current: RoundStatus::Created
            })
        );
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_revealed() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));

        let safe = safe_cells(&seed(5), 4, 1);
        let (r, c) = to_coords(safe[0], 2);
        assert!(!is_revealed(id, r, c).unwrap());
        reveal_tile(player(), NOW, id, r, c).unwrap();
        assert!(is_revealed(id, r, c).unwrap());
        assert_eq!(
            is_revealed(id, 2, 2),
            Err(GameError::OutOfBounds { row: 2, col: 2 })
        );
    }

    #[test]
    fn test_recent_rounds_filters_by_owner() {
        fresh(100_000_000, 10 * STAKE);
        accounting::credit(stranger(), STAKE).unwrap();
        let first = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        let second = create_round(player(), NOW + 1, 3, 3, 2, STAKE).unwrap();
        let other = create_round(stranger(), NOW + 2, 2, 2, 1, STAKE).unwrap();

        let mine = recent_rounds(player(), 10);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].round_id, second); // newest first
        assert_eq!(mine[1].round_id, first);
        assert_eq!(recent_rounds(player(), 1).len(), 1);
        assert_eq!(recent_rounds(stranger(), 10)[0].round_id, other);
    }

    #[test]
    fn test_audit_board_replays_settled_round() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));

        let bomb = board::place_bombs(&seed(5), 4, 1).unwrap().indices()[0];
        let (r, c) = to_coords(bomb, 2);
        reveal_tile(player(), NOW, id, r, c).unwrap();

        let view = round_view(id).unwrap();
        let replayed = audit_board(view.seed.unwrap(), 2, 2, 1).unwrap();
        assert_eq!(Some(replayed), view.bomb_cells);

        assert_eq!(
            audit_board(seed(5), 0, 2, 1),
            Err(GameError::InvalidDimensions { rows: 0, cols: 2 })
        );
    }

    #[test]
    fn test_event_trail_for_full_round() {
        fresh(1_000_000, STAKE);
        let id = create_round(player(), NOW, 2, 2, 1, STAKE).unwrap();
        activate(id, 1, seed(5));
        let safe = safe_cells(&seed(5), 4, 1);
        let (r, c) = to_coords(safe[0], 2);
        reveal_tile(player(), NOW, id, r, c).unwrap();
        cash_out(player(), NOW, id).unwrap();

        let kinds: Vec<GameEvent> = crate::events::get_events(0, 100)
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(
            kinds,
            vec![
                GameEvent::RoundCreated {
                    round_id: id,
                    owner: player(),
                    rows: 2,
                    cols: 2,
                    bombs: 1,
                    stake: STAKE
                },
                GameEvent::SeedRequested {
                    round_id: id,
                    correlation_id: 1,
                    fee: 0
                },
                GameEvent::SeedFulfilled { round_id: id },
                GameEvent::TileRevealed {
                    round_id: id,
                    cell: safe[0],
                    bomb: false
                },
                GameEvent::CashedOut {
                    round_id: id,
                    payout: STAKE * 8 / 10
                },
            ]
        );
    }
}
