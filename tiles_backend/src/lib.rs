//! Tiles Game Backend
//!
//! **Design Philosophy:**
//! A single-player stake game: the player stakes ckUSDT, a bomb board is
//! placed from a seed delivered by an external randomness canister, and each
//! safe reveal ramps the payout multiplier from 0.2x toward a hard 2.0x cap.
//! Hitting a bomb forfeits the stake; cashing out (or reaching the cap)
//! settles the round against the house pool.
//!
//! **Transparency & Fairness:**
//! - Bomb placement is a pure function of the delivered seed (rejection-
//!   sampled Fisher-Yates), reproducible by anyone via `audit_board`
//! - Settled rounds expose their seed for independent verification
//! - Every state transition is recorded in an append-only event log
//!
//! **Solvency:**
//! - A round is only opened when the pool covers its worst-case payout
//! - Payouts are computed and capped before any value moves

use ic_cdk::{init, post_upgrade, pre_upgrade, query, update};
use ic_stable_structures::memory_manager::{MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod accounting;
pub mod board;
pub mod engine;
pub mod events;
pub mod fixed_point;
pub mod guard;
pub mod payout;
pub mod randomness;
pub mod sampler;
pub mod treasury;
pub mod types;

pub use types::{
    GameError, GameStats, RoundStatus, RoundSummary, RoundView, TileReveal,
};

// ============================================================================
// MEMORY MANAGEMENT
// ============================================================================
//
// Stable memory registry:
//   0 rounds          3 stats           6 user balances
//   1 round counter   4 pool balance
//   2 correlations    5 event log

pub type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    pub static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));
}

// ============================================================================
// LIFECYCLE HOOKS
// ============================================================================

#[init]
fn init() {
    ic_cdk::println!(
        "Tiles Game Backend Initialized - boards up to {}x{}, payout cap 2.0x",
        types::MAX_DIM,
        types::MAX_DIM
    );
}

#[pre_upgrade]
fn pre_upgrade() {
    // All state lives in stable structures and persists automatically.
}

#[post_upgrade]
fn post_upgrade() {
    ic_cdk::println!("Post-upgrade: stable state restored");
}

// ============================================================================
// ROUND ENDPOINTS
// ============================================================================

/// Opens a round: validates the board and stake, checks pool solvency for
/// the worst-case payout, and moves the stake from the caller's balance into
/// the pool. Returns the new round id.
#[update]
fn create_round(rows: u8, cols: u8, bombs: u8, stake: u64) -> Result<u64, GameError> {
    engine::create_round(
        ic_cdk::caller(),
        ic_cdk::api::time(),
        rows,
        cols,
        bombs,
        stake,
    )
}

/// Requests a seed for a freshly created round. The pool pays the quoted
/// randomness fee; the returned correlation id links the eventual delivery
/// back to this round.
#[update]
async fn request_seed(round_id: u64, callback_budget: u64) -> Result<u64, GameError> {
    let caller = ic_cdk::caller();
    let _guard = guard::RoundGuard::new(round_id)?;

    engine::prepare_seed_request(caller, round_id)?;

    let fee = randomness::quote_price(callback_budget).await?;
    engine::pay_request_fee(fee)?;

    let correlation_id = match randomness::request_randomness(callback_budget).await {
        Ok(id) => id,
        Err(e) => {
            engine::refund_request_fee(fee);
            ic_cdk::println!("Randomness request for round {} failed: {}", round_id, e);
            return Err(e);
        }
    };

    engine::commit_seed_request(ic_cdk::api::time(), round_id, correlation_id, fee)?;
    Ok(correlation_id)
}

/// Callback invoked by the randomness canister. Consumes the correlation id,
/// places the bombs from the seed and activates the round. A correlation id
/// is accepted at most once; replays are rejected.
#[update]
fn on_seed_delivered(correlation_id: u64, seed: [u8; 32]) -> Result<(), GameError> {
    engine::deliver_seed(ic_cdk::caller(), ic_cdk::api::time(), correlation_id, seed).map(|_| ())
}

/// Reveals one tile. A bomb settles the round as a loss; a safe reveal
/// raises the multiplier and auto-settles if the payout reaches the cap or
/// the board is cleared.
#[update]
fn reveal_tile(round_id: u64, row: u8, col: u8) -> Result<TileReveal, GameError> {
    engine::reveal_tile(ic_cdk::caller(), ic_cdk::api::time(), round_id, row, col)
}

/// Settles an active round at the current multiplier, net of the house fee.
#[update]
fn cash_out(round_id: u64) -> Result<u64, GameError> {
    engine::cash_out(ic_cdk::caller(), ic_cdk::api::time(), round_id)
}

// ============================================================================
// ROUND QUERIES
// ============================================================================

#[query]
fn get_round(round_id: u64) -> Result<RoundView, GameError> {
    engine::round_view(round_id)
}

#[query]
fn quote_payout(round_id: u64) -> u64 {
    engine::quote_payout(round_id)
}

#[query]
fn is_revealed(round_id: u64, row: u8, col: u8) -> Result<bool, GameError> {
    engine::is_revealed(round_id, row, col)
}

#[query]
fn get_recent_rounds(limit: u32) -> Vec<RoundSummary> {
    engine::recent_rounds(ic_cdk::caller(), limit)
}

#[query]
fn get_stats() -> GameStats {
    engine::stats()
}

/// Recomputes the bomb placement for a seed, so any settled round can be
/// verified against the board it actually played.
#[query]
fn audit_board(seed: [u8; 32], rows: u8, cols: u8, bombs: u8) -> Result<Vec<u8>, GameError> {
    engine::audit_board(seed, rows, cols, bombs)
}

#[query]
fn get_events(offset: u64, limit: u32) -> Vec<events::EventEntry> {
    events::get_events(offset, limit)
}

#[query]
fn get_event_count() -> u64 {
    events::event_count()
}

#[query]
fn greet(name: String) -> String {
    format!("Welcome to Tiles, {}! Pick a safe path and cash out.", name)
}

// ============================================================================
// TREASURY ENDPOINTS
// ============================================================================

/// Moves value from the caller's internal balance into the house pool.
/// Anyone may fund the pool.
#[update]
fn fund(amount: u64) -> Result<u64, GameError> {
    treasury::fund(ic_cdk::caller(), ic_cdk::api::time(), amount)
}

/// Operator-only: moves value from the pool to a recipient's internal
/// balance.
#[update]
fn withdraw(to: candid::Principal, amount: u64) -> Result<u64, GameError> {
    treasury::withdraw(ic_cdk::caller(), ic_cdk::api::time(), to, amount)
}

#[query]
fn get_pool_balance() -> u64 {
    treasury::balance()
}

// ============================================================================
// BALANCE ENDPOINTS
// ============================================================================

#[update]
async fn deposit(amount: u64) -> Result<u64, GameError> {
    accounting::deposit(ic_cdk::caller(), amount).await
}

#[update]
async fn withdraw_balance(amount: u64) -> Result<u64, GameError> {
    accounting::withdraw_balance(ic_cdk::caller(), amount).await
}

#[query]
fn get_balance(principal: candid::Principal) -> u64 {
    accounting::balance_of(principal)
}

#[query]
fn get_my_balance() -> u64 {
    accounting::balance_of(ic_cdk::caller())
}
