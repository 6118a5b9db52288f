use candid::{CandidType, Deserialize, Principal};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

use crate::board::CellSet;

// =============================================================================
// CONSTANTS
// =============================================================================

pub const DECIMALS_PER_CKUSDT: u64 = 1_000_000; // 1 ckUSDT = 1,000,000 decimals (6 decimals)
pub const MIN_STAKE: u64 = 10_000; // 0.01 USDT
pub const MAX_STAKE: u64 = 1_000_000_000_000; // 1M USDT
pub const MAX_DIM: u8 = 10; // Board is at most 10x10
pub const MAX_ACTIVE_ROUNDS_PER_PLAYER: usize = 5; // DoS protection
pub const FEE_BPS: u64 = 0; // Cash-out house fee in basis points
pub const MIN_DEPOSIT: u64 = 100_000; // 0.1 USDT
pub const MIN_WITHDRAWAL: u64 = 100_000; // 0.1 USDT

pub const CKUSDT_CANISTER_ID: &str = "cngnf-vqaaa-aaaar-qag4q-cai";
pub const CKUSDT_TRANSFER_FEE: u64 = 10_000;
pub const RANDOMNESS_CANISTER_ID: &str = "e454q-riaaa-aaaap-qqcyq-cai";
pub const OPERATOR_PRINCIPAL: &str =
    "p7336-jmpo5-pkjsf-7dqkd-ea3zu-g2ror-ctcn2-sxtuo-tjve3-ulrx7-wae";

const _: () = assert!(FEE_BPS <= 10_000);
const _: () = assert!((MAX_DIM as usize) * (MAX_DIM as usize) <= CellSet::CAPACITY);

// =============================================================================
// ERRORS
// =============================================================================

/// Every failure surfaced by the canister. Validation failures are rejected
/// before any state mutation; settlement failures abort the whole transition.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum GameError {
    // Validation
    InvalidDimensions { rows: u8, cols: u8 },
    InvalidBombCount { bombs: u8, cells: u8 },
    InvalidStake { stake: u64 },
    OutOfBounds { row: u8, col: u8 },
    AlreadyRevealed { row: u8, col: u8 },
    InvalidRange,
    BoardTooLarge { cells: u8 },
    DegenerateBoard,
    ArithmeticOverflow,
    TooManyActiveRounds { limit: u64 },
    AmountTooSmall { minimum: u64 },
    // Lifecycle state
    NotActive { current: RoundStatus },
    InvalidState { current: RoundStatus },
    // Liquidity
    InsufficientLiquidity { required: u64, available: u64 },
    InsufficientBalance { required: u64, available: u64 },
    // Randomness fee
    InsufficientFee { quoted: u64, available: u64 },
    // Unknown references
    UnknownRound { round_id: u64 },
    UnknownCorrelation { correlation_id: u64 },
    // Boundary transfers
    TransferFailed { message: String },
    // Authorization
    NotOwner,
    Unauthorized,
    // Concurrency
    OperationInProgress,
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::InvalidDimensions { rows, cols } => {
                write!(f, "invalid board dimensions {}x{}", rows, cols)
            }
            GameError::InvalidBombCount { bombs, cells } => {
                write!(f, "invalid bomb count {} for {} cells", bombs, cells)
            }
            GameError::InvalidStake { stake } => write!(f, "invalid stake {}", stake),
            GameError::OutOfBounds { row, col } => {
                write!(f, "cell ({}, {}) is out of bounds", row, col)
            }
            GameError::AlreadyRevealed { row, col } => {
                write!(f, "cell ({}, {}) is already revealed", row, col)
            }
            GameError::InvalidRange => write!(f, "sampling range must be positive"),
            GameError::BoardTooLarge { cells } => {
                write!(f, "board of {} cells exceeds bitmask capacity", cells)
            }
            GameError::DegenerateBoard => write!(f, "board has no safe cells"),
            GameError::ArithmeticOverflow => write!(f, "arithmetic overflow"),
            GameError::TooManyActiveRounds { limit } => {
                write!(f, "at most {} unsettled rounds per player", limit)
            }
            GameError::AmountTooSmall { minimum } => {
                write!(f, "amount below minimum of {}", minimum)
            }
            GameError::NotActive { current } => {
                write!(f, "round is not active (currently {:?})", current)
            }
            GameError::InvalidState { current } => {
                write!(f, "operation not valid in state {:?}", current)
            }
            GameError::InsufficientLiquidity { required, available } => write!(
                f,
                "pool cannot cover worst-case payout: need {}, have {}",
                required, available
            ),
            GameError::InsufficientBalance { required, available } => {
                write!(f, "insufficient balance: need {}, have {}", required, available)
            }
            GameError::InsufficientFee { quoted, available } => {
                write!(f, "randomness fee of {} exceeds available {}", quoted, available)
            }
            GameError::UnknownRound { round_id } => write!(f, "unknown round {}", round_id),
            GameError::UnknownCorrelation { correlation_id } => {
                write!(f, "unknown or already-consumed correlation {}", correlation_id)
            }
            GameError::TransferFailed { message } => write!(f, "transfer failed: {}", message),
            GameError::NotOwner => write!(f, "caller does not own this round"),
            GameError::Unauthorized => write!(f, "caller is not authorized"),
            GameError::OperationInProgress => {
                write!(f, "another operation is already in progress")
            }
        }
    }
}

// =============================================================================
// ROUND ENTITY
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    Created,
    SeedRequested,
    Active,
    Settled,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    Loss,
    Won { payout: u64 },
}

/// One play-through from stake to settlement. Rounds are never deleted from
/// the table; a settled round keeps its seed and bomb placement so the board
/// can be re-derived by anyone holding the seed.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Round {
    pub owner: Principal,
    pub rows: u8,
    pub cols: u8,
    pub bombs: u8,
    pub stake: u64,
    pub status: RoundStatus,
    pub pending_request: Option<u64>,
    pub seed: Option<[u8; 32]>,
    pub bomb_cells: CellSet,
    pub revealed_cells: CellSet,
    pub safe_reveals: u8,
    pub outcome: Option<RoundOutcome>,
    pub created_at: u64,
}

impl Round {
    pub fn cell_count(&self) -> u8 {
        self.rows * self.cols
    }

    pub fn max_safe(&self) -> u8 {
        self.cell_count() - self.bombs
    }

    pub fn cell_index(&self, row: u8, col: u8) -> Result<u8, GameError> {
        if row >= self.rows || col >= self.cols {
            return Err(GameError::OutOfBounds { row, col });
        }
        Ok(row * self.cols + col)
    }
}

impl ic_stable_structures::Storable for Round {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).expect("Failed to serialize Round"))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).expect("Failed to deserialize Round")
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Unbounded;
}

// =============================================================================
// STATISTICS
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Default, Debug)]
pub struct GameStats {
    pub total_rounds: u64,
    pub total_busted: u64,
    pub total_cashouts: u64,
    pub total_staked: u64,
    pub total_paid_out: u64,
}

impl ic_stable_structures::Storable for GameStats {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).expect("Failed to serialize GameStats"))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).expect("Failed to deserialize GameStats")
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Bounded {
            max_size: 256,
            is_fixed_size: false,
        };
}

// =============================================================================
// STORABLE KEYS
// =============================================================================

// Principal is not a native stable-structures key; wrap it the same way the
// pool wraps Nat.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorablePrincipal(pub Principal);

impl ic_stable_structures::Storable for StorablePrincipal {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(self.0.as_slice().to_vec())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        StorablePrincipal(Principal::from_slice(&bytes))
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Bounded {
            max_size: 29,
            is_fixed_size: false,
        };
}

// =============================================================================
// API VIEWS
// =============================================================================

/// Result of a single tile reveal. `payout` is non-zero only when the reveal
/// settled the round with a win (cap reached or board cleared).
#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct TileReveal {
    pub bomb: bool,
    pub settled: bool,
    pub safe_reveals: u8,
    pub multiplier: u64,
    pub payout: u64,
}

/// Round state as exposed to callers. The seed and bomb placement are
/// withheld until the round settles; a live board must not be computable
/// off-canister.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct RoundView {
    pub round_id: u64,
    pub owner: Principal,
    pub rows: u8,
    pub cols: u8,
    pub bombs: u8,
    pub status: RoundStatus,
    pub stake: u64,
    pub safe_reveals: u8,
    pub revealed: Vec<bool>,
    pub multiplier: u64,
    pub outcome: Option<RoundOutcome>,
    pub seed: Option<[u8; 32]>,
    pub bomb_cells: Option<Vec<u8>>,
    pub created_at: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct RoundSummary {
    pub round_id: u64,
    pub rows: u8,
    pub cols: u8,
    pub bombs: u8,
    pub status: RoundStatus,
    pub stake: u64,
    pub created_at: u64,
}

// =============================================================================
// ICRC-2 TYPES
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct Account {
    pub owner: Principal,
    pub subaccount: Option<[u8; 32]>,
}

impl From<Principal> for Account {
    fn from(owner: Principal) -> Self {
        Self {
            owner,
            subaccount: None,
        }
    }
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct TransferFromArgs {
    pub from: Account,
    pub to: Account,
    pub amount: candid::Nat,
    pub fee: Option<candid::Nat>,
    pub memo: Option<Vec<u8>>,
    pub created_at_time: Option<u64>,
    pub spender_subaccount: Option<[u8; 32]>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub enum TransferFromError {
    BadFee { expected_fee: candid::Nat },
    BadBurn { min_burn_amount: candid::Nat },
    InsufficientFunds { balance: candid::Nat },
    InsufficientAllowance { allowance: candid::Nat },
    TooOld,
    CreatedInFuture { ledger_time: u64 },
    Duplicate { duplicate_of: candid::Nat },
    TemporarilyUnavailable,
    GenericError { error_code: candid::Nat, message: String },
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct TransferArg {
    pub from_subaccount: Option<[u8; 32]>,
    pub to: Account,
    pub amount: candid::Nat,
    pub fee: Option<candid::Nat>,
    pub memo: Option<Vec<u8>>,
    pub created_at_time: Option<u64>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub enum TransferError {
    BadFee { expected_fee: candid::Nat },
    BadBurn { min_burn_amount: candid::Nat },
    InsufficientFunds { balance: candid::Nat },
    TooOld,
    CreatedInFuture { ledger_time: u64 },
    Duplicate { duplicate_of: candid::Nat },
    TemporarilyUnavailable,
    GenericError { error_code: candid::Nat, message: String },
}
