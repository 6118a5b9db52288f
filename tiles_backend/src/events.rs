use candid::{CandidType, Deserialize, Principal};
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableVec;
use std::borrow::Cow;
use std::cell::RefCell;

use crate::Memory;

const EVENTS_MEMORY_ID: u8 = 5;

/// Observable side effect of a state transition, kept as an append-only
/// audit trail for external consumers.
#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    RoundCreated {
        round_id: u64,
        owner: Principal,
        rows: u8,
        cols: u8,
        bombs: u8,
        stake: u64,
    },
    SeedRequested {
        round_id: u64,
        correlation_id: u64,
        fee: u64,
    },
    SeedFulfilled {
        round_id: u64,
    },
    TileRevealed {
        round_id: u64,
        cell: u8,
        bomb: bool,
    },
    BombHit {
        round_id: u64,
        stake_lost: u64,
    },
    CashedOut {
        round_id: u64,
        payout: u64,
    },
    PoolFunded {
        from: Principal,
        amount: u64,
    },
    PoolWithdrawn {
        to: Principal,
        amount: u64,
    },
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct EventEntry {
    pub timestamp: u64,
    pub event: GameEvent,
}

impl ic_stable_structures::Storable for EventEntry {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).expect("Failed to encode EventEntry"))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).expect("Failed to decode EventEntry")
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Bounded {
            max_size: 500,
            is_fixed_size: false,
        };
}

thread_local! {
    static EVENTS: RefCell<StableVec<EventEntry, Memory>> = RefCell::new(
        StableVec::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(EVENTS_MEMORY_ID))),
        )
        .expect("Failed to initialize EVENTS")
    );
}

pub fn record(timestamp: u64, event: GameEvent) {
    EVENTS.with(|log| {
        let entry = EventEntry { timestamp, event };
        // A full log must not abort the transition that emitted the event.
        let _ = log.borrow_mut().push(&entry);
    });
}

pub fn get_events(offset: u64, limit: u32) -> Vec<EventEntry> {
    EVENTS.with(|log| {
        let log = log.borrow();
        (offset..log.len())
            .take(limit as usize)
            .filter_map(|i| log.get(i))
            .collect()
    })
}

pub fn event_count() -> u64 {
    EVENTS.with(|log| log.borrow().len())
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    EVENTS.with(|log| {
        let mut log = log.borrow_mut();
        while log.pop().is_some() {}
    });
}
