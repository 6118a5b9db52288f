use candid::Deserialize;
use serde::Serialize;

use crate::sampler;
use crate::types::GameError;

/// Fixed-capacity bit-set over board cell indices.
///
/// Two 64-bit words give room for the largest board (10x10 = 100 cells) with
/// an explicit capacity bound in place of the source chain's native-word
/// mask.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellSet {
    words: [u64; 2],
}

impl CellSet {
    pub const CAPACITY: usize = 128;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u8) {
        self.words[(index >> 6) as usize] |= 1u64 << (index & 63);
    }

    pub fn contains(&self, index: u8) -> bool {
        self.words[(index >> 6) as usize] & (1u64 << (index & 63)) != 0
    }

    /// Number of set bits.
    pub fn len(&self) -> u8 {
        (self.words[0].count_ones() + self.words[1].count_ones()) as u8
    }

    pub fn is_empty(&self) -> bool {
        self.words == [0, 0]
    }

    pub fn intersects(&self, other: &CellSet) -> bool {
        self.words[0] & other.words[0] != 0 || self.words[1] & other.words[1] != 0
    }

    /// Set indices in ascending order.
    pub fn indices(&self) -> Vec<u8> {
        (0..Self::CAPACITY as u8).filter(|i| self.contains(*i)).collect()
    }
}

/// Places `bomb_count` bombs on a board of `cell_count` cells, deterministic
/// in `seed`.
///
/// Partial Fisher-Yates over the conceptual array `[0, cell_count)`: each of
/// the first `bomb_count` positions is swapped with a uniform pick among the
/// cells not yet placed, so the result is an unbiased sample of `bomb_count`
/// distinct indices. The loop index is the draw salt, making the whole
/// sequence reproducible from the seed alone.
pub fn place_bombs(seed: &[u8; 32], cell_count: u8, bomb_count: u8) -> Result<CellSet, GameError> {
    if cell_count as usize > CellSet::CAPACITY {
        return Err(GameError::BoardTooLarge { cells: cell_count });
    }
    if bomb_count == 0 || bomb_count >= cell_count {
        return Err(GameError::InvalidBombCount {
            bombs: bomb_count,
            cells: cell_count,
        });
    }

    let mut cells: Vec<u8> = (0..cell_count).collect();
    let mut bombs = CellSet::new();
    for i in 0..bomb_count as usize {
        let remaining = cell_count as u64 - i as u64;
        let j = i as u64 + sampler::uniform(seed, i as u64, remaining)?;
        cells.swap(i, j as usize);
        bombs.insert(cells[i]);
    }
    Ok(bombs)
}
