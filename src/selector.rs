//! Victim selection: combines the perceptron predictor with the
//! Tree-PseudoLRU recency tracker to pick one block to evict (or fill).

use crate::predictor::Predictor;
use crate::recency::RecencyTracker;

/// Identifies the process/thread that issued the access. Opaque to
/// the selector besides being carried through for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Everything a `find_victim` call needs about the in-flight access.
/// Opaque to the selector save for `address`, which is forwarded to
/// the predictor.
#[derive(Debug, Clone, Copy)]
pub struct VictimContext {
    pub address: u64,
    pub pid: ProcessId,
    pub kind: AccessKind,
    pub line_id: u64,
}

/// One physical storage entry in a set.
#[derive(Debug, Clone)]
pub struct Block {
    pub valid: bool,
    pub locked: bool,
    pub way_id: usize,
    pub tag: u64,
    pub block_address: u64,
}

impl Block {
    pub fn empty(way_id: usize) -> Self {
        Self {
            valid: false,
            locked: false,
            way_id,
            tag: 0,
            block_address: 0,
        }
    }
}

/// W block slots plus the per-set recency state.
#[derive(Debug, Clone)]
pub struct Set {
    pub blocks: Vec<Block>,
    pub recency: RecencyTracker,
}

impl Set {
    pub fn new(ways: usize) -> Self {
        Self {
            blocks: (0..ways).map(Block::empty).collect(),
            recency: RecencyTracker::new(ways),
        }
    }
}

/// Combines a `Predictor` with the recency hints carried in each
/// passed-in `Set` to choose a victim block.
#[derive(Debug, Clone)]
pub struct VictimSelector {
    predictor: Predictor,
    ways: usize,
}

impl VictimSelector {
    pub fn new(predictor: Predictor, ways: usize) -> Self {
        Self { predictor, ways }
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn predictor_mut(&mut self) -> &mut Predictor {
        &mut self.predictor
    }

    /// Picks a victim block from `set`. Never panics: an empty-set
    /// call is a precondition violation the caller must not make, and
    /// an all-locked set degrades to returning the first block rather
    /// than aborting.
    pub fn find_victim<'a>(&mut self, set: &'a Set, ctx: &VictimContext) -> &'a Block {
        debug_assert!(!set.blocks.is_empty(), "find_victim on an empty set");

        if let Some(block) = set
            .blocks
            .iter()
            .find(|block| !block.valid && !block.locked)
        {
            return block;
        }

        let prediction = self.predictor.evaluate(ctx.address);

        if prediction.confident && prediction.predict_no_reuse {
            if let Some(block) = first_unlocked(set) {
                return block;
            }
        } else {
            let hinted_way = set.recency.victim();
            if let Some(block) = set.blocks.get(hinted_way).filter(|block| !block.locked) {
                return block;
            }
            if let Some(block) = first_unlocked(set) {
                return block;
            }
        }

        // Every way locked: liveness fallback, never the selector's problem.
        &set.blocks[0]
    }
}

fn first_unlocked(set: &Set) -> Option<&Block> {
    set.blocks.iter().find(|block| !block.locked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(address: u64) -> VictimContext {
        VictimContext {
            address,
            pid: ProcessId(0),
            kind: AccessKind::Read,
            line_id: 0,
        }
    }

    #[test]
    fn cold_set_returns_first_invalid_way() {
        let predictor = Predictor::new(0, 32, 2);
        let mut selector = VictimSelector::new(predictor, 4);
        let set = Set::new(4);
        let victim = selector.find_victim(&set, &ctx(0xABCD_1234));
        assert_eq!(victim.way_id, 0);
    }

    #[test]
    fn second_invalid_way_after_first_is_filled() {
        let predictor = Predictor::new(0, 32, 2);
        let mut selector = VictimSelector::new(predictor, 4);
        let mut set = Set::new(4);
        set.blocks[0].valid = true;
        set.recency.touch(0);
        let victim = selector.find_victim(&set, &ctx(0xABCD_5678));
        assert_eq!(victim.way_id, 1);
    }

    #[test]
    fn uncertain_predictor_defers_to_pseudo_lru() {
        let predictor = Predictor::new(0, 32, 2); // zero weights => score always 0
        let mut selector = VictimSelector::new(predictor, 4);
        let mut set = Set::new(4);
        for b in &mut set.blocks {
            b.valid = true;
        }
        for way in [1, 3, 0, 2] {
            set.recency.touch(way);
        }
        let victim = selector.find_victim(&set, &ctx(0x1));
        assert_eq!(victim.way_id, 1);
    }

    #[test]
    fn confident_no_reuse_prediction_overrides_recency() {
        let mut predictor = Predictor::new(0, 32, 2);
        predictor.set_weight(1, 31);
        predictor.set_weight(3, 31);
        // 0xAAAA_AAAA has bits 1,3,5,... set; with weight 31 on bits 1
        // and 3 the score comfortably clears theta=32.
        let mut selector = VictimSelector::new(predictor, 4);
        let mut set = Set::new(4);
        for b in &mut set.blocks {
            b.valid = true;
        }
        set.recency.touch(0);
        set.recency.touch(1);
        set.recency.touch(3); // recency would otherwise point at way 2
        let victim = selector.find_victim(&set, &ctx(0xAAAA_AAAA));
        assert_eq!(victim.way_id, 0);
        let (total, _, _) = selector.predictor().stats();
        assert_eq!(total, 1);
    }

    #[test]
    fn locked_recency_hint_falls_back_to_first_unlocked() {
        let predictor = Predictor::new(0, 32, 2);
        let mut selector = VictimSelector::new(predictor, 4);
        let mut set = Set::new(4);
        for b in &mut set.blocks {
            b.valid = true;
        }
        for way in [1, 3, 0, 2] {
            set.recency.touch(way);
        }
        // Recency points at way 1; lock it so the selector must move on.
        set.blocks[1].locked = true;
        let victim = selector.find_victim(&set, &ctx(0x1));
        assert_ne!(victim.way_id, 1);
        assert!(!victim.locked);
    }

    #[test]
    fn all_locked_returns_way_zero_without_panicking() {
        let predictor = Predictor::new(0, 32, 2);
        let mut selector = VictimSelector::new(predictor, 4);
        let mut set = Set::new(4);
        for b in &mut set.blocks {
            b.valid = true;
            b.locked = true;
        }
        let victim = selector.find_victim(&set, &ctx(0x1));
        assert_eq!(victim.way_id, 0);
    }

    #[test]
    fn exactly_one_unlocked_way_wins_regardless_of_prediction() {
        let mut predictor = Predictor::new(0, 32, 2);
        predictor.set_weight(0, 31);
        predictor.set_weight(1, 31);
        let mut selector = VictimSelector::new(predictor, 4);
        let mut set = Set::new(4);
        for b in &mut set.blocks {
            b.valid = true;
            b.locked = true;
        }
        set.blocks[2].locked = false;
        let victim = selector.find_victim(&set, &ctx(0b11));
        assert_eq!(victim.way_id, 2);
    }
}
