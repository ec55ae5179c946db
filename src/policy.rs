//! The directory-facing `ReplacementPolicy` capability and its two
//! finite implementations: the perceptron-predicted policy (the core
//! of this crate) and a plain Tree-PseudoLRU baseline for comparison.
//!
//! A trait rather than a tagged enum keeps `Cache` generic over the
//! policy without a runtime vtable on the hot path when monomorphized,
//! per the design notes' preference for a compile-time generic over
//! an interface.

use crate::predictor::{Predictor, PredictorConfig};
use crate::recency::RecencyTracker;
use crate::selector::{Block, Set, VictimContext, VictimSelector};

pub trait ReplacementPolicy {
    /// Picks a victim block for `set` given the in-flight access.
    fn find_victim<'a>(&mut self, set: &'a Set, ctx: &VictimContext) -> &'a Block;
    /// Directory notification: `addr` was hit.
    fn on_hit(&mut self, addr: u64);
    /// Directory notification: `addr` was evicted without an intervening hit.
    fn on_evict(&mut self, addr: u64);
    /// Directory notification: `way` in `set` just became most-recently-used.
    fn on_touch(&mut self, set: &mut Set, way: usize);
}

/// The perceptron-predicted policy from the design: a single shared
/// `Predictor` plus one `RecencyTracker` per set (embedded in `Set`
/// already), combined by `VictimSelector`.
pub struct PerceptronPolicy {
    selector: VictimSelector,
}

impl PerceptronPolicy {
    pub fn new(config: PredictorConfig, ways: usize) -> Self {
        Self {
            selector: VictimSelector::new(Predictor::with_config(config), ways),
        }
    }

    pub fn predictor(&self) -> &Predictor {
        self.selector.predictor()
    }
}

impl ReplacementPolicy for PerceptronPolicy {
    fn find_victim<'a>(&mut self, set: &'a Set, ctx: &VictimContext) -> &'a Block {
        self.selector.find_victim(set, ctx)
    }

    fn on_hit(&mut self, addr: u64) {
        self.selector.predictor_mut().train(addr, true);
    }

    fn on_evict(&mut self, addr: u64) {
        self.selector.predictor_mut().train(addr, false);
    }

    fn on_touch(&mut self, set: &mut Set, way: usize) {
        set.recency.touch(way);
    }
}

/// Pure Tree-PseudoLRU, no predictor consulted. The always-available
/// recency-only fallback baseline.
pub struct PseudoLruPolicy;

impl PseudoLruPolicy {
    pub fn new(_ways: usize) -> Self {
        Self
    }
}

impl ReplacementPolicy for PseudoLruPolicy {
    fn find_victim<'a>(&mut self, set: &'a Set, _ctx: &VictimContext) -> &'a Block {
        if let Some(block) = set
            .blocks
            .iter()
            .find(|block| !block.valid && !block.locked)
        {
            return block;
        }
        let hinted = set.recency.victim();
        if let Some(block) = set.blocks.get(hinted).filter(|b| !b.locked) {
            return block;
        }
        set.blocks
            .iter()
            .find(|block| !block.locked)
            .unwrap_or(&set.blocks[0])
    }

    fn on_hit(&mut self, _addr: u64) {}
    fn on_evict(&mut self, _addr: u64) {}
    fn on_touch(&mut self, set: &mut Set, way: usize) {
        set.recency.touch(way);
    }
}

/// Constructs a fresh `RecencyTracker`-bearing `Set`; both policies
/// share this since the tree state lives in `Set`, not the policy.
pub fn new_set(ways: usize) -> Set {
    Set::new(ways)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{AccessKind, ProcessId};

    fn ctx(address: u64) -> VictimContext {
        VictimContext {
            address,
            pid: ProcessId(0),
            kind: AccessKind::Read,
            line_id: 0,
        }
    }

    #[test]
    fn pseudo_lru_policy_never_consults_predictor() {
        let mut policy = PseudoLruPolicy::new(4);
        let mut set = new_set(4);
        for b in &mut set.blocks {
            b.valid = true;
        }
        for way in [1, 3, 0, 2] {
            policy.on_touch(&mut set, way);
        }
        let victim = policy.find_victim(&set, &ctx(0xAAAA_AAAA));
        assert_eq!(victim.way_id, 1);
    }

    #[test]
    fn perceptron_policy_trains_through_hooks() {
        let mut policy = PerceptronPolicy::new(
            PredictorConfig {
                threshold: 0,
                theta: 32,
                lr: 2,
                train_sample_mod: 1,
            },
            4,
        );
        let set = new_set(4);
        let _ = policy.find_victim(&set, &ctx(0xDEAD_BEEF));
        policy.on_hit(0xDEAD_BEEF);
        let (total, _, _) = policy.predictor().stats();
        assert_eq!(total, 1);
    }
}
