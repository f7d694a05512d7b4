use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// 无放回均匀随机抽取中奖者
pub struct WinnerSelector {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Default for WinnerSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WinnerSelector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Uses the given random source, e.g. a seeded `StdRng` in tests.
    pub fn with_rng<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Draws `min(count, |participants - exclude|)` distinct winners. The
    /// order of the returned list is the draw order.
    pub fn select(
        &self,
        participants: &BTreeSet<String>,
        count: u32,
        exclude: &HashSet<String>,
    ) -> Vec<String> {
        let eligible: Vec<&String> = participants
            .iter()
            .filter(|p| !exclude.contains(*p))
            .collect();

        let amount = (count as usize).min(eligible.len());
        if amount == 0 {
            return Vec::new();
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rand::seq::index::sample(&mut **rng, eligible.len(), amount)
            .into_iter()
            .map(|i| eligible[i].clone())
            .collect()
    }
}
