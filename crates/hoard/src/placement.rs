//! Weighted placement of chunks across registered stores.
//!
//! A prefix-sum table is built once from the registry. Each selection draws
//! `r` uniformly from `[1, total]` and binary searches for the first entry
//! whose cumulative weight reaches `r`, so a store with weight `w` is picked
//! with probability `w / total`. Stores with weight 0 stay readable but never
//! receive new chunks.

use rand::Rng;

use crate::error::{HoardError, HoardResult};
use crate::key::StoreId;

/// Immutable weighted selection table.
#[derive(Debug, Clone)]
pub struct WeightedPlacement {
    stores: Vec<StoreId>,
    cumulative: Vec<u64>,
}

impl WeightedPlacement {
    /// Build the table from `(store, weight)` pairs in registration order.
    pub fn new<I>(registry: I) -> HoardResult<Self>
    where
        I: IntoIterator<Item = (StoreId, u32)>,
    {
        let mut stores = Vec::new();
        let mut cumulative = Vec::new();
        let mut total = 0u64;

        for (store, weight) in registry {
            if stores.contains(&store) {
                return Err(HoardError::Configuration(format!(
                    "store {store} registered twice"
                )));
            }
            total += u64::from(weight);
            stores.push(store);
            cumulative.push(total);
        }

        if stores.is_empty() {
            return Err(HoardError::Configuration(
                "no chunk stores registered".to_string(),
            ));
        }
        if total == 0 {
            return Err(HoardError::Configuration(
                "every registered store has weight 0".to_string(),
            ));
        }

        Ok(Self { stores, cumulative })
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Registered stores in table order.
    pub fn stores(&self) -> &[StoreId] {
        &self.stores
    }

    /// Pick a store using the thread-local RNG.
    pub fn choose(&self) -> &StoreId {
        self.choose_with(&mut rand::thread_rng())
    }

    /// Pick a store using the given RNG.
    pub fn choose_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &StoreId {
        let r = rng.gen_range(1..=self.total_weight());
        &self.stores[self.index_for(r)]
    }

    /// Index of the first entry whose cumulative weight is `>= r`.
    fn index_for(&self, r: u64) -> usize {
        self.cumulative.partition_point(|&c| c < r)
    }
}
