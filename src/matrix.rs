//! Category → legal state junction, cached per category.
//!
//! The junction tree is keyed `category_id ++ state_id` (both big-endian) so a
//! prefix scan over one category yields its states in id order. Reads go
//! through a per-category cache; `link`/`unlink` drop the affected entry.
//!
//! A fill runs without holding the lock, so each invalidation also bumps a
//! generation. A scan whose generation moved meanwhile is returned to its
//! caller but never cached.
use super::catalog::{State, StateCatalog};
use super::error::{CatalogError, StoreError};
use super::types::{CategoryId, StateId};
use super::utils;
use sled::{Db, Tree};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub struct CategoryStateMatrix {
    links: Tree,
    cache: RwLock<LegalityCache>,
}

#[derive(Default)]
struct LegalityCache {
    entries: HashMap<CategoryId, Arc<BTreeSet<StateId>>>,
    generations: HashMap<CategoryId, u64>,
    epoch: u64, // bumped by invalidate_all
}

impl LegalityCache {
    fn stamp(&self, category: CategoryId) -> (u64, u64) {
        (
            self.epoch,
            self.generations.get(&category).copied().unwrap_or_default(),
        )
    }
}

impl CategoryStateMatrix {
    pub fn new(instance: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            links: instance.open_tree("category_state")?,
            cache: RwLock::new(LegalityCache::default()),
        })
    }

    pub fn link(&self, category: CategoryId, state: StateId) -> Result<(), CatalogError> {
        self.links
            .insert(utils::pair_key(category.0, state.0), Vec::<u8>::new())?;
        self.invalidate(category);
        Ok(())
    }

    /// Returns whether the pair was linked before.
    pub fn unlink(&self, category: CategoryId, state: StateId) -> Result<bool, CatalogError> {
        let existed = self
            .links
            .remove(utils::pair_key(category.0, state.0))?
            .is_some();
        self.invalidate(category);
        Ok(existed)
    }

    /// Legal state ids for a category. Unknown categories have none.
    pub fn legal_state_ids(&self, category: CategoryId) -> Result<Arc<BTreeSet<StateId>>, StoreError> {
        let stamp = {
            let cache = self.read_cache();
            if let Some(hit) = cache.entries.get(&category) {
                return Ok(hit.clone());
            }
            cache.stamp(category)
        };

        let ids = Arc::new(self.scan(category)?);
        self.fill(category, stamp, ids.clone());
        Ok(ids)
    }

    fn scan(&self, category: CategoryId) -> Result<BTreeSet<StateId>, StoreError> {
        let mut ids = BTreeSet::new();
        for key in self.links.scan_prefix(category.to_be_bytes()).keys() {
            let key = key?;
            let state = utils::u64_from_be(&key[8..])
                .ok_or_else(|| StoreError::Corrupt("short category_state key".into()))?;
            ids.insert(StateId(state));
        }
        Ok(ids)
    }

    // Returns whether the scan was cached.
    fn fill(&self, category: CategoryId, stamp: (u64, u64), ids: Arc<BTreeSet<StateId>>) -> bool {
        let mut cache = self.write_cache();
        if cache.stamp(category) != stamp {
            debug!(%category, "category legality changed during load, not cached");
            return false;
        }
        debug!(%category, states = ids.len(), "category legality loaded");
        cache.entries.insert(category, ids);
        true
    }

    pub fn is_state_valid_for_category(
        &self,
        category: CategoryId,
        state: StateId,
    ) -> Result<bool, StoreError> {
        Ok(self.legal_state_ids(category)?.contains(&state))
    }

    /// Legal states resolved against the catalog, ordered by id.
    pub fn list_states_for_category(
        &self,
        catalog: &StateCatalog,
        category: CategoryId,
    ) -> Result<Vec<State>, StoreError> {
        let mut states = Vec::new();
        for id in self.legal_state_ids(category)?.iter() {
            // links may outlive a state record; skip rather than fail
            if let Some(state) = catalog.state(*id)? {
                states.push(state);
            }
        }
        Ok(states)
    }

    pub fn invalidate(&self, category: CategoryId) {
        let mut cache = self.write_cache();
        cache.entries.remove(&category);
        *cache.generations.entry(category).or_default() += 1;
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.write_cache();
        cache.entries.clear();
        cache.epoch += 1;
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, LegalityCache> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, LegalityCache> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
