//! The asset entity and its tree
use super::error::StoreError;
use super::types::{self, CategoryId, StateId, TimeStamp};
use chrono::Utc;
use sled::{Db, Tree};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AssetRecord {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7, `asset_` prefix
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub category: CategoryId,
    #[n(3)]
    pub current_state: Option<StateId>, // only None before the bootstrap commit
    #[n(4)]
    pub version: u64, // bumped on every committed write
    #[n(5)]
    pub transitions: u64, // ledger records written for this asset
    #[n(6)]
    pub head: Option<String>, // digest of the latest ledger record
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl AssetRecord {
    pub(crate) fn draft(id: String, name: String, category: CategoryId) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            name,
            category,
            current_state: None,
            version: 0,
            transitions: 0,
            head: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// True until the first state has been committed.
    pub fn is_unplaced(&self) -> bool {
        self.current_state.is_none()
    }

    /// Copy carrying a metadata edit.
    pub(crate) fn touched(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = TimeStamp::new();
        next
    }
}

pub(crate) struct AssetStore {
    tree: Tree,
}

impl AssetStore {
    pub(crate) fn new(instance: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: instance.open_tree("assets")?,
        })
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub(crate) fn get(&self, id: &str) -> Result<Option<AssetRecord>, StoreError> {
        self.tree
            .get(id.as_bytes())?
            .map(|bytes| types::decode(&bytes))
            .transpose()
    }

    pub(crate) fn all(&self) -> Result<Vec<AssetRecord>, StoreError> {
        self.tree
            .iter()
            .values()
            .map(|bytes| -> Result<_, StoreError> { types::decode(&bytes?) })
            .collect()
    }
}
