//! Append-only transition history.
//!
//! Records live in the `transition_history` tree under `asset_id/sequence`.
//! The only write path is [`HistoryLedger::append`], which runs inside the
//! engine's transaction; nothing here updates or removes a record.
use super::error::{StoreError, TransitionError};
use super::types::{self, StateId, TimeStamp};
use super::utils;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};
use sled::{Db, Tree};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TransitionRecord {
    #[n(0)]
    pub id: u64, // monotonic across the whole database
    #[n(1)]
    pub asset_id: String,
    #[n(2)]
    pub sequence: u64, // 1-based, per asset
    #[n(3)]
    pub previous_state: Option<StateId>, // None marks the bootstrap record
    #[n(4)]
    pub new_state: StateId,
    #[n(5)]
    pub actor_id: String,
    #[n(6)]
    pub timestamp: TimeStamp<Utc>,
    #[n(7)]
    pub reason: String,
    #[n(8)]
    pub notes: Option<String>,
    #[n(9)]
    pub prev_hash: Option<String>, // digest of the previous record of this asset
}

/// A transition that has been validated but not yet numbered.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub asset_id: String,
    pub previous_state: Option<StateId>,
    pub new_state: StateId,
    pub actor_id: String,
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Result of folding an asset's records from the bootstrap entry onwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Replay {
    pub state: Option<StateId>,
    pub records: u64,
    pub head: Option<String>,
    /// Sequence of the first record that does not follow from its predecessor.
    pub broken_at: Option<u64>,
}

impl TransitionRecord {
    pub fn is_bootstrap(&self) -> bool {
        self.previous_state.is_none()
    }

    pub fn digest(&self) -> Result<(String, Vec<u8>), StoreError> {
        types::digest(self)
    }
}

pub struct HistoryLedger {
    instance: Db,
    tree: Tree,
}

impl HistoryLedger {
    pub(crate) fn new(instance: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: instance.open_tree("transition_history")?,
            instance: instance.clone(),
        })
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Number a draft: generated id, current time, chain link.
    pub(crate) fn seal(
        &self,
        draft: RecordDraft,
        sequence: u64,
        prev_hash: Option<String>,
    ) -> Result<TransitionRecord, StoreError> {
        Ok(TransitionRecord {
            id: self.instance.generate_id()?,
            asset_id: draft.asset_id,
            sequence,
            previous_state: draft.previous_state,
            new_state: draft.new_state,
            actor_id: draft.actor_id,
            timestamp: TimeStamp::new(),
            reason: draft.reason,
            notes: draft.notes,
            prev_hash,
        })
    }

    /// Stage a sealed record in `history`. A taken slot means another writer
    /// got there first.
    pub(crate) fn append(
        &self,
        history: &TransactionalTree,
        record: &TransitionRecord,
        cbor: &[u8],
    ) -> ConflictableTransactionResult<(), TransitionError> {
        let key = utils::ledger_key(&record.asset_id, record.sequence);
        if history.get(key.as_slice())?.is_some() {
            return abort(TransitionError::ConcurrentModification(
                record.asset_id.clone(),
            ));
        }
        history.insert(key, cbor)?;
        Ok(())
    }

    /// Lazily walks one asset's records. Calling it again restarts the walk.
    pub fn list_for_asset(&self, asset_id: &str, order: Order) -> LedgerIter {
        LedgerIter {
            inner: self.tree.scan_prefix(utils::asset_prefix(asset_id)),
            order,
        }
    }

    /// Every record, grouped by asset.
    pub fn iter(&self) -> LedgerIter {
        LedgerIter {
            inner: self.tree.iter(),
            order: Order::Ascending,
        }
    }

    pub fn find_first(&self, asset_id: &str) -> Result<Option<TransitionRecord>, StoreError> {
        self.list_for_asset(asset_id, Order::Ascending)
            .next()
            .transpose()
    }

    pub fn find_latest(&self, asset_id: &str) -> Result<Option<TransitionRecord>, StoreError> {
        self.list_for_asset(asset_id, Order::Descending)
            .next()
            .transpose()
    }

    pub fn count_for_asset(&self, asset_id: &str) -> Result<u64, StoreError> {
        let mut count = 0;
        for key in self.tree.scan_prefix(utils::asset_prefix(asset_id)).keys() {
            key?;
            count += 1;
        }
        Ok(count)
    }

    pub fn replay(&self, asset_id: &str) -> Result<Replay, StoreError> {
        let mut replay = Replay::default();

        for record in self.list_for_asset(asset_id, Order::Ascending) {
            let record = record?;
            let follows = record.sequence == replay.records + 1
                && record.previous_state == replay.state
                && record.prev_hash == replay.head;
            if !follows {
                replay.broken_at = Some(record.sequence);
                break;
            }

            let (hash, _) = record.digest()?;
            replay.state = Some(record.new_state);
            replay.head = Some(hash);
            replay.records += 1;
        }
        Ok(replay)
    }
}

pub struct LedgerIter {
    inner: sled::Iter,
    order: Order,
}

impl Iterator for LedgerIter {
    type Item = Result<TransitionRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.order {
            Order::Ascending => self.inner.next(),
            Order::Descending => self.inner.next_back(),
        }?;

        Some(entry.map_err(StoreError::from).and_then(|(_, value)| types::decode(&value)))
    }
}
