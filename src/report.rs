//! Read-side projections over the ledger, computed on demand from a full scan.
use super::error::StoreError;
use super::ledger::{HistoryLedger, TransitionRecord};
use super::types::StateId;
use std::collections::{BTreeMap, HashMap};

/// How often one `(from, to)` edge was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCount {
    pub from: StateId,
    pub to: StateId,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionStats {
    pub total: u64,
    pub by_asset: BTreeMap<String, u64>,
    pub by_actor: BTreeMap<String, u64>,
    pub by_target_state: BTreeMap<StateId, u64>,
    pub by_month: BTreeMap<String, u64>, // keyed `YYYY-MM`
    pairs: HashMap<(StateId, StateId), u64>,
}

impl TransitionStats {
    pub fn collect(ledger: &HistoryLedger) -> Result<Self, StoreError> {
        let mut stats = Self::default();
        for record in ledger.iter() {
            stats.add(&record?);
        }
        Ok(stats)
    }

    fn add(&mut self, record: &TransitionRecord) {
        self.total += 1;
        *self.by_asset.entry(record.asset_id.clone()).or_default() += 1;
        *self.by_actor.entry(record.actor_id.clone()).or_default() += 1;
        *self.by_target_state.entry(record.new_state).or_default() += 1;
        *self.by_month.entry(record.timestamp.month_key()).or_default() += 1;

        // bootstrap records are assignments, not edges
        if let Some(from) = record.previous_state {
            *self.pairs.entry((from, record.new_state)).or_default() += 1;
        }
    }

    /// Highest counts first; ties broken by `(from, to)` so the order is stable.
    pub fn most_common_pairs(&self, limit: usize) -> Vec<PairCount> {
        let mut pairs: Vec<PairCount> = self
            .pairs
            .iter()
            .map(|(&(from, to), &count)| PairCount { from, to, count })
            .collect();
        pairs.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.from.cmp(&b.from))
                .then(a.to.cmp(&b.to))
        });
        pairs.truncate(limit);
        pairs
    }
}

pub fn count_by_asset(ledger: &HistoryLedger) -> Result<BTreeMap<String, u64>, StoreError> {
    Ok(TransitionStats::collect(ledger)?.by_asset)
}

pub fn count_by_actor(ledger: &HistoryLedger) -> Result<BTreeMap<String, u64>, StoreError> {
    Ok(TransitionStats::collect(ledger)?.by_actor)
}

pub fn count_by_target_state(ledger: &HistoryLedger) -> Result<BTreeMap<StateId, u64>, StoreError> {
    Ok(TransitionStats::collect(ledger)?.by_target_state)
}

pub fn most_common_pairs(ledger: &HistoryLedger, limit: usize) -> Result<Vec<PairCount>, StoreError> {
    Ok(TransitionStats::collect(ledger)?.most_common_pairs(limit))
}

pub fn monthly_histogram(ledger: &HistoryLedger) -> Result<BTreeMap<String, u64>, StoreError> {
    Ok(TransitionStats::collect(ledger)?.by_month)
}
