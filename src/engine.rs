//! The transition engine: sole writer of asset state.
//!
//! Every write follows the same shape: read a snapshot, validate it with the
//! pure checks below, then commit inside one sled transaction over the
//! `assets` and `transition_history` trees. The transaction re-reads the asset
//! and aborts if its version moved since the snapshot, so two writers racing
//! from the same state cannot both land.
use super::asset::{AssetRecord, AssetStore};
use super::catalog::{self, Category, State, StateCatalog};
use super::config::LifecycleConfig;
use super::error::{StoreError, TransitionError};
use super::ledger::{HistoryLedger, RecordDraft, TransitionRecord};
use super::matrix::CategoryStateMatrix;
use super::rules::TransitionRuleSet;
use super::types::{self, CategoryId, StateId};
use super::utils;
use sled::transaction::{ConflictableTransactionError, TransactionError, abort};
use sled::{Db, Transactional};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ASSET_HRP: &str = "asset_";
const BOOTSTRAP_REASON: &str = "initial state";

/// Returned by every committed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub asset: AssetRecord,
    pub record: TransitionRecord,
}

/// Live asset compared against its replayed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub asset_id: String,
    pub live_state: Option<StateId>,
    pub replayed_state: Option<StateId>,
    pub records: u64,
    pub chain_intact: bool,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.chain_intact && self.live_state == self.replayed_state
    }
}

pub struct TransitionEngine {
    instance: Arc<Db>,
    catalog: StateCatalog,
    matrix: Arc<CategoryStateMatrix>,
    rules: Arc<TransitionRuleSet>,
    assets: AssetStore,
    ledger: HistoryLedger,
}

impl TransitionEngine {
    pub fn new(instance: Arc<Db>) -> Result<Self, TransitionError> {
        Self::with_rules(instance, TransitionRuleSet::standard())
    }

    /// Build an engine over a custom rule set. The set is validated first, so
    /// a state without edges has to be declared terminal.
    pub fn with_rules(instance: Arc<Db>, rules: Arc<TransitionRuleSet>) -> Result<Self, TransitionError> {
        rules.validate()?;
        let matrix = Arc::new(CategoryStateMatrix::new(&instance)?);
        Ok(Self {
            catalog: StateCatalog::new(instance.clone())?,
            assets: AssetStore::new(&instance)?,
            ledger: HistoryLedger::new(&instance)?,
            matrix,
            rules,
            instance,
        })
    }

    /// Open the database described by `config`, seeding the standard catalog if asked to.
    pub fn open(config: &LifecycleConfig) -> Result<Self, TransitionError> {
        let engine = Self::new(Arc::new(config.open_db()?))?;
        if config.seed_standard_catalog {
            engine.seed_standard()?;
        }
        Ok(engine)
    }

    pub fn seed_standard(&self) -> Result<(), TransitionError> {
        catalog::seed_standard(&self.catalog, &self.matrix)?;
        Ok(())
    }

    pub fn catalog(&self) -> &StateCatalog {
        &self.catalog
    }

    pub fn matrix(&self) -> &CategoryStateMatrix {
        &self.matrix
    }

    pub fn rules(&self) -> &TransitionRuleSet {
        &self.rules
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.instance.flush()?)
    }

    pub fn asset(&self, asset_id: &str) -> Result<AssetRecord, TransitionError> {
        self.assets
            .get(asset_id)?
            .ok_or_else(|| TransitionError::NotFound {
                kind: "asset",
                id: asset_id.to_string(),
            })
    }

    pub fn assets(&self) -> Result<Vec<AssetRecord>, StoreError> {
        self.assets.all()
    }

    pub fn list_states_for_category(&self, category: CategoryId) -> Result<Vec<State>, StoreError> {
        self.matrix.list_states_for_category(&self.catalog, category)
    }

    pub fn is_state_valid_for_category(
        &self,
        category: CategoryId,
        state: StateId,
    ) -> Result<bool, StoreError> {
        self.matrix.is_state_valid_for_category(category, state)
    }

    /// Create an asset and commit its bootstrap record in one step.
    ///
    /// Without `initial_state` the category default is used. The bootstrap
    /// target must be legal for the category but is not checked against the
    /// rule set.
    pub fn create_asset(
        &self,
        name: &str,
        category: CategoryId,
        initial_state: Option<StateId>,
        actor_id: &str,
    ) -> Result<TransitionOutcome, TransitionError> {
        let category = self.require_category(category)?;
        let target = match initial_state.or(category.default_state) {
            Some(id) => self.require_target(id)?,
            None => return Err(TransitionError::MissingDefaultState(category.name)),
        };

        let id = utils::new_uuid_to_bech32(ASSET_HRP).map_err(StoreError::from)?;
        let asset = AssetRecord::draft(id, name.to_string(), category.id);
        self.check(&asset, &target)?;

        let outcome = self.commit(&asset, &target, actor_id, BOOTSTRAP_REASON, None)?;
        info!(
            asset = %outcome.asset.id,
            category = %category.name,
            state = %target.name,
            actor = actor_id,
            "asset created"
        );
        Ok(outcome)
    }

    /// Validate and apply one transition.
    pub fn transition(
        &self,
        asset_id: &str,
        target_state: StateId,
        actor_id: &str,
        reason: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, TransitionError> {
        let asset = self.asset(asset_id)?;
        let target = self.require_target(target_state)?;

        if let Err(err) = self.check(&asset, &target) {
            debug!(asset = asset_id, target = %target.name, %err, "transition rejected");
            return Err(err);
        }

        let outcome = self.commit(&asset, &target, actor_id, reason, notes)?;
        info!(
            asset = asset_id,
            to = %target.name,
            sequence = outcome.record.sequence,
            actor = actor_id,
            "transition committed"
        );
        Ok(outcome)
    }

    /// Same validation as [`transition`](Self::transition), returning the
    /// rejection instead of applying anything.
    pub fn check_transition(&self, asset_id: &str, target_state: StateId) -> Result<(), TransitionError> {
        let asset = self.asset(asset_id)?;
        let target = self.require_target(target_state)?;
        self.check(&asset, &target)
    }

    /// Boolean gate for UI. Unknown asset or target ids are still errors.
    pub fn dry_run_validate(&self, asset_id: &str, target_state: StateId) -> Result<bool, TransitionError> {
        match self.check_transition(asset_id, target_state) {
            Ok(()) => Ok(true),
            Err(err) if is_rejection(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// States a picker may offer: category-legal and one edge away. Empty once terminal.
    pub fn compute_reachable_states(&self, asset_id: &str) -> Result<Vec<State>, TransitionError> {
        let asset = self.asset(asset_id)?;
        Ok(self.reachable_from(&asset)?)
    }

    pub fn rename_asset(&self, asset_id: &str, name: &str) -> Result<AssetRecord, TransitionError> {
        let asset = self.asset(asset_id)?;
        let mut next = asset.touched();
        next.name = name.to_string();

        self.replace(&asset, &next)?;
        info!(asset = asset_id, name, "asset renamed");
        Ok(next)
    }

    /// Move an asset to another category. The current state has to be legal
    /// there too; otherwise the change is refused and the asset left alone.
    pub fn change_category(
        &self,
        asset_id: &str,
        category: CategoryId,
    ) -> Result<AssetRecord, TransitionError> {
        let asset = self.asset(asset_id)?;
        let category = self.require_category(category)?;

        if let Some(current) = asset.current_state
            && !self.matrix.is_state_valid_for_category(category.id, current)?
        {
            let state = self.state_of(current)?;
            return Err(self.category_mismatch(&category, &state)?);
        }

        let mut next = asset.touched();
        next.category = category.id;
        self.replace(&asset, &next)?;
        info!(asset = asset_id, category = %category.name, "asset category changed");
        Ok(next)
    }

    /// Remove a frozen asset. Its ledger records stay.
    pub fn delete_asset(&self, asset_id: &str) -> Result<AssetRecord, TransitionError> {
        let asset = self.asset(asset_id)?;
        let state = match asset.current_state {
            Some(id) => self.state_of(id)?,
            None => {
                return Err(TransitionError::NotTerminal {
                    asset_id: asset.id,
                    state: "<none>".into(),
                });
            }
        };
        if !self.rules.is_terminal(&state.name) {
            return Err(TransitionError::NotTerminal {
                asset_id: asset.id,
                state: state.name,
            });
        }

        self.remove(&asset)?;
        info!(asset = asset_id, state = %state.name, "asset deleted");
        Ok(asset)
    }

    /// Replay the ledger and compare it with the live record.
    pub fn audit_asset(&self, asset_id: &str) -> Result<AuditReport, TransitionError> {
        let asset = self.asset(asset_id)?;
        let replay = self.ledger.replay(asset_id)?;

        let report = AuditReport {
            asset_id: asset.id.clone(),
            live_state: asset.current_state,
            replayed_state: replay.state,
            records: replay.records,
            chain_intact: replay.broken_at.is_none()
                && replay.records == asset.transitions
                && replay.head == asset.head,
        };
        if !report.is_consistent() {
            warn!(asset = asset_id, ?report, "ledger does not match asset");
        }
        Ok(report)
    }

    // Validation, first failure wins:
    // category legality, bootstrap bypass, terminal lock, rule edge.
    fn check(&self, asset: &AssetRecord, target: &State) -> Result<(), TransitionError> {
        if !self.matrix.is_state_valid_for_category(asset.category, target.id)? {
            let category = self.require_category(asset.category)?;
            return Err(self.category_mismatch(&category, target)?);
        }

        let Some(current) = asset.current_state else {
            return Ok(());
        };
        let current = self.state_of(current)?;

        if self.rules.is_terminal(&current.name) {
            return Err(TransitionError::TerminalState {
                asset_id: asset.id.clone(),
                state: current.name,
            });
        }

        if !self.rules.is_edge_allowed(&current.name, &target.name) {
            let allowed = self
                .reachable_from(asset)?
                .into_iter()
                .map(|s| s.name)
                .collect();
            return Err(TransitionError::InvalidTransition {
                from: current.name,
                to: target.name.clone(),
                allowed,
            });
        }

        Ok(())
    }

    fn reachable_from(&self, asset: &AssetRecord) -> Result<Vec<State>, StoreError> {
        let legal = self.matrix.list_states_for_category(&self.catalog, asset.category)?;
        let Some(current) = asset.current_state else {
            return Ok(legal);
        };
        let current = self
            .catalog
            .state(current)?
            .ok_or_else(|| StoreError::Corrupt(format!("asset '{}' points at missing {current}", asset.id)))?;

        let next = self.rules.allowed_next_states(&current.name);
        Ok(legal
            .into_iter()
            .filter(|state| next.contains(state.name.as_str()))
            .collect())
    }

    fn commit(
        &self,
        asset: &AssetRecord,
        target: &State,
        actor_id: &str,
        reason: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, TransitionError> {
        let draft = RecordDraft {
            asset_id: asset.id.clone(),
            previous_state: asset.current_state,
            new_state: target.id,
            actor_id: actor_id.to_string(),
            reason: reason.to_string(),
            notes: notes.map(str::to_string),
        };
        let record = self
            .ledger
            .seal(draft, asset.transitions + 1, asset.head.clone())?;
        let (hash, record_cbor) = record.digest()?;

        let mut next = asset.touched();
        next.current_state = Some(target.id);
        next.transitions = record.sequence;
        next.head = Some(hash);
        next.updated_at = record.timestamp.clone();
        let asset_cbor = types::encode(&next)?;

        let key = asset.id.as_str();
        // a fresh asset has never been stored, so it expects no row at all
        let expected = (!asset.is_unplaced()).then_some(asset.version);

        (self.assets.tree(), self.ledger.tree())
            .transaction(|(assets, history)| {
                if stored_version(assets.get(key.as_bytes())?, key)? != expected {
                    return abort(TransitionError::ConcurrentModification(key.to_string()));
                }
                self.ledger.append(history, &record, &record_cbor)?;
                assets.insert(key.as_bytes(), asset_cbor.as_slice())?;
                Ok(())
            })
            .map_err(|err| self.unwrap_abort(err))?;

        Ok(TransitionOutcome {
            asset: next,
            record,
        })
    }

    // metadata-only write guarded by the same version check
    fn replace(&self, current: &AssetRecord, next: &AssetRecord) -> Result<(), TransitionError> {
        let key = current.id.as_str();
        let cbor = types::encode(next)?;

        self.assets
            .tree()
            .transaction(|assets| {
                if stored_version(assets.get(key.as_bytes())?, key)? != Some(current.version) {
                    return abort(TransitionError::ConcurrentModification(key.to_string()));
                }
                assets.insert(key.as_bytes(), cbor.as_slice())?;
                Ok(())
            })
            .map_err(|err| self.unwrap_abort(err))
    }

    // removal guarded by the same version check
    fn remove(&self, asset: &AssetRecord) -> Result<(), TransitionError> {
        let key = asset.id.as_str();

        self.assets
            .tree()
            .transaction(|assets| {
                if stored_version(assets.get(key.as_bytes())?, key)? != Some(asset.version) {
                    return abort(TransitionError::ConcurrentModification(key.to_string()));
                }
                assets.remove(key.as_bytes())?;
                Ok(())
            })
            .map_err(|err| self.unwrap_abort(err))
    }

    fn unwrap_abort(&self, err: TransactionError<TransitionError>) -> TransitionError {
        match err {
            TransactionError::Abort(err) => {
                if let TransitionError::ConcurrentModification(asset) = &err {
                    warn!(asset = %asset, "concurrent modification detected");
                }
                err
            }
            TransactionError::Storage(err) => err.into(),
        }
    }

    fn require_target(&self, id: StateId) -> Result<State, TransitionError> {
        self.catalog
            .state(id)?
            .ok_or(TransitionError::InvalidTarget(id))
    }

    fn require_category(&self, id: CategoryId) -> Result<Category, TransitionError> {
        self.catalog
            .category(id)?
            .ok_or_else(|| TransitionError::NotFound {
                kind: "category",
                id: id.to_string(),
            })
    }

    // a stored asset always points at a catalog state
    fn state_of(&self, id: StateId) -> Result<State, TransitionError> {
        self.catalog.state(id)?.ok_or_else(|| {
            TransitionError::Storage(StoreError::Corrupt(format!("current state {id} missing from catalog")))
        })
    }

    fn category_mismatch(&self, category: &Category, target: &State) -> Result<TransitionError, StoreError> {
        let legal = self
            .matrix
            .list_states_for_category(&self.catalog, category.id)?
            .into_iter()
            .map(|s| s.name)
            .collect();
        Ok(TransitionError::CategoryMismatch {
            category: category.name.clone(),
            target: target.name.clone(),
            legal,
        })
    }
}

/// Validation outcomes, as opposed to lookup or storage failures.
fn is_rejection(err: &TransitionError) -> bool {
    matches!(
        err,
        TransitionError::CategoryMismatch { .. }
            | TransitionError::TerminalState { .. }
            | TransitionError::InvalidTransition { .. }
    )
}

fn stored_version(
    raw: Option<sled::IVec>,
    asset_id: &str,
) -> Result<Option<u64>, ConflictableTransactionError<TransitionError>> {
    match raw {
        None => Ok(None),
        Some(bytes) => match types::decode::<AssetRecord>(&bytes) {
            Ok(stored) => Ok(Some(stored.version)),
            Err(err) => {
                debug!(asset = asset_id, %err, "undecodable asset row");
                Err(ConflictableTransactionError::Abort(err.into()))
            }
        },
    }
}
