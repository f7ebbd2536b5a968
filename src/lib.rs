pub mod asset;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod matrix;
pub mod report;
pub mod rules;
pub mod types;
pub mod utils;

pub use asset::AssetRecord;
pub use catalog::{Category, State, StateCatalog};
pub use config::LifecycleConfig;
pub use engine::{AuditReport, TransitionEngine, TransitionOutcome};
pub use error::{CatalogError, RuleSetError, StoreError, TransitionError};
pub use ledger::{HistoryLedger, Order, TransitionRecord};
pub use matrix::CategoryStateMatrix;
pub use rules::{LifecycleFamily, TransitionRuleSet};
pub use types::{CategoryId, StateId, TimeStamp};
