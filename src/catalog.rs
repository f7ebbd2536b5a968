//! Reference data: named states and asset categories
use super::error::{CatalogError, StoreError};
use super::matrix::CategoryStateMatrix;
use super::rules::{self, LifecycleFamily};
use super::types::{self, CategoryId, StateId};
use sled::transaction::{TransactionError, abort};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct State {
    #[n(0)]
    pub id: StateId,
    #[n(1)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Category {
    #[n(0)]
    pub id: CategoryId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub default_state: Option<StateId>, // bootstrap target when none is given
}

pub struct StateCatalog {
    instance: Arc<Db>,
    states: Tree,
    state_names: Tree,
    categories: Tree,
    category_names: Tree,
}

impl StateCatalog {
    pub fn new(instance: Arc<Db>) -> Result<Self, StoreError> {
        Ok(Self {
            states: instance.open_tree("states")?,
            state_names: instance.open_tree("state_names")?,
            categories: instance.open_tree("categories")?,
            category_names: instance.open_tree("category_names")?,
            instance,
        })
    }

    pub fn add_state(&self, name: &str) -> Result<State, CatalogError> {
        let state = State {
            id: StateId(self.instance.generate_id()?),
            name: name.to_string(),
        };
        let cbor = types::encode(&state)?;

        (&self.states, &self.state_names)
            .transaction(|(states, names)| {
                if names.get(name.as_bytes())?.is_some() {
                    return abort(CatalogError::DuplicateState(name.to_string()));
                }
                states.insert(&state.id.to_be_bytes()[..], cbor.as_slice())?;
                names.insert(name.as_bytes(), &state.id.to_be_bytes()[..])?;
                Ok(())
            })
            .map_err(unwrap_abort)?;

        Ok(state)
    }

    pub fn state(&self, id: StateId) -> Result<Option<State>, StoreError> {
        self.states
            .get(id.to_be_bytes())?
            .map(|bytes| types::decode(&bytes))
            .transpose()
    }

    pub fn state_by_name(&self, name: &str) -> Result<Option<State>, StoreError> {
        match self.state_names.get(name.as_bytes())? {
            Some(raw) => self.state(StateId(id_from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    /// All states ordered by id.
    pub fn states(&self) -> Result<Vec<State>, StoreError> {
        self.states
            .iter()
            .values()
            .map(|bytes| -> Result<_, StoreError> { types::decode(&bytes?) })
            .collect()
    }

    /// A new category has no links yet, so a default given here is only
    /// checked for existence. Seeding and [`set_default_state`](Self::set_default_state)
    /// also require the default to be linked.
    pub fn add_category(
        &self,
        name: &str,
        default_state: Option<StateId>,
    ) -> Result<Category, CatalogError> {
        if let Some(state) = default_state {
            self.require_state(state)?;
        }
        let category = Category {
            id: CategoryId(self.instance.generate_id()?),
            name: name.to_string(),
            default_state,
        };
        let cbor = types::encode(&category)?;

        (&self.categories, &self.category_names)
            .transaction(|(categories, names)| {
                if names.get(name.as_bytes())?.is_some() {
                    return abort(CatalogError::DuplicateCategory(name.to_string()));
                }
                categories.insert(&category.id.to_be_bytes()[..], cbor.as_slice())?;
                names.insert(name.as_bytes(), &category.id.to_be_bytes()[..])?;
                Ok(())
            })
            .map_err(unwrap_abort)?;

        Ok(category)
    }

    pub fn set_default_state(
        &self,
        matrix: &CategoryStateMatrix,
        category: CategoryId,
        default_state: Option<StateId>,
    ) -> Result<Category, CatalogError> {
        let mut record = self.require_category(category)?;
        if let Some(state) = default_state {
            self.require_state(state)?;
            if !matrix.is_state_valid_for_category(category, state)? {
                return Err(CatalogError::UnlinkedDefault { category, state });
            }
        }
        record.default_state = default_state;
        self.categories
            .insert(&category.to_be_bytes()[..], types::encode(&record)?)?;

        Ok(record)
    }

    pub fn category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        self.categories
            .get(id.to_be_bytes())?
            .map(|bytes| types::decode(&bytes))
            .transpose()
    }

    pub fn category_by_name(&self, name: &str) -> Result<Option<Category>, StoreError> {
        match self.category_names.get(name.as_bytes())? {
            Some(raw) => self.category(CategoryId(id_from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn categories(&self) -> Result<Vec<Category>, StoreError> {
        self.categories
            .iter()
            .values()
            .map(|bytes| -> Result<_, StoreError> { types::decode(&bytes?) })
            .collect()
    }

    pub(crate) fn require_state(&self, id: StateId) -> Result<State, CatalogError> {
        self.state(id)?.ok_or(CatalogError::UnknownState(id))
    }

    pub(crate) fn require_category(&self, id: CategoryId) -> Result<Category, CatalogError> {
        self.category(id)?.ok_or(CatalogError::UnknownCategory(id))
    }

    fn state_or_insert(&self, name: &str) -> Result<State, CatalogError> {
        match self.state_by_name(name)? {
            Some(state) => Ok(state),
            None => self.add_state(name),
        }
    }
}

/// Names of the standard categories and the family each one follows.
pub const STANDARD_CATEGORIES: [(&str, LifecycleFamily, &str); 4] = [
    ("Hardware", LifecycleFamily::Hardware, rules::PROJECTED),
    ("Software", LifecycleFamily::Service, rules::ACTIVE),
    ("Service", LifecycleFamily::Service, rules::ACTIVE),
    ("Contract", LifecycleFamily::Contract, rules::CURRENT),
];

/// Installs the standard states and categories. Running it again is a no-op.
pub fn seed_standard(
    catalog: &StateCatalog,
    matrix: &CategoryStateMatrix,
) -> Result<(), CatalogError> {
    for (name, family, default_name) in STANDARD_CATEGORIES {
        let mut legal = Vec::new();
        for state_name in family.state_names() {
            legal.push(catalog.state_or_insert(state_name)?);
        }
        let default_state = legal
            .iter()
            .find(|s| s.name == default_name)
            .map(|s| s.id);

        let category = match catalog.category_by_name(name)? {
            Some(existing) => existing,
            None => catalog.add_category(name, None)?,
        };
        for state in &legal {
            matrix.link(category.id, state.id)?;
        }
        // links first, so the default is checked against them
        if category.default_state.is_none() {
            catalog.set_default_state(matrix, category.id, default_state)?;
        }
    }
    info!(
        states = catalog.states.len(),
        categories = catalog.categories.len(),
        "standard catalog seeded"
    );

    Ok(())
}

fn unwrap_abort(err: TransactionError<CatalogError>) -> CatalogError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => err.into(),
    }
}

fn id_from_bytes(raw: &[u8]) -> Result<u64, StoreError> {
    super::utils::u64_from_be(raw)
        .ok_or_else(|| StoreError::Corrupt(format!("malformed id of {} bytes", raw.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StateCatalog {
        let db = sled::Config::new().temporary(true).open().unwrap();
        StateCatalog::new(Arc::new(db)).unwrap()
    }

    fn with_matrix() -> (StateCatalog, CategoryStateMatrix) {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let matrix = CategoryStateMatrix::new(&db).unwrap();
        (StateCatalog::new(db).unwrap(), matrix)
    }

    #[test]
    fn state_names_are_unique() {
        let catalog = catalog();
        let first = catalog.add_state("Active").unwrap();

        assert!(matches!(
            catalog.add_state("Active"),
            Err(CatalogError::DuplicateState(_))
        ));
        assert_eq!(catalog.state_by_name("Active").unwrap(), Some(first));
    }

    #[test]
    fn states_list_in_id_order() {
        let catalog = catalog();
        let a = catalog.add_state("Projected").unwrap();
        let b = catalog.add_state("Active").unwrap();

        let listed = catalog.states().unwrap();
        assert_eq!(listed, vec![a, b]);
    }

    #[test]
    fn category_default_must_exist() {
        let catalog = catalog();

        assert!(matches!(
            catalog.add_category("Hardware", Some(StateId(999))),
            Err(CatalogError::UnknownState(StateId(999)))
        ));
    }

    #[test]
    fn default_state_can_be_changed() {
        let (catalog, matrix) = with_matrix();
        let active = catalog.add_state("Active").unwrap();
        let category = catalog.add_category("Software", None).unwrap();
        matrix.link(category.id, active.id).unwrap();

        let updated = catalog
            .set_default_state(&matrix, category.id, Some(active.id))
            .unwrap();
        assert_eq!(updated.default_state, Some(active.id));
        assert_eq!(
            catalog.category_by_name("Software").unwrap().unwrap().default_state,
            Some(active.id)
        );
    }

    #[test]
    fn default_state_must_be_linked() {
        let (catalog, matrix) = with_matrix();
        let active = catalog.add_state("Active").unwrap();
        let current = catalog.add_state("Current").unwrap();
        let software = catalog.add_category("Software", None).unwrap();
        matrix.link(software.id, active.id).unwrap();

        assert!(matches!(
            catalog.set_default_state(&matrix, software.id, Some(current.id)),
            Err(CatalogError::UnlinkedDefault { category, state })
                if category == software.id && state == current.id
        ));
        assert_eq!(catalog.category(software.id).unwrap().unwrap().default_state, None);

        // clearing needs no link
        assert!(catalog.set_default_state(&matrix, software.id, None).is_ok());
    }

    #[test]
    fn seeded_defaults_are_linked() {
        let (catalog, matrix) = with_matrix();
        seed_standard(&catalog, &matrix).unwrap();
        seed_standard(&catalog, &matrix).unwrap();

        for category in catalog.categories().unwrap() {
            let default = category.default_state.unwrap();
            assert!(
                matrix.is_state_valid_for_category(category.id, default).unwrap(),
                "{}",
                category.name
            );
        }
    }
}
