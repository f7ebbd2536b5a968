//! Static lifecycle graph, declared per family as adjacency tables.
//!
//! The graph is keyed on state *names* and knows nothing about categories;
//! the category matrix narrows it per asset. Terminality is declared, never
//! inferred from a missing row, and [`TransitionRuleSet::validate`] checks the
//! declaration against the edges.
use super::error::RuleSetError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

pub const PROJECTED: &str = "Projected";
pub const ACTIVE: &str = "Active";
pub const MAINTENANCE: &str = "Maintenance";
pub const OUT_OF_SERVICE: &str = "OutOfService";
pub const PENDING_DECOMMISSION: &str = "PendingDecommission";
pub const DECOMMISSIONED: &str = "Decommissioned";
pub const SUSPENDED: &str = "Suspended";
pub const RENEWAL: &str = "Renewal";
pub const EXPIRED: &str = "Expired";
pub const CANCELLED: &str = "Cancelled";
pub const CURRENT: &str = "Current";
pub const NOT_CURRENT: &str = "NotCurrent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleFamily {
    Hardware,
    Service,
    Contract,
}

/// One row of a family table.
#[derive(Debug, Clone, Copy)]
pub struct StateRule {
    pub name: &'static str,
    pub next: &'static [&'static str],
    pub terminal: bool,
}

impl StateRule {
    pub const fn open(name: &'static str, next: &'static [&'static str]) -> Self {
        Self {
            name,
            next,
            terminal: false,
        }
    }
    pub const fn terminal(name: &'static str) -> Self {
        Self {
            name,
            next: &[],
            terminal: true,
        }
    }
}

const HARDWARE: &[StateRule] = &[
    StateRule::open(PROJECTED, &[ACTIVE]),
    StateRule::open(ACTIVE, &[MAINTENANCE, OUT_OF_SERVICE, PENDING_DECOMMISSION]),
    StateRule::open(MAINTENANCE, &[ACTIVE, PENDING_DECOMMISSION]),
    StateRule::open(OUT_OF_SERVICE, &[ACTIVE, PENDING_DECOMMISSION]),
    StateRule::open(PENDING_DECOMMISSION, &[ACTIVE, DECOMMISSIONED]),
    StateRule::terminal(DECOMMISSIONED),
];

const SERVICE: &[StateRule] = &[
    StateRule::open(ACTIVE, &[SUSPENDED, RENEWAL, EXPIRED, CANCELLED]),
    StateRule::open(SUSPENDED, &[ACTIVE, CANCELLED]),
    StateRule::open(RENEWAL, &[ACTIVE, EXPIRED, CANCELLED]),
    StateRule::open(EXPIRED, &[RENEWAL, CANCELLED]),
    StateRule::terminal(CANCELLED),
];

const CONTRACT: &[StateRule] = &[
    StateRule::open(CURRENT, &[NOT_CURRENT, PENDING_DECOMMISSION]),
    StateRule::open(NOT_CURRENT, &[CURRENT, PENDING_DECOMMISSION]),
    StateRule::open(PENDING_DECOMMISSION, &[CURRENT, DECOMMISSIONED]),
    StateRule::terminal(DECOMMISSIONED),
];

impl LifecycleFamily {
    pub const ALL: [LifecycleFamily; 3] = [
        LifecycleFamily::Hardware,
        LifecycleFamily::Service,
        LifecycleFamily::Contract,
    ];

    pub fn rules(self) -> &'static [StateRule] {
        match self {
            LifecycleFamily::Hardware => HARDWARE,
            LifecycleFamily::Service => SERVICE,
            LifecycleFamily::Contract => CONTRACT,
        }
    }

    /// State names the family declares, in table order.
    pub fn state_names(self) -> impl Iterator<Item = &'static str> {
        self.rules().iter().map(|rule| rule.name)
    }
}

static STANDARD: LazyLock<Arc<TransitionRuleSet>> =
    LazyLock::new(|| Arc::new(TransitionRuleSet::from_rules(LifecycleFamily::ALL.map(|f| f.rules()))));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionRuleSet {
    edges: BTreeMap<String, BTreeSet<String>>,
    terminal: BTreeSet<String>,
    // names declared terminal somewhere and open somewhere else
    conflicts: BTreeSet<String>,
}

impl TransitionRuleSet {
    /// The process-wide rule set built from every [`LifecycleFamily`].
    pub fn standard() -> Arc<TransitionRuleSet> {
        STANDARD.clone()
    }

    /// Union of the given tables. Rows for the same name merge their edges.
    pub fn from_rules<'a>(tables: impl IntoIterator<Item = &'a [StateRule]>) -> Self {
        let mut set = Self::default();
        let mut open = BTreeSet::new();

        for rule in tables.into_iter().flatten() {
            let edges = set.edges.entry(rule.name.to_string()).or_default();
            edges.extend(rule.next.iter().map(|n| n.to_string()));

            if rule.terminal {
                set.terminal.insert(rule.name.to_string());
            } else {
                open.insert(rule.name.to_string());
            }
        }
        set.conflicts = set.terminal.intersection(&open).cloned().collect();
        set
    }

    pub fn try_from_families(families: &[LifecycleFamily]) -> Result<Self, RuleSetError> {
        let set = Self::from_rules(families.iter().map(|f| f.rules()));
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), RuleSetError> {
        if let Some(name) = self.conflicts.iter().next() {
            return Err(RuleSetError::ConflictingTerminal(name.clone()));
        }
        for (from, next) in &self.edges {
            if let Some(to) = next.iter().find(|to| !self.edges.contains_key(*to)) {
                return Err(RuleSetError::UndeclaredTarget {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
            match (self.terminal.contains(from), next.is_empty()) {
                (true, false) => return Err(RuleSetError::TerminalWithEdges(from.clone())),
                (false, true) => return Err(RuleSetError::DeadEnd(from.clone())),
                _ => {}
            }
        }
        Ok(())
    }

    /// Names reachable in one step. Empty for terminal and unknown states.
    pub fn allowed_next_states(&self, state_name: &str) -> BTreeSet<&str> {
        self.edges
            .get(state_name)
            .map(|next| next.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_edge_allowed(&self, from_name: &str, to_name: &str) -> bool {
        self.edges
            .get(from_name)
            .is_some_and(|next| next.contains(to_name))
    }

    pub fn is_terminal(&self, state_name: &str) -> bool {
        self.terminal.contains(state_name)
    }

    pub fn contains(&self, state_name: &str) -> bool {
        self.edges.contains_key(state_name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rule_set_is_well_formed() {
        assert_eq!(TransitionRuleSet::standard().validate(), Ok(()));
    }

    #[test]
    fn hardware_paths() {
        let rules = TransitionRuleSet::standard();

        assert!(rules.is_edge_allowed(PROJECTED, ACTIVE));
        assert!(!rules.is_edge_allowed(PROJECTED, DECOMMISSIONED));
        assert!(rules.is_edge_allowed(ACTIVE, MAINTENANCE));
        assert!(rules.is_edge_allowed(MAINTENANCE, ACTIVE));
        assert!(!rules.is_edge_allowed(MAINTENANCE, OUT_OF_SERVICE));
        assert!(rules.is_edge_allowed(PENDING_DECOMMISSION, DECOMMISSIONED));
    }

    #[test]
    fn families_merge_on_shared_names() {
        let rules = TransitionRuleSet::standard();
        let from_active = rules.allowed_next_states(ACTIVE);

        // hardware and service rows for Active are unioned
        assert!(from_active.contains(MAINTENANCE));
        assert!(from_active.contains(SUSPENDED));
        assert!(rules.is_edge_allowed(PENDING_DECOMMISSION, CURRENT));
    }

    #[test]
    fn terminal_states_have_no_successors() {
        let rules = TransitionRuleSet::standard();

        for name in [DECOMMISSIONED, CANCELLED] {
            assert!(rules.is_terminal(name));
            assert!(rules.allowed_next_states(name).is_empty());
        }
        assert!(!rules.is_terminal(ACTIVE));
    }

    #[test]
    fn unknown_state_is_neither_terminal_nor_connected() {
        let rules = TransitionRuleSet::standard();

        assert!(!rules.contains("Lost"));
        assert!(!rules.is_terminal("Lost"));
        assert!(rules.allowed_next_states("Lost").is_empty());
    }

    #[test]
    fn single_family_subset() {
        let rules = TransitionRuleSet::try_from_families(&[LifecycleFamily::Service]).unwrap();

        assert!(rules.contains(SUSPENDED));
        assert!(!rules.contains(MAINTENANCE));
        assert!(!rules.is_edge_allowed(ACTIVE, MAINTENANCE));
    }

    #[test]
    fn hardware_alone_is_closed() {
        assert!(TransitionRuleSet::try_from_families(&[LifecycleFamily::Hardware]).is_ok());
    }

    #[test]
    fn rejects_edge_to_undeclared_state() {
        const BAD: &[StateRule] = &[StateRule::open("A", &["B"])];
        let rules = TransitionRuleSet::from_rules([BAD]);

        assert_eq!(
            rules.validate(),
            Err(RuleSetError::UndeclaredTarget {
                from: "A".into(),
                to: "B".into()
            })
        );
    }

    #[test]
    fn rejects_unmarked_dead_end() {
        const BAD: &[StateRule] = &[StateRule::open("A", &["B"]), StateRule::open("B", &[])];
        let rules = TransitionRuleSet::from_rules([BAD]);

        assert_eq!(rules.validate(), Err(RuleSetError::DeadEnd("B".into())));
    }

    #[test]
    fn rejects_terminal_conflicts_across_tables() {
        const LEFT: &[StateRule] = &[StateRule::open("A", &["B"]), StateRule::terminal("B")];
        const RIGHT: &[StateRule] = &[StateRule::open("B", &["A"])];
        let rules = TransitionRuleSet::from_rules([LEFT, RIGHT]);

        assert_eq!(
            rules.validate(),
            Err(RuleSetError::ConflictingTerminal("B".into()))
        );
    }
}
