use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::rule::RuleEntity;

/// In-memory collection of parsed rules with a name index and a
/// descending-salience order.
///
/// Three structures are kept mutually consistent: the `name -> entity` map,
/// the sorted vector, and the `name -> position` index. A fresh build sorts
/// stably, so equal-salience rules keep source order; incremental
/// [`insert_or_replace`](Self::insert_or_replace) places a *new*
/// equal-salience rule ahead of its siblings and keeps the previous position
/// when replacing at unchanged salience.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entities: HashMap<String, Arc<RuleEntity>>,
    sorted: Vec<Arc<RuleEntity>>,
    order: HashMap<String, usize>,
}

impl KnowledgeBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from freshly parsed rules, stably sorted by descending
    /// salience. Callers guarantee unique names.
    #[must_use]
    pub fn from_rules(rules: Vec<RuleEntity>) -> Self {
        let mut sorted: Vec<Arc<RuleEntity>> = rules.into_iter().map(Arc::new).collect();
        sorted.sort_by_key(|r| std::cmp::Reverse(r.salience));
        let entities = sorted
            .iter()
            .map(|r| (r.name.clone(), Arc::clone(r)))
            .collect();
        let mut kb = KnowledgeBase {
            entities,
            sorted,
            order: HashMap::new(),
        };
        kb.rebuild_order();
        kb
    }

    /// Insert a rule, replacing any existing rule of the same name.
    ///
    /// Replacement at unchanged salience keeps the rule's position. Any
    /// other insert binary-searches the descending-salience order and lands
    /// just before the equal-salience group, or at the strictly-lower
    /// boundary when no equal exists.
    pub fn insert_or_replace(&mut self, rule: RuleEntity) {
        let rule = Arc::new(rule);
        if let Some(&idx) = self.order.get(&rule.name) {
            if self.sorted[idx].salience == rule.salience {
                self.entities.insert(rule.name.clone(), Arc::clone(&rule));
                self.sorted[idx] = rule;
                return;
            }
            self.sorted.remove(idx);
        }
        let pos = self
            .sorted
            .partition_point(|r| r.salience > rule.salience);
        self.entities.insert(rule.name.clone(), Arc::clone(&rule));
        self.sorted.insert(pos, rule);
        self.rebuild_order();
    }

    /// Remove a rule by name. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(idx) = self.order.remove(name) else {
            return false;
        };
        self.entities.remove(name);
        self.sorted.remove(idx);
        self.rebuild_order();
        true
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.sorted.clear();
        self.order.clear();
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Arc<RuleEntity>> {
        self.entities.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Rules in execution order: descending salience.
    pub fn ordered(&self) -> impl Iterator<Item = &Arc<RuleEntity>> {
        self.sorted.iter()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.sorted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Position of a rule in the sorted order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.get(name).copied()
    }

    fn rebuild_order(&mut self) {
        self.order = self
            .sorted
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
    }
}

impl fmt::Display for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KnowledgeBase({} rules)", self.sorted.len())
    }
}
