use super::expr::{Expr, Stmt};

/// A parsed rule: a condition guarding an ordered body, scheduled by
/// salience.
///
/// Entities are immutable once parsed; replacing a rule in a
/// [`KnowledgeBase`](super::KnowledgeBase) substitutes a new entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEntity {
    /// Unique name within a knowledge base.
    pub name: String,
    /// Free-text description from the source; may be empty.
    pub description: String,
    /// Priority: higher salience runs earlier under ordered models.
    pub salience: i64,
    /// Condition; `true` when the source omitted a `when` clause.
    pub when: Expr,
    /// Body statements, executed in order when the condition holds.
    pub then: Vec<Stmt>,
}
