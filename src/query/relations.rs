//! Relation arguments accepted by the `with_*` entry points.

use crate::aggregate::RelationQuery;
use std::fmt;

/// Callback narrowing a relation's aggregate subquery.
pub type Constraint<'a> = Box<dyn FnOnce(RelationQuery) -> RelationQuery + 'a>;

/// One relation expression and the constraints registered for it.
pub struct RelationEntry<'a> {
    pub(crate) expression: String,
    pub(crate) constraints: Vec<Constraint<'a>>,
}

impl RelationEntry<'_> {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Runs every registered constraint over `query`, in registration order.
    pub(crate) fn apply(self, query: RelationQuery) -> RelationQuery {
        self.constraints.into_iter().fold(query, |query, constraint| constraint(query))
    }
}

/// Ordered set of relation expressions, each with zero or more constraints.
///
/// Expressions are keyed by their full text, alias included, so
/// `"posts as total"` and `"posts as recent"` are independent entries that
/// each get their own column. Adding the same expression twice keeps its
/// first position and accumulates constraints.
///
/// # Example
///
/// ```ignore
/// let relations = RelationSet::new()
///     .with("posts:amount as total")
///     .constrain("posts:amount as recent", |q| q.where_("created_at > {}", &["2024-01-01"]));
///
/// let users = User::query().with_sum(relations)?;
/// ```
#[derive(Default)]
pub struct RelationSet<'a> {
    entries: Vec<RelationEntry<'a>>,
}

impl<'a> RelationSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an expression without constraints.
    pub fn with(mut self, expression: &str) -> Self {
        self.entry_mut(expression);
        self
    }

    /// Adds an expression whose subquery is narrowed by `constraint`.
    pub fn constrain<F>(mut self, expression: &str, constraint: F) -> Self
    where
        F: FnOnce(RelationQuery) -> RelationQuery + 'a,
    {
        self.entry_mut(expression).constraints.push(Box::new(constraint));
        self
    }

    fn entry_mut(&mut self, expression: &str) -> &mut RelationEntry<'a> {
        let index = match self.entries.iter().position(|e| e.expression == expression) {
            Some(index) => index,
            None => {
                self.entries.push(RelationEntry {
                    expression: expression.to_string(),
                    constraints: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.expression.as_str())
    }

    pub(crate) fn into_entries(self) -> Vec<RelationEntry<'a>> {
        self.entries
    }
}

impl fmt::Debug for RelationSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.expression, e.constraints.len())))
            .finish()
    }
}

/// Conversion into a [`RelationSet`].
///
/// Lets every `with_*` method take a single expression, a list of expressions
/// or a fully constrained set.
pub trait IntoRelations<'a> {
    fn into_relations(self) -> RelationSet<'a>;
}

impl<'a> IntoRelations<'a> for RelationSet<'a> {
    fn into_relations(self) -> RelationSet<'a> {
        self
    }
}

impl<'a> IntoRelations<'a> for &str {
    fn into_relations(self) -> RelationSet<'a> {
        RelationSet::new().with(self)
    }
}

impl<'a> IntoRelations<'a> for String {
    fn into_relations(self) -> RelationSet<'a> {
        RelationSet::new().with(&self)
    }
}

impl<'a> IntoRelations<'a> for &[&str] {
    fn into_relations(self) -> RelationSet<'a> {
        self.iter().fold(RelationSet::new(), |set, expression| set.with(expression))
    }
}

impl<'a, const N: usize> IntoRelations<'a> for [&str; N] {
    fn into_relations(self) -> RelationSet<'a> {
        self.iter().fold(RelationSet::new(), |set, expression| set.with(expression))
    }
}

impl<'a> IntoRelations<'a> for Vec<&str> {
    fn into_relations(self) -> RelationSet<'a> {
        self.as_slice().into_relations()
    }
}

impl<'a> IntoRelations<'a> for Vec<String> {
    fn into_relations(self) -> RelationSet<'a> {
        self.iter().fold(RelationSet::new(), |set, expression| set.with(expression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_preserve_order() {
        let set = ["posts", "comments as c", "likes:weight"].into_relations();
        assert_eq!(set.expressions().collect::<Vec<_>>(), vec!["posts", "comments as c", "likes:weight"]);

        let set = vec!["a".to_string(), "b".to_string()].into_relations();
        assert_eq!(set.len(), 2);

        let set = "posts".into_relations();
        assert_eq!(set.expressions().collect::<Vec<_>>(), vec!["posts"]);
    }

    #[test]
    fn test_empty_inputs() {
        let empty: [&str; 0] = [];
        assert!(empty.into_relations().is_empty());
        assert!(Vec::<String>::new().into_relations().is_empty());
        assert!(RelationSet::new().is_empty());
    }

    #[test]
    fn test_duplicates_collapse_and_accumulate_constraints() {
        let set = RelationSet::new()
            .with("posts")
            .constrain("posts as recent", |q| q)
            .constrain("posts", |q| q)
            .constrain("posts", |q| q);

        assert_eq!(set.expressions().collect::<Vec<_>>(), vec!["posts", "posts as recent"]);

        let entries = set.into_entries();
        assert_eq!(entries[0].constraints.len(), 2);
        assert_eq!(entries[1].constraints.len(), 1);
    }

    #[test]
    fn test_aliases_are_distinct_entries() {
        let set = RelationSet::new().with("posts as total").with("posts as recent");
        assert_eq!(set.len(), 2);
    }
}
