//! Parsing of relation expressions such as `"posts as recent:amount"`.

use crate::aggregate::AggregateFunction;
use crate::error::{Error, Result};
use crate::to_snake_case;

/// A parsed relation expression.
///
/// The accepted forms are `name`, `name:column`, `name as alias` and
/// `name:column as alias`. The alias only changes the output column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationExpression {
    pub relation_name: String,
    pub alias: Option<String>,
    pub column: Option<String>,
}

impl RelationExpression {
    /// Parses an expression.
    ///
    /// An alias is recognised only when the expression splits on single spaces
    /// into exactly three segments with a case-insensitive `as` in the middle.
    /// Anything else is taken verbatim as the relation name, which then fails
    /// relation lookup rather than parsing.
    ///
    /// The name may carry one `:column` suffix. A second `:` is rejected.
    pub fn parse(expression: &str) -> Result<Self> {
        let segments: Vec<&str> = expression.split(' ').collect();

        let (name, alias) = if segments.len() == 3 && segments[1].eq_ignore_ascii_case("as") {
            (segments[0], Some(segments[2]))
        } else {
            (expression, None)
        };

        let (relation_name, column) = match name.split_once(':') {
            Some((relation, column)) => (relation, Some(column)),
            None => (name, None),
        };

        let is_empty = |part: Option<&str>| part.map_or(false, str::is_empty);
        let extra_segment = column.map_or(false, |column| column.contains(':'));
        if relation_name.is_empty() || is_empty(alias) || is_empty(column) || extra_segment {
            return Err(Error::InvalidRelationExpression(expression.to_string()));
        }

        Ok(Self {
            relation_name: relation_name.to_string(),
            alias: alias.map(str::to_string),
            column: column.map(str::to_string),
        })
    }

    /// Column the aggregate applies to.
    ///
    /// Without an explicit `:column`, COUNT counts every row (`*`) and the other
    /// functions fall back to the related primary key. That fallback rarely
    /// makes sense for SUM or AVG, so callers should name the column.
    pub fn column_or_default(&self, function: AggregateFunction, related_key: &str) -> String {
        match &self.column {
            Some(column) => column.clone(),
            None if function == AggregateFunction::Count => "*".to_string(),
            None => related_key.to_string(),
        }
    }

    /// Output column alias: `<snake(alias or name)>__<column or "all">_<function>`.
    pub fn output_column(&self, column: &str, function: AggregateFunction) -> String {
        let base = self.alias.as_deref().unwrap_or(&self.relation_name);
        let column = if column == "*" { "all" } else { column };
        format!("{}__{}_{}", to_snake_case(base), column, function.as_suffix())
    }
}
