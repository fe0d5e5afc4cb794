//! Variable definitions and resolved-value types.
//!
//! A [`Variable`] is a named, parameterized value source. Its definition is
//! immutable for the duration of a hydration run; the run's job is to turn
//! each variable into a [`VariableValues`] — the list of available values
//! plus the single selected value, or an error message when resolution
//! failed.
//!
//! Variables come in three kinds:
//! - [`VariableKind::Query`] - values come from executing a query against a
//!   remote endpoint; the query text may reference other variables, which is
//!   what creates dependency edges between variables.
//! - [`VariableKind::Map`] - a fixed, ordered key/value mapping.
//! - [`VariableKind::Constant`] - a fixed, ordered list of candidate values.
//!
//! Map and constant variables never depend on anything; only query variables
//! contribute edges to the dependency graph.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prior selections keyed by variable identifier, supplied by the caller.
pub type ValueSelections = HashMap<String, String>;

/// The aggregate result of a hydration run: resolved values per variable id.
pub type VariableValuesById = HashMap<String, VariableValues>;

/// A named value source whose definition may reference other variables.
///
/// The `selected` list carries at most one meaningful entry: the variable's
/// own default selection, consulted when the caller's prior selection is not
/// available (see [`crate::resolver::selection`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Unique identifier. Uniqueness across the variable universe is the
    /// caller's contract.
    pub id: String,
    /// Display name, and the token other queries use to reference this
    /// variable (`v.<name>`).
    pub name: String,
    /// What backs this variable's values.
    #[serde(rename = "arguments")]
    pub kind: VariableKind,
    /// Previously selected values; the first entry is the default selection.
    #[serde(default)]
    pub selected: Vec<String>,
}

impl Variable {
    /// Create a query-backed variable.
    pub fn query(
        id: impl Into<String>,
        name: impl Into<String>,
        query: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Query {
                query: query.into(),
                language: language.into(),
            },
            selected: Vec::new(),
        }
    }

    /// Create a map-backed variable from ordered key/value entries.
    pub fn map(
        id: impl Into<String>,
        name: impl Into<String>,
        entries: Vec<(String, String)>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Map(entries),
            selected: Vec::new(),
        }
    }

    /// Create a constant-backed variable from an ordered candidate list.
    pub fn constant(
        id: impl Into<String>,
        name: impl Into<String>,
        candidates: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Constant(candidates),
            selected: Vec::new(),
        }
    }

    /// Set the default selection (first entry of the selection list).
    #[must_use]
    pub fn with_selected(mut self, selected: impl Into<String>) -> Self {
        self.selected = vec![selected.into()];
        self
    }

    /// The variable's own default selection, if it has one.
    pub fn default_selection(&self) -> Option<&str> {
        self.selected.first().map(String::as_str)
    }
}

/// The discriminated value source backing a [`Variable`].
///
/// Map entries are stored as ordered pairs rather than a hash map so the
/// declaration order is preserved; the selection fallback ("first available
/// value") depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum VariableKind {
    /// Free-text query source plus its language tag (e.g. `flux`).
    Query { query: String, language: String },
    /// Ordered key/value mapping.
    Map(Vec<(String, String)>),
    /// Ordered list of candidate value strings.
    Constant(Vec<String>),
}

/// Declared type of a variable's resolved values.
///
/// All currently supported kinds resolve to strings; the enum exists because
/// the query transport types its result column and may grow other types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
}

/// Resolution output for one variable.
///
/// Exactly one of the two shapes holds at any time: populated
/// `values`/`selected` with no `error`, or a populated `error` with both
/// value fields absent. Use [`VariableValues::resolved`] and
/// [`VariableValues::errored`] to stay on the right side of that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableValues {
    /// Available values in resolution order, absent on failure.
    pub values: Option<Vec<String>>,
    /// The single selected value, absent on failure or when no values exist.
    pub selected: Option<String>,
    /// Declared type of the values.
    #[serde(default)]
    pub value_type: ValueType,
    /// Failure message; present iff resolution failed.
    pub error: Option<String>,
}

impl VariableValues {
    /// Successful resolution: available values plus the chosen selection.
    pub fn resolved(values: Vec<String>, selected: Option<String>) -> Self {
        Self {
            values: Some(values),
            selected,
            value_type: ValueType::String,
            error: None,
        }
    }

    /// Failed resolution: no values, only a message.
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            values: None,
            selected: None,
            value_type: ValueType::String,
            error: Some(message.into()),
        }
    }

    /// Whether this result carries an error instead of values.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
