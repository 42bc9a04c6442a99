//! Result assembly: the fixed output row of one run and the named,
//! append-only result table that collects rows across runs.
//!
//! Every run produces an [`OutputRow`] holding all [`OUTPUT_ORDER`]
//! fields. A row can only be built when every field is present, so a
//! table never contains a partial row. Comment columns parsed from the
//! user's annotation (see [`crate::comment`]) are appended after the
//! fixed fields; a column first seen on a later row is back-filled with
//! an empty cell on every earlier row.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Name of the session table every analysis run appends to.
pub const RESULTS_TABLE_NAME: &str = "Mito Morphology";

/// One field of the output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputField {
    /// Column label in the result table.
    pub label: &'static str,
    /// Snake-case name under which the value is published in
    /// [`RunOutputs`].
    pub name: &'static str,
}

const fn field(label: &'static str, name: &'static str) -> OutputField {
    OutputField { label, name }
}

/// The fixed fields of every output row, in table order.
pub const OUTPUT_ORDER: [OutputField; 19] = [
    field("image title", "image_title"),
    field("preprocessor path", "preprocessor_path"),
    field("post processor path", "postprocessor_path"),
    field("thresholding op", "thresholding_op"),
    field("use ridge detection", "use_ridge_detection"),
    field("high contrast", "high_contrast"),
    field("low contrast", "low_contrast"),
    field("line width", "line_width"),
    field("minimum line length", "min_line_length"),
    field("mitochondrial footprint", "mitochondrial_footprint"),
    field("branch length mean", "branch_len_mean"),
    field("branch length median", "branch_len_med"),
    field("branch length stdevp", "branch_len_stdevp"),
    field("summed branch lengths mean", "summed_branch_lens_mean"),
    field("summed branch lengths median", "summed_branch_lens_med"),
    field("summed branch lengths stdevp", "summed_branch_lens_stdevp"),
    field("network branches mean", "network_branches_mean"),
    field("network branches median", "network_branches_med"),
    field("network branches stdevp", "network_branches_stdevp"),
];

/// A single output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Free text such as a title or a path.
    Text(String),
    /// Integer parameter.
    Integer(i64),
    /// Measured or computed quantity.
    Number(f64),
    /// Flag.
    Bool(bool),
}

impl Value {
    /// The value as a float, if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Integer(i) => Some(i as f64),
            Self::Number(x) => Some(x),
            Self::Text(_) | Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            // Integral floats keep one decimal so numeric columns read
            // as floats ("50.0", not "50").
            Self::Number(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 => {
                write!(f, "{x:.1}")
            }
            Self::Number(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Number(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Output parameters gathered during a run, keyed by column label.
///
/// Stages insert values as they compute them; [`OutputRow::assemble`]
/// checks that the set is complete.
pub type OutputParameters = BTreeMap<&'static str, Value>;

/// A complete output row: one value for every [`OUTPUT_ORDER`] field.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    values: Vec<Value>,
}

impl OutputRow {
    /// Build the row from gathered parameters in [`OUTPUT_ORDER`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingOutputParameter`] naming the first
    /// field that was never computed.
    pub fn assemble(mut parameters: OutputParameters) -> Result<Self, PipelineError> {
        let values = OUTPUT_ORDER
            .iter()
            .map(|f| {
                parameters
                    .remove(f.label)
                    .ok_or_else(|| PipelineError::MissingOutputParameter(f.label.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }

    /// Value of a field by column label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Value> {
        OUTPUT_ORDER
            .iter()
            .position(|f| f.label == label)
            .and_then(|i| self.values.get(i))
    }

    /// Fields and values in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&OutputField, &Value)> {
        OUTPUT_ORDER.iter().zip(&self.values)
    }

    /// The row's values under their snake-case output names.
    #[must_use]
    pub fn to_outputs(&self) -> RunOutputs {
        RunOutputs {
            values: self
                .iter()
                .map(|(f, v)| (f.name.to_owned(), v.clone()))
                .collect(),
        }
    }
}

/// The named outputs of one completed run.
///
/// This is what the batch driver reads: a lookup from snake-case output
/// name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutputs {
    values: BTreeMap<String, Value>,
}

impl RunOutputs {
    /// Look up an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// All outputs, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// An append-only table of output rows plus comment columns.
///
/// Cells are stored as display strings. Columns are never removed, and
/// every row has one cell per column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultTable {
    /// An empty table with the fixed output columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: OUTPUT_ORDER.iter().map(|f| f.label.to_owned()).collect(),
            rows: Vec::new(),
        }
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column labels in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in insertion order, one cell per column.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The cell at `row` under `column`.
    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }

    /// Append a row followed by its comment columns.
    ///
    /// A comment key that is already a column (fixed or from an earlier
    /// row) fills that column; a new key adds a column, back-filled with
    /// empty cells. When a key repeats, the last value wins.
    pub fn append(&mut self, row: &OutputRow, comments: &[(String, String)]) {
        let mut cells: Vec<String> = row.iter().map(|(_, v)| v.to_string()).collect();
        cells.resize(self.columns.len(), String::new());

        for (key, value) in comments {
            let index = if let Some(i) = self.columns.iter().position(|c| c == key) {
                i
            } else {
                self.columns.push(key.clone());
                for existing in &mut self.rows {
                    existing.push(String::new());
                }
                cells.push(String::new());
                self.columns.len() - 1
            };
            cells[index].clone_from(value);
        }

        self.rows.push(cells);
    }
}
