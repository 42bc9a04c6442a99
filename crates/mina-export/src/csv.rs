//! CSV serialization of result tables.
//!
//! Output is one header row followed by one record per table row.
//! Fields containing a comma, a double quote, or a line break are
//! enclosed in double quotes with embedded quotes doubled (RFC 4180).
//! Records end with `\n`.

use std::borrow::Cow;

use mina_pipeline::{BatchTable, ResultTable};

/// Serialize a session results table, comment columns included.
///
/// # Examples
///
/// ```
/// use mina_pipeline::ResultTable;
///
/// let table = ResultTable::new("Mito Morphology");
/// let csv = mina_export::results_csv(&table);
/// assert!(csv.starts_with("image title,preprocessor path,"));
/// ```
#[must_use]
pub fn results_csv(table: &ResultTable) -> String {
    let mut out = String::new();
    write_record(&mut out, table.columns());
    for row in table.rows() {
        write_record(&mut out, row);
    }
    out
}

/// Serialize a batch results table.
#[must_use]
pub fn batch_csv(table: &BatchTable) -> String {
    let mut out = String::new();
    write_record(&mut out, table.columns());
    for row in table.rows() {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        write_record(&mut out, &cells);
    }
    out
}

fn write_record<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(field.as_ref()));
    }
    out.push('\n');
}

fn quote(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
