use std::collections::HashMap;
use std::path::Path;

use varia_core::{VariaError, VariaResult};

/// A single row of tabular input (column name → value).
pub type DataRow = HashMap<String, String>;

/// Tabular input loaded from a delimited-text or JSON payload.
///
/// Delimited payloads are kept as text and parsed lazily: every call to
/// [`DataSet::rows`] starts a fresh pass over the payload.
#[derive(Debug, Clone)]
pub struct DataSet {
    /// Column names in order.
    pub columns: Vec<String>,
    source: RowSource,
}

#[derive(Debug, Clone)]
enum RowSource {
    Delimited {
        payload: String,
        delimiter: char,
        /// Byte offset of the first record after the header.
        body_start: usize,
    },
    Records(Vec<DataRow>),
}

impl DataSet {
    /// Load a dataset from a file path. Supports .csv, .tsv and .json extensions.
    pub fn load(path: &Path) -> VariaResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let file = path.display().to_string();

        match ext.as_str() {
            "csv" => Self::from_delimited(std::fs::read_to_string(path)?, ',', &file),
            "tsv" => Self::from_delimited(std::fs::read_to_string(path)?, '\t', &file),
            "json" => Self::from_json_str(&std::fs::read_to_string(path)?, &file),
            _ => Err(VariaError::parse(
                format!("unsupported data file format: .{}", ext),
                file,
                0,
            )),
        }
    }

    /// Parse a comma-separated payload. The first record holds the column names.
    pub fn from_csv_str(payload: impl Into<String>) -> VariaResult<Self> {
        Self::from_delimited(payload.into(), ',', "<memory>")
    }

    /// Parse a delimited payload with quoted-field support (`""` escapes a
    /// quote, quoted fields may span lines).
    pub fn from_delimited(payload: String, delimiter: char, file: &str) -> VariaResult<Self> {
        let payload = match payload.strip_prefix('\u{feff}') {
            Some(rest) => rest.to_string(),
            None => payload,
        };

        let mut pos = 0;
        let columns = loop {
            match read_record(&payload, pos, delimiter) {
                Some((fields, next)) => {
                    pos = next;
                    if !is_blank(&fields) {
                        break fields;
                    }
                }
                None => return Err(VariaError::parse("CSV file is empty", file, 0)),
            }
        };

        Ok(DataSet {
            columns,
            source: RowSource::Delimited {
                payload,
                delimiter,
                body_start: pos,
            },
        })
    }

    /// Parse a JSON array of objects. Columns are the union of object keys in
    /// order of first appearance.
    pub fn from_json_str(payload: &str, file: &str) -> VariaResult<Self> {
        let parsed: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| VariaError::parse(format!("invalid JSON: {}", e), file, e.line()))?;

        let arr = parsed.as_array().ok_or_else(|| {
            VariaError::parse("JSON data file must be an array of objects", file, 0)
        })?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(arr.len());
        for item in arr {
            let obj = item
                .as_object()
                .ok_or_else(|| VariaError::parse("JSON array items must be objects", file, 0))?;
            let mut row = DataRow::new();
            for (key, v) in obj {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
                let val = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                row.insert(key.clone(), val);
            }
            rows.push(row);
        }

        Ok(DataSet {
            columns,
            source: RowSource::Records(rows),
        })
    }

    /// Iterate the rows from the beginning.
    pub fn rows(&self) -> Rows<'_> {
        let cursor = match &self.source {
            RowSource::Delimited { body_start, .. } => *body_start,
            RowSource::Records(_) => 0,
        };
        Rows { set: self, cursor }
    }

    /// Number of data rows. Walks the payload for delimited input.
    pub fn len(&self) -> usize {
        self.rows().count()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().next().is_none()
    }
}

/// Restartable row iterator returned by [`DataSet::rows`].
pub struct Rows<'a> {
    set: &'a DataSet,
    cursor: usize,
}

impl Iterator for Rows<'_> {
    type Item = DataRow;

    fn next(&mut self) -> Option<DataRow> {
        match &self.set.source {
            RowSource::Records(rows) => {
                let row = rows.get(self.cursor)?.clone();
                self.cursor += 1;
                Some(row)
            }
            RowSource::Delimited {
                payload, delimiter, ..
            } => loop {
                let (fields, next) = read_record(payload, self.cursor, *delimiter)?;
                self.cursor = next;
                if is_blank(&fields) {
                    continue;
                }
                let mut row = DataRow::new();
                for (i, col) in self.set.columns.iter().enumerate() {
                    let val = fields.get(i).cloned().unwrap_or_default();
                    row.insert(col.clone(), val);
                }
                return Some(row);
            },
        }
    }
}

fn is_blank(fields: &[String]) -> bool {
    fields.len() == 1 && fields[0].is_empty()
}

/// Read one record starting at byte offset `start`. Returns the fields and the
/// offset just past the record terminator.
fn read_record(input: &str, start: usize, delimiter: char) -> Option<(Vec<String>, usize)> {
    if start >= input.len() {
        return None;
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = input[start..].char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }

        match ch {
            '"' if !quoted && field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
                quoted = true;
            }
            '\n' => {
                fields.push(finish_field(field, quoted));
                return Some((fields, start + i + 1));
            }
            '\r' => {}
            c if c == delimiter => {
                fields.push(finish_field(std::mem::take(&mut field), quoted));
                quoted = false;
            }
            c if quoted && c.is_whitespace() => {}
            c => field.push(c),
        }
    }

    fields.push(finish_field(field, quoted));
    Some((fields, input.len()))
}

fn finish_field(field: String, quoted: bool) -> String {
    if quoted {
        field
    } else {
        field.trim().to_string()
    }
}
