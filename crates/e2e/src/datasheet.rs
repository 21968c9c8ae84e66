//! Tabular test data
//!
//! A data sheet file maps sheet names to rows; row 0 holds the column
//! headers. Cells are looked up by 1-based data row and case-insensitive
//! column name:
//!
//! ```yaml
//! LoginCredentials:
//!   - [Username, Password]
//!   - [admin, admin123]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Default)]
pub struct DataSheet {
    sheets: BTreeMap<String, Vec<Vec<Value>>>,
}

impl DataSheet {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let sheets: BTreeMap<String, Vec<Vec<Value>>> = serde_yaml::from_str(yaml)?;
        Ok(Self { sheets })
    }

    pub fn load(path: &Path) -> E2eResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| E2eError::DataSheet(format!("reading {}: {}", path.display(), e)))?;
        let sheet = Self::from_yaml(&text)?;
        debug!("Loaded data sheet {} ({} sheets)", path.display(), sheet.sheets.len());
        Ok(sheet)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }

    /// Number of data rows (header excluded)
    pub fn row_count(&self, sheet: &str) -> E2eResult<usize> {
        Ok(self.rows(sheet)?.len().saturating_sub(1))
    }

    /// Cell at `row` (1 = first data row) under the column named `column`
    pub fn get_value(&self, sheet: &str, row: usize, column: &str) -> E2eResult<String> {
        let rows = self.rows(sheet)?;
        let header = rows
            .first()
            .ok_or_else(|| E2eError::DataSheet(format!("Header row not found in sheet {}", sheet)))?;
        let index = header
            .iter()
            .position(|cell| format_cell(cell).eq_ignore_ascii_case(column.trim()))
            .ok_or_else(|| E2eError::DataSheet(format!("Column not found: {}", column)))?;

        if row == 0 {
            return Err(E2eError::DataSheet("Row 0 is the header row".into()));
        }
        let data = rows
            .get(row)
            .ok_or_else(|| E2eError::DataSheet(format!("Row not found: {}", row)))?;
        let cell = data
            .get(index)
            .ok_or_else(|| E2eError::DataSheet(format!("Cell not found at row {}, column {}", row, column)))?;

        Ok(format_cell(cell))
    }

    /// Every column of one data row, keyed by header
    pub fn row(&self, sheet: &str, row: usize) -> E2eResult<HashMap<String, String>> {
        let rows = self.rows(sheet)?;
        let header = rows
            .first()
            .ok_or_else(|| E2eError::DataSheet(format!("Header row not found in sheet {}", sheet)))?;
        let data = rows
            .get(row)
            .filter(|_| row > 0)
            .ok_or_else(|| E2eError::DataSheet(format!("Row not found: {}", row)))?;

        Ok(header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = data.get(i).map(format_cell).unwrap_or_default();
                (format_cell(name), value)
            })
            .collect())
    }

    fn rows(&self, sheet: &str) -> E2eResult<&Vec<Vec<Value>>> {
        self.sheets.get(sheet).ok_or_else(|| {
            let known: Vec<&str> = self.sheet_names().collect();
            E2eError::DataSheet(format!("Sheet not found: {} (sheets: {})", sheet, known.join(", ")))
        })
    }
}

/// Cell text; integral numbers print without a fraction
fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
