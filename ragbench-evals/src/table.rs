// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Result table: one cell per attempted (backend, question, metric)
//!
//! The table is the only structure shared between concurrent workers. Each
//! worker owns a disjoint set of keys, so inserts never contend on the same
//! entry. Export goes through [`FlatRow`], the stable flat form
//! `(backend_id, question_id, metric, value, error)`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Key of a score cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub backend_id: String,
    pub question_id: String,
    pub metric: String,
}

impl CellKey {
    pub fn new(
        backend_id: impl Into<String>,
        question_id: impl Into<String>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            question_id: question_id.into(),
            metric: metric.into(),
        }
    }

    /// Identifier of the record the cell belongs to
    pub fn record_id(&self) -> String {
        format!("{}/{}", self.backend_id, self.question_id)
    }
}

/// Value or error of a single scorer invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellOutcome {
    Value(f64),
    Error(String),
}

impl CellOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            CellOutcome::Value(v) => Some(*v),
            CellOutcome::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellOutcome::Error(_))
    }
}

/// Result of exactly one scorer invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCell {
    pub key: CellKey,
    pub outcome: CellOutcome,
}

impl ScoreCell {
    pub fn value(key: CellKey, value: f64) -> Self {
        Self {
            key,
            outcome: CellOutcome::Value(value),
        }
    }

    pub fn error(key: CellKey, error: impl Into<String>) -> Self {
        Self {
            key,
            outcome: CellOutcome::Error(error.into()),
        }
    }
}

/// Flat export row; exactly one of `value` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub backend_id: String,
    pub question_id: String,
    pub metric: String,
    pub value: Option<f64>,
    pub error: Option<String>,
}

impl From<&ScoreCell> for FlatRow {
    fn from(cell: &ScoreCell) -> Self {
        let (value, error) = match &cell.outcome {
            CellOutcome::Value(v) => (Some(*v), None),
            CellOutcome::Error(e) => (None, Some(e.clone())),
        };
        FlatRow {
            backend_id: cell.key.backend_id.clone(),
            question_id: cell.key.question_id.clone(),
            metric: cell.key.metric.clone(),
            value,
            error,
        }
    }
}

impl TryFrom<FlatRow> for ScoreCell {
    type Error = TableError;

    fn try_from(row: FlatRow) -> Result<Self, TableError> {
        let key = CellKey::new(row.backend_id, row.question_id, row.metric);
        match (row.value, row.error) {
            (Some(v), None) => Ok(ScoreCell::value(key, v)),
            (None, Some(e)) => Ok(ScoreCell::error(key, e)),
            _ => Err(TableError::InvalidRow(format!(
                "{} {}: exactly one of value and error must be set",
                key.record_id(),
                key.metric
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Duplicate cell: {0:?}")]
    DuplicateCell(CellKey),
}

/// Mapping (backend, question, metric) -> cell
#[derive(Debug, Default)]
pub struct ResultTable {
    cells: DashMap<CellKey, ScoreCell>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell. A cell is written once; a second write to the same key
    /// is rejected and leaves the first in place.
    pub fn insert(&self, cell: ScoreCell) -> Result<(), TableError> {
        use dashmap::mapref::entry::Entry;

        match self.cells.entry(cell.key.clone()) {
            Entry::Occupied(_) => Err(TableError::DuplicateCell(cell.key)),
            Entry::Vacant(slot) => {
                slot.insert(cell);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &CellKey) -> Option<ScoreCell> {
        self.cells.get(key).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All cells sorted by key
    pub fn cells(&self) -> Vec<ScoreCell> {
        let mut cells: Vec<ScoreCell> = self.cells.iter().map(|c| c.value().clone()).collect();
        cells.sort_by(|a, b| a.key.cmp(&b.key));
        cells
    }

    /// Cells matching the given key components, sorted by key
    pub fn query(
        &self,
        backend_id: Option<&str>,
        question_id: Option<&str>,
        metric: Option<&str>,
    ) -> Vec<ScoreCell> {
        let mut cells: Vec<ScoreCell> = self
            .cells
            .iter()
            .filter(|c| {
                let k = c.key();
                backend_id.map_or(true, |b| k.backend_id == b)
                    && question_id.map_or(true, |q| k.question_id == q)
                    && metric.map_or(true, |m| k.metric == m)
            })
            .map(|c| c.value().clone())
            .collect();
        cells.sort_by(|a, b| a.key.cmp(&b.key));
        cells
    }

    /// Distinct metric names, sorted
    pub fn metrics(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|c| c.key().metric.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct backend ids, sorted
    pub fn backends(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|c| c.key().backend_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.cells.iter().filter(|c| !c.outcome.is_error()).count()
    }

    pub fn failed(&self) -> usize {
        self.cells.iter().filter(|c| c.outcome.is_error()).count()
    }

    pub fn to_rows(&self) -> Vec<FlatRow> {
        self.cells().iter().map(FlatRow::from).collect()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = FlatRow>) -> Result<Self, TableError> {
        let table = Self::new();
        for row in rows {
            table.insert(ScoreCell::try_from(row)?)?;
        }
        Ok(table)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
        for row in self.to_rows() {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let rows = rdr
            .deserialize::<FlatRow>()
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_rows(rows)
    }

    pub fn to_json(&self) -> Result<String, TableError> {
        Ok(serde_json::to_string_pretty(&self.to_rows())?)
    }

    pub fn from_json(json: &str) -> Result<Self, TableError> {
        let rows: Vec<FlatRow> = serde_json::from_str(json)?;
        Self::from_rows(rows)
    }

    /// Write to `path`, as JSON when the extension is `.json` and CSV otherwise
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        if is_json(path) {
            std::fs::write(path, self.to_json()?)?;
        } else {
            self.write_csv(std::fs::File::create(path)?)?;
        }
        Ok(())
    }

    /// Load a table written by [`ResultTable::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        if is_json(path) {
            Self::from_json(&std::fs::read_to_string(path)?)
        } else {
            Self::read_csv(std::fs::File::open(path)?)
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"))
}
