//! Test data in the application's backing store
//!
//! Fixtures are task rows inserted before a test and removed afterwards by
//! title prefix. All statements are parameterized.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use taskwright_common::{BackingStore, Row, SqlValue};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

const DUE_DATE_FORMAT: &str = "%Y-%m-%d";

/// One task row to provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFixture {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "dueDate")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl TaskFixture {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_date: None,
            completed: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn due(mut self, date: impl Into<String>) -> Self {
        self.due_date = Some(date.into());
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Whether cleanup by `prefix` will remove this record
    pub fn owned_by(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.title.starts_with(prefix)
    }

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        if let Some(date) = &self.due_date {
            NaiveDate::parse_from_str(date, DUE_DATE_FORMAT)
                .map_err(|e| format!("due date '{}' is not YYYY-MM-DD: {}", date, e))?;
        }
        Ok(())
    }

    fn from_row(row: &Row) -> Self {
        Self {
            title: row.get_str("title").unwrap_or_default().to_string(),
            description: row.get_str("description").unwrap_or_default().to_string(),
            due_date: row.get_str("due_date").map(String::from),
            completed: row.get_bool("completed").unwrap_or(false),
        }
    }
}

/// Row id of an inserted fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixtureId(pub i64);

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Outcome of a prefix cleanup; never an error
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub prefix: String,
    pub deleted: usize,
    /// Matching rows still present after the delete
    pub dangling: usize,
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.dangling == 0 && self.warnings.is_empty()
    }
}

/// Inserts and removes task fixtures
#[derive(Clone)]
pub struct FixtureStore {
    store: Arc<dyn BackingStore>,
}

impl FixtureStore {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store }
    }

    /// Insert one record; fails with `FixtureProvision`
    pub fn insert(&self, record: &TaskFixture) -> E2eResult<FixtureId> {
        let provision_error = |reason: String| E2eError::FixtureProvision {
            title: record.title.clone(),
            reason,
        };

        record.validate().map_err(provision_error)?;

        let rows = self
            .store
            .query(
                "INSERT INTO task (title, description, due_date, completed) \
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                &[
                    record.title.as_str().into(),
                    record.description.as_str().into(),
                    record.due_date.clone().into(),
                    record.completed.into(),
                ],
            )
            .map_err(|e| provision_error(e.to_string()))?;

        let id = rows
            .first()
            .and_then(|row| row.get_i64("id"))
            .ok_or_else(|| provision_error("insert returned no id".into()))?;

        debug!("Inserted fixture '{}' as task#{}", record.title, id);
        Ok(FixtureId(id))
    }

    /// Delete every record whose title starts with `prefix`.
    ///
    /// Zero matches is success. Fails with `FixtureCleanup`; callers in
    /// teardown treat that as a warning.
    pub fn delete_by_prefix(&self, prefix: &str) -> E2eResult<usize> {
        if prefix.is_empty() {
            return Err(E2eError::FixtureCleanup {
                prefix: prefix.to_string(),
                reason: "refusing to delete with an empty prefix".into(),
            });
        }

        let deleted = self
            .store
            .execute(
                r"DELETE FROM task WHERE title LIKE ?1 ESCAPE '\'",
                &[like_prefix(prefix).into()],
            )
            .map_err(|e| E2eError::FixtureCleanup {
                prefix: prefix.to_string(),
                reason: e.to_string(),
            })?;

        info!("Deleted {} fixture(s) with prefix '{}'", deleted, prefix);
        Ok(deleted)
    }

    /// Number of records whose title starts with `prefix`
    pub fn count_by_prefix(&self, prefix: &str) -> E2eResult<usize> {
        let rows = self.store.query(
            r"SELECT COUNT(*) AS n FROM task WHERE title LIKE ?1 ESCAPE '\'",
            &[like_prefix(prefix).into()],
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.get_i64("n"))
            .unwrap_or(0) as usize)
    }

    pub fn find_by_title(&self, title: &str) -> E2eResult<Option<TaskFixture>> {
        let rows = self.store.query(
            "SELECT title, description, due_date, completed FROM task WHERE title = ?1 LIMIT 1",
            &[SqlValue::from(title)],
        )?;
        Ok(rows.first().map(TaskFixture::from_row))
    }

    /// Delete by prefix, then audit that nothing matching is left
    pub fn cleanup(&self, prefix: &str) -> CleanupReport {
        let mut report = CleanupReport {
            prefix: prefix.to_string(),
            ..Default::default()
        };

        match self.delete_by_prefix(prefix) {
            Ok(n) => report.deleted = n,
            Err(e) => {
                warn!("{}", e);
                report.warnings.push(e.to_string());
            }
        }

        if prefix.is_empty() {
            return report;
        }
        match self.count_by_prefix(prefix) {
            Ok(0) => {}
            Ok(n) => {
                warn!("{} record(s) with prefix '{}' survived cleanup", n, prefix);
                report.dangling = n;
                report
                    .warnings
                    .push(format!("{} record(s) with prefix '{}' remain after cleanup", n, prefix));
            }
            Err(e) => {
                warn!("Cleanup audit for '{}' failed: {}", prefix, e);
                report.warnings.push(format!("cleanup audit failed: {}", e));
            }
        }

        report
    }
}

/// LIKE pattern matching titles that start with `prefix` literally
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
