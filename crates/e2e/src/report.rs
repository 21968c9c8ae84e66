//! Run report
//!
//! One [`ReportSink`] is shared by every worker of a run. It is opened
//! lazily on first use, hands out an [`EntryHandle`] per test, and writes
//! the whole report as JSON on [`ReportSink::flush`]. Artifacts (screenshots,
//! page markup, console logs) live next to the report and are referenced
//! from the entry that produced them.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use taskwright_common::config::ReportSettings;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Pass,
    Fail,
    Skip,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    PageSource,
    ConsoleLog,
}

impl ArtifactKind {
    fn dir(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshots",
            ArtifactKind::PageSource => "pages",
            ArtifactKind::ConsoleLog => "console",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "png",
            ArtifactKind::PageSource => "html",
            ArtifactKind::ConsoleLog => "log",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "Screenshot",
            ArtifactKind::PageSource => "Page source",
            ArtifactKind::ConsoleLog => "Console log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: ArtifactKind,
    /// 1 for the first attachment of this kind in the entry
    pub sequence: u32,
    pub label: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub verdict: Option<Verdict>,
    pub events: Vec<ReportEvent>,
    pub attachments: Vec<Attachment>,
}

impl ReportEntry {
    pub fn is_finished(&self) -> bool {
        self.verdict.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub run_id: Uuid,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub system_info: BTreeMap<String, String>,
    pub entries: Vec<ReportEntry>,
}

impl ReportDocument {
    /// Entries with the given test name, in creation order
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ReportEntry> + 'a {
        self.entries.iter().filter(move |e| e.name == name)
    }
}

/// Handle to one test's report entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    id: Uuid,
    name: String,
}

impl EntryHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub report_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self::from(&ReportSettings::default())
    }
}

impl From<&ReportSettings> for ReportConfig {
    fn from(settings: &ReportSettings) -> Self {
        Self {
            output_dir: settings.output_dir.clone(),
            report_name: settings.report_name.clone(),
        }
    }
}

struct ReportState {
    document: ReportDocument,
    /// Unfinished entries by id, as indexes into `document.entries`
    active: HashMap<Uuid, usize>,
    /// Artifact file names already handed out, per directory
    taken: HashMap<(ArtifactKind, String), u32>,
}

/// Thread-safe collector for the run report
pub struct ReportSink {
    config: ReportConfig,
    state: OnceCell<Mutex<ReportState>>,
}

impl ReportSink {
    pub fn new(config: ReportConfig) -> Self {
        Self {
            config,
            state: OnceCell::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Path of the JSON report
    pub fn report_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.json", self.config.report_name))
    }

    pub fn is_open(&self) -> bool {
        self.state.get().is_some()
    }

    /// Open the report; later calls return the same instance
    pub fn open(&self) -> E2eResult<()> {
        self.state_or_open().map(|_| ())
    }

    fn state_or_open(&self) -> E2eResult<&Mutex<ReportState>> {
        self.state.get_or_try_init(|| {
            std::fs::create_dir_all(&self.config.output_dir)?;
            let run_id = Uuid::new_v4();
            info!(
                "Opened report {} (run {}) in {}",
                self.config.report_name,
                run_id,
                self.config.output_dir.display()
            );
            Ok::<_, E2eError>(Mutex::new(ReportState {
                document: ReportDocument {
                    run_id,
                    title: self.config.report_name.clone(),
                    started_at: Utc::now(),
                    system_info: BTreeMap::new(),
                    entries: Vec::new(),
                },
                active: HashMap::new(),
                taken: HashMap::new(),
            }))
        })
    }

    fn open_state(&self, handle: &EntryHandle) -> E2eResult<&Mutex<ReportState>> {
        self.state
            .get()
            .ok_or_else(|| E2eError::NoActiveEntry(handle.name.clone()))
    }

    /// Record a run-level fact (OS, browser, version...)
    pub fn set_system_info(&self, key: impl Into<String>, value: impl Into<String>) -> E2eResult<()> {
        let state = self.state_or_open()?;
        state.lock().document.system_info.insert(key.into(), value.into());
        Ok(())
    }

    /// Create the entry for one test
    pub fn begin_entry(&self, name: &str) -> E2eResult<EntryHandle> {
        let state = self.state_or_open()?;
        let mut state = state.lock();

        let id = Uuid::new_v4();
        let index = state.document.entries.len();
        state.document.entries.push(ReportEntry {
            id,
            name: name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            verdict: None,
            events: Vec::new(),
            attachments: Vec::new(),
        });
        state.active.insert(id, index);

        debug!("Report entry {} for {}", id, name);
        Ok(EntryHandle {
            id,
            name: name.to_string(),
        })
    }

    /// Append an event to an unfinished entry
    pub fn log(&self, handle: &EntryHandle, level: LogLevel, message: impl Into<String>) -> E2eResult<()> {
        let message = message.into();
        self.with_entry(handle, |entry| {
            entry.events.push(ReportEvent {
                timestamp: Utc::now(),
                level,
                message,
            });
        })
    }

    /// Reference an existing file from an unfinished entry
    pub fn attach(&self, handle: &EntryHandle, kind: ArtifactKind, path: impl Into<PathBuf>) -> E2eResult<Attachment> {
        let path = path.into();
        let sha256 = std::fs::read(&path).ok().map(|bytes| hex::encode(Sha256::digest(&bytes)));
        self.with_entry(handle, |entry| {
            let sequence = entry.attachments.iter().filter(|a| a.kind == kind).count() as u32 + 1;
            let label = match sequence {
                1 => kind.label().to_string(),
                n => format!("{} #{}", kind.label(), n),
            };
            let attachment = Attachment {
                kind,
                sequence,
                label,
                path,
                sha256,
            };
            entry.attachments.push(attachment.clone());
            attachment
        })
    }

    /// Write artifact bytes under the output directory and attach them
    pub fn write_artifact(&self, handle: &EntryHandle, kind: ArtifactKind, bytes: &[u8]) -> E2eResult<Attachment> {
        let path = self.reserve_artifact_path(handle, kind)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, bytes)?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        self.attach(handle, kind, path)
    }

    fn reserve_artifact_path(&self, handle: &EntryHandle, kind: ArtifactKind) -> E2eResult<PathBuf> {
        let mut state = self.open_state(handle)?.lock();
        if !state.active.contains_key(&handle.id) {
            return Err(E2eError::NoActiveEntry(handle.name.clone()));
        }

        let stem = slug(&handle.name);
        let count = state.taken.entry((kind, stem.clone())).or_insert(0);
        *count += 1;
        let file = match *count {
            1 => format!("{}.{}", stem, kind.extension()),
            n => format!("{}-{}.{}", stem, n, kind.extension()),
        };
        Ok(self.config.output_dir.join(kind.dir()).join(file))
    }

    /// Close an entry with its verdict
    pub fn finish_entry(&self, handle: &EntryHandle, verdict: Verdict) -> E2eResult<()> {
        let mut state = self.open_state(handle)?.lock();
        let index = state
            .active
            .remove(&handle.id)
            .ok_or_else(|| E2eError::NoActiveEntry(handle.name.clone()))?;
        let entry = &mut state.document.entries[index];
        let now = Utc::now();
        entry.verdict = Some(verdict);
        entry.finished_at = Some(now);
        entry.duration_ms = Some((now - entry.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }

    /// Persist the report. A no-op (returning `None`) before the first entry.
    ///
    /// The file is replaced atomically; concurrent flushes are serialized.
    pub fn flush(&self) -> E2eResult<Option<PathBuf>> {
        let Some(state) = self.state.get() else {
            debug!("Report never opened, nothing to flush");
            return Ok(None);
        };
        let state = state.lock();

        let json = serde_json::to_vec_pretty(&state.document)?;
        let path = self.report_path();
        let mut tmp = tempfile::NamedTempFile::new_in(&self.config.output_dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| E2eError::Io(e.error))?;

        debug!("Flushed report with {} entries", state.document.entries.len());
        Ok(Some(path))
    }

    /// Copy of the report as it stands
    pub fn snapshot(&self) -> Option<ReportDocument> {
        self.state.get().map(|state| state.lock().document.clone())
    }

    fn with_entry<R>(&self, handle: &EntryHandle, f: impl FnOnce(&mut ReportEntry) -> R) -> E2eResult<R> {
        let mut state = self.open_state(handle)?.lock();
        let index = *state
            .active
            .get(&handle.id)
            .ok_or_else(|| E2eError::NoActiveEntry(handle.name.clone()))?;
        Ok(f(&mut state.document.entries[index]))
    }
}

/// File-system safe form of a test name
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "test".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use test_case::test_case;

    fn sink(dir: &Path) -> ReportSink {
        ReportSink::new(ReportConfig {
            output_dir: dir.to_path_buf(),
            report_name: "Report".into(),
        })
    }

    #[test_case("validateTaskListByTitle", "validateTaskListByTitle")]
    #[test_case("search by title / happy path", "search_by_title_happy_path")]
    #[test_case("../../etc/passwd", ".._.._etc_passwd")]
    #[test_case("???", "test")]
    fn test_slug(name: &str, expected: &str) {
        assert_eq!(slug(name), expected);
    }

    #[test]
    fn test_flush_before_open_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        assert_eq!(sink.flush().unwrap(), None);
        assert!(!sink.report_path().exists());
    }

    #[test]
    fn test_entry_lifecycle_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        sink.set_system_info("OS", "linux").unwrap();

        let entry = sink.begin_entry("login works").unwrap();
        sink.log(&entry, LogLevel::Info, "Test started: login works").unwrap();
        sink.finish_entry(&entry, Verdict::Passed).unwrap();
        let path = sink.flush().unwrap().unwrap();

        let doc: ReportDocument = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(doc.system_info["OS"], "linux");
        assert_eq!(doc.entries.len(), 1);
        assert_eq!(doc.entries[0].verdict, Some(Verdict::Passed));
        assert_eq!(doc.entries[0].events[0].level, LogLevel::Info);
    }

    #[test]
    fn test_log_after_finish_is_no_active_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let entry = sink.begin_entry("t").unwrap();
        sink.finish_entry(&entry, Verdict::Failed).unwrap();

        assert!(matches!(
            sink.log(&entry, LogLevel::Info, "late"),
            Err(E2eError::NoActiveEntry(_))
        ));
        assert!(matches!(
            sink.finish_entry(&entry, Verdict::Passed),
            Err(E2eError::NoActiveEntry(_))
        ));
    }

    #[test]
    fn test_log_on_unopened_sink_is_no_active_entry() {
        let dir = tempfile::tempdir().unwrap();
        let other = sink(dir.path());
        let entry = other.begin_entry("t").unwrap();

        let fresh = sink(dir.path());
        assert!(matches!(
            fresh.log(&entry, LogLevel::Info, "x"),
            Err(E2eError::NoActiveEntry(_))
        ));
    }

    #[test]
    fn test_repeated_artifacts_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let entry = sink.begin_entry("same name").unwrap();

        let first = sink.write_artifact(&entry, ArtifactKind::Screenshot, b"one").unwrap();
        let second = sink.write_artifact(&entry, ArtifactKind::Screenshot, b"two").unwrap();

        assert_ne!(first.path, second.path);
        assert!(first.path.ends_with("screenshots/same_name.png"));
        assert!(second.path.ends_with("screenshots/same_name-2.png"));
        assert_eq!(second.sequence, 2);
        assert_eq!(second.label, "Screenshot #2");
        assert_eq!(std::fs::read(&first.path).unwrap(), b"one");
        assert_eq!(
            first.sha256.as_deref(),
            Some(hex::encode(Sha256::digest(b"one")).as_str())
        );
    }

    #[test]
    fn test_concurrent_entries_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(sink(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let entry = sink.begin_entry(&format!("test-{}", i)).unwrap();
                    for step in 0..20 {
                        sink.log(&entry, LogLevel::Info, format!("{} step {}", i, step)).unwrap();
                    }
                    sink.finish_entry(&entry, Verdict::Passed).unwrap();
                    sink.flush().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let doc = sink.snapshot().unwrap();
        assert_eq!(doc.entries.len(), 8);
        for entry in &doc.entries {
            assert_eq!(entry.events.len(), 20);
            let prefix = entry.name.trim_start_matches("test-");
            assert!(entry.events.iter().all(|e| e.message.starts_with(prefix)));
        }
    }
}
