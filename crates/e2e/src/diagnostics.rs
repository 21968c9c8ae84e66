//! Failure diagnostics
//!
//! Captures browser console logs, a screenshot and the page markup, in that
//! order, from a failed test's session. A capture step that fails is logged
//! and skipped; it never replaces the test's own failure.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::report::{ArtifactKind, Attachment, EntryHandle, LogLevel, ReportSink};
use crate::session::{BrowserDriver, ConsoleEntry};

/// Everything captured for one failure
#[derive(Debug, Clone)]
pub struct DiagnosticsBundle {
    pub test_name: String,
    pub captured_at: DateTime<Utc>,
    pub console_logs: Option<Vec<ConsoleEntry>>,
    pub screenshot: Option<Vec<u8>>,
    pub page_source: Option<String>,
    /// One message per capture step that failed
    pub warnings: Vec<String>,
}

impl DiagnosticsBundle {
    pub fn is_complete(&self) -> bool {
        self.console_logs.is_some() && self.screenshot.is_some() && self.page_source.is_some()
    }

    fn console_text(&self) -> Option<String> {
        self.console_logs.as_ref().map(|entries| {
            entries
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsCapturer;

impl DiagnosticsCapturer {
    pub fn new() -> Self {
        Self
    }

    /// Collect console logs, screenshot and markup from the session
    pub async fn capture(&self, driver: &dyn BrowserDriver, test_name: &str) -> DiagnosticsBundle {
        let mut warnings = Vec::new();
        error!("Test failed: {}", test_name);

        let console_logs = step("console logs", driver.console_logs().await, &mut warnings);
        let screenshot = step("screenshot", driver.screenshot().await, &mut warnings);
        let page_source = step("page source", driver.page_source().await, &mut warnings);

        DiagnosticsBundle {
            test_name: test_name.to_string(),
            captured_at: Utc::now(),
            console_logs,
            screenshot,
            page_source,
            warnings,
        }
    }

    /// Write the bundle's artifacts and attach them to the entry.
    ///
    /// Write failures become warnings on the entry; only a missing entry is
    /// an error.
    pub fn attach(
        &self,
        bundle: &DiagnosticsBundle,
        sink: &ReportSink,
        entry: &EntryHandle,
    ) -> E2eResult<Vec<Attachment>> {
        let mut attachments = Vec::new();

        for warning in &bundle.warnings {
            sink.log(entry, LogLevel::Warning, warning.clone())?;
        }

        if let Some(logs) = &bundle.console_logs {
            sink.log(entry, LogLevel::Info, "Console Logs:")?;
            for line in logs {
                sink.log(entry, LogLevel::Info, line.to_string())?;
            }
        }

        let artifacts = [
            (ArtifactKind::ConsoleLog, bundle.console_text().map(String::into_bytes)),
            (ArtifactKind::Screenshot, bundle.screenshot.clone()),
            (ArtifactKind::PageSource, bundle.page_source.clone().map(String::into_bytes)),
        ];

        for (kind, bytes) in artifacts {
            let Some(bytes) = bytes else { continue };
            match sink.write_artifact(entry, kind, &bytes) {
                Ok(attachment) => {
                    info!("Saved {} to {}", attachment.label, attachment.path.display());
                    attachments.push(attachment);
                }
                Err(e @ E2eError::NoActiveEntry(_)) => return Err(e),
                Err(e) => {
                    let err = E2eError::DiagnosticsCapture {
                        artifact: format!("{:?}", kind),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                    sink.log(entry, LogLevel::Warning, err.to_string())?;
                }
            }
        }

        Ok(attachments)
    }
}

fn step<T>(artifact: &str, result: E2eResult<T>, warnings: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            let err = E2eError::DiagnosticsCapture {
                artifact: artifact.to_string(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            warnings.push(err.to_string());
            None
        }
    }
}
