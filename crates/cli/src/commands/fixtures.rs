//! Fixture Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use taskwright_common::HarnessConfig;
use taskwright_e2e::CleanupReport;

use super::fixture_store;
use crate::output::{print_item, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum FixturesCommands {
    /// Count task records left behind under a title prefix
    Audit {
        /// Title prefix owned by a test
        #[arg(short, long)]
        prefix: String,
    },

    /// Delete every task record under a title prefix
    Purge {
        /// Title prefix owned by a test
        #[arg(short, long)]
        prefix: String,
    },
}

#[derive(Serialize)]
pub struct PrefixAudit {
    pub prefix: String,
    pub remaining: usize,
}

impl TableDisplay for PrefixAudit {
    fn headers() -> Vec<&'static str> {
        vec!["Prefix", "Remaining"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.prefix.clone(), self.remaining.to_string()]
    }
}

#[derive(Serialize)]
pub struct PurgeSummary {
    pub prefix: String,
    pub deleted: usize,
    pub dangling: usize,
    pub warnings: Vec<String>,
}

impl From<CleanupReport> for PurgeSummary {
    fn from(report: CleanupReport) -> Self {
        Self {
            prefix: report.prefix,
            deleted: report.deleted,
            dangling: report.dangling,
            warnings: report.warnings,
        }
    }
}

impl TableDisplay for PurgeSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Prefix", "Deleted", "Dangling", "Warnings"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.prefix.clone(),
            self.deleted.to_string(),
            self.dangling.to_string(),
            self.warnings.join("; "),
        ]
    }
}

/// `Ok(false)` when records remain under the prefix
pub fn execute(cmd: FixturesCommands, config: &HarnessConfig, format: OutputFormat) -> Result<bool> {
    let store = fixture_store(config);

    match cmd {
        FixturesCommands::Audit { prefix } => {
            let remaining = store.count_by_prefix(&prefix)?;
            print_item(&PrefixAudit { prefix, remaining }, format);
            Ok(remaining == 0)
        }
        FixturesCommands::Purge { prefix } => {
            let report = store.cleanup(&prefix);
            let clean = report.is_clean();
            let summary = PurgeSummary::from(report);
            print_item(&summary, format);
            if clean {
                print_success(&format!("Purged {} record(s)", summary.deleted));
            } else {
                print_warning("Purge left records or warnings behind");
            }
            Ok(clean)
        }
    }
}
