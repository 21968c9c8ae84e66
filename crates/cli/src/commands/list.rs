//! List Commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use taskwright_e2e::TestSpec;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Directory holding YAML test specs
    #[arg(short, long, default_value = "specs")]
    pub specs: PathBuf,

    /// Only specs carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,
}

/// One line of the spec listing
#[derive(Serialize)]
pub struct SpecSummary {
    pub name: String,
    pub tags: Vec<String>,
    pub steps: usize,
    pub fixtures: usize,
    pub login: bool,
    pub description: String,
}

impl From<&TestSpec> for SpecSummary {
    fn from(spec: &TestSpec) -> Self {
        Self {
            name: spec.name.clone(),
            tags: spec.tags.clone(),
            steps: spec.steps.len(),
            fixtures: spec.fixtures.len(),
            login: spec.login.is_some(),
            description: spec.description.clone(),
        }
    }
}

impl TableDisplay for SpecSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Tags", "Steps", "Fixtures", "Login", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.tags.join(", "),
            self.steps.to_string(),
            self.fixtures.to_string(),
            if self.login { "yes" } else { "no" }.to_string(),
            self.description.clone(),
        ]
    }
}

/// Specs under `dir`, optionally only those tagged `tag`, as summaries
pub fn summarize(dir: &Path, tag: Option<&str>) -> Result<Vec<SpecSummary>> {
    let specs = TestSpec::load_all(dir).with_context(|| format!("loading specs from {}", dir.display()))?;
    let summaries = match tag {
        Some(tag) => TestSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .map(SpecSummary::from)
            .collect(),
        None => specs.iter().map(SpecSummary::from).collect(),
    };
    Ok(summaries)
}

pub fn execute(args: ListArgs, format: OutputFormat) -> Result<bool> {
    let summaries = summarize(&args.specs, args.tag.as_deref())?;
    print_list(&summaries, format);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_filters_by_tag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a_search.yaml"),
            "name: search\ntags: [search]\nsteps:\n  - action: log\n    message: hi\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b_login.yml"),
            "name: login\ntags: [auth]\nlogin: {}\nsteps: []\n",
        )
        .unwrap();

        let all = summarize(dir.path(), None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].login);

        let search = summarize(dir.path(), Some("search")).unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].row()[0], "search");
        assert_eq!(search[0].steps, 1);
    }
}
