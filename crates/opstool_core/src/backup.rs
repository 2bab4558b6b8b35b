use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::repo::GitWorkspace;
use crate::wiki::PageStore;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub categories: Vec<String>,
    pub backup_dir: String,
    /// Timestamp fragment used in the branch name and commit message.
    pub stamp: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupPage {
    pub title: String,
    pub file_name: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub discovered: usize,
    pub pages: Vec<BackupPage>,
    pub branch: Option<String>,
    pub committed: bool,
    pub commit_id: Option<String>,
    pub pull_request_url: Option<String>,
    pub unchanged: bool,
    pub errors: Vec<String>,
    pub request_count: usize,
}

/// Back up every page of the discovery categories into the artifact
/// repository: write the page bodies onto a fresh branch, and when
/// anything changed, commit, push and open a pull request for review.
pub fn backup_roadmaps(
    store: &mut dyn PageStore,
    workspace: Option<&GitWorkspace>,
    options: &BackupOptions,
) -> Result<BackupReport> {
    let mut report = BackupReport {
        discovered: 0,
        pages: Vec::new(),
        branch: None,
        committed: false,
        commit_id: None,
        pull_request_url: None,
        unchanged: false,
        errors: Vec::new(),
        request_count: 0,
    };

    let mut titles = Vec::new();
    let mut seen = BTreeSet::new();
    for category in &options.categories {
        for title in store.category_members(category)? {
            if seen.insert(title.clone()) {
                titles.push(title);
            }
        }
    }
    report.discovered = titles.len();

    let mut contents = Vec::new();
    for title in &titles {
        match store.fetch(title) {
            Ok(page) => {
                let file_name = backup_file_name(&page.title);
                report.pages.push(BackupPage {
                    title: page.title.clone(),
                    file_name: file_name.clone(),
                    content_hash: content_hash(&page.content),
                });
                contents.push((file_name, page.content));
            }
            Err(StoreError::PageMissing { title }) => {
                report.errors.push(format!("{title}: page vanished during backup"));
            }
            Err(error) => return Err(error.into()),
        }
    }

    if options.dry_run {
        report.request_count = store.request_count();
        return Ok(report);
    }
    let Some(workspace) = workspace else {
        bail!("backup requires a configured git workspace");
    };

    let branch = format!("auto-backup/{}", options.stamp);
    workspace.start_branch(&branch)?;
    report.branch = Some(branch.clone());

    for (file_name, content) in &contents {
        workspace
            .write_file(&format!("{}/{}", options.backup_dir, file_name), content)
            .with_context(|| format!("failed to write backup file {file_name}"))?;
    }

    if !workspace.has_changes(&options.backup_dir)? {
        workspace.checkout(workspace.default_branch())?;
        workspace.delete_branch(&branch)?;
        report.unchanged = true;
        report.request_count = store.request_count();
        return Ok(report);
    }

    workspace.stage(&options.backup_dir)?;
    let commit_id = workspace.commit(&format!(
        "roadmaps: automated backup for {}",
        options.stamp
    ))?;
    workspace.push(&branch)?;
    let pull_request_url = workspace.open_pull_request(
        &format!("Automated roadmap backup: {}", options.stamp),
        "Automated periodic backup of roadmap pages from the wiki. Please review and merge.",
        &branch,
    )?;
    workspace.checkout(workspace.default_branch())?;
    workspace.delete_branch(&branch)?;

    report.committed = true;
    report.commit_id = Some(commit_id);
    report.pull_request_url = Some(pull_request_url);
    report.request_count = store.request_count();
    Ok(report)
}

/// Derive a workspace filename from a page title.
///
/// `Project:WikiProject Alpha/Michael/Roadmap` becomes `Alpha_Michael.mw`
/// and `Project:WikiProject Alpha/Roadmap` becomes `Alpha_Initiative.mw`;
/// anything else falls back to the full title with path separators
/// flattened.
pub fn backup_file_name(title: &str) -> String {
    let normalized = title.replace(' ', "_");
    if let Some(rest) = find_after(&normalized, "WikiProject_") {
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() == 3 && segments[2] == "Roadmap" && !segments[0].is_empty() {
            return format!("{}_{}.mw", segments[0], segments[1]);
        }
        if segments.len() == 2 && segments[1] == "Roadmap" && !segments[0].is_empty() {
            return format!("{}_Initiative.mw", segments[0]);
        }
    }
    format!("{}.mw", normalized.replace(':', "_").replace('/', "_"))
}

fn find_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.find(marker).map(|at| &text[at + marker.len()..])
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
