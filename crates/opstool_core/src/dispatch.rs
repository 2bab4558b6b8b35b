use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::Document;
use crate::edit::{Edit, apply};
use crate::error::StoreError;
use crate::repo::ArtifactStore;
use crate::wiki::{CommitPrecondition, PageStoreMut};

/// The JSON command convention: `{"action": ..., "parameters": {...}}`
/// read from stdin. The action set is a closed enum, so an unknown
/// action fails at decode time instead of falling through at runtime.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "parameters", rename_all = "snake_case")]
pub enum Command {
    CreatePage {
        page_title: String,
        content: String,
        summary: String,
    },
    EditPage {
        page_title: String,
        edit: Edit,
        summary: Option<String>,
    },
    PutArtifact {
        repo_path: String,
        content: String,
        commit_message: String,
    },
}

impl Command {
    pub fn action_name(&self) -> &'static str {
        match self {
            Command::CreatePage { .. } => "create_page",
            Command::EditPage { .. } => "edit_page",
            Command::PutArtifact { .. } => "put_artifact",
        }
    }
}

pub fn parse_command(input: &str) -> Result<Command> {
    serde_json::from_str(input).context("invalid command structure")
}

/// Single JSON object reported on stdout when a dispatched command
/// finishes.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub status: &'static str,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DispatchOutcome {
    pub fn success(action: &str, result: Value) -> Self {
        Self {
            status: "success",
            action: action.to_string(),
            result: Some(result),
            error_message: None,
        }
    }

    pub fn failure(action: &str, message: String) -> Self {
        Self {
            status: "failure",
            action: action.to_string(),
            result: None,
            error_message: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Execute one command against pre-authenticated store handles. Errors
/// never escape: they become failure outcomes, mirroring the all-or-
/// nothing contract of the underlying edits.
pub fn execute(
    command: Command,
    store: &mut dyn PageStoreMut,
    artifacts: &dyn ArtifactStore,
) -> DispatchOutcome {
    let action = command.action_name();
    match run(command, store, artifacts) {
        Ok(result) => DispatchOutcome::success(action, result),
        Err(error) => DispatchOutcome::failure(action, format!("{error:#}")),
    }
}

fn run(
    command: Command,
    store: &mut dyn PageStoreMut,
    artifacts: &dyn ArtifactStore,
) -> Result<Value> {
    match command {
        Command::CreatePage {
            page_title,
            content,
            summary,
        } => {
            if store.exists(&page_title)? {
                return Err(StoreError::PageAlreadyExists { title: page_title }.into());
            }
            let receipt = store.commit(&page_title, &content, &summary, CommitPrecondition::None)?;
            Ok(json!({
                "page_title": page_title,
                "revision_id": receipt.revision_id,
            }))
        }
        Command::EditPage {
            page_title,
            edit,
            summary,
        } => {
            let summary =
                summary.unwrap_or_else(|| format!("opstool dispatch: {}", edit.describe()));
            let page = store.fetch(&page_title)?;
            let base_revision = page.revision_id;
            let doc = Document::parse(page.content)
                .with_context(|| format!("failed to parse {page_title}"))?;
            let output = apply(&doc, &edit)?;
            if output == doc.raw() {
                return Ok(json!({
                    "page_title": page_title,
                    "unchanged": true,
                }));
            }
            let receipt = store.commit(
                &page_title,
                &output,
                &summary,
                CommitPrecondition::BaseRevision(base_revision),
            )?;
            Ok(json!({
                "page_title": page_title,
                "revision_id": receipt.revision_id,
            }))
        }
        Command::PutArtifact {
            repo_path,
            content,
            commit_message,
        } => match artifacts.put_file(&repo_path, &content, &commit_message)? {
            Some(commit_id) => Ok(json!({
                "repo_path": repo_path,
                "commit_id": commit_id,
            })),
            None => Ok(json!({
                "repo_path": repo_path,
                "unchanged": true,
            })),
        },
    }
}
