use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;

use crate::config::ToolConfig;

/// Remote artifact store contract: create-or-update one file with a
/// commit message, returning the commit id (None when nothing changed).
pub trait ArtifactStore {
    fn put_file(&self, path: &str, content: &str, message: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct GitWorkspaceConfig {
    pub repo_path: PathBuf,
    pub repo_name: String,
    pub default_branch: String,
    pub token: Option<String>,
}

impl GitWorkspaceConfig {
    pub fn from_config(config: &ToolConfig) -> Result<Self> {
        let repo_name = config
            .repo_name()
            .context("no repository configured (set GITHUB_REPO or [repo] name)")?;
        let workspace = config
            .repo_workspace()
            .context("no workspace configured (set OPSTOOL_REPO_WORKSPACE or [repo] workspace)")?;
        Ok(Self {
            repo_path: PathBuf::from(workspace),
            repo_name,
            default_branch: config.repo_default_branch(),
            token: non_empty_env("GITHUB_TOKEN"),
        })
    }
}

/// A local clone of the artifact repository, driven through `git` and
/// `gh` subprocesses. All file writes are confined to the clone.
pub struct GitWorkspace {
    config: GitWorkspaceConfig,
}

impl GitWorkspace {
    pub fn new(config: GitWorkspaceConfig) -> Result<Self> {
        if !config.repo_path.join(".git").exists() {
            bail!(
                "workspace is not a git clone: {}",
                config.repo_path.display()
            );
        }
        Ok(Self { config })
    }

    pub fn repo_path(&self) -> &Path {
        &self.config.repo_path
    }

    pub fn default_branch(&self) -> &str {
        &self.config.default_branch
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        self.run("git", args, false)
    }

    fn run(&self, program: &str, args: &[&str], with_gh_token: bool) -> Result<String> {
        let mut command = Command::new(program);
        command.args(args);
        command.current_dir(&self.config.repo_path);
        if with_gh_token && let Some(token) = &self.config.token {
            command.env("GH_TOKEN", token);
        }
        let output = command
            .output()
            .with_context(|| format!("failed to execute {program}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            bail!(
                "{program} {} failed: {}",
                args.first().copied().unwrap_or(""),
                self.redact(stderr.trim())
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn redact(&self, text: &str) -> String {
        match &self.config.token {
            Some(token) if !token.is_empty() => text.replace(token.as_str(), "***"),
            _ => text.to_string(),
        }
    }

    fn push_url(&self) -> String {
        match &self.config.token {
            Some(token) if !token.is_empty() => {
                format!("https://{token}@github.com/{}.git", self.config.repo_name)
            }
            _ => "origin".to_string(),
        }
    }

    pub fn fetch_origin(&self) -> Result<()> {
        self.run_git(&["fetch", "origin"])?;
        Ok(())
    }

    /// Create `branch` off the remote default branch and switch to it.
    pub fn start_branch(&self, branch: &str) -> Result<()> {
        self.fetch_origin()?;
        let base = format!("origin/{}", self.config.default_branch);
        self.run_git(&["checkout", "-B", branch, &base])?;
        Ok(())
    }

    /// Reset the local default branch to its remote state and switch to
    /// it.
    pub fn sync_default_branch(&self) -> Result<()> {
        self.fetch_origin()?;
        let base = format!("origin/{}", self.config.default_branch);
        self.run_git(&["checkout", "-B", &self.config.default_branch, &base])?;
        Ok(())
    }

    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run_git(&["checkout", branch])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run_git(&["branch", "-D", branch])?;
        Ok(())
    }

    pub fn write_file(&self, relative: &str, content: &str) -> Result<PathBuf> {
        validate_workspace_relative(relative)?;
        let absolute = self.config.repo_path.join(relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&absolute, content)
            .with_context(|| format!("failed to write {}", absolute.display()))?;
        Ok(absolute)
    }

    pub fn has_changes(&self, pathspec: &str) -> Result<bool> {
        let status = self.run_git(&["status", "--porcelain", "--", pathspec])?;
        Ok(!status.is_empty())
    }

    pub fn stage(&self, pathspec: &str) -> Result<()> {
        self.run_git(&["add", "--", pathspec])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<String> {
        self.run_git(&["commit", "-m", message])?;
        self.run_git(&["rev-parse", "HEAD"])
    }

    pub fn push(&self, branch: &str) -> Result<()> {
        let url = self.push_url();
        self.run_git(&["push", &url, branch])?;
        Ok(())
    }

    pub fn open_pull_request(&self, title: &str, body: &str, branch: &str) -> Result<String> {
        self.run(
            "gh",
            &[
                "pr",
                "create",
                "--title",
                title,
                "--body",
                body,
                "--base",
                &self.config.default_branch,
                "--head",
                branch,
            ],
            true,
        )
    }
}

impl ArtifactStore for GitWorkspace {
    fn put_file(&self, path: &str, content: &str, message: &str) -> Result<Option<String>> {
        self.sync_default_branch()?;
        self.write_file(path, content)?;
        if !self.has_changes(path)? {
            return Ok(None);
        }
        self.stage(path)?;
        let commit_id = self.commit(message)?;
        self.push(&self.config.default_branch)?;
        Ok(Some(commit_id))
    }
}

fn validate_workspace_relative(relative: &str) -> Result<()> {
    let path = Path::new(relative);
    if path.is_absolute() {
        bail!("workspace path must be relative: {relative}");
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            bail!("workspace path must not escape the clone: {relative}");
        }
    }
    Ok(())
}

/// Read-only client for the hosted repository's contents API, used to
/// refresh a local file from the repository head.
pub struct GitHubClient {
    client: Client,
    repo_name: String,
    token: Option<String>,
    user_agent: String,
}

impl GitHubClient {
    pub fn from_config(config: &ToolConfig) -> Result<Self> {
        let repo_name = config
            .repo_name()
            .context("no repository configured (set GITHUB_REPO or [repo] name)")?;
        let client = Client::builder()
            .timeout(Duration::from_millis(30_000))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            client,
            repo_name,
            token: non_empty_env("GITHUB_TOKEN"),
            user_agent: config.user_agent(),
        })
    }

    /// Fetch one file's raw content from the repository head.
    pub fn fetch_file(&self, path: &str) -> Result<String> {
        let url = format!(
            "https://api.github.com/repos/{}/contents/{}",
            self.repo_name, path
        );
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.raw+json")
            .header("User-Agent", self.user_agent.clone());
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request
            .send()
            .with_context(|| format!("failed to fetch {path} from {}", self.repo_name))?;
        let status = response.status();
        if status.as_u16() == 404 {
            bail!("file {path} not found in repository {}", self.repo_name);
        }
        if !status.is_success() {
            bail!("GitHub API returned HTTP {status} for {path}");
        }
        response
            .text()
            .with_context(|| format!("failed to read contents of {path}"))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_paths_must_stay_inside_the_clone() {
        assert!(validate_workspace_relative("Roadmaps/Alpha.mw").is_ok());
        assert!(validate_workspace_relative("deep/nested/file.mw").is_ok());
        assert!(validate_workspace_relative("/etc/passwd").is_err());
        assert!(validate_workspace_relative("../outside.mw").is_err());
        assert!(validate_workspace_relative("a/../../b").is_err());
    }

    #[test]
    fn push_url_redacts_into_origin_without_token() {
        let workspace = GitWorkspace {
            config: GitWorkspaceConfig {
                repo_path: PathBuf::from("/tmp/clone"),
                repo_name: "example/ops-archive".to_string(),
                default_branch: "main".to_string(),
                token: None,
            },
        };
        assert_eq!(workspace.push_url(), "origin");

        let with_token = GitWorkspace {
            config: GitWorkspaceConfig {
                repo_path: PathBuf::from("/tmp/clone"),
                repo_name: "example/ops-archive".to_string(),
                default_branch: "main".to_string(),
                token: Some("secret".to_string()),
            },
        };
        assert_eq!(
            with_token.push_url(),
            "https://secret@github.com/example/ops-archive.git"
        );
        assert_eq!(with_token.redact("push to secret failed"), "push to *** failed");
    }
}
