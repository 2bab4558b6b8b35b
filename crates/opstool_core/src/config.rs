use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "opstool/0.1";
pub const DEFAULT_ARTICLE_PATH: &str = "/wiki/$1";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_BACKUP_DIR: &str = "Roadmaps";
pub const DEFAULT_LLM_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_LLM_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ToolConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub repo: RepoSection,
    #[serde(default)]
    pub roadmap: RoadmapSection,
    #[serde(default)]
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub article_path: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RepoSection {
    /// Hosted repository in `owner/name` form.
    pub name: Option<String>,
    /// Local clone the backup and artifact workflows operate in.
    pub workspace: Option<String>,
    pub default_branch: Option<String>,
    pub backup_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RoadmapSection {
    pub categories: Option<Vec<String>>,
    pub template: Option<String>,
    pub id_field: Option<String>,
    pub operation_field: Option<String>,
    pub index_page: Option<String>,
    pub index_footer: Option<String>,
    pub session_log_prefix: Option<String>,
    pub survey_namespace: Option<i32>,
    pub survey_prefix: Option<String>,
    pub survey_suffix: Option<String>,
    pub survey_keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct LlmSection {
    pub api_url: Option<String>,
    pub model: Option<String>,
}

impl ToolConfig {
    /// Resolve the wiki API URL: env `WIKI_API_URL` > config > None.
    pub fn api_url(&self) -> Option<String> {
        if let Some(value) = non_empty_env("WIKI_API_URL") {
            return Some(value);
        }
        self.wiki.api_url.clone()
    }

    /// Resolve the wiki base URL: env `WIKI_URL` > config > derived from
    /// the API URL.
    pub fn wiki_url(&self) -> Option<String> {
        if let Some(value) = non_empty_env("WIKI_URL") {
            return Some(value);
        }
        if let Some(url) = &self.wiki.url {
            return Some(url.clone());
        }
        self.api_url().and_then(|api| derive_wiki_url(&api))
    }

    pub fn user_agent(&self) -> String {
        if let Some(value) = non_empty_env("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn article_path(&self) -> String {
        if let Some(value) = non_empty_env("WIKI_ARTICLE_PATH") {
            return value;
        }
        self.wiki
            .article_path
            .clone()
            .unwrap_or_else(|| DEFAULT_ARTICLE_PATH.to_string())
    }

    /// Full article URL template containing `$1`, or None when no wiki
    /// base URL is known.
    pub fn article_url_template(&self) -> Option<String> {
        let base = self.wiki_url()?;
        Some(format!("{}{}", base.trim_end_matches('/'), self.article_path()))
    }

    /// Canonical page URL, or None when no wiki base URL is known.
    pub fn page_url(&self, title: &str) -> Option<String> {
        let template = self.article_url_template()?;
        Some(template.replace("$1", &title.trim().replace(' ', "_")))
    }

    /// Hosted repository name: env `GITHUB_REPO` > config.
    pub fn repo_name(&self) -> Option<String> {
        if let Some(value) = non_empty_env("GITHUB_REPO") {
            return Some(value);
        }
        self.repo.name.clone()
    }

    /// Local workspace clone: env `OPSTOOL_REPO_WORKSPACE` > config.
    pub fn repo_workspace(&self) -> Option<String> {
        if let Some(value) = non_empty_env("OPSTOOL_REPO_WORKSPACE") {
            return Some(value);
        }
        self.repo.workspace.clone()
    }

    pub fn repo_default_branch(&self) -> String {
        self.repo
            .default_branch
            .clone()
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }

    pub fn backup_dir(&self) -> String {
        self.repo
            .backup_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string())
    }

    pub fn roadmap_categories(&self) -> Vec<String> {
        self.roadmap.categories.clone().unwrap_or_else(|| {
            vec![
                "Initiative roadmaps".to_string(),
                "Operation roadmaps".to_string(),
            ]
        })
    }

    pub fn roadmap_template(&self) -> String {
        self.roadmap
            .template
            .clone()
            .unwrap_or_else(|| "OpsLoop".to_string())
    }

    pub fn roadmap_id_field(&self) -> String {
        self.roadmap
            .id_field
            .clone()
            .unwrap_or_else(|| "loop_id".to_string())
    }

    pub fn roadmap_operation_field(&self) -> String {
        self.roadmap
            .operation_field
            .clone()
            .unwrap_or_else(|| "operation".to_string())
    }

    pub fn index_page(&self) -> String {
        self.roadmap
            .index_page
            .clone()
            .unwrap_or_else(|| "Project:Master document index".to_string())
    }

    pub fn index_footer(&self) -> Option<String> {
        self.roadmap.index_footer.clone()
    }

    pub fn session_log_prefix(&self) -> String {
        self.roadmap
            .session_log_prefix
            .clone()
            .unwrap_or_else(|| "Project:Session log".to_string())
    }

    pub fn survey_namespace(&self) -> i32 {
        self.roadmap.survey_namespace.unwrap_or(4)
    }

    pub fn survey_prefix(&self) -> String {
        self.roadmap
            .survey_prefix
            .clone()
            .unwrap_or_else(|| "Project:WikiProject ".to_string())
    }

    pub fn survey_suffix(&self) -> String {
        self.roadmap
            .survey_suffix
            .clone()
            .unwrap_or_else(|| "/Roadmap".to_string())
    }

    pub fn survey_keywords(&self) -> Vec<String> {
        self.roadmap
            .survey_keywords
            .clone()
            .unwrap_or_else(|| vec!["Roadmap".to_string(), "Loop log".to_string()])
    }

    pub fn llm_api_url(&self) -> String {
        if let Some(value) = non_empty_env("LLM_API_URL") {
            return value;
        }
        self.llm
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string())
    }

    pub fn llm_model(&self) -> String {
        if let Some(value) = non_empty_env("LLM_MODEL") {
            return value;
        }
        self.llm
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string())
    }
}

/// Load a ToolConfig from a TOML file. Returns defaults if the file does
/// not exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

/// Derive the wiki base URL from an API URL by stripping `/api.php` or
/// `/w/api.php`.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/api.php")
        .or_else(|| trimmed.strip_suffix("/w/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() { None } else { Some(result) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_urls() {
        let config = ToolConfig::default();
        assert!(config.wiki.url.is_none());
        assert!(config.wiki.api_url.is_none());
        assert!(config.repo.name.is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/opstool.toml")).expect("load config");
        assert_eq!(config, ToolConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("opstool.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
url = "https://wiki.example.org"
api_url = "https://wiki.example.org/w/api.php"
article_path = "/wiki/$1"
user_agent = "test-agent/1.0"

[repo]
name = "example/ops-archive"
workspace = "/srv/ops-archive"
default_branch = "trunk"
backup_dir = "Roadmaps"

[roadmap]
categories = ["Operation roadmaps"]
template = "OpsLoop"
id_field = "loop_id"
index_page = "Project:Index"

[llm]
model = "gemini-1.5-pro"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.wiki.url.as_deref(), Some("https://wiki.example.org"));
        assert_eq!(config.repo.name.as_deref(), Some("example/ops-archive"));
        assert_eq!(config.repo_default_branch(), "trunk");
        assert_eq!(config.roadmap_categories(), vec!["Operation roadmaps"]);
        assert_eq!(config.index_page(), "Project:Index");
        assert_eq!(config.llm.model.as_deref(), Some("gemini-1.5-pro"));
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("opstool.toml");
        fs::write(&config_path, "[wiki]\nurl = \"https://w.example\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.wiki.url.as_deref(), Some("https://w.example"));
        assert_eq!(config.roadmap_template(), "OpsLoop");
        assert_eq!(config.backup_dir(), "Roadmaps");
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("opstool.toml");
        fs::write(&config_path, "[wiki\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn derive_wiki_url_strips_api_php() {
        assert_eq!(
            derive_wiki_url("https://wiki.example.org/api.php"),
            Some("https://wiki.example.org".to_string())
        );
        assert_eq!(
            derive_wiki_url("https://wiki.example.org/w/api.php"),
            Some("https://wiki.example.org".to_string())
        );
        assert_eq!(derive_wiki_url("/api.php"), None);
    }

    #[test]
    fn page_url_substitutes_title_with_underscores() {
        let mut config = ToolConfig::default();
        config.wiki.url = Some("https://wiki.example.org".to_string());
        assert_eq!(
            config.page_url("Project:Session log/2026-08-05/Morning"),
            Some(
                "https://wiki.example.org/wiki/Project:Session_log/2026-08-05/Morning".to_string()
            )
        );
    }

    #[test]
    fn roadmap_defaults_cover_discovery_and_survey() {
        let config = ToolConfig::default();
        assert_eq!(config.roadmap_id_field(), "loop_id");
        assert_eq!(config.roadmap_operation_field(), "operation");
        assert_eq!(config.survey_namespace(), 4);
        assert_eq!(config.survey_suffix(), "/Roadmap");
        assert!(config.index_footer().is_none());
    }
}
