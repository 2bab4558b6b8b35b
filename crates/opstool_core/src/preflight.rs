use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::dates::is_valid_date;
use crate::document::Document;
use crate::locate::find_template;
use crate::roster::{RoadmapTargets, build_operation_map};
use crate::wiki::{CommitPrecondition, PageStoreMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionName {
    Morning,
    Noon,
    Afternoon,
    Evening,
    Night,
}

impl SessionName {
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        for candidate in [
            Self::Morning,
            Self::Noon,
            Self::Afternoon,
            Self::Evening,
            Self::Night,
        ] {
            if trimmed.eq_ignore_ascii_case(candidate.as_str()) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "Morning",
            Self::Noon => "Noon",
            Self::Afternoon => "Afternoon",
            Self::Evening => "Evening",
            Self::Night => "Night",
        }
    }
}

/// Loop ids are `OPERATION-LNNN`: an uppercase operation code, a dash,
/// and an `L`-prefixed loop number.
pub fn is_valid_loop_id(value: &str) -> bool {
    let Some((operation, loop_part)) = value.split_once('-') else {
        return false;
    };
    if operation.is_empty() || !operation.chars().all(|ch| ch.is_ascii_uppercase()) {
        return false;
    }
    let Some(digits) = loop_part.strip_prefix('L') else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
}

pub fn operation_of(loop_id: &str) -> &str {
    loop_id.split('-').next().unwrap_or(loop_id)
}

#[derive(Debug, Clone)]
pub struct PreflightOptions {
    /// Resolved `YYYY-MM-DD` date (callers translate "today" first).
    pub date: String,
    pub session: SessionName,
    pub loop_id: String,
    pub overwrite: bool,
    pub session_log_prefix: String,
    /// Article URL template containing `$1`, e.g.
    /// `https://wiki.example.org/wiki/$1`, used to link the roadmap page.
    pub article_url_template: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub page_title: String,
    pub roadmap_title: String,
    pub loop_id: String,
    pub created: bool,
    pub revision_id: Option<i64>,
    pub request_count: usize,
}

/// Bootstrap a session log page: validate operator input, pull the loop
/// record off its roadmap page, and create the log page seeded with the
/// session context.
pub fn preflight_session_log(
    store: &mut dyn PageStoreMut,
    targets: &RoadmapTargets,
    options: &PreflightOptions,
) -> Result<PreflightReport> {
    if !is_valid_date(&options.date) {
        bail!("invalid date: {} (expected YYYY-MM-DD)", options.date);
    }
    if !is_valid_loop_id(&options.loop_id) {
        bail!(
            "invalid loop id: {} (expected OPERATION-LNNN)",
            options.loop_id
        );
    }

    let operation = operation_of(&options.loop_id);
    let map = build_operation_map(&mut *store, targets)?;
    let roadmap_title = map
        .entries
        .get(operation)
        .cloned()
        .with_context(|| format!("operation for '{}' not found in any roadmap", options.loop_id))?;

    let page = store.fetch(&roadmap_title)?;
    let doc = Document::parse(page.content)
        .with_context(|| format!("failed to parse roadmap page {roadmap_title}"))?;
    let template = find_template(&doc, &targets.template, &targets.id_field, &options.loop_id)
        .with_context(|| format!("loop '{}' not found in '{roadmap_title}'", options.loop_id))?;
    let loop_record = doc.slice(template.span).to_string();

    let page_title = format!(
        "{}/{}/{}",
        options.session_log_prefix,
        options.date,
        options.session.as_str()
    );
    if store.exists(&page_title)? && !options.overwrite {
        bail!("session log page already exists: {page_title} (use --overwrite to replace it)");
    }

    let roadmap_url = options
        .article_url_template
        .as_ref()
        .map(|template| template.replace("$1", &roadmap_title.trim().replace(' ', "_")));
    let content = render_session_log(
        &options.loop_id,
        &options.date,
        options.session,
        &roadmap_title,
        roadmap_url.as_deref(),
        &loop_record,
    );
    let receipt = store.commit(
        &page_title,
        &content,
        &format!("Preflight: created session log for {}", options.loop_id),
        CommitPrecondition::None,
    )?;

    Ok(PreflightReport {
        page_title,
        roadmap_title,
        loop_id: options.loop_id.clone(),
        created: !receipt.no_change,
        revision_id: receipt.revision_id,
        request_count: store.request_count(),
    })
}

pub fn render_session_log(
    loop_id: &str,
    date: &str,
    session: SessionName,
    roadmap_title: &str,
    roadmap_url: Option<&str>,
    loop_record: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("== Session Context: {loop_id} ==\n"));
    out.push_str(&format!("'''Date:''' {date}\n"));
    out.push_str(&format!("'''Session:''' {}\n", session.as_str()));
    out.push_str(&format!("'''Loop ID:''' {loop_id}\n"));
    match roadmap_url {
        Some(url) => out.push_str(&format!(
            "'''Source roadmap:''' [[{roadmap_title}]] ([{url} link])\n\n"
        )),
        None => out.push_str(&format!("'''Source roadmap:''' [[{roadmap_title}]]\n\n")),
    }
    out.push_str(&format!("<pre>\n{loop_record}\n</pre>\n\n"));
    out.push_str("== Log Summary ==\n");
    out.push_str(
        "(To be updated after the session with tools built, challenges, changes, and costs)\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wiki::PageStore;
    use crate::wiki::fake::FakePageStore;

    fn targets() -> RoadmapTargets {
        RoadmapTargets {
            categories: vec!["Operation roadmaps".to_string()],
            template: "OpsLoop".to_string(),
            id_field: "loop_id".to_string(),
            operation_field: "operation".to_string(),
        }
    }

    fn options() -> PreflightOptions {
        PreflightOptions {
            date: "2026-08-05".to_string(),
            session: SessionName::Morning,
            loop_id: "ALPHA-L001".to_string(),
            overwrite: false,
            session_log_prefix: "Project:Session log".to_string(),
            article_url_template: None,
        }
    }

    fn seeded_store() -> FakePageStore {
        let mut store = FakePageStore::new();
        store.insert_page(
            "Project:WikiProject Alpha/Michael/Roadmap",
            "{{OpsLoop|loop_id=ALPHA-L001|operation=ALPHA|status=open}}",
        );
        store.set_category(
            "Operation roadmaps",
            &["Project:WikiProject Alpha/Michael/Roadmap"],
        );
        store
    }

    #[test]
    fn session_names_parse_case_insensitively() {
        assert_eq!(SessionName::parse("morning"), Some(SessionName::Morning));
        assert_eq!(SessionName::parse(" NIGHT "), Some(SessionName::Night));
        assert_eq!(SessionName::parse("midnight"), None);
    }

    #[test]
    fn loop_id_format_is_strict() {
        assert!(is_valid_loop_id("ALPHA-L001"));
        assert!(is_valid_loop_id("X-L1"));
        assert!(!is_valid_loop_id("alpha-L001"));
        assert!(!is_valid_loop_id("ALPHA-001"));
        assert!(!is_valid_loop_id("ALPHA-L"));
        assert!(!is_valid_loop_id("ALPHAL001"));
        assert!(!is_valid_loop_id("-L001"));
    }

    #[test]
    fn preflight_creates_the_session_log_page() {
        let mut store = seeded_store();
        let report = preflight_session_log(&mut store, &targets(), &options()).expect("preflight");
        assert!(report.created);
        assert_eq!(
            report.page_title,
            "Project:Session log/2026-08-05/Morning"
        );
        assert_eq!(store.commits.len(), 1);
        let committed = &store.commits[0];
        assert!(committed.content.contains("== Session Context: ALPHA-L001 =="));
        assert!(committed
            .content
            .contains("<pre>\n{{OpsLoop|loop_id=ALPHA-L001|operation=ALPHA|status=open}}\n</pre>"));
        assert!(committed.content.contains("== Log Summary =="));
    }

    #[test]
    fn existing_log_page_requires_overwrite() {
        let mut store = seeded_store();
        store.insert_page("Project:Session log/2026-08-05/Morning", "old log");

        let error =
            preflight_session_log(&mut store, &targets(), &options()).expect_err("must refuse");
        assert!(error.to_string().contains("already exists"));
        assert!(store.commits.is_empty());

        let mut allow = options();
        allow.overwrite = true;
        let report = preflight_session_log(&mut store, &targets(), &allow).expect("overwrite");
        assert!(report.created);
    }

    #[test]
    fn roadmap_link_carries_url_when_template_is_known() {
        let mut store = seeded_store();
        let mut with_url = options();
        with_url.article_url_template = Some("https://wiki.example.org/wiki/$1".to_string());
        preflight_session_log(&mut store, &targets(), &with_url).expect("preflight");
        let committed = &store.commits[0];
        assert!(committed.content.contains(
            "[[Project:WikiProject Alpha/Michael/Roadmap]] \
             ([https://wiki.example.org/wiki/Project:WikiProject_Alpha/Michael/Roadmap link])"
        ));
    }

    #[test]
    fn unknown_operation_is_an_error() {
        let mut store = seeded_store();
        let mut bad = options();
        bad.loop_id = "OMEGA-L001".to_string();
        let error = preflight_session_log(&mut store, &targets(), &bad).expect_err("must fail");
        assert!(error.to_string().contains("OMEGA-L001"));
    }

    #[test]
    fn invalid_inputs_fail_before_any_store_access() {
        let mut store = seeded_store();
        let mut bad = options();
        bad.date = "08/05/2026".to_string();
        assert!(preflight_session_log(&mut store, &targets(), &bad).is_err());
        assert_eq!(store.request_count(), 0);

        let mut bad = options();
        bad.loop_id = "nope".to_string();
        assert!(preflight_session_log(&mut store, &targets(), &bad).is_err());
        assert_eq!(store.request_count(), 0);
    }
}
