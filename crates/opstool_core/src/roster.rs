use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;

use crate::document::Document;
use crate::error::StoreError;
use crate::wiki::{CommitPrecondition, PageStore, PageStoreMut};

/// Where roadmap pages live and how their loop template is shaped.
#[derive(Debug, Clone)]
pub struct RoadmapTargets {
    pub categories: Vec<String>,
    pub template: String,
    pub id_field: String,
    pub operation_field: String,
}

/// Operation code (uppercased) to roadmap page title, discovered by
/// reading the loop template off every page of the discovery categories.
#[derive(Debug, Default)]
pub struct OperationMap {
    pub entries: BTreeMap<String, String>,
    pub errors: Vec<String>,
}

pub fn build_operation_map(
    store: &mut dyn PageStore,
    targets: &RoadmapTargets,
) -> Result<OperationMap, StoreError> {
    let mut map = OperationMap::default();
    let mut seen = BTreeSet::new();

    for category in &targets.categories {
        for title in store.category_members(category)? {
            if !seen.insert(title.clone()) {
                continue;
            }
            let page = match store.fetch(&title) {
                Ok(page) => page,
                Err(StoreError::PageMissing { title }) => {
                    map.errors.push(format!("{title}: listed but missing"));
                    continue;
                }
                Err(error) => return Err(error),
            };
            let doc = match Document::parse(page.content) {
                Ok(doc) => doc,
                Err(error) => {
                    map.errors.push(format!("{title}: {error}"));
                    continue;
                }
            };
            for template in doc.templates() {
                if !doc
                    .template_name(template)
                    .eq_ignore_ascii_case(&targets.template)
                {
                    continue;
                }
                let operation = template
                    .fields
                    .iter()
                    .find(|field| doc.field_name(field) == Some(targets.operation_field.as_str()))
                    .map(|field| doc.field_value(field).trim().to_uppercase());
                if let Some(operation) = operation
                    && !operation.is_empty()
                {
                    map.entries.insert(operation, title.clone());
                }
            }
        }
    }
    Ok(map)
}

#[derive(Debug, Clone)]
pub struct RosterOptions {
    pub index_page: String,
    pub footer: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub operation: String,
    pub page_title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterReport {
    pub entries: Vec<RosterEntry>,
    pub index_page: String,
    pub committed: bool,
    pub unchanged: bool,
    pub revision_id: Option<i64>,
    pub errors: Vec<String>,
    pub request_count: usize,
}

/// Render the master document index as a wikitext definition list.
pub fn render_master_index(entries: &BTreeMap<String, String>, footer: Option<&str>) -> String {
    let mut out = String::from("; Roadmaps:\n");
    let lines: Vec<String> = entries
        .iter()
        .map(|(operation, title)| format!("* [[{title}]] - {operation} roadmap"))
        .collect();
    out.push_str(&lines.join("\n"));
    if let Some(footer) = footer {
        out.push('\n');
        out.push_str(footer);
    }
    out
}

/// Rebuild the operation map and commit the rendered index page when its
/// content changed.
pub fn update_master_index(
    store: &mut dyn PageStoreMut,
    targets: &RoadmapTargets,
    options: &RosterOptions,
) -> Result<RosterReport> {
    let map = build_operation_map(&mut *store, targets)?;
    let rendered = render_master_index(&map.entries, options.footer.as_deref());

    let mut report = RosterReport {
        entries: map
            .entries
            .iter()
            .map(|(operation, page_title)| RosterEntry {
                operation: operation.clone(),
                page_title: page_title.clone(),
            })
            .collect(),
        index_page: options.index_page.clone(),
        committed: false,
        unchanged: false,
        revision_id: None,
        errors: map.errors,
        request_count: 0,
    };

    let current = match store.fetch(&options.index_page) {
        Ok(page) => Some(page),
        Err(StoreError::PageMissing { .. }) => None,
        Err(error) => return Err(error.into()),
    };

    if current.as_ref().is_some_and(|page| page.content == rendered) {
        report.unchanged = true;
        report.request_count = store.request_count();
        return Ok(report);
    }
    if options.dry_run {
        report.request_count = store.request_count();
        return Ok(report);
    }

    let precondition = match &current {
        Some(page) => CommitPrecondition::BaseRevision(page.revision_id),
        None => CommitPrecondition::None,
    };
    let receipt = store.commit(
        &options.index_page,
        &rendered,
        "Update master document index (automated)",
        precondition,
    )?;
    report.committed = !receipt.no_change;
    report.revision_id = receipt.revision_id;
    report.request_count = store.request_count();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wiki::fake::FakePageStore;

    fn targets() -> RoadmapTargets {
        RoadmapTargets {
            categories: vec![
                "Initiative roadmaps".to_string(),
                "Operation roadmaps".to_string(),
            ],
            template: "OpsLoop".to_string(),
            id_field: "loop_id".to_string(),
            operation_field: "operation".to_string(),
        }
    }

    fn seeded_store() -> FakePageStore {
        let mut store = FakePageStore::new();
        store.insert_page(
            "Project:WikiProject Alpha/Michael/Roadmap",
            "{{OpsLoop|loop_id=ALPHA-L001|operation=alpha|status=open}}",
        );
        store.insert_page(
            "Project:WikiProject Beta/Roadmap",
            "{{OpsLoop|loop_id=BETA-L001|operation=Beta}}",
        );
        store.set_category(
            "Operation roadmaps",
            &["Project:WikiProject Alpha/Michael/Roadmap"],
        );
        store.set_category("Initiative roadmaps", &["Project:WikiProject Beta/Roadmap"]);
        store
    }

    #[test]
    fn operation_map_uppercases_and_maps_to_titles() {
        let mut store = seeded_store();
        let map = build_operation_map(&mut store, &targets()).expect("map");
        assert_eq!(
            map.entries.get("ALPHA").map(String::as_str),
            Some("Project:WikiProject Alpha/Michael/Roadmap")
        );
        assert_eq!(
            map.entries.get("BETA").map(String::as_str),
            Some("Project:WikiProject Beta/Roadmap")
        );
        assert!(map.errors.is_empty());
    }

    #[test]
    fn unparsable_pages_are_reported_and_skipped() {
        let mut store = seeded_store();
        store.insert_page("Project:Broken/Roadmap", "{{OpsLoop|operation=gamma");
        store.set_category(
            "Operation roadmaps",
            &[
                "Project:WikiProject Alpha/Michael/Roadmap",
                "Project:Broken/Roadmap",
            ],
        );
        let map = build_operation_map(&mut store, &targets()).expect("map");
        assert_eq!(map.entries.len(), 2);
        assert_eq!(map.errors.len(), 1);
        assert!(map.errors[0].starts_with("Project:Broken/Roadmap:"));
    }

    #[test]
    fn rendered_index_is_sorted_and_carries_footer() {
        let mut entries = BTreeMap::new();
        entries.insert("BETA".to_string(), "Page B".to_string());
        entries.insert("ALPHA".to_string(), "Page A".to_string());
        let rendered = render_master_index(&entries, Some("; Rules:\n* [[Project:Rules]]"));
        assert_eq!(
            rendered,
            "; Roadmaps:\n* [[Page A]] - ALPHA roadmap\n* [[Page B]] - BETA roadmap\n; Rules:\n* [[Project:Rules]]"
        );
    }

    #[test]
    fn index_update_commits_once_then_reports_unchanged() {
        let mut store = seeded_store();
        let options = RosterOptions {
            index_page: "Project:Master document index".to_string(),
            footer: None,
            dry_run: false,
        };

        let first = update_master_index(&mut store, &targets(), &options).expect("first");
        assert!(first.committed);
        assert_eq!(store.commits.len(), 1);

        let second = update_master_index(&mut store, &targets(), &options).expect("second");
        assert!(second.unchanged);
        assert!(!second.committed);
        assert_eq!(store.commits.len(), 1);
    }

    #[test]
    fn dry_run_never_commits() {
        let mut store = seeded_store();
        let options = RosterOptions {
            index_page: "Project:Master document index".to_string(),
            footer: None,
            dry_run: true,
        };
        let report = update_master_index(&mut store, &targets(), &options).expect("dry run");
        assert!(!report.committed);
        assert!(store.commits.is_empty());
    }
}
