use anyhow::Result;
use serde::Serialize;

use crate::wiki::PageStore;

#[derive(Debug, Clone)]
pub struct SurveyOptions {
    pub namespace: i32,
    pub confident_prefix: String,
    pub confident_suffix: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SurveyReport {
    pub scanned: usize,
    pub confident: Vec<String>,
    pub uncertain: Vec<String>,
    pub errors: Vec<String>,
    pub request_count: usize,
}

/// Scan every page of the configured namespace and classify candidates:
/// confident when the normalized title matches the prefix/suffix
/// pattern, uncertain when it merely contains one of the keywords.
pub fn survey_candidates(
    store: &mut dyn PageStore,
    options: &SurveyOptions,
) -> Result<SurveyReport> {
    let titles = store.all_pages(options.namespace)?;

    let mut confident = Vec::new();
    let mut uncertain = Vec::new();
    for title in &titles {
        let normalized = title.replace('_', " ");
        if normalized.starts_with(&options.confident_prefix)
            && normalized.ends_with(&options.confident_suffix)
        {
            confident.push(title.clone());
        } else if options
            .keywords
            .iter()
            .any(|keyword| normalized.contains(keyword.as_str()))
        {
            uncertain.push(title.clone());
        }
    }
    confident.sort();
    uncertain.sort();

    Ok(SurveyReport {
        scanned: titles.len(),
        confident,
        uncertain,
        errors: Vec::new(),
        request_count: store.request_count(),
    })
}

/// Render the operator-facing report file.
pub fn render_survey_report(
    report: &SurveyReport,
    options: &SurveyOptions,
    generated_at: &str,
) -> String {
    let mut out = String::new();
    out.push_str("Roadmap Candidate Report\n");
    out.push_str(&format!("Generated: {generated_at}\n"));
    out.push_str(&format!("Scope: namespace {}\n", options.namespace));
    out.push_str(&format!("{}\n\n", "=".repeat(40)));

    out.push_str(&format!("Confident candidates ({})\n", report.confident.len()));
    out.push_str(&format!(
        "Pages matching the '{}...{}' pattern.\n",
        options.confident_prefix, options.confident_suffix
    ));
    out.push_str(&format!("{}\n", "-".repeat(40)));
    if report.confident.is_empty() {
        out.push_str("None found.\n");
    } else {
        for title in &report.confident {
            out.push_str(title);
            out.push('\n');
        }
    }
    out.push_str("\n\n");

    out.push_str(&format!("Uncertain candidates ({})\n", report.uncertain.len()));
    out.push_str(&format!(
        "Pages containing one of {:?} but not matching the confident pattern.\n",
        options.keywords
    ));
    out.push_str(&format!("{}\n", "-".repeat(40)));
    if report.uncertain.is_empty() {
        out.push_str("None found.\n");
    } else {
        for title in &report.uncertain {
            out.push_str(title);
            out.push('\n');
        }
    }
    out.push_str("\n\n");

    out.push_str(&format!("Errors encountered ({})\n", report.errors.len()));
    out.push_str(&format!("{}\n", "-".repeat(40)));
    if report.errors.is_empty() {
        out.push_str("None.\n");
    } else {
        for error in &report.errors {
            out.push_str(&format!("- {error}\n"));
        }
    }
    out
}
