use crate::document::{Document, Section, TemplateInstance};
use crate::error::LocateError;

/// Titles that address the heading-less lead section.
pub const LEAD_SENTINELS: [&str; 3] = ["0", "lead", "introduction"];

fn is_lead_sentinel(title: &str) -> bool {
    LEAD_SENTINELS
        .iter()
        .any(|sentinel| title.eq_ignore_ascii_case(sentinel))
}

/// Find the unique section with the given title.
///
/// The sentinels `"0"`, `"lead"` and `"introduction"` (case-insensitive)
/// match only the lead section, which exists only when text precedes the
/// first heading. All other titles compare exactly and case-sensitively
/// against the trimmed heading text. Zero candidates is `SectionNotFound`;
/// more than one is `AmbiguousSection` — duplicate titles are a data
/// integrity problem for the caller, never a first-match-wins.
pub fn find_section<'a>(doc: &'a Document, title: &str) -> Result<&'a Section, LocateError> {
    let wanted = title.trim();
    if is_lead_sentinel(wanted) {
        return doc
            .sections()
            .iter()
            .find(|section| section.is_lead())
            .ok_or_else(|| LocateError::SectionNotFound {
                title: wanted.to_string(),
            });
    }

    let mut matches = doc
        .sections()
        .iter()
        .filter(|section| !section.is_lead() && doc.section_title(section) == wanted);
    let first = matches.next();
    let extra = matches.count();
    match first {
        None => Err(LocateError::SectionNotFound {
            title: wanted.to_string(),
        }),
        Some(_) if extra > 0 => Err(LocateError::AmbiguousSection {
            title: wanted.to_string(),
            count: extra + 1,
        }),
        Some(section) => Ok(section),
    }
}

/// Find the first template instance, in document order, whose name
/// matches case-insensitively and which carries `match_field` with the
/// given value (whitespace-trimmed comparison). Uniqueness is the
/// caller's concern.
pub fn find_template<'a>(
    doc: &'a Document,
    name: &str,
    match_field: &str,
    match_value: &str,
) -> Result<&'a TemplateInstance, LocateError> {
    let wanted_name = name.trim();
    let wanted_field = match_field.trim();
    let wanted_value = match_value.trim();

    doc.templates()
        .iter()
        .find(|template| {
            doc.template_name(template).eq_ignore_ascii_case(wanted_name)
                && template.fields.iter().any(|field| {
                    doc.field_name(field) == Some(wanted_field)
                        && doc.field_value(field).trim() == wanted_value
                })
        })
        .ok_or_else(|| LocateError::TemplateNotFound {
            name: wanted_name.to_string(),
            match_field: wanted_field.to_string(),
            match_value: wanted_value.to_string(),
        })
}
