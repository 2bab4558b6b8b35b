use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::document::Document;
use crate::error::EditError;
use crate::locate::{find_section, find_template};

/// Bounded vs. unbounded text replacement. Replacing "everything" and
/// replacing "the first n occurrences" are distinct modes, not a magic
/// count value; a count of zero is invalid input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceMode {
    All,
    FirstN(usize),
}

/// One point edit against a parsed page. Applying an edit is pure: it
/// produces new raw text and never writes to any store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Edit {
    AppendToSection {
        title: String,
        text: String,
    },
    SetTemplateField {
        name: String,
        match_field: String,
        match_value: String,
        field: String,
        value: String,
    },
    AppendToDocument {
        text: String,
    },
    ReplaceText {
        find: String,
        replace: String,
        mode: ReplaceMode,
    },
}

impl Edit {
    /// Short human description, used for default commit summaries.
    pub fn describe(&self) -> String {
        match self {
            Edit::AppendToSection { title, .. } => format!("append to section '{title}'"),
            Edit::SetTemplateField { name, field, .. } => {
                format!("set field '{field}' in template '{name}'")
            }
            Edit::AppendToDocument { .. } => "append to page".to_string(),
            Edit::ReplaceText { find, .. } => format!("replace {find:?}"),
        }
    }
}

/// Apply `edit` to `doc`, returning the new raw text. Every byte outside
/// the computed target span is left unchanged.
pub fn apply(doc: &Document, edit: &Edit) -> Result<String, EditError> {
    match edit {
        Edit::AppendToSection { title, text } => append_to_section(doc, title, text),
        Edit::SetTemplateField {
            name,
            match_field,
            match_value,
            field,
            value,
        } => set_template_field(doc, name, match_field, match_value, field, value),
        Edit::AppendToDocument { text } => Ok(append_to_document(doc, text)),
        Edit::ReplaceText {
            find,
            replace,
            mode,
        } => replace_text(doc, find, replace, mode),
    }
}

fn append_to_section(doc: &Document, title: &str, text: &str) -> Result<String, EditError> {
    let section = find_section(doc, title)?;
    let raw = doc.raw();
    let body = &raw[section.body_start..section.subtree_end];

    let (insert_at, inserted) = if body.trim().is_empty() {
        // Empty or whitespace-only body: no leading newline, unless the
        // heading line itself is unterminated at end of text.
        if section.level > 0 && !raw[..section.body_start].ends_with('\n') {
            (section.body_start, format!("\n{text}"))
        } else if body.is_empty() && section.body_start < raw.len() {
            // Whatever follows starts a heading line; keep it on one.
            (section.body_start, format!("{text}\n"))
        } else {
            (section.body_start, text.to_string())
        }
    } else {
        // Land after the last content character, keeping the whitespace
        // run that separates the body from the next heading.
        let content_end = section.body_start + body.trim_end().len();
        (content_end, format!("\n{text}"))
    };

    Ok(splice(raw, insert_at, insert_at, &inserted))
}

fn set_template_field(
    doc: &Document,
    name: &str,
    match_field: &str,
    match_value: &str,
    field: &str,
    value: &str,
) -> Result<String, EditError> {
    let template = find_template(doc, name, match_field, match_value)?;
    let raw = doc.raw();
    let wanted = field.trim();

    if let Some(existing) = template
        .fields
        .iter()
        .find(|candidate| doc.field_name(candidate) == Some(wanted))
    {
        let replacement = format!(" {} ", value.trim());
        return Ok(splice(
            raw,
            existing.value.start,
            existing.value.end,
            &replacement,
        ));
    }

    // Absent field: append a new part before the closing braces.
    let insert_at = template.span.end - 2;
    let addition = format!("|{wanted}= {} ", value.trim());
    Ok(splice(raw, insert_at, insert_at, &addition))
}

fn append_to_document(doc: &Document, text: &str) -> String {
    let raw = doc.raw();
    let content = raw.trim_end_matches('\n');
    if content.is_empty() {
        return text.to_string();
    }
    format!("{content}\n{text}")
}

fn replace_text(
    doc: &Document,
    find: &str,
    replace: &str,
    mode: &ReplaceMode,
) -> Result<String, EditError> {
    if find.is_empty() {
        return Err(EditError::EmptyPattern);
    }
    let raw = doc.raw();
    if !raw.contains(find) {
        return Err(EditError::TextNotFound {
            find: find.to_string(),
        });
    }
    match mode {
        ReplaceMode::All => Ok(raw.replace(find, replace)),
        ReplaceMode::FirstN(0) => Err(EditError::InvalidReplaceCount),
        ReplaceMode::FirstN(count) => Ok(raw.replacen(find, replace, *count)),
    }
}

fn splice(raw: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut output = String::with_capacity(raw.len() - (end - start) + replacement.len());
    output.push_str(&raw[..start]);
    output.push_str(replacement);
    output.push_str(&raw[end..]);
    output
}

/// Unified diff of a pending edit, for dry-run display.
pub fn unified_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header("remote", "proposed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LocateError;

    fn parse(raw: &str) -> Document {
        Document::parse(raw).expect("parse")
    }

    fn append(title: &str, text: &str) -> Edit {
        Edit::AppendToSection {
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    fn set_field(value: &str) -> Edit {
        Edit::SetTemplateField {
            name: "Box".to_string(),
            match_field: "id".to_string(),
            match_value: "A".to_string(),
            field: "status".to_string(),
            value: value.to_string(),
        }
    }

    /// Asserts that `new` differs from `old` only inside `[start, end)`.
    fn assert_untouched_outside(old: &str, new: &str, start: usize, end: usize) {
        assert_eq!(&new[..start], &old[..start], "prefix must be unchanged");
        let old_suffix = &old[end..];
        assert_eq!(
            &new[new.len() - old_suffix.len()..],
            old_suffix,
            "suffix must be unchanged"
        );
    }

    #[test]
    fn append_to_section_lands_at_end_of_body() {
        let doc = parse("== Notes ==\nfoo");
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        assert_eq!(output, "== Notes ==\nfoo\nbar");
    }

    #[test]
    fn append_keeps_separator_before_next_heading() {
        let doc = parse("== Notes ==\nfoo\n== Other ==\nbaz\n");
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        assert_eq!(output, "== Notes ==\nfoo\nbar\n== Other ==\nbaz\n");
    }

    #[test]
    fn append_lands_after_subsections() {
        let doc = parse("== Notes ==\nfoo\n=== Detail ===\ninner\n== Other ==\n");
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        assert_eq!(output, "== Notes ==\nfoo\n=== Detail ===\ninner\nbar\n== Other ==\n");
    }

    #[test]
    fn append_to_empty_section_has_no_leading_newline() {
        let doc = parse("== Notes ==\n== Other ==\n");
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        assert_eq!(output, "== Notes ==\nbar\n== Other ==\n");
    }

    #[test]
    fn append_to_blank_line_section_reuses_existing_separator() {
        let doc = parse("== Notes ==\n\n== Other ==\n");
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        assert_eq!(output, "== Notes ==\nbar\n== Other ==\n");
    }

    #[test]
    fn append_to_unterminated_heading_gets_a_separating_newline() {
        let doc = parse("== Notes ==");
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        assert_eq!(output, "== Notes ==\nbar");
    }

    #[test]
    fn append_to_lead_by_sentinel() {
        let doc = parse("intro text\n== A ==\nbody\n");
        let output = apply(&doc, &append("0", "more intro")).expect("apply");
        assert_eq!(output, "intro text\nmore intro\n== A ==\nbody\n");
    }

    #[test]
    fn append_to_missing_section_is_not_found() {
        let doc = parse("== A ==\n");
        assert_eq!(
            apply(&doc, &append("B", "x")),
            Err(EditError::Locate(LocateError::SectionNotFound {
                title: "B".to_string()
            }))
        );
    }

    #[test]
    fn set_template_field_replaces_value_with_padded_form() {
        let doc = parse("{{Box|id=A|status=open}}");
        let output = apply(&doc, &set_field("closed")).expect("apply");
        assert_eq!(output, "{{Box|id=A|status= closed }}");
    }

    #[test]
    fn set_template_field_is_idempotent() {
        let doc = parse("{{Box|id=A|status=open}}");
        let once = apply(&doc, &set_field("closed")).expect("first");
        let doc_again = parse(&once);
        let twice = apply(&doc_again, &set_field("closed")).expect("second");
        assert_eq!(once, twice);
    }

    #[test]
    fn set_template_field_appends_missing_field() {
        let doc = parse("{{Box|id=A}}");
        let output = apply(&doc, &set_field("closed")).expect("apply");
        assert_eq!(output, "{{Box|id=A|status= closed }}");
    }

    #[test]
    fn set_template_field_targets_first_occurrence_of_duplicate_field() {
        let doc = parse("{{Box|id=A|status=open|status=stale}}");
        let output = apply(&doc, &set_field("closed")).expect("apply");
        assert_eq!(output, "{{Box|id=A|status= closed |status=stale}}");
    }

    #[test]
    fn set_template_field_leaves_bytes_outside_value_span_unchanged() {
        let raw = "before {{Box|id=A|status=open}} after";
        let doc = parse(raw);
        let output = apply(&doc, &set_field("closed")).expect("apply");
        let value_start = raw.find("open").expect("value");
        assert_untouched_outside(raw, &output, value_start, value_start + "open".len());
    }

    #[test]
    fn append_to_document_normalizes_trailing_newline() {
        let doc = parse("plain text");
        let output = apply(
            &doc,
            &Edit::AppendToDocument {
                text: "more".to_string(),
            },
        )
        .expect("apply");
        assert_eq!(output, "plain text\nmore");

        let doc = parse("plain text\n\n\n");
        let output = apply(
            &doc,
            &Edit::AppendToDocument {
                text: "more".to_string(),
            },
        )
        .expect("apply");
        assert_eq!(output, "plain text\nmore");
    }

    #[test]
    fn append_to_empty_document_is_just_the_text() {
        let doc = parse("");
        let output = apply(
            &doc,
            &Edit::AppendToDocument {
                text: "more".to_string(),
            },
        )
        .expect("apply");
        assert_eq!(output, "more");
    }

    #[test]
    fn replace_text_modes() {
        let doc = parse("a b a b a");
        let all = apply(
            &doc,
            &Edit::ReplaceText {
                find: "a".to_string(),
                replace: "c".to_string(),
                mode: ReplaceMode::All,
            },
        )
        .expect("all");
        assert_eq!(all, "c b c b c");

        let first_two = apply(
            &doc,
            &Edit::ReplaceText {
                find: "a".to_string(),
                replace: "c".to_string(),
                mode: ReplaceMode::FirstN(2),
            },
        )
        .expect("first two");
        assert_eq!(first_two, "c b c b a");
    }

    #[test]
    fn replace_zero_count_is_invalid_not_replace_all() {
        let doc = parse("a a a");
        assert_eq!(
            apply(
                &doc,
                &Edit::ReplaceText {
                    find: "a".to_string(),
                    replace: "c".to_string(),
                    mode: ReplaceMode::FirstN(0),
                },
            ),
            Err(EditError::InvalidReplaceCount)
        );
    }

    #[test]
    fn replace_missing_text_is_reported() {
        let doc = parse("a b c");
        assert_eq!(
            apply(
                &doc,
                &Edit::ReplaceText {
                    find: "zzz".to_string(),
                    replace: "c".to_string(),
                    mode: ReplaceMode::All,
                },
            ),
            Err(EditError::TextNotFound {
                find: "zzz".to_string()
            })
        );
    }

    #[test]
    fn append_to_section_touches_only_the_insertion_point() {
        let raw = "lead\n== Notes ==\nfoo\n== Other ==\nbaz\n";
        let doc = parse(raw);
        let output = apply(&doc, &append("Notes", "bar")).expect("apply");
        let insert_at = raw.find("foo").expect("foo") + "foo".len();
        assert_untouched_outside(raw, &output, insert_at, insert_at);
    }

    #[test]
    fn edit_json_shape_round_trips() {
        let edit = Edit::ReplaceText {
            find: "a".to_string(),
            replace: "b".to_string(),
            mode: ReplaceMode::FirstN(2),
        };
        let encoded = serde_json::to_string(&edit).expect("encode");
        let decoded: Edit = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(edit, decoded);
        assert!(encoded.contains("\"kind\":\"replace_text\""));
    }

    #[test]
    fn unified_diff_marks_changed_lines() {
        let diff = unified_diff("a\nb\n", "a\nc\n");
        assert!(diff.contains("-b"));
        assert!(diff.contains("+c"));
    }
}
