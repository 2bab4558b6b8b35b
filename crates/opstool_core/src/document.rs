use crate::error::ParseError;

/// Half-open byte range into a document's raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One section of a page. Sections partition the raw text flatly: each
/// heading opens a new section whose literal `span` runs to the next
/// heading of any level. `subtree_end` is the offset of the next heading
/// of equal-or-higher level (or end of text) and bounds the section's
/// body for editing purposes, so appending to a section lands after its
/// subsections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading level, 0 for the lead section.
    pub level: u8,
    /// Heading text between the `=` runs; empty span for the lead.
    pub title: Span,
    /// Literal span: heading line plus body up to the next heading.
    pub span: Span,
    /// Offset just past the heading line (including its newline).
    pub body_start: usize,
    pub subtree_end: usize,
}

impl Section {
    pub fn is_lead(&self) -> bool {
        self.level == 0
    }
}

/// One `|`-delimited part of a template. Named fields carry a name span
/// left of the first top-level `=`; positional fields carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateField {
    pub name: Option<Span>,
    pub value: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInstance {
    pub name: Span,
    pub fields: Vec<TemplateField>,
    /// Full source span including the surrounding braces.
    pub span: Span,
}

/// A parsed page. The document owns the raw text; sections and template
/// instances hold only offsets into it. Concatenating the section spans
/// reproduces the raw text byte-for-byte.
#[derive(Debug)]
pub struct Document {
    raw: String,
    sections: Vec<Section>,
    templates: Vec<TemplateInstance>,
}

impl Document {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ParseError> {
        let raw = raw.into();
        let templates = scan_templates(&raw)?;
        let sections = scan_sections(&raw);
        Ok(Self {
            raw,
            sections,
            templates,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn slice(&self, span: Span) -> &str {
        &self.raw[span.start..span.end]
    }

    /// Reconstruct the raw text from the section partition.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|section| self.slice(section.span))
            .collect()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Template instances in document order; nested instances follow
    /// their enclosing instance.
    pub fn templates(&self) -> &[TemplateInstance] {
        &self.templates
    }

    pub fn section_title(&self, section: &Section) -> &str {
        self.slice(section.title).trim()
    }

    pub fn template_name(&self, template: &TemplateInstance) -> &str {
        self.slice(template.name).trim()
    }

    pub fn field_name(&self, field: &TemplateField) -> Option<&str> {
        field.name.map(|span| self.slice(span).trim())
    }

    pub fn field_value(&self, field: &TemplateField) -> &str {
        self.slice(field.value)
    }
}

struct Heading {
    start: usize,
    content_start: usize,
    level: u8,
    title: Span,
}

fn scan_sections(raw: &str) -> Vec<Section> {
    let mut headings = Vec::new();
    let mut offset = 0usize;
    for line in raw.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if let Some((level, title)) = parse_heading(line, line_start) {
            headings.push(Heading {
                start: line_start,
                content_start: offset,
                level,
                title,
            });
        }
    }

    let text_end = raw.len();
    let mut sections = Vec::new();
    let first_heading = headings.first().map(|h| h.start).unwrap_or(text_end);
    if first_heading > 0 {
        sections.push(Section {
            level: 0,
            title: Span::new(0, 0),
            span: Span::new(0, first_heading),
            body_start: 0,
            subtree_end: first_heading,
        });
    }
    for (index, heading) in headings.iter().enumerate() {
        let span_end = headings
            .get(index + 1)
            .map(|next| next.start)
            .unwrap_or(text_end);
        let subtree_end = headings[index + 1..]
            .iter()
            .find(|other| other.level <= heading.level)
            .map(|other| other.start)
            .unwrap_or(text_end);
        sections.push(Section {
            level: heading.level,
            title: heading.title,
            span: Span::new(heading.start, span_end),
            body_start: heading.content_start,
            subtree_end,
        });
    }
    sections
}

fn parse_heading(line: &str, line_start: usize) -> Option<(u8, Span)> {
    let content = line.strip_suffix('\n').unwrap_or(line);
    let content = content.strip_suffix('\r').unwrap_or(content);
    let trimmed = content.trim();
    if trimmed.len() < 3 || !trimmed.starts_with('=') || !trimmed.ends_with('=') {
        return None;
    }
    let leading = trimmed.chars().take_while(|ch| *ch == '=').count();
    let trailing = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
    if leading != trailing || leading > 6 {
        return None;
    }
    if leading + trailing >= trimmed.len() {
        return None;
    }
    let inner = &trimmed[leading..trimmed.len() - trailing];
    if inner.trim().is_empty() {
        return None;
    }

    let trim_offset = content.len() - content.trim_start().len();
    let inner_start = line_start + trim_offset + leading;
    Some((leading as u8, Span::new(inner_start, inner_start + inner.len())))
}

fn scan_templates(raw: &str) -> Result<Vec<TemplateInstance>, ParseError> {
    let mut out = Vec::new();
    scan_template_region(raw, 0, raw.len(), &mut out)?;
    out.sort_by_key(|template| template.span.start);
    Ok(out)
}

fn scan_template_region(
    raw: &str,
    start: usize,
    end: usize,
    out: &mut Vec<TemplateInstance>,
) -> Result<(), ParseError> {
    let bytes = raw.as_bytes();
    let mut cursor = start;
    while cursor + 1 < end {
        if bytes[cursor] == b'{' && bytes[cursor + 1] == b'{' {
            let close = find_matching_braces(bytes, cursor, end)?;
            out.push(parse_template(raw, cursor, close));
            scan_template_region(raw, cursor + 2, close - 2, out)?;
            cursor = close;
            continue;
        }
        cursor += 1;
    }
    Ok(())
}

/// Returns the offset just past the `}}` that balances the `{{` at
/// `open`. A stray closing pair without an opener is inert text; an
/// opener without a closer is a parse error.
fn find_matching_braces(bytes: &[u8], open: usize, end: usize) -> Result<usize, ParseError> {
    let mut depth = 0usize;
    let mut cursor = open;
    while cursor + 1 < end {
        if bytes[cursor] == b'{' && bytes[cursor + 1] == b'{' {
            depth += 1;
            cursor += 2;
            continue;
        }
        if bytes[cursor] == b'}' && bytes[cursor + 1] == b'}' {
            depth -= 1;
            cursor += 2;
            if depth == 0 {
                return Ok(cursor);
            }
            continue;
        }
        cursor += 1;
    }
    Err(ParseError::UnclosedTemplate { offset: open })
}

fn parse_template(raw: &str, start: usize, end: usize) -> TemplateInstance {
    let bytes = raw.as_bytes();
    let interior_start = start + 2;
    let interior_end = end - 2;

    // Top-level '|' offsets; pipes inside nested {{ }} or [[ ]] do not
    // split fields.
    let mut boundaries = Vec::new();
    let mut brace_depth = 0usize;
    let mut link_depth = 0usize;
    let mut cursor = interior_start;
    while cursor < interior_end {
        if cursor + 1 < interior_end {
            match (bytes[cursor], bytes[cursor + 1]) {
                (b'{', b'{') => {
                    brace_depth += 1;
                    cursor += 2;
                    continue;
                }
                (b'}', b'}') => {
                    brace_depth = brace_depth.saturating_sub(1);
                    cursor += 2;
                    continue;
                }
                (b'[', b'[') => {
                    link_depth += 1;
                    cursor += 2;
                    continue;
                }
                (b']', b']') => {
                    link_depth = link_depth.saturating_sub(1);
                    cursor += 2;
                    continue;
                }
                _ => {}
            }
        }
        if bytes[cursor] == b'|' && brace_depth == 0 && link_depth == 0 {
            boundaries.push(cursor);
        }
        cursor += 1;
    }

    let name_end = boundaries.first().copied().unwrap_or(interior_end);
    let mut fields = Vec::new();
    for (index, bar) in boundaries.iter().enumerate() {
        let part_start = bar + 1;
        let part_end = boundaries
            .get(index + 1)
            .copied()
            .unwrap_or(interior_end);
        match find_top_level_eq(bytes, part_start, part_end) {
            Some(position) => fields.push(TemplateField {
                name: Some(Span::new(part_start, position)),
                value: Span::new(position + 1, part_end),
            }),
            None => fields.push(TemplateField {
                name: None,
                value: Span::new(part_start, part_end),
            }),
        }
    }

    TemplateInstance {
        name: Span::new(interior_start, name_end),
        fields,
        span: Span::new(start, end),
    }
}

fn find_top_level_eq(bytes: &[u8], start: usize, end: usize) -> Option<usize> {
    let mut brace_depth = 0usize;
    let mut link_depth = 0usize;
    let mut cursor = start;
    while cursor < end {
        if cursor + 1 < end {
            match (bytes[cursor], bytes[cursor + 1]) {
                (b'{', b'{') => {
                    brace_depth += 1;
                    cursor += 2;
                    continue;
                }
                (b'}', b'}') => {
                    brace_depth = brace_depth.saturating_sub(1);
                    cursor += 2;
                    continue;
                }
                (b'[', b'[') => {
                    link_depth += 1;
                    cursor += 2;
                    continue;
                }
                (b']', b']') => {
                    link_depth = link_depth.saturating_sub(1);
                    cursor += 2;
                    continue;
                }
                _ => {}
            }
        }
        if bytes[cursor] == b'=' && brace_depth == 0 && link_depth == 0 {
            return Some(cursor);
        }
        cursor += 1;
    }
    None
}

/// Plain-text projection of a wikitext span, used as summarization
/// input: templates are dropped, links reduce to their label, bold and
/// italic quote runs are removed.
pub fn strip_markup(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        if cursor + 1 < bytes.len() && bytes[cursor] == b'{' && bytes[cursor + 1] == b'{' {
            if let Ok(close) = find_matching_braces(bytes, cursor, bytes.len()) {
                cursor = close;
                continue;
            }
        }
        if cursor + 1 < bytes.len() && bytes[cursor] == b'[' && bytes[cursor + 1] == b'[' {
            if let Some(close) = find_double(bytes, cursor + 2, b']') {
                let inner = &text[cursor + 2..close];
                let label = inner.rsplit('|').next().unwrap_or(inner);
                output.push_str(label.trim());
                cursor = close + 2;
                continue;
            }
        }
        if bytes[cursor] == b'\'' {
            let mut run = cursor;
            while run < bytes.len() && bytes[run] == b'\'' {
                run += 1;
            }
            if run - cursor >= 2 {
                cursor = run;
                continue;
            }
        }
        let Some(ch) = text[cursor..].chars().next() else {
            break;
        };
        output.push(ch);
        cursor += ch.len_utf8();
    }
    output
}

fn find_double(bytes: &[u8], from: usize, delimiter: u8) -> Option<usize> {
    let mut cursor = from;
    while cursor + 1 < bytes.len() {
        if bytes[cursor] == delimiter && bytes[cursor + 1] == delimiter {
            return Some(cursor);
        }
        cursor += 1;
    }
    None
}
