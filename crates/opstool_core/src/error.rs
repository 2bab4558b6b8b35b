use thiserror::Error;

/// Malformed document input. Fatal: parsing produces no partial result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unclosed template braces starting at byte {offset}")]
    UnclosedTemplate { offset: usize },
}

/// A locator failed to resolve its target. Recoverable: the caller
/// decides whether to abort or disambiguate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("section not found: {title:?}")]
    SectionNotFound { title: String },
    #[error("section title {title:?} matches {count} sections")]
    AmbiguousSection { title: String, count: usize },
    #[error("template {name:?} with {match_field}={match_value:?} not found")]
    TemplateNotFound {
        name: String,
        match_field: String,
        match_value: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error("text not found in document: {find:?}")]
    TextNotFound { find: String },
    #[error("find text cannot be empty")]
    EmptyPattern,
    #[error("replace count must be at least 1")]
    InvalidReplaceCount,
}

/// Failures at the remote document store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("page not found: {title}")]
    PageMissing { title: String },
    #[error("page already exists: {title}")]
    PageAlreadyExists { title: String },
    #[error("edit conflict on {title}: base revision {base_revision} is no longer current")]
    Conflict { title: String, base_revision: i64 },
    #[error("api error [{code}]: {info}")]
    Api { code: String, info: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Protocol(String),
}

/// Failures at the summarization service boundary. No retry policy is
/// applied at this layer; callers may retry with backoff.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("summarization service unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("summarization service returned no content")]
    Empty,
}
