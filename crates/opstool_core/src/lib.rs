//! Core library for the opstool operator CLI: wikitext patch engine,
//! remote store clients, and the automation workflows built on them.

pub mod backup;
pub mod config;
pub mod dates;
pub mod dispatch;
pub mod document;
pub mod edit;
pub mod error;
pub mod llm;
pub mod locate;
pub mod preflight;
pub mod repo;
pub mod roster;
pub mod survey;
pub mod wiki;

pub use document::Document;
pub use edit::{Edit, ReplaceMode, apply};
pub use error::{EditError, LocateError, ParseError, ServiceError, StoreError};
