//! Purpose: Define the public Rust API boundary for the LaBB-CAT client.
//! Exports: `LabbcatClient`, typed records, option structs, and core protocol types.
//! Role: Public surface; request plumbing (`form`, `download`) stays private.
//! Invariants: Every server operation is a method on `LabbcatClient`.
//! Invariants: Internal helper modules are not directly exposed.

mod admin;
mod client;
mod dictionary;
mod download;
mod edit;
mod form;
mod search;
mod store;
mod task;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::page::{Page, Pages};
pub use crate::core::pattern::{Column, LayerMatch, SearchPattern, normalize_pattern};
pub use crate::core::task::{TaskStatus, WaitOptions};
pub use admin::{AdminRecord, Corpus, Project, Role};
pub use client::LabbcatClient;
pub use dictionary::{Dictionaries, DictionaryEntries, DictionaryRef};
pub use edit::NewTranscript;
pub use search::{Fragment, Match, MatchOptions, MatchSource, SearchOptions};
pub use store::{
    Anchor, Annotation, Layer, MediaFile, MediaTrack, TranscriptSelection, UserInfo,
};
