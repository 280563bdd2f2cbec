//! Purpose: Client library for the LaBB-CAT web service, shared by the `labbcat` CLI and tests.
//! Exports: `api` (client, typed records, options), `core` (envelope, paging, tasks, patterns, errors).
//! Role: Blocking HTTP client; every operation is a method on `api::LabbcatClient`.
//! Invariants: Protocol rules live in `core` and never perform I/O themselves.
//! Invariants: All failures surface as `api::Error` with a stable `ErrorKind`.
pub mod api;
pub mod core;
