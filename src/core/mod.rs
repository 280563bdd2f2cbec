// Pure protocol logic: errors, response envelopes, paging, task waiting, search patterns.
pub mod envelope;
pub mod error;
pub mod page;
pub mod pattern;
pub mod task;
