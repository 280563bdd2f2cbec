//! Purpose: Model server-side task status and the client-side wait loop.
//! Exports: `TaskStatus`, `WaitOptions`, `poll_until_settled`.
//! Role: Pure protocol logic; the HTTP fetch and the sleeper are passed in.
//! Invariants: The first status read always happens, even with a zero wait budget.
//! Invariants: The loop ends when the task stops running, the budget is spent, or the
//! interrupt flag is raised; the last status read is returned in every case.
//! Invariants: The wait budget counts slept time only, so request latency extends it.
use crate::core::error::Error;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default, deserialize_with = "string_or_number")]
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exception: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub series_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        !self.running
    }
}

#[derive(Clone, Debug)]
pub struct WaitOptions {
    /// Total time to spend sleeping between polls; `None` waits until the task settles.
    pub max_wait: Option<Duration>,
    pub poll_interval: Duration,
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self {
            max_wait: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            interrupt: None,
        }
    }

    /// Whole-second budget where zero means "no limit".
    pub fn max_seconds(seconds: u64) -> Self {
        let mut options = Self::new();
        if seconds > 0 {
            options.max_wait = Some(Duration::from_secs(seconds));
        }
        options
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `fetch` until the task stops running or the wait ends.
pub fn poll_until_settled<F, S>(
    mut fetch: F,
    options: &WaitOptions,
    mut sleep: S,
) -> Result<TaskStatus, Error>
where
    F: FnMut() -> Result<TaskStatus, Error>,
    S: FnMut(Duration),
{
    let interval = options.poll_interval.max(MIN_POLL_INTERVAL);
    let mut remaining = options.max_wait;
    let mut status = fetch()?;
    while status.running {
        if options.interrupted() {
            break;
        }
        let pause = match remaining {
            Some(left) if left.is_zero() => break,
            Some(left) => left.min(interval),
            None => interval,
        };
        sleep(pause);
        if let Some(left) = remaining.as_mut() {
            *left = left.saturating_sub(pause);
        }
        if options.interrupted() {
            break;
        }
        status = fetch()?;
    }
    Ok(status)
}

/// Accepts ids the server sends either as strings or as bare numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
