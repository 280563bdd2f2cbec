//! Purpose: Decode and check the JSON envelope LaBB-CAT wraps around every response.
//! Exports: `Envelope`, `parse_envelope`.
//! Role: Single place where HTTP status, envelope code and error list become an `Error`.
//! Invariants: A failing status, a non-zero code, or any server error string is a failure.
//! Invariants: Non-JSON bodies never panic; they map to Protocol or status-derived errors.
use crate::core::error::{Error, ErrorKind, kind_from_status};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub messages: Option<Vec<String>>,
    #[serde(default)]
    pub model: Value,
}

impl Envelope {
    pub fn errors(&self) -> &[String] {
        self.errors.as_deref().unwrap_or_default()
    }

    pub fn messages(&self) -> &[String] {
        self.messages.as_deref().unwrap_or_default()
    }

    /// Returns the envelope unchanged when the response represents success.
    pub fn check(self, status: u16) -> Result<Self, Error> {
        let ok_status = (200..300).contains(&status);
        if ok_status && self.code == 0 && self.errors().is_empty() {
            return Ok(self);
        }
        let kind = if ok_status {
            ErrorKind::Server
        } else {
            kind_from_status(status)
        };
        let message = match self.errors().first() {
            Some(first) => first.clone(),
            None if !ok_status => format!("request failed with status {status}"),
            None => format!("server reported failure code {}", self.code),
        };
        let errors = self.errors.unwrap_or_default();
        Err(Error::new(kind)
            .with_message(message)
            .with_status(status)
            .with_server_errors(errors))
    }

    pub fn into_model<T>(self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.model).map_err(|err| {
            Error::new(ErrorKind::Protocol)
                .with_message("unexpected response model shape")
                .with_source(err)
        })
    }
}

/// Parses a response body into an envelope, then checks it against the HTTP status.
pub fn parse_envelope(status: u16, body: &str) -> Result<Envelope, Error> {
    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.check(status),
        Err(err) if (200..300).contains(&status) => Err(Error::new(ErrorKind::Protocol)
            .with_message("invalid response json")
            .with_status(status)
            .with_source(err)),
        Err(_) => {
            let excerpt = body_excerpt(body);
            let message = if excerpt.is_empty() {
                format!("request failed with status {status}")
            } else {
                format!("request failed with status {status}: {excerpt}")
            };
            Err(Error::new(kind_from_status(status))
                .with_message(message)
                .with_status(status))
        }
    }
}

fn body_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    let mut excerpt: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
    if trimmed.chars().count() > BODY_EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    excerpt
}
