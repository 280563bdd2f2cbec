//! Purpose: Dictionary lookups and edits (layer dictionaries and manager dictionaries).
//! Exports: `DictionaryEntries` and the dictionary methods on `LabbcatClient`.
//! Role: Lookups post a CSV of keys and read CSV back; edits go through `api/edit/dictionary`.
//! Invariants: Every requested key is present in a lookup result, possibly with no entries.
#![allow(clippy::result_large_err)]

use super::client::{ApiResult, LabbcatClient, Params};
use super::form::MultipartForm;
use super::search::csv_field;
use crate::core::error::{Error, ErrorKind};
use std::collections::BTreeMap;

/// Dictionary ids keyed by the layer manager that provides them.
pub type Dictionaries = BTreeMap<String, Vec<String>>;

/// Entries keyed by the looked-up key.
pub type DictionaryEntries = BTreeMap<String, Vec<String>>;

/// Which dictionary an edit targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictionaryRef<'a> {
    /// The dictionary that manages a layer; edits also update the layer's tokens.
    Layer(&'a str),
    Manager {
        manager_id: &'a str,
        dictionary_id: &'a str,
    },
}

impl DictionaryRef<'_> {
    fn params(self) -> Params {
        match self {
            DictionaryRef::Layer(layer_id) => Params::new().with("layerId", layer_id),
            DictionaryRef::Manager {
                manager_id,
                dictionary_id,
            } => Params::new()
                .with("layerManagerId", manager_id)
                .with("dictionaryId", dictionary_id),
        }
    }
}

impl LabbcatClient {
    pub fn get_dictionaries(&self) -> ApiResult<Dictionaries> {
        let url = self.endpoint(&["dictionaries"])?;
        self.get_model(&url, &Params::new())
    }

    /// Looks up `keys` in a dictionary.
    pub fn get_dictionary_entries<S: AsRef<str>>(
        &self,
        manager_id: &str,
        dictionary_id: &str,
        keys: &[S],
    ) -> ApiResult<DictionaryEntries> {
        let mut csv = String::new();
        for key in keys {
            csv.push_str(&csv_field(key.as_ref()));
            csv.push('\n');
        }
        let form = MultipartForm::new()?
            .text("managerId", manager_id)
            .text("dictionaryId", dictionary_id)
            .bytes("uploadfile", "keys.csv", "text/csv", csv.into_bytes());
        let url = self.endpoint(&["dictionary"])?;
        let body = self.post_multipart_text(&url, &form)?;
        let mut entries = parse_entries(&body).map_err(|err| err.with_url(url.as_str()))?;
        for key in keys {
            entries.entry(key.as_ref().to_string()).or_default();
        }
        Ok(entries)
    }

    /// Adds `entry` under `key`; a key may have several entries.
    pub fn add_dictionary_entry(&self, dictionary: DictionaryRef<'_>, key: &str, entry: &str) -> ApiResult<()> {
        let url = self.endpoint(&["api", "edit", "dictionary", "add"])?;
        let params = dictionary.params().with("key", key).with("entry", entry);
        self.post_form_model::<serde_json::Value>(&url, &params)?;
        tracing::info!(?dictionary, key, "dictionary entry added");
        Ok(())
    }

    /// Removes `entry` from `key`, or every entry of `key` when `entry` is `None`.
    pub fn remove_dictionary_entry(
        &self,
        dictionary: DictionaryRef<'_>,
        key: &str,
        entry: Option<&str>,
    ) -> ApiResult<()> {
        let url = self.endpoint(&["api", "edit", "dictionary", "remove"])?;
        let params = dictionary.params().with("key", key).with_opt("entry", entry);
        self.post_form_model::<serde_json::Value>(&url, &params)?;
        tracing::info!(?dictionary, key, "dictionary entry removed");
        Ok(())
    }

    pub fn add_layer_dictionary_entry(&self, layer_id: &str, key: &str, entry: &str) -> ApiResult<()> {
        self.add_dictionary_entry(DictionaryRef::Layer(layer_id), key, entry)
    }

    pub fn remove_layer_dictionary_entry(
        &self,
        layer_id: &str,
        key: &str,
        entry: Option<&str>,
    ) -> ApiResult<()> {
        self.remove_dictionary_entry(DictionaryRef::Layer(layer_id), key, entry)
    }
}

/// First column is the key, the rest are entries; a lone empty entry means none.
fn parse_entries(body: &str) -> ApiResult<DictionaryEntries> {
    let mut entries = DictionaryEntries::new();
    for (number, line) in body.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mut fields = split_csv_line(line).ok_or_else(|| {
            Error::new(ErrorKind::Protocol)
                .with_message(format!("malformed dictionary CSV at line {}", number + 1))
        })?;
        let key = fields.remove(0);
        if fields.len() == 1 && fields[0].is_empty() {
            fields.clear();
        }
        entries.entry(key).or_default().extend(fields);
    }
    Ok(entries)
}

/// Splits one CSV record; `None` on an unterminated quote.
fn split_csv_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (ch, _) => field.push(ch),
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}
