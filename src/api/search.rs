//! Purpose: Run searches and retrieve their matches, annotations and fragments.
//! Exports: `SearchOptions`, `MatchOptions`, `MatchSource`, `Match`, `Fragment`.
//! Role: The search half of the task protocol, built on `api::task` waiting.
//! Invariants: Patterns are normalized before they are sent; empty patterns never reach the server.
//! Invariants: A task started on the caller's behalf is released even if fetching fails.
//! Invariants: Servers older than the `api/search` build are sent to the legacy endpoints.
#![allow(clippy::result_large_err)]

use super::client::{ApiResult, LabbcatClient, Params};
use super::form::MultipartForm;
use super::store::Annotation;
use crate::core::error::{Error, ErrorKind};
use crate::core::page::{Page, Pages};
use crate::core::pattern::normalize_pattern;
use crate::core::task::{WaitOptions, string_or_number};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq)]
pub struct SearchOptions {
    pub participant_ids: Vec<String>,
    pub transcript_types: Vec<String>,
    /// Only match utterances by each transcript's main participant.
    pub main_participant: bool,
    /// Only match words that have been force-aligned.
    pub aligned: bool,
    pub matches_per_transcript: Option<u32>,
    /// Minimum overlap percentage (0-100) for overlapping speech to be excluded.
    pub overlap_threshold: Option<u32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            participant_ids: Vec::new(),
            transcript_types: Vec::new(),
            main_participant: true,
            aligned: false,
            matches_per_transcript: None,
            overlap_threshold: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MatchOptions {
    /// Words of context on either side of each match.
    pub words_context: u32,
    pub page: Option<Page>,
    pub wait: WaitOptions,
}

/// Where matches come from: an existing task, or a pattern to search for first.
#[derive(Clone, Copy, Debug)]
pub enum MatchSource<'a> {
    Task(&'a str),
    Pattern(&'a Value, &'a SearchOptions),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Match {
    pub match_id: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_match: Option<String>,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Match {
    /// The `prefix=` component of the match id, used to name fragment files.
    pub fn prefix(&self) -> Option<&str> {
        let start = self.match_id.find("prefix=")? + "prefix=".len();
        let rest = &self.match_id[start..];
        let end = rest.find(';').unwrap_or(rest.len());
        let prefix = &rest[..end];
        (!prefix.is_empty()).then_some(prefix)
    }
}

/// One (transcript, start, end) interval to extract.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    pub transcript: String,
    pub start: f64,
    pub end: f64,
    pub prefix: Option<String>,
}

impl Fragment {
    pub fn new(transcript: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            transcript: transcript.into(),
            start,
            end,
            prefix: None,
        }
    }

    /// The utterance interval of a match; `None` if the match has no line offsets.
    pub fn from_match(found: &Match) -> Option<Self> {
        Some(Self {
            transcript: found.transcript.clone(),
            start: found.line?,
            end: found.line_end?,
            prefix: found.prefix().map(str::to_string),
        })
    }
}

#[derive(Deserialize)]
struct ThreadModel {
    #[serde(rename = "threadId", deserialize_with = "string_or_number")]
    thread_id: String,
}

#[derive(Deserialize)]
struct MatchesModel {
    #[serde(default)]
    matches: Vec<Match>,
}

impl LabbcatClient {
    fn search_endpoint(&self, current: &str, legacy: &str) -> ApiResult<url::Url> {
        let resource = if self.uses_legacy_search()? { legacy } else { current };
        self.endpoint(&resource.split('/').collect::<Vec<_>>())
    }

    /// Starts a search task for `pattern` and returns its task id.
    pub fn search(&self, pattern: &Value, options: &SearchOptions) -> ApiResult<String> {
        let normalized = normalize_pattern(pattern)?;
        let params = Params::new()
            .with("command", "search")
            .with("searchJson", normalized.to_string())
            .with("words_context", 0)
            .with_opt("only_main_speaker", options.main_participant.then_some("true"))
            .with_opt("only_aligned", options.aligned.then_some("true"))
            .with_opt("matches_per_transcript", options.matches_per_transcript)
            .with_all("participant_id", &options.participant_ids)
            .with_all("transcript_type", &options.transcript_types)
            .with_opt("overlap_threshold", options.overlap_threshold);
        let url = self.search_endpoint("api/search", "search")?;
        let model: ThreadModel = self.get_model(&url, &params)?;
        tracing::info!(task_id = %model.thread_id, "search started");
        Ok(model.thread_id)
    }

    /// Starts a task that lists every utterance of the given participants.
    pub fn all_utterances<P: AsRef<str>, T: AsRef<str>>(
        &self,
        participant_ids: &[P],
        transcript_types: &[T],
        main_participant: bool,
    ) -> ApiResult<String> {
        let params = Params::new()
            .with("list", "search")
            .with_all("id", participant_ids)
            .with_opt("only_main_speaker", main_participant.then_some("true"))
            .with_all("transcript_type", transcript_types);
        let url = self.search_endpoint("api/utterances", "allUtterances")?;
        let model: ThreadModel = self.get_model(&url, &params)?;
        tracing::info!(task_id = %model.thread_id, "utterance listing started");
        Ok(model.thread_id)
    }

    /// Matches of a finished (or awaited) task, or of a fresh search for a pattern.
    pub fn get_matches(&self, source: MatchSource<'_>, options: &MatchOptions) -> ApiResult<Vec<Match>> {
        match source {
            MatchSource::Task(task_id) => self.matches_for_task(task_id, options),
            MatchSource::Pattern(pattern, search) => {
                let task_id = self.search(pattern, search)?;
                let result = self.matches_for_task(&task_id, options);
                if let Err(err) = self.release_task(&task_id) {
                    tracing::warn!(task_id = %task_id, error = %err, "failed to release search task");
                }
                result
            }
        }
    }

    /// Walks a finished task's matches one page at a time.
    pub fn match_pages<'a>(
        &'a self,
        task_id: &'a str,
        words_context: u32,
        page_length: usize,
    ) -> ApiResult<Pages<Match, impl FnMut(Page) -> ApiResult<Vec<Match>> + 'a>> {
        let start = Page::first(page_length)?;
        Ok(Pages::new(start, move |page| {
            self.fetch_matches(task_id, words_context, Some(page))
        }))
    }

    fn matches_for_task(&self, task_id: &str, options: &MatchOptions) -> ApiResult<Vec<Match>> {
        let status = self.wait_for_task(task_id, &options.wait)?;
        if status.running {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("search is still running")
                .with_task_id(task_id)
                .with_hint("Wait longer, or fetch the matches once the task has finished."));
        }
        self.fetch_matches(task_id, options.words_context, options.page)
    }

    fn fetch_matches(&self, task_id: &str, words_context: u32, page: Option<Page>) -> ApiResult<Vec<Match>> {
        let params = Params::new()
            .with("threadId", task_id)
            .with("words_context", words_context)
            .with_page(page);
        let url = self.search_endpoint("api/results", "resultsStream")?;
        let model: MatchesModel = self
            .get_model(&url, &params)
            .map_err(|err| err.with_task_id(task_id))?;
        Ok(model.matches)
    }

    /// Annotations on the given layers for each match, in match order.
    ///
    /// `target_offset` picks a token relative to the match target (0 = the target,
    /// 1 = the next token); `annotations_per_layer` caps annotations per layer.
    pub fn get_match_annotations<M: AsRef<str>, L: AsRef<str>>(
        &self,
        match_ids: &[M],
        layer_ids: &[L],
        target_offset: i32,
        annotations_per_layer: u32,
    ) -> ApiResult<Vec<Vec<Option<Annotation>>>> {
        let mut csv = String::from("MatchId");
        for match_id in match_ids {
            csv.push('\n');
            csv.push_str(&csv_field(match_id.as_ref()));
        }
        let form = MultipartForm::new()?
            .texts("layer", layer_ids)
            .text("targetOffset", target_offset)
            .text("annotationsPerLayer", annotations_per_layer)
            .text("csvFieldDelimiter", ",")
            .text("targetColumn", 0)
            .text("copyColumns", false)
            .bytes("uploadfile", "matches.csv", "text/csv", csv.into_bytes());
        let url = self.endpoint(&["api", "getMatchAnnotations"])?;
        self.post_multipart_model(&url, &form)
    }

    /// Downloads WAV fragments into `dir`, one request per fragment.
    ///
    /// Failed fragments are `None`; the rest still download. With `prefix_names`,
    /// files are prefixed by the match prefix or by a zero-padded ordinal.
    pub fn get_sound_fragments(
        &self,
        fragments: &[Fragment],
        sample_rate: Option<u32>,
        dir: &Path,
        prefix_names: bool,
    ) -> ApiResult<Vec<Option<PathBuf>>> {
        ensure_dir(dir)?;
        let url = self.endpoint(&["soundfragment"])?;
        let width = fragments.len().to_string().len();
        let mut saved = Vec::with_capacity(fragments.len());
        for (index, fragment) in fragments.iter().enumerate() {
            let prefix = prefix_names.then(|| {
                fragment
                    .prefix
                    .clone()
                    .unwrap_or_else(|| format!("{:0width$}-", index + 1))
            });
            let params = Params::new()
                .with("id", &fragment.transcript)
                .with("start", fragment.start)
                .with("end", fragment.end)
                .with_opt("sampleRate", sample_rate)
                .with_opt("prefix", prefix);
            saved.push(self.download_fragment(&url, &params, dir, fragment));
        }
        Ok(saved)
    }

    /// Downloads fragments serialized as `mime_type` into `dir`, one request per fragment.
    pub fn get_fragments<S: AsRef<str>>(
        &self,
        fragments: &[Fragment],
        layer_ids: &[S],
        mime_type: &str,
        dir: &Path,
        prefix_names: bool,
    ) -> ApiResult<Vec<Option<PathBuf>>> {
        ensure_dir(dir)?;
        let url = self.endpoint(&["api", "serialize", "fragment"])?;
        let mut saved = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let params = Params::new()
                .with("id", &fragment.transcript)
                .with("start", fragment.start)
                .with("end", fragment.end)
                .with("mimeType", mime_type)
                .with_all("layerId", layer_ids)
                .with_opt("prefix", prefix_names.then_some("true"));
            saved.push(self.download_fragment(&url, &params, dir, fragment));
        }
        Ok(saved)
    }

    /// Starts a server task that serializes all fragments; results come from `task_results`.
    pub fn get_fragments_async<S: AsRef<str>>(
        &self,
        fragments: &[Fragment],
        layer_ids: &[S],
        mime_type: &str,
        prefix_names: bool,
    ) -> ApiResult<String> {
        if fragments.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("no fragments requested"));
        }
        let params = Params::new()
            .with_all("id", fragments.iter().map(|f| f.transcript.as_str()))
            .with_all("start", fragments.iter().map(|f| f.start.to_string()))
            .with_all("end", fragments.iter().map(|f| f.end.to_string()))
            .with("mimeType", mime_type)
            .with_all("layerId", layer_ids)
            .with("async", "true")
            .with_opt("prefix", prefix_names.then_some("true"));
        let url = self.endpoint(&["api", "serialize", "fragment"])?;
        let model: ThreadModel = self.post_form_model(&url, &params)?;
        tracing::info!(task_id = %model.thread_id, "fragment serialization started");
        Ok(model.thread_id)
    }

    fn download_fragment(
        &self,
        url: &url::Url,
        params: &Params,
        dir: &Path,
        fragment: &Fragment,
    ) -> Option<PathBuf> {
        match self.post_to_file(url, params, dir, None) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(
                    transcript = %fragment.transcript,
                    start = fragment.start,
                    end = fragment.end,
                    error = %err,
                    "fragment download failed"
                );
                None
            }
        }
    }
}

fn ensure_dir(dir: &Path) -> ApiResult<()> {
    std::fs::create_dir_all(dir).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to create directory {}", dir.display()))
            .with_source(err)
    })
}

pub(super) fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
