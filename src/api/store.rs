//! Purpose: Read-only store queries (layers, corpora, participants, transcripts, media).
//! Exports: `Layer`, `Annotation`, `Anchor`, `MediaFile`, `MediaTrack`, `UserInfo`,
//! `TranscriptSelection`, and the store methods on `LabbcatClient`.
//! Role: Thin parameterized wrappers over `api/store/<name>` and friends.
//! Invariants: Absent optional parameters are omitted, never sent empty.
//! Invariants: Paged listings accept an optional `Page`; `None` asks for everything.
#![allow(clippy::result_large_err)]

use super::client::{ApiResult, LabbcatClient, Params};
use crate::core::error::ErrorKind;
use crate::core::page::{Page, Pages};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 0 = tag, 1 = instant, 2 = interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers_overlap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_includes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturated: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub valid_labels: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A media track definition; also the record type of `api/admin/mediatracks`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct MediaTrack {
    pub suffix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "displayOrder", skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaTrack {
    pub fn new(suffix: impl Into<String>, description: impl Into<String>, display_order: i64) -> Self {
        Self {
            suffix: suffix.into(),
            description: Some(description.into()),
            display_order: Some(display_order),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct UserInfo {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which transcripts an attribute export covers.
#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptSelection {
    Expression(String),
    Ids(Vec<String>),
}

#[derive(Deserialize)]
struct SystemAttribute {
    #[serde(default)]
    value: Value,
}

impl LabbcatClient {
    fn store_url(&self, name: &str) -> ApiResult<url::Url> {
        self.endpoint(&["api", "store", name])
    }

    fn store_get<R>(&self, name: &str, params: &Params) -> ApiResult<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let url = self.store_url(name)?;
        self.get_model(&url, params)
    }

    /// Server version details (`version` endpoint).
    pub fn version_info(&self) -> ApiResult<Value> {
        let url = self.endpoint(&["version"])?;
        self.get_model(&url, &Params::new())
    }

    /// The store's id, normally the server URL.
    pub fn get_id(&self) -> ApiResult<String> {
        self.store_get("getId", &Params::new())
    }

    pub fn get_layer_ids(&self) -> ApiResult<Vec<String>> {
        self.store_get("getLayerIds", &Params::new())
    }

    pub fn get_layers(&self) -> ApiResult<Vec<Layer>> {
        self.store_get("getLayers", &Params::new())
    }

    pub fn get_layer(&self, id: &str) -> ApiResult<Layer> {
        self.store_get("getLayer", &Params::new().with("id", id))
    }

    pub fn get_corpus_ids(&self) -> ApiResult<Vec<String>> {
        self.store_get("getCorpusIds", &Params::new())
    }

    pub fn get_participant_ids(&self) -> ApiResult<Vec<String>> {
        self.store_get("getParticipantIds", &Params::new())
    }

    /// The participant record, or `None` when the server has no such participant.
    pub fn get_participant(&self, id: &str) -> ApiResult<Option<Value>> {
        let participant: Value = self.store_get("getParticipant", &Params::new().with("id", id))?;
        Ok((!participant.is_null()).then_some(participant))
    }

    pub fn count_matching_participant_ids(&self, expression: &str) -> ApiResult<u64> {
        self.store_get(
            "countMatchingParticipantIds",
            &Params::new().with("expression", expression),
        )
    }

    pub fn get_matching_participant_ids(
        &self,
        expression: &str,
        page: Option<Page>,
    ) -> ApiResult<Vec<String>> {
        self.store_get(
            "getMatchingParticipantIds",
            &Params::new().with("expression", expression).with_page(page),
        )
    }

    pub fn matching_participant_id_pages<'a>(
        &'a self,
        expression: &'a str,
        page_length: usize,
    ) -> ApiResult<Pages<String, impl FnMut(Page) -> ApiResult<Vec<String>> + 'a>> {
        let start = Page::first(page_length)?;
        Ok(Pages::new(start, move |page| {
            self.get_matching_participant_ids(expression, Some(page))
        }))
    }

    pub fn get_transcript_ids(&self) -> ApiResult<Vec<String>> {
        self.store_get("getTranscriptIds", &Params::new())
    }

    pub fn get_transcript_ids_in_corpus(&self, corpus_id: &str) -> ApiResult<Vec<String>> {
        self.store_get("getTranscriptIdsInCorpus", &Params::new().with("id", corpus_id))
    }

    pub fn get_transcript_ids_with_participant(&self, participant_id: &str) -> ApiResult<Vec<String>> {
        self.store_get(
            "getTranscriptIdsWithParticipant",
            &Params::new().with("id", participant_id),
        )
    }

    pub fn count_matching_transcript_ids(&self, expression: &str) -> ApiResult<u64> {
        self.store_get(
            "countMatchingTranscriptIds",
            &Params::new().with("expression", expression),
        )
    }

    /// `order` is a comma-separated list of expressions, each optionally suffixed
    /// ` ASC` or ` DESC`; `None` sorts by transcript id.
    pub fn get_matching_transcript_ids(
        &self,
        expression: &str,
        page: Option<Page>,
        order: Option<&str>,
    ) -> ApiResult<Vec<String>> {
        self.store_get(
            "getMatchingTranscriptIds",
            &Params::new()
                .with("expression", expression)
                .with_page(page)
                .with_opt("order", order),
        )
    }

    pub fn matching_transcript_id_pages<'a>(
        &'a self,
        expression: &'a str,
        order: Option<&'a str>,
        page_length: usize,
    ) -> ApiResult<Pages<String, impl FnMut(Page) -> ApiResult<Vec<String>> + 'a>> {
        let start = Page::first(page_length)?;
        Ok(Pages::new(start, move |page| {
            self.get_matching_transcript_ids(expression, Some(page), order)
        }))
    }

    pub fn count_matching_annotations(&self, expression: &str) -> ApiResult<u64> {
        self.store_get(
            "countMatchingAnnotations",
            &Params::new().with("expression", expression),
        )
    }

    pub fn get_matching_annotations(
        &self,
        expression: &str,
        page: Option<Page>,
    ) -> ApiResult<Vec<Annotation>> {
        self.store_get(
            "getMatchingAnnotations",
            &Params::new().with("expression", expression).with_page(page),
        )
    }

    pub fn matching_annotation_pages<'a>(
        &'a self,
        expression: &'a str,
        page_length: usize,
    ) -> ApiResult<Pages<Annotation, impl FnMut(Page) -> ApiResult<Vec<Annotation>> + 'a>> {
        let start = Page::first(page_length)?;
        Ok(Pages::new(start, move |page| {
            self.get_matching_annotations(expression, Some(page))
        }))
    }

    /// `max_ordinal` of 1 counts only the first annotation per parent.
    pub fn count_annotations(
        &self,
        transcript_id: &str,
        layer_id: &str,
        max_ordinal: Option<u32>,
    ) -> ApiResult<u64> {
        self.store_get(
            "countAnnotations",
            &Params::new()
                .with("id", transcript_id)
                .with("layerId", layer_id)
                .with_opt("maxOrdinal", max_ordinal),
        )
    }

    pub fn get_annotations(
        &self,
        transcript_id: &str,
        layer_id: &str,
        max_ordinal: Option<u32>,
        page: Option<Page>,
    ) -> ApiResult<Vec<Annotation>> {
        self.store_get(
            "getAnnotations",
            &Params::new()
                .with("id", transcript_id)
                .with("layerId", layer_id)
                .with_opt("maxOrdinal", max_ordinal)
                .with_page(page),
        )
    }

    pub fn annotation_pages<'a>(
        &'a self,
        transcript_id: &'a str,
        layer_id: &'a str,
        max_ordinal: Option<u32>,
        page_length: usize,
    ) -> ApiResult<Pages<Annotation, impl FnMut(Page) -> ApiResult<Vec<Annotation>> + 'a>> {
        let start = Page::first(page_length)?;
        Ok(Pages::new(start, move |page| {
            self.get_annotations(transcript_id, layer_id, max_ordinal, Some(page))
        }))
    }

    pub fn get_anchors<S: AsRef<str>>(&self, transcript_id: &str, anchor_ids: &[S]) -> ApiResult<Vec<Anchor>> {
        self.store_get(
            "getAnchors",
            &Params::new()
                .with("id", transcript_id)
                .with_all("anchorIds", anchor_ids),
        )
    }

    /// The transcript's annotation graph, including the given layers.
    pub fn get_transcript<S: AsRef<str>>(&self, transcript_id: &str, layer_ids: &[S]) -> ApiResult<Value> {
        self.store_get(
            "getTranscript",
            &Params::new()
                .with("id", transcript_id)
                .with_all("layerIds", layer_ids),
        )
    }

    pub fn get_media_tracks(&self) -> ApiResult<Vec<MediaTrack>> {
        self.store_get("getMediaTracks", &Params::new())
    }

    pub fn get_available_media(&self, transcript_id: &str) -> ApiResult<Vec<MediaFile>> {
        self.store_get("getAvailableMedia", &Params::new().with("id", transcript_id))
    }

    /// URL of the given media, or `None` if the server cannot provide it.
    ///
    /// `mime_type` may carry conversion parameters, e.g. `audio/wav; samplerate=16000`.
    pub fn get_media_url(
        &self,
        transcript_id: &str,
        track_suffix: &str,
        mime_type: &str,
        start_offset: Option<f64>,
        end_offset: Option<f64>,
    ) -> ApiResult<Option<String>> {
        let params = Params::new()
            .with("id", transcript_id)
            .with("trackSuffix", track_suffix)
            .with("mimeType", mime_type)
            .with_opt("startOffset", start_offset)
            .with_opt("endOffset", end_offset);
        match self.store_get::<Option<String>>("getMedia", &params) {
            Ok(url) => Ok(url.map(|url| url.replace('+', "%20"))),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::Server) => {
                tracing::debug!(error = %err, transcript_id, "media not available");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Downloads the given media into `dir`; `None` if the media does not exist.
    pub fn get_media(
        &self,
        transcript_id: &str,
        track_suffix: &str,
        mime_type: &str,
        start_offset: Option<f64>,
        end_offset: Option<f64>,
        dir: &Path,
    ) -> ApiResult<Option<PathBuf>> {
        let Some(location) =
            self.get_media_url(transcript_id, track_suffix, mime_type, start_offset, end_offset)?
        else {
            return Ok(None);
        };
        let url = self.resolve(&location)?;
        self.post_to_file(&url, &Params::new(), dir, None).map(Some)
    }

    pub fn get_episode_documents(&self, transcript_id: &str) -> ApiResult<Vec<MediaFile>> {
        self.store_get("getEpisodeDocuments", &Params::new().with("id", transcript_id))
    }

    pub fn get_serializer_descriptors(&self) -> ApiResult<Vec<Value>> {
        self.store_get("getSerializerDescriptors", &Params::new())
    }

    pub fn get_deserializer_descriptors(&self) -> ApiResult<Vec<Value>> {
        self.store_get("getDeserializerDescriptors", &Params::new())
    }

    /// Version, parameter and web-app information of an installed annotator module.
    pub fn get_annotator_descriptor(&self, annotator_id: &str) -> ApiResult<Value> {
        self.store_get(
            "getAnnotatorDescriptor",
            &Params::new().with("annotatorId", annotator_id),
        )
    }

    /// Exports a transcript as `mime_type` (e.g. `text/praat-textgrid`) into `dir`.
    ///
    /// Formats that produce several files come back as one `.zip`.
    pub fn format_transcript<S: AsRef<str>>(
        &self,
        transcript_id: &str,
        layer_ids: &[S],
        mime_type: &str,
        dir: &Path,
    ) -> ApiResult<PathBuf> {
        let params = Params::new()
            .with("id", transcript_id)
            .with("mimeType", mime_type)
            .with_all("layerId", layer_ids);
        let url = self.endpoint(&["api", "serialize", "graphs"])?;
        let path = self.post_to_file(&url, &params, dir, None)?;
        tracing::info!(transcript_id, mime_type, path = %path.display(), "transcript exported");
        Ok(path)
    }

    /// Value of a system attribute such as `title`; `None` if it is not defined.
    pub fn get_system_attribute(&self, name: &str) -> ApiResult<Option<String>> {
        let url = self.endpoint(&["api", "systemattributes", name])?;
        match self.get_model::<Option<SystemAttribute>>(&url, &Params::new()) {
            Ok(Some(attribute)) => Ok(match attribute.value {
                Value::Null => None,
                Value::String(text) => Some(text),
                other => Some(other.to_string()),
            }),
            Ok(None) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn get_user_info(&self) -> ApiResult<UserInfo> {
        let url = self.endpoint(&["api", "user"])?;
        self.get_model(&url, &Params::new())
    }

    /// Exports transcript attribute layers as CSV into `dir`.
    pub fn get_transcript_attributes<S: AsRef<str>>(
        &self,
        selection: &TranscriptSelection,
        layer_ids: &[S],
        dir: &Path,
        file_name: Option<&str>,
    ) -> ApiResult<PathBuf> {
        let params = Params::new()
            .with("layer", "transcript")
            .with_all("layer", layer_ids);
        let params = match selection {
            TranscriptSelection::Expression(expression) => params.with("query", expression),
            TranscriptSelection::Ids(ids) => params.with_all("id", ids),
        };
        let url = self.endpoint(&["api", "attributes"])?;
        self.post_to_file(&url, &params, dir, file_name)
    }

    /// Exports participant attribute layers as CSV into `dir`.
    pub fn get_participant_attributes<P: AsRef<str>, L: AsRef<str>>(
        &self,
        participant_ids: &[P],
        layer_ids: &[L],
        dir: &Path,
    ) -> ApiResult<PathBuf> {
        let params = Params::new()
            .with("type", "participant")
            .with("content-type", "text/csv")
            .with("csvFieldDelimiter", ",")
            .with_all("layer", layer_ids)
            .with_all("participantId", participant_ids);
        let url = self.endpoint(&["participantsExport"])?;
        self.post_to_file(&url, &params, dir, None)
    }
}
