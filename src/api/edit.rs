//! Purpose: Store edits: transcript upload and update, deletions, layer generation.
//! Exports: `NewTranscript` and the edit methods on `LabbcatClient`.
//! Role: Requires an account with edit rights; the server enforces that.
//! Invariants: Uploads return the task id the server keyed by the uploaded file name.
#![allow(clippy::result_large_err)]

use super::client::{ApiResult, LabbcatClient, Params};
use super::form::{MultipartForm, upload_name};
use crate::core::error::{Error, ErrorKind};
use serde_json::Value;
use std::path::PathBuf;

/// A transcript file to add, with optional media and classification.
#[derive(Clone, Debug, PartialEq)]
pub struct NewTranscript {
    pub transcript: PathBuf,
    pub media: Option<PathBuf>,
    /// Track suffix of the media file, e.g. `_face`; empty for the main track.
    pub media_suffix: Option<String>,
    pub transcript_type: String,
    pub corpus: String,
    pub episode: String,
}

impl NewTranscript {
    pub fn new(
        transcript: impl Into<PathBuf>,
        transcript_type: impl Into<String>,
        corpus: impl Into<String>,
        episode: impl Into<String>,
    ) -> Self {
        Self {
            transcript: transcript.into(),
            media: None,
            media_suffix: None,
            transcript_type: transcript_type.into(),
            corpus: corpus.into(),
            episode: episode.into(),
        }
    }

    pub fn with_media(mut self, media: impl Into<PathBuf>, suffix: Option<&str>) -> Self {
        self.media = Some(media.into());
        self.media_suffix = suffix.map(str::to_string);
        self
    }
}

impl LabbcatClient {
    fn edit_store_url(&self, name: &str) -> ApiResult<url::Url> {
        self.endpoint(&["api", "edit", "store", name])
    }

    /// Deletes the transcript and all its associated files.
    pub fn delete_transcript(&self, transcript_id: &str) -> ApiResult<()> {
        let url = self.edit_store_url("deleteTranscript")?;
        self.post_form_model::<Value>(&url, &Params::new().with("id", transcript_id))?;
        tracing::info!(transcript_id, "transcript deleted");
        Ok(())
    }

    pub fn delete_participant(&self, participant_id: &str) -> ApiResult<()> {
        let url = self.edit_store_url("deleteParticipant")?;
        self.post_form_model::<Value>(&url, &Params::new().with("id", participant_id))?;
        tracing::info!(participant_id, "participant deleted");
        Ok(())
    }

    /// Uploads a new transcript and returns the id of the task that processes it.
    pub fn new_transcript(&self, upload: &NewTranscript) -> ApiResult<String> {
        let mut form = MultipartForm::new()?
            .text("todo", "new")
            .text("auto", "true")
            .text("transcript_type", &upload.transcript_type)
            .text("corpus", &upload.corpus)
            .text("episode", &upload.episode)
            .file("uploadfile1_0", &upload.transcript)?;
        if let Some(media) = &upload.media {
            let suffix = upload.media_suffix.as_deref().unwrap_or_default();
            form = form.file(&format!("uploadmedia{suffix}1"), media)?;
        }
        let name = upload_name(&upload.transcript)?;
        self.upload_transcript(&form, &name)
    }

    /// Uploads a new version of an existing transcript; returns the processing task id.
    pub fn update_transcript(&self, transcript: &std::path::Path) -> ApiResult<String> {
        let form = MultipartForm::new()?
            .text("todo", "update")
            .text("auto", "true")
            .file("uploadfile1_0", transcript)?;
        let name = upload_name(transcript)?;
        self.upload_transcript(&form, &name)
    }

    /// Uploads an edited fragment (e.g. a TextGrid from `get_fragments`) back into its transcript.
    ///
    /// Returns the server's description of the updated fragment (url, start and end times).
    pub fn update_fragment(&self, fragment: &std::path::Path) -> ApiResult<Value> {
        let form = MultipartForm::new()?
            .text("todo", "upload")
            .text("automaticMapping", "true")
            .file("uploadfile", fragment)?;
        let url = self.endpoint(&["edit", "uploadFragment"])?;
        let model: Value = self.post_multipart_model(&url, &form)?;
        tracing::info!(fragment = %fragment.display(), "fragment updated");
        Ok(model)
    }

    /// Starts a task that tags the given utterances on `layer_id`.
    pub fn generate_layer_utterances<S: AsRef<str>>(
        &self,
        match_ids: &[S],
        layer_id: &str,
        collection_name: Option<&str>,
    ) -> ApiResult<String> {
        let params = Params::new()
            .with("todo", "generate-now")
            .with("generate_layer", layer_id)
            .with_all("utterances", match_ids)
            .with_opt("collection_name", collection_name);
        let url = self.endpoint(&["generateLayerUtterances"])?;
        let model: Value = self.post_form_model(&url, &params)?;
        let task_id = id_text(model.get("threadId")).ok_or_else(|| {
            Error::new(ErrorKind::Protocol).with_message("response model has no threadId")
        })?;
        tracing::info!(task_id = %task_id, layer_id, "layer generation started");
        Ok(task_id)
    }

    fn upload_transcript(&self, form: &MultipartForm, name: &str) -> ApiResult<String> {
        let url = self.endpoint(&["edit", "transcript", "new"])?;
        let model: Value = self.post_multipart_model(&url, form)?;
        let Some(result) = model.get("result") else {
            return Err(Error::new(ErrorKind::Protocol)
                .with_message(format!("malformed response model, no result: {model}")));
        };
        let task_id = id_text(result.get(name)).ok_or_else(|| {
            Error::new(ErrorKind::Protocol).with_message(format!(
                "malformed response model, '{name}' not present: {model}"
            ))
        })?;
        tracing::info!(transcript = name, task_id = %task_id, "transcript uploaded");
        Ok(task_id)
    }
}

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
