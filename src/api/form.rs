//! Purpose: Encode `multipart/form-data` request bodies for uploads.
//! Exports: `MultipartForm` (crate-internal).
//! Role: Used by transcript upload and match-annotation CSV upload.
//! Invariants: Parts are written in insertion order; repeated names are allowed.
//! Invariants: The boundary is random per form.
use crate::core::error::{Error, ErrorKind};
use getrandom::fill as fill_random;
use std::path::Path;

const BOUNDARY_PREFIX: &str = "labbcat-rs-";

#[derive(Clone, Debug)]
pub(crate) struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

#[derive(Clone, Debug)]
enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl MultipartForm {
    pub(crate) fn new() -> Result<Self, Error> {
        let mut bytes = [0u8; 16];
        fill_random(&mut bytes).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message(format!("failed to generate multipart boundary: {err}"))
        })?;
        Ok(Self::with_boundary(format!("{BOUNDARY_PREFIX}{}", hex_encode(&bytes))))
    }

    fn with_boundary(boundary: String) -> Self {
        Self {
            boundary,
            parts: Vec::new(),
        }
    }

    pub(crate) fn text(mut self, name: &str, value: impl ToString) -> Self {
        self.parts.push(Part::Text {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub(crate) fn texts<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        for value in values {
            self = self.text(name, value.as_ref());
        }
        self
    }

    pub(crate) fn bytes(
        mut self,
        name: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(Part::File {
            name: name.to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        self
    }

    /// Attaches a file from disk under its own file name.
    pub(crate) fn file(self, name: &str, path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read {}", path.display()))
                .with_source(err)
        })?;
        let file_name = upload_name(path)?;
        let content_type = guess_content_type(&file_name);
        Ok(self.bytes(name, &file_name, content_type, bytes))
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match part {
                Part::Text { name, value } => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(name)
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(value.as_bytes());
                }
                Part::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape_quoted(name),
                            escape_quoted(file_name)
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                    out.extend_from_slice(bytes);
                }
            }
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        out
    }
}

/// File name a path is uploaded as; the server keys results by it.
pub(crate) fn upload_name(path: &Path) -> Result<String, Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("not a file path: {}", path.display()))
        })
}

fn guess_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "xml" | "trs" | "eaf" => "text/xml",
        "textgrid" => "text/praat-textgrid",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
