//! Purpose: Save a downloaded response body into a directory.
//! Exports: `save_response` (crate-internal).
//! Role: Shared by media, fragment, attribute CSV and task result downloads.
//! Invariants: The target directory is created if missing.
//! Invariants: File names never escape the target directory.
use crate::core::error::{Error, ErrorKind};
use percent_encoding::percent_decode_str;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

const FALLBACK_STEM: &str = "download";

/// Writes `response` to `dir`, naming the file by `file_name`, then the
/// Content-Disposition header, then the last URL path segment.
pub(crate) fn save_response(
    response: ureq::Response,
    url: &Url,
    dir: &Path,
    file_name: Option<&str>,
) -> Result<PathBuf, Error> {
    let extension = extension_for_content_type(response.content_type());
    let name = file_name
        .and_then(sanitize_file_name)
        .or_else(|| {
            response
                .header("Content-Disposition")
                .and_then(file_name_from_disposition)
        })
        .or_else(|| file_name_from_url(url, extension))
        .unwrap_or_else(|| format!("{FALLBACK_STEM}{extension}"));

    std::fs::create_dir_all(dir).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to create directory {}", dir.display()))
            .with_source(err)
    })?;
    let path = dir.join(name);
    let mut file = File::create(&path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to create {}", path.display()))
            .with_source(err)
    })?;
    let mut reader = response.into_reader();
    let written = io::copy(&mut reader, &mut file).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to write {}", path.display()))
            .with_url(url.as_str())
            .with_source(err)
    })?;
    tracing::debug!(path = %path.display(), bytes = written, "saved download");
    Ok(path)
}

pub(crate) fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/csv" => ".csv",
        "application/json" => ".json",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "application/zip" => ".zip",
        "audio/wav" | "audio/x-wav" => ".wav",
        "audio/mpeg" => ".mp3",
        "video/mpeg" | "video/mp4" => ".mp4",
        "text/praat-textgrid" => ".TextGrid",
        "text/xml" | "application/xml" => ".xml",
        _ => ".bin",
    }
}

/// Extracts `filename` from e.g. `attachment; filename="blah.wav"`.
pub(crate) fn file_name_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .and_then(|name| sanitize_file_name(&name))
}

pub(crate) fn file_name_from_url(url: &Url, extension: &str) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let decoded = percent_decode_str(last).decode_utf8_lossy();
    let mut name = sanitize_file_name(&decoded)?;
    if !name.ends_with(extension) {
        name.push_str(extension);
    }
    Some(name)
}

/// Keeps only the final path component; empty and dot names are rejected.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}
