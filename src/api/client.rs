//! Purpose: Provide the blocking HTTP client every LaBB-CAT operation goes through.
//! Exports: `LabbcatClient`.
//! Role: Owns base URL, credentials, language, TLS and the shared `ureq` agent.
//! Invariants: The base URL uses http(s) and always ends with `/`.
//! Invariants: Every request carries Accept-Language, User-Agent and (if set) Basic auth.
//! Invariants: JSON responses are always routed through `core::envelope` before use.
//! Invariants: The server version is learned once, from the first successful envelope.
#![allow(clippy::result_large_err)]

use super::download::save_response;
use super::form::MultipartForm;
use crate::core::envelope::{Envelope, parse_envelope};
use crate::core::error::{Error, ErrorKind};
use crate::core::page::Page;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub(crate) type ApiResult<T> = Result<T, Error>;

const USER_AGENT: &str = concat!("labbcat-rs/", env!("CARGO_PKG_VERSION"));
const DEFAULT_LANGUAGE: &str = "en";
/// First server build exposing the `api/search`, `api/results` and `api/utterances` endpoints.
const API_SEARCH_MIN_VERSION: &str = "20230511.1949";

#[derive(Clone)]
pub struct LabbcatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    credentials: Option<Credentials>,
    language: String,
    timeout: Option<Duration>,
    tls: Option<Arc<rustls::ClientConfig>>,
    agent: ureq::Agent,
    server_version: Mutex<Option<String>>,
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for LabbcatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabbcatClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("credentials", &self.inner.credentials)
            .field("language", &self.inner.language)
            .finish()
    }
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Request parameters in send order; repeated keys encode lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    pub(crate) fn with_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    pub(crate) fn with_all<I, V>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        for value in values {
            self.pairs.push((key.to_string(), value.as_ref().to_string()));
        }
        self
    }

    pub(crate) fn with_page(self, page: Option<Page>) -> Self {
        match page {
            Some(page) => {
                let [length, number] = page.query_pairs();
                self.with(length.0, length.1).with(number.0, number.1)
            }
            None => self,
        }
    }

    pub(crate) fn pairs(&self) -> Vec<(&str, &str)> {
        self.pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }
}

pub(crate) enum Body<'a> {
    Empty,
    Form(&'a Params),
    Json(&'a Value),
    Multipart(&'a MultipartForm),
}

impl LabbcatClient {
    pub fn new(base_url: impl AsRef<str>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.as_ref())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                credentials: None,
                language: DEFAULT_LANGUAGE.to_string(),
                timeout: None,
                tls: None,
                agent: build_agent(None, None),
                server_version: Mutex::new(None),
            }),
        })
    }

    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let credentials = Credentials {
            username: username.into(),
            password: password.into(),
        };
        self.modify(|inner| inner.credentials = Some(credentials))
    }

    /// Language code for server message localization, e.g. `es-AR`.
    pub fn with_language(self, language: impl Into<String>) -> Self {
        let language = language.into();
        self.modify(|inner| inner.language = language)
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.modify(|inner| {
            inner.timeout = Some(timeout);
            inner.agent = build_agent(inner.timeout, inner.tls.clone());
        })
    }

    pub fn with_tls_ca_file(self, path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "failed to read TLS CA/certificate file {}",
                    path.display()
                ))
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "failed to parse TLS CA/certificate file {}",
                        path.display()
                    ))
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "TLS CA/certificate file {} contains no certificates",
                path.display()
            )));
        }

        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "TLS CA/certificate file {} contains no parsable certificates",
                path.display()
            )));
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Ok(self.with_tls_config(Arc::new(tls_config)))
    }

    pub fn with_tls_skip_verify(self) -> Self {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
            .with_no_client_auth();
        self.with_tls_config(Arc::new(tls_config))
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn language(&self) -> &str {
        &self.inner.language
    }

    /// Server build version, once any successful response has reported it.
    pub fn server_version(&self) -> Option<String> {
        self.inner
            .server_version
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Whether the server predates the `api/...` search endpoints.
    pub(crate) fn uses_legacy_search(&self) -> ApiResult<bool> {
        if self.server_version().is_none() {
            self.get_id()?;
        }
        Ok(self
            .server_version()
            .is_some_and(|version| is_legacy_version(&version)))
    }

    /// Resolves a resource path relative to the base URL, one segment per element.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.inner.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                Error::new(ErrorKind::Usage).with_message("base url cannot be a base")
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Resolves a URL the server handed back, which may be absolute or base-relative.
    pub(crate) fn resolve(&self, location: &str) -> ApiResult<Url> {
        Url::parse(location)
            .or_else(|_| self.inner.base_url.join(location))
            .map_err(|err| {
                Error::new(ErrorKind::Protocol)
                    .with_message(format!("server returned an invalid url: {location}"))
                    .with_source(err)
            })
    }

    pub(crate) fn get_model<R>(&self, url: &Url, params: &Params) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request_model("GET", url, params, Body::Empty)
    }

    pub(crate) fn post_form_model<R>(&self, url: &Url, params: &Params) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request_model("POST", url, &Params::new(), Body::Form(params))
    }

    pub(crate) fn send_json_model<T, R>(&self, method: &str, url: &Url, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;
        self.request_model(method, url, &Params::new(), Body::Json(&payload))
    }

    pub(crate) fn delete_model<R>(&self, url: &Url) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request_model("DELETE", url, &Params::new(), Body::Empty)
    }

    pub(crate) fn post_multipart_model<R>(&self, url: &Url, form: &MultipartForm) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request_model("POST", url, &Params::new(), Body::Multipart(form))
    }

    /// Posts `params` as a form and saves the response body into `dir`.
    pub(crate) fn post_to_file(
        &self,
        url: &Url,
        params: &Params,
        dir: &Path,
        file_name: Option<&str>,
    ) -> ApiResult<PathBuf> {
        let body = if params.pairs.is_empty() {
            Body::Empty
        } else {
            Body::Form(params)
        };
        let method = if params.pairs.is_empty() { "GET" } else { "POST" };
        let (status, response) = self.dispatch(method, url, &Params::new(), body, "*/*")?;
        let response = expect_success(status, response, url)?;
        save_response(response, url, dir, file_name)
    }

    /// Posts a multipart form whose reply is plain text (e.g. CSV) rather than an envelope.
    pub(crate) fn post_multipart_text(&self, url: &Url, form: &MultipartForm) -> ApiResult<String> {
        let (status, response) =
            self.dispatch("POST", url, &Params::new(), Body::Multipart(form), "text/csv, */*")?;
        let response = expect_success(status, response, url)?;
        let mut body = String::new();
        response.into_reader().read_to_string(&mut body).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read response body")
                .with_url(url.as_str())
                .with_source(err)
        })?;
        Ok(body)
    }

    fn request_model<R>(&self, method: &str, url: &Url, query: &Params, body: Body<'_>) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let (status, response) = self.dispatch(method, url, query, body, "application/json")?;
        let envelope = read_envelope(status, response).map_err(|err| err.with_url(url.as_str()))?;
        self.remember_version(&envelope);
        for message in envelope.messages() {
            tracing::debug!(%message, "server message");
        }
        envelope
            .into_model()
            .map_err(|err| err.with_url(url.as_str()))
    }

    /// Sends a request; HTTP error statuses come back as `Ok` so callers can read the body.
    fn dispatch(
        &self,
        method: &str,
        url: &Url,
        query: &Params,
        body: Body<'_>,
        accept: &str,
    ) -> ApiResult<(u16, ureq::Response)> {
        tracing::debug!(method, url = %url, params = ?query.pairs(), "sending request");
        let mut request = self
            .inner
            .agent
            .request_url(method, url)
            .set("Accept", accept)
            .set("Accept-Language", &self.inner.language)
            .set("User-Agent", USER_AGENT);
        if let Some(credentials) = &self.inner.credentials {
            request = request.set("Authorization", &basic_auth(credentials));
        }
        for (key, value) in query.pairs() {
            request = request.query(key, value);
        }

        let result = match body {
            Body::Empty => request.call(),
            Body::Form(params) => request.send_form(&params.pairs()),
            Body::Json(value) => request
                .set("Content-Type", "application/json")
                .send_string(&value.to_string()),
            Body::Multipart(form) => request
                .set("Content-Type", &form.content_type())
                .send_bytes(&form.to_bytes()),
        };

        match result {
            Ok(response) => {
                tracing::debug!(status = response.status(), url = %url, "response");
                Ok((response.status(), response))
            }
            Err(ureq::Error::Status(code, response)) => {
                tracing::debug!(status = code, url = %url, "error response");
                Ok((code, response))
            }
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_url(url.as_str())
                .with_source(err)),
        }
    }

    fn remember_version(&self, envelope: &Envelope) {
        let Some(version) = envelope.version.as_ref() else {
            return;
        };
        let mut known = self
            .inner
            .server_version
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if known.is_none() {
            tracing::debug!(%version, "server version");
            *known = Some(version.clone());
        }
    }

    fn with_tls_config(self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.modify(|inner| {
            inner.tls = Some(tls);
            inner.agent = build_agent(inner.timeout, inner.tls.clone());
        })
    }

    fn modify(mut self, apply: impl FnOnce(&mut ClientInner)) -> Self {
        if Arc::get_mut(&mut self.inner).is_none() {
            self.inner = Arc::new(self.inner.duplicate());
        }
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            apply(inner);
        }
        self
    }
}

impl ClientInner {
    fn duplicate(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            credentials: self.credentials.clone(),
            language: self.language.clone(),
            timeout: self.timeout,
            tls: self.tls.clone(),
            agent: self.agent.clone(),
            server_version: Mutex::new(
                self.server_version
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .clone(),
            ),
        }
    }
}

fn build_agent(timeout: Option<Duration>, tls: Option<Arc<rustls::ClientConfig>>) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(tls) = tls {
        builder = builder.tls_config(tls);
    }
    builder.build()
}

/// Non-2xx raw responses become the envelope's error when there is one.
fn expect_success(status: u16, response: ureq::Response, url: &Url) -> ApiResult<ureq::Response> {
    if (200..300).contains(&status) {
        return Ok(response);
    }
    Err(read_envelope(status, response)
        .err()
        .unwrap_or_else(|| {
            Error::new(ErrorKind::Server)
                .with_message(format!("request failed with status {status}"))
                .with_status(status)
        })
        .with_url(url.as_str()))
}

/// Reads the whole body; `into_string` would cap it at 10 MB.
fn read_envelope(status: u16, response: ureq::Response) -> ApiResult<Envelope> {
    let mut body = String::new();
    response.into_reader().read_to_string(&mut body).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_status(status)
            .with_source(err)
    })?;
    parse_envelope(status, &body)
}

fn basic_auth(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.username, credentials.password);
    format!("Basic {}", BASE64.encode(raw))
}

fn normalize_base_url(raw: &str) -> ApiResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid server url: {raw}"))
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("server url must use http or https scheme")
            .with_hint("Use the LaBB-CAT home page URL, e.g. https://labbcat.example.org/labbcat/"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Server versions are `yyyymmdd.hhmm` stamps, so string order is build order.
fn is_legacy_version(version: &str) -> bool {
    !version.is_empty() && version < API_SEARCH_MIN_VERSION
}
