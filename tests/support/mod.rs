//! Purpose: In-process fake LaBB-CAT server for integration tests.
//! Role: Serves canned envelopes under `/labbcat/`, simulates search tasks, records requests.
//! Invariants: Binds loopback on an ephemeral port; shuts down on drop.
#![allow(dead_code)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

pub const MODERN_VERSION: &str = "20240312.1021";
pub const LEGACY_VERSION: &str = "20230118.1435";
pub const TEST_USER: &str = "tester";
pub const TEST_PASSWORD: &str = "s3cret";

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Recorded {
    /// First value for `key` in the query string or url-encoded form body.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params(key).into_iter().next()
    }

    pub fn params(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .chain(self.form.iter())
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeTask {
    /// Status polls that still report the task as running.
    pub polls_left: u32,
    pub cancelled: bool,
    pub released: bool,
}

#[derive(Debug)]
pub struct FakeState {
    pub version: String,
    pub require_auth: bool,
    /// Polls a new search task stays running for.
    pub task_polls: u32,
    pub tasks: BTreeMap<String, FakeTask>,
    pub requests: Vec<Recorded>,
    /// Match results fail with 503 Service Unavailable.
    pub fail_results: bool,
    /// When non-zero, transcript id listings return this many generated ids.
    pub bulk_transcripts: usize,
    next_task: u64,
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeServer {
    pub base_url: String,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start() -> TestResult<Self> {
        Self::start_with(MODERN_VERSION, false)
    }

    pub fn start_with(version: &str, require_auth: bool) -> TestResult<Self> {
        let state = Arc::new(Mutex::new(FakeState {
            version: version.to_string(),
            require_auth,
            task_polls: 1,
            tasks: BTreeMap::new(),
            requests: Vec::new(),
            fail_results: false,
            bulk_transcripts: 0,
            next_task: 100,
        }));
        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let (addr_tx, addr_rx) = mpsc::channel::<std::io::Result<SocketAddr>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = addr_tx.send(Err(err));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = addr_tx.send(Err(err));
                        return;
                    }
                };
                let _ = addr_tx.send(listener.local_addr());
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });
        });
        let addr = addr_rx.recv()??;
        Ok(Self {
            base_url: format!("http://{addr}/labbcat/"),
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn set_task_polls(&self, polls: u32) {
        self.state().task_polls = polls;
    }

    pub fn set_fail_results(&self, fail: bool) {
        self.state().fail_results = fail;
    }

    pub fn set_bulk_transcripts(&self, count: usize) {
        self.state().bulk_transcripts = count;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state().requests.clone()
    }

    /// Requests whose path (relative to `/labbcat/`) equals `path`.
    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    pub fn task(&self, id: &str) -> Option<FakeTask> {
        self.state().tasks.get(id).cloned()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn pairs(raw: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw).into_owned().collect()
}

async fn handle(
    State(shared): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path()
        .strip_prefix("/labbcat/")
        .unwrap_or(uri.path())
        .to_string();
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
    let recorded = Recorded {
        method: method.to_string(),
        path: path.clone(),
        query: pairs(uri.query().unwrap_or_default().as_bytes()),
        form: if is_form { pairs(&body) } else { Vec::new() },
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect(),
        body: body.to_vec(),
    };

    let mut state = shared.lock().unwrap_or_else(|poison| poison.into_inner());
    state.requests.push(recorded.clone());
    if state.require_auth && recorded.header("authorization") != Some(expected_auth().as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "text/html")],
            "<html><body>Unauthorized</body></html>".to_string(),
        )
            .into_response();
    }
    route(&mut state, &path, &recorded)
}

fn expected_auth() -> String {
    use base64::Engine as _;
    let raw = format!("{TEST_USER}:{TEST_PASSWORD}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}

fn ok(state: &FakeState, model: Value) -> Response {
    let body = json!({
        "title": "LaBB-CAT",
        "version": state.version,
        "code": 0,
        "errors": [],
        "messages": [],
        "model": model,
    });
    (StatusCode::OK, axum::Json(body)).into_response()
}

fn fail(state: &FakeState, status: StatusCode, error: impl Into<String>) -> Response {
    let body = json!({
        "title": "LaBB-CAT",
        "version": state.version,
        "code": 1,
        "errors": [error.into()],
        "messages": [],
        "model": null,
    });
    (status, axum::Json(body)).into_response()
}

fn file(content_type: &str, name: &str, body: impl Into<Vec<u8>>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        body.into(),
    )
        .into_response()
}

fn paged(items: Vec<Value>, request: &Recorded) -> Vec<Value> {
    let Some(length) = request
        .param("pageLength")
        .and_then(|value| value.parse::<usize>().ok())
    else {
        return items;
    };
    let number = request
        .param("pageNumber")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    items.into_iter().skip(length * number).take(length).collect()
}

fn participant_ids() -> Vec<Value> {
    ["AP511_MikeThorpe", "AP513_Steve", "UC427_ViktoriaPapp", "UC475_Ann", "QB247_Jacqui"]
        .into_iter()
        .map(Value::from)
        .collect()
}

fn transcript_ids() -> Vec<Value> {
    ["AP511_MikeThorpe.eaf", "AP513_Steve.eaf", "UC427_ViktoriaPapp_A_ENG.eaf"]
        .into_iter()
        .map(Value::from)
        .collect()
}

fn layer(id: &str) -> Value {
    json!({
        "id": id,
        "parentId": "word",
        "description": format!("{id} layer"),
        "alignment": 0,
        "peers": false,
        "peersOverlap": false,
        "parentIncludes": true,
        "saturated": true,
        "type": "string",
        "validLabels": {},
    })
}

fn matches() -> Vec<Value> {
    (1..=5)
        .map(|n| {
            json!({
                "MatchId": format!("g_{n};em_12_{n}0;n_{n}-n_{n}1;p_1;#=ew_0_{n};prefix={n:03}-;[0]=ew_0_{n}"),
                "Transcript": "AP511_MikeThorpe.eaf",
                "Participant": "AP511_MikeThorpe",
                "Corpus": "AP",
                "Line": 10.0 * n as f64,
                "LineEnd": 10.0 * n as f64 + 2.5,
                "BeforeMatch": "in",
                "Text": "the",
                "AfterMatch": "town",
            })
        })
        .collect()
}

fn annotations() -> Vec<Value> {
    ["in", "the", "town"]
        .into_iter()
        .enumerate()
        .map(|(index, label)| {
            json!({
                "id": format!("ew_0_{index}"),
                "layerId": "orthography",
                "label": label,
                "startId": format!("n_{index}"),
                "endId": format!("n_{}", index + 1),
                "parentId": format!("em_12_{index}"),
                "ordinal": 1,
                "confidence": 100,
            })
        })
        .collect()
}

fn start_task(state: &mut FakeState) -> String {
    state.next_task += 1;
    let id = state.next_task.to_string();
    state.tasks.insert(
        id.clone(),
        FakeTask {
            polls_left: state.task_polls,
            ..FakeTask::default()
        },
    );
    id
}

fn task_json(id: &str, task: &FakeTask) -> Value {
    let running = task.polls_left > 0 && !task.cancelled;
    json!({
        "threadId": id.parse::<u64>().unwrap_or_default(),
        "threadName": format!("search {id}"),
        "running": running,
        "percentComplete": if running { 50 } else { 100 },
        "status": if task.cancelled { "Cancelled" } else if running { "Searching" } else { "Complete" },
        "resultUrl": if running { Value::Null } else { json!(format!("files/results-{id}.csv")) },
        "duration": 2,
        "refreshSeconds": 1,
    })
}

fn route(state: &mut FakeState, path: &str, request: &Recorded) -> Response {
    let legacy = state.version.as_str() < "20230511.1949";
    match (request.method.as_str(), path) {
        ("GET", "version") => {
            let version = state.version.clone();
            ok(state, json!({"System": version, "Java": "17.0.2"}))
        }
        (_, "api/store/getId") => ok(state, json!("http://fake.labbcat.test/labbcat/")),
        (_, "api/store/getLayerIds") => ok(state, json!(["transcript", "participant", "orthography"])),
        (_, "api/store/getLayers") => ok(state, json!([layer("orthography"), layer("segment")])),
        (_, "api/store/getLayer") => match request.param("id") {
            Some(id @ ("orthography" | "segment")) => ok(state, layer(id)),
            Some(id) => fail(state, StatusCode::NOT_FOUND, format!("Layer not found: {id}")),
            None => fail(state, StatusCode::BAD_REQUEST, "No ID specified"),
        },
        (_, "api/store/getCorpusIds") => ok(state, json!(["AP", "QB", "UC"])),
        (_, "api/store/getParticipantIds") => ok(state, Value::Array(participant_ids())),
        (_, "api/store/getParticipant") => match request.param("id") {
            Some("AP511_MikeThorpe") => ok(state, json!({"id": "AP511_MikeThorpe", "label": "AP511_MikeThorpe"})),
            _ => ok(state, Value::Null),
        },
        (_, "api/store/countMatchingParticipantIds") => {
            ok(state, json!(participant_ids().len()))
        }
        (_, "api/store/getMatchingParticipantIds") => {
            ok(state, Value::Array(paged(participant_ids(), request)))
        }
        (_, "api/store/getTranscriptIds") if state.bulk_transcripts > 0 => {
            let ids = (0..state.bulk_transcripts)
                .map(|n| Value::from(format!("transcript-{n:08}.eaf")))
                .collect();
            ok(state, Value::Array(ids))
        }
        (_, "api/store/getTranscriptIds")
        | (_, "api/store/getTranscriptIdsInCorpus")
        | (_, "api/store/getTranscriptIdsWithParticipant") => {
            ok(state, Value::Array(transcript_ids()))
        }
        (_, "api/store/countMatchingTranscriptIds") => ok(state, json!(transcript_ids().len())),
        (_, "api/store/getMatchingTranscriptIds") => {
            let mut ids = transcript_ids();
            if request.param("order").is_some_and(|order| order.ends_with("DESC")) {
                ids.reverse();
            }
            ok(state, Value::Array(paged(ids, request)))
        }
        (_, "api/store/countAnnotations") => ok(state, json!(annotations().len())),
        (_, "api/store/getAnnotations") => ok(state, Value::Array(paged(annotations(), request))),
        (_, "api/store/getAnnotatorDescriptor") => match request.param("annotatorId") {
            Some(id @ "HTKAligner") => ok(
                state,
                json!({"annotatorId": id, "version": "2.1", "hasConfigWebapp": true}),
            ),
            Some(id) => fail(state, StatusCode::NOT_FOUND, format!("Annotator not found: {id}")),
            None => fail(state, StatusCode::BAD_REQUEST, "No annotatorId specified"),
        },
        (_, "api/store/getMedia") => match request.param("trackSuffix") {
            Some("") => ok(
                state,
                json!("http://fake.labbcat.test/labbcat/files/AP511+MikeThorpe.wav"),
            ),
            _ => fail(state, StatusCode::NOT_FOUND, "Media not found"),
        },
        ("GET", "api/user") => ok(state, json!({"user": TEST_USER, "roles": ["view", "edit"]})),
        ("GET", "api/systemattributes/title") => {
            ok(state, json!({"name": "title", "value": "Fake LaBB-CAT"}))
        }
        ("GET", p) if p.starts_with("api/systemattributes/") => {
            fail(state, StatusCode::NOT_FOUND, "Attribute not found")
        }
        (_, "api/search") | (_, "search") => {
            if (path == "search") != legacy {
                return fail(state, StatusCode::NOT_FOUND, "wrong search endpoint");
            }
            let id = start_task(state);
            ok(state, json!({"threadId": id.parse::<u64>().unwrap_or_default()}))
        }
        (_, "api/utterances") | (_, "allUtterances") => {
            if (path == "allUtterances") != legacy {
                return fail(state, StatusCode::NOT_FOUND, "wrong utterances endpoint");
            }
            if request.params("id").is_empty() {
                return fail(state, StatusCode::BAD_REQUEST, "No participants specified");
            }
            let id = start_task(state);
            ok(state, json!({"threadId": id.parse::<u64>().unwrap_or_default()}))
        }
        ("POST", "generateLayerUtterances") => {
            let id = start_task(state);
            ok(state, json!({"threadId": id}))
        }
        ("GET", p) if p.starts_with("files/results-") => {
            let name = p.trim_start_matches("files/");
            file("text/csv", name, "MatchId,Text\ng_1;em_12_10,the\n")
        }
        (_, "thread") => {
            let id = request.param("threadId").unwrap_or_default().to_string();
            let Some(task) = state.tasks.get_mut(&id) else {
                return fail(state, StatusCode::NOT_FOUND, format!("Invalid task ID: {id}"));
            };
            let snapshot = task_json(&id, task);
            task.polls_left = task.polls_left.saturating_sub(1);
            ok(state, snapshot)
        }
        (_, "threads") => match (request.param("threadId"), request.param("command")) {
            (Some(id), Some(command)) => {
                let id = id.to_string();
                let Some(task) = state.tasks.get_mut(&id) else {
                    return fail(state, StatusCode::NOT_FOUND, format!("Invalid task ID: {id}"));
                };
                match command {
                    "cancel" => task.cancelled = true,
                    "release" => task.released = true,
                    _ => return fail(state, StatusCode::BAD_REQUEST, "unknown command"),
                }
                ok(state, Value::Null)
            }
            _ => {
                let tasks: serde_json::Map<String, Value> = state
                    .tasks
                    .iter()
                    .filter(|(_, task)| !task.released)
                    .map(|(id, task)| (id.clone(), task_json(id, task)))
                    .collect();
                ok(state, Value::Object(tasks))
            }
        },
        (_, "api/results") | (_, "resultsStream") => {
            if (path == "resultsStream") != legacy {
                return fail(state, StatusCode::NOT_FOUND, "wrong results endpoint");
            }
            let id = request.param("threadId").unwrap_or_default().to_string();
            if !state.tasks.contains_key(&id) {
                return fail(state, StatusCode::NOT_FOUND, format!("Invalid task ID: {id}"));
            }
            if state.fail_results {
                return fail(state, StatusCode::SERVICE_UNAVAILABLE, "Results unavailable");
            }
            ok(state, json!({"name": "the", "matches": paged(matches(), request)}))
        }
        ("POST", "api/getMatchAnnotations") => {
            let rows = request.body_text().matches("g_").count();
            let mut model = Vec::new();
            for row in 0..rows {
                if row % 2 == 0 {
                    model.push(json!([{"id": format!("ew_2_{row}"), "label": "DT", "layerId": "pos"}]));
                } else {
                    model.push(json!([null]));
                }
            }
            ok(state, Value::Array(model))
        }
        (_, "soundfragment") => {
            let name = format!(
                "{}{}__{}-{}.wav",
                request.param("prefix").unwrap_or_default(),
                request
                    .param("id")
                    .unwrap_or("fragment")
                    .trim_end_matches(".eaf"),
                request.param("start").unwrap_or("0"),
                request.param("end").unwrap_or("0"),
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "audio/wav".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{name}\""),
                    ),
                ],
                b"RIFF\0\0\0\0WAVE".to_vec(),
            )
                .into_response()
        }
        ("POST", "api/serialize/fragment") => {
            if request.param("async") == Some("true") {
                let id = start_task(state);
                return ok(state, json!({"threadId": id}));
            }
            let name = format!(
                "{}__{}-{}.TextGrid",
                request.param("id").unwrap_or("fragment").trim_end_matches(".eaf"),
                request.param("start").unwrap_or("0"),
                request.param("end").unwrap_or("0"),
            );
            if request.param("id") == Some("missing.eaf") {
                return fail(state, StatusCode::NOT_FOUND, "Transcript not found: missing.eaf");
            }
            file("text/praat-textgrid", &name, "File type = \"ooTextFile\"\n")
        }
        ("POST", "api/serialize/graphs") => {
            let name = request
                .param("id")
                .unwrap_or("graph")
                .trim_end_matches(".eaf")
                .to_string();
            file("text/praat-textgrid", &format!("{name}.TextGrid"), "File type = \"ooTextFile\"\n")
        }
        ("POST", "api/attributes") | ("POST", "participantsExport") => {
            file("text/csv", "attributes.csv", "id,value\nAP511_MikeThorpe,1\n")
        }
        ("POST", "edit/uploadFragment") => {
            let text = request.body_text();
            if !text.contains("name=\"uploadfile\"; filename=\"") {
                return fail(state, StatusCode::BAD_REQUEST, "No file uploaded");
            }
            ok(
                state,
                json!({"url": "http://fake.labbcat.test/labbcat/transcript?id=AP511_MikeThorpe.eaf", "start_time": "10.0", "end_time": "12.5"}),
            )
        }
        ("GET", "dictionaries") => ok(
            state,
            json!({"CELEX-EN": ["Wordform->Phonology", "Wordform->Lemma"], "Flat": []}),
        ),
        ("POST", "dictionary") => {
            let csv = "the,D@,Di:\nxyzzy,\n\"a, b\",\"x \"\"y\"\"\"\n";
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], csv).into_response()
        }
        ("POST", "api/edit/dictionary/add") if request.param("entry").is_none() => {
            fail(state, StatusCode::BAD_REQUEST, "No entry specified")
        }
        ("POST", "api/edit/dictionary/add") | ("POST", "api/edit/dictionary/remove") => {
            ok(state, Value::Null)
        }
        ("POST", "api/edit/store/deleteParticipant") => match request.param("id") {
            Some("nobody") => fail(state, StatusCode::NOT_FOUND, "Participant not found: nobody"),
            _ => ok(state, Value::Null),
        },
        ("POST", "edit/transcript/new") => {
            let text = request.body_text();
            let Some(name) = uploaded_file_name(&text) else {
                return fail(state, StatusCode::BAD_REQUEST, "No file uploaded");
            };
            let id = start_task(state);
            let mut result = serde_json::Map::new();
            result.insert(name, json!(id));
            ok(state, json!({ "result": result }))
        }
        ("POST", "api/edit/store/deleteTranscript") => match request.param("id") {
            Some("missing.eaf") => {
                fail(state, StatusCode::NOT_FOUND, "Transcript not found: missing.eaf")
            }
            _ => ok(state, Value::Null),
        },
        (method, p) if p.starts_with("api/admin/") => admin(state, method, p, request),
        _ => fail(state, StatusCode::NOT_FOUND, format!("no such resource: {path}")),
    }
}

fn uploaded_file_name(body: &str) -> Option<String> {
    let start = body.find("name=\"uploadfile1_0\"; filename=\"")? + "name=\"uploadfile1_0\"; filename=\"".len();
    let rest = &body[start..];
    Some(rest[..rest.find('"')?].to_string())
}

fn admin(state: &FakeState, method: &str, path: &str, request: &Recorded) -> Response {
    let mut segments = path.trim_start_matches("api/admin/").splitn(2, '/');
    let collection = segments.next().unwrap_or_default();
    let key = segments.next();
    match (method, collection, key) {
        ("GET", "corpora", None) => ok(
            state,
            Value::Array(paged(
                vec![
                    json!({"corpus_id": 1, "corpus_name": "AP", "corpus_language": "en", "corpus_description": "Adult phonology"}),
                    json!({"corpus_id": 2, "corpus_name": "QB", "corpus_language": "mi", "corpus_description": "Quake Box", "_cantDelete": "has transcripts"}),
                ],
                request,
            )),
        ),
        ("GET", "roles", None) => ok(state, json!([{"role_id": "view", "description": "View"}])),
        ("GET", "projects", None) => ok(state, json!([])),
        ("GET", "mediatracks", None) => {
            ok(state, json!([{"suffix": "", "description": "Main", "display_order": 0}]))
        }
        ("POST", _, None) | ("PUT", _, None) => {
            let Ok(mut record) = serde_json::from_slice::<Value>(&request.body) else {
                return fail(state, StatusCode::BAD_REQUEST, "Invalid JSON");
            };
            if method == "POST" && collection == "corpora" {
                if record["corpus_name"] == json!("QB") {
                    return fail(state, StatusCode::CONFLICT, "Corpus already exists: QB");
                }
                record["corpus_id"] = json!(9);
            }
            ok(state, record)
        }
        ("DELETE", "corpora", Some("QB")) => {
            fail(state, StatusCode::BAD_REQUEST, "Cannot delete corpus QB: has transcripts")
        }
        ("DELETE", _, Some(_)) => ok(state, Value::Null),
        _ => fail(state, StatusCode::NOT_FOUND, "no such admin resource"),
    }
}
