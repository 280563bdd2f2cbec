//! Purpose: `labbcat` CLI entry point for querying and administering a LaBB-CAT server.
//! Role: Binary crate root; parses args, builds the client, emits JSON on stdout.
//! Invariants: Successful commands print exactly one JSON value on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Credentials never appear in output or logs.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint};
use clap::error::ErrorKind as ClapErrorKind;
use clap_complete::aot::Shell;
use labbcat::api::{Error, ErrorKind, LabbcatClient, Page, WaitOptions, to_exit_code};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod color_json;
mod command_dispatch;

use color_json::colorize_json;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.verbose);
    let color_mode = cli.color;
    let context = command_dispatch::Context {
        connection: cli.connection,
        color_mode,
    };

    command_dispatch::dispatch_command(cli.command, &context)
        .map_err(add_auth_hint)
        .map_err(add_connection_hint)
        .map_err(add_busy_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or_else(|| arg)
        })
        .collect()
}

#[derive(Parser)]
#[command(
    name = "labbcat",
    version,
    about = "Query and administer a LaBB-CAT corpus server",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Every command talks to one server, given by --url or LABBCAT_URL. Output is JSON.

Mental model:
  - `search` starts a server task and prints its id
  - `task wait` follows the task until it finishes
  - `matches` fetches the results (and can search + release in one go)
"#,
    after_help = r#"EXAMPLES
  $ export LABBCAT_URL=https://labbcat.example.org/labbcat/
  $ labbcat layers
  $ labbcat search '{"orthography": "the"}' --wait
  $ labbcat matches --pattern '{"orthography": "ps.*"}' --page-length 20
  $ labbcat task list

LEARN MORE
  $ labbcat <command> --help
  https://nzilbb.github.io/labbcat-server/"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Log requests to stderr (-v debug, -vv trace); RUST_LOG overrides"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct ConnectionArgs {
    #[arg(long, global = true, env = "LABBCAT_URL", help = "Server home page URL", value_hint = ValueHint::Url)]
    url: Option<String>,
    #[arg(long, global = true, env = "LABBCAT_USERNAME", help = "Username for HTTP Basic auth")]
    username: Option<String>,
    #[arg(
        long,
        global = true,
        env = "LABBCAT_PASSWORD",
        hide_env_values = true,
        help = "Password for HTTP Basic auth (prefer --password-file)"
    )]
    password: Option<String>,
    #[arg(long, global = true, help = "Read the password from a file", value_hint = ValueHint::FilePath)]
    password_file: Option<PathBuf>,
    #[arg(long, global = true, default_value = "en", help = "Language for server messages, e.g. es-AR")]
    language: String,
    #[arg(long, global = true, help = "Request timeout in seconds")]
    timeout: Option<u64>,
    #[arg(long, global = true, help = "PEM CA bundle to trust for https", value_hint = ValueHint::FilePath)]
    tls_ca: Option<PathBuf>,
    #[arg(long, global = true, help = "Skip TLS certificate verification (development only)")]
    tls_skip_verify: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Args, Clone, Copy, Debug, Default)]
struct PageArgs {
    #[arg(long, help = "Items per page (omit to fetch everything)")]
    page_length: Option<usize>,
    #[arg(long, help = "Zero-based page number (requires --page-length)")]
    page_number: Option<usize>,
}

impl PageArgs {
    fn page(self) -> Result<Option<Page>, Error> {
        match (self.page_length, self.page_number) {
            (None, None) => Ok(None),
            (Some(length), number) => Page::new(length, number.unwrap_or(0)).map(Some),
            (None, Some(_)) => Err(Error::new(ErrorKind::Usage)
                .with_message("--page-number requires --page-length")
                .with_hint("Add --page-length N, e.g. --page-length 20 --page-number 1.")),
        }
    }
}

#[derive(Args, Clone, Copy, Debug)]
struct WaitArgs {
    #[arg(long, default_value_t = 0, help = "Give up waiting after this many seconds (0 = no limit)")]
    max_wait: u64,
    #[arg(long, default_value_t = 1000, help = "Delay between status checks in milliseconds")]
    poll_interval_ms: u64,
}

impl WaitArgs {
    fn options(self, interrupt: Option<Arc<AtomicBool>>) -> WaitOptions {
        let options = WaitOptions::max_seconds(self.max_wait)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        match interrupt {
            Some(flag) => options.with_interrupt(flag),
            None => options,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the server's store id")]
    Id,
    #[command(about = "Print client and server version information")]
    Version,
    #[command(about = "List layers, or show one layer")]
    Layers {
        #[arg(help = "Layer id to show")]
        id: Option<String>,
        #[arg(long, help = "List layer ids only", conflicts_with = "id")]
        ids: bool,
    },
    #[command(about = "List corpus ids")]
    Corpora,
    #[command(about = "List or count participants")]
    Participants {
        #[arg(long, help = "Match expression, e.g. \"labels('corpus').includes('QB')\"")]
        expression: Option<String>,
        #[arg(long, help = "Print the number of matches instead of ids", requires = "expression")]
        count: bool,
        #[arg(long, help = "Show one participant record", conflicts_with_all = ["expression", "count"])]
        id: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(about = "List or count transcripts")]
    Transcripts {
        #[arg(long, help = "Match expression, e.g. \"/Ada.+/.test(id)\"")]
        expression: Option<String>,
        #[arg(long, help = "Only transcripts in this corpus", conflicts_with_all = ["expression", "participant"])]
        corpus: Option<String>,
        #[arg(long, help = "Only transcripts with this participant", conflicts_with = "expression")]
        participant: Option<String>,
        #[arg(long, help = "Sort order, e.g. \"id DESC\"", requires = "expression")]
        order: Option<String>,
        #[arg(long, help = "Print the number of matches instead of ids", requires = "expression")]
        count: bool,
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(about = "List or count annotations on one layer of a transcript")]
    Annotations {
        #[arg(help = "Transcript id")]
        transcript: String,
        #[arg(help = "Layer id")]
        layer: String,
        #[arg(long, help = "Only annotations with at most this ordinal")]
        max_ordinal: Option<u32>,
        #[arg(long, help = "Print the number of annotations instead")]
        count: bool,
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(
        about = "Start a search task",
        after_help = r#"PATTERN is JSON: {"orthography":"the"}, a list of columns, or a full
{"columns":[{"layers":{...}}]} matrix. Use - to read it from stdin."#
    )]
    Search {
        #[arg(help = "Search pattern as JSON (or - for stdin)")]
        pattern: String,
        #[command(flatten)]
        filters: SearchArgs,
        #[arg(long, help = "Wait for the task to finish and print its status")]
        wait: bool,
        #[command(flatten)]
        wait_args: WaitArgs,
    },
    #[command(about = "Fetch search matches from a task, or search and fetch in one step")]
    Matches {
        #[arg(long, help = "Id of a search task", conflicts_with = "pattern", required_unless_present = "pattern")]
        task: Option<String>,
        #[arg(long, help = "Search pattern as JSON; the task is released afterwards")]
        pattern: Option<String>,
        #[command(flatten)]
        filters: SearchArgs,
        #[arg(long, default_value_t = 0, help = "Words of context around each match")]
        words_context: u32,
        #[command(flatten)]
        page: PageArgs,
        #[command(flatten)]
        wait_args: WaitArgs,
    },
    #[command(about = "Inspect and manage server tasks")]
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    #[command(about = "Manage corpora, projects, roles and media tracks")]
    Admin {
        #[command(subcommand)]
        target: AdminTarget,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args, Clone, Debug, Default)]
struct SearchArgs {
    #[arg(long = "participant", help = "Restrict to this participant (repeatable)")]
    participants: Vec<String>,
    #[arg(long = "transcript-type", help = "Restrict to this transcript type (repeatable)")]
    transcript_types: Vec<String>,
    #[arg(long, help = "Match all participants, not only each transcript's main participant")]
    all_participants: bool,
    #[arg(long, help = "Only match aligned words")]
    aligned: bool,
    #[arg(long, help = "Cap matches per transcript")]
    matches_per_transcript: Option<u32>,
    #[arg(long, help = "Exclude overlapping speech above this percentage")]
    overlap_threshold: Option<u32>,
}

#[derive(Subcommand)]
enum TaskCommand {
    #[command(about = "Show a task's status")]
    Status { id: String },
    #[command(about = "Wait for a task to finish (Ctrl-C cancels it)")]
    Wait {
        id: String,
        #[command(flatten)]
        wait_args: WaitArgs,
    },
    #[command(about = "Cancel a running task")]
    Cancel { id: String },
    #[command(about = "Release a finished task's server resources")]
    Release { id: String },
    #[command(about = "List all tasks")]
    List,
    #[command(about = "Download a task's result file")]
    Results {
        id: String,
        #[arg(long, help = "Directory to save into", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum AdminTarget {
    #[command(about = "Manage corpora (key: corpus name)")]
    Corpus {
        #[command(subcommand)]
        action: AdminAction,
    },
    #[command(about = "Manage projects (key: project name)")]
    Project {
        #[command(subcommand)]
        action: AdminAction,
    },
    #[command(about = "Manage roles (key: role id)")]
    Role {
        #[command(subcommand)]
        action: AdminAction,
    },
    #[command(about = "Manage media tracks (key: track suffix)")]
    MediaTrack {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    #[command(about = "List records")]
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(about = "Create a record")]
    Create {
        key: String,
        #[command(flatten)]
        fields: AdminFields,
    },
    #[command(about = "Update a record")]
    Update {
        key: String,
        #[command(flatten)]
        fields: AdminFields,
    },
    #[command(about = "Delete a record")]
    Delete { key: String },
}

/// Record fields; update changes only the flags given.
#[derive(Args, Clone, Debug, Default)]
struct AdminFields {
    #[arg(long, help = "Description")]
    description: Option<String>,
    #[arg(
        long = "corpus-language",
        help = "Corpus language (ISO 639-1); new corpora default to en"
    )]
    corpus_language: Option<String>,
    #[arg(long, help = "Media track position")]
    display_order: Option<i64>,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn connect(args: &ConnectionArgs) -> Result<LabbcatClient, Error> {
    let Some(url) = args.url.as_deref() else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no server url given")
            .with_hint("Pass --url https://host/labbcat/ or set LABBCAT_URL."));
    };
    let mut client = LabbcatClient::new(url)?.with_language(&args.language);
    if let Some(username) = &args.username {
        let password = resolve_password(args.password.clone(), args.password_file.as_deref())?
            .unwrap_or_default();
        client = client.with_credentials(username, password);
    }
    if let Some(seconds) = args.timeout {
        client = client.with_timeout(Duration::from_secs(seconds));
    }
    if let Some(ca) = &args.tls_ca {
        client = client.with_tls_ca_file(ca)?;
    }
    if args.tls_skip_verify {
        client = client.with_tls_skip_verify();
    }
    Ok(client)
}

fn read_password_file(path: &Path) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("failed to read password file {}", path.display()))
            .with_source(err)
    })?;
    let password = raw.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("password file {} is empty", path.display())));
    }
    Ok(password)
}

fn resolve_password(
    password: Option<String>,
    password_file: Option<&Path>,
) -> Result<Option<String>, Error> {
    if let Some(path) = password_file {
        if password.is_some() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--password cannot be combined with --password-file")
                .with_hint("Use --password-file for safer handling, or unset LABBCAT_PASSWORD."));
        }
        return read_password_file(path).map(Some);
    }
    Ok(password)
}

/// Raised by Ctrl-C while a command is waiting on a task.
fn interrupt_flag() -> Result<Arc<AtomicBool>, Error> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag)).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to install Ctrl-C handler")
            .with_source(err)
    })?;
    Ok(flag)
}

fn parse_pattern(text: &str) -> Result<Value, Error> {
    let raw = if text == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read pattern from stdin")
                .with_source(err)
        })?;
        buf
    } else {
        text.to_string()
    };
    serde_json::from_str(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid pattern json")
            .with_hint("Provide JSON such as '{\"orthography\": \"the\"}'.")
            .with_source(err)
    })
}

fn add_auth_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Permission || err.hint().is_some() {
        return err;
    }
    match err.status() {
        Some(401) => err.with_hint(
            "The server wants credentials. Pass --username with --password-file (or LABBCAT_PASSWORD).",
        ),
        _ => err.with_hint("This account lacks the role needed for that operation."),
    }
}

fn add_connection_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() || err.url().is_none() {
        return err;
    }
    err.with_hint("Could not reach the server. Check --url, network access, and TLS options.")
}

fn add_busy_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Busy || err.hint().is_some() {
        return err;
    }
    match err.task_id().map(str::to_string) {
        Some(task) => err.with_hint(format!(
            "Check progress with `labbcat task status {task}`."
        )),
        None => err.with_hint("The server is busy. Retry shortly."),
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with -v and RUST_BACKTRACE=1 and share the output if it persists.",
    )
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode output json")
            .with_source(err)
    })
}

fn emit_version_output(server: Option<Value>, color_mode: ColorMode) {
    let mut value = Map::new();
    value.insert("name".to_string(), json!("labbcat"));
    value.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
    if let Some(server) = server {
        value.insert("server".to_string(), server);
    }
    emit_json(Value::Object(value), color_mode);
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let use_color = color_mode.use_color(is_tty);
    let pretty = is_tty || use_color;
    let json = if pretty {
        colorize_json(&value, use_color)
    } else {
        serde_json::to_string(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    };
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Server => "server error".to_string(),
        ErrorKind::Protocol => "unexpected server response".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(url) = err.url() {
        inner.insert("url".to_string(), json!(url));
    }
    if let Some(task) = err.task_id() {
        inner.insert("task".to_string(), json!(task));
    }
    if err.server_errors().len() > 1 {
        inner.insert("serverErrors".to_string(), json!(err.server_errors()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    for extra in err.server_errors().iter().skip(1) {
        lines.push(format!(
            "{} {extra}",
            colorize_label("server:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(task) = err.task_id() {
        lines.push(format!(
            "{} {task}",
            colorize_label("task:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(url) = err.url() {
        lines.push(format!(
            "{} {url}",
            colorize_label("url:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `labbcat --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "labbcat") else {
        return "Try `labbcat --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `labbcat --help`.".to_string();
    }
    format!("Try `labbcat {} --help`.", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, PageArgs, add_auth_hint, add_busy_hint, error_json, read_password_file,
        resolve_password,
    };
    use clap::CommandFactory;
    use labbcat::api::{Error, ErrorKind};
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn page_number_requires_length() {
        let err = PageArgs {
            page_length: None,
            page_number: Some(2),
        }
        .page()
        .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let page = PageArgs {
            page_length: Some(10),
            page_number: None,
        }
        .page()
        .expect("page")
        .expect("some");
        assert_eq!((page.length, page.number), (10, 0));
        assert!(PageArgs::default().page().expect("none").is_none());
    }

    #[test]
    fn password_file_is_trimmed_and_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pw");
        std::fs::write(&path, "s3cret\n").expect("write");
        assert_eq!(read_password_file(&path).expect("pw"), "s3cret");
        let err = resolve_password(Some("x".to_string()), Some(path.as_path())).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(
            resolve_password(None, Some(path.as_path())).expect("pw").as_deref(),
            Some("s3cret")
        );
    }

    #[test]
    fn error_json_includes_status_task_and_hint() {
        let err = add_busy_hint(
            Error::new(ErrorKind::Busy)
                .with_message("search is still running")
                .with_task_id("42"),
        );
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], json!("Busy"));
        assert_eq!(value["error"]["task"], json!("42"));
        assert!(
            value["error"]["hint"]
                .as_str()
                .is_some_and(|hint| hint.contains("labbcat task status 42"))
        );
    }

    #[test]
    fn unauthorized_gets_credentials_hint() {
        let err = add_auth_hint(Error::new(ErrorKind::Permission).with_status(401));
        assert!(err.hint().is_some_and(|hint| hint.contains("--username")));
        let value = error_json(&err);
        assert_eq!(value["error"]["status"], json!(401));
    }
}
