//! Purpose: Execute parsed CLI commands against a `LabbcatClient`.
//! Role: Keeps `main.rs` focused on parsing and output; one arm per command.
//! Invariants: Each arm emits exactly one JSON value on success.
//! Invariants: A wait interrupted by Ctrl-C cancels the task before returning.
use super::*;
use labbcat::api::{
    AdminRecord, Corpus, MatchOptions, MatchSource, MediaTrack, Project, Role, SearchOptions,
    TaskStatus,
};
use std::sync::atomic::Ordering;

pub(super) struct Context {
    pub(super) connection: ConnectionArgs,
    pub(super) color_mode: ColorMode,
}

impl Context {
    fn client(&self) -> Result<LabbcatClient, Error> {
        connect(&self.connection)
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<RunOutcome, Error> {
        emit_json(to_json(value)?, self.color_mode);
        Ok(RunOutcome::ok())
    }
}

pub(super) fn dispatch_command(command: Command, context: &Context) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "labbcat", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            let server = match context.connection.url {
                Some(_) => Some(context.client()?.version_info()?),
                None => None,
            };
            emit_version_output(server, context.color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Id => {
            let client = context.client()?;
            context.emit(&json!({ "id": client.get_id()? }))
        }
        Command::Layers { id, ids } => {
            let client = context.client()?;
            match (id, ids) {
                (Some(id), _) => context.emit(&client.get_layer(&id)?),
                (None, true) => context.emit(&client.get_layer_ids()?),
                (None, false) => context.emit(&client.get_layers()?),
            }
        }
        Command::Corpora => {
            let client = context.client()?;
            context.emit(&client.get_corpus_ids()?)
        }
        Command::Participants {
            expression,
            count,
            id,
            page,
        } => {
            let client = context.client()?;
            if let Some(id) = id {
                return match client.get_participant(&id)? {
                    Some(participant) => context.emit(&participant),
                    None => Err(Error::new(ErrorKind::NotFound)
                        .with_message(format!("participant not found: {id}"))),
                };
            }
            match expression {
                Some(expression) if count => context.emit(&json!({
                    "count": client.count_matching_participant_ids(&expression)?
                })),
                Some(expression) => context.emit(
                    &client.get_matching_participant_ids(&expression, page.page()?)?,
                ),
                None => context.emit(&client.get_participant_ids()?),
            }
        }
        Command::Transcripts {
            expression,
            corpus,
            participant,
            order,
            count,
            page,
        } => {
            let client = context.client()?;
            if let Some(expression) = expression {
                if count {
                    return context.emit(&json!({
                        "count": client.count_matching_transcript_ids(&expression)?
                    }));
                }
                return context.emit(&client.get_matching_transcript_ids(
                    &expression,
                    page.page()?,
                    order.as_deref(),
                )?);
            }
            let ids = match (corpus, participant) {
                (Some(corpus), _) => client.get_transcript_ids_in_corpus(&corpus)?,
                (None, Some(participant)) => {
                    client.get_transcript_ids_with_participant(&participant)?
                }
                (None, None) => client.get_transcript_ids()?,
            };
            context.emit(&ids)
        }
        Command::Annotations {
            transcript,
            layer,
            max_ordinal,
            count,
            page,
        } => {
            let client = context.client()?;
            if count {
                return context.emit(&json!({
                    "count": client.count_annotations(&transcript, &layer, max_ordinal)?
                }));
            }
            context.emit(&client.get_annotations(&transcript, &layer, max_ordinal, page.page()?)?)
        }
        Command::Search {
            pattern,
            filters,
            wait,
            wait_args,
        } => {
            let pattern = parse_pattern(&pattern)?;
            let client = context.client()?;
            let task_id = client.search(&pattern, &filters.options())?;
            if !wait {
                return context.emit(&json!({ "task": task_id }));
            }
            let status = wait_or_cancel(&client, &task_id, wait_args)?;
            context.emit(&status)
        }
        Command::Matches {
            task,
            pattern,
            filters,
            words_context,
            page,
            wait_args,
        } => {
            let client = context.client()?;
            let interrupt = interrupt_flag()?;
            let options = MatchOptions {
                words_context,
                page: page.page()?,
                wait: wait_args.options(Some(Arc::clone(&interrupt))),
            };
            let search = filters.options();
            let from_pattern = task.is_none() && pattern.is_some();
            let matches = match (task.as_deref(), pattern) {
                (Some(task_id), _) => client.get_matches(MatchSource::Task(task_id), &options),
                (None, Some(pattern)) => {
                    let pattern = parse_pattern(&pattern)?;
                    client.get_matches(MatchSource::Pattern(&pattern, &search), &options)
                }
                (None, None) => Err(Error::new(ErrorKind::Usage)
                    .with_message("pass --task or --pattern")),
            };
            context.emit(&matches.map_err(|err| interrupted(err, &interrupt, from_pattern))?)
        }
        Command::Task { command } => dispatch_task(command, context),
        Command::Admin { target } => dispatch_admin(target, context),
    }
}

impl SearchArgs {
    fn options(&self) -> SearchOptions {
        SearchOptions {
            participant_ids: self.participants.clone(),
            transcript_types: self.transcript_types.clone(),
            main_participant: !self.all_participants,
            aligned: self.aligned,
            matches_per_transcript: self.matches_per_transcript,
            overlap_threshold: self.overlap_threshold,
        }
    }
}

fn dispatch_task(command: TaskCommand, context: &Context) -> Result<RunOutcome, Error> {
    let client = context.client()?;
    match command {
        TaskCommand::Status { id } => context.emit(&client.task_status(&id)?),
        TaskCommand::Wait { id, wait_args } => {
            let status = wait_or_cancel(&client, &id, wait_args)?;
            context.emit(&status)
        }
        TaskCommand::Cancel { id } => {
            client.cancel_task(&id)?;
            context.emit(&json!({ "task": id, "cancelled": true }))
        }
        TaskCommand::Release { id } => {
            client.release_task(&id)?;
            context.emit(&json!({ "task": id, "released": true }))
        }
        TaskCommand::List => context.emit(&client.get_tasks()?),
        TaskCommand::Results { id, dir } => {
            let path = client.task_results(&id, &dir)?;
            context.emit(&json!({
                "task": id,
                "path": path.map(|path| path.display().to_string()),
            }))
        }
    }
}

/// Waits on the task; Ctrl-C stops the wait and cancels the task.
fn wait_or_cancel(
    client: &LabbcatClient,
    task_id: &str,
    wait_args: WaitArgs,
) -> Result<TaskStatus, Error> {
    let interrupt = interrupt_flag()?;
    let status = client.wait_for_task(task_id, &wait_args.options(Some(Arc::clone(&interrupt))))?;
    if status.running && interrupt.load(Ordering::Acquire) {
        client.cancel_task(task_id)?;
        return Err(Error::new(ErrorKind::Busy)
            .with_message("wait interrupted, task cancelled")
            .with_task_id(task_id)
            .with_hint("Start the search again to get results."));
    }
    Ok(status)
}

/// A pattern search releases its own task; a named task is left running.
fn interrupted(err: Error, interrupt: &AtomicBool, from_pattern: bool) -> Error {
    if err.kind() != ErrorKind::Busy || !interrupt.load(Ordering::Acquire) {
        return err;
    }
    let err = err.with_message("wait interrupted");
    if from_pattern {
        return err.with_hint("The search task was released; run the command again for results.");
    }
    let hint = match err.task_id().map(str::to_string) {
        Some(task) => format!(
            "The task is still running; check it with `labbcat task status {task}` or stop it with `labbcat task cancel {task}`."
        ),
        None => "The task is still running on the server.".to_string(),
    };
    err.with_hint(hint)
}

fn dispatch_admin(target: AdminTarget, context: &Context) -> Result<RunOutcome, Error> {
    let client = context.client()?;
    match target {
        AdminTarget::Corpus { action } => run_admin::<Corpus>(&client, context, action),
        AdminTarget::Project { action } => run_admin::<Project>(&client, context, action),
        AdminTarget::Role { action } => run_admin::<Role>(&client, context, action),
        AdminTarget::MediaTrack { action } => run_admin::<MediaTrack>(&client, context, action),
    }
}

/// Admin records the CLI can build from a key and `AdminFields`.
trait EditableRecord: AdminRecord {
    fn blank(key: String) -> Self;

    /// Overwrites only the fields whose flags were given.
    fn apply(&mut self, fields: AdminFields);
}

impl EditableRecord for Corpus {
    fn blank(key: String) -> Self {
        Corpus::new(key, "en", "")
    }

    fn apply(&mut self, fields: AdminFields) {
        if let Some(language) = fields.corpus_language {
            self.corpus_language = language;
        }
        if let Some(description) = fields.description {
            self.corpus_description = description;
        }
    }
}

impl EditableRecord for Project {
    fn blank(key: String) -> Self {
        Project::new(key, "")
    }

    fn apply(&mut self, fields: AdminFields) {
        if let Some(description) = fields.description {
            self.description = description;
        }
    }
}

impl EditableRecord for Role {
    fn blank(key: String) -> Self {
        Role::new(key, "")
    }

    fn apply(&mut self, fields: AdminFields) {
        if let Some(description) = fields.description {
            self.description = description;
        }
    }
}

impl EditableRecord for MediaTrack {
    fn blank(key: String) -> Self {
        MediaTrack::new(key, "", 0)
    }

    fn apply(&mut self, fields: AdminFields) {
        if fields.description.is_some() {
            self.description = fields.description;
        }
        if fields.display_order.is_some() {
            self.display_order = fields.display_order;
        }
    }
}

fn run_admin<R: EditableRecord>(
    client: &LabbcatClient,
    context: &Context,
    action: AdminAction,
) -> Result<RunOutcome, Error> {
    match action {
        AdminAction::List { page } => context.emit(&client.read_records::<R>(page.page()?)?),
        AdminAction::Create { key, fields } => {
            let mut record = R::blank(key);
            record.apply(fields);
            context.emit(&client.create_record(&record)?)
        }
        AdminAction::Update { key, fields } => {
            let mut record = client
                .read_records::<R>(None)?
                .into_iter()
                .find(|record| record.key() == key)
                .ok_or_else(|| {
                    Error::new(ErrorKind::NotFound)
                        .with_message(format!("no {} record with key {key}", R::COLLECTION))
                        .with_hint("List keys with `labbcat admin <target> list`.")
                })?;
            record.apply(fields);
            context.emit(&client.update_record(&record)?)
        }
        AdminAction::Delete { key } => {
            client.delete_record::<R>(&key)?;
            context.emit(&json!({ "collection": R::COLLECTION, "deleted": key }))
        }
    }
}
