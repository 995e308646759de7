use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use todotxt::config::DEFAULT_DATE_FORMAT;
use todotxt::{
    Config, DateFormat, FileRepository, Priority, SortField, SortKey, SortOrder, Task, TaskId,
    TaskList, TaskRepository,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "todotxt",
    about = "todo.txt tooling built on the todotxt crate",
    version
)]
struct Cli {
    /// todo.txt file to operate on; `-` reads stdin and writes stdout.
    #[arg(long, short, global = true, default_value = "todo.txt")]
    file: PathBuf,
    /// chrono format used for every date field.
    #[arg(long, global = true, default_value = DEFAULT_DATE_FORMAT)]
    date_format: String,
    /// Treat `#` lines as tasks instead of skipping them.
    #[arg(long, global = true)]
    keep_comments: bool,
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print tasks with their ids, optionally filtered and sorted.
    List(ListArgs),

    /// Rewrite every task in canonical todo.txt form.
    Format(FormatArgs),

    /// Reorder tasks by priority or one of the dates.
    Sort(SortArgs),

    /// Append a new task.
    Add(AddArgs),

    /// Mark a task as completed today.
    Done(IdArgs),

    /// Reopen a completed task.
    Reopen(IdArgs),

    /// Delete a task.
    Remove(IdArgs),
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Only tasks tagged with this @context (without the `@`).
    #[arg(long)]
    context: Option<String>,
    /// Only tasks tagged with this +project (without the `+`).
    #[arg(long)]
    project: Option<String>,
    /// Only tasks with this priority letter.
    #[arg(long)]
    priority: Option<char>,
    /// Only tasks that are not completed.
    #[arg(long, conflicts_with = "done")]
    pending: bool,
    /// Only completed tasks.
    #[arg(long)]
    done: bool,
    /// Only tasks whose due date has passed.
    #[arg(long)]
    overdue: bool,
    /// Sort selector such as `priority`, `due-desc` or `created-date-asc`.
    #[arg(long)]
    sort: Option<String>,
    /// Emit JSON instead of todo.txt lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct SortArgs {
    /// Field to sort by.
    #[arg(long, value_enum)]
    by: SortFieldArg,
    /// Sort descending; tasks without the field still come last.
    #[arg(long)]
    desc: bool,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SortFieldArg {
    Priority,
    Created,
    Completed,
    Due,
}

impl From<SortFieldArg> for SortField {
    fn from(arg: SortFieldArg) -> Self {
        match arg {
            SortFieldArg::Priority => SortField::Priority,
            SortFieldArg::Created => SortField::CreatedDate,
            SortFieldArg::Completed => SortField::CompletedDate,
            SortFieldArg::Due => SortField::DueDate,
        }
    }
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Task text in todo.txt syntax.
    #[arg(required = true)]
    text: Vec<String>,
    /// Do not stamp today's date as the creation date.
    #[arg(long)]
    no_date: bool,
}

#[derive(Debug, Args)]
struct IdArgs {
    /// Task id as shown by `list`.
    id: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli.date_format, cli.keep_comments)?;
    let source = Source::from_path(cli.file);
    match cli.command {
        Commands::List(args) => handle_list(&source, config, args),
        Commands::Format(args) => handle_format(&source, config, args),
        Commands::Sort(args) => handle_sort(&source, config, args),
        Commands::Add(args) => handle_add(&source, config, args, today()),
        Commands::Done(args) => handle_edit(&source, config, args, Edit::Complete(today())),
        Commands::Reopen(args) => handle_edit(&source, config, args, Edit::Reopen),
        Commands::Remove(args) => handle_edit(&source, config, args, Edit::Remove),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "todotxt=debug"
    } else {
        "todotxt=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .init();
}

fn build_config(date_format: &str, keep_comments: bool) -> Result<Config> {
    let date_format = DateFormat::new(date_format)
        .with_context(|| format!("invalid --date-format {:?}", date_format))?;
    Ok(Config {
        date_format,
        ignore_comment_lines: !keep_comments,
    })
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/* ------------------------------- Sources ------------------------------- */

/// Where the task list is read from and written back to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Stdio,
    File(PathBuf),
}

impl Source {
    fn from_path(path: PathBuf) -> Self {
        if path.as_os_str() == "-" {
            Source::Stdio
        } else {
            Source::File(path)
        }
    }

    fn load(&self, config: Config) -> Result<TaskList> {
        match self {
            Source::Stdio => {
                let mut list = TaskList::with_config(config).context("building task parser")?;
                list.load_from_reader(io::stdin().lock())
                    .context("reading tasks from stdin")?;
                Ok(list)
            }
            Source::File(path) => FileRepository::with_config(path, config)
                .load()
                .with_context(|| format!("loading {:?}", path)),
        }
    }

    /// Like `load`, but a file that does not exist yet is an empty list.
    fn load_or_empty(&self, config: Config) -> Result<TaskList> {
        match self {
            Source::File(path) if !path.exists() => {
                debug!(path = %path.display(), "starting a new todo.txt");
                TaskList::with_config(config).context("building task parser")
            }
            _ => self.load(config),
        }
    }

    fn save(&self, list: &TaskList) -> Result<()> {
        match self {
            Source::Stdio => list
                .write_to(io::stdout().lock())
                .context("writing tasks to stdout"),
            Source::File(path) => FileRepository::new(path)
                .save(list)
                .with_context(|| format!("writing {:?}", path)),
        }
    }

    /// Status lines go to stderr when stdout carries the task list.
    fn announce(&self, message: &str) {
        match self {
            Source::Stdio => eprintln!("{message}"),
            Source::File(_) => println!("{message}"),
        }
    }
}

/* ------------------------------- Handlers ------------------------------- */

fn handle_list(source: &Source, config: Config, args: ListArgs) -> Result<()> {
    let mut list = source.load(config)?;
    if let Some(option) = &args.sort {
        list.sort_by_option(option)?;
    }

    let priority = match args.priority {
        Some(letter) => Some(
            Priority::new(letter).with_context(|| format!("invalid priority {letter:?}"))?,
        ),
        None => None,
    };
    let today = today();
    let matching = list.filter(|task| matches_filters(task, &args, priority, today));

    if matching.is_empty() {
        eprintln!("No tasks match the provided filters.");
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(matching.tasks())?);
        return Ok(());
    }

    let mut out = io::stdout().lock();
    for task in &matching {
        writeln!(out, "{:>3} {}", task.id, matching.render(task))?;
    }
    Ok(())
}

fn matches_filters(
    task: &Task,
    filters: &ListArgs,
    priority: Option<Priority>,
    today: NaiveDate,
) -> bool {
    filters
        .context
        .as_deref()
        .is_none_or(|context| task.has_context(context))
        && filters
            .project
            .as_deref()
            .is_none_or(|project| task.has_project(project))
        && priority.is_none_or(|p| task.priority == Some(p))
        && (!filters.pending || !task.completed)
        && (!filters.done || task.completed)
        && (!filters.overdue || task.is_overdue_on(today))
}

fn handle_format(source: &Source, config: Config, args: FormatArgs) -> Result<()> {
    let list = source.load(config)?;
    emit(source, &list, args.in_place)
}

fn handle_sort(source: &Source, config: Config, args: SortArgs) -> Result<()> {
    let mut list = source.load(config)?;
    let order = if args.desc {
        SortOrder::Descending
    } else {
        SortOrder::Ascending
    };
    list.sort(SortKey::new(args.by.into(), order));
    emit(source, &list, args.in_place)
}

/// Write back to the source with `--in-place`, otherwise print the canonical text.
fn emit(source: &Source, list: &TaskList, in_place: bool) -> Result<()> {
    if in_place || *source == Source::Stdio {
        source.save(list)?;
        if let Source::File(path) = source {
            info!(path = %path.display(), count = list.len(), "rewrote todo.txt");
        }
        return Ok(());
    }
    print!("{list}");
    Ok(())
}

fn handle_add(source: &Source, config: Config, args: AddArgs, today: NaiveDate) -> Result<()> {
    let mut list = source.load_or_empty(config)?;
    let text = args.text.join(" ");
    let mut task = list
        .parse_task(&text)
        .with_context(|| format!("parsing {:?}", text))?;

    // A created date on a completed task without a completion date would read back
    // as the completion date.
    if !args.no_date && !task.completed && task.created_date.is_none() {
        task.created_date = Some(today);
    }

    let rendered = list.render(&task);
    let id = list.add(task);
    source.save(&list)?;
    source.announce(&format!("Added task {id}: {rendered}"));
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Edit {
    Complete(NaiveDate),
    Reopen,
    Remove,
}

fn handle_edit(source: &Source, config: Config, args: IdArgs, edit: Edit) -> Result<()> {
    let mut list = source.load(config)?;
    let id = TaskId(args.id);

    let message = match edit {
        Edit::Complete(date) => {
            let task = list.get_mut(id)?;
            task.complete_on(date);
            format!("Completed task {id}")
        }
        Edit::Reopen => {
            list.get_mut(id)?.reopen();
            format!("Reopened task {id}")
        }
        Edit::Remove => {
            list.remove_by_id(id)?;
            format!("Removed task {id}")
        }
    };

    source.save(&list)?;
    source.announce(&message);
    Ok(())
}
