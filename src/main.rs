use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use slack_todo::config::{AnnotationKind, AppConfig};
use slack_todo::core::date::parse_due;
use slack_todo::core::task::TaskList;
use slack_todo::render;
use slack_todo::store::TaskStore;
use slack_todo::sync::slack::SlackClient;
use slack_todo::sync::{self, SyncEngine, keyring};
use slack_todo::{Result, TodoError};

#[derive(Parser)]
#[command(name = "todo")]
#[command(about = "Personal task list kept in sync with your Slack reactions")]
struct Cli {
    /// Enable debug logging for this run
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Command {
    /// Add a task
    Add {
        /// Task title
        #[arg(required = true)]
        title: Vec<String>,

        /// Due date: YYYY-MM-DD, MM/DD or MM-DD
        #[arg(short, long)]
        due: Option<String>,
    },
    /// List tasks
    List {
        /// Include completed tasks
        #[arg(short, long)]
        all: bool,

        /// Skip syncing with Slack
        #[arg(long)]
        no_sync: bool,
    },
    /// Mark a task done and remove its Slack annotation
    Done {
        id: u32,
    },
    /// Delete a task and remove its Slack annotation
    Delete {
        id: u32,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// One-line pending count for status bars
    Summary {
        /// Skip syncing with Slack
        #[arg(long)]
        no_sync: bool,
    },
    /// Configure the Slack connection
    Setup {
        #[arg(long, value_enum)]
        annotation_kind: Option<AnnotationKind>,

        /// Reaction emoji that marks a message as a task
        #[arg(long)]
        emoji: Option<String>,

        /// Only sync from these conversation ids (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Store the token (from SLACK_TOKEN or stdin) in the system keyring
        #[arg(long)]
        save_token: bool,

        /// Remove the stored token from the system keyring
        #[arg(long, conflicts_with = "save_token")]
        forget_token: bool,

        #[arg(long, value_enum)]
        debug_logging: Option<Toggle>,
    },
    /// Print version
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {}; using defaults", e);
            AppConfig::default()
        }
    };
    init_logging(cli.verbose || config.debug_logging);

    let summary = matches!(cli.command, Command::Summary { .. });
    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            if summary {
                println!("{}", render::SUMMARY_UNAVAILABLE);
            }
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// Journal output (`journalctl --user -t slack-todo -f`). Our own targets pass
// at info, or debug when toggled; everything else at warn.
fn init_logging(debug: bool) {
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            let target = metadata.target();
            if target.starts_with("slack_todo") || target.starts_with("todo") {
                let max = if slack_todo::debug_logging() { log::LevelFilter::Debug } else { log::LevelFilter::Info };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    slack_todo::set_debug_logging(debug);

    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(journal) => journal.with_syslog_identifier("slack-todo".to_string()),
        Err(_) => return,
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max must be Debug so our debug logs can pass through when toggled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

async fn run(command: Command, mut config: AppConfig) -> Result<ExitCode> {
    let command = match command {
        Command::Version => {
            println!("todo {}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
        Command::Setup {
            annotation_kind,
            emoji,
            channels,
            save_token,
            forget_token,
            debug_logging,
        } => {
            if let Some(kind) = annotation_kind {
                config.annotation_kind = kind;
            }
            if let Some(emoji) = emoji {
                config.emoji = emoji;
            }
            if !channels.is_empty() {
                config.channels = channels;
            }
            if let Some(toggle) = debug_logging {
                config.debug_logging = matches!(toggle, Toggle::On);
            }
            setup(config, save_token, forget_token).await?;
            return Ok(ExitCode::SUCCESS);
        }
        other => other,
    };

    let store = TaskStore::open(config.ensure_dirs()?)?;
    match command {
        Command::Add { title, due } => {
            let today = chrono::Local::now().date_naive();
            let due = match due {
                Some(raw) => Some(parse_due(&raw, today).ok_or_else(|| {
                    TodoError::InvalidInput(format!(
                        "invalid due date {:?}; use YYYY-MM-DD, MM/DD or MM-DD",
                        raw
                    ))
                })?),
                None => None,
            };
            let title = title.join(" ");
            let task = store.transact(|doc| doc.tasks.add(&title, due))?;
            log::info!("Added task #{}", task.id);
            println!("Added #{}: {}", task.id, task.title);
        }
        Command::List { all, no_sync } => {
            let synced = if no_sync { Ok(()) } else { sync_now(&store, &config).await };
            let (table, failure) = render_local(&store, synced, |tasks| render::task_table(tasks, all))?;
            print!("{}", table);
            return Ok(report_failure(failure));
        }
        Command::Done { id } => {
            let task = store.transact(|doc| doc.complete(id))?;
            println!("Completed #{}: {}", task.id, task.title);
            push_now(&store, &config).await?;
        }
        Command::Delete { id, force } => {
            let doc = store.read()?;
            let task = doc.tasks.get(id).ok_or(TodoError::NotFound(id))?;
            if !force && !confirm(&format!("Delete #{}: {}?", task.id, task.title))? {
                println!("Cancelled");
                return Ok(ExitCode::SUCCESS);
            }
            let uid = task.uid;
            let task = store.transact(|doc| doc.delete_confirmed(id, uid))?;
            println!("Deleted #{}: {}", id, task.title);
            push_now(&store, &config).await?;
        }
        Command::Summary { no_sync } => {
            let synced = if no_sync { Ok(()) } else { sync_now(&store, &config).await };
            let (line, failure) = render_local(&store, synced, render::summary_line)?;
            println!("{}", line);
            return Ok(report_failure(failure));
        }
        Command::Setup { .. } | Command::Version => {}
    }
    Ok(ExitCode::SUCCESS)
}

/// Render local tasks even when the sync before it failed. The failure is
/// handed back so the command still exits non-zero.
fn render_local(
    store: &TaskStore,
    synced: Result<()>,
    render: impl FnOnce(&TaskList) -> String,
) -> Result<(String, Option<TodoError>)> {
    let doc = store.read()?;
    Ok((render(&doc.tasks), synced.err()))
}

fn report_failure(failure: Option<TodoError>) -> ExitCode {
    match failure {
        None => ExitCode::SUCCESS,
        Some(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            eprintln!("Showing local tasks only; pass --no-sync to skip Slack");
            ExitCode::FAILURE
        }
    }
}

async fn engine(config: &AppConfig) -> Result<SyncEngine<SlackClient>> {
    let scope = config.scope()?;
    let token = keyring::resolve_token(&config.api_base_url).await?;
    let client = SlackClient::new(&config.api_base_url, &token)
        .map_err(|e| TodoError::Config(e.to_string()))?;
    Ok(SyncEngine::new(client, scope))
}

fn print_warnings<'a>(warnings: impl Iterator<Item = &'a str>) {
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }
}

async fn sync_now(store: &TaskStore, config: &AppConfig) -> Result<()> {
    let report = engine(config).await?.sync(store).await?;
    if !report.pull.created.is_empty() {
        eprintln!("Pulled {} new task(s) from Slack", report.pull.created.len());
    }
    print_warnings(report.warnings());
    Ok(())
}

/// Best-effort Push after a local change. Needs no token when nothing is
/// linked.
async fn push_now(store: &TaskStore, config: &AppConfig) -> Result<()> {
    if sync::pending_removals(&store.read()?).is_empty() {
        return Ok(());
    }
    let report = engine(config).await?.push_pending(store).await?;
    print_warnings(report.warnings.iter().map(String::as_str));
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout()
        .flush()
        .map_err(|e| TodoError::io("stdout", e))?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| TodoError::io("stdin", e))?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn read_token() -> Result<String> {
    if let Some(token) = keyring::token_from_env() {
        return Ok(token);
    }
    print!("Slack token: ");
    std::io::stdout()
        .flush()
        .map_err(|e| TodoError::io("stdout", e))?;
    let mut token = String::new();
    std::io::stdin()
        .read_line(&mut token)
        .map_err(|e| TodoError::io("stdin", e))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(TodoError::InvalidInput("empty token".into()));
    }
    Ok(token)
}

async fn setup(config: AppConfig, save_token: bool, forget_token: bool) -> Result<()> {
    let scope = config.scope()?;
    config.save()?;
    config.ensure_dirs()?;
    println!("Saved config ({})", scope.key());

    if forget_token {
        keyring::delete_token(&config.api_base_url).await?;
        println!("Token removed from the system keyring");
        return Ok(());
    }

    let token = if save_token {
        let token = read_token()?;
        keyring::store_token(&config.api_base_url, &token).await?;
        println!("Token stored in the system keyring");
        Some(token)
    } else {
        keyring::resolve_token(&config.api_base_url).await.ok()
    };

    let Some(token) = token else {
        println!("No token yet; set SLACK_TOKEN or run `todo setup --save-token`");
        return Ok(());
    };
    let client = SlackClient::new(&config.api_base_url, &token)
        .map_err(|e| TodoError::Config(e.to_string()))?;
    match client.test_connection().await {
        Ok(identity) => println!("Connected to {} as {}", identity.team, identity.user),
        Err(e) if e.is_config_fault() => return Err(TodoError::Auth(e.to_string())),
        Err(e) => eprintln!("Warning: could not reach Slack ({})", e),
    }
    Ok(())
}
