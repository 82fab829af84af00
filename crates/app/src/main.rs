use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lesson_core::model::{ConversationPhase, Message, MessageKind, Session};
use services::{AssistantGrader, Clock, NextStep, SessionController, SessionError};
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingSession,
    UnknownArg(String),
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingSession => write!(f, "no session file given"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

/// Where the ledger lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    Memory,
    Sqlite(String),
}

struct Args {
    session_path: PathBuf,
    backend: Backend,
    reset: bool,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- --session <path> [--db <sqlite_url>|memory] [--reset]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:lesson.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LESSON_SESSION_FILE, LESSON_DB_URL, RUST_LOG");
    eprintln!("  LESSON_AI_API_KEY, LESSON_AI_ASSISTANT_ID, LESSON_AI_BASE_URL,");
    eprintln!("  LESSON_AI_POLL_INTERVAL_MS, LESSON_AI_MAX_POLLS");
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut session_path = std::env::var("LESSON_SESSION_FILE").ok().map(PathBuf::from);
        let mut backend = std::env::var("LESSON_DB_URL")
            .ok()
            .map_or_else(
                || Backend::Sqlite(normalize_sqlite_url("lesson.sqlite3".into())),
                parse_backend,
            );
        let mut reset = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--session" => {
                    session_path = Some(PathBuf::from(require_value(args, "--session")?));
                }
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    backend = parse_backend(value);
                }
                "--reset" => reset = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            session_path: session_path.ok_or(ArgsError::MissingSession)?,
            backend,
            reset,
        })
    }
}

fn parse_backend(raw: String) -> Backend {
    match raw.trim() {
        "memory" | "sqlite::memory:" => Backend::Memory,
        _ => Backend::Sqlite(normalize_sqlite_url(raw)),
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn open_storage(backend: &Backend) -> Result<Storage, Box<dyn std::error::Error>> {
    match backend {
        Backend::Memory => Ok(Storage::in_memory()),
        Backend::Sqlite(url) => {
            prepare_sqlite_file(url)?;
            Ok(Storage::sqlite(url).await?)
        }
    }
}

fn show(message: &Message) {
    let label = match message.kind {
        MessageKind::Assistant => "tutor",
        MessageKind::User => "you",
        MessageKind::Hint => "hint",
        MessageKind::Feedback => "feedback",
        MessageKind::Greeting => "welcome",
        MessageKind::Waiting => "...",
        MessageKind::Error => "error",
    };
    println!("[{label}] {}", message.content);
}

fn show_latest(ctl: &SessionController) {
    if let Some(message) = ctl.transcript().messages().last() {
        show(message);
    }
}

/// Show a question together with the answer stored for it, if any.
fn show_question(ctl: &SessionController) {
    show_latest(ctl);
    if let Some(answer) = ctl.current_answer() {
        println!("[last answer] {answer}");
    }
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> std::io::Result<Option<String>> {
    Ok(lines.next_line().await?.map(|line| line.trim().to_owned()))
}

/// Drive one conversation over stdin/stdout until it exits or input ends.
async fn converse(ctl: &mut SessionController) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut asked_at = Instant::now();
    show_latest(ctl);

    loop {
        match ctl.phase() {
            ConversationPhase::ReadyCheck => {
                println!("Press Enter to begin, or type :reset or :quit.");
                match read_line(&mut lines).await?.as_deref() {
                    None | Some(":quit") => return Ok(()),
                    Some(":reset") => {
                        ctl.reset().await?;
                        show_latest(ctl);
                        continue;
                    }
                    Some(_) => {}
                }
                ctl.begin()?;
                asked_at = Instant::now();
                show_question(ctl);
            }
            ConversationPhase::ListenInput => {
                let Some(input) = read_line(&mut lines).await? else {
                    return Ok(());
                };
                match input.as_str() {
                    ":quit" => return Ok(()),
                    ":hint" => match ctl.use_hint()? {
                        Some(_) => show_latest(ctl),
                        None => println!("No hint for this question."),
                    },
                    "" => {}
                    answer => {
                        let secs = asked_at.elapsed().as_secs();
                        match ctl.submit_answer(answer, secs).await {
                            Ok(_) => show_latest(ctl),
                            Err(SessionError::Grader(_)) => show_latest(ctl),
                            Err(err) => return Err(err.into()),
                        }
                    }
                }
            }
            ConversationPhase::Evaluate => {
                println!("Press Enter to retry the evaluation, or type :quit.");
                match read_line(&mut lines).await?.as_deref() {
                    None | Some(":quit") => return Ok(()),
                    Some(_) => {}
                }
                match ctl.retry_evaluation().await {
                    Ok(_) | Err(SessionError::Grader(_)) => show_latest(ctl),
                    Err(err) => return Err(err.into()),
                }
            }
            ConversationPhase::NextPrompt => {
                println!("Enter: continue, :retry, :back, :quit");
                let Some(input) = read_line(&mut lines).await? else {
                    return Ok(());
                };
                let asked = match input.as_str() {
                    ":quit" => return Ok(()),
                    ":retry" => Some(ctl.retry_question().await?),
                    ":back" => ctl.previous_question()?,
                    _ => match ctl.continue_next()? {
                        NextStep::Question(question) => Some(question),
                        NextStep::Summary(_) => None,
                    },
                };
                if asked.is_some() {
                    asked_at = Instant::now();
                    show_question(ctl);
                }
            }
            ConversationPhase::Summary => {
                let report = ctl.finish(true).await?;
                let p = report.progress;
                println!(
                    "Answered {}/{}: {} correct, {} partial, {} incorrect.",
                    p.answered, p.total, p.correct, p.partial, p.incorrect
                );
                if let Some(feedback) = report.general_feedback {
                    println!("{feedback}");
                }
            }
            ConversationPhase::Exit => return Ok(()),
            phase => {
                tracing::warn!(%phase, "unexpected phase at the prompt");
                return Ok(());
            }
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let raw = std::fs::read_to_string(&parsed.session_path)?;
    let session = Session::from_json(&raw)?;
    let storage = open_storage(&parsed.backend).await?;

    let grader = AssistantGrader::from_env();
    if !grader.enabled() {
        tracing::warn!(
            "LESSON_AI_API_KEY / LESSON_AI_ASSISTANT_ID not set; answers cannot be graded"
        );
    }

    let mut ctl =
        SessionController::new(Clock::default(), Arc::clone(&storage.kv), Arc::new(grader));
    ctl.start(session).await?;
    if parsed.reset {
        ctl.reset().await?;
    }
    if ctl.is_memory_only() {
        tracing::warn!("progress will not be saved for this run");
    }

    converse(&mut ctl).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
