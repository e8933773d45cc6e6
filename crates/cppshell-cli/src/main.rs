//! cppshell - compile and run C++ snippets
//!
//! ## Commands
//!
//! - `run`: build one snippet and run it
//! - `watch`: rebuild and rerun a snippet file whenever it changes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};

use cppshell_core::{
    event_channel, init_tracing, EventReceiver, OutputStream, Pipeline, Scheduler,
    SchedulerHandle, ShellConfig, StateChange, TaskEvent, TaskState,
};

#[derive(Parser, Debug)]
#[command(name = "cppshell")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run C++ snippets without the boilerplate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit task events and log lines as JSON
    #[arg(long, global = true)]
    json: bool,

    /// TOML config file
    #[arg(long, global = true, env = "CPPSHELL_CONFIG")]
    config: Option<PathBuf>,

    /// Compiler command, e.g. "clang++" or "ccache g++"
    #[arg(long, global = true, env = "CPPSHELL_CXX")]
    compiler: Option<String>,

    /// Where to keep the generated source of a failed build
    #[arg(long, global = true)]
    dump_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a snippet once and run it
    Run {
        /// Snippet file, or `-` for stdin
        file: PathBuf,
    },

    /// Rebuild and rerun a snippet file on every change
    Watch {
        /// Snippet file to watch
        file: PathBuf,

        /// Only rebuild when the number of lines changes
        #[arg(long)]
        line_trigger: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = load_config(&cli)?;
    debug!(?config, "configuration loaded");

    let code = match &cli.command {
        Commands::Run { file } => cmd_run(&config, file, cli.json).await?,
        Commands::Watch { file, line_trigger } => {
            cmd_watch(&config, file, *line_trigger, cli.json).await?
        }
    };

    std::process::exit(code);
}

fn load_config(cli: &Cli) -> Result<ShellConfig> {
    let mut config = match &cli.config {
        Some(path) => ShellConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ShellConfig::default(),
    };

    if let Some(compiler) = &cli.compiler {
        let argv: Vec<String> = compiler.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            anyhow::bail!("compiler command is empty");
        }
        config.toolchain.compiler = argv;
    }
    if let Some(dump_path) = &cli.dump_path {
        config.dump_path = dump_path.clone();
    }
    Ok(config)
}

async fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read snippet from stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

async fn cmd_run(config: &ShellConfig, file: &Path, json: bool) -> Result<i32> {
    let source = read_source(file).await?;

    let (events, rx) = event_channel();
    let (scheduler, handle) = Scheduler::new(Pipeline::new(config), events);
    handle.submit(source)?;
    drop(handle);

    let (stats, code) = tokio::join!(scheduler.run(), print_events(rx, json));
    let stats = stats?;
    debug!(?stats, "run complete");
    Ok(code?.unwrap_or(1))
}

async fn cmd_watch(
    config: &ShellConfig,
    file: &Path,
    line_trigger: bool,
    json: bool,
) -> Result<i32> {
    let (events, rx) = event_channel();
    let (scheduler, handle) = Scheduler::new(Pipeline::new(config), events);

    info!(file = %file.display(), "watching");
    let watching = watch_file(handle, file, line_trigger);

    tokio::select! {
        stats = scheduler.run() => {
            stats?;
        }
        printed = print_events(rx, json) => {
            printed?;
        }
        watched = watching => {
            watched?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }
    Ok(0)
}

/// Submit `file` now and again whenever a filesystem event touches it.
/// Returns only on a read error or if the watcher goes away.
async fn watch_file(handle: SchedulerHandle, file: &Path, line_trigger: bool) -> Result<()> {
    let (_watcher, mut changes) = file_events(file)?;
    let mut trigger = ChangeTrigger::new(line_trigger);

    submit_if_changed(&handle, &mut trigger, file).await?;
    while let Some(change) = changes.recv().await {
        match change {
            Ok(event) if is_relevant_kind(&event) && event_touches(&event, file) => {
                submit_if_changed(&handle, &mut trigger, file).await?;
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "watch error"),
        }
    }
    anyhow::bail!("file watcher channel closed")
}

/// Watch the directory holding `file`, so editors that replace the file
/// instead of writing it in place are still seen. The watcher must be kept
/// alive for events to flow.
fn file_events(
    file: &Path,
) -> Result<(
    RecommendedWatcher,
    mpsc::UnboundedReceiver<notify::Result<Event>>,
)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let _ = tx.send(result);
        },
        notify::Config::default(),
    )
    .context("Failed to initialize file watcher")?;

    let root = watch_root(file);
    watcher
        .watch(&root, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", root.display()))?;
    Ok((watcher, rx))
}

fn watch_root(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_relevant_kind(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Events carry absolute paths while `file` may be relative, so a file name
/// match is enough inside the single watched directory.
fn event_touches(event: &Event, file: &Path) -> bool {
    if event.paths.is_empty() {
        return true;
    }
    let name = file.file_name();
    event
        .paths
        .iter()
        .any(|path| path == file || (name.is_some() && path.file_name() == name))
}

async fn submit_if_changed(
    handle: &SchedulerHandle,
    trigger: &mut ChangeTrigger,
    file: &Path,
) -> Result<()> {
    let source = match tokio::fs::read_to_string(file).await {
        Ok(source) => source,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(file = %file.display(), "file missing, waiting");
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", file.display()))
        }
    };

    if trigger.should_submit(&source) {
        let task = handle.submit(source)?;
        debug!(task_id = %task, "submitted");
    }
    Ok(())
}

/// Decides whether a new file snapshot is worth a rebuild.
#[derive(Debug)]
struct ChangeTrigger {
    line_trigger: bool,
    last_text: Option<String>,
    last_lines: Option<usize>,
}

impl ChangeTrigger {
    fn new(line_trigger: bool) -> Self {
        Self {
            line_trigger,
            last_text: None,
            last_lines: None,
        }
    }

    fn should_submit(&mut self, text: &str) -> bool {
        if self.last_text.as_deref() == Some(text) {
            return false;
        }
        let lines = text.matches('\n').count();
        let first = self.last_text.is_none();
        let lines_changed = self.last_lines != Some(lines);

        self.last_text = Some(text.to_string());
        self.last_lines = Some(lines);

        first || !self.line_trigger || lines_changed
    }
}

/// Print events until the channel closes. Returns the process exit code
/// implied by the last finished task, if any.
async fn print_events(mut rx: EventReceiver, json: bool) -> Result<Option<i32>> {
    let mut code = None;
    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event)?;
        }

        if let TaskEvent::StateChanged(change) = &event {
            if change.new == TaskState::Finished {
                code = Some(exit_code(change));
            }
        }
    }
    Ok(code)
}

fn print_event(event: &TaskEvent) -> Result<()> {
    match event {
        TaskEvent::Output(chunk) => match chunk.stream {
            OutputStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&chunk.data)?;
                out.flush()?;
            }
            OutputStream::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(&chunk.data)?;
                err.flush()?;
            }
        },
        TaskEvent::StateChanged(change) => {
            if change.new == TaskState::Compiling {
                eprintln!("[cppshell] compiling...");
            }
            if let Some(build) = change.build_result() {
                for diagnostic in &build.diagnostics {
                    eprintln!("{}", diagnostic);
                }
                if !build.success {
                    eprintln!(
                        "[cppshell] build failed: {} error(s), {} warning(s)",
                        build.error_count(),
                        build.warning_count()
                    );
                }
            }
            if let Some(run) = change.run_result() {
                eprintln!("[cppshell] {}", run.exit_status);
            }
        }
    }
    Ok(())
}

/// Shell convention: build failure is 1, a signal death is 128 + signal.
fn exit_code(change: &StateChange) -> i32 {
    if let Some(run) = change.run_result() {
        return match run.exit_status.signal() {
            Some(signal) => 128 + signal,
            None => run.exit_status.code(),
        };
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cppshell_core::{ExitStatus, PhaseOutcome, RunResult, TaskId};

    fn finished(outcome: Option<PhaseOutcome>) -> StateChange {
        StateChange {
            task: TaskId::new(),
            new: TaskState::Finished,
            old: TaskState::Running,
            outcome,
            at: Utc::now(),
        }
    }

    fn exited(raw: i32) -> StateChange {
        finished(Some(PhaseOutcome::Exited(RunResult {
            exit_status: ExitStatus::from_raw(raw),
            duration_ms: 1,
        })))
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["cppshell", "run", "snippet.cpp"]).expect("parse");
        assert!(matches!(cli.command, Commands::Run { ref file } if file == Path::new("snippet.cpp")));
        assert!(!cli.json);
    }

    #[test]
    fn test_parse_watch_flags() {
        let cli = Cli::try_parse_from([
            "cppshell",
            "--json",
            "watch",
            "a.cpp",
            "--line-trigger",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Watch { file, line_trigger } => {
                assert_eq!(file, PathBuf::from("a.cpp"));
                assert!(line_trigger);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_compiler_override_splits_words() {
        let cli = Cli::try_parse_from(["cppshell", "--compiler", "ccache g++", "run", "-"])
            .expect("parse");
        let config = load_config(&cli).expect("config");
        assert_eq!(config.toolchain.compiler, vec!["ccache", "g++"]);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(&exited(0)), 0);
        assert_eq!(exit_code(&exited(7)), 7);
        assert_eq!(exit_code(&exited(-9)), 137);
        assert_eq!(exit_code(&finished(None)), 1);
    }

    #[test]
    fn test_change_trigger_every_edit() {
        let mut trigger = ChangeTrigger::new(false);
        assert!(trigger.should_submit("int x;"));
        assert!(!trigger.should_submit("int x;"));
        assert!(trigger.should_submit("int y;"));
    }

    #[test]
    fn test_watch_root_of_bare_file_name() {
        assert_eq!(watch_root(Path::new("a.cpp")), PathBuf::from("."));
        assert_eq!(watch_root(Path::new("src/a.cpp")), PathBuf::from("src"));
    }

    #[test]
    fn test_event_touches_by_file_name() {
        use notify::event::{CreateKind, ModifyKind};

        let modified = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/work/snippets/a.cpp"));
        assert!(is_relevant_kind(&modified));
        assert!(event_touches(&modified, Path::new("a.cpp")));
        assert!(event_touches(&modified, Path::new("/work/snippets/a.cpp")));
        assert!(!event_touches(&modified, Path::new("b.cpp")));

        let swap = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/work/snippets/.a.cpp.swp"));
        assert!(!event_touches(&swap, Path::new("a.cpp")));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any));
        assert!(!is_relevant_kind(&access));
    }

    #[tokio::test]
    async fn test_file_events_report_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("snippet.cpp");
        let (_watcher, mut changes) = file_events(&file).expect("watch");

        std::fs::write(&file, "int x = 1;\n").expect("write");

        let seen = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(change) = changes.recv().await {
                if let Ok(event) = change {
                    if is_relevant_kind(&event) && event_touches(&event, &file) {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .expect("no event within 5s");
        assert!(seen);
    }

    #[test]
    fn test_change_trigger_line_count_only() {
        let mut trigger = ChangeTrigger::new(true);
        assert!(trigger.should_submit("int x"));
        assert!(!trigger.should_submit("int x;"));
        assert!(trigger.should_submit("int x;\n"));
        assert!(!trigger.should_submit("int y;\n"));
        assert!(trigger.should_submit("int y;\nint z;\n"));
    }
}
