use clap::{Args, Parser, Subcommand};
use coach_core::broadcast::{DeviceBroadcastGateway, SessionSnapshot, SnapshotGate};
use coach_core::catalog::builtin_plans;
use coach_core::clock::SPEED_MULTIPLIER_RANGE;
use coach_core::cues::CountdownCue;
use coach_core::outbox::OutboxTransport;
use coach_core::progress::{FileProgressStore, ProgressStore, SavedProgress};
use coach_core::queue::{RetryOutcome, StatusFlag};
use coach_core::sequencer::format_duration;
use coach_core::*;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "coach")]
#[command(about = "Guided workout session coach", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in plans
    Plans,

    /// Print the steps a plan flattens into
    Flatten {
        #[command(flatten)]
        source: PlanSource,
    },

    /// Run a guided session
    Run {
        #[command(flatten)]
        source: PlanSource,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Resume the session saved for later
    Resume {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Inspect or flush the offline completion queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PlanSource {
    /// Plan file (.json or .toml)
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Built-in plan id (see `coach plans`)
    #[arg(long)]
    builtin: Option<String>,
}

#[derive(Args)]
struct RunOptions {
    /// Accelerated, unattended session with synthetic rest and health data
    #[arg(long)]
    simulate: bool,

    /// Speed multiplier for --simulate
    #[arg(long, requires = "simulate")]
    speed: Option<f64>,

    /// Treat the network as unreachable; reports are queued
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand)]
enum QueueAction {
    /// Show pending completion reports
    Status,
    /// Try to deliver pending reports now
    Retry,
}

/// Where the CLI keeps its files under the data directory
struct DataPaths {
    pending: PathBuf,
    outbox: PathBuf,
    progress: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        Self {
            pending: data_dir.join("queue").join("pending.json"),
            outbox: data_dir.join("outbox").join("completions.jsonl"),
            progress: data_dir.join("session").join("progress.json"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    coach_core::logging::init_with_level(match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    });

    let config = Config::load()?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(&data_dir);

    match cli.command {
        Commands::Plans => cmd_plans(),
        Commands::Flatten { source } => cmd_flatten(&source),
        Commands::Run { source, options } => {
            let plan = load_plan(&source)?;
            cmd_run(&config, &paths, plan, None, &options)
        }
        Commands::Resume { options } => cmd_resume(&config, &paths, &options),
        Commands::Queue { action } => cmd_queue(&config, &paths, action),
    }
}

fn load_plan(source: &PlanSource) -> Result<WorkoutPlan> {
    let plan = match (&source.plan, &source.builtin) {
        (Some(path), _) => WorkoutPlan::load_from(path)?,
        (None, Some(id)) => get_builtin_plan(id).cloned().ok_or_else(|| {
            Error::Plan(format!("Unknown built-in plan '{}'. Try `coach plans`.", id))
        })?,
        (None, None) => return Err(Error::Plan("No plan given".into())),
    };

    let errors = plan.validate();
    if !errors.is_empty() {
        eprintln!("Plan validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Plan(format!("Invalid plan '{}'", plan.name)));
    }
    Ok(plan)
}

fn cmd_plans() -> Result<()> {
    for plan in builtin_plans() {
        println!(
            "{:<12} {} ({} steps)",
            plan.id.as_deref().unwrap_or("-"),
            plan.name,
            flatten(plan).len()
        );
    }
    Ok(())
}

fn cmd_flatten(source: &PlanSource) -> Result<()> {
    let plan = load_plan(source)?;
    let steps = flatten(&plan);

    println!("{} ({} steps)", plan.name, steps.len());
    for step in &steps {
        let round = step
            .round_label
            .as_ref()
            .map(|r| format!(" [{}]", r))
            .unwrap_or_default();
        let timer = step
            .timer_seconds
            .map(|s| format!("  timer: {}", format_duration(s)))
            .unwrap_or_default();
        println!(
            "{:>3}. {} - {}{}{}  {}",
            step.index,
            step.display_label,
            step.display_details,
            round,
            timer,
            describe_rest(step.rest_after)
        );
    }
    Ok(())
}

fn describe_rest(rest: RestAfter) -> String {
    match rest {
        RestAfter::None => "rest: none".to_string(),
        RestAfter::Manual => "rest: manual".to_string(),
        RestAfter::Seconds(secs) => format!("rest: {}", format_duration(secs)),
    }
}

fn cmd_resume(config: &Config, paths: &DataPaths, options: &RunOptions) -> Result<()> {
    let store = FileProgressStore::new(&paths.progress);
    match store.load()? {
        Some(saved) => {
            println!(
                "Resuming '{}' at step {} (saved {})",
                saved.name,
                saved.current_step_index + 1,
                saved.saved_at.format("%Y-%m-%d %H:%M")
            );
            let plan = saved.plan.clone();
            cmd_run(config, paths, plan, Some(saved), options)
        }
        None => {
            println!("No saved session to resume.");
            Ok(())
        }
    }
}

fn open_queue(config: &Config, paths: &DataPaths, online: bool) -> CompletionQueue {
    let network = StatusFlag::new(online);
    let auth = StatusFlag::new(config.delivery.paired);
    CompletionQueue::new(
        PendingStore::new(&paths.pending),
        OutboxTransport::new(&paths.outbox),
        network,
        auth,
    )
    .with_max_retries(config.delivery.max_retries)
}

fn cmd_run(
    config: &Config,
    paths: &DataPaths,
    plan: WorkoutPlan,
    saved: Option<SavedProgress>,
    options: &RunOptions,
) -> Result<()> {
    let mut config = config.clone();
    if options.simulate {
        config.simulation.enabled = true;
        if let Some(speed) = options.speed {
            if !SPEED_MULTIPLIER_RANGE.contains(&speed) {
                return Err(Error::Config(format!(
                    "--speed must be within {:?}, got {}",
                    SPEED_MULTIPLIER_RANGE, speed
                )));
            }
            config.simulation.speed_multiplier = speed;
        }
    }

    let queue = Arc::new(open_queue(&config, paths, !options.offline));
    // Leftovers from earlier runs get another chance at startup.
    match queue.retry_pending() {
        Ok(RetryOutcome::Finished(summary)) if summary.attempted > 0 => {
            println!(
                "Delivered {} of {} queued completions",
                summary.delivered, summary.attempted
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Startup retry failed: {}", e),
    }

    let progress = FileProgressStore::new(&paths.progress);
    let reports = Arc::clone(&queue);
    let (ack_tx, ack_rx) = mpsc::channel();
    let mut runner = SessionRunner::new(EngineConfig::from(&config), move |clock| {
        Collaborators::new(clock, reports)
            .with_gateway(ConsoleGateway::default())
            .with_cues(ConsoleCues)
            .with_progress_store(progress)
    })
    .with_acks(ack_tx);

    spawn_ack_printer(ack_rx);
    spawn_stdin_reader(runner.sender(), !options.simulate);

    if !options.simulate {
        println!("Commands: pause, resume, next_step, prev_step, skip_rest, end, done, save, discard");
    }

    match saved {
        Some(saved) => runner.engine_mut().resume_from(plan, &saved),
        None => runner.engine_mut().start(plan),
    }

    let state = runner.run_until_ended();
    print_summary(&state, runner.engine().last_submission(), &queue);
    Ok(())
}

fn print_summary(
    state: &SessionState,
    submission: Option<&coach_core::engine::SubmissionResult>,
    queue: &CompletionQueue,
) {
    let reason = match state.end_reason {
        Some(EndReason::Completed) => "completed",
        Some(EndReason::UserEnded) => "ended early",
        Some(EndReason::Discarded) => "discarded",
        Some(EndReason::SavedForLater) => "saved for later",
        Some(EndReason::Error) => "ended with an error",
        None => "interrupted",
    };
    println!();
    println!("Session {}", reason);
    println!("  Duration: {}", format_duration(state.elapsed_seconds));

    match submission {
        Some(Ok(SubmitOutcome::Delivered)) => println!("✓ Completion delivered"),
        Some(Ok(SubmitOutcome::Queued)) => {
            let pending = queue.pending_count().unwrap_or(0);
            println!("✓ Completion queued until the network is back ({} pending)", pending);
        }
        Some(Ok(SubmitOutcome::Dropped { reason })) => {
            println!("Completion not sent: {}", reason)
        }
        Some(Err(e)) => println!("Completion delivery failed, queued for retry: {}", e),
        None if state.end_reason == Some(EndReason::SavedForLater) => {
            println!("✓ Progress saved. Continue with `coach resume`.")
        }
        None => {}
    }
}

fn cmd_queue(config: &Config, paths: &DataPaths, action: QueueAction) -> Result<()> {
    match action {
        QueueAction::Status => {
            let entries = PendingStore::new(&paths.pending).entries()?;
            println!("{} pending completion(s)", entries.len());
            for entry in entries {
                println!(
                    "  {}  {}  retries: {}  queued: {}",
                    entry.report.session_id,
                    entry.report.name,
                    entry.retry_count,
                    entry.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        QueueAction::Retry => {
            let queue = open_queue(config, paths, true);
            match queue.retry_pending()? {
                RetryOutcome::Finished(summary) => {
                    println!(
                        "✓ Delivered {} of {} ({} abandoned, {} remaining)",
                        summary.delivered, summary.attempted, summary.abandoned, summary.remaining
                    );
                }
                RetryOutcome::Skipped { reason } => println!("Retry skipped: {}", reason),
                RetryOutcome::AlreadyRunning => println!("A retry is already running"),
            }
        }
    }
    Ok(())
}

/// Prints a line whenever the step or phase changes
#[derive(Default)]
struct ConsoleGateway {
    gate: SnapshotGate,
    shown: Option<(Phase, usize)>,
}

impl DeviceBroadcastGateway for ConsoleGateway {
    fn publish(&mut self, snapshot: &SessionSnapshot) {
        if !self.gate.accept(snapshot) {
            return;
        }
        let state = &snapshot.state;
        let key = (state.phase, state.current_step_index);
        if self.shown == Some(key) {
            return;
        }
        self.shown = Some(key);

        match state.phase {
            Phase::Running => {
                if let Some(step) = &snapshot.step {
                    let round = step
                        .round_label
                        .as_ref()
                        .map(|r| format!(" ({})", r))
                        .unwrap_or_default();
                    println!(
                        "▶ [{}/{}] {} · {}{}",
                        step.index, snapshot.total_steps, step.label, step.details, round
                    );
                }
            }
            Phase::Resting => match state.rest_remaining_seconds {
                Some(secs) => println!("  Rest {}", format_duration(secs)),
                None => println!("  Rest until ready (type 'done')"),
            },
            Phase::Paused => println!("  Paused"),
            Phase::Idle | Phase::Ended => {}
        }
    }
}

struct ConsoleCues;

impl CountdownCue for ConsoleCues {
    fn countdown(&mut self, seconds_left: u32, _resting: bool) {
        println!("  {}...", seconds_left);
    }
}

fn spawn_ack_printer(acks: mpsc::Receiver<Acknowledgment>) {
    let spawned = thread::Builder::new()
        .name("coach-acks".into())
        .spawn(move || {
            for ack in acks {
                if let Some(code) = ack.error_code() {
                    eprintln!("{} rejected: {}", ack.command, code);
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start acknowledgment printer: {}", e);
    }
}

/// Maps stdin lines to session events
///
/// Local words (`done`, `save`, `discard`) act directly; anything else is
/// treated as a remote command. With `save_on_eof`, closing stdin saves the
/// session for later.
fn spawn_stdin_reader(events: Sender<SessionEvent>, save_on_eof: bool) {
    let spawned = thread::Builder::new()
        .name("coach-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            let mut sent = 0u64;
            for line in stdin.lock().lines().map_while(|l| l.ok()) {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let event = match input.to_lowercase().as_str() {
                    "done" => SessionEvent::CompleteRest,
                    "save" => SessionEvent::End(EndReason::SavedForLater),
                    "discard" => SessionEvent::End(EndReason::Discarded),
                    _ => {
                        sent += 1;
                        SessionEvent::Remote {
                            command: input.to_string(),
                            correlation_id: format!("stdin-{}", sent),
                        }
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            if save_on_eof {
                let _ = events.send(SessionEvent::End(EndReason::SavedForLater));
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start input reader: {}", e);
    }
}
