//! # ChronoVault CLI - Rotating backups for a directory
//!
//! Runs the periodic backup loop interactively and exposes the slot listing
//! and restore operations as one-shot commands.
//!
//! ## Usage
//! ```bash
//! # Run the backup loop (p = pause/resume, r = restore, l = list, s = status, q = quit)
//! chronovault --config backup.conf run
//!
//! # List slots, oldest first
//! chronovault --config backup.conf list
//!
//! # Restore the second slot of the listing
//! chronovault --config backup.conf restore 2
//!
//! # Restore one file from the slot holding ring index 3
//! chronovault --config backup.conf restore --slot 3 --file notes/todo.md
//! ```
//!
//! Exit status is 2 when the configuration is rejected and 1 for any other
//! fatal error.

use anyhow::{bail, Context};
use chronovault::events::{BackupEvent, ChannelSink, EventSink, LogSink};
use chronovault::{
    BackupConfig, ChronoError, ChronoVault, ChronoVaultBuilder, ErrorKind, ProgressCallback,
    ProgressInfo, RestoreReport, SchedulerHandle, SlotInfo,
};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// ChronoVault CLI - periodic rotating-slot backups
#[derive(Parser)]
#[command(name = "chronovault")]
#[command(version)]
#[command(about = "Periodic backups into a fixed ring of timestamped slots")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (key = value, or .json)
    #[arg(short, long, global = true, default_value = "chronovault.conf")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backup loop until 'q'
    Run {
        /// Start with backups paused
        #[arg(long)]
        paused: bool,
    },

    /// List slots, oldest first
    #[command(alias = "ls")]
    List,

    /// Restore a slot over the source directory
    #[command(alias = "rs")]
    Restore {
        /// Position in the listing (1 = oldest); prompts when omitted
        position: Option<usize>,

        /// Ring index of the slot instead of a listing position
        #[arg(long, conflicts_with = "position")]
        slot: Option<u32>,

        /// Restore only this file (relative to the source directory)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show configuration and ring position
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let config_error = e
                .downcast_ref::<ChronoError>()
                .is_some_and(|err| err.kind() == ErrorKind::ConfigInvalid);
            match e.downcast_ref::<ChronoError>() {
                Some(err) => eprintln!("{}: {}", "Error".red().bold(), err.user_message()),
                None => eprintln!("{}: {:#}", "Error".red().bold(), e),
            }
            if config_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let config = BackupConfig::from_file(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run { paused: false }) {
        Commands::Run { paused } => cmd_run(config, paused),
        Commands::List => cmd_list(config),
        Commands::Restore {
            position,
            slot,
            file,
        } => cmd_restore(config, position, slot, file),
        Commands::Status => cmd_status(config),
    }
}

fn open_vault(config: BackupConfig, sink: Arc<dyn EventSink>) -> anyhow::Result<ChronoVault> {
    Ok(ChronoVaultBuilder::from_config(config)
        .event_sink(sink)
        .build()?)
}

/// Interactive backup loop
fn cmd_run(config: BackupConfig, start_paused: bool) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chronovault-runtime")
        .build()
        .context("cannot start the async runtime")?;

    runtime.block_on(async move {
        let (sink, mut events) = ChannelSink::new();
        let interval = config.interval();
        let vault = Arc::new(
            ChronoVaultBuilder::from_config(config)
                .event_sink(Arc::new(sink))
                .start_paused(start_paused)
                .build()?,
        );

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&event);
            }
        });

        println!(
            "{} {} -> {} every {}",
            "ChronoVault".blue().bold(),
            vault.config().source.display(),
            vault.config().backup_root.display(),
            format_duration(interval).to_string().cyan()
        );
        print_help();

        let scheduler = vault.start_scheduler();
        if start_paused {
            println!("{}", "Backups paused".yellow());
        }

        let mut input = spawn_stdin_reader();
        while let Some(line) = input.recv().await {
            match line.trim() {
                "" => {}
                "p" | "pause" | "resume" => {
                    if scheduler.toggle() {
                        println!("{}", "Backups paused".yellow());
                    } else {
                        println!("{}", "Backups resumed".green());
                    }
                }
                "r" | "restore" => interactive_restore(&vault, &mut input).await,
                "l" | "list" => match vault.list_slots() {
                    Ok(slots) => print_slots(&slots),
                    Err(e) => eprintln!("{}: {}", "Error".red().bold(), e),
                },
                "s" | "status" => print_schedule(&scheduler),
                "q" | "quit" | "exit" => break,
                other => {
                    println!("{} {:?}", "Unknown command".yellow(), other);
                    print_help();
                }
            }
        }

        println!("Stopping...");
        scheduler.shutdown();
        scheduler.join().await?;
        println!("{} Stopped", "✓".green().bold());
        Ok::<_, anyhow::Error>(())
    })
}

fn print_help() {
    println!(
        "  {} pause/resume  {} restore  {} list  {} status  {} quit",
        "p".bold(),
        "r".bold(),
        "l".bold(),
        "s".bold(),
        "q".bold()
    );
}

/// Forward stdin lines to the async side; the channel closes on EOF
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn interactive_restore(vault: &Arc<ChronoVault>, input: &mut mpsc::UnboundedReceiver<String>) {
    let slots = match vault.list_slots() {
        Ok(slots) if slots.is_empty() => {
            println!("{}", "No slots to restore from.".yellow());
            return;
        }
        Ok(slots) => slots,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return;
        }
    };
    print_slots(&slots);
    print!("Slot number to restore (c to cancel): ");
    let _ = std::io::stdout().flush();

    let Some(answer) = input.recv().await else {
        return;
    };
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("c") || answer.is_empty() {
        println!("Restore cancelled");
        return;
    }
    let slot = match select_slot(&slots, answer) {
        Ok(slot) => slot.clone(),
        Err(e) => {
            println!("{}", e.to_string().yellow());
            return;
        }
    };

    let restore_vault = Arc::clone(vault);
    let outcome =
        tokio::task::spawn_blocking(move || restore_with_spinner(&restore_vault, &slot.path)).await;
    match outcome {
        Ok(Ok(report)) => print_restore(&report),
        Ok(Err(e)) => eprintln!("{}: {}", "Error".red().bold(), e.user_message()),
        Err(e) => eprintln!("{}: restore task failed: {}", "Error".red().bold(), e),
    }
}

/// Pick a slot by 1-based listing position
fn select_slot<'a>(slots: &'a [SlotInfo], answer: &str) -> anyhow::Result<&'a SlotInfo> {
    let position: usize = answer
        .parse()
        .with_context(|| format!("{:?} is not a slot number", answer))?;
    if position == 0 || position > slots.len() {
        bail!("choose a number between 1 and {}", slots.len());
    }
    Ok(&slots[position - 1])
}

fn restore_with_spinner(vault: &ChronoVault, slot_path: &Path) -> chronovault::Result<RestoreReport> {
    println!(
        "{} {}",
        "Restoring from".blue().bold(),
        slot_path.display().to_string().yellow()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let bar = spinner.clone();
    let progress: ProgressCallback = Arc::new(move |info: ProgressInfo| {
        let pct = info.percentage();
        let item = info.current_item.unwrap_or_default();
        match pct {
            Some(pct) => bar.set_message(format!("[{:>3.0}%] {}", pct, item)),
            None => bar.set_message(item),
        }
    });

    let result = vault.restore_from(slot_path, Some(progress));
    spinner.finish_and_clear();
    result
}

/// List all slots
fn cmd_list(config: BackupConfig) -> anyhow::Result<()> {
    let vault = open_vault(config, Arc::new(LogSink))?;
    let slots = vault.list_slots()?;
    if slots.is_empty() {
        println!("{}", "No slots found.".yellow());
        return Ok(());
    }
    print_slots(&slots);
    Ok(())
}

/// Restore a slot, or one file from it
fn cmd_restore(
    config: BackupConfig,
    position: Option<usize>,
    slot: Option<u32>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let vault = open_vault(config, Arc::new(LogSink))?;
    let slots = vault.list_slots()?;

    let slot_path = match (position, slot) {
        (_, Some(index)) => vault.slot_path(index)?,
        (Some(position), None) => select_slot(&slots, &position.to_string())?.path.clone(),
        (None, None) => {
            if slots.is_empty() {
                println!("{}", "No slots to restore from.".yellow());
                return Ok(());
            }
            print_slots(&slots);
            print!("Slot number to restore (c to cancel): ");
            std::io::stdout().flush()?;
            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
            let answer = answer.trim();
            if answer.eq_ignore_ascii_case("c") || answer.is_empty() {
                println!("Restore cancelled");
                return Ok(());
            }
            select_slot(&slots, answer)?.path.clone()
        }
    };

    let report = match file {
        Some(relative) => {
            let info = slots
                .iter()
                .find(|s| s.path == slot_path)
                .context("slot disappeared while restoring")?;
            vault.restore_file(info.index, &relative)?
        }
        None => restore_with_spinner(&vault, &slot_path)?,
    };
    print_restore(&report);
    Ok(())
}

/// Show configuration and ring position
fn cmd_status(config: BackupConfig) -> anyhow::Result<()> {
    let vault = open_vault(config, Arc::new(LogSink))?;
    let config = vault.config();
    let state = vault.schedule_state();
    let slots = vault.list_slots()?;

    println!("{}", "ChronoVault Status:".blue().bold());
    println!();
    println!("{}", "Configuration:".bold());
    println!("  Source: {}", config.source.display());
    println!("  Backup root: {}", config.backup_root.display());
    println!("  File types: {}", config.file_types.join(", "));
    println!("  Mode: {}", config.mode().to_string().cyan());
    println!("  Interval: {}", format_duration(config.interval()));
    println!("  Subfolders: {}", config.allow_subfolders);

    println!("\n{}", "Ring:".bold());
    println!("  Slots: {} of {}", slots.len(), config.max_backups);
    println!("  Next index: {}", state.current_index.to_string().yellow());
    if let Some(latest) = slots.last() {
        println!("  Latest slot: {}", latest.name);
    }
    Ok(())
}

fn print_slots(slots: &[SlotInfo]) {
    println!("{}", "Slots (oldest first):".blue().bold());
    for (position, slot) in slots.iter().enumerate() {
        let details = match &slot.metadata {
            Some(meta) => format!(
                "{} files, {}, {}",
                meta.file_count,
                chronovault::utils::format_bytes(meta.bytes_written),
                meta.mode
            ),
            None => "no sidecar".dimmed().to_string(),
        };
        println!(
            "  {:>2}. {} {}",
            position + 1,
            slot.name.yellow().bold(),
            format!("({})", details).dimmed()
        );
    }
}

fn print_schedule(scheduler: &SchedulerHandle) {
    let state = scheduler.state();
    let status = if state.paused {
        "paused".yellow()
    } else {
        "running".green()
    };
    println!("  Status: {}", status);
    println!("  Next slot index: {}", state.current_index);
    println!("  Cycles completed: {}", state.cycles_completed);
    if let Some(last) = state.last_backup_at {
        println!("  Last backup: {}", last.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(next) = state.next_backup_at {
        let wait = (next - chrono::Utc::now()).to_std().unwrap_or_default();
        println!("  Next backup in: {}", format_duration(Duration::from_secs(wait.as_secs())));
    }
}

fn print_restore(report: &RestoreReport) {
    println!("{} Restoration complete", "✓".green().bold());
    println!("  Files restored: {}", report.files_restored.to_string().cyan());
    println!("  Patches applied: {}", report.patches_applied.to_string().cyan());
    println!(
        "  Bytes written: {}",
        chronovault::utils::format_bytes(report.bytes_written).cyan()
    );
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms))
            .to_string()
            .cyan()
    );

    if !report.skipped.is_empty() {
        println!("\n{}", "Skipped:".yellow().bold());
        for failure in &report.skipped {
            println!(
                "  - {} [{}] {}",
                failure.relative_path.display(),
                failure.kind,
                failure.message.yellow()
            );
        }
    }
}

fn print_event(event: &BackupEvent) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match event {
        BackupEvent::CycleCompleted {
            slot_index,
            files_written,
            ..
        } => println!(
            "[{}] {} {} files into slot {}",
            now,
            "✓".green().bold(),
            files_written,
            slot_index.to_string().yellow()
        ),
        BackupEvent::CycleSkipped { .. } => {
            println!("[{}] {}", now, "No changes to back up".dimmed())
        }
        BackupEvent::RestoreCompleted { .. } => {}
        BackupEvent::Failed { kind, context } => {
            eprintln!("[{}] {} [{}] {}", now, "✗".red().bold(), kind, context)
        }
    }
}
