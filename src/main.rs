use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead};
use std::sync::{mpsc, Arc};
use std::thread;

use cleanbox::cli::{Cli, Commands, ConfigArgs, TargetArgs};
use cleanbox::notify::cleanup_summary;
use cleanbox::platform::SystemLocations;
use cleanbox::utils::format_size;
use cleanbox::{
    colors, CleanBox, Collaborators, ConfigStore, DirectoryDetector, TargetLocation, APP_NAME,
    VERSION,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose > 0 {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .parse_default_env()
        .format_timestamp(None)
        .init();

    // Disable colors if requested
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => ConfigStore::default_path().context("Could not determine home directory")?,
    };
    log::debug!(
        "Running {} with configuration at {}",
        cli.command.name(),
        config_path.display()
    );

    let app = CleanBox::new(Arc::new(ConfigStore::new(config_path)), Collaborators::system());
    // Read-only commands must not seed targets or register auto-start
    let warning = match &cli.command {
        Commands::Detect => None,
        command if command.is_read_only() => app.load(),
        _ => app.initialize(&DirectoryDetector::new(SystemLocations)),
    };
    if let Some(warning) = warning {
        println!("{} {}", "⚠️".color(colors::WARNING), warning);
        println!("   Continuing with the last good settings");
    }

    match cli.command {
        Commands::Status => handle_status(&app),
        Commands::Targets(args) => handle_targets(&app, args),
        Commands::Clean(args) => handle_clean(&app, args.yes),
        Commands::Monitor => handle_monitor(&app),
        Commands::Config(args) => handle_config(&app, args),
        Commands::Detect => handle_detect(),
    }
}

fn handle_status(app: &CleanBox) -> Result<()> {
    let config = app.get_config();

    println!("{} v{}", APP_NAME.bold().color(colors::HEADER), VERSION);
    println!();
    println!("{}", "VOLUMES".bold());
    let volumes = app.volumes();
    if volumes.is_empty() {
        println!("  {}", "No fixed volumes found".dimmed());
    }
    for volume in volumes {
        let free = format!("{} free", format_size(volume.free_bytes));
        let free = if volume.free_bytes < config.threshold_bytes {
            free.color(colors::DANGER).bold()
        } else {
            free.color(colors::SUCCESS)
        };
        println!(
            "  {:<20} {} of {} ({:.0}% used){}",
            volume.volume.color(colors::PATH),
            free,
            format_size(volume.total_bytes),
            volume.usage_percent(),
            if volume.suppressed { " - warned" } else { "" }
        );
    }
    println!(
        "  Threshold: {}, checked every {}s",
        format_size(config.threshold_bytes),
        config.interval_seconds
    );

    println!();
    print_targets(app, false);

    println!();
    let last = config
        .last_cleanup
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!("Last cleanup: {last}");
    println!(
        "Auto-start: {}",
        if app.is_auto_start_registered() { "on" } else { "off" }
    );
    Ok(())
}

fn print_targets(app: &CleanBox, sizes: bool) {
    let config = app.get_config();
    println!("{}", "TARGETS".bold());
    if config.targets.is_empty() {
        println!("  {}", "No targets configured. Add one with `cleanbox targets add`".dimmed());
        return;
    }

    for (i, target) in config.targets.iter().enumerate() {
        let mark = if target.enabled {
            "[x]".color(colors::SUCCESS)
        } else {
            "[ ]".dimmed()
        };
        let size = if sizes {
            app.preview(&target.location, 0)
                .map(|info| format!(" ({})", info.size_formatted()))
                .unwrap_or_default()
        } else {
            String::new()
        };
        println!(
            "  {:2}. {} {:<14} {}{}",
            i + 1,
            mark,
            target.label,
            target.location.to_string().color(colors::PATH),
            size
        );
    }
}

/// A number from `targets list`, `trash`, or a folder path.
fn resolve_target(app: &CleanBox, input: &str) -> Result<TargetLocation> {
    if let Ok(number) = input.parse::<usize>() {
        let config = app.get_config();
        return number
            .checked_sub(1)
            .and_then(|i| config.targets.get(i))
            .map(|target| target.location.clone())
            .ok_or_else(|| anyhow!("No target number {number}"));
    }
    Ok(absolute(TargetLocation::parse(input)))
}

fn absolute(location: TargetLocation) -> TargetLocation {
    match location {
        TargetLocation::Path(path) => {
            let path = path.canonicalize().unwrap_or_else(|_| {
                std::env::current_dir()
                    .map(|cwd| cwd.join(&path))
                    .unwrap_or(path)
            });
            TargetLocation::Path(path)
        }
        TargetLocation::Trash => TargetLocation::Trash,
    }
}

fn handle_targets(app: &CleanBox, args: TargetArgs) -> Result<()> {
    match args {
        TargetArgs::List { sizes } => print_targets(app, sizes),
        TargetArgs::Add { location, label } => {
            let location = absolute(TargetLocation::parse(&location));
            app.add_target(location.clone(), label.as_deref())
                .with_context(|| format!("Failed to add {location}"))?;
            println!("{} Added {}", "✅".color(colors::SUCCESS), location);
        }
        TargetArgs::Remove { target } => {
            let location = resolve_target(app, &target)?;
            app.remove_target(&location)
                .with_context(|| format!("Failed to remove {location}"))?;
            println!("{} Removed {}", "✅".color(colors::SUCCESS), location);
        }
        TargetArgs::Enable { target } => {
            let location = resolve_target(app, &target)?;
            app.set_target_enabled(&location, true)?;
            println!("{} Enabled {}", "✅".color(colors::SUCCESS), location);
        }
        TargetArgs::Disable { target } => {
            let location = resolve_target(app, &target)?;
            app.set_target_enabled(&location, false)?;
            println!("{} Disabled {}", "✅".color(colors::SUCCESS), location);
        }
    }
    Ok(())
}

fn handle_clean(app: &CleanBox, yes: bool) -> Result<()> {
    let targets = app.get_config().enabled_targets();
    if targets.is_empty() {
        println!("{} No enabled targets to clean", "ℹ️".cyan());
        return Ok(());
    }

    // Confirm if not auto-yes
    if !yes {
        println!("{}", "The contents of these will be permanently deleted:".bold());
        for target in &targets {
            println!("  • {} {}", target.label, target.location.to_string().color(colors::PATH));
        }
        let confirm = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed with cleanup?")
            .default(false)
            .interact()
            .context("Failed to get confirmation")?;

        if !confirm {
            println!("{} Cleanup cancelled", "ℹ️".cyan());
            return Ok(());
        }
    }

    let pb = ProgressBar::new(targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} targets {msg}")?
            .progress_chars("#>-"),
    );

    let bar = pb.clone();
    app.subscribe_cleanup_progress(move |event| bar.set_position(event.completed as u64));

    let (tx, rx) = mpsc::channel();
    app.subscribe_cleanup_finished(move |result| {
        let _ = tx.send(result.clone());
    });

    let handle = app.run_cleanup_now()?;
    let result = rx
        .recv()
        .context("Cleanup stopped without reporting a result")?;
    handle
        .join()
        .map_err(|_| anyhow!("Cleanup thread panicked"))?;
    pb.finish_and_clear();

    let icon = if result.is_clean() { "✨" } else { "⚠️" };
    println!("{} {}", icon, cleanup_summary(&result).bold());
    for error in &result.errors {
        println!("   {} {}", "skipped".color(colors::WARNING), error);
    }
    println!("   Took {:.1}s", result.duration.as_secs_f64());
    Ok(())
}

fn handle_monitor(app: &CleanBox) -> Result<()> {
    app.subscribe_low_space(|event| {
        println!(
            "{} {} has only {} free (below {})",
            "⚠️".color(colors::WARNING),
            event.volume.color(colors::PATH),
            format_size(event.free_bytes).color(colors::DANGER).bold(),
            format_size(event.threshold_bytes)
        );
    });
    app.start_monitor()?;

    println!(
        "{} Watching free space. Press Enter to stop.",
        "👀".color(colors::HEADER)
    );

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    if read == 0 {
        // No terminal (launched at login): run until the process is killed.
        log::info!("stdin closed, monitoring until terminated");
        loop {
            thread::park();
        }
    }

    if !app.shutdown() {
        log::warn!("Monitor did not stop in time");
    }
    println!("{} Stopped", "✅".color(colors::SUCCESS));
    Ok(())
}

fn handle_config(app: &CleanBox, args: ConfigArgs) -> Result<()> {
    match args {
        ConfigArgs::Show => {
            let config = app.get_config();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigArgs::Set {
            threshold,
            interval,
            auto_start,
        } => {
            if threshold.is_none() && interval.is_none() && auto_start.is_none() {
                bail!("Nothing to change. Pass --threshold, --interval or --auto-start");
            }
            if let Some(bytes) = threshold {
                app.set_threshold_bytes(bytes)?;
                println!("Threshold set to {}", format_size(bytes));
            }
            if let Some(seconds) = interval {
                app.set_interval_seconds(seconds)?;
                println!("Interval set to {seconds}s");
            }
            if let Some(enabled) = auto_start {
                app.set_auto_start(enabled)?;
                println!("Auto-start {}", if enabled { "enabled" } else { "disabled" });
            }
        }
    }
    Ok(())
}

fn handle_detect() -> Result<()> {
    let detected = DirectoryDetector::new(SystemLocations).detect_defaults();
    println!("{}", "DEFAULT TARGETS".bold());
    for target in detected {
        println!(
            "  • {} {}",
            target.label,
            target.location.to_string().color(colors::PATH)
        );
    }
    Ok(())
}
