//! # genotools_cli
//!
//! Part of the genotools crate family.
//!
//! Watches the Qiaxcel and Viia7 folders and processes qPCR exports from the terminal.
//!
//! ## Use
//!
//! ```bash
//! genotools_cli -p config.yml new              # write a template configuration
//! genotools_cli -p config.yml export a.txt     # process exports once and exit
//! genotools_cli -p config.yml                  # watch, and read commands from stdin
//! ```
//!
//! Type `help` while watching for the list of commands.
use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use libgenotools::command::Command as Input;
use libgenotools::config::Config;
use libgenotools::context::{help_text, load_references, AppContext, Outcome};
use libgenotools::message::Notice;
use libgenotools::watcher::{WatchMessage, WatchService};

fn make_template_config(path: &Path) -> Result<(), Box<dyn Error>> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    std::fs::write(path, yaml_str)?;
    Ok(())
}

fn init_logger() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./genotools.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// Report an error that stops the program
fn fatal(message: &str) -> ! {
    spdlog::error!("{}", message);
    eprintln!("{message}");
    std::process::exit(1);
}

fn load_context(config_path: &Path) -> (Arc<AppContext>, std::sync::mpsc::Receiver<Notice>) {
    spdlog::info!("Loading config from {}...", config_path.display());
    let config = match Config::read_config_file(config_path) {
        Ok(c) => c,
        Err(e) => fatal(&e.to_string()),
    };
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Qiaxcel Path: {}", config.qiaxcel_path.display());
    spdlog::info!("Genotyping Path: {}", config.genotyping_path.display());
    spdlog::info!("User: {}", config.login());

    let refs = match load_references(&config) {
        Ok(r) => r,
        Err(e) => fatal(&e.to_string()),
    };
    let (tx, rx) = std::sync::mpsc::channel();
    (Arc::new(AppContext::new(config, refs, tx)), rx)
}

/// Process each export once, printing how it went
fn run_exports(ctx: &AppContext, files: Vec<PathBuf>) -> bool {
    let mut all_ok = true;
    for file in files {
        let notice = ctx.export_file(&file);
        all_ok &= !matches!(notice, Notice::ExportFailed { .. });
        println!("{}", notice.render());
    }
    all_ok
}

fn run_watch(ctx: Arc<AppContext>, notices: std::sync::mpsc::Receiver<Notice>, config_path: PathBuf) {
    // Everything shown to the user goes through one printer so lines don't interleave
    let printer = std::thread::spawn(move || {
        for notice in notices {
            println!("{}", notice.render());
        }
    });

    let (service, control) = WatchService::new(ctx.clone(), Some(config_path));
    let watcher = std::thread::spawn(move || service.run());

    ctx.notify(Notice::Info(help_text()));
    ctx.notify(Notice::AutoExport(ctx.is_auto_export()));

    // stdin blocks, so it gets its own thread and the main loop can notice the watcher stop
    let (line_tx, lines) = std::sync::mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    while !watcher.is_finished() {
        let line = match lines.recv_timeout(Duration::from_millis(500)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                // No more input; keep watching until the service stops on its own
                spdlog::info!("stdin closed, watching without commands");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match Input::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                ctx.notify(Notice::Error(e.to_string()));
                continue;
            }
        };
        let (outcome, replies) = ctx.execute(command);
        for reply in replies {
            ctx.notify(reply);
        }
        let message = match outcome {
            Outcome::Continue => continue,
            Outcome::Restart => WatchMessage::Restart,
            Outcome::Quit => WatchMessage::Stop,
        };
        let quit = matches!(message, WatchMessage::Stop);
        if control.send(message).is_err() {
            spdlog::error!("Watch service is no longer running");
        }
        if quit {
            break;
        }
    }

    match watcher.join() {
        Ok(Ok(())) => spdlog::info!("Watcher finished"),
        Ok(Err(e)) => spdlog::error!("Watcher failed with error: {e}"),
        Err(_) => spdlog::error!("Failed to join the watch thread!"),
    }

    // Dropping the last notice sender lets the printer drain and finish
    drop(ctx);
    if printer.join().is_err() {
        spdlog::error!("Failed to join the printer thread!");
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("genotools_cli")
        .about("Genotyping run notifications and qPCR export processing")
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .default_value("config.yml")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Path to the configuration file"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("export")
                .about("Process export files and exit")
                .arg(
                    Arg::new("files")
                        .required(true)
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(Command::new("watch").about("Watch the instrument folders (default)"))
        .get_matches();

    if let Err(e) = init_logger() {
        eprintln!("Could not create the log file: {e}");
    }
    spdlog::info!("Starting genotools");

    let config_path = matches
        .get_one::<PathBuf>("path")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("config.yml"));

    match matches.subcommand() {
        Some(("new", _)) => {
            spdlog::info!("Making a template config at {}...", config_path.display());
            if let Err(e) = make_template_config(&config_path) {
                fatal(&format!("Could not write the template config: {e}"));
            }
            println!("Template config written to {}", config_path.display());
        }
        Some(("export", args)) => {
            let files: Vec<PathBuf> = args
                .get_many::<PathBuf>("files")
                .map(|files| files.cloned().collect())
                .unwrap_or_default();
            let (ctx, _notices) = load_context(&config_path);
            if !run_exports(&ctx, files) {
                std::process::exit(1);
            }
        }
        _ => {
            let (ctx, notices) = load_context(&config_path);
            run_watch(ctx, notices, config_path);
        }
    }
    spdlog::info!("Done.");
}
