use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::assay_table::AssayTable;
use super::command::{Command, CounterCommand};
use super::config::Config;
use super::error::ReferenceError;
use super::export_session::ExportSession;
use super::formula::FormulaSet;
use super::message::Notice;
use super::notifier::Notifier;
use super::process::process_export_with_retry;
use super::transform::References;

/// What the caller should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Restart,
    Quit,
}

/// Load the assay table and formula workbook named in the config
pub fn load_references(config: &Config) -> Result<References, ReferenceError> {
    let assays = AssayTable::new(&config.assay_table_path)?;
    spdlog::info!(
        "Loaded {} assays from {}",
        assays.len(),
        config.assay_table_path.display()
    );
    let formulas = FormulaSet::new(&config.formula_workbook_path)?;
    spdlog::info!(
        "Loaded formulas from {}",
        config.formula_workbook_path.display()
    );
    Ok(References { assays, formulas })
}

pub fn help_text() -> String {
    [
        "Monitors Qiaxcel and Viia7 and notifies when runs complete.",
        "Files with your username always generate a notification.",
        "",
        "  q / v           Toggle notifying on every Qiaxcel / Viia7 run",
        "  q3 / v3         Notify on the 3rd Qiaxcel / Viia7 run from now",
        "  hide q/v        Show or hide Qiaxcel / Viia7 events",
        "  mine            Only display your own events (Toggle)",
        "  all             Display all events",
        "  auto            Auto export processing (Toggle)",
        "  <path>          Process an export file",
        "  multi           Put the following exports in one workbook (Toggle)",
        "  done            Stop multi export",
        "  last            Add the next export to the last workbook",
        "  to file <path>  Add the next export to the given workbook",
        "  restart         Restart the folder watcher",
        "  quit            Exit",
    ]
    .join("\n")
}

/// State shared by the watch thread and the command loop
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub refs: References,
    pub notifier: Notifier,
    session: Mutex<ExportSession>,
    auto_export: AtomicBool,
    stopping: AtomicBool,
    notices: Sender<Notice>,
}

impl AppContext {
    pub fn new(config: Config, refs: References, notices: Sender<Notice>) -> Self {
        let notifier = Notifier::new(&config.login());
        let auto_export = AtomicBool::new(config.auto_export);
        Self {
            config,
            refs,
            notifier,
            session: Mutex::new(ExportSession::default()),
            auto_export,
            stopping: AtomicBool::new(false),
            notices,
        }
    }

    /// Pass a notice on to whoever prints them. Nothing is lost but the message if the
    /// printer has gone away
    pub fn notify(&self, notice: Notice) {
        if let Err(e) = self.notices.send(notice) {
            spdlog::warn!("Notice dropped, nobody is listening: {:?}", e.0);
        }
    }

    fn session(&self) -> MutexGuard<'_, ExportSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_auto_export(&self) -> bool {
        self.auto_export.load(Ordering::SeqCst)
    }

    pub fn set_auto_export(&self, on: bool) -> Notice {
        self.auto_export.store(on, Ordering::SeqCst);
        Notice::AutoExport(on)
    }

    pub fn toggle_auto_export(&self) -> Notice {
        let on = !self.auto_export.fetch_xor(true, Ordering::SeqCst);
        Notice::AutoExport(on)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Export one file to wherever the session says, and report how it went
    pub fn export_file(&self, path: &Path) -> Notice {
        // Held for the whole export so two exports can't race for one destination
        let mut session = self.session();
        let destination = session.destination();
        let result = process_export_with_retry(
            path,
            &self.refs,
            &self.config.user_tokens(),
            destination.as_deref(),
            &self.config.retry,
        );
        match result {
            Ok(written) => {
                session.record(&written.output);
                Notice::ExportComplete {
                    output: written.output,
                    sheet: written.sheet,
                    rows: written.rows,
                    appended: written.appended,
                }
            }
            Err(e) => {
                spdlog::error!("Export of {} failed: {}", path.display(), e);
                Notice::ExportFailed {
                    file: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Carry out a command typed by the user
    pub fn execute(&self, command: Command) -> (Outcome, Vec<Notice>) {
        spdlog::debug!("Executing {:?}", command);
        let notices = match command {
            Command::Export(path) => vec![self.export_file(&path)],
            Command::UserOnly => vec![self.notifier.toggle_user_only()],
            Command::ShowAll => vec![self.notifier.show_all()],
            Command::AutoExport => vec![self.toggle_auto_export()],
            Command::MultiOff => vec![self.session().multi_off()],
            Command::MultiToggle => vec![self.session().toggle_multi()],
            Command::LastFile => vec![self.session().last_file()],
            Command::ToFile(path) => vec![self.session().to_file(&path)],
            Command::Counters(counters) => counters
                .into_iter()
                .map(|c| match c {
                    CounterCommand::SetCount(instrument, count) => {
                        self.notifier.set_count(instrument, count)
                    }
                    CounterCommand::ToggleShow(instrument) => self.notifier.toggle_show(instrument),
                })
                .collect(),
            Command::Help => vec![Notice::Info(help_text())],
            Command::Restart => {
                return (
                    Outcome::Restart,
                    vec![Notice::Info(String::from("Restarting the watcher..."))],
                )
            }
            Command::Quit => {
                self.request_stop();
                return (Outcome::Quit, vec![Notice::Info(String::from("bye!"))]);
            }
        };
        (Outcome::Continue, notices)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::mpsc::Receiver;

    /// A context with inline references and a channel to inspect
    pub fn context(config: Config) -> (AppContext, Receiver<Notice>) {
        let refs = References {
            assays: AssayTable::default(),
            formulas: FormulaSet::from_formulas("=F3", "=K3", "=Q3"),
        };
        let (tx, rx) = std::sync::mpsc::channel();
        (AppContext::new(config, refs, tx), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::context;
    use super::*;
    use crate::export_file::fixtures::{export_text, scenario_rows};
    use crate::notifier::Instrument;
    use std::path::PathBuf;

    fn config() -> Config {
        Config {
            user: Some(String::from("jb40")),
            retry: crate::config::RetryPolicy {
                max_attempts: 1,
                delay_ms: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_counter_commands() {
        let (ctx, _rx) = context(config());
        let (outcome, notices) = ctx.execute(Command::parse("v3").unwrap());
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(
            notices,
            vec![Notice::CounterSetting {
                instrument: Instrument::Viia7,
                count: 3
            }]
        );
        assert_eq!(ctx.notifier.snapshot(Instrument::Viia7).count(), 3);

        let (_, notices) = ctx.execute(Command::parse("hide q").unwrap());
        assert_eq!(
            notices,
            vec![Notice::ShowSetting {
                instrument: Instrument::Qiaxcel,
                show: false
            }]
        );
    }

    #[test]
    fn test_toggles_and_outcomes() {
        let (ctx, _rx) = context(config());
        assert!(ctx.is_auto_export());
        assert_eq!(ctx.execute(Command::AutoExport).1, vec![Notice::AutoExport(false)]);
        assert!(!ctx.is_auto_export());
        assert_eq!(ctx.set_auto_export(true), Notice::AutoExport(true));
        assert!(ctx.is_auto_export());
        assert_eq!(ctx.execute(Command::UserOnly).1, vec![Notice::UserOnly(true)]);
        assert_eq!(ctx.execute(Command::Restart).0, Outcome::Restart);
        assert!(!ctx.is_stopping());
        assert_eq!(ctx.execute(Command::Quit).0, Outcome::Quit);
        assert!(ctx.is_stopping());
    }

    #[test]
    fn test_multi_export_session() {
        let dir = tempfile::tempdir().unwrap();
        let text = export_text("actb", "control_het", &scenario_rows(), '\t');
        let a = dir.path().join("C000011111_jb40_Export.txt");
        let b = dir.path().join("C000022222_jb40_Export.txt");
        std::fs::write(&a, &text).unwrap();
        std::fs::write(&b, &text).unwrap();

        let (ctx, _rx) = context(config());
        ctx.execute(Command::MultiToggle);
        let (_, first) = ctx.execute(Command::Export(a.clone()));
        let (_, second) = ctx.execute(Command::Export(b.clone()));

        let combined = dir.path().join("C000011111_jb40_Export.xlsx");
        assert!(matches!(&first[0], Notice::ExportComplete { appended: false, .. }));
        match &second[0] {
            Notice::ExportComplete {
                output,
                sheet,
                appended,
                ..
            } => {
                assert_eq!(output, &combined);
                assert_eq!(sheet, "C000022222_Export_jb40");
                assert!(*appended);
            }
            other => panic!("unexpected notice {other:?}"),
        }
        assert!(!dir.path().join("C000022222_jb40_Export.xlsx").exists());

        let (_, notices) = ctx.execute(Command::LastFile);
        assert_eq!(notices, vec![Notice::NextDestination(combined)]);
    }

    #[test]
    fn test_failed_export_is_a_notice() {
        let (ctx, _rx) = context(config());
        let (outcome, notices) = ctx.execute(Command::Export(PathBuf::from("/no/such/export.txt")));
        assert_eq!(outcome, Outcome::Continue);
        assert!(matches!(&notices[0], Notice::ExportFailed { .. }));
    }

    #[test]
    fn test_missing_references_are_reported() {
        let result = load_references(&Config::default());
        assert!(matches!(result, Err(ReferenceError::AssayError(_))));
    }
}
