use std::fmt::Display;
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;

use super::constants::MAX_ARMED_COUNT;
use super::notifier::Instrument;

/// Width of the timestamp + prefix gutter that untimed notices are indented by
const GUTTER: usize = 25;

/// Console styles. Colour choice follows the terminal, see [`console::colors_enabled`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Bright,
    Dim,
    Success,
    Warning,
    Error,
    Viia7,
    Qiaxcel,
}

/// Apply a console style to some text
pub fn render(text: &str, style: Style) -> String {
    let styled = match style {
        Style::Plain => return text.to_string(),
        Style::Bright => console::Style::new().bold(),
        Style::Dim => console::Style::new().dim(),
        Style::Success => console::Style::new().green(),
        Style::Warning => console::Style::new().yellow(),
        Style::Error => console::Style::new().red(),
        Style::Viia7 => console::Style::new().cyan(),
        Style::Qiaxcel => console::Style::new().magenta(),
    };
    styled.apply_to(text).to_string()
}

/// The local time, or UTC if the local offset can't be determined
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `dd.mm HH:MM`
pub fn format_timestamp(when: OffsetDateTime) -> String {
    let format = format_description!("[day].[month] [hour]:[minute]");
    when.format(&format).unwrap_or_default()
}

/// Everything the library wants to tell the user. Sent over a channel and printed by the CLI
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    RunFinished {
        instrument: Instrument,
        file: String,
        distinguished: bool,
    },
    NoLongerNotifying(Instrument),
    /// The run file was found but could not be inspected
    SavedBadly { file: String, reason: String },
    ExportComplete {
        output: PathBuf,
        sheet: String,
        rows: usize,
        appended: bool,
    },
    ExportFailed { file: String, reason: String },
    CounterSetting { instrument: Instrument, count: u32 },
    ShowSetting { instrument: Instrument, show: bool },
    UserOnly(bool),
    AutoExport(bool),
    MultiExport { on: bool, target: Option<PathBuf> },
    NextDestination(PathBuf),
    Info(String),
    Error(String),
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn on_off(on: bool) -> String {
    if on {
        render("ON", Style::Success)
    } else {
        render("OFF", Style::Error)
    }
}

impl Notice {
    /// Notices about things that happened carry a timestamp. Replies to commands don't
    pub fn is_timed(&self) -> bool {
        matches!(
            self,
            Self::RunFinished { .. }
                | Self::SavedBadly { .. }
                | Self::ExportComplete { .. }
                | Self::ExportFailed { .. }
        )
    }

    /// Render for the console with the given timestamp
    pub fn render_at(&self, stamp: &str) -> String {
        if !self.is_timed() {
            return format!("{}{}", " ".repeat(GUTTER), self);
        }
        let prefix = match self {
            Self::RunFinished {
                instrument,
                distinguished: true,
                ..
            } => format!("{}{}:", render(">>> ", Style::Success), instrument.render()),
            Self::RunFinished { instrument, .. } => format!(" -  {}:", instrument.render()),
            _ => String::from(" -  "),
        };
        format!("{} {} {}", render(stamp, Style::Bright), prefix, self)
    }

    /// Render for the console, stamped with the current time
    pub fn render(&self) -> String {
        self.render_at(&format_timestamp(now()))
    }
}

impl Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunFinished {
                file,
                distinguished: true,
                ..
            } => write!(f, "{} has finished!", render(file, Style::Success)),
            Self::RunFinished { file, .. } => {
                write!(f, "{} has finished.", render(file, Style::Bright))
            }
            Self::NoLongerNotifying(instrument) => {
                write!(f, "{} No longer notifying.", instrument.render())
            }
            Self::SavedBadly { file, reason } => write!(
                f,
                "{} wasn't saved properly! You'll need to analyse and save the run again from the machine. ({})",
                render(file, Style::Warning),
                render(reason, Style::Error)
            ),
            Self::ExportComplete {
                output,
                sheet,
                rows,
                appended: true,
            } => write!(
                f,
                "Sheet added: {} ({} rows into {})",
                render(sheet, Style::Bright),
                rows,
                output.display()
            ),
            Self::ExportComplete { output, rows, .. } => write!(
                f,
                "Export processing complete: {} ({} rows)",
                render(&file_name(output), Style::Success),
                rows
            ),
            Self::ExportFailed { file, reason } => write!(
                f,
                "{} {}\n{}",
                render("Export of", Style::Error),
                file,
                render(reason, Style::Error)
            ),
            Self::CounterSetting { instrument, count } => match count {
                0 => write!(f, "{} Notify {}", instrument.render(), on_off(false)),
                c if *c > MAX_ARMED_COUNT => write!(
                    f,
                    "{} Notifying for {} runs",
                    instrument.render(),
                    render("ALL", Style::Bright)
                ),
                c => write!(
                    f,
                    "{} Notifying in {} runs time",
                    instrument.render(),
                    render(&c.to_string(), Style::Bright)
                ),
            },
            Self::ShowSetting { instrument, show } => write!(
                f,
                "{} {} events",
                instrument.render(),
                if *show {
                    render("Displaying", Style::Plain)
                } else {
                    render("Hiding", Style::Dim)
                }
            ),
            Self::UserOnly(true) => write!(f, "Displaying {} events only", render("YOUR", Style::Bright)),
            Self::UserOnly(false) => write!(f, "Displaying {} events", render("ALL", Style::Bright)),
            Self::AutoExport(on) => write!(f, "Auto export processing {}", on_off(*on)),
            Self::MultiExport { on, target } => {
                write!(f, "Multi export {}", on_off(*on))?;
                if let Some(target) = target {
                    write!(f, " (into {})", target.display())?;
                }
                Ok(())
            }
            Self::NextDestination(path) => {
                write!(f, "Next export will be added to {}", path.display())
            }
            Self::Info(text) => write!(f, "{text}"),
            Self::Error(text) => write!(f, "{}", render(text, Style::Error)),
        }
    }
}
