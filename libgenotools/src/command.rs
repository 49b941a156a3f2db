use std::path::{Path, PathBuf};

use super::error::CommandError;
use super::notifier::Instrument;

/// A change to one instrument's notification counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterCommand {
    SetCount(Instrument, u32),
    ToggleShow(Instrument),
}

/// Everything that can be typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Export(PathBuf),
    UserOnly,
    ShowAll,
    AutoExport,
    MultiOff,
    MultiToggle,
    LastFile,
    ToFile(PathBuf),
    Counters(Vec<CounterCommand>),
    Restart,
    Quit,
    Help,
}

const TO_FILE_WORDS: [&str; 3] = ["to file", "tofile", "file"];

fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

/// `q`/`v` lines: "v3" notifies on the third Viia7 run, "q" toggles Qiaxcel between off and
/// always, "hide v" hides Viia7 runs.
fn parse_counters(lower: &str) -> Vec<CounterCommand> {
    let count = lower
        .chars()
        .find_map(|c| c.to_digit(10))
        .unwrap_or(0);
    let hide = lower.contains("hide");
    let mut commands = Vec::new();
    for (letter, instrument) in [('q', Instrument::Qiaxcel), ('v', Instrument::Viia7)] {
        if !lower.contains(letter) {
            continue;
        }
        if hide {
            commands.push(CounterCommand::ToggleShow(instrument));
            break;
        }
        commands.push(CounterCommand::SetCount(instrument, count));
    }
    commands
}

impl Command {
    /// Parse one line of input
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let text = strip_quotes(line);
        if !text.is_empty() && Path::new(text).is_file() {
            return Ok(Self::Export(PathBuf::from(text)));
        }

        let lower = text.to_lowercase();
        let command = match lower.as_str() {
            "mine" => Self::UserOnly,
            "all" => Self::ShowAll,
            "auto" => Self::AutoExport,
            "done" | "stop" => Self::MultiOff,
            "multi" | "mutli" => Self::MultiToggle,
            "last" | "prev" | "previous" | "last file" | "lastfile" => Self::LastFile,
            "restart" => Self::Restart,
            "quit" | "exit" | "qq" | "quti" => Self::Quit,
            "help" | "hlep" => Self::Help,
            word if TO_FILE_WORDS.contains(&word) => {
                return Err(CommandError::MissingPath(word.to_string()))
            }
            _ => {
                for word in TO_FILE_WORDS {
                    let Some(rest) = lower.strip_prefix(word) else {
                        continue;
                    };
                    if !rest.starts_with(char::is_whitespace) {
                        continue;
                    }
                    // Keep the path's own case
                    let path = strip_quotes(text.get(word.len()..).unwrap_or_default());
                    return Ok(Self::ToFile(PathBuf::from(path)));
                }
                let counters = parse_counters(&lower);
                if counters.is_empty() {
                    return Err(CommandError::Unrecognised(text.to_string()));
                }
                Self::Counters(counters)
            }
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Instrument::*;

    #[test]
    fn test_vocabulary() {
        let cases = [
            ("mine", Command::UserOnly),
            ("ALL", Command::ShowAll),
            ("auto", Command::AutoExport),
            ("stop", Command::MultiOff),
            ("mutli", Command::MultiToggle),
            ("last file", Command::LastFile),
            ("prev", Command::LastFile),
            ("restart", Command::Restart),
            ("QQ", Command::Quit),
            ("quti", Command::Quit),
            ("hlep", Command::Help),
        ];
        for (line, expected) in cases {
            assert_eq!(Command::parse(line).unwrap(), expected, "{line}");
        }
    }

    #[test]
    fn test_counters() {
        assert_eq!(
            Command::parse("v3").unwrap(),
            Command::Counters(vec![CounterCommand::SetCount(Viia7, 3)])
        );
        assert_eq!(
            Command::parse("q v").unwrap(),
            Command::Counters(vec![
                CounterCommand::SetCount(Qiaxcel, 0),
                CounterCommand::SetCount(Viia7, 0)
            ])
        );
        // Only the first digit counts
        assert_eq!(
            Command::parse("q 25").unwrap(),
            Command::Counters(vec![CounterCommand::SetCount(Qiaxcel, 2)])
        );
        // The first instrument with hide ends parsing
        assert_eq!(
            Command::parse("hide q and v").unwrap(),
            Command::Counters(vec![CounterCommand::ToggleShow(Qiaxcel)])
        );
        assert_eq!(
            Command::parse("hide v").unwrap(),
            Command::Counters(vec![CounterCommand::ToggleShow(Viia7)])
        );
    }

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("Plate_jb40_Export.txt");
        std::fs::write(&export, "x").unwrap();
        let quoted = format!("\"{}\"", export.display());
        assert_eq!(Command::parse(&quoted).unwrap(), Command::Export(export));

        assert_eq!(
            Command::parse("to file 'C:/Exports/All.xlsx'").unwrap(),
            Command::ToFile(PathBuf::from("C:/Exports/All.xlsx"))
        );
        assert_eq!(
            Command::parse("file /data/Plates.xlsx").unwrap(),
            Command::ToFile(PathBuf::from("/data/Plates.xlsx"))
        );
        assert!(matches!(
            Command::parse("tofile"),
            Err(CommandError::MissingPath(_))
        ));
    }

    #[test]
    fn test_unrecognised() {
        assert!(matches!(
            Command::parse("hello"),
            Err(CommandError::Unrecognised(_))
        ));
        assert!(Command::parse("").is_err());
    }
}
