use std::path::{Path, PathBuf};

use super::message::Notice;

/// Where the next exports go.
///
/// By default every export gets its own workbook. In multi mode the first export of the
/// session picks the workbook and later ones are added to it. A one-shot target (the last
/// workbook written, or a file the user named) overrides both for the next export only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSession {
    multi: bool,
    multi_target: Option<PathBuf>,
    pending_target: Option<PathBuf>,
    last_output: Option<PathBuf>,
}

impl ExportSession {
    pub fn is_multi(&self) -> bool {
        self.multi
    }

    pub fn last_output(&self) -> Option<&Path> {
        self.last_output.as_deref()
    }

    /// The workbook the next export should be added to, if any
    pub fn destination(&self) -> Option<PathBuf> {
        self.pending_target.clone().or_else(|| {
            if self.multi {
                self.multi_target.clone()
            } else {
                None
            }
        })
    }

    /// Remember a finished export
    pub fn record(&mut self, output: &Path) {
        self.pending_target = None;
        self.last_output = Some(output.to_path_buf());
        if self.multi {
            self.multi_target = Some(output.to_path_buf());
        }
    }

    /// Switching multi mode off forgets the combined workbook
    pub fn set_multi(&mut self, on: bool) -> Notice {
        self.multi = on;
        if !on {
            self.multi_target = None;
        }
        self.multi_notice()
    }

    pub fn toggle_multi(&mut self) -> Notice {
        self.set_multi(!self.multi)
    }

    pub fn multi_off(&mut self) -> Notice {
        self.set_multi(false)
    }

    fn multi_notice(&self) -> Notice {
        Notice::MultiExport {
            on: self.multi,
            target: self.multi_target.clone(),
        }
    }

    /// Send the next export to the last workbook written
    pub fn last_file(&mut self) -> Notice {
        match self.last_output.clone() {
            Some(last) => {
                self.pending_target = Some(last.clone());
                Notice::NextDestination(last)
            }
            None => Notice::Error(String::from("There is no previous export to add to")),
        }
    }

    /// Send the next export to a named workbook
    pub fn to_file(&mut self, path: &Path) -> Notice {
        self.pending_target = Some(path.to_path_buf());
        Notice::NextDestination(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_destination() {
        let mut session = ExportSession::default();
        assert_eq!(session.destination(), None);
        session.record(Path::new("/x/a.xlsx"));
        assert_eq!(session.destination(), None);
        assert_eq!(session.last_output(), Some(Path::new("/x/a.xlsx")));
    }

    #[test]
    fn test_multi_mode_collects_into_first_workbook() {
        let mut session = ExportSession::default();
        assert_eq!(
            session.toggle_multi(),
            Notice::MultiExport {
                on: true,
                target: None
            }
        );
        assert_eq!(session.destination(), None);
        session.record(Path::new("/x/a.xlsx"));
        assert_eq!(session.destination(), Some(PathBuf::from("/x/a.xlsx")));
        session.record(Path::new("/x/a.xlsx"));
        assert_eq!(session.destination(), Some(PathBuf::from("/x/a.xlsx")));

        session.multi_off();
        assert!(!session.is_multi());
        assert_eq!(session.destination(), None);
        // Turning it back on starts a fresh workbook
        session.toggle_multi();
        assert_eq!(session.destination(), None);
        session.record(Path::new("/x/b.xlsx"));
        // Setting it on again keeps the current workbook
        session.set_multi(true);
        assert_eq!(session.destination(), Some(PathBuf::from("/x/b.xlsx")));
    }

    #[test]
    fn test_one_shot_targets() {
        let mut session = ExportSession::default();
        assert!(matches!(session.last_file(), Notice::Error(_)));

        session.record(Path::new("/x/a.xlsx"));
        assert_eq!(
            session.last_file(),
            Notice::NextDestination(PathBuf::from("/x/a.xlsx"))
        );
        assert_eq!(session.destination(), Some(PathBuf::from("/x/a.xlsx")));
        session.record(Path::new("/x/a.xlsx"));
        assert_eq!(session.destination(), None);

        // A pending target wins over the multi target
        session.toggle_multi();
        session.record(Path::new("/x/b.xlsx"));
        session.to_file(Path::new("/y/c.xlsx"));
        assert_eq!(session.destination(), Some(PathBuf::from("/y/c.xlsx")));
        session.record(Path::new("/y/c.xlsx"));
        assert_eq!(session.destination(), Some(PathBuf::from("/y/c.xlsx")));
    }
}
