use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use notify::event::{Event, EventKind};
use time::OffsetDateTime;

use super::constants::RECENT_EVENTS_CAPACITY;
use super::message::now;
use super::notifier::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
}

/// A filesystem event we care about
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub timestamp: OffsetDateTime,
}

impl WatchEvent {
    pub fn new(path: PathBuf, kind: WatchEventKind) -> Self {
        Self {
            path,
            kind,
            timestamp: now(),
        }
    }

    /// Split a notify event into one WatchEvent per path. Removals, renames and access
    /// events yield nothing.
    pub fn from_notify(event: &Event) -> Vec<Self> {
        let kind = match event.kind {
            EventKind::Create(_) => WatchEventKind::Created,
            EventKind::Modify(_) => WatchEventKind::Modified,
            _ => return Vec::new(),
        };
        event
            .paths
            .iter()
            .map(|p| Self::new(p.clone(), kind))
            .collect()
    }

    /// File name without extension, used in notices
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// What an event means to us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Run(Instrument),
    ExportFile,
    Ignored,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

/// Viia7 runs finish when the .eds is rewritten; Qiaxcel runs when the .xdrx appears.
/// Exports are text files created by the user, named with their login and "Export".
pub fn classify(event: &WatchEvent, login: &str) -> EventClass {
    let path = &event.path;
    match event.kind {
        WatchEventKind::Modified if has_extension(path, "eds") => EventClass::Run(Instrument::Viia7),
        WatchEventKind::Created if has_extension(path, "xdrx") => {
            EventClass::Run(Instrument::Qiaxcel)
        }
        WatchEventKind::Created if has_extension(path, "txt") => {
            let full = path.to_string_lossy();
            let mine = !login.is_empty() && full.to_lowercase().contains(&login.to_lowercase());
            if mine && full.contains("Export") {
                EventClass::ExportFile
            } else {
                EventClass::Ignored
            }
        }
        _ => EventClass::Ignored,
    }
}

/// The last few event paths, used to swallow duplicate events for one file
#[derive(Debug, Clone)]
pub struct RecentEvents {
    paths: VecDeque<PathBuf>,
    capacity: usize,
}

impl Default for RecentEvents {
    fn default() -> Self {
        Self::with_capacity(RECENT_EVENTS_CAPACITY)
    }
}

impl RecentEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            paths: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Remember a path, forgetting the oldest once full
    pub fn push(&mut self, path: &Path) {
        if self.paths.len() == self.capacity {
            self.paths.pop_front();
        }
        self.paths.push_back(path.to_path_buf());
    }

    /// Push the path unless it is already there. Returns true if it was new
    pub fn insert(&mut self, path: &Path) -> bool {
        if self.contains(path) {
            return false;
        }
        self.push(path);
        true
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    fn event(path: &str, kind: WatchEventKind) -> WatchEvent {
        WatchEvent::new(PathBuf::from(path), kind)
    }

    #[test]
    fn test_classification() {
        use WatchEventKind::*;
        let cases = [
            ("/g/Experiments/Aug 2019/PMG1.eds", Modified, EventClass::Run(Instrument::Viia7)),
            ("/g/Experiments/Aug 2019/PMG1.eds", Created, EventClass::Ignored),
            ("/q/gel.XDRX", Created, EventClass::Run(Instrument::Qiaxcel)),
            ("/q/gel.xdrx", Modified, EventClass::Ignored),
            ("/g/Results Export/PMG1_jb40_Export.txt", Created, EventClass::ExportFile),
            ("/g/Results Export/PMG1_JB40_Export.txt", Created, EventClass::ExportFile),
            ("/g/Results Export/PMG1_ab12_Export.txt", Created, EventClass::Ignored),
            ("/g/Results Export/PMG1_jb40_export.txt", Created, EventClass::Ignored),
            ("/g/Results Export/PMG1_jb40_Export.txt", Modified, EventClass::Ignored),
            ("/g/notes.docx", Created, EventClass::Ignored),
        ];
        for (path, kind, expected) in cases {
            assert_eq!(classify(&event(path, kind), "jb40"), expected, "{path}");
        }
    }

    #[test]
    fn test_from_notify() {
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/q/a.xdrx"))
            .add_path(PathBuf::from("/q/b.xdrx"));
        let events = WatchEvent::from_notify(&created);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, WatchEventKind::Created);
        assert_eq!(events[1].display_name(), "b");

        let modified = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/v/a.eds"));
        assert_eq!(WatchEvent::from_notify(&modified)[0].kind, WatchEventKind::Modified);

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/v/a.eds"));
        assert!(WatchEvent::from_notify(&removed).is_empty());
    }

    #[test]
    fn test_recent_events_ring() {
        let mut recent = RecentEvents::with_capacity(3);
        assert!(recent.insert(Path::new("a")));
        assert!(!recent.insert(Path::new("a")));
        recent.push(Path::new("b"));
        recent.push(Path::new("c"));
        recent.push(Path::new("d"));
        assert_eq!(recent.len(), 3);
        assert!(!recent.contains(Path::new("a")));
        assert!(recent.contains(Path::new("d")));
        assert_eq!(RecentEvents::default().capacity, RECENT_EVENTS_CAPACITY);
    }
}
