use std::fmt::Display;
use std::path::{Path, PathBuf};

use time::{Month, OffsetDateTime};

use super::config::Config;
use super::error::WatchError;

/// A calendar month, the unit the lab files its runs by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: Month,
}

impl From<OffsetDateTime> for YearMonth {
    fn from(value: OffsetDateTime) -> Self {
        Self {
            year: value.year(),
            month: value.month(),
        }
    }
}

impl YearMonth {
    pub fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    pub fn previous(&self) -> Self {
        match self.month {
            Month::January => Self::new(self.year - 1, Month::December),
            m => Self::new(self.year, m.previous()),
        }
    }

    /// "August"
    pub fn full_name(&self) -> String {
        self.month.to_string()
    }

    /// "Aug"
    pub fn short_name(&self) -> String {
        self.full_name().chars().take(3).collect()
    }

    /// Folder spellings people have used for this month, preferred first
    fn spellings(&self) -> Vec<String> {
        let mut names = vec![self.short_name(), self.full_name()];
        if self.month == Month::September {
            names.push(String::from("Sept"));
        }
        names
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.short_name(), self.year)
    }
}

/// The two monthly folder trees under the genotyping share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthlyFolder {
    Experiments,
    ResultsExport,
}

impl MonthlyFolder {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Experiments => "Experiments",
            Self::ResultsExport => "Results Export",
        }
    }

    /// `{genotyping}/qPCR {YYYY}/{Experiments|Results Export}/{month} {YYYY}`
    pub fn build_path(&self, genotyping: &Path, month_name: &str, year: i32) -> PathBuf {
        genotyping
            .join(format!("qPCR {year}"))
            .join(self.dir_name())
            .join(format!("{month_name} {year}"))
    }

    /// Find this folder for a month. If none of the spellings exist, the short spelling is
    /// created when `create` is set, otherwise None.
    pub fn resolve(
        &self,
        genotyping: &Path,
        month: YearMonth,
        create: bool,
    ) -> Result<Option<PathBuf>, WatchError> {
        for name in month.spellings() {
            let path = self.build_path(genotyping, &name, month.year);
            if path.is_dir() {
                return Ok(Some(path));
            }
        }
        if create {
            let path = self.build_path(genotyping, &month.short_name(), month.year);
            std::fs::create_dir_all(&path)?;
            spdlog::info!("Created watch folder {}", path.display());
            Ok(Some(path))
        } else {
            spdlog::warn!(
                "Can't find the {} folder for {}; it won't be watched",
                self.dir_name(),
                month
            );
            Ok(None)
        }
    }
}

/// The operations the schedule needs from a filesystem watcher
pub trait WatchBackend {
    fn watch(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError>;
    fn unwatch(&mut self, path: &Path) -> Result<(), WatchError>;
}

/// Watch state of one monthly folder tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MonthlyWatch {
    #[default]
    Unscheduled,
    Current(PathBuf),
    CurrentAndPrevious { current: PathBuf, previous: PathBuf },
}

impl MonthlyWatch {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Unscheduled => vec![],
            Self::Current(current) => vec![current.as_path()],
            Self::CurrentAndPrevious { current, previous } => {
                vec![current.as_path(), previous.as_path()]
            }
        }
    }

    /// Demote the current folder to previous and take a new current one.
    /// Returns the old previous folder, which is no longer needed.
    fn advance(&mut self, next: PathBuf) -> Option<PathBuf> {
        let (state, dropped) = match std::mem::take(self) {
            Self::Unscheduled => (Self::Current(next), None),
            Self::Current(current) => (
                Self::CurrentAndPrevious {
                    current: next,
                    previous: current,
                },
                None,
            ),
            Self::CurrentAndPrevious { current, previous } => (
                Self::CurrentAndPrevious {
                    current: next,
                    previous: current,
                },
                Some(previous),
            ),
        };
        *self = state;
        dropped
    }
}

/// Every folder the service watches: the Qiaxcel folder, plus this and last month's
/// Experiments and Results Export folders.
#[derive(Debug, Clone)]
pub struct WatchSchedule {
    genotyping: PathBuf,
    qiaxcel: PathBuf,
    recursive: bool,
    month: YearMonth,
    experiments: MonthlyWatch,
    exports: MonthlyWatch,
}

impl WatchSchedule {
    pub fn new(config: &Config, month: YearMonth) -> Self {
        Self {
            genotyping: config.genotyping_path.clone(),
            qiaxcel: config.qiaxcel_path.clone(),
            recursive: config.recursive,
            month,
            experiments: MonthlyWatch::Unscheduled,
            exports: MonthlyWatch::Unscheduled,
        }
    }

    pub fn month(&self) -> YearMonth {
        self.month
    }

    pub fn experiments(&self) -> &MonthlyWatch {
        &self.experiments
    }

    pub fn exports(&self) -> &MonthlyWatch {
        &self.exports
    }

    /// Resolve the folders for the schedule's month and watch all of them
    pub fn schedule_all<B: WatchBackend>(&mut self, backend: &mut B) -> Result<(), WatchError> {
        let previous = self.month.previous();
        self.experiments = MonthlyWatch::Unscheduled;
        self.exports = MonthlyWatch::Unscheduled;
        for (folder, watch) in [
            (MonthlyFolder::Experiments, &mut self.experiments),
            (MonthlyFolder::ResultsExport, &mut self.exports),
        ] {
            if let Some(path) = folder.resolve(&self.genotyping, previous, false)? {
                watch.advance(path);
            }
            if let Some(path) = folder.resolve(&self.genotyping, self.month, true)? {
                watch.advance(path);
            }
        }
        self.watch_all(backend)
    }

    /// Watch every scheduled folder again, after the backend was rebuilt
    pub fn watch_all<B: WatchBackend>(&self, backend: &mut B) -> Result<(), WatchError> {
        for path in self.watched_paths() {
            backend.watch(&path, self.recursive)?;
            spdlog::info!("Watching {}", path.display());
        }
        Ok(())
    }

    /// Move the schedule on to `month`. Does nothing if it is already there
    pub fn roll_over<B: WatchBackend>(
        &mut self,
        backend: &mut B,
        month: YearMonth,
    ) -> Result<bool, WatchError> {
        if month == self.month {
            return Ok(false);
        }
        spdlog::info!("The month has changed to {}", month);
        self.month = month;
        for (folder, watch) in [
            (MonthlyFolder::Experiments, &mut self.experiments),
            (MonthlyFolder::ResultsExport, &mut self.exports),
        ] {
            let Some(next) = folder.resolve(&self.genotyping, month, true)? else {
                continue;
            };
            if let Some(dropped) = watch.advance(next.clone()) {
                backend.unwatch(&dropped)?;
            }
            backend.watch(&next, self.recursive)?;
        }
        Ok(true)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.qiaxcel.clone()];
        paths.extend(self.experiments.paths().into_iter().map(Path::to_path_buf));
        paths.extend(self.exports.paths().into_iter().map(Path::to_path_buf));
        paths
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Records watch calls instead of touching the OS
    #[derive(Debug, Default)]
    pub struct FakeBackend {
        pub watched: Vec<PathBuf>,
        pub unwatched: Vec<PathBuf>,
    }

    impl WatchBackend for FakeBackend {
        fn watch(&mut self, path: &Path, _recursive: bool) -> Result<(), WatchError> {
            self.watched.push(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
            self.watched.retain(|p| p != path);
            self.unwatched.push(path.to_path_buf());
            Ok(())
        }
    }
}
