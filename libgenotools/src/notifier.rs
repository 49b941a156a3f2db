use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::constants::{ALWAYS_NOTIFY_COUNT, MAX_ARMED_COUNT};
use super::message::{render, Notice, Style};

/// The instruments whose runs we announce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    Qiaxcel,
    Viia7,
}

impl Instrument {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Qiaxcel => "Qiaxcel",
            Self::Viia7 => "Viia7",
        }
    }

    /// The instrument name in its console colour
    pub fn render(&self) -> String {
        let style = match self {
            Self::Qiaxcel => Style::Qiaxcel,
            Self::Viia7 => Style::Viia7,
        };
        render(self.name(), style)
    }
}

impl Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// When to notify about the runs of one instrument.
///
/// A count of n in 1..=9 means "notify on the nth run from now", anything above means
/// "notify on every run", and 0 means off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationCounter {
    count: u32,
    show: bool,
}

impl Default for NotificationCounter {
    fn default() -> Self {
        Self {
            count: 0,
            show: true,
        }
    }
}

impl NotificationCounter {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn show(&self) -> bool {
        self.show
    }

    /// Setting 0 toggles between off and "always"
    pub fn set_count(&mut self, value: u32) {
        self.count = match value {
            0 if self.count > 0 => 0,
            0 => ALWAYS_NOTIFY_COUNT,
            n => n,
        };
    }

    pub fn set_show(&mut self, show: bool) {
        self.show = show;
    }

    pub fn toggle_show(&mut self) {
        self.show = !self.show;
    }

    fn step(&mut self) {
        self.count = self.count.saturating_sub(1);
    }
}

/// Per-instrument counters plus the "only my runs" switch, shared between the watch
/// thread and the command thread.
#[derive(Debug)]
pub struct Notifier {
    login: String,
    qiaxcel: Mutex<NotificationCounter>,
    viia7: Mutex<NotificationCounter>,
    user_only: AtomicBool,
}

impl Notifier {
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_lowercase(),
            qiaxcel: Mutex::new(NotificationCounter::default()),
            viia7: Mutex::new(NotificationCounter::default()),
            user_only: AtomicBool::new(false),
        }
    }

    /// A poisoned counter is still a valid counter
    fn counter(&self, instrument: Instrument) -> MutexGuard<'_, NotificationCounter> {
        let counter = match instrument {
            Instrument::Qiaxcel => &self.qiaxcel,
            Instrument::Viia7 => &self.viia7,
        };
        counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self, instrument: Instrument) -> NotificationCounter {
        self.counter(instrument).clone()
    }

    pub fn set_count(&self, instrument: Instrument, value: u32) -> Notice {
        let mut counter = self.counter(instrument);
        counter.set_count(value);
        Notice::CounterSetting {
            instrument,
            count: counter.count(),
        }
    }

    pub fn toggle_show(&self, instrument: Instrument) -> Notice {
        let mut counter = self.counter(instrument);
        counter.toggle_show();
        Notice::ShowSetting {
            instrument,
            show: counter.show(),
        }
    }

    pub fn set_show(&self, instrument: Instrument, show: bool) -> Notice {
        self.counter(instrument).set_show(show);
        Notice::ShowSetting { instrument, show }
    }

    /// Show both instruments and leave user-only mode
    pub fn show_all(&self) -> Notice {
        self.set_show(Instrument::Qiaxcel, true);
        self.set_show(Instrument::Viia7, true);
        self.set_user_only(false)
    }

    pub fn set_user_only(&self, user_only: bool) -> Notice {
        self.user_only.store(user_only, Ordering::SeqCst);
        Notice::UserOnly(user_only)
    }

    pub fn toggle_user_only(&self) -> Notice {
        let user_only = !self.user_only.fetch_xor(true, Ordering::SeqCst);
        Notice::UserOnly(user_only)
    }

    pub fn is_user_only(&self) -> bool {
        self.user_only.load(Ordering::SeqCst)
    }

    /// Decide what to say about a finished run and count it down.
    ///
    /// `path` is the full path of the run file, `file` its display name.
    pub fn on_run_finished(&self, instrument: Instrument, path: &str, file: &str) -> Vec<Notice> {
        let mut counter = self.counter(instrument);
        let count = counter.count();
        let mine = !self.login.is_empty() && path.to_lowercase().contains(&self.login);

        let mut notices = Vec::new();
        if mine || count == 1 || count > MAX_ARMED_COUNT {
            notices.push(Notice::RunFinished {
                instrument,
                file: file.to_string(),
                distinguished: true,
            });
        } else if !self.is_user_only() && counter.show() {
            notices.push(Notice::RunFinished {
                instrument,
                file: file.to_string(),
                distinguished: false,
            });
        }
        if count == 1 {
            notices.push(Notice::NoLongerNotifying(instrument));
        }
        counter.step();
        spdlog::debug!("{} run {} finished, counter now {}", instrument, file, counter.count());
        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distinguished(notices: &[Notice]) -> Option<bool> {
        notices.iter().find_map(|n| match n {
            Notice::RunFinished { distinguished, .. } => Some(*distinguished),
            _ => None,
        })
    }

    #[test]
    fn test_set_count_toggles_on_zero() {
        let mut counter = NotificationCounter::default();
        counter.set_count(0);
        assert_eq!(counter.count(), ALWAYS_NOTIFY_COUNT);
        counter.set_count(0);
        assert_eq!(counter.count(), 0);
        counter.set_count(4);
        assert_eq!(counter.count(), 4);
        counter.set_count(0);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_counter_never_negative() {
        let notifier = Notifier::new("jb40");
        for _ in 0..3 {
            notifier.on_run_finished(Instrument::Qiaxcel, "/q/run.xdrx", "run");
        }
        assert_eq!(notifier.snapshot(Instrument::Qiaxcel).count(), 0);
    }

    #[test]
    fn test_notify_on_third_run() {
        let notifier = Notifier::new("jb40");
        notifier.set_count(Instrument::Viia7, 3);

        let first = notifier.on_run_finished(Instrument::Viia7, "/v/a.eds", "a");
        assert_eq!(distinguished(&first), Some(false));
        let second = notifier.on_run_finished(Instrument::Viia7, "/v/b.eds", "b");
        assert_eq!(distinguished(&second), Some(false));

        let third = notifier.on_run_finished(Instrument::Viia7, "/v/c.eds", "c");
        assert_eq!(distinguished(&third), Some(true));
        assert_eq!(third.last(), Some(&Notice::NoLongerNotifying(Instrument::Viia7)));
        assert_eq!(notifier.snapshot(Instrument::Viia7).count(), 0);
        // Qiaxcel is untouched
        assert_eq!(notifier.snapshot(Instrument::Qiaxcel).count(), 0);
    }

    #[test]
    fn test_own_runs_always_distinguished() {
        let notifier = Notifier::new("JB40");
        notifier.toggle_user_only();
        notifier.toggle_show(Instrument::Viia7);
        let notices = notifier.on_run_finished(Instrument::Viia7, "/v/PMG_JB40.eds", "PMG_JB40");
        assert_eq!(distinguished(&notices), Some(true));
    }

    #[test]
    fn test_hidden_and_user_only_suppress() {
        let notifier = Notifier::new("jb40");
        notifier.toggle_show(Instrument::Qiaxcel);
        assert!(notifier
            .on_run_finished(Instrument::Qiaxcel, "/q/x.xdrx", "x")
            .is_empty());
        // Viia7 still shows
        assert_eq!(
            distinguished(&notifier.on_run_finished(Instrument::Viia7, "/v/x.eds", "x")),
            Some(false)
        );

        assert_eq!(notifier.toggle_user_only(), Notice::UserOnly(true));
        assert!(notifier.on_run_finished(Instrument::Viia7, "/v/y.eds", "y").is_empty());

        notifier.show_all();
        assert!(!notifier.is_user_only());
        assert!(notifier.snapshot(Instrument::Qiaxcel).show());
    }

    #[test]
    fn test_setters_are_idempotent() {
        let notifier = Notifier::new("jb40");
        for _ in 0..2 {
            assert_eq!(
                notifier.set_show(Instrument::Viia7, false),
                Notice::ShowSetting {
                    instrument: Instrument::Viia7,
                    show: false
                }
            );
            assert_eq!(notifier.set_user_only(true), Notice::UserOnly(true));
        }
        assert!(!notifier.snapshot(Instrument::Viia7).show());
        assert!(notifier.is_user_only());
    }

    #[test]
    fn test_always_mode_stays_distinguished() {
        let notifier = Notifier::new("");
        notifier.set_count(Instrument::Qiaxcel, 0);
        for _ in 0..5 {
            let notices = notifier.on_run_finished(Instrument::Qiaxcel, "/q/x.xdrx", "x");
            assert_eq!(distinguished(&notices), Some(true));
            assert_eq!(notices.len(), 1);
        }
        assert_eq!(notifier.snapshot(Instrument::Qiaxcel).count(), ALWAYS_NOTIFY_COUNT - 5);
    }
}
