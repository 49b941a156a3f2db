use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use time::PrimitiveDateTime;

use super::config::Config;
use super::context::AppContext;
use super::dispatcher::Dispatcher;
use super::error::WatchError;
use super::message::{now, Notice};
use super::watch_event::WatchEvent;
use super::watch_schedule::{WatchBackend, WatchSchedule, YearMonth};

/// What a tick found
enum Tick {
    Continue,
    Stop,
    /// A watched folder is gone or could not be rescheduled
    Lost(String),
}

/// Everything the watch thread reacts to arrives on one channel
#[derive(Debug)]
pub enum WatchMessage {
    Event(notify::Result<Event>),
    Restart,
    Stop,
}

/// The OS file watcher, forwarding its events into the service channel
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    pub fn new(tx: Sender<WatchMessage>) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |result| {
            // The service is gone if this fails; nothing left to tell
            let _ = tx.send(WatchMessage::Event(result));
        })?;
        Ok(Self { watcher })
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher.watch(path, mode)?;
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher.unwatch(path)?;
        Ok(())
    }
}

/// Errors that mean the watched share went away, as opposed to a bad configuration
pub fn is_connection_error(error: &notify::Error) -> bool {
    matches!(
        error.kind,
        notify::ErrorKind::Io(_) | notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound
    )
}

/// A watched folder named by a remove event; inotify reports an unmounted share this way
fn removed_root(event: &Event, schedule: &WatchSchedule) -> Option<PathBuf> {
    if !matches!(event.kind, EventKind::Remove(_)) {
        return None;
    }
    let watched = schedule.watched_paths();
    event.paths.iter().find(|p| watched.contains(p)).cloned()
}

/// Owns the file watcher and runs the dispatcher on its events.
///
/// Every tick it checks that the watched folders are still there, whether the month has
/// changed and whether the maintenance window in the config file has started.
pub struct WatchService {
    ctx: Arc<AppContext>,
    config_path: Option<PathBuf>,
    dispatcher: Dispatcher,
    tx: Sender<WatchMessage>,
    rx: Receiver<WatchMessage>,
}

impl WatchService {
    /// Create the service. The returned sender is used to restart or stop it
    pub fn new(ctx: Arc<AppContext>, config_path: Option<PathBuf>) -> (Self, Sender<WatchMessage>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let service = Self {
            dispatcher: Dispatcher::new(ctx.clone()),
            ctx,
            config_path,
            tx: tx.clone(),
            rx,
        };
        (service, tx)
    }

    fn try_connect(&self) -> Result<(WatchSchedule, NotifyBackend), WatchError> {
        let mut backend = NotifyBackend::new(self.tx.clone())?;
        let mut schedule = WatchSchedule::new(&self.ctx.config, YearMonth::from(now()));
        schedule.schedule_all(&mut backend)?;
        Ok((schedule, backend))
    }

    /// Tell the user the folders are gone. Once per outage
    fn report_lost(&self, reason: &str) {
        spdlog::error!("Lost the watch folders: {}", reason);
        self.ctx
            .notify(Notice::Error(format!("Lost connection to the team drive! ({reason})")));
        self.ctx.notify(Notice::Info(String::from("Reconnecting...")));
    }

    /// Build the watcher, retrying until it works or the service is stopped.
    /// `failing` is set if the outage has already been reported
    fn connect(&self, mut failing: bool) -> Option<(WatchSchedule, NotifyBackend)> {
        loop {
            if self.ctx.is_stopping() {
                return None;
            }
            match self.try_connect() {
                Ok(connected) => {
                    if failing {
                        spdlog::info!("Reconnected to the watch folders");
                        self.ctx.notify(Notice::Info(String::from("Reconnected!")));
                    }
                    return Some(connected);
                }
                Err(e) if !failing => {
                    self.report_lost(&e.to_string());
                    failing = true;
                }
                Err(e) => spdlog::debug!("Still can't watch folders: {}", e),
            }
            // Wait out the interval, but stop promptly if asked
            match self.rx.recv_timeout(self.ctx.config.reconnect_interval()) {
                Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    self.ctx.request_stop();
                    return None;
                }
                _ => (),
            }
        }
    }

    /// Is the config file's maintenance window open
    fn in_update_window(&self) -> bool {
        let Some(path) = &self.config_path else {
            return false;
        };
        // Re-read every time: the window is set on the shared config while we run
        let config = match Config::read_config_file(path) {
            Ok(config) => config,
            Err(e) => {
                spdlog::warn!("Could not re-read config for the update window: {}", e);
                return false;
            }
        };
        let Some(window) = config.update_window else {
            return false;
        };
        let now = now();
        match window.contains(PrimitiveDateTime::new(now.date(), now.time())) {
            Ok(open) => {
                if open {
                    spdlog::info!("Update window open until {}", window.end);
                    self.ctx.notify(Notice::Info(format!(
                        "Update in progress until {}. Closing...",
                        window.end
                    )));
                }
                open
            }
            Err(e) => {
                spdlog::warn!("{}", e);
                false
            }
        }
    }

    /// Periodic checks
    fn tick(&self, schedule: &mut WatchSchedule, backend: &mut NotifyBackend) -> Tick {
        if self.in_update_window() {
            return Tick::Stop;
        }
        if let Some(missing) = schedule.watched_paths().into_iter().find(|p| !p.is_dir()) {
            return Tick::Lost(format!("{} is missing", missing.display()));
        }
        let month = YearMonth::from(now());
        match schedule.roll_over(backend, month) {
            Ok(true) => {
                self.ctx
                    .notify(Notice::Info(format!("The month has changed to {month}")));
                Tick::Continue
            }
            Ok(false) => Tick::Continue,
            Err(e) => Tick::Lost(e.to_string()),
        }
    }

    /// Run until stopped. Blocks the calling thread
    pub fn run(mut self) -> Result<(), WatchError> {
        spdlog::info!("Starting watch service");
        let tick_interval = self.ctx.config.tick_interval();
        let Some((mut schedule, mut backend)) = self.connect(false) else {
            return Ok(());
        };
        let mut last_tick: Option<Instant> = None;

        while !self.ctx.is_stopping() {
            if last_tick.map_or(true, |t| t.elapsed() >= tick_interval) {
                last_tick = Some(Instant::now());
                match self.tick(&mut schedule, &mut backend) {
                    Tick::Continue => (),
                    Tick::Stop => {
                        self.ctx.request_stop();
                        break;
                    }
                    Tick::Lost(reason) => {
                        self.report_lost(&reason);
                        let Some(connected) = self.reconnect(backend, true) else {
                            break;
                        };
                        (schedule, backend) = connected;
                    }
                }
            }

            let wait = last_tick
                .map(|t| tick_interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO);
            let message = match self.rx.recv_timeout(wait) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match message {
                WatchMessage::Event(Ok(event)) => {
                    if let Some(root) = removed_root(&event, &schedule) {
                        self.report_lost(&format!("{} was removed", root.display()));
                        let Some(connected) = self.reconnect(backend, true) else {
                            break;
                        };
                        (schedule, backend) = connected;
                        continue;
                    }
                    for watch_event in WatchEvent::from_notify(&event) {
                        self.dispatcher.handle(&watch_event);
                    }
                }
                WatchMessage::Event(Err(e)) if is_connection_error(&e) => {
                    self.report_lost(&e.to_string());
                    let Some(connected) = self.reconnect(backend, true) else {
                        break;
                    };
                    (schedule, backend) = connected;
                }
                WatchMessage::Event(Err(e)) => spdlog::error!("File watcher error: {}", e),
                WatchMessage::Restart => {
                    spdlog::info!("Restarting watch service");
                    let Some(connected) = self.reconnect(backend, false) else {
                        break;
                    };
                    (schedule, backend) = connected;
                    self.ctx.notify(Notice::Info(String::from("Watcher restarted")));
                }
                WatchMessage::Stop => {
                    self.ctx.request_stop();
                    break;
                }
            }
        }
        spdlog::info!("Watch service stopped");
        Ok(())
    }

    /// Drop the old watcher before building a new one
    fn reconnect(&self, backend: NotifyBackend, failing: bool) -> Option<(WatchSchedule, NotifyBackend)> {
        drop(backend);
        self.connect(failing)
    }
}
