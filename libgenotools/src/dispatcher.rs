use std::sync::Arc;

use super::context::AppContext;
use super::message::Notice;
use super::notifier::Instrument;
use super::watch_event::{classify, EventClass, RecentEvents, WatchEvent};

/// Turns filesystem events into notifications and exports
#[derive(Debug)]
pub struct Dispatcher {
    ctx: Arc<AppContext>,
    recent: RecentEvents,
    login: String,
}

impl Dispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let login = ctx.config.login();
        Self {
            ctx,
            recent: RecentEvents::default(),
            login,
        }
    }

    pub fn handle(&mut self, event: &WatchEvent) {
        match classify(event, &self.login) {
            EventClass::Run(Instrument::Viia7) => self.on_eds(event),
            EventClass::Run(Instrument::Qiaxcel) => self.on_run(Instrument::Qiaxcel, event),
            EventClass::ExportFile => self.on_export(event),
            EventClass::Ignored => (),
        }
    }

    /// Viia7 rewrites the .eds several times while saving; only a full size file counts
    fn on_eds(&mut self, event: &WatchEvent) {
        std::thread::sleep(self.ctx.config.eds_debounce());
        if self.recent.contains(&event.path) {
            return;
        }
        match std::fs::metadata(&event.path) {
            Ok(meta) if meta.len() > self.ctx.config.min_eds_size_bytes => {
                spdlog::info!(
                    "{} is {}",
                    event.path.display(),
                    human_bytes::human_bytes(meta.len() as f64)
                );
            }
            Ok(meta) => {
                spdlog::debug!(
                    "Ignoring {}: only {} so far",
                    event.path.display(),
                    human_bytes::human_bytes(meta.len() as f64)
                );
                return;
            }
            Err(e) => {
                // Better to announce a run that may be broken than to miss it
                spdlog::error!("Could not inspect {}: {}", event.path.display(), e);
                self.ctx.notify(Notice::SavedBadly {
                    file: event.display_name(),
                    reason: e.to_string(),
                });
            }
        }
        self.on_run(Instrument::Viia7, event);
    }

    fn on_run(&mut self, instrument: Instrument, event: &WatchEvent) {
        if !self.recent.insert(&event.path) {
            return;
        }
        let path = event.path.to_string_lossy();
        for notice in self
            .ctx
            .notifier
            .on_run_finished(instrument, &path, &event.display_name())
        {
            self.ctx.notify(notice);
        }
    }

    fn on_export(&mut self, event: &WatchEvent) {
        if !self.ctx.is_auto_export() {
            spdlog::info!("Auto export is off, leaving {}", event.path.display());
            return;
        }
        std::thread::sleep(self.ctx.config.export_debounce());
        let notice = self.ctx.export_file(&event.path);
        self.ctx.notify(notice);
    }
}
