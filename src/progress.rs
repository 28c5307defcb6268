use std::{cell::RefCell, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};

/// Receives progress notifications from a running solve or sweep.
///
/// Notifications are fire-and-forget: implementations must not block and
/// cannot fail the pipeline.
pub trait ProgressObserver {
    /// `percent` is in `0..=100`
    fn set(&self, percent: u8, label: &str);
}

/// Sends a notification if an observer is present
pub fn notify(progress: Option<&dyn ProgressObserver>, percent: u8, label: &str) {
    if let Some(observer) = progress {
        observer.set(percent.min(100), label);
    }
}

/// Terminal progress bar
pub struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    pub fn new() -> BarObserver {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos:>3}% {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(200));

        BarObserver { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for BarObserver {
    fn default() -> Self {
        BarObserver::new()
    }
}

impl ProgressObserver for BarObserver {
    fn set(&self, percent: u8, label: &str) {
        self.bar.set_position(percent as u64);
        self.bar.set_message(label.to_owned());
    }
}

/// Records every notification, used to inspect pipeline milestones
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: RefCell<Vec<(u8, String)>>,
}

impl ProgressObserver for RecordingObserver {
    fn set(&self, percent: u8, label: &str) {
        self.events.borrow_mut().push((percent, label.to_owned()));
    }
}
