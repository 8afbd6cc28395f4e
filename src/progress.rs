use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "{spinner} Transferred: {bytes}   Speed: {bytes_per_sec}   Time: {elapsed_precise}";

/// Byte counter for streams of unknown length.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new(visible: bool) -> Self {
        if !visible {
            return Self::hidden();
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(250));
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn update(&self, bytes: u64) {
        self.bar.set_position(bytes);
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> u64 {
        self.bar.position()
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    /// Leaves the last state on screen.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}
