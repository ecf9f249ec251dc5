use hoard_engine::{ItemObserver, LoadState};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

const BAR_LENGTH: u64 = 1000;

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {percent}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            disabled: true,
        }
    }

    /// Observer that draws one bar for a resource item
    pub fn observer_for(&self, url: &str) -> Option<Arc<dyn ItemObserver>> {
        if self.disabled {
            return None;
        }

        let bar = self.multi.add(ProgressBar::new(BAR_LENGTH));
        bar.set_style(download_style());
        bar.set_message(format!("Waiting {url}"));
        Some(Arc::new(BarObserver { bar }))
    }
}

struct BarObserver {
    bar: ProgressBar,
}

impl ItemObserver for BarObserver {
    fn on_state_changed(&self, key: &str, state: LoadState) {
        match state {
            LoadState::Loading => {
                self.bar.set_message(format!("Downloading {key}"));
                self.bar.enable_steady_tick(Duration::from_millis(500));
            }
            LoadState::Loaded => {
                self.bar.set_position(BAR_LENGTH);
                self.bar.finish_with_message(format!("Finished {key}"));
            }
            LoadState::NotLoaded => {
                self.bar.abandon_with_message(format!("Failed {key}"));
            }
        }
    }

    fn on_progress(&self, _key: &str, fraction: f32) {
        self.bar.set_position((fraction * BAR_LENGTH as f32) as u64);
    }
}
