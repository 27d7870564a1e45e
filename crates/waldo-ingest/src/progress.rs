//! Progress bars for stage runs

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::runner::{ProgressObserver, StageProgress};

const STAGE_TEMPLATE: &str =
    "{msg:>10} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})";

fn stage_style() -> ProgressStyle {
    ProgressStyle::with_template(STAGE_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// One bar per stage, created when the stage reports its first item.
#[derive(Debug)]
pub struct StageBars {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl StageBars {
    /// Bars drawn to stderr.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        })
    }

    /// Bars that track progress without drawing.
    pub fn hidden() -> Arc<Self> {
        Arc::new(Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        })
    }

    pub fn observer(self: &Arc<Self>) -> ProgressObserver {
        let bars = Arc::clone(self);
        Arc::new(move |progress: &StageProgress<'_>| bars.update(progress))
    }

    /// Current position of a stage's bar.
    pub fn position(&self, stage: &str) -> Option<u64> {
        let bars = self.bars.lock().ok()?;
        bars.get(stage).map(ProgressBar::position)
    }

    fn update(&self, progress: &StageProgress<'_>) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars.entry(progress.stage.to_string()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(progress.total as u64));
            bar.set_style(stage_style());
            bar.set_message(progress.stage.to_string());
            bar
        });

        bar.set_position(progress.attempted as u64);
        if progress.attempted >= progress.total {
            bar.finish();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_tracks_each_stage() {
        let bars = StageBars::hidden();
        let observer = bars.observer();

        observer(&StageProgress {
            stage: "download",
            attempted: 1,
            total: 3,
        });
        observer(&StageProgress {
            stage: "download",
            attempted: 2,
            total: 3,
        });
        observer(&StageProgress {
            stage: "metadata",
            attempted: 1,
            total: 1,
        });

        assert_eq!(bars.position("download"), Some(2));
        assert_eq!(bars.position("metadata"), Some(1));
        assert_eq!(bars.position("persist"), None);
    }
}
