use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Mutex;

/// Observer for reporting progress while missing cells are imputed.
///
/// Callbacks arrive from rayon worker threads, so implementations take `&self`.
pub trait CompletionObserver: Sync {
    fn on_start(&self, metric: &str, missing_cells: usize) {
        let _ = (metric, missing_cells);
    }
    fn on_cell_done(&self, feasible: bool) {
        let _ = feasible;
    }
    fn on_finish(&self, imputed: usize, infeasible: usize) {
        let _ = (imputed, infeasible);
    }
}

#[derive(Default)]
pub struct NoopCompletionProgress;

impl CompletionObserver for NoopCompletionProgress {}

/// Terminal progress bar used when the estimator runs verbosely.
#[derive(Default)]
pub struct ConsoleCompletionProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleCompletionProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} cells ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

impl CompletionObserver for ConsoleCompletionProgress {
    fn on_start(&self, metric: &str, missing_cells: usize) {
        let pb = create_progress_bar(missing_cells as u64, &format!("imputing '{metric}'"));
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(pb);
        }
    }

    fn on_cell_done(&self, _feasible: bool) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.inc(1);
            }
        }
    }

    fn on_finish(&self, imputed: usize, infeasible: usize) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_with_message(format!("{imputed} imputed, {infeasible} infeasible"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        done: AtomicUsize,
    }

    impl CompletionObserver for Counting {
        fn on_cell_done(&self, _feasible: bool) {
            self.done.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn observers_accept_calls_from_any_state() {
        let console = ConsoleCompletionProgress::new();
        console.on_cell_done(true);
        console.on_start("sales", 3);
        console.on_cell_done(false);
        console.on_finish(2, 1);
        console.on_finish(0, 0);

        let counting = Counting::default();
        counting.on_start("sales", 2);
        counting.on_cell_done(true);
        counting.on_cell_done(false);
        assert_eq!(counting.done.load(Ordering::Relaxed), 2);
    }
}
