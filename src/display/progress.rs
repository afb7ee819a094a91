use indicatif::{ProgressBar, ProgressStyle};

/// Receives advisory progress for long-running stages. Implementations must
/// not influence the work being reported on.
pub trait ProgressObserver {
    fn start(&self, _total: usize, _label: &str) {}
    fn advance(&self, done: usize);
    fn finish(&self) {}
}

/// Swallows all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn advance(&self, _done: usize) {}
}

/// Terminal progress bar on stderr.
#[derive(Debug, Clone)]
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{msg:>24} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>6}/{len:6}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn start(&self, total: usize, label: &str) {
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_message(label.to_owned());
    }

    fn advance(&self, done: usize) {
        self.bar.inc(done as u64);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}
