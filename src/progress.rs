use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

const TRAIL_LEN: usize = 60;

/// Outcome markers shown while importing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Whole batch stored in one bulk call.
    Batch,
    /// Record stored individually after a bulk failure.
    Record,
    /// Record that could not be stored.
    Failed,
}

impl Marker {
    pub fn symbol(self) -> char {
        match self {
            Marker::Batch => '.',
            Marker::Record => '-',
            Marker::Failed => '!',
        }
    }
}

/// Spinner with a trail of outcome markers and timestamped milestones.
pub struct ImportProgress {
    bar: ProgressBar,
    trail: Mutex<String>,
    quiet: bool,
}

impl ImportProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {pos} records ({per_sec}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(200));
        ImportProgress {
            bar,
            trail: Mutex::new(String::with_capacity(TRAIL_LEN)),
            quiet: false,
        }
    }

    /// No output at all.
    #[cfg(test)]
    pub fn hidden() -> Self {
        ImportProgress {
            bar: ProgressBar::hidden(),
            trail: Mutex::new(String::new()),
            quiet: true,
        }
    }

    /// Record one outcome covering `records` records.
    pub fn mark(&self, marker: Marker, records: u64) {
        if marker != Marker::Failed {
            self.bar.inc(records);
        }
        if let Ok(mut trail) = self.trail.lock() {
            trail.push(marker.symbol());
            if trail.len() > TRAIL_LEN {
                let excess = trail.len() - TRAIL_LEN;
                trail.drain(..excess);
            }
            self.bar.set_message(trail.clone());
        }
    }

    #[cfg(test)]
    pub fn trail(&self) -> String {
        self.trail.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn milestone(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        let line = format!("{}: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"), msg.as_ref());
        if self.bar.is_hidden() {
            eprintln!("{}", line);
        } else {
            self.bar.println(line);
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_keeps_latest_markers() {
        let p = ImportProgress::hidden();
        p.mark(Marker::Batch, 10);
        p.mark(Marker::Record, 1);
        p.mark(Marker::Failed, 1);
        assert_eq!(p.trail(), ".-!");
        for _ in 0..TRAIL_LEN {
            p.mark(Marker::Record, 1);
        }
        let trail = p.trail();
        assert_eq!(trail.len(), TRAIL_LEN);
        assert!(trail.chars().all(|c| c == '-'));
    }
}
