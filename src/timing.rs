//! Phase timing for long pipelines (ISO repack, backups).

use std::time::Instant;

/// Measures how long a named phase took.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given phase name.
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Seconds elapsed so far.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Finish the timer and print the elapsed time.
    pub fn finish(self) {
        let secs = self.elapsed_secs();
        tracing::debug!(phase = %self.name, secs, "phase finished");
        println!("  [{}] {}", format_duration(secs), self.name);
    }
}

/// `42.0s` below a minute, `1.5m` above.
pub fn format_duration(secs: f64) -> String {
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(4.0), "4.0s");
        assert_eq!(format_duration(90.0), "1.5m");
    }
}
