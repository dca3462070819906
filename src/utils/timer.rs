//! Timing helpers
//!
//! [`Timer`] measures one execution and hands out its deadline. [`Stopwatch`]
//! records how long each phase of a run took.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Measures one execution from the moment it is started
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// The instant `limit` after the start
    pub fn deadline(&self, limit: Duration) -> Instant {
        self.start + limit
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        debug!("{} took {}", self.label, humantime::format_duration(whole_millis(elapsed)));
        elapsed
    }
}

fn whole_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Phases of a run, in the order they happen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Dispatch,
    Drain,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Resolve => write!(f, "resolve"),
            Phase::Dispatch => write!(f, "dispatch"),
            Phase::Drain => write!(f, "drain"),
        }
    }
}

/// Run phase timing
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    /// Phase and the offset from `start` at which it ended
    ends: Vec<(Phase, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            ends: Vec::new(),
        }
    }

    /// Mark `phase` as ending now; it began where the previous one ended
    pub fn finish(&mut self, phase: Phase) {
        self.ends.push((phase, self.start.elapsed()));
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn phase_times(&self) -> Vec<(Phase, Duration)> {
        let mut begin = Duration::ZERO;
        self.ends
            .iter()
            .map(|&(phase, end)| {
                let spent = end.saturating_sub(begin);
                begin = end;
                (phase, spent)
            })
            .collect()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

/// `resolve 2ms, dispatch 1s 40ms, drain 1ms (total 1s 43ms)`
impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (phase, spent)) in self.phase_times().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", phase, humantime::format_duration(whole_millis(spent)))?;
        }
        write!(
            f,
            " (total {})",
            humantime::format_duration(whole_millis(self.total()))
        )
    }
}
