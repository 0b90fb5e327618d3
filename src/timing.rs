//! Duration and size arithmetic shared by configuration and connection handling
//!
//! Everything in here is pure: parsing of human duration/size strings, the
//! stream-parameter solver, and the deadline helpers used before every
//! blocking read or write.

use std::time::Duration;

/// Default for read, write, connect and idle timeouts
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
/// Connection life used by payload validation when none is configured
pub const DEFAULT_VALIDATION_LIFE: Duration = Duration::from_secs(30);

pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_CHUNK_SIZE: u64 = 100;
pub const DEFAULT_CHUNK_COUNT: u64 = 10;

/// Parses a human duration such as `"30s"`, `"250ms"` or `"1m30s"`.
///
/// An empty string means "unset" and yields `None`; a bare `"0"` is zero.
pub fn parse_duration(value: &str) -> Result<Option<Duration>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value == "0" {
        return Ok(Some(Duration::ZERO));
    }
    humantime::parse_duration(value)
        .map(Some)
        .map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Renders a duration the way it is stored back into config strings
pub fn format_duration(value: Duration) -> String {
    if value.is_zero() {
        return String::new();
    }
    humantime::format_duration(value).to_string()
}

/// Parses a byte size: a plain number or one suffixed with K, KB, M, MB, G or GB
/// (binary multiples, case-insensitive). Empty means unset.
pub fn parse_size(value: &str) -> Result<Option<u64>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let upper = value.to_ascii_uppercase();
    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (number, suffix) = upper.split_at(digits_end);
    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        _ => return Err(format!("invalid size '{value}': unknown unit '{suffix}'")),
    };
    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid size '{value}': expected a number"))?;
    number
        .checked_mul(multiplier)
        .map(Some)
        .ok_or_else(|| format!("invalid size '{value}': too large"))
}

/// The five related streaming parameters
///
/// `payload_size = chunk_size * chunk_count` and
/// `duration = chunk_count * chunk_delay`. Zero means unknown.
///
/// ```
/// use tcpsim::timing::StreamParams;
///
/// let solved = StreamParams { chunk_size: 100, chunk_count: 10, ..Default::default() }.solve();
/// assert_eq!(solved.payload_size, 1000);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamParams {
    pub payload_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub chunk_delay: Duration,
    pub duration: Duration,
}

impl StreamParams {
    /// Derives whatever can be derived from the known values without
    /// inventing anything.
    pub fn solve(self) -> Self {
        // The second pass only fills products of values the first pass derived late.
        self.derive().derive()
    }

    /// Solves, then fills remaining gaps with the hard defaults one at a time.
    pub fn solve_with_defaults(self) -> Self {
        let mut params = self.solve();
        if params.chunk_delay.is_zero() {
            params.chunk_delay = DEFAULT_CHUNK_DELAY;
            params = params.solve();
        }
        if params.chunk_size == 0 {
            params.chunk_size = DEFAULT_CHUNK_SIZE;
            params = params.solve();
        }
        if params.chunk_count == 0 {
            params.chunk_count = DEFAULT_CHUNK_COUNT;
            params = params.solve();
        }
        params
    }

    pub fn is_complete(&self) -> bool {
        self.payload_size > 0
            && self.chunk_size > 0
            && self.chunk_count > 0
            && !self.chunk_delay.is_zero()
            && !self.duration.is_zero()
    }

    fn derive(mut self) -> Self {
        if self.payload_size == 0 && self.chunk_size > 0 && self.chunk_count > 0 {
            self.payload_size = self.chunk_size.saturating_mul(self.chunk_count);
        }

        if self.duration.is_zero() && !self.chunk_delay.is_zero() {
            let count = if self.chunk_count > 0 {
                self.chunk_count
            } else if self.payload_size > 0 && self.chunk_size > 0 {
                (self.payload_size / self.chunk_size).max(1)
            } else {
                0
            };
            self.duration = scale(self.chunk_delay, count);
        }

        if self.chunk_count == 0 {
            if self.payload_size > 0 && self.chunk_size > 0 {
                self.chunk_count = (self.payload_size / self.chunk_size).max(1);
            } else if !self.duration.is_zero() && !self.chunk_delay.is_zero() {
                let count = self.duration.as_nanos() / self.chunk_delay.as_nanos();
                self.chunk_count = u64::try_from(count).unwrap_or(u64::MAX).max(1);
            }
        }

        if self.chunk_size == 0 && self.payload_size > 0 && self.chunk_count > 0 {
            self.chunk_size = (self.payload_size / self.chunk_count).max(1);
        }

        if self.chunk_delay.is_zero() && !self.duration.is_zero() && self.chunk_count > 0 {
            let count = u32::try_from(self.chunk_count).unwrap_or(u32::MAX);
            self.chunk_delay = self.duration / count;
        }

        self
    }
}

fn scale(unit: Duration, count: u64) -> Duration {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    unit.saturating_mul(count)
}

/// Remaining connection life, or `None` when life is unlimited
pub fn remaining_life(life: Duration, elapsed: Duration) -> Option<Duration> {
    if life.is_zero() {
        None
    } else {
        Some(life.saturating_sub(elapsed))
    }
}

/// The bound for one blocking operation: the smallest finite value among the
/// remaining life, the operation timeout and the idle timeout.
///
/// Zero timeouts are treated as unbounded. `None` means no deadline at all.
pub fn io_deadline(
    remaining_life: Option<Duration>,
    op_timeout: Duration,
    idle_timeout: Duration,
) -> Option<Duration> {
    let finite = |d: Duration| (!d.is_zero()).then_some(d);
    [remaining_life, finite(op_timeout), finite(idle_timeout)]
        .into_iter()
        .flatten()
        .min()
}

/// Which bound a timed-out operation ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Life,
    Idle,
    Operation,
}

/// Classifies a timeout by recomputing the remaining life after it fired.
pub fn classify_timeout(
    remaining_life: Option<Duration>,
    op_timeout: Duration,
    idle_timeout: Duration,
) -> TimeoutKind {
    if remaining_life.is_some_and(|r| r.is_zero()) {
        TimeoutKind::Life
    } else if !idle_timeout.is_zero() && (op_timeout.is_zero() || idle_timeout < op_timeout) {
        TimeoutKind::Idle
    } else {
        TimeoutKind::Operation
    }
}
