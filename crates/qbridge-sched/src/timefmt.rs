//! Wall-clock time-limit validation.
//!
//! Tunnel jobs request a `--time=HH:MM:SS` bound from the scheduler. The
//! format is strict: exactly three two-digit fields with
//! `0 <= HH <= 23`, `0 <= MM <= 59`, `0 <= SS <= 59`.

use crate::error::{SchedError, SchedResult};

/// Convert a `HH:MM:SS` time limit into seconds.
pub fn time_to_seconds(limit: &str) -> SchedResult<u64> {
    let fields: Vec<&str> = limit.split(':').collect();
    if fields.len() != 3
        || fields
            .iter()
            .any(|f| f.len() != 2 || !f.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(SchedError::InvalidTimeLimit(limit.to_string()));
    }

    let parse = |s: &str| -> SchedResult<u64> {
        s.parse()
            .map_err(|_| SchedError::InvalidTimeLimit(limit.to_string()))
    };
    let hours = parse(fields[0])?;
    let minutes = parse(fields[1])?;
    let seconds = parse(fields[2])?;

    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(SchedError::InvalidTimeLimit(limit.to_string()));
    }

    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Check a user-supplied time limit against the system-wide maximum.
///
/// `None` always passes (the scheduler default applies).
pub fn check_within_limit(limit: Option<&str>, max: &str) -> SchedResult<()> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let requested = time_to_seconds(limit)?;
    let allowed = time_to_seconds(max)?;
    if requested > allowed {
        return Err(SchedError::TimeLimitExceeded {
            requested: limit.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}
