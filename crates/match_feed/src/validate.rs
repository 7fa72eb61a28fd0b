//! Sanity rules for a finished match.

use serde::Serialize;

use crate::record::MatchRecord;

/// Shortest and longest duration (seconds) that a real match can have.
pub const MIN_DURATION_SECS: i64 = 10;
pub const MAX_DURATION_SECS: i64 = 4 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Nobody flagged as winner, typically an out-of-sync game.
    NoWinner,
    /// Duration outside `[MIN_DURATION_SECS, MAX_DURATION_SECS]`.
    InvalidDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum Classification {
    Valid,
    InvalidRefundable(InvalidReason),
}

impl Classification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Classification::Valid)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::InvalidRefundable(_) => "invalid_refundable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedMatch {
    pub record: MatchRecord,
    pub classification: Classification,
    /// Sanitized duration; `0` means invalid / out of sync.
    pub effective_duration: u64,
}

impl ValidatedMatch {
    pub fn identity(&self) -> String {
        self.record.identity()
    }

    pub fn winner_name(&self) -> Option<&str> {
        self.record.winner().map(|p| p.name.as_str())
    }
}

pub fn sanitize_duration(seconds: i64) -> u64 {
    if (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&seconds) {
        seconds as u64
    } else {
        0
    }
}

pub fn classify(record: MatchRecord) -> ValidatedMatch {
    let effective_duration = sanitize_duration(record.duration_seconds);

    let classification = if !record.has_winner() {
        Classification::InvalidRefundable(InvalidReason::NoWinner)
    } else if effective_duration == 0 {
        Classification::InvalidRefundable(InvalidReason::InvalidDuration)
    } else {
        Classification::Valid
    };

    ValidatedMatch {
        record,
        classification,
        effective_duration,
    }
}

pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    match (hours > 0, minutes > 0, secs > 0) {
        (true, true, true) => format!("{hours} hours {minutes} minutes {secs} seconds"),
        (true, true, false) => format!("{hours} hours {minutes} minutes"),
        (true, false, _) => format!("{hours} hours"),
        (false, true, true) => format!("{minutes} minutes {secs} seconds"),
        (false, true, false) => format!("{minutes} minutes"),
        (false, false, _) => format!("{secs} seconds"),
    }
}

/// Human line for the duration, as shown next to a detected match.
pub fn describe_duration(effective_duration: u64) -> String {
    if effective_duration == 0 {
        "Invalid Duration (Likely Out of Sync)".to_string()
    } else {
        format_duration(effective_duration)
    }
}
