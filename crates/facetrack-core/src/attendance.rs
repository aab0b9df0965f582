//! Attendance records and the punch policy.
//!
//! Punches alternate IN/OUT within a calendar day, starting with IN. A second
//! punch by the same employee inside the cooldown window is refused.

use crate::store::{AttendanceLog, StoreError};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Default minimum spacing between two punches of the same employee.
pub const DEFAULT_PUNCH_COOLDOWN_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttendanceKind {
    In,
    Out,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown attendance kind: {0:?} (expected IN or OUT)")]
pub struct ParseKindError(String);

impl FromStr for AttendanceKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// One attendance event. Timestamps are local wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub employee_id: String,
    pub name: String,
    pub kind: AttendanceKind,
    pub recorded_at: NaiveDateTime,
}

impl AttendanceRecord {
    pub fn new(employee_id: &str, name: &str, kind: AttendanceKind, recorded_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            employee_id: employee_id.to_string(),
            name: name.to_string(),
            kind,
            recorded_at,
        }
    }
}

#[derive(Error, Debug)]
pub enum PunchError {
    #[error("{employee_id} already punched at {last_at}; retry in {retry_in_secs}s")]
    TooSoon {
        employee_id: String,
        last_at: NaiveDateTime,
        retry_in_secs: i64,
    },
    #[error("attendance log: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct PunchPolicy {
    cooldown: Duration,
}

impl PunchPolicy {
    pub fn new(cooldown_secs: u64) -> Self {
        let secs = i64::try_from(cooldown_secs).unwrap_or(i64::MAX / 1000);
        Self {
            cooldown: Duration::try_seconds(secs).unwrap_or(Duration::MAX),
        }
    }

    /// Pick the kind for a punch at `now`, given the employee's previous punch.
    ///
    /// An explicit `requested` kind wins over alternation but not over the cooldown.
    pub fn decide(
        &self,
        employee_id: &str,
        last: Option<&AttendanceRecord>,
        now: NaiveDateTime,
        requested: Option<AttendanceKind>,
    ) -> Result<AttendanceKind, PunchError> {
        if let Some(last) = last {
            let elapsed = now - last.recorded_at;
            if elapsed >= Duration::zero() && elapsed < self.cooldown {
                return Err(PunchError::TooSoon {
                    employee_id: employee_id.to_string(),
                    last_at: last.recorded_at,
                    retry_in_secs: (self.cooldown - elapsed).num_seconds().max(1),
                });
            }
        }

        if let Some(kind) = requested {
            return Ok(kind);
        }

        Ok(match last {
            Some(last) if last.recorded_at.date() == now.date() => last.kind.opposite(),
            _ => AttendanceKind::In,
        })
    }
}

impl Default for PunchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PUNCH_COOLDOWN_SECS)
    }
}

/// Record an attendance event for a recognized or manually selected employee.
///
/// The cooldown check and the insert happen inside one
/// [`AttendanceLog::append_after`] call, so concurrent punches for the same
/// employee cannot both pass the check.
pub fn punch<L: AttendanceLog + ?Sized>(
    log: &L,
    policy: &PunchPolicy,
    employee_id: &str,
    name: &str,
    requested: Option<AttendanceKind>,
    now: NaiveDateTime,
) -> Result<AttendanceRecord, PunchError> {
    let record = log.append_after(employee_id, |last| {
        let kind = policy.decide(employee_id, last, now, requested)?;
        Ok::<_, PunchError>(AttendanceRecord::new(employee_id, name, kind, now))
    })?;
    tracing::info!(
        employee = employee_id,
        kind = %record.kind,
        at = %now,
        "attendance recorded"
    );
    Ok(record)
}
