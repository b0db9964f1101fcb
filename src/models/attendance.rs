use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    /// Late arrivals count as attended.
    pub fn attended(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceSession {
    pub id: Uuid,
    pub session_date: NaiveDate,
    pub class_name: String,
    pub subject_id: Option<Uuid>,
    pub taken_by: Uuid,
    pub notes: Option<String>,
    pub present_count: i32,
    pub absent_count: i32,
    pub late_count: i32,
    pub excused_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionWithRecords {
    #[serde(flatten)]
    pub session: AttendanceSession,
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordInput {
    pub student_id: Uuid,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveSessionRequest {
    pub session_date: NaiveDate,
    pub class_name: String,
    pub subject_id: Option<Uuid>,
    pub notes: Option<String>,
    pub records: Vec<RecordInput>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub class_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub present: i32,
    pub absent: i32,
    pub late: i32,
    pub excused: i32,
}

impl StatusCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a AttendanceStatus>) -> Self {
        let mut counts = Self::default();
        for s in statuses {
            match s {
                AttendanceStatus::Present => counts.present += 1,
                AttendanceStatus::Absent => counts.absent += 1,
                AttendanceStatus::Late => counts.late += 1,
                AttendanceStatus::Excused => counts.excused += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Serialize)]
pub struct StudentAttendanceSummary {
    pub student_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
    /// Percentage of sessions attended (present or late), 0 when no sessions.
    pub attendance_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_status() {
        let statuses = [
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Late,
            AttendanceStatus::Absent,
            AttendanceStatus::Excused,
        ];
        let counts = StatusCounts::tally(&statuses);
        assert_eq!(
            counts,
            StatusCounts { present: 2, absent: 1, late: 1, excused: 1 }
        );
    }

    #[test]
    fn late_counts_as_attended_but_excused_does_not() {
        assert!(AttendanceStatus::Late.attended());
        assert!(!AttendanceStatus::Excused.attended());
        assert!(!AttendanceStatus::Absent.attended());
    }

    #[test]
    fn status_deserializes_from_snake_case() {
        let s: AttendanceStatus = serde_json::from_str("\"excused\"").unwrap();
        assert_eq!(s, AttendanceStatus::Excused);
        assert!(serde_json::from_str::<AttendanceStatus>("\"sick\"").is_err());
    }
}
