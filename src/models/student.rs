use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: Uuid,
    pub admission_no: String,
    pub first_name: String,
    pub last_name: String,
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub guardian_email: Option<String>,
    pub address: Option<String>,
    pub enrollment_date: NaiveDate,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub admission_no: String,
    pub first_name: String,
    pub last_name: String,
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub guardian_email: Option<String>,
    pub address: Option<String>,
    pub enrollment_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStudentRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub guardian_email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StudentQuery {
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl StudentQuery {
    pub fn offset(&self) -> i64 {
        (self.page.unwrap_or(1).max(1) - 1) * self.per_page()
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(50).clamp(1, 500)
    }
}

#[derive(Debug, Deserialize)]
pub struct SetSubjectsRequest {
    pub subject_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct StudentBalance {
    pub student_id: Uuid,
    pub total_due_cents: i64,
    pub total_paid_cents: i64,
    pub outstanding_cents: i64,
}

/// One row of a CSV/XLSX student import.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StudentImportRow {
    pub admission_no: String,
    pub first_name: String,
    pub last_name: String,
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub guardian_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportRowError {
    pub row: usize,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
    pub errors: Vec<ImportRowError>,
}
