use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportPeriod {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePeriodRequest {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePeriodRequest {
    pub name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportCard {
    pub id: Uuid,
    pub period_id: Uuid,
    pub student_id: Uuid,
    pub class_name: String,
    pub total_score: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub grade_letter: String,
    pub attendance_present: i32,
    pub attendance_total: i32,
    pub attendance_rate: f64,
    pub class_rank: Option<i32>,
    pub remarks: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateCardsRequest {
    pub class_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CardQuery {
    pub class_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRemarksRequest {
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerationSummary {
    pub period_id: Uuid,
    pub class_name: String,
    pub generated: usize,
}
