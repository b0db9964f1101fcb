use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assessment {
    pub id: Uuid,
    pub title: String,
    pub subject_id: Option<Uuid>,
    pub class_name: String,
    pub assessment_date: NaiveDate,
    pub max_score: f64,
    pub weight: f64,
    pub graded_count: i32,
    pub average_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAssessmentRequest {
    pub title: String,
    pub subject_id: Option<Uuid>,
    pub class_name: String,
    pub assessment_date: NaiveDate,
    pub max_score: f64,
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAssessmentRequest {
    pub title: Option<String>,
    pub subject_id: Option<Uuid>,
    pub class_name: Option<String>,
    pub assessment_date: Option<NaiveDate>,
    pub max_score: Option<f64>,
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AssessmentQuery {
    pub class_name: Option<String>,
    pub subject_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Grade {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub student_id: Uuid,
    pub score: f64,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradeInput {
    pub student_id: Uuid,
    pub score: f64,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveGradesRequest {
    pub grades: Vec<GradeInput>,
}
