use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookCategory {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub category_id: Option<Uuid>,
    pub total_copies: i32,
    pub available_copies: i32,
    pub shelf_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub category_id: Option<Uuid>,
    pub total_copies: i32,
    pub shelf_location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub category_id: Option<Uuid>,
    pub total_copies: Option<i32>,
    pub shelf_location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookQuery {
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
    pub available_only: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BorrowingStatus {
    Issued,
    Returned,
    Lost,
    /// Query-only: issued and past due.
    Overdue,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Borrowing {
    pub id: Uuid,
    pub book_id: Uuid,
    pub student_id: Uuid,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub returned_on: Option<NaiveDate>,
    pub fine_cents: i64,
    pub status: String,
    pub issued_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct IssueBookRequest {
    pub book_id: Uuid,
    pub student_id: Uuid,
    pub issued_on: Option<NaiveDate>,
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnBookRequest {
    pub returned_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BorrowingQuery {
    pub status: Option<BorrowingStatus>,
    pub student_id: Option<Uuid>,
}
