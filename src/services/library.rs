use chrono::{Duration, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    config::Config,
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::library::{
        Book, BookCategory, BookQuery, Borrowing, BorrowingQuery, BorrowingStatus, CategoryRequest,
        CreateBookRequest, IssueBookRequest, UpdateBookRequest,
    },
    services::metrics::BOOK_ISSUES_COUNTER,
};

/// Loan and fine settings, taken from config.
#[derive(Debug, Clone, Copy)]
pub struct LoanPolicy {
    pub loan_days: i64,
    pub fine_per_day_cents: i64,
}

impl From<&Config> for LoanPolicy {
    fn from(config: &Config) -> Self {
        Self {
            loan_days: config.library_loan_days,
            fine_per_day_cents: config.library_fine_per_day_cents,
        }
    }
}

/// Fine for a loan returned on `returned_on`: one charge per day past due.
pub fn overdue_fine(due_on: NaiveDate, returned_on: NaiveDate, per_day_cents: i64) -> i64 {
    let days = (returned_on - due_on).num_days();
    days.max(0).saturating_mul(per_day_cents)
}

/// Default due date of a loan starting on `issued_on`.
pub fn loan_due_on(issued_on: NaiveDate, loan_days: i64) -> ServiceResult<NaiveDate> {
    Duration::try_days(loan_days)
        .and_then(|loan| issued_on.checked_add_signed(loan))
        .ok_or_else(|| ServiceError::validation("issued_on is out of range"))
}

/// Available copies after changing the total from `old_total` to `new_total`.
/// Fails when the new total is smaller than the number of copies on loan.
fn adjusted_available(old_total: i32, available: i32, new_total: i32) -> ServiceResult<i32> {
    let on_loan = old_total - available;
    if new_total < on_loan {
        return Err(ServiceError::conflict(format!(
            "{on_loan} copies are on loan; total_copies cannot drop below that"
        )));
    }
    Ok(new_total - on_loan)
}

pub struct LibraryService;

impl LibraryService {
    // ── Categories ──────────────────────────────────────────────────────────

    pub async fn list_categories(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<BookCategory>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, BookCategory>(&format!(
            "SELECT * FROM {schema}.book_categories ORDER BY name"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create_category(
        pool: &PgPool,
        tenant: &str,
        req: &CategoryRequest,
    ) -> ServiceResult<BookCategory> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        let schema = schema_name(tenant);
        let row = sqlx::query_as::<_, BookCategory>(&format!(
            "INSERT INTO {schema}.book_categories (name, description) VALUES ($1, $2) RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(&req.description)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn update_category(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &CategoryRequest,
    ) -> ServiceResult<BookCategory> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        let schema = schema_name(tenant);
        sqlx::query_as::<_, BookCategory>(&format!(
            "UPDATE {schema}.book_categories SET name = $1, description = $2
             WHERE id = $3 RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("book category"))
    }

    pub async fn delete_category(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!(
            "DELETE FROM {schema}.book_categories WHERE id = $1"
        ))
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("book category"));
        }
        Ok(())
    }

    // ── Books ───────────────────────────────────────────────────────────────

    pub async fn list_books(pool: &PgPool, tenant: &str, q: &BookQuery) -> ServiceResult<Vec<Book>> {
        let schema = schema_name(tenant);
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM {schema}.books WHERE TRUE"));
        if let Some(category) = q.category_id {
            qb.push(" AND category_id = ").push_bind(category);
        }
        if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{search}%");
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR author ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR isbn ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if q.available_only.unwrap_or(false) {
            qb.push(" AND available_copies > 0");
        }
        qb.push(" ORDER BY title");

        let books = qb.build_query_as::<Book>().fetch_all(pool).await?;
        Ok(books)
    }

    pub async fn get_book(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<Book> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, Book>(&format!("SELECT * FROM {schema}.books WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::NotFound("book"))
    }

    pub async fn create_book(
        pool: &PgPool,
        tenant: &str,
        req: &CreateBookRequest,
    ) -> ServiceResult<Book> {
        if req.title.trim().is_empty() {
            return Err(ServiceError::validation("title is required"));
        }
        if req.total_copies < 1 {
            return Err(ServiceError::validation("total_copies must be at least 1"));
        }
        let schema = schema_name(tenant);
        let book = sqlx::query_as::<_, Book>(&format!(
            "INSERT INTO {schema}.books
                (title, author, isbn, category_id, total_copies, available_copies, shelf_location)
             VALUES ($1, $2, $3, $4, $5, $5, $6)
             RETURNING *"
        ))
        .bind(req.title.trim())
        .bind(&req.author)
        .bind(&req.isbn)
        .bind(req.category_id)
        .bind(req.total_copies)
        .bind(&req.shelf_location)
        .fetch_one(pool)
        .await?;
        Ok(book)
    }

    pub async fn update_book(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdateBookRequest,
    ) -> ServiceResult<Book> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let current = sqlx::query_as::<_, Book>(&format!(
            "SELECT * FROM {schema}.books WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("book"))?;

        let (total, available) = match req.total_copies {
            Some(t) if t < 1 => {
                return Err(ServiceError::validation("total_copies must be at least 1"));
            }
            Some(t) => (
                t,
                adjusted_available(current.total_copies, current.available_copies, t)?,
            ),
            None => (current.total_copies, current.available_copies),
        };

        let book = sqlx::query_as::<_, Book>(&format!(
            "UPDATE {schema}.books
             SET title            = COALESCE($1, title),
                 author           = COALESCE($2, author),
                 isbn             = COALESCE($3, isbn),
                 category_id      = COALESCE($4, category_id),
                 shelf_location   = COALESCE($5, shelf_location),
                 total_copies     = $6,
                 available_copies = $7
             WHERE id = $8
             RETURNING *"
        ))
        .bind(&req.title)
        .bind(&req.author)
        .bind(&req.isbn)
        .bind(req.category_id)
        .bind(&req.shelf_location)
        .bind(total)
        .bind(available)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(book)
    }

    pub async fn delete_book(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let open: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {schema}.borrowings WHERE book_id = $1 AND status = 'issued')"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;
        if open {
            return Err(ServiceError::conflict("book has copies on loan"));
        }

        let result = sqlx::query(&format!("DELETE FROM {schema}.books WHERE id = $1"))
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("book"));
        }
        Ok(())
    }

    // ── Circulation ─────────────────────────────────────────────────────────

    pub async fn issue(
        pool: &PgPool,
        tenant: &str,
        issued_by: Uuid,
        policy: LoanPolicy,
        req: &IssueBookRequest,
    ) -> ServiceResult<Borrowing> {
        let issued_on = req.issued_on.unwrap_or_else(|| Utc::now().date_naive());
        let due_on = match req.due_on {
            Some(due_on) => due_on,
            None => loan_due_on(issued_on, policy.loan_days)?,
        };
        if due_on < issued_on {
            return Err(ServiceError::validation("due_on must not be before issued_on"));
        }

        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let active: bool = sqlx::query_scalar(&format!(
            "SELECT is_active FROM {schema}.students WHERE id = $1"
        ))
        .bind(req.student_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("student"))?;
        if !active {
            return Err(ServiceError::conflict("student is inactive"));
        }

        // Conditional decrement: no row updated means nothing left to lend.
        let decremented = sqlx::query(&format!(
            "UPDATE {schema}.books SET available_copies = available_copies - 1
             WHERE id = $1 AND available_copies > 0"
        ))
        .bind(req.book_id)
        .execute(&mut *tx)
        .await?;
        if decremented.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS(SELECT 1 FROM {schema}.books WHERE id = $1)"
            ))
            .bind(req.book_id)
            .fetch_one(&mut *tx)
            .await?;
            return Err(if exists {
                ServiceError::conflict("no copies available")
            } else {
                ServiceError::NotFound("book")
            });
        }

        let borrowing = sqlx::query_as::<_, Borrowing>(&format!(
            "INSERT INTO {schema}.borrowings (book_id, student_id, issued_on, due_on, issued_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *"
        ))
        .bind(req.book_id)
        .bind(req.student_id)
        .bind(issued_on)
        .bind(due_on)
        .bind(issued_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e.as_database_error().and_then(|d| d.code()) {
            Some(code) if code == "23505" => {
                ServiceError::conflict("student already has this book on loan")
            }
            _ => ServiceError::Database(e),
        })?;

        tx.commit().await?;
        BOOK_ISSUES_COUNTER.with_label_values(&[tenant]).inc();
        Ok(borrowing)
    }

    pub async fn return_book(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        policy: LoanPolicy,
        returned_on: Option<NaiveDate>,
    ) -> ServiceResult<Borrowing> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let loan = Self::lock_open_loan(&mut tx, &schema, id).await?;
        let returned_on = returned_on.unwrap_or_else(|| Utc::now().date_naive());
        if returned_on < loan.issued_on {
            return Err(ServiceError::validation("returned_on must not be before issued_on"));
        }
        let fine = overdue_fine(loan.due_on, returned_on, policy.fine_per_day_cents);

        let borrowing = sqlx::query_as::<_, Borrowing>(&format!(
            "UPDATE {schema}.borrowings
             SET status = 'returned', returned_on = $1, fine_cents = $2
             WHERE id = $3
             RETURNING *"
        ))
        .bind(returned_on)
        .bind(fine)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE {schema}.books SET available_copies = available_copies + 1 WHERE id = $1"
        ))
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(borrowing)
    }

    /// Mark an open loan lost. The copy leaves the collection.
    pub async fn mark_lost(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<Borrowing> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let loan = Self::lock_open_loan(&mut tx, &schema, id).await?;

        let borrowing = sqlx::query_as::<_, Borrowing>(&format!(
            "UPDATE {schema}.borrowings SET status = 'lost' WHERE id = $1 RETURNING *"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE {schema}.books SET total_copies = total_copies - 1 WHERE id = $1"
        ))
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(borrowing)
    }

    async fn lock_open_loan(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        schema: &str,
        id: Uuid,
    ) -> ServiceResult<Borrowing> {
        let loan = sqlx::query_as::<_, Borrowing>(&format!(
            "SELECT * FROM {schema}.borrowings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(ServiceError::NotFound("borrowing"))?;
        if loan.status != "issued" {
            return Err(ServiceError::conflict(format!("borrowing is already {}", loan.status)));
        }
        Ok(loan)
    }

    pub async fn list_borrowings(
        pool: &PgPool,
        tenant: &str,
        q: &BorrowingQuery,
    ) -> ServiceResult<Vec<Borrowing>> {
        let schema = schema_name(tenant);
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM {schema}.borrowings WHERE TRUE"));
        match q.status {
            Some(BorrowingStatus::Overdue) => {
                qb.push(" AND status = 'issued' AND due_on < CURRENT_DATE");
            }
            Some(BorrowingStatus::Issued) => {
                qb.push(" AND status = 'issued'");
            }
            Some(BorrowingStatus::Returned) => {
                qb.push(" AND status = 'returned'");
            }
            Some(BorrowingStatus::Lost) => {
                qb.push(" AND status = 'lost'");
            }
            None => {}
        }
        if let Some(student_id) = q.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }
        qb.push(" ORDER BY issued_on DESC, created_at DESC LIMIT 1000");

        let rows = qb.build_query_as::<Borrowing>().fetch_all(pool).await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn no_fine_on_or_before_due_date() {
        assert_eq!(overdue_fine(d(2026, 3, 10), d(2026, 3, 10), 10), 0);
        assert_eq!(overdue_fine(d(2026, 3, 10), d(2026, 3, 2), 10), 0);
    }

    #[test]
    fn fine_accrues_per_day_late() {
        assert_eq!(overdue_fine(d(2026, 3, 10), d(2026, 3, 13), 10), 30);
        assert_eq!(overdue_fine(d(2026, 2, 27), d(2026, 3, 2), 25), 75);
    }

    #[test]
    fn total_change_keeps_loans_covered() {
        // 5 total, 3 on shelf: 2 on loan
        assert_eq!(adjusted_available(5, 3, 8).unwrap(), 6);
        assert_eq!(adjusted_available(5, 3, 2).unwrap(), 0);
        assert!(adjusted_available(5, 3, 1).is_err());
    }

    #[test]
    fn loan_due_date_is_checked() {
        assert_eq!(loan_due_on(d(2026, 12, 25), 14).unwrap(), d(2027, 1, 8));
        assert!(matches!(
            loan_due_on(NaiveDate::MAX, 14),
            Err(ServiceError::Validation(_))
        ));
        assert!(loan_due_on(d(2026, 1, 1), i64::MAX).is_err());
    }
}
