use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::tenant::TenantSlug,
    models::{
        auth::AuthenticatedUser,
        library::{
            Book, BookCategory, BookQuery, Borrowing, BorrowingQuery, CategoryRequest,
            CreateBookRequest, IssueBookRequest, ReturnBookRequest, UpdateBookRequest,
        },
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        library::{LibraryService, LoanPolicy},
    },
    AppState,
};

// ─── Categories ───────────────────────────────────────────────────────────────

pub async fn list_categories(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<BookCategory>>, ApiError> {
    Ok(Json(LibraryService::list_categories(&state.db, &tenant).await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<BookCategory>), ApiError> {
    require_admin(&user)?;
    let category = LibraryService::create_category(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book_category.create", "book_category")
            .resource(category.id)
            .label(&category.name),
    );
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CategoryRequest>,
) -> Result<Json<BookCategory>, ApiError> {
    require_admin(&user)?;
    let category = LibraryService::update_category(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book_category.update", "book_category")
            .resource(id)
            .label(&category.name),
    );
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    LibraryService::delete_category(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book_category.delete", "book_category").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

// ─── Books ────────────────────────────────────────────────────────────────────

pub async fn list_books(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<BookQuery>,
) -> Result<Json<Vec<Book>>, ApiError> {
    Ok(Json(LibraryService::list_books(&state.db, &tenant, &q).await?))
}

pub async fn get_book(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Book>, ApiError> {
    Ok(Json(LibraryService::get_book(&state.db, &tenant, id).await?))
}

pub async fn create_book(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<Book>), ApiError> {
    require_admin(&user)?;
    let book = LibraryService::create_book(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book.create", "book")
            .resource(book.id)
            .label(&book.title),
    );
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn update_book(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateBookRequest>,
) -> Result<Json<Book>, ApiError> {
    require_admin(&user)?;
    let book = LibraryService::update_book(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book.update", "book")
            .resource(id)
            .label(&book.title),
    );
    Ok(Json(book))
}

pub async fn delete_book(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    LibraryService::delete_book(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book.delete", "book").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

// ─── Borrowings ───────────────────────────────────────────────────────────────

pub async fn list_borrowings(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<BorrowingQuery>,
) -> Result<Json<Vec<Borrowing>>, ApiError> {
    Ok(Json(LibraryService::list_borrowings(&state.db, &tenant, &q).await?))
}

pub async fn issue_book(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<IssueBookRequest>,
) -> Result<(StatusCode, Json<Borrowing>), ApiError> {
    require_admin(&user)?;
    let policy = LoanPolicy::from(state.config.as_ref());
    let borrowing = LibraryService::issue(&state.db, &tenant, user.user_id, policy, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book.issue", "borrowing")
            .resource(borrowing.id)
            .label(format!("book {} to student {}", body.book_id, body.student_id)),
    );
    Ok((StatusCode::CREATED, Json(borrowing)))
}

pub async fn return_book(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<ReturnBookRequest>>,
) -> Result<Json<Borrowing>, ApiError> {
    require_admin(&user)?;
    let returned_on = body.and_then(|Json(b)| b.returned_on);
    let policy = LoanPolicy::from(state.config.as_ref());
    let borrowing = LibraryService::return_book(&state.db, &tenant, id, policy, returned_on).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book.return", "borrowing")
            .resource(id)
            .label(format!("fine {}", borrowing.fine_cents)),
    );
    Ok(Json(borrowing))
}

pub async fn mark_lost(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Borrowing>, ApiError> {
    require_admin(&user)?;
    let borrowing = LibraryService::mark_lost(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "book.lost", "borrowing").resource(id),
    );
    Ok(Json(borrowing))
}
