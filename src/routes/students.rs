use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{bad_request, ApiError},
    middleware::tenant::TenantSlug,
    models::{
        attendance::{DateRangeQuery, StudentAttendanceSummary},
        auth::AuthenticatedUser,
        student::{
            CreateStudentRequest, ImportSummary, SetSubjectsRequest, Student, StudentBalance,
            StudentQuery, UpdateStudentRequest,
        },
        subject::Subject,
    },
    routes::require_admin,
    services::{
        attendance::AttendanceService,
        audit::{self, AuditEntry},
        import::{self, SheetFormat},
        students::StudentService,
    },
    AppState,
};

pub async fn list_students(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<StudentQuery>,
) -> Result<Json<Vec<Student>>, ApiError> {
    Ok(Json(StudentService::list(&state.db, &tenant, &q).await?))
}

pub async fn get_student(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Student>, ApiError> {
    Ok(Json(StudentService::get(&state.db, &tenant, id).await?))
}

pub async fn create_student(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    require_admin(&user)?;
    let student = StudentService::create(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "student.create", "student")
            .resource(student.id)
            .label(student.full_name()),
    );
    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn update_student(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStudentRequest>,
) -> Result<Json<Student>, ApiError> {
    require_admin(&user)?;
    let student = StudentService::update(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "student.update", "student")
            .resource(id)
            .label(student.full_name()),
    );
    Ok(Json(student))
}

/// Students with payment history are deactivated instead of removed.
pub async fn delete_student(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    let removed = StudentService::delete(&state.db, &tenant, id).await?;
    let action = if removed { "student.delete" } else { "student.deactivate" };
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, action, "student").resource(id),
    );
    Ok(Json(json!({ "deleted": removed, "deactivated": !removed })))
}

pub async fn list_student_subjects(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Subject>>, ApiError> {
    Ok(Json(StudentService::list_subjects(&state.db, &tenant, id).await?))
}

pub async fn set_student_subjects(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SetSubjectsRequest>,
) -> Result<Json<Vec<Subject>>, ApiError> {
    require_admin(&user)?;
    let subjects = StudentService::set_subjects(&state.db, &tenant, id, &body.subject_ids).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "student.subjects", "student")
            .resource(id)
            .label(format!("{} subjects", subjects.len())),
    );
    Ok(Json(subjects))
}

pub async fn student_balance(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StudentBalance>, ApiError> {
    Ok(Json(StudentService::balance(&state.db, &tenant, id).await?))
}

pub async fn student_attendance(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<StudentAttendanceSummary>, ApiError> {
    let summary =
        AttendanceService::student_summary(&state.db, &tenant, id, range.from, range.to).await?;
    Ok(Json(summary))
}

/// POST /students/import, multipart field `file` holding a CSV or XLSX sheet.
pub async fn import_students(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<ImportSummary>, ApiError> {
    require_admin(&user)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let ct = field.content_type().unwrap_or("").to_string();
        let fname = field.file_name().unwrap_or("").to_string();
        let format = SheetFormat::detect(&ct, &fname)
            .ok_or_else(|| bad_request("Unsupported file type. Upload a .csv or .xlsx file."))?;
        let data = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;

        let parsed = import::parse(format, &data)?;
        let summary = ImportSummary { errors: parsed.errors, ..Default::default() };
        let summary = StudentService::import(&state.db, &tenant, parsed.rows, summary).await?;

        tracing::info!(
            "Import for '{tenant}': {} imported, {} updated, {} errors",
            summary.imported,
            summary.updated,
            summary.errors.len()
        );
        audit::log(
            state.db.clone(),
            &tenant,
            AuditEntry::new(user.user_id, "student.import", "student").label(format!(
                "{} imported, {} updated",
                summary.imported, summary.updated
            )),
        );
        return Ok(Json(summary));
    }

    Err(bad_request("No file provided"))
}
