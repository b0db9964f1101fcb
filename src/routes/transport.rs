use axum::{
    extract::{Path, State},
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
        transport::{
            AssignStudentRequest, CreateRouteRequest, CreateVehicleRequest, RouteRider,
            TransportAssignment, TransportRoute, UpdateRouteRequest, UpdateVehicleRequest,
            Vehicle,
        },
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        transport::TransportService,
    },
    AppState,
};

// ─── Vehicles ─────────────────────────────────────────────────────────────────

pub async fn list_vehicles(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Vehicle>>, ApiError> {
    Ok(Json(TransportService::list_vehicles(&state.db, &tenant).await?))
}

pub async fn create_vehicle(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateVehicleRequest>,
) -> Result<(StatusCode, Json<Vehicle>), ApiError> {
    require_admin(&user)?;
    let vehicle = TransportService::create_vehicle(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "vehicle.create", "vehicle")
            .resource(vehicle.id)
            .label(&vehicle.registration_no),
    );
    Ok((StatusCode::CREATED, Json(vehicle)))
}

pub async fn update_vehicle(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateVehicleRequest>,
) -> Result<Json<Vehicle>, ApiError> {
    require_admin(&user)?;
    let vehicle = TransportService::update_vehicle(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "vehicle.update", "vehicle")
            .resource(id)
            .label(&vehicle.registration_no),
    );
    Ok(Json(vehicle))
}

pub async fn delete_vehicle(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    TransportService::delete_vehicle(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "vehicle.delete", "vehicle").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

// ─── Routes ───────────────────────────────────────────────────────────────────

pub async fn list_routes(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<TransportRoute>>, ApiError> {
    Ok(Json(TransportService::list_routes(&state.db, &tenant).await?))
}

pub async fn create_route(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateRouteRequest>,
) -> Result<(StatusCode, Json<TransportRoute>), ApiError> {
    require_admin(&user)?;
    let route = TransportService::create_route(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "route.create", "transport_route")
            .resource(route.id)
            .label(&route.name),
    );
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn update_route(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRouteRequest>,
) -> Result<Json<TransportRoute>, ApiError> {
    require_admin(&user)?;
    let route = TransportService::update_route(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "route.update", "transport_route")
            .resource(id)
            .label(&route.name),
    );
    Ok(Json(route))
}

pub async fn delete_route(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    TransportService::delete_route(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "route.delete", "transport_route").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

pub async fn route_riders(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RouteRider>>, ApiError> {
    Ok(Json(TransportService::riders(&state.db, &tenant, id).await?))
}

// ─── Assignments ──────────────────────────────────────────────────────────────

pub async fn assign_student(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<AssignStudentRequest>,
) -> Result<Json<TransportAssignment>, ApiError> {
    require_admin(&user)?;
    let assignment = TransportService::assign(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "transport.assign", "student")
            .resource(body.student_id)
            .label(format!("route {}", body.route_id)),
    );
    Ok(Json(assignment))
}

pub async fn unassign_student(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(student_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    TransportService::unassign(&state.db, &tenant, student_id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "transport.unassign", "student").resource(student_id),
    );
    Ok(Json(json!({ "ok": true })))
}
