use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::transport::{
        AssignStudentRequest, CreateRouteRequest, CreateVehicleRequest, RouteRider,
        TransportAssignment, TransportRoute, UpdateRouteRequest, UpdateVehicleRequest, Vehicle,
    },
};

pub struct TransportService;

impl TransportService {
    // ── Vehicles ────────────────────────────────────────────────────────────

    pub async fn list_vehicles(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<Vehicle>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, Vehicle>(&format!(
            "SELECT * FROM {schema}.vehicles ORDER BY registration_no"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create_vehicle(
        pool: &PgPool,
        tenant: &str,
        req: &CreateVehicleRequest,
    ) -> ServiceResult<Vehicle> {
        if req.registration_no.trim().is_empty() {
            return Err(ServiceError::validation("registration_no is required"));
        }
        check_capacity(req.capacity)?;
        let schema = schema_name(tenant);
        let vehicle = sqlx::query_as::<_, Vehicle>(&format!(
            "INSERT INTO {schema}.vehicles (registration_no, capacity, driver_name, driver_phone)
             VALUES (UPPER($1), $2, $3, $4)
             RETURNING *"
        ))
        .bind(req.registration_no.trim())
        .bind(req.capacity)
        .bind(&req.driver_name)
        .bind(&req.driver_phone)
        .fetch_one(pool)
        .await?;
        Ok(vehicle)
    }

    pub async fn update_vehicle(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdateVehicleRequest,
    ) -> ServiceResult<Vehicle> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        if let Some(capacity) = req.capacity {
            check_capacity(capacity)?;
            let riders = Self::vehicle_riders(&mut tx, &schema, id).await?;
            if i64::from(capacity) < riders {
                return Err(ServiceError::conflict(format!(
                    "{riders} students ride this vehicle; capacity cannot drop below that"
                )));
            }
        }

        let vehicle = sqlx::query_as::<_, Vehicle>(&format!(
            "UPDATE {schema}.vehicles
             SET registration_no = COALESCE(UPPER($1), registration_no),
                 capacity        = COALESCE($2, capacity),
                 driver_name     = COALESCE($3, driver_name),
                 driver_phone    = COALESCE($4, driver_phone),
                 is_active       = COALESCE($5, is_active)
             WHERE id = $6
             RETURNING *"
        ))
        .bind(&req.registration_no)
        .bind(req.capacity)
        .bind(&req.driver_name)
        .bind(&req.driver_phone)
        .bind(req.is_active)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("vehicle"))?;

        tx.commit().await?;
        Ok(vehicle)
    }

    pub async fn delete_vehicle(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!("DELETE FROM {schema}.vehicles WHERE id = $1"))
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("vehicle"));
        }
        Ok(())
    }

    // ── Routes ──────────────────────────────────────────────────────────────

    pub async fn list_routes(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<TransportRoute>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, TransportRoute>(&format!(
            "SELECT * FROM {schema}.transport_routes ORDER BY name"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create_route(
        pool: &PgPool,
        tenant: &str,
        req: &CreateRouteRequest,
    ) -> ServiceResult<TransportRoute> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        check_fee(req.monthly_fee_cents)?;
        let schema = schema_name(tenant);
        let route = sqlx::query_as::<_, TransportRoute>(&format!(
            "INSERT INTO {schema}.transport_routes (name, vehicle_id, stops, monthly_fee_cents)
             VALUES ($1, $2, $3, $4)
             RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(req.vehicle_id)
        .bind(clean_stops(&req.stops))
        .bind(req.monthly_fee_cents)
        .fetch_one(pool)
        .await?;
        Ok(route)
    }

    pub async fn update_route(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdateRouteRequest,
    ) -> ServiceResult<TransportRoute> {
        if let Some(fee) = req.monthly_fee_cents {
            check_fee(fee)?;
        }
        let schema = schema_name(tenant);
        sqlx::query_as::<_, TransportRoute>(&format!(
            "UPDATE {schema}.transport_routes
             SET name              = COALESCE($1, name),
                 vehicle_id        = COALESCE($2, vehicle_id),
                 stops             = COALESCE($3, stops),
                 monthly_fee_cents = COALESCE($4, monthly_fee_cents)
             WHERE id = $5
             RETURNING *"
        ))
        .bind(&req.name)
        .bind(req.vehicle_id)
        .bind(req.stops.as_deref().map(clean_stops))
        .bind(req.monthly_fee_cents)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("route"))
    }

    pub async fn delete_route(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!(
            "DELETE FROM {schema}.transport_routes WHERE id = $1"
        ))
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("route"));
        }
        Ok(())
    }

    // ── Assignments ─────────────────────────────────────────────────────────

    /// Put a student on a route, replacing any previous assignment.
    /// Rejected when the route's vehicle is already full.
    pub async fn assign(
        pool: &PgPool,
        tenant: &str,
        req: &AssignStudentRequest,
    ) -> ServiceResult<TransportAssignment> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let route = sqlx::query_as::<_, TransportRoute>(&format!(
            "SELECT * FROM {schema}.transport_routes WHERE id = $1"
        ))
        .bind(req.route_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("route"))?;

        if let Some(stop) = &req.stop_name {
            if !route.stops.is_empty() && !route.stops.iter().any(|s| s == stop) {
                return Err(ServiceError::validation(format!(
                    "'{stop}' is not a stop on route {}",
                    route.name
                )));
            }
        }

        if let Some(vehicle_id) = route.vehicle_id {
            // Lock the vehicle so concurrent assignments see a stable count.
            let capacity: i32 = sqlx::query_scalar(&format!(
                "SELECT capacity FROM {schema}.vehicles WHERE id = $1 FOR UPDATE"
            ))
            .bind(vehicle_id)
            .fetch_one(&mut *tx)
            .await?;

            let riders: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {schema}.transport_assignments ta
                 JOIN {schema}.transport_routes r ON r.id = ta.route_id
                 WHERE r.vehicle_id = $1 AND ta.student_id <> $2"
            ))
            .bind(vehicle_id)
            .bind(req.student_id)
            .fetch_one(&mut *tx)
            .await?;

            if riders >= i64::from(capacity) {
                return Err(ServiceError::conflict("vehicle is at capacity"));
            }
        }

        let assignment = sqlx::query_as::<_, TransportAssignment>(&format!(
            "INSERT INTO {schema}.transport_assignments (student_id, route_id, stop_name)
             VALUES ($1, $2, $3)
             ON CONFLICT (student_id) DO UPDATE SET
                 route_id    = EXCLUDED.route_id,
                 stop_name   = EXCLUDED.stop_name,
                 assigned_on = CURRENT_DATE
             RETURNING *"
        ))
        .bind(req.student_id)
        .bind(req.route_id)
        .bind(&req.stop_name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(assignment)
    }

    pub async fn unassign(pool: &PgPool, tenant: &str, student_id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!(
            "DELETE FROM {schema}.transport_assignments WHERE student_id = $1"
        ))
        .bind(student_id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("transport assignment"));
        }
        Ok(())
    }

    pub async fn riders(
        pool: &PgPool,
        tenant: &str,
        route_id: Uuid,
    ) -> ServiceResult<Vec<RouteRider>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, RouteRider>(&format!(
            "SELECT s.id AS student_id, s.first_name, s.last_name, s.class_name,
                    ta.stop_name, s.guardian_phone
             FROM {schema}.transport_assignments ta
             JOIN {schema}.students s ON s.id = ta.student_id
             WHERE ta.route_id = $1
             ORDER BY ta.stop_name NULLS LAST, s.last_name, s.first_name"
        ))
        .bind(route_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn vehicle_riders(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        schema: &str,
        vehicle_id: Uuid,
    ) -> ServiceResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {schema}.transport_assignments ta
             JOIN {schema}.transport_routes r ON r.id = ta.route_id
             WHERE r.vehicle_id = $1"
        ))
        .bind(vehicle_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }
}

fn check_capacity(capacity: i32) -> ServiceResult<()> {
    if capacity < 1 {
        return Err(ServiceError::validation("capacity must be at least 1"));
    }
    Ok(())
}

fn check_fee(cents: i64) -> ServiceResult<()> {
    if cents < 0 {
        return Err(ServiceError::validation("monthly_fee_cents must not be negative"));
    }
    Ok(())
}

/// Trimmed, non-empty stop names in their original order, first occurrence kept.
fn clean_stops(stops: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(stops.len());
    for stop in stops.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !out.iter().any(|s| s == stop) {
            out.push(stop.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_are_trimmed_and_deduplicated() {
        let stops = vec![
            " Main Gate ".to_string(),
            "".to_string(),
            "Library".to_string(),
            "Main Gate".to_string(),
        ];
        assert_eq!(clean_stops(&stops), vec!["Main Gate", "Library"]);
    }

    #[test]
    fn capacity_must_be_positive() {
        assert!(check_capacity(0).is_err());
        assert!(check_capacity(40).is_ok());
    }
}
