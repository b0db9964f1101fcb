use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vehicle {
    pub id: Uuid,
    pub registration_no: String,
    pub capacity: i32,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVehicleRequest {
    pub registration_no: String,
    pub capacity: i32,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVehicleRequest {
    pub registration_no: Option<String>,
    pub capacity: Option<i32>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransportRoute {
    pub id: Uuid,
    pub name: String,
    pub vehicle_id: Option<Uuid>,
    pub stops: Vec<String>,
    pub monthly_fee_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRouteRequest {
    pub name: String,
    pub vehicle_id: Option<Uuid>,
    #[serde(default)]
    pub stops: Vec<String>,
    pub monthly_fee_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRouteRequest {
    pub name: Option<String>,
    pub vehicle_id: Option<Uuid>,
    pub stops: Option<Vec<String>>,
    pub monthly_fee_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransportAssignment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub route_id: Uuid,
    pub stop_name: Option<String>,
    pub assigned_on: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AssignStudentRequest {
    pub student_id: Uuid,
    pub route_id: Uuid,
    pub stop_name: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct RouteRider {
    pub student_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub class_name: Option<String>,
    pub stop_name: Option<String>,
    pub guardian_phone: Option<String>,
}
