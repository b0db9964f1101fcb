pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use middleware::auth::JwtSecret;
use services::{billing::BillingService, email::EmailService, sms::SmsGateway};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::Client,
    pub config: Arc<Config>,
    pub sms: Arc<SmsGateway>,
    pub billing: Arc<BillingService>,
    pub email: Option<Arc<EmailService>>,
}

impl AppState {
    pub fn new(db: PgPool, redis: redis::Client, config: Arc<Config>) -> Self {
        Self {
            sms: Arc::new(SmsGateway::new(&config)),
            billing: Arc::new(BillingService::new(&config)),
            email: EmailService::new(&config).map(Arc::new),
            db,
            redis,
            config,
        }
    }
}

/// Origins allowed by CORS: the app base URL, any of its subdomains (one per
/// center) and localhost for development.
fn cors_origin(base: String) -> AllowOrigin {
    AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
            return true;
        }
        if o == base {
            return true;
        }
        if let Some(idx) = base.find("://") {
            let after_scheme = &base[idx + 3..];
            let domain = after_scheme.split('/').next().unwrap_or(after_scheme);
            let domain = domain.split(':').next().unwrap_or(domain);
            return o.ends_with(&format!(".{domain}"));
        }
        false
    })
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-tenant"),
            header::HeaderName::from_static("x-super-admin-key"),
        ]))
        .allow_origin(cors_origin(state.config.app_base_url.clone()));

    let jwt_secret = JwtSecret(state.config.jwt_secret.clone());

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        .route("/me", get(routes::me::me))
        .route("/audit-log", get(routes::audit_log::list_audit_log))
        // Center profile & settings
        .route("/center", get(routes::centers::current_center))
        .route("/settings", get(routes::settings::get_settings).put(routes::settings::update_settings))
        .route("/settings/sms-credentials", put(routes::settings::set_sms_credentials))
        .route("/settings/logo", post(routes::settings::upload_logo).delete(routes::settings::delete_logo))
        .route("/logos/{slug}", get(routes::settings::serve_logo))
        // Students
        .route("/students", get(routes::students::list_students).post(routes::students::create_student))
        .route("/students/import", post(routes::students::import_students))
        .route(
            "/students/{id}",
            get(routes::students::get_student)
                .put(routes::students::update_student)
                .delete(routes::students::delete_student),
        )
        .route(
            "/students/{id}/subjects",
            get(routes::students::list_student_subjects).put(routes::students::set_student_subjects),
        )
        .route("/students/{id}/balance", get(routes::students::student_balance))
        .route("/students/{id}/attendance", get(routes::students::student_attendance))
        // Subjects
        .route("/subjects", get(routes::subjects::list_subjects).post(routes::subjects::create_subject))
        .route("/subjects/{id}", put(routes::subjects::update_subject).delete(routes::subjects::delete_subject))
        // Attendance
        .route("/attendance/sessions", get(routes::attendance::list_sessions).put(routes::attendance::save_session))
        .route(
            "/attendance/sessions/{id}",
            get(routes::attendance::get_session).delete(routes::attendance::delete_session),
        )
        // Grading
        .route("/assessments", get(routes::grading::list_assessments).post(routes::grading::create_assessment))
        .route(
            "/assessments/{id}",
            get(routes::grading::get_assessment)
                .put(routes::grading::update_assessment)
                .delete(routes::grading::delete_assessment),
        )
        .route("/assessments/{id}/grades", get(routes::grading::list_grades).put(routes::grading::save_grades))
        // Report cards
        .route("/report-periods", get(routes::reports::list_periods).post(routes::reports::create_period))
        .route(
            "/report-periods/{id}",
            get(routes::reports::get_period)
                .put(routes::reports::update_period)
                .delete(routes::reports::delete_period),
        )
        .route("/report-periods/{id}/generate", post(routes::reports::generate_cards))
        .route("/report-periods/{id}/cards", get(routes::reports::list_cards))
        .route("/report-cards/{id}", get(routes::reports::get_card))
        .route("/report-cards/{id}/remarks", put(routes::reports::update_remarks))
        // Library
        .route("/library/categories", get(routes::library::list_categories).post(routes::library::create_category))
        .route(
            "/library/categories/{id}",
            put(routes::library::update_category).delete(routes::library::delete_category),
        )
        .route("/library/books", get(routes::library::list_books).post(routes::library::create_book))
        .route(
            "/library/books/{id}",
            get(routes::library::get_book)
                .put(routes::library::update_book)
                .delete(routes::library::delete_book),
        )
        .route("/library/borrowings", get(routes::library::list_borrowings).post(routes::library::issue_book))
        .route("/library/borrowings/{id}/return", post(routes::library::return_book))
        .route("/library/borrowings/{id}/lost", post(routes::library::mark_lost))
        // Transport
        .route("/transport/vehicles", get(routes::transport::list_vehicles).post(routes::transport::create_vehicle))
        .route(
            "/transport/vehicles/{id}",
            put(routes::transport::update_vehicle).delete(routes::transport::delete_vehicle),
        )
        .route("/transport/routes", get(routes::transport::list_routes).post(routes::transport::create_route))
        .route(
            "/transport/routes/{id}",
            put(routes::transport::update_route).delete(routes::transport::delete_route),
        )
        .route("/transport/routes/{id}/riders", get(routes::transport::route_riders))
        .route("/transport/assignments", put(routes::transport::assign_student))
        .route("/transport/assignments/{student_id}", delete(routes::transport::unassign_student))
        // Fees & payments
        .route("/fees", get(routes::fees::list_fees))
        .route("/fees/generate", post(routes::fees::generate_fees))
        .route("/fees/{id}/waive", post(routes::fees::waive_fee))
        .route("/payments", get(routes::fees::list_payments).post(routes::fees::record_payment))
        .route("/payments/export.csv", get(routes::fees::export_payments))
        .route("/payments/{id}", get(routes::fees::get_payment))
        .route(
            "/payments/{id}/refunds",
            get(routes::fees::list_refunds).post(routes::fees::refund_payment),
        )
        // SMS
        .route("/sms/templates", get(routes::sms::list_templates).post(routes::sms::create_template))
        .route(
            "/sms/templates/{id}",
            put(routes::sms::update_template).delete(routes::sms::delete_template),
        )
        .route("/sms/campaigns", get(routes::sms::list_campaigns).post(routes::sms::create_campaign))
        .route(
            "/sms/campaigns/{id}",
            get(routes::sms::get_campaign).delete(routes::sms::delete_campaign),
        )
        .route("/sms/campaigns/{id}/recipients", get(routes::sms::list_recipients))
        .route("/sms/campaigns/{id}/send", post(routes::sms::send_campaign))
        .route("/sms/campaigns/{id}/retry-failed", post(routes::sms::retry_failed))
        .route("/sms/test", post(routes::sms::send_test))
        // Billing
        .route("/billing/checkout", post(routes::billing::checkout))
        .route("/billing/portal", post(routes::billing::portal))
        .route("/billing/webhook", post(routes::billing::webhook))
        // Super-admin
        .route("/super-admin/centers", get(routes::centers::list_centers).post(routes::centers::create_center))
        .route(
            "/super-admin/centers/{slug}",
            put(routes::centers::update_center).delete(routes::centers::delete_center),
        )
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Covers logo and spreadsheet uploads
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .with_state(state)
}
