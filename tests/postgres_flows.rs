//! Service flows against a real Postgres. Set `TEST_DATABASE_URL` to run them;
//! without it every test returns early.

use std::{sync::Arc, time::Duration};

use axum::{http::StatusCode, routing::post, Json, Router};
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use tutorcenter_api::{
    config::Config,
    db,
    error::ServiceError,
    models::{
        attendance::{AttendanceStatus, RecordInput, SaveSessionRequest},
        grading::{CreateAssessmentRequest, GradeInput},
        report::CreatePeriodRequest,
        student::{CreateStudentRequest, ImportSummary, StudentImportRow},
    },
    services::{
        attendance::AttendanceService, grading::GradingService, reports::ReportService,
        sms::{SmsCredentials, SmsGateway, SmsService},
        students::StudentService,
    },
};

/// A freshly provisioned tenant schema, dropped again by `finish`.
struct Tenant {
    pool: PgPool,
    slug: String,
}

impl Tenant {
    async fn provision() -> Option<Self> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let slug = format!("it-{}", &Uuid::new_v4().simple().to_string()[..12]);
        db::tenant::provision_tenant_schema(&pool, &slug).await.unwrap();
        Some(Self { pool, slug })
    }

    fn schema(&self) -> String {
        db::tenant::schema_name(&self.slug)
    }

    async fn finish(self) {
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", self.schema()))
            .execute(&self.pool)
            .await
            .unwrap();
    }

    async fn student(&self, admission_no: &str, class_name: &str) -> Uuid {
        let req = CreateStudentRequest {
            admission_no: admission_no.into(),
            first_name: "Ada".into(),
            last_name: "Okafor".into(),
            grade_level: None,
            class_name: Some(class_name.into()),
            guardian_name: None,
            guardian_phone: Some("0712345678".into()),
            guardian_email: None,
            address: None,
            enrollment_date: None,
            notes: None,
        };
        StudentService::create(&self.pool, &self.slug, &req).await.unwrap().id
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[tokio::test]
async fn interrupted_campaign_can_be_sent_again() {
    let Some(t) = Tenant::provision().await else { return };
    let schema = t.schema();

    let campaign_id: Uuid = sqlx::query_scalar(&format!(
        "INSERT INTO {schema}.sms_campaigns (name, message, status, total_recipients, created_by, started_at)
         VALUES ('Fees', 'Fees due', 'sending', 1, $1, NOW()) RETURNING id"
    ))
    .bind(Uuid::new_v4())
    .fetch_one(&t.pool)
    .await
    .unwrap();
    sqlx::query(&format!(
        "INSERT INTO {schema}.sms_recipients (campaign_id, phone, message)
         VALUES ($1, '+254712345678', 'Fees due')"
    ))
    .bind(campaign_id)
    .execute(&t.pool)
    .await
    .unwrap();

    let stuck = SmsService::begin_send(&t.pool, &t.slug, campaign_id).await;
    assert!(matches!(stuck, Err(ServiceError::Conflict(_))));

    assert_eq!(SmsService::release_interrupted(&t.pool, &t.slug).await.unwrap(), 1);
    let resumed = SmsService::begin_send(&t.pool, &t.slug, campaign_id).await.unwrap();
    assert_eq!(resumed.status, "sending");

    t.finish().await;
}

#[tokio::test]
async fn report_totals_are_plain_sums_of_scores() {
    let Some(t) = Tenant::provision().await else { return };
    let student = t.student("A-1", "Form 1").await;

    let mut assessments = Vec::new();
    for (title, max_score, weight) in [("Quiz", 50.0, 3.0), ("Exam", 100.0, 1.0)] {
        let req = CreateAssessmentRequest {
            title: title.into(),
            subject_id: None,
            class_name: "Form 1".into(),
            assessment_date: d(2026, 3, 10),
            max_score,
            weight: Some(weight),
        };
        assessments.push(GradingService::create(&t.pool, &t.slug, &req).await.unwrap().id);
    }
    for (id, score) in assessments.iter().zip([40.0, 50.0]) {
        let grades = [GradeInput { student_id: student, score, remarks: None }];
        GradingService::save_grades(&t.pool, &t.slug, *id, &grades).await.unwrap();
    }

    let period = ReportService::create_period(
        &t.pool,
        &t.slug,
        &CreatePeriodRequest { name: "Term 1".into(), start_date: d(2026, 1, 1), end_date: d(2026, 4, 30) },
    )
    .await
    .unwrap();
    ReportService::generate(&t.pool, &t.slug, period.id, "Form 1").await.unwrap();

    let cards = ReportService::list_cards(&t.pool, &t.slug, period.id, None).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].total_score, 90.0);
    assert_eq!(cards[0].max_total, 150.0);
    assert_eq!(cards[0].percentage, 60.0);
    assert_eq!(cards[0].grade_letter, "B");

    t.finish().await;
}

#[tokio::test]
async fn rejected_import_row_does_not_abort_the_rest() {
    let Some(t) = Tenant::provision().await else { return };
    let row = |admission_no: &str, phone: &str| StudentImportRow {
        admission_no: admission_no.into(),
        first_name: "Obi".into(),
        last_name: "Eze".into(),
        grade_level: None,
        class_name: None,
        guardian_name: None,
        guardian_phone: Some(phone.into()),
        guardian_email: None,
    };
    let rows = vec![
        (2, row("A-1", "0712345678")),
        (3, row("A-2", &"9".repeat(40))),
        (4, row("A-3", "0798765432")),
    ];

    let summary = StudentService::import(&t.pool, &t.slug, rows, ImportSummary::default())
        .await
        .unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].row, 3);

    t.finish().await;
}

#[tokio::test]
async fn attendance_for_unknown_student_is_a_client_error() {
    let Some(t) = Tenant::provision().await else { return };
    let req = SaveSessionRequest {
        session_date: d(2026, 3, 2),
        class_name: "Form 1".into(),
        subject_id: None,
        notes: None,
        records: vec![RecordInput {
            student_id: Uuid::new_v4(),
            status: AttendanceStatus::Present,
            remarks: None,
        }],
    };

    let err = AttendanceService::save_session(&t.pool, &t.slug, Uuid::new_v4(), &req)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

    t.finish().await;
}

/// Gateway that accepts every number except `+254700000002`.
async fn gateway_url() -> String {
    let app = Router::new().route(
        "/send",
        post(|Json(body): Json<Value>| async move {
            if body["to"] == "+254700000002" {
                (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": "blocked" })))
            } else {
                (StatusCode::OK, Json(json!({ "success": true, "messageId": "m-1" })))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/send")
}

fn sms_config(gateway_url: String) -> Config {
    Config {
        database_url: String::new(),
        redis_url: String::new(),
        jwt_secret: "secret".into(),
        media_dir: std::env::temp_dir().display().to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        super_admin_key: "super-key".into(),
        app_base_url: "http://localhost".into(),
        encryption_master_key: None,
        sms_gateway_url: Some(gateway_url),
        sms_gateway_api_key: Some("platform-key".into()),
        sms_sender_id: "TUTOR".into(),
        sms_concurrency: 2,
        sms_max_retries: 1,
        sms_rate_limit_per_hour: 5,
        billing_api_url: None,
        billing_api_key: None,
        billing_webhook_secret: None,
        past_due_grace_days: 7,
        library_fine_per_day_cents: 10,
        library_loan_days: 14,
        smtp_host: None,
        smtp_port: None,
        smtp_username: None,
        smtp_password: None,
        smtp_from: None,
    }
}

#[tokio::test]
async fn dispatch_records_each_outcome_and_finishes_the_campaign() {
    let Some(t) = Tenant::provision().await else { return };
    let schema = t.schema();

    let campaign_id: Uuid = sqlx::query_scalar(&format!(
        "INSERT INTO {schema}.sms_campaigns (name, message, total_recipients, created_by)
         VALUES ('Fees', 'Fees due', 2, $1) RETURNING id"
    ))
    .bind(Uuid::new_v4())
    .fetch_one(&t.pool)
    .await
    .unwrap();
    for phone in ["+254700000001", "+254700000002"] {
        sqlx::query(&format!(
            "INSERT INTO {schema}.sms_recipients (campaign_id, phone, message)
             VALUES ($1, $2, 'Fees due')"
        ))
        .bind(campaign_id)
        .bind(phone)
        .execute(&t.pool)
        .await
        .unwrap();
    }

    let gateway = Arc::new(SmsGateway::new(&sms_config(gateway_url().await)));
    let creds = SmsCredentials { api_key: "platform-key".into(), sender_id: "TUTOR".into() };
    SmsService::begin_send(&t.pool, &t.slug, campaign_id).await.unwrap();
    SmsService::dispatch(t.pool.clone(), gateway, t.slug.clone(), campaign_id, creds);

    let mut campaign = SmsService::get_campaign(&t.pool, &t.slug, campaign_id).await.unwrap();
    for _ in 0..100 {
        if campaign.status != "sending" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        campaign = SmsService::get_campaign(&t.pool, &t.slug, campaign_id).await.unwrap();
    }
    assert_eq!(campaign.status, "completed");
    assert_eq!(campaign.sent_count, 1);
    assert_eq!(campaign.failed_count, 1);

    let recipients = SmsService::list_recipients(&t.pool, &t.slug, campaign_id, None).await.unwrap();
    let blocked = recipients.iter().find(|r| r.phone == "+254700000002").unwrap();
    assert_eq!(blocked.status, "failed");
    assert_eq!(blocked.attempts, 1);
    assert_eq!(blocked.error.as_deref(), Some("blocked"));

    t.finish().await;
}
