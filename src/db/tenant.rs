use sqlx::PgPool;

/// Provision a per-center PostgreSQL schema with all required tables.
/// Called when a new center is created and on every startup.
pub async fn provision_tenant_schema(pool: &PgPool, slug: &str) -> anyhow::Result<()> {
    let schema = schema_name(slug);

    sqlx::raw_sql(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
        .execute(pool)
        .await?;

    for ddl in table_ddl(&schema) {
        sqlx::raw_sql(&ddl).execute(pool).await?;
    }

    // --- Indexes ---
    sqlx::raw_sql(&format!(
        r#"CREATE INDEX IF NOT EXISTS students_class_idx      ON "{schema}".students(class_name);
           CREATE INDEX IF NOT EXISTS students_grade_idx      ON "{schema}".students(grade_level);
           CREATE INDEX IF NOT EXISTS sessions_date_idx       ON "{schema}".attendance_sessions(session_date);
           CREATE INDEX IF NOT EXISTS records_student_idx     ON "{schema}".attendance_records(student_id);
           CREATE INDEX IF NOT EXISTS assessments_class_idx   ON "{schema}".assessments(class_name, assessment_date);
           CREATE INDEX IF NOT EXISTS grades_student_idx      ON "{schema}".grades(student_id);
           CREATE INDEX IF NOT EXISTS borrowings_student_idx  ON "{schema}".borrowings(student_id);
           CREATE INDEX IF NOT EXISTS borrowings_status_idx   ON "{schema}".borrowings(status, due_on);
           CREATE INDEX IF NOT EXISTS fees_status_idx         ON "{schema}".fees(status, due_date);
           CREATE INDEX IF NOT EXISTS payments_student_idx    ON "{schema}".payments(student_id, paid_on);
           CREATE INDEX IF NOT EXISTS sms_recipients_status_idx ON "{schema}".sms_recipients(campaign_id, status);
           CREATE INDEX IF NOT EXISTS audit_log_created_idx   ON "{schema}".audit_log(created_at DESC)"#
    ))
    .execute(pool)
    .await?;

    // A student cannot hold two open loans of the same book.
    sqlx::raw_sql(&format!(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS borrowings_open_loan_idx
           ON "{schema}".borrowings(book_id, student_id) WHERE status = 'issued'"#
    ))
    .execute(pool)
    .await?;

    // --- updated_at trigger function ---
    sqlx::raw_sql(&format!(
        r#"CREATE OR REPLACE FUNCTION "{schema}".update_updated_at()
           RETURNS TRIGGER AS $fn$
           BEGIN NEW.updated_at = NOW(); RETURN NEW; END;
           $fn$ LANGUAGE plpgsql"#
    ))
    .execute(pool)
    .await?;

    for table in TABLES_WITH_UPDATED_AT {
        let trigger = format!("{table}_updated_at");
        sqlx::raw_sql(&format!(
            r#"DROP TRIGGER IF EXISTS "{trigger}" ON "{schema}"."{table}";
               CREATE TRIGGER "{trigger}"
               BEFORE UPDATE ON "{schema}"."{table}"
               FOR EACH ROW EXECUTE FUNCTION "{schema}".update_updated_at()"#
        ))
        .execute(pool)
        .await?;
    }

    tracing::info!("Provisioned tenant schema: {schema}");
    Ok(())
}

const TABLES_WITH_UPDATED_AT: &[&str] = &[
    "students",
    "subjects",
    "attendance_sessions",
    "assessments",
    "report_periods",
    "books",
    "vehicles",
    "transport_routes",
    "sms_templates",
    "fees",
];

fn table_ddl(schema: &str) -> Vec<String> {
    vec![
        // --- Students ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".students (
                id              UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                admission_no    VARCHAR(64) UNIQUE NOT NULL,
                first_name      VARCHAR(128) NOT NULL,
                last_name       VARCHAR(128) NOT NULL,
                grade_level     VARCHAR(64),
                class_name      VARCHAR(64),
                guardian_name   VARCHAR(255),
                guardian_phone  VARCHAR(32),
                guardian_email  VARCHAR(255),
                address         TEXT,
                enrollment_date DATE NOT NULL DEFAULT CURRENT_DATE,
                notes           TEXT,
                is_active       BOOLEAN NOT NULL DEFAULT TRUE,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        // --- Subjects and enrolment ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".subjects (
                id                UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                name              VARCHAR(128) NOT NULL,
                code              VARCHAR(32) UNIQUE NOT NULL,
                monthly_fee_cents BIGINT NOT NULL DEFAULT 0 CHECK (monthly_fee_cents >= 0),
                description       TEXT,
                created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".student_subjects (
                student_id UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                subject_id UUID NOT NULL REFERENCES "{schema}".subjects(id) ON DELETE CASCADE,
                enrolled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (student_id, subject_id)
            )"#
        ),
        // --- Attendance ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".attendance_sessions (
                id            UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                session_date  DATE NOT NULL,
                class_name    VARCHAR(64) NOT NULL,
                subject_id    UUID REFERENCES "{schema}".subjects(id) ON DELETE SET NULL,
                taken_by      UUID NOT NULL,
                notes         TEXT,
                present_count INT NOT NULL DEFAULT 0,
                absent_count  INT NOT NULL DEFAULT 0,
                late_count    INT NOT NULL DEFAULT 0,
                excused_count INT NOT NULL DEFAULT 0,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        // NULL subject ids compare unequal, so uniqueness is enforced on a coalesced key.
        format!(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS attendance_sessions_key_idx
               ON "{schema}".attendance_sessions(
                   session_date, class_name,
                   COALESCE(subject_id, '00000000-0000-0000-0000-000000000000'::uuid))"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".attendance_records (
                id         UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                session_id UUID NOT NULL REFERENCES "{schema}".attendance_sessions(id) ON DELETE CASCADE,
                student_id UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                status     VARCHAR(16) NOT NULL CHECK (status IN ('present','absent','late','excused')),
                remarks    TEXT,
                UNIQUE (session_id, student_id)
            )"#
        ),
        // --- Assessments and grades ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".assessments (
                id              UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                title           VARCHAR(255) NOT NULL,
                subject_id      UUID REFERENCES "{schema}".subjects(id) ON DELETE SET NULL,
                class_name      VARCHAR(64) NOT NULL,
                assessment_date DATE NOT NULL,
                max_score       DOUBLE PRECISION NOT NULL CHECK (max_score > 0),
                weight          DOUBLE PRECISION NOT NULL DEFAULT 1 CHECK (weight > 0),
                graded_count    INT NOT NULL DEFAULT 0,
                average_score   DOUBLE PRECISION,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".grades (
                id            UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                assessment_id UUID NOT NULL REFERENCES "{schema}".assessments(id) ON DELETE CASCADE,
                student_id    UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                score         DOUBLE PRECISION NOT NULL CHECK (score >= 0),
                remarks       TEXT,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (assessment_id, student_id)
            )"#
        ),
        // --- Report periods and cards ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".report_periods (
                id           UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                name         VARCHAR(128) NOT NULL,
                start_date   DATE NOT NULL,
                end_date     DATE NOT NULL,
                is_published BOOLEAN NOT NULL DEFAULT FALSE,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK (start_date <= end_date)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".report_cards (
                id                 UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                period_id          UUID NOT NULL REFERENCES "{schema}".report_periods(id) ON DELETE CASCADE,
                student_id         UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                class_name         VARCHAR(64) NOT NULL,
                total_score        DOUBLE PRECISION NOT NULL,
                max_total          DOUBLE PRECISION NOT NULL,
                percentage         DOUBLE PRECISION NOT NULL,
                grade_letter       VARCHAR(4) NOT NULL,
                attendance_present INT NOT NULL,
                attendance_total   INT NOT NULL,
                attendance_rate    DOUBLE PRECISION NOT NULL,
                class_rank         INT,
                remarks            TEXT,
                generated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (period_id, student_id)
            )"#
        ),
        // --- Library ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".book_categories (
                id          UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                name        VARCHAR(128) UNIQUE NOT NULL,
                description TEXT,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".books (
                id               UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                title            VARCHAR(255) NOT NULL,
                author           VARCHAR(255),
                isbn             VARCHAR(32),
                category_id      UUID REFERENCES "{schema}".book_categories(id) ON DELETE SET NULL,
                total_copies     INT NOT NULL CHECK (total_copies >= 0),
                available_copies INT NOT NULL,
                shelf_location   VARCHAR(64),
                created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK (available_copies >= 0 AND available_copies <= total_copies)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".borrowings (
                id          UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                book_id     UUID NOT NULL REFERENCES "{schema}".books(id) ON DELETE CASCADE,
                student_id  UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                issued_on   DATE NOT NULL,
                due_on      DATE NOT NULL,
                returned_on DATE,
                fine_cents  BIGINT NOT NULL DEFAULT 0,
                status      VARCHAR(16) NOT NULL DEFAULT 'issued'
                            CHECK (status IN ('issued','returned','lost')),
                issued_by   UUID NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK (due_on >= issued_on)
            )"#
        ),
        // --- Transport ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".vehicles (
                id              UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                registration_no VARCHAR(32) UNIQUE NOT NULL,
                capacity        INT NOT NULL CHECK (capacity >= 1),
                driver_name     VARCHAR(255),
                driver_phone    VARCHAR(32),
                is_active       BOOLEAN NOT NULL DEFAULT TRUE,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".transport_routes (
                id                UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                name              VARCHAR(128) NOT NULL,
                vehicle_id        UUID REFERENCES "{schema}".vehicles(id) ON DELETE SET NULL,
                stops             TEXT[] NOT NULL DEFAULT '{{}}',
                monthly_fee_cents BIGINT NOT NULL DEFAULT 0 CHECK (monthly_fee_cents >= 0),
                created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".transport_assignments (
                id          UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                student_id  UUID UNIQUE NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                route_id    UUID NOT NULL REFERENCES "{schema}".transport_routes(id) ON DELETE CASCADE,
                stop_name   VARCHAR(128),
                assigned_on DATE NOT NULL DEFAULT CURRENT_DATE
            )"#
        ),
        // --- SMS ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".sms_templates (
                id         UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                name       VARCHAR(128) NOT NULL,
                body       TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".sms_campaigns (
                id               UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                name             VARCHAR(255) NOT NULL,
                message          TEXT NOT NULL,
                filter           JSONB NOT NULL DEFAULT '{{}}',
                status           VARCHAR(16) NOT NULL DEFAULT 'draft'
                                 CHECK (status IN ('draft','sending','completed','failed')),
                total_recipients INT NOT NULL DEFAULT 0,
                sent_count       INT NOT NULL DEFAULT 0,
                failed_count     INT NOT NULL DEFAULT 0,
                created_by       UUID NOT NULL,
                created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                started_at       TIMESTAMPTZ,
                completed_at     TIMESTAMPTZ
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".sms_recipients (
                id                  UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                campaign_id         UUID NOT NULL REFERENCES "{schema}".sms_campaigns(id) ON DELETE CASCADE,
                student_id          UUID REFERENCES "{schema}".students(id) ON DELETE SET NULL,
                phone               VARCHAR(32) NOT NULL,
                message             TEXT NOT NULL,
                status              VARCHAR(16) NOT NULL DEFAULT 'pending'
                                    CHECK (status IN ('pending','sent','failed')),
                provider_message_id TEXT,
                error               TEXT,
                attempts            INT NOT NULL DEFAULT 0,
                sent_at             TIMESTAMPTZ,
                UNIQUE (campaign_id, phone)
            )"#
        ),
        // --- Fees, payments, refunds ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".fees (
                id           UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                student_id   UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE CASCADE,
                fee_month    DATE NOT NULL CHECK (EXTRACT(DAY FROM fee_month) = 1),
                amount_cents BIGINT NOT NULL CHECK (amount_cents >= 0),
                paid_cents   BIGINT NOT NULL DEFAULT 0 CHECK (paid_cents >= 0),
                status       VARCHAR(16) NOT NULL DEFAULT 'due'
                             CHECK (status IN ('due','partial','paid','waived')),
                due_date     DATE NOT NULL,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (student_id, fee_month),
                CHECK (paid_cents <= amount_cents)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".payments (
                id           UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                student_id   UUID NOT NULL REFERENCES "{schema}".students(id) ON DELETE RESTRICT,
                amount_cents BIGINT NOT NULL CHECK (amount_cents > 0),
                method       VARCHAR(16) NOT NULL
                             CHECK (method IN ('cash','card','bank_transfer','mobile')),
                reference    VARCHAR(128),
                paid_on      DATE NOT NULL,
                received_by  UUID NOT NULL,
                notes        TEXT,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".payment_allocations (
                payment_id   UUID NOT NULL REFERENCES "{schema}".payments(id) ON DELETE CASCADE,
                fee_id       UUID NOT NULL REFERENCES "{schema}".fees(id) ON DELETE CASCADE,
                amount_cents BIGINT NOT NULL CHECK (amount_cents >= 0),
                PRIMARY KEY (payment_id, fee_id)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".refunds (
                id           UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                payment_id   UUID NOT NULL REFERENCES "{schema}".payments(id) ON DELETE CASCADE,
                amount_cents BIGINT NOT NULL CHECK (amount_cents > 0),
                reason       TEXT,
                refunded_on  DATE NOT NULL DEFAULT CURRENT_DATE,
                processed_by UUID NOT NULL,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
        // --- Audit log ---
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}".audit_log (
                id             UUID PRIMARY KEY DEFAULT public.uuid_generate_v4(),
                user_id        UUID,
                action         VARCHAR(64) NOT NULL,
                resource_type  VARCHAR(64),
                resource_id    TEXT,
                resource_label TEXT,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ),
    ]
}

/// Returns the PostgreSQL schema name for a given center slug.
pub fn schema_name(slug: &str) -> String {
    format!("center_{}", slug.to_lowercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_name_normalises_slug() {
        assert_eq!(schema_name("Bright-Minds"), "center_bright_minds");
        assert_eq!(schema_name("abc123"), "center_abc123");
    }

    #[test]
    fn every_trigger_table_is_created() {
        let ddl = table_ddl("center_x").join("\n");
        for table in TABLES_WITH_UPDATED_AT {
            assert!(
                ddl.contains(&format!("\"center_x\".{table} (")),
                "missing table {table}"
            );
        }
    }
}
