use crate::error::{PayoutError, Result};
use crate::models::{Amount, NewPayment, Payment};
use crate::store::PayoutStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS payouts (
    id              BIGSERIAL PRIMARY KEY,
    reference       UUID NOT NULL UNIQUE,
    destination     TEXT NOT NULL,
    amount_value    NUMERIC NOT NULL,
    amount_currency TEXT,
    amount_issuer   TEXT,
    memo            TEXT,
    status          TEXT NOT NULL DEFAULT 'PENDING',
    sequence        BIGINT,
    signed_artifact BYTEA,
    error_kind      TEXT,
    fatal           BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    submitted_at    TIMESTAMPTZ,
    confirmed_at    TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_payouts_status_id ON payouts (status, id);
"#;

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    reference: Uuid,
    destination: String,
    amount_value: Decimal,
    amount_currency: Option<String>,
    amount_issuer: Option<String>,
    memo: Option<String>,
    status: String,
    sequence: Option<i64>,
    signed_artifact: Option<Vec<u8>>,
    error_kind: Option<String>,
    fatal: bool,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PayoutError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        let amount = match row.amount_currency {
            Some(currency) => Amount::Issued {
                value: row.amount_value,
                currency,
                issuer: row.amount_issuer,
            },
            None => Amount::Native(row.amount_value),
        };
        Ok(Payment {
            id: row.id,
            reference: row.reference,
            destination: row.destination,
            amount,
            memo: row.memo,
            state: row.status.parse()?,
            sequence: row.sequence,
            signed_artifact: row.signed_artifact,
            error_kind: row.error_kind,
            fatal: row.fatal,
            created_at: row.created_at,
            submitted_at: row.submitted_at,
            confirmed_at: row.confirmed_at,
        })
    }
}

/// Postgres-backed payout store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the payouts table and index if missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_rows(&self, query: &str, limit: Option<i64>) -> Result<Vec<Payment>> {
        let mut q = sqlx::query_as::<_, PaymentRow>(query);
        if let Some(limit) = limit {
            q = q.bind(limit);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    /// Distinguishes a missing row from a row in the wrong state after a
    /// guarded UPDATE touched nothing.
    async fn transition_failed(&self, id: i64, transition: &str) -> PayoutError {
        match self.get_payment(id).await {
            Ok(Some(row)) => PayoutError::InvalidTransition {
                payment_id: id,
                detail: format!("{} from {}", transition, row.state),
            },
            Ok(None) => PayoutError::PaymentNotFound(id),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl PayoutStore for PgStore {
    async fn insert_pending(&self, payment: NewPayment) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO payouts (
                reference, destination, amount_value, amount_currency,
                amount_issuer, memo, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7)
            RETURNING id
            "#,
        )
        .bind(payment.reference)
        .bind(&payment.destination)
        .bind(payment.amount.value())
        .bind(payment.amount.currency())
        .bind(payment.amount.issuer())
        .bind(&payment.memo)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn get_payment(&self, id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payouts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        self.fetch_rows(
            "SELECT * FROM payouts WHERE status = 'PENDING' ORDER BY id ASC LIMIT $1",
            Some(limit),
        )
        .await
    }

    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>> {
        self.fetch_rows(
            "SELECT * FROM payouts WHERE status = 'SIGNED' ORDER BY id ASC",
            None,
        )
        .await
    }

    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>> {
        self.fetch_rows(
            "SELECT * FROM payouts WHERE status = 'SUBMITTED' ORDER BY id ASC",
            None,
        )
        .await
    }

    async fn mark_signed(&self, id: i64, sequence: i64, artifact: Vec<u8>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'SIGNED', sequence = $2, signed_artifact = $3
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(sequence)
        .bind(&artifact)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, "mark_signed").await);
        }
        Ok(())
    }

    async fn mark_submitted(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'SUBMITTED', submitted_at = $2
            WHERE id = $1 AND status = 'SIGNED'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, "mark_submitted").await);
        }
        Ok(())
    }

    async fn mark_confirmed(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'CONFIRMED', confirmed_at = $2
            WHERE id = $1 AND status = 'SUBMITTED'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, "mark_confirmed").await);
        }
        Ok(())
    }

    async fn mark_error(&self, id: i64, kind: &str, fatal: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'ERROR', error_kind = $2, fatal = $3
            WHERE id = $1
              AND status NOT IN ('CONFIRMED', 'ABORTED')
              AND NOT (status = 'ERROR' AND fatal)
            "#,
        )
        .bind(id)
        .bind(kind)
        .bind(fatal)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, "mark_error").await);
        }
        Ok(())
    }

    async fn mark_aborted(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'ABORTED'
            WHERE id = $1 AND status NOT IN ('CONFIRMED', 'ABORTED')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, "mark_aborted").await);
        }
        Ok(())
    }

    async fn is_aborted(&self, id: i64) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM payouts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(matches!(row, Some((status,)) if status == "ABORTED"))
    }

    async fn highest_sequence(&self) -> Result<Option<i64>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(sequence) FROM payouts WHERE sequence IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0)
    }

    async fn clear_signed_from(&self, id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'PENDING',
                sequence = NULL,
                signed_artifact = NULL,
                submitted_at = NULL
            WHERE id >= $1 AND status IN ('SIGNED', 'SUBMITTED')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
