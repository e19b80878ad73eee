use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::campaign::Campaign;
use crate::models::job::Job;
use crate::models::lead::Lead;
use crate::models::template::Template;
use crate::models::user::User;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Transactional persistence for campaigns, leads, templates, and jobs.
/// Methods that must run inside the dispatcher's single per-job transaction
/// take an explicit `&mut PgConnection` (satisfied by both a bare
/// connection and a `Transaction`); simple fetches accept any
/// `sqlx::PgExecutor` so callers can run them against the pool or an
/// in-flight transaction.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Candidate PENDING jobs due now, in deterministic tie-break order.
    /// Does not lock anything — the dispatcher locks (and validates) each
    /// row individually in its own transaction.
    pub async fn due_job_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM jobs
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC, campaign_id ASC, lead_id ASC, step_number ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Locks a single job row with `FOR UPDATE SKIP LOCKED`. Returns `None`
    /// if another worker already holds the lock, or the row is no longer
    /// PENDING (already claimed and resolved by someone else).
    pub async fn lock_pending_job(
        conn: &mut PgConnection,
        job_id: Uuid,
    ) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(job_id)
        .fetch_optional(conn)
        .await?;
        Ok(job)
    }

    pub async fn bump_attempts(
        conn: &mut PgConnection,
        job_id: Uuid,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET attempts = $2, updated_at = $3 WHERE id = $1")
            .bind(job_id)
            .bind(attempts)
            .bind(now)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn mark_sent(
        conn: &mut PgConnection,
        job_id: Uuid,
        sent_at: DateTime<Utc>,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE jobs SET status = 'sent', sent_at = $2, message_id = $3, last_error = NULL, updated_at = $4 WHERE id = $1",
        )
        .bind(job_id)
        .bind(sent_at)
        .bind(message_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        conn: &mut PgConnection,
        job_id: Uuid,
        err: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(job_id)
        .bind(err)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(
        conn: &mut PgConnection,
        job_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE jobs SET status = 'skipped', last_error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(job_id)
        .bind(reason)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn reschedule_for_retry(
        conn: &mut PgConnection,
        job_id: Uuid,
        next_at: DateTime<Utc>,
        err: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE jobs SET scheduled_at = $2, last_error = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(job_id)
        .bind(next_at)
        .bind(err)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Idempotent on (lead, step): an existing PENDING or SENT job for the
    /// same step is returned as-is rather than duplicated — at most one
    /// active job may exist per (lead, step).
    pub async fn create_job(
        conn: &mut PgConnection,
        campaign_id: Uuid,
        lead_id: Uuid,
        step_number: i32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        if let Some(existing) = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE lead_id = $1 AND step_number = $2 AND status IN ('pending', 'sent')",
        )
        .bind(lead_id)
        .bind(step_number)
        .fetch_optional(&mut *conn)
        .await?
        {
            return Ok(existing);
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, campaign_id, lead_id, step_number, scheduled_at, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(lead_id)
        .bind(step_number)
        .bind(scheduled_at)
        .bind(now)
        .fetch_one(conn)
        .await?;
        Ok(job)
    }

    /// Bulk PENDING -> SKIPPED for a lead that just became terminal.
    pub async fn cancel_pending_jobs_for_lead(
        conn: &mut PgConnection,
        lead_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'skipped', last_error = 'lead terminal', updated_at = $2 WHERE lead_id = $1 AND status = 'pending'",
        )
        .bind(lead_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn load_campaign<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Campaign>, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(campaign)
    }

    /// Same as `load_campaign` but takes a row lock, used by the dispatcher
    /// so a concurrent pause can't race the pre-send check.
    pub async fn load_campaign_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Campaign>, StoreError> {
        let campaign =
            sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(conn)
                .await?;
        Ok(campaign)
    }

    pub async fn load_lead<'e, E>(executor: E, id: Uuid) -> Result<Option<Lead>, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(lead)
    }

    pub async fn load_lead_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Lead>, StoreError> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(lead)
    }

    pub async fn load_template<'e, E>(
        executor: E,
        campaign_id: Uuid,
        step_number: i32,
    ) -> Result<Option<Template>, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let template = sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE campaign_id = $1 AND step_number = $2",
        )
        .bind(campaign_id)
        .bind(step_number)
        .fetch_optional(executor)
        .await?;
        Ok(template)
    }

    /// Loads the user that owns a campaign, used by the dispatcher to pull
    /// the sender's signature at render time.
    pub async fn load_owner_for_campaign<'e, E>(
        executor: E,
        campaign_id: Uuid,
    ) -> Result<Option<User>, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let owner = sqlx::query_as::<_, User>(
            "SELECT u.* FROM users u JOIN campaigns c ON c.owner_user_id = u.id WHERE c.id = $1",
        )
        .bind(campaign_id)
        .fetch_optional(executor)
        .await?;
        Ok(owner)
    }

    pub async fn max_step_number(&self, campaign_id: Uuid) -> Result<Option<i32>, StoreError> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(step_number) FROM templates WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    pub async fn update_lead_status(
        conn: &mut PgConnection,
        lead_id: Uuid,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(lead_id)
            .bind(status)
            .bind(now)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE campaigns SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(campaign_id)
            .bind(status)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// True if the campaign has no PENDING jobs and every lead is terminal
    /// or has already sent its final step.
    pub async fn campaign_is_exhausted(&self, campaign_id: Uuid) -> Result<bool, StoreError> {
        let exhausted: bool = sqlx::query_scalar(
            r#"
            SELECT
                NOT EXISTS (SELECT 1 FROM jobs WHERE campaign_id = $1 AND status = 'pending')
                AND NOT EXISTS (
                    SELECT 1 FROM leads l
                    WHERE l.campaign_id = $1
                      AND l.status NOT IN ('replied', 'failed')
                      AND NOT EXISTS (
                          SELECT 1 FROM jobs j
                          WHERE j.lead_id = l.id
                            AND j.status = 'sent'
                            AND j.step_number = (SELECT MAX(step_number) FROM templates WHERE campaign_id = $1)
                      )
                )
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exhausted)
    }

    pub async fn email_history(
        &self,
        campaign_id: Uuid,
        lead_id: Uuid,
    ) -> Result<Vec<crate::models::lead::EmailHistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, (i32, String, DateTime<Utc>, Option<DateTime<Utc>>, Option<String>, i32, Option<String>)>(
            r#"
            SELECT j.step_number, j.status, j.scheduled_at, j.sent_at, t.subject, j.attempts, j.last_error
            FROM jobs j
            LEFT JOIN templates t ON t.campaign_id = j.campaign_id AND t.step_number = j.step_number
            WHERE j.campaign_id = $1 AND j.lead_id = $2
            ORDER BY j.step_number ASC
            "#,
        )
        .bind(campaign_id)
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(step_number, status, scheduled_at, sent_at, subject, attempts, last_error)| {
                    crate::models::lead::EmailHistoryEntry {
                        step_number,
                        status,
                        scheduled_at,
                        sent_at,
                        subject,
                        attempts,
                        last_error,
                    }
                },
            )
            .collect())
    }

    /// Resolve the job (and its lead/campaign) that a reply or bounce
    /// targets, by the referenced provider message id.
    pub async fn find_job_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<(Uuid, Uuid, Uuid)>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid)>(
            "SELECT id, lead_id, campaign_id FROM jobs WHERE message_id = $1 AND status = 'sent' LIMIT 1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Whether some job *other than* `exclude_job_id` for this lead has
    /// already reached SENT — used by bounce handling to decide whether to
    /// fail the lead: the bounced job itself is always SENT (that's how it
    /// got a message id), so it must be excluded from the "already
    /// succeeded elsewhere" check.
    pub async fn lead_has_other_sent_job(
        &self,
        lead_id: Uuid,
        exclude_job_id: Uuid,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM jobs WHERE lead_id = $1 AND status = 'sent' AND id <> $2)",
        )
        .bind(lead_id)
        .bind(exclude_job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn reset_job_for_retry(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', scheduled_at = $2, attempts = 0, last_error = NULL, updated_at = $2 WHERE id = $1 AND status = 'failed'",
        )
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
