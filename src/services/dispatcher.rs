//! The polling dispatcher. Each claimed job runs inside its own
//! transaction: lock → validate → render → send → write outcome → commit.
//! The job row lock is the sole synchronizer against the reply ingestor —
//! the lead is read unlocked here, since the ingestor can't commit its
//! cancellation of this job until the dispatcher's transaction releases the
//! job row. Taking a second lock on the lead would have to be acquired in
//! the same order the ingestor takes it, and isn't needed for correctness.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::Store;
use crate::models::lead::LeadStatus;
use crate::services::renderer;
use crate::services::scheduler;
use crate::services::transport::{EmailTransport, OutboundEmail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    NotClaimed,
    Sent,
    Retried,
    Failed,
    Skipped,
    /// Campaign is paused; the row is left PENDING untouched for a later
    /// tick to pick up once resumed.
    Deferred,
}

pub struct Dispatcher {
    pool: PgPool,
    store: Store,
    transport: Arc<dyn EmailTransport>,
    clock: Arc<dyn Clock>,
    max_retry_attempts: i32,
    batch_size: i64,
    poll_interval: StdDuration,
    from_address: String,
    from_name: Option<String>,
    reply_to: Option<String>,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        transport: Arc<dyn EmailTransport>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            store: Store::new(pool.clone()),
            pool,
            transport,
            clock,
            max_retry_attempts: config.max_retry_attempts,
            batch_size: config.worker_batch_size,
            poll_interval: StdDuration::from_secs(config.worker_poll_interval_seconds),
            from_address: config
                .email_from_address
                .clone()
                .unwrap_or_else(|| "outreach@example.com".to_string()),
            from_name: config.email_from_name.clone(),
            reply_to: config.email_reply_to.clone(),
        }
    }

    /// Runs forever, sleeping `poll_interval` between ticks. Exits cleanly
    /// when `shutdown` resolves — any in-flight transaction finishes (or
    /// rolls back, which releases the row lock and reverts the job to
    /// PENDING) before the loop returns.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!("dispatcher starting, poll_interval={:?}", self.poll_interval);
        loop {
            if *shutdown.borrow() {
                tracing::info!("dispatcher received shutdown signal, exiting");
                return;
            }

            if let Err(e) = self.tick().await {
                tracing::error!("dispatcher tick failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("dispatcher woken by shutdown signal, exiting");
                        return;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> Result<(), sqlx::Error> {
        let now = self.clock.now();
        let candidate_ids = self.store.due_job_ids(now, self.batch_size).await?;

        let mut touched_campaigns = std::collections::HashSet::new();
        for job_id in candidate_ids {
            match self.process_one(job_id).await {
                Ok((outcome, campaign_id)) => {
                    if outcome != JobOutcome::NotClaimed && outcome != JobOutcome::Deferred {
                        touched_campaigns.insert(campaign_id);
                    }
                }
                Err(e) => {
                    tracing::error!("job {} processing error: {}", job_id, e);
                }
            }
        }

        for campaign_id in touched_campaigns {
            if let Err(e) = self.complete_campaign_if_exhausted(campaign_id).await {
                tracing::error!("campaign {} completion check failed: {}", campaign_id, e);
            }
        }

        Ok(())
    }

    async fn complete_campaign_if_exhausted(&self, campaign_id: Uuid) -> Result<(), sqlx::Error> {
        if self
            .store
            .campaign_is_exhausted(campaign_id)
            .await
            .map_err(store_err)?
        {
            let now = self.clock.now();
            self.store
                .set_campaign_status(campaign_id, "completed", now)
                .await
                .map_err(store_err)?;
            tracing::info!("campaign {} completed", campaign_id);
        }
        Ok(())
    }

    /// One job, one transaction: lock → validate → render → send → outcome
    /// → commit.
    async fn process_one(&self, job_id: Uuid) -> Result<(JobOutcome, Uuid), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();

        let Some(mut job) = Store::lock_pending_job(&mut tx, job_id).await.map_err(store_err)? else {
            tx.commit().await?;
            return Ok((JobOutcome::NotClaimed, Uuid::nil()));
        };

        // Claim: bump attempts to signal this worker now owns the row.
        let attempts = job.attempts + 1;
        Store::bump_attempts(&mut tx, job.id, attempts, now)
            .await
            .map_err(store_err)?;
        job.attempts = attempts;

        // Final pre-send validation, performed after acquiring the lock.
        let campaign_id = job.campaign_id;
        let campaign = match Store::load_campaign_for_update(&mut tx, campaign_id)
            .await
            .map_err(store_err)?
        {
            Some(c) => c,
            None => {
                Store::mark_skipped(&mut tx, job.id, "campaign missing", now)
                    .await
                    .map_err(store_err)?;
                tx.commit().await?;
                return Ok((JobOutcome::Skipped, campaign_id));
            }
        };
        match campaign.campaign_status() {
            crate::models::campaign::CampaignStatus::Active => {}
            crate::models::campaign::CampaignStatus::Paused => {
                // Paused is not a dead state: leave the row PENDING so a
                // later tick sees it again once the campaign resumes.
                // Rolling back also discards the attempts bump above.
                tx.rollback().await?;
                return Ok((JobOutcome::Deferred, campaign_id));
            }
            _ => {
                Store::mark_skipped(&mut tx, job.id, "campaign not active", now)
                    .await
                    .map_err(store_err)?;
                tx.commit().await?;
                return Ok((JobOutcome::Skipped, campaign_id));
            }
        }

        let lead = match Store::load_lead(&mut *tx, job.lead_id)
            .await
            .map_err(store_err)?
        {
            Some(l) => l,
            None => {
                Store::mark_skipped(&mut tx, job.id, "lead missing", now)
                    .await
                    .map_err(store_err)?;
                tx.commit().await?;
                return Ok((JobOutcome::Skipped, campaign_id));
            }
        };
        if lead.is_terminal() {
            let reason = format!("lead terminal: {}", lead.lead_status());
            Store::mark_skipped(&mut tx, job.id, &reason, now)
                .await
                .map_err(store_err)?;
            tx.commit().await?;
            return Ok((JobOutcome::Skipped, campaign_id));
        }

        let template = match Store::load_template(&mut *tx, job.campaign_id, job.step_number)
            .await
            .map_err(store_err)?
        {
            Some(t) => t,
            None => {
                Store::mark_skipped(&mut tx, job.id, "template missing", now)
                    .await
                    .map_err(store_err)?;
                tx.commit().await?;
                return Ok((JobOutcome::Skipped, campaign_id));
            }
        };

        let owner = Store::load_owner_for_campaign(&mut *tx, job.campaign_id)
            .await
            .map_err(store_err)?;
        let signature_html = owner.map(|u| u.signature_html).unwrap_or_default();

        let (subject, body_html) = renderer::render(
            &template.subject,
            &template.body_html,
            &lead,
            &signature_html,
        );

        let from = match &self.from_name {
            Some(name) => format!("{} <{}>", name, self.from_address),
            None => self.from_address.clone(),
        };
        let headers: Vec<(String, String)> = Vec::new();
        let outbound = OutboundEmail {
            from: &from,
            reply_to: self.reply_to.as_deref(),
            to: &lead.email,
            subject: &subject,
            html_body: &body_html,
            headers: &headers,
        };

        match self.transport.send(outbound).await {
            Ok(message_id) => {
                Store::mark_sent(&mut tx, job.id, now, &message_id, now)
                    .await
                    .map_err(store_err)?;

                if lead.lead_status() == LeadStatus::Pending {
                    Store::update_lead_status(&mut tx, lead.id, LeadStatus::Contacted.as_str(), now)
                        .await
                        .map_err(store_err)?;
                }

                if let Some(next_template) =
                    Store::load_template(&mut *tx, job.campaign_id, job.step_number + 1)
                        .await
                        .map_err(store_err)?
                {
                    let anchor = campaign.start_time.unwrap_or(now);
                    let next_scheduled_at = scheduler::next_scheduled_at(
                        next_template.step_number,
                        anchor,
                        now,
                        Some(now),
                        next_template.delay_minutes,
                    );
                    Store::create_job(
                        &mut tx,
                        job.campaign_id,
                        job.lead_id,
                        next_template.step_number,
                        next_scheduled_at,
                        now,
                    )
                    .await
                    .map_err(store_err)?;
                }

                tx.commit().await?;
                Ok((JobOutcome::Sent, campaign_id))
            }
            Err(crate::error::TransportError::Transient(err)) => {
                if job.attempts < self.max_retry_attempts {
                    let next_at = scheduler::retry_backoff_at(now, job.attempts);
                    Store::reschedule_for_retry(&mut tx, job.id, next_at, &err, now)
                        .await
                        .map_err(store_err)?;
                    tx.commit().await?;
                    Ok((JobOutcome::Retried, campaign_id))
                } else {
                    Store::mark_failed(&mut tx, job.id, &err, now)
                        .await
                        .map_err(store_err)?;
                    Store::update_lead_status(&mut tx, lead.id, LeadStatus::Failed.as_str(), now)
                        .await
                        .map_err(store_err)?;
                    tx.commit().await?;
                    Ok((JobOutcome::Failed, campaign_id))
                }
            }
            Err(crate::error::TransportError::Permanent(err)) => {
                Store::mark_failed(&mut tx, job.id, &err, now)
                    .await
                    .map_err(store_err)?;
                Store::update_lead_status(&mut tx, lead.id, LeadStatus::Failed.as_str(), now)
                    .await
                    .map_err(store_err)?;
                tx.commit().await?;
                Ok((JobOutcome::Failed, campaign_id))
            }
        }
    }
}

/// `StoreError` -> `sqlx::Error` so `process_one`'s return type doesn't
/// need its own error enum just to unify two incompatible `Result`s used
/// in the same function.
fn store_err(e: crate::db::StoreError) -> sqlx::Error {
    match e {
        crate::db::StoreError::Db(err) => err,
        crate::db::StoreError::NotFound(_) => sqlx::Error::RowNotFound,
    }
}
