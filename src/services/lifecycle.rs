//! Campaign lifecycle transitions: Launch, Pause, Resume, Delete,
//! Duplicate. Each transition is a single read-modify-write under a row
//! lock on the campaign, so two concurrent launches (or a pause racing a
//! launch) can't both succeed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{Store, StoreError};
use crate::models::campaign::{Campaign, CampaignStatus};
use crate::models::template::Template;
use crate::services::scheduler;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot {action} a campaign in {from} state")]
    InvalidTransition {
        action: &'static str,
        from: CampaignStatus,
    },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Lifecycle {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl Lifecycle {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// DRAFT -> ACTIVE. Requires at least one template (step 1 must
    /// exist) and schedules step 1 for every lead currently attached to
    /// the campaign.
    pub async fn launch(
        &self,
        campaign_id: Uuid,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Campaign, LifecycleError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let campaign = Store::load_campaign_for_update(&mut tx, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound("campaign"))?;

        if campaign.campaign_status() != CampaignStatus::Draft {
            tx.rollback().await?;
            return Err(LifecycleError::InvalidTransition {
                action: "launch",
                from: campaign.campaign_status(),
            });
        }

        let step_one: Option<Template> =
            Store::load_template(&mut *tx, campaign_id, 1).await?;
        if step_one.is_none() {
            tx.rollback().await?;
            return Err(LifecycleError::Validation(
                "campaign has no step 1 template".into(),
            ));
        }

        let lead_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM leads WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        if lead_ids.is_empty() {
            tx.rollback().await?;
            return Err(LifecycleError::Validation(
                "campaign has no leads".into(),
            ));
        }

        let anchor = start_time.unwrap_or(now);
        let scheduled_at = scheduler::next_scheduled_at(1, anchor, now, None, 0);

        for lead_id in lead_ids {
            Store::create_job(&mut tx, campaign_id, lead_id, 1, scheduled_at, now).await?;
        }

        sqlx::query(
            "UPDATE campaigns SET status = 'active', start_time = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(campaign_id)
        .bind(anchor)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await?;

        Store::load_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound("campaign"))
    }

    /// ACTIVE -> PAUSED. Due jobs already claimed by the dispatcher are
    /// unaffected; future ticks simply skip this campaign's PENDING jobs
    /// because they re-validate campaign status under lock.
    pub async fn pause(&self, campaign_id: Uuid) -> Result<Campaign, LifecycleError> {
        self.transition(campaign_id, CampaignStatus::Active, CampaignStatus::Paused, "pause")
            .await
    }

    /// PAUSED -> ACTIVE. Does not reschedule anything: jobs created before
    /// the pause keep their original `scheduled_at`.
    pub async fn resume(&self, campaign_id: Uuid) -> Result<Campaign, LifecycleError> {
        self.transition(campaign_id, CampaignStatus::Paused, CampaignStatus::Active, "resume")
            .await
    }

    async fn transition(
        &self,
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
        action: &'static str,
    ) -> Result<Campaign, LifecycleError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let campaign = Store::load_campaign_for_update(&mut tx, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound("campaign"))?;

        if campaign.campaign_status() != from {
            tx.rollback().await?;
            return Err(LifecycleError::InvalidTransition {
                action,
                from: campaign.campaign_status(),
            });
        }

        sqlx::query("UPDATE campaigns SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(campaign_id)
            .bind(to.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await?;

        Store::load_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound("campaign"))
    }

    /// DRAFT only: a campaign with no jobs ever scheduled can be removed
    /// outright (cascades to its leads and templates at the schema level).
    pub async fn delete(&self, campaign_id: Uuid) -> Result<(), LifecycleError> {
        let campaign = Store::load_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound("campaign"))?;

        if campaign.campaign_status() != CampaignStatus::Draft {
            return Err(LifecycleError::InvalidTransition {
                action: "delete",
                from: campaign.campaign_status(),
            });
        }

        sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Copies a campaign's templates (not its leads or job history) into a
    /// fresh DRAFT campaign owned by the same user.
    pub async fn duplicate(
        &self,
        campaign_id: Uuid,
        new_name: String,
    ) -> Result<Campaign, LifecycleError> {
        let now = self.clock.now();
        let source = Store::load_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound("campaign"))?;

        if new_name.trim().is_empty() {
            return Err(LifecycleError::Validation("name must not be empty".into()));
        }

        let mut tx = self.pool.begin().await?;

        let new_id = Uuid::new_v4();
        let copy = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, owner_user_id, name, pitch, tone, status, start_time, tags, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'draft', NULL, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(new_id)
        .bind(source.owner_user_id)
        .bind(new_name)
        .bind(&source.pitch)
        .bind(&source.tone)
        .bind(&source.tags)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(
            r#"
            INSERT INTO templates (id, campaign_id, step_number, subject, body_html, delay_minutes, created_at)
            SELECT gen_random_uuid(), $2, step_number, subject, body_html, delay_minutes, $3
            FROM templates WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(new_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await?;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_the_action_and_state() {
        let err = LifecycleError::InvalidTransition {
            action: "pause",
            from: CampaignStatus::Draft,
        };
        assert_eq!(err.to_string(), "cannot pause a campaign in draft state");
    }
}
