// libs/availability-cell/src/services/management.rs
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use shared_models::auth::Actor;

use crate::models::{
    AvailabilityError, AvailabilityOverride, BlockedSlot, CreateBlockedSlotRequest,
    CreateOverrideRequest, CreateWeeklyRuleRequest, UpdateWeeklyRuleRequest,
    WeeklyAvailabilityRule,
};
use crate::services::civil_time::{wall_clock_window, WallClock};
use crate::services::intervals::TimeRange;
use crate::services::store::AvailabilityStore;

/// Professional-scoped edits of rules, overrides and blocks.
pub struct AvailabilityManagementService {
    store: Arc<dyn AvailabilityStore>,
}

impl AvailabilityManagementService {
    pub fn new(store: Arc<dyn AvailabilityStore>) -> Self {
        Self { store }
    }

    fn ensure_owner(actor: &Actor, professional_id: Uuid) -> Result<(), AvailabilityError> {
        if actor.may_act_for(professional_id) {
            Ok(())
        } else {
            Err(AvailabilityError::Forbidden(
                "only the professional can edit their availability".to_string(),
            ))
        }
    }

    // ==========================================================================
    // WEEKLY RULES
    // ==========================================================================

    pub async fn list_rules(&self, professional_id: Uuid) -> Result<Vec<WeeklyAvailabilityRule>, AvailabilityError> {
        self.store.weekly_rules(professional_id, None).await
    }

    pub async fn create_rule(
        &self,
        actor: &Actor,
        professional_id: Uuid,
        request: CreateWeeklyRuleRequest,
    ) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;
        let rule = build_rule(Uuid::new_v4(), professional_id, request.weekday, &request.start_time, &request.end_time)?;

        debug!("Creating weekly rule {} for professional {}", rule.id, professional_id);
        let created = self.store.insert_rule(rule).await?;
        info!("Weekly rule {} created for professional {}", created.id, professional_id);
        Ok(created)
    }

    pub async fn update_rule(
        &self,
        actor: &Actor,
        professional_id: Uuid,
        rule_id: Uuid,
        request: UpdateWeeklyRuleRequest,
    ) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;

        let current = self.store.weekly_rules(professional_id, None).await?
            .into_iter()
            .find(|rule| rule.id == rule_id)
            .ok_or_else(|| AvailabilityError::NotFound(format!("rule {}", rule_id)))?;

        let start = request.start_time.unwrap_or_else(|| current.start_time.to_string());
        let end = request.end_time.unwrap_or_else(|| current.end_time.to_string());
        let weekday = request.weekday.unwrap_or(current.weekday);
        let updated = build_rule(rule_id, professional_id, weekday, &start, &end)?;

        self.store.update_rule(updated).await
    }

    pub async fn delete_rule(&self, actor: &Actor, professional_id: Uuid, rule_id: Uuid) -> Result<(), AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;
        self.store.delete_rule(professional_id, rule_id).await?;
        info!("Weekly rule {} deleted for professional {}", rule_id, professional_id);
        Ok(())
    }

    // ==========================================================================
    // DATE OVERRIDES
    // ==========================================================================

    pub async fn list_overrides(&self, professional_id: Uuid) -> Result<Vec<AvailabilityOverride>, AvailabilityError> {
        self.store.overrides(professional_id, None).await
    }

    pub async fn create_override(
        &self,
        actor: &Actor,
        professional_id: Uuid,
        request: CreateOverrideRequest,
    ) -> Result<AvailabilityOverride, AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;
        let start: WallClock = request.start_time.parse()?;
        let end: WallClock = request.end_time.parse()?;
        let window = wall_clock_window(start, end)?;

        let entry = AvailabilityOverride {
            id: Uuid::new_v4(),
            professional_id,
            date: request.date,
            start_time: window.start,
            end_time: window.end,
            is_available: request.is_available,
        };
        debug!("Creating {} override on {} for professional {}",
               if entry.is_available { "additive" } else { "blocking" }, entry.date, professional_id);
        self.store.insert_override(entry).await
    }

    pub async fn delete_override(&self, actor: &Actor, professional_id: Uuid, override_id: Uuid) -> Result<(), AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;
        self.store.delete_override(professional_id, override_id).await
    }

    // ==========================================================================
    // BLOCKED SLOTS
    // ==========================================================================

    pub async fn list_blocked_slots(&self, professional_id: Uuid) -> Result<Vec<BlockedSlot>, AvailabilityError> {
        self.store.blocked_slots(professional_id, None).await
    }

    pub async fn create_blocked_slot(
        &self,
        actor: &Actor,
        professional_id: Uuid,
        request: CreateBlockedSlotRequest,
    ) -> Result<BlockedSlot, AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;
        if TimeRange::new(request.starts_at, request.ends_at).is_none() {
            return Err(AvailabilityError::InvalidRange(format!(
                "block {} - {} is empty or inverted",
                request.starts_at, request.ends_at
            )));
        }

        let block = BlockedSlot {
            id: Uuid::new_v4(),
            professional_id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            reason: request.reason.filter(|r| !r.trim().is_empty()),
        };
        self.store.insert_blocked_slot(block).await
    }

    pub async fn delete_blocked_slot(&self, actor: &Actor, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError> {
        Self::ensure_owner(actor, professional_id)?;
        self.store.delete_blocked_slot(professional_id, block_id).await
    }
}

fn build_rule(
    id: Uuid,
    professional_id: Uuid,
    weekday: u8,
    start: &str,
    end: &str,
) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
    if weekday > 6 {
        return Err(AvailabilityError::InvalidRange(format!(
            "weekday must be between 0 (Sunday) and 6 (Saturday), got {}",
            weekday
        )));
    }
    let window = wall_clock_window(start.parse()?, end.parse()?)?;

    Ok(WeeklyAvailabilityRule {
        id,
        professional_id,
        weekday,
        start_time: window.start,
        end_time: window.end,
    })
}
