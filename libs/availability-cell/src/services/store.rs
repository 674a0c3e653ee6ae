// libs/availability-cell/src/services/store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{AvailabilityError, AvailabilityOverride, BlockedSlot, WeeklyAvailabilityRule};
use crate::services::intervals::TimeRange;

pub const RULES_TABLE: &str = "availability_rules";
pub const OVERRIDES_TABLE: &str = "availability_overrides";
pub const BLOCKED_SLOTS_TABLE: &str = "blocked_slots";
pub const APPOINTMENTS_TABLE: &str = "appointments";

/// Read and write access to the per-professional availability collections,
/// plus the booked ranges the slot generator subtracts.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Rules for a professional, optionally narrowed to one weekday.
    async fn weekly_rules(
        &self,
        professional_id: Uuid,
        weekday: Option<u8>,
    ) -> Result<Vec<WeeklyAvailabilityRule>, AvailabilityError>;

    async fn overrides(
        &self,
        professional_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AvailabilityOverride>, AvailabilityError>;

    /// Blocks intersecting `window`, or all of them when `window` is `None`.
    async fn blocked_slots(
        &self,
        professional_id: Uuid,
        window: Option<TimeRange>,
    ) -> Result<Vec<BlockedSlot>, AvailabilityError>;

    /// `[scheduled_at, scheduled_at + duration)` of every non-cancelled
    /// appointment intersecting `window`.
    async fn booked_ranges(
        &self,
        professional_id: Uuid,
        window: TimeRange,
    ) -> Result<Vec<TimeRange>, AvailabilityError>;

    async fn insert_rule(&self, rule: WeeklyAvailabilityRule) -> Result<WeeklyAvailabilityRule, AvailabilityError>;

    async fn update_rule(&self, rule: WeeklyAvailabilityRule) -> Result<WeeklyAvailabilityRule, AvailabilityError>;

    async fn delete_rule(&self, professional_id: Uuid, rule_id: Uuid) -> Result<(), AvailabilityError>;

    async fn insert_override(&self, entry: AvailabilityOverride) -> Result<AvailabilityOverride, AvailabilityError>;

    async fn delete_override(&self, professional_id: Uuid, override_id: Uuid) -> Result<(), AvailabilityError>;

    async fn insert_blocked_slot(&self, block: BlockedSlot) -> Result<BlockedSlot, AvailabilityError>;

    async fn delete_blocked_slot(&self, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError>;
}

/// Timestamps go into PostgREST filters; encode them so `+` offsets survive.
pub fn ts_param(instant: DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

#[derive(Debug, Deserialize)]
struct BookedRow {
    scheduled_at: DateTime<Utc>,
    duration_minutes: i64,
}

pub struct SupabaseAvailabilityStore {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl SupabaseAvailabilityStore {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: Option<String>) -> Self {
        Self { supabase, auth_token }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AvailabilityError> {
        let rows: Vec<T> = self.supabase
            .request(Method::GET, path, self.auth_token.as_deref(), None)
            .await?;
        Ok(rows)
    }

    async fn insert<T: serde::de::DeserializeOwned>(&self, table: &str, body: Value) -> Result<T, AvailabilityError> {
        let mut rows: Vec<T> = self.supabase
            .request_with_headers(
                Method::POST,
                &format!("/rest/v1/{}", table),
                self.auth_token.as_deref(),
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await?;
        rows.pop().ok_or_else(|| {
            AvailabilityError::UpstreamUnavailable(format!("insert into {} returned no row", table))
        })
    }

    async fn delete(&self, table: &str, professional_id: Uuid, id: Uuid) -> Result<(), AvailabilityError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&professional_id=eq.{}",
            table, id, professional_id
        );
        let deleted: Vec<Value> = self.supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                self.auth_token.as_deref(),
                None,
                Some(SupabaseClient::return_representation()),
            )
            .await?;
        if deleted.is_empty() {
            return Err(AvailabilityError::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn weekly_rules(
        &self,
        professional_id: Uuid,
        weekday: Option<u8>,
    ) -> Result<Vec<WeeklyAvailabilityRule>, AvailabilityError> {
        let mut path = format!("/rest/v1/{}?professional_id=eq.{}", RULES_TABLE, professional_id);
        if let Some(day) = weekday {
            path.push_str(&format!("&weekday=eq.{}", day));
        }
        path.push_str("&order=weekday.asc,start_time.asc");
        self.get(&path).await
    }

    async fn overrides(
        &self,
        professional_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AvailabilityOverride>, AvailabilityError> {
        let mut path = format!("/rest/v1/{}?professional_id=eq.{}", OVERRIDES_TABLE, professional_id);
        if let Some(date) = date {
            path.push_str(&format!("&date=eq.{}", date));
        }
        path.push_str("&order=date.asc,start_time.asc");
        self.get(&path).await
    }

    async fn blocked_slots(
        &self,
        professional_id: Uuid,
        window: Option<TimeRange>,
    ) -> Result<Vec<BlockedSlot>, AvailabilityError> {
        let mut path = format!("/rest/v1/{}?professional_id=eq.{}", BLOCKED_SLOTS_TABLE, professional_id);
        if let Some(window) = window {
            path.push_str(&format!(
                "&starts_at=lt.{}&ends_at=gt.{}",
                ts_param(window.end),
                ts_param(window.start)
            ));
        }
        path.push_str("&order=starts_at.asc");
        self.get(&path).await
    }

    async fn booked_ranges(
        &self,
        professional_id: Uuid,
        window: TimeRange,
    ) -> Result<Vec<TimeRange>, AvailabilityError> {
        let path = format!(
            "/rest/v1/{}?select=scheduled_at,duration_minutes&professional_id=eq.{}&status=neq.cancelled&scheduled_at=lt.{}&ends_at=gt.{}&order=scheduled_at.asc",
            APPOINTMENTS_TABLE,
            professional_id,
            ts_param(window.end),
            ts_param(window.start)
        );
        let rows: Vec<BookedRow> = self.get(&path).await?;
        debug!("Found {} booked appointments for {} in window", rows.len(), professional_id);

        Ok(rows
            .into_iter()
            .filter_map(|row| TimeRange::starting_at(row.scheduled_at, row.duration_minutes))
            .collect())
    }

    async fn insert_rule(&self, rule: WeeklyAvailabilityRule) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
        self.insert(RULES_TABLE, json!(rule)).await
    }

    async fn update_rule(&self, rule: WeeklyAvailabilityRule) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&professional_id=eq.{}",
            RULES_TABLE, rule.id, rule.professional_id
        );
        let body = json!({
            "weekday": rule.weekday,
            "start_time": rule.start_time,
            "end_time": rule.end_time,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let mut rows: Vec<WeeklyAvailabilityRule> = self.supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                self.auth_token.as_deref(),
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await?;
        rows.pop().ok_or_else(|| AvailabilityError::NotFound(format!("rule {}", rule.id)))
    }

    async fn delete_rule(&self, professional_id: Uuid, rule_id: Uuid) -> Result<(), AvailabilityError> {
        self.delete(RULES_TABLE, professional_id, rule_id).await
    }

    async fn insert_override(&self, entry: AvailabilityOverride) -> Result<AvailabilityOverride, AvailabilityError> {
        self.insert(OVERRIDES_TABLE, json!(entry)).await
    }

    async fn delete_override(&self, professional_id: Uuid, override_id: Uuid) -> Result<(), AvailabilityError> {
        self.delete(OVERRIDES_TABLE, professional_id, override_id).await
    }

    async fn insert_blocked_slot(&self, block: BlockedSlot) -> Result<BlockedSlot, AvailabilityError> {
        self.insert(BLOCKED_SLOTS_TABLE, json!(block)).await
    }

    async fn delete_blocked_slot(&self, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError> {
        self.delete(BLOCKED_SLOTS_TABLE, professional_id, block_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_percent_encoded_for_filters() {
        let instant = DateTime::parse_from_rfc3339("2025-06-02T13:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(ts_param(instant), "2025-06-02T13%3A00%3A00Z");
    }
}
