use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use shared_config::SchedulingSettings;

use crate::supabase::{SupabaseClient, SupabaseError};

pub const BUSINESS_START_HOUR_KEY: &str = "business_start_hour";
pub const BUSINESS_END_HOUR_KEY: &str = "business_end_hour";
pub const CONFIRMATION_HOURS_KEY: &str = "confirmation_hours_before";

/// Source of the admin-editable scheduling settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn scheduling_settings(&self) -> Result<SchedulingSettings, SupabaseError>;
}

#[derive(Debug, Deserialize)]
struct SettingRow {
    key: String,
    value: Value,
}

/// Reads `system_settings` rows keyed by name. Missing keys keep their defaults.
pub struct SupabaseSettingsProvider {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl SupabaseSettingsProvider {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: Option<String>) -> Self {
        Self { supabase, auth_token }
    }
}

#[async_trait]
impl SettingsProvider for SupabaseSettingsProvider {
    async fn scheduling_settings(&self) -> Result<SchedulingSettings, SupabaseError> {
        let path = format!(
            "/rest/v1/system_settings?select=key,value&key=in.({},{},{})",
            BUSINESS_START_HOUR_KEY, BUSINESS_END_HOUR_KEY, CONFIRMATION_HOURS_KEY
        );
        let rows: Vec<SettingRow> = self.supabase
            .request(Method::GET, &path, self.auth_token.as_deref(), None)
            .await?;

        let settings = apply_rows(SchedulingSettings::default(), &rows);
        debug!("Loaded scheduling settings: {:?}", settings);
        Ok(settings)
    }
}

fn apply_rows(mut settings: SchedulingSettings, rows: &[SettingRow]) -> SchedulingSettings {
    for row in rows {
        let Some(number) = as_integer(&row.value) else {
            warn!("Ignoring non-numeric system setting {} = {}", row.key, row.value);
            continue;
        };
        match row.key.as_str() {
            BUSINESS_START_HOUR_KEY => match u32::try_from(number) {
                Ok(hour) => settings.business_start_hour = hour,
                Err(_) => warn!("Ignoring out-of-range {} = {}", row.key, number),
            },
            BUSINESS_END_HOUR_KEY => match u32::try_from(number) {
                Ok(hour) => settings.business_end_hour = hour,
                Err(_) => warn!("Ignoring out-of-range {} = {}", row.key, number),
            },
            CONFIRMATION_HOURS_KEY => settings.confirmation_hours_before = number,
            other => debug!("Unrelated system setting {}", other),
        }
    }
    settings
}

// Values are stored as JSON, and the admin screen writes numbers as strings.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
