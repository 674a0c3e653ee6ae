use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scheduling settings: {0}")]
pub struct SettingsError(pub String);

/// One year; longer confirmation windows are rejected.
pub const MAX_CONFIRMATION_HOURS: i64 = 24 * 365;

/// Admin-editable scheduling knobs. Read once per request and passed down
/// explicitly; nothing in the scheduling core reads them from global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingSettings {
    /// First bookable hour of the day, civil time.
    pub business_start_hour: u32,
    /// Hour at which the business day closes. 24 means midnight.
    pub business_end_hour: u32,
    /// How long before `scheduled_at` a patient may confirm.
    pub confirmation_hours_before: i64,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            business_start_hour: 8,
            business_end_hour: 23,
            confirmation_hours_before: 24,
        }
    }
}

impl SchedulingSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.business_end_hour > 24 {
            return Err(SettingsError(format!(
                "business_end_hour must be at most 24, got {}",
                self.business_end_hour
            )));
        }
        if self.business_start_hour >= self.business_end_hour {
            return Err(SettingsError(format!(
                "business hours {}..{} are empty or inverted",
                self.business_start_hour, self.business_end_hour
            )));
        }
        if !(0..=MAX_CONFIRMATION_HOURS).contains(&self.confirmation_hours_before) {
            return Err(SettingsError(format!(
                "confirmation_hours_before must be between 0 and {}, got {}",
                MAX_CONFIRMATION_HOURS, self.confirmation_hours_before
            )));
        }
        Ok(())
    }

    /// Business-hours envelope as minutes since local midnight.
    pub fn business_minutes(&self) -> (u32, u32) {
        (self.business_start_hour * 60, self.business_end_hour * 60)
    }
}
