use std::env;
use tracing::warn;

mod scheduling;

pub use scheduling::{SchedulingSettings, SettingsError, MAX_CONFIRMATION_HOURS};

pub const DEFAULT_CLINIC_TIMEZONE: &str = "America/Sao_Paulo";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub clinic_timezone: String,
    pub notification_webhook_url: Option<String>,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            clinic_timezone: env::var("CLINIC_TIMEZONE")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_TIMEZONE not set, using default");
                    DEFAULT_CLINIC_TIMEZONE.to_string()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            api_port: env::var("API_PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_notification_configured(&self) -> bool {
        self.notification_webhook_url.is_some()
    }
}
