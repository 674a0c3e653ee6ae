pub mod settings;
pub mod supabase;

pub use settings::{SettingsProvider, SupabaseSettingsProvider};
pub use supabase::{SupabaseClient, SupabaseError};
