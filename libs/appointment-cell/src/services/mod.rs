pub mod booking;
pub mod lifecycle;
pub mod memory;
pub mod notifications;
pub mod store;

pub use booking::AppointmentBookingService;
pub use lifecycle::{AppointmentLifecycleService, Transition};
pub use memory::InMemoryStore;
pub use notifications::{
    dispatcher_for, LogNotifier, NotificationDispatcher, NotificationError, WebhookNotifier,
    NOTIFICATION_TIMEOUT,
};
pub use store::{AppointmentStore, SupabaseAppointmentStore};
