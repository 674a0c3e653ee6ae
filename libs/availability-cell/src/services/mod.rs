pub mod civil_time;
pub mod intervals;
pub mod management;
pub mod slots;
pub mod store;

pub use civil_time::{WallClock, parse_timezone};
pub use intervals::{Interval, TimeRange};
pub use management::AvailabilityManagementService;
pub use slots::{SlotContext, SlotService, DayInputs, chunk_open_slots, compute_open_slots, bookable_envelope};
pub use store::{AvailabilityStore, SupabaseAvailabilityStore};
