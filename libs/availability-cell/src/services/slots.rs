// libs/availability-cell/src/services/slots.rs
//
// Open-slot computation: weekly rules, date overrides, blocked instants and
// existing bookings are merged into the free ranges of one civil date.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingSettings;

use crate::models::{AvailabilityError, AvailabilityOverride, BlockedSlot, WeeklyAvailabilityRule};
use crate::services::civil_time::{
    day_range, wall_clock_window, weekday_index, window_to_range, WallClock, WallClockWindow,
};
use crate::services::intervals::{self, TimeRange};
use crate::services::store::AvailabilityStore;

/// Timezone and settings for one request.
#[derive(Debug, Clone, Copy)]
pub struct SlotContext {
    pub tz: Tz,
    pub settings: SchedulingSettings,
}

/// Everything the generator reads for one professional and date.
#[derive(Debug, Clone, Default)]
pub struct DayInputs {
    pub rules: Vec<WeeklyAvailabilityRule>,
    pub overrides: Vec<AvailabilityOverride>,
    pub blocks: Vec<BlockedSlot>,
    pub booked: Vec<TimeRange>,
}

/// Free ranges on `date` at least `duration_minutes` long, ascending and disjoint.
/// An empty result means no availability; that is not an error.
pub fn compute_open_slots(
    ctx: &SlotContext,
    date: NaiveDate,
    duration_minutes: i64,
    inputs: &DayInputs,
) -> Result<Vec<TimeRange>, AvailabilityError> {
    if duration_minutes <= 0 {
        return Err(AvailabilityError::InvalidRange(format!(
            "service duration must be positive, got {}",
            duration_minutes
        )));
    }

    let minimum = minutes_or_invalid(duration_minutes, "service duration")?;
    let free = intervals::subtract(bookable_envelope(ctx, date, inputs)?, inputs.booked.clone());

    Ok(free.into_iter().filter(|r| r.duration() >= minimum).collect())
}

/// Availability on `date` before existing bookings are taken out.
pub fn bookable_envelope(
    ctx: &SlotContext,
    date: NaiveDate,
    inputs: &DayInputs,
) -> Result<Vec<TimeRange>, AvailabilityError> {
    ctx.settings.validate()?;

    let weekday = weekday_index(date);
    let base: Vec<WallClockWindow> = inputs.rules.iter()
        .filter(|rule| rule.weekday == weekday)
        .filter_map(|rule| window_or_skip(rule.start_time, rule.end_time, "weekly rule", rule.id))
        .collect();

    let (added, removed): (Vec<&AvailabilityOverride>, Vec<&AvailabilityOverride>) = inputs.overrides.iter()
        .filter(|o| o.date == date)
        .partition(|o| o.is_available);

    let mut windows = base;
    windows.extend(
        added.iter().filter_map(|o| window_or_skip(o.start_time, o.end_time, "override", o.id)),
    );
    let removals: Vec<WallClockWindow> = removed.iter()
        .filter_map(|o| window_or_skip(o.start_time, o.end_time, "override", o.id))
        .collect();
    let windows = intervals::subtract(windows, removals);

    let open: Vec<TimeRange> = windows.into_iter()
        .filter_map(|w| window_to_range(&ctx.tz, date, w))
        .collect();

    let day = day_range(&ctx.tz, date);
    let blocks: Vec<TimeRange> = inputs.blocks.iter()
        .filter_map(BlockedSlot::range)
        .filter(|r| r.overlaps(&day))
        .collect();
    let open = intervals::subtract(open, blocks);

    let (start_minute, end_minute) = ctx.settings.business_minutes();
    let business_window = wall_clock_window(
        WallClock::from_hm(start_minute / 60, start_minute % 60)?,
        WallClock::from_hm(end_minute / 60, end_minute % 60)?,
    )?;
    let Some(business) = window_to_range(&ctx.tz, date, business_window) else {
        return Ok(Vec::new());
    };

    let envelope = intervals::clip(open, &business);
    debug!("Bookable envelope for {}: {} range(s)", date, envelope.len());
    Ok(envelope)
}

// Stored rows were validated on write; a bad one is skipped rather than failing the whole day.
fn window_or_skip(start: WallClock, end: WallClock, kind: &str, id: Uuid) -> Option<WallClockWindow> {
    match wall_clock_window(start, end) {
        Ok(window) => Some(window),
        Err(e) => {
            warn!("Skipping malformed {} {}: {}", kind, id, e);
            None
        }
    }
}

/// Cuts free ranges into `duration`-long slots starting every `step` minutes.
pub fn chunk_open_slots(
    ranges: &[TimeRange],
    duration_minutes: i64,
    step_minutes: i64,
) -> Result<Vec<TimeRange>, AvailabilityError> {
    if duration_minutes <= 0 || step_minutes <= 0 {
        return Err(AvailabilityError::InvalidRange(
            "slot duration and step must be positive".to_string(),
        ));
    }
    let duration = minutes_or_invalid(duration_minutes, "slot duration")?;
    let step = minutes_or_invalid(step_minutes, "slot step")?;

    let mut slots = Vec::new();
    for range in ranges {
        let mut cursor = range.start;
        while let Some(end) = cursor.checked_add_signed(duration).filter(|end| *end <= range.end) {
            slots.push(TimeRange { start: cursor, end });
            match cursor.checked_add_signed(step) {
                Some(next) => cursor = next,
                None => break,
            }
        }
    }
    Ok(slots)
}

fn minutes_or_invalid(minutes: i64, what: &str) -> Result<Duration, AvailabilityError> {
    Duration::try_minutes(minutes)
        .ok_or_else(|| AvailabilityError::InvalidRange(format!("{} of {} minutes is out of range", what, minutes)))
}

pub struct SlotService {
    store: Arc<dyn AvailabilityStore>,
    tz: Tz,
}

impl SlotService {
    pub fn new(store: Arc<dyn AvailabilityStore>, tz: Tz) -> Self {
        Self { store, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn context(&self, settings: &SchedulingSettings) -> SlotContext {
        SlotContext { tz: self.tz, settings: *settings }
    }

    /// Reads rules, overrides, blocks and (optionally) bookings for one date.
    pub async fn load_day(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        include_booked: bool,
    ) -> Result<DayInputs, AvailabilityError> {
        let day = day_range(&self.tz, date);

        let rules = self.store.weekly_rules(professional_id, Some(weekday_index(date))).await?;
        let overrides = self.store.overrides(professional_id, Some(date)).await?;
        let blocks = self.store.blocked_slots(professional_id, Some(day)).await?;
        let booked = if include_booked {
            self.store.booked_ranges(professional_id, day).await?
        } else {
            Vec::new()
        };

        Ok(DayInputs { rules, overrides, blocks, booked })
    }

    #[instrument(skip(self, settings))]
    pub async fn open_slots(
        &self,
        settings: &SchedulingSettings,
        professional_id: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<Vec<TimeRange>, AvailabilityError> {
        let inputs = self.load_day(professional_id, date, true).await?;
        let slots = compute_open_slots(&self.context(settings), date, duration_minutes, &inputs)?;
        debug!("Professional {} has {} open range(s) on {}", professional_id, slots.len(), date);
        Ok(slots)
    }

    /// Availability for `date` ignoring bookings; used to validate a booking request.
    pub async fn envelope(
        &self,
        settings: &SchedulingSettings,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<TimeRange>, AvailabilityError> {
        let inputs = self.load_day(professional_id, date, false).await?;
        bookable_envelope(&self.context(settings), date, &inputs)
    }
}
