// libs/appointment-cell/src/services/memory.rs
//
// Process-local store backing both availability and appointments. A single
// mutex serializes writers, which gives `insert_if_free` the same
// at-most-one-wins outcome as the database exclusion constraint.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use availability_cell::{
    AvailabilityError, AvailabilityOverride, AvailabilityStore, BlockedSlot, TimeRange,
    WeeklyAvailabilityRule,
};

use crate::models::{Appointment, AppointmentListQuery, AppointmentStatus, SchedulingError};
use crate::services::store::AppointmentStore;

#[derive(Debug, Default)]
struct Tables {
    rules: Vec<WeeklyAvailabilityRule>,
    overrides: Vec<AvailabilityOverride>,
    blocks: Vec<BlockedSlot>,
    appointments: Vec<Appointment>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn appointments(&self) -> Vec<Appointment> {
        self.tables.lock().await.appointments.clone()
    }
}

fn matches_query(appointment: &Appointment, query: &AppointmentListQuery) -> bool {
    query.status.map_or(true, |s| appointment.status == s)
        && query.from.map_or(true, |from| appointment.scheduled_at >= from)
        && query.to.map_or(true, |to| appointment.scheduled_at < to)
}

fn select(mut rows: Vec<Appointment>, query: &AppointmentListQuery) -> Vec<Appointment> {
    rows.retain(|a| matches_query(a, query));
    rows.sort_by_key(|a| a.scheduled_at);
    if let Some(limit) = query.limit {
        rows.truncate(limit as usize);
    }
    rows
}

#[async_trait]
impl AvailabilityStore for InMemoryStore {
    async fn weekly_rules(
        &self,
        professional_id: Uuid,
        weekday: Option<u8>,
    ) -> Result<Vec<WeeklyAvailabilityRule>, AvailabilityError> {
        let tables = self.tables.lock().await;
        Ok(tables.rules.iter()
            .filter(|r| r.professional_id == professional_id)
            .filter(|r| weekday.map_or(true, |d| r.weekday == d))
            .cloned()
            .collect())
    }

    async fn overrides(
        &self,
        professional_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AvailabilityOverride>, AvailabilityError> {
        let tables = self.tables.lock().await;
        Ok(tables.overrides.iter()
            .filter(|o| o.professional_id == professional_id)
            .filter(|o| date.map_or(true, |d| o.date == d))
            .cloned()
            .collect())
    }

    async fn blocked_slots(
        &self,
        professional_id: Uuid,
        window: Option<TimeRange>,
    ) -> Result<Vec<BlockedSlot>, AvailabilityError> {
        let tables = self.tables.lock().await;
        Ok(tables.blocks.iter()
            .filter(|b| b.professional_id == professional_id)
            .filter(|b| match (window, b.range()) {
                (Some(w), Some(r)) => r.overlaps(&w),
                (None, _) => true,
                (Some(_), None) => false,
            })
            .cloned()
            .collect())
    }

    async fn booked_ranges(
        &self,
        professional_id: Uuid,
        window: TimeRange,
    ) -> Result<Vec<TimeRange>, AvailabilityError> {
        let tables = self.tables.lock().await;
        Ok(tables.appointments.iter()
            .filter(|a| a.professional_id == professional_id && a.holds_slot())
            .filter_map(Appointment::range)
            .filter(|r| r.overlaps(&window))
            .collect())
    }

    async fn insert_rule(&self, rule: WeeklyAvailabilityRule) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
        self.tables.lock().await.rules.push(rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: WeeklyAvailabilityRule) -> Result<WeeklyAvailabilityRule, AvailabilityError> {
        let mut tables = self.tables.lock().await;
        let slot = tables.rules.iter_mut()
            .find(|r| r.id == rule.id && r.professional_id == rule.professional_id)
            .ok_or_else(|| AvailabilityError::NotFound(format!("rule {}", rule.id)))?;
        *slot = rule.clone();
        Ok(rule)
    }

    async fn delete_rule(&self, professional_id: Uuid, rule_id: Uuid) -> Result<(), AvailabilityError> {
        let mut tables = self.tables.lock().await;
        let before = tables.rules.len();
        tables.rules.retain(|r| !(r.id == rule_id && r.professional_id == professional_id));
        if tables.rules.len() == before {
            return Err(AvailabilityError::NotFound(format!("rule {}", rule_id)));
        }
        Ok(())
    }

    async fn insert_override(&self, entry: AvailabilityOverride) -> Result<AvailabilityOverride, AvailabilityError> {
        self.tables.lock().await.overrides.push(entry.clone());
        Ok(entry)
    }

    async fn delete_override(&self, professional_id: Uuid, override_id: Uuid) -> Result<(), AvailabilityError> {
        let mut tables = self.tables.lock().await;
        let before = tables.overrides.len();
        tables.overrides.retain(|o| !(o.id == override_id && o.professional_id == professional_id));
        if tables.overrides.len() == before {
            return Err(AvailabilityError::NotFound(format!("override {}", override_id)));
        }
        Ok(())
    }

    async fn insert_blocked_slot(&self, block: BlockedSlot) -> Result<BlockedSlot, AvailabilityError> {
        self.tables.lock().await.blocks.push(block.clone());
        Ok(block)
    }

    async fn delete_blocked_slot(&self, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError> {
        let mut tables = self.tables.lock().await;
        let before = tables.blocks.len();
        tables.blocks.retain(|b| !(b.id == block_id && b.professional_id == professional_id));
        if tables.blocks.len() == before {
            return Err(AvailabilityError::NotFound(format!("blocked slot {}", block_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn insert_if_free(&self, appointment: Appointment) -> Result<Appointment, SchedulingError> {
        let requested = appointment.range().ok_or_else(|| {
            SchedulingError::InvalidRange(format!("duration {} is not a usable length", appointment.duration_minutes))
        })?;

        let mut tables = self.tables.lock().await;
        let taken = tables.appointments.iter()
            .filter(|a| a.professional_id == appointment.professional_id && a.holds_slot())
            .filter_map(Appointment::range)
            .any(|r| r.overlaps(&requested));
        if taken {
            debug!("Rejecting {}: overlaps an existing booking", appointment.id);
            return Err(SchedulingError::SlotConflict);
        }

        let mut stored = appointment;
        stored.created_at = Some(Utc::now());
        tables.appointments.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.tables.lock().await.appointments.iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(id.to_string()))
    }

    async fn list_by_patient(
        &self,
        patient_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let rows = self.tables.lock().await.appointments.iter()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        Ok(select(rows, query))
    }

    async fn list_by_professional(
        &self,
        professional_id: Uuid,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let rows = self.tables.lock().await.appointments.iter()
            .filter(|a| a.professional_id == professional_id)
            .cloned()
            .collect();
        Ok(select(rows, query))
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        note: Option<String>,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.appointments.iter_mut().find(|a| a.id == id) else {
            return Err(SchedulingError::NotFound(id.to_string()));
        };
        if !from.contains(&row.status) {
            return Ok(None);
        }

        row.status = to;
        if note.is_some() {
            row.note = note;
        }
        row.updated_at = Some(Utc::now());
        Ok(Some(row.clone()))
    }

    async fn complete_elapsed(
        &self,
        professional_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut tables = self.tables.lock().await;
        let mut completed = Vec::new();
        for row in tables.appointments.iter_mut() {
            if row.professional_id == professional_id && !row.status.is_terminal() && row.scheduled_at <= now {
                row.status = AppointmentStatus::Completed;
                row.updated_at = Some(Utc::now());
                completed.push(row.clone());
            }
        }
        Ok(completed)
    }

    async fn set_meet_link(&self, id: Uuid, meet_link: String) -> Result<Option<Appointment>, SchedulingError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.appointments.iter_mut().find(|a| a.id == id) else {
            return Err(SchedulingError::NotFound(id.to_string()));
        };
        if row.status.is_terminal() {
            return Ok(None);
        }

        row.meet_link = Some(meet_link);
        row.updated_at = Some(Utc::now());
        Ok(Some(row.clone()))
    }
}
