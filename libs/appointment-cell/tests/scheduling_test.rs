// libs/appointment-cell/tests/scheduling_test.rs
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::{
    AppointmentBookingService, InMemoryStore, NotificationDispatcher, NotificationError, WebhookNotifier,
};
use availability_cell::{
    AvailabilityOverride, AvailabilityStore, BlockedSlot, SlotService, WallClock, WeeklyAvailabilityRule,
};
use shared_config::SchedulingSettings;
use shared_models::auth::Actor;

const MONDAY: u8 = 1;

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn clock(s: &str) -> WallClock {
    s.parse().unwrap()
}

// 2025-06-02 is a Monday; Sao Paulo is UTC-3, so 10:00 local is 13:00Z.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    // Dispatch runs on spawned tasks; give them a chance to land.
    async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            if self.events.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.names()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn dispatch(&self, event: &AppointmentEvent) -> Result<(), NotificationError> {
        self.events.lock().unwrap().push(event.name().to_string());
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl NotificationDispatcher for FailingNotifier {
    async fn dispatch(&self, _event: &AppointmentEvent) -> Result<(), NotificationError> {
        Err(NotificationError::Rejected(503))
    }
}

struct Clinic {
    store: Arc<InMemoryStore>,
    notifier: Arc<RecordingNotifier>,
    service: Arc<AppointmentBookingService>,
    professional_id: Uuid,
}

async fn clinic_with(notifier: Arc<dyn NotificationDispatcher>) -> (Arc<InMemoryStore>, Arc<AppointmentBookingService>, Uuid) {
    let store = Arc::new(InMemoryStore::new());
    let professional_id = Uuid::new_v4();
    store
        .insert_rule(WeeklyAvailabilityRule {
            id: Uuid::new_v4(),
            professional_id,
            weekday: MONDAY,
            start_time: clock("08:00"),
            end_time: clock("18:00"),
        })
        .await
        .unwrap();

    let service = Arc::new(AppointmentBookingService::new(
        store.clone(),
        store.clone(),
        chrono_tz::America::Sao_Paulo,
        notifier,
    ));
    (store, service, professional_id)
}

async fn clinic() -> Clinic {
    let notifier = Arc::new(RecordingNotifier::default());
    let (store, service, professional_id) = clinic_with(notifier.clone()).await;
    Clinic { store, notifier, service, professional_id }
}

fn request(professional_id: Uuid, scheduled_at: &str, minutes: i64) -> BookAppointmentRequest {
    BookAppointmentRequest {
        professional_id,
        patient_id: None,
        service: "consultation".to_string(),
        scheduled_at: utc(scheduled_at),
        duration_minutes: Some(minutes),
        note: None,
    }
}

#[tokio::test]
async fn booking_confirming_and_sweeping_a_monday_appointment() {
    let clinic = clinic().await;
    let settings = SchedulingSettings::default();
    let first_patient = Actor::user(Uuid::new_v4());
    let second_patient = Actor::user(Uuid::new_v4());
    let sunday_noon = utc("2025-06-01T15:00:00Z");

    let booked = clinic.service
        .book_appointment(&first_patient, &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), sunday_noon)
        .await
        .unwrap();
    assert_eq!(booked.status, AppointmentStatus::PendingConfirmation);
    assert_eq!(booked.patient_id, first_patient.user_id);

    let overlap = clinic.service
        .book_appointment(&second_patient, &settings, request(clinic.professional_id, "2025-06-02T13:30:00Z", 30), sunday_noon)
        .await;
    assert_matches!(overlap, Err(SchedulingError::SlotConflict));

    let confirmed = clinic.service
        .confirm_appointment(&first_patient, &settings, booked.id, utc("2025-06-02T12:00:00Z"))
        .await
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let professional = Actor::user(clinic.professional_id);
    let swept = clinic.service
        .auto_complete(&professional, clinic.professional_id, utc("2025-06-02T14:05:00Z"))
        .await
        .unwrap();
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].id, booked.id);
    assert_eq!(swept[0].status, AppointmentStatus::Completed);

    assert_eq!(clinic.notifier.wait_for(3).await, vec!["booked", "confirmed", "completed"]);
}

#[tokio::test]
async fn concurrent_bookings_for_the_same_slot_have_one_winner() {
    let clinic = clinic().await;
    let now = utc("2025-06-01T15:00:00Z");

    let attempts = (0..12).map(|i| {
        let service = clinic.service.clone();
        let professional_id = clinic.professional_id;
        // Half target 10:00, half target 10:30; every pair overlaps.
        let start = if i % 2 == 0 { "2025-06-02T13:00:00Z" } else { "2025-06-02T13:30:00Z" };
        tokio::spawn(async move {
            let patient = Actor::user(Uuid::new_v4());
            service
                .book_appointment(&patient, &SchedulingSettings::default(), request(professional_id, start, 60), now)
                .await
        })
    });

    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results.iter().filter(|r| r.is_err()).all(|r| matches!(r, Err(SchedulingError::SlotConflict))));
    assert_eq!(clinic.store.appointments().await.len(), 1);
}

#[tokio::test]
async fn touching_bookings_do_not_conflict() {
    let clinic = clinic().await;
    let now = utc("2025-06-01T15:00:00Z");
    let settings = SchedulingSettings::default();

    for start in ["2025-06-02T13:00:00Z", "2025-06-02T14:00:00Z", "2025-06-02T12:00:00Z"] {
        clinic.service
            .book_appointment(&Actor::user(Uuid::new_v4()), &settings, request(clinic.professional_id, start, 60), now)
            .await
            .unwrap();
    }
    assert_eq!(clinic.store.appointments().await.len(), 3);
}

#[tokio::test]
async fn bookings_outside_availability_are_refused() {
    let clinic = clinic().await;
    let now = utc("2025-06-01T15:00:00Z");
    let settings = SchedulingSettings::default();
    let patient = Actor::user(Uuid::new_v4());

    // 17:30 local runs past the 18:00 rule end.
    let late = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T20:30:00Z", 60), now)
        .await;
    assert_matches!(late, Err(SchedulingError::NoAvailability));

    // Tuesday has no rule.
    let tuesday = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-03T13:00:00Z", 60), now)
        .await;
    assert_matches!(tuesday, Err(SchedulingError::NoAvailability));

    clinic.store
        .insert_override(AvailabilityOverride {
            id: Uuid::new_v4(),
            professional_id: clinic.professional_id,
            date: monday(),
            start_time: clock("12:00"),
            end_time: clock("13:00"),
            is_available: false,
        })
        .await
        .unwrap();
    let lunch = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T15:00:00Z", 60), now)
        .await;
    assert_matches!(lunch, Err(SchedulingError::NoAvailability));

    clinic.store
        .insert_blocked_slot(BlockedSlot {
            id: Uuid::new_v4(),
            professional_id: clinic.professional_id,
            starts_at: utc("2025-06-02T11:00:00Z"),
            ends_at: utc("2025-06-02T12:00:00Z"),
            reason: None,
        })
        .await
        .unwrap();
    let blocked = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T11:00:00Z", 60), now)
        .await;
    assert_matches!(blocked, Err(SchedulingError::NoAvailability));

    assert!(clinic.store.appointments().await.is_empty());
}

#[tokio::test]
async fn past_and_malformed_bookings_are_rejected() {
    let clinic = clinic().await;
    let settings = SchedulingSettings::default();
    let patient = Actor::user(Uuid::new_v4());

    let past = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), utc("2025-06-02T13:00:00Z"))
        .await;
    assert_matches!(past, Err(SchedulingError::AlreadyPast));

    let zero = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", 0), utc("2025-06-01T13:00:00Z"))
        .await;
    assert_matches!(zero, Err(SchedulingError::InvalidRange(_)));

    let endless = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", i64::MAX), utc("2025-06-01T13:00:00Z"))
        .await;
    assert_matches!(endless, Err(SchedulingError::InvalidRange(_)));
    assert!(clinic.store.appointments().await.is_empty());

    let mut for_someone_else = request(clinic.professional_id, "2025-06-02T13:00:00Z", 60);
    for_someone_else.patient_id = Some(Uuid::new_v4());
    let forbidden = clinic.service
        .book_appointment(&patient, &settings, for_someone_else, utc("2025-06-01T13:00:00Z"))
        .await;
    assert_matches!(forbidden, Err(SchedulingError::Forbidden(_)));
}

#[tokio::test]
async fn confirmation_window_boundary() {
    let clinic = clinic().await;
    let settings = SchedulingSettings::default();
    let patient = Actor::user(Uuid::new_v4());
    let scheduled_at = utc("2025-06-02T13:00:00Z");

    let booked = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), utc("2025-05-30T12:00:00Z"))
        .await
        .unwrap();

    let too_early = scheduled_at - Duration::hours(24) - Duration::minutes(1);
    let result = clinic.service.confirm_appointment(&patient, &settings, booked.id, too_early).await;
    assert_matches!(result, Err(SchedulingError::OutOfWindow { .. }));

    let at_edge = scheduled_at - Duration::hours(24);
    let confirmed = clinic.service.confirm_appointment(&patient, &settings, booked.id, at_edge).await.unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let again = clinic.service.confirm_appointment(&patient, &settings, booked.id, at_edge).await;
    assert_matches!(again, Err(SchedulingError::WrongState(AppointmentStatus::Confirmed)));
}

#[tokio::test]
async fn unbounded_confirmation_window_is_rejected() {
    let clinic = clinic().await;
    let patient = Actor::user(Uuid::new_v4());
    let booked = clinic.service
        .book_appointment(&patient, &SchedulingSettings::default(), request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), utc("2025-05-30T12:00:00Z"))
        .await
        .unwrap();

    let settings = SchedulingSettings { confirmation_hours_before: i64::MAX, ..Default::default() };
    let result = clinic.service.confirm_appointment(&patient, &settings, booked.id, utc("2025-06-01T13:00:00Z")).await;
    assert_matches!(result, Err(SchedulingError::InvalidRange(_)));
}

#[tokio::test]
async fn auto_complete_is_idempotent() {
    let clinic = clinic().await;
    let settings = SchedulingSettings::default();
    let booked_at = utc("2025-06-01T15:00:00Z");
    let professional = Actor::user(clinic.professional_id);

    let mut ids = Vec::new();
    for start in ["2025-06-02T11:00:00Z", "2025-06-02T13:00:00Z", "2025-06-02T15:00:00Z", "2025-06-02T19:00:00Z"] {
        let appointment = clinic.service
            .book_appointment(&Actor::user(Uuid::new_v4()), &settings, request(clinic.professional_id, start, 60), booked_at)
            .await
            .unwrap();
        ids.push(appointment.id);
    }
    clinic.service.cancel_appointment(&professional, ids[1], None).await.unwrap();

    let now = utc("2025-06-02T16:00:00Z");
    let first = clinic.service.auto_complete(&professional, clinic.professional_id, now).await.unwrap();
    let mut first_ids: Vec<Uuid> = first.iter().map(|a| a.id).collect();
    first_ids.sort();
    let mut expected = vec![ids[0], ids[2]];
    expected.sort();
    assert_eq!(first_ids, expected);

    let second = clinic.service.auto_complete(&professional, clinic.professional_id, now).await.unwrap();
    assert!(second.is_empty());

    let stored = clinic.store.appointments().await;
    let status_of = |id: Uuid| stored.iter().find(|a| a.id == id).map(|a| a.status);
    assert_eq!(status_of(ids[1]), Some(AppointmentStatus::Cancelled));
    assert_eq!(status_of(ids[3]), Some(AppointmentStatus::PendingConfirmation));
}

#[tokio::test]
async fn sweep_is_limited_to_the_professional() {
    let clinic = clinic().await;
    let stranger = Actor::user(Uuid::new_v4());

    let result = clinic.service
        .auto_complete(&stranger, clinic.professional_id, utc("2025-06-02T16:00:00Z"))
        .await;
    assert_matches!(result, Err(SchedulingError::Forbidden(_)));
}

#[tokio::test]
async fn cancelling_frees_the_slot_and_keeps_the_reason() {
    let clinic = clinic().await;
    let settings = SchedulingSettings::default();
    let now = utc("2025-06-01T15:00:00Z");
    let patient = Actor::user(Uuid::new_v4());

    let booked = clinic.service
        .book_appointment(&patient, &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), now)
        .await
        .unwrap();
    let cancelled = clinic.service
        .cancel_appointment(&patient, booked.id, Some("travelling".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.note.as_deref(), Some("Cancellation reason: travelling"));

    let again = clinic.service.cancel_appointment(&patient, booked.id, None).await;
    assert_matches!(again, Err(SchedulingError::AlreadyTerminal(AppointmentStatus::Cancelled)));

    let rebooked = clinic.service
        .book_appointment(&Actor::user(Uuid::new_v4()), &settings, request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), now)
        .await;
    assert!(rebooked.is_ok());
}

#[tokio::test]
async fn completed_appointments_cannot_be_completed_again() {
    let clinic = clinic().await;
    let professional = Actor::user(clinic.professional_id);
    let booked = clinic.service
        .book_appointment(
            &Actor::user(Uuid::new_v4()),
            &SchedulingSettings::default(),
            request(clinic.professional_id, "2025-06-02T13:00:00Z", 60),
            utc("2025-06-01T15:00:00Z"),
        )
        .await
        .unwrap();

    clinic.service.complete_appointment(&professional, booked.id).await.unwrap();
    let again = clinic.service.complete_appointment(&professional, booked.id).await;
    assert_matches!(again, Err(SchedulingError::AlreadyTerminal(AppointmentStatus::Completed)));
}

#[tokio::test]
async fn meet_link_is_set_by_the_professional_only() {
    let clinic = clinic().await;
    let patient = Actor::user(Uuid::new_v4());
    let professional = Actor::user(clinic.professional_id);
    let booked = clinic.service
        .book_appointment(&patient, &SchedulingSettings::default(), request(clinic.professional_id, "2025-06-02T13:00:00Z", 60), utc("2025-06-01T15:00:00Z"))
        .await
        .unwrap();

    let denied = clinic.service.set_meet_link(&patient, booked.id, "https://meet.example/abc".to_string()).await;
    assert_matches!(denied, Err(SchedulingError::Forbidden(_)));

    let updated = clinic.service
        .set_meet_link(&professional, booked.id, "https://meet.example/abc".to_string())
        .await
        .unwrap();
    assert_eq!(updated.meet_link.as_deref(), Some("https://meet.example/abc"));
    assert_eq!(updated.status, AppointmentStatus::PendingConfirmation);

    clinic.service.cancel_appointment(&professional, booked.id, None).await.unwrap();
    let after_cancel = clinic.service.set_meet_link(&professional, booked.id, "https://meet.example/xyz".to_string()).await;
    assert_matches!(after_cancel, Err(SchedulingError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn notification_failure_does_not_undo_the_booking() {
    let (store, service, professional_id) = clinic_with(Arc::new(FailingNotifier)).await;

    let booked = service
        .book_appointment(
            &Actor::user(Uuid::new_v4()),
            &SchedulingSettings::default(),
            request(professional_id, "2025-06-02T13:00:00Z", 60),
            utc("2025-06-01T15:00:00Z"),
        )
        .await
        .unwrap();

    let stored = store.appointments().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, booked.id);
}

#[tokio::test]
async fn hung_notification_hook_does_not_hold_the_booking() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(202).set_delay(std::time::Duration::from_secs(30)))
        .mount(&server)
        .await;
    let (store, service, professional_id) = clinic_with(Arc::new(WebhookNotifier::new(server.uri()))).await;

    let actor = Actor::user(Uuid::new_v4());
    let settings = SchedulingSettings::default();
    let booking = service.book_appointment(
        &actor,
        &settings,
        request(professional_id, "2025-06-02T13:00:00Z", 60),
        utc("2025-06-01T15:00:00Z"),
    );
    let booked = tokio::time::timeout(std::time::Duration::from_secs(3), booking)
        .await
        .expect("booking should not wait for the hook")
        .unwrap();

    let stored = store.appointments().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, booked.id);
}

#[tokio::test]
async fn every_offered_slot_can_be_booked() {
    let clinic = clinic().await;
    let settings = SchedulingSettings::default();
    let now = utc("2025-06-01T15:00:00Z");
    let slots = SlotService::new(clinic.store.clone(), chrono_tz::America::Sao_Paulo);

    clinic.service
        .book_appointment(&Actor::user(Uuid::new_v4()), &settings, request(clinic.professional_id, "2025-06-02T14:00:00Z", 60), now)
        .await
        .unwrap();

    let open = slots.open_slots(&settings, clinic.professional_id, monday(), 60).await.unwrap();
    assert_eq!(open.len(), 2);

    for range in &open {
        let minutes = range.duration().num_minutes();
        let booked = clinic.service
            .book_appointment(
                &Actor::user(Uuid::new_v4()),
                &settings,
                BookAppointmentRequest {
                    professional_id: clinic.professional_id,
                    patient_id: None,
                    service: "consultation".to_string(),
                    scheduled_at: range.start,
                    duration_minutes: Some(minutes),
                    note: None,
                },
                now,
            )
            .await;
        assert!(booked.is_ok());
    }

    let after = slots.open_slots(&settings, clinic.professional_id, monday(), 60).await.unwrap();
    assert!(after.is_empty());
}
