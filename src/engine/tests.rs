use super::*;
use crate::settings::TenantSettings;
use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotwise_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new("t", test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

/// Local wall-clock instant. 2026-10-19 is a Monday.
fn at(y: i32, mo: u32, d: u32, h: u32, m: u32) -> Ms {
    calendar::at_minutes(NaiveDate::from_ymd_opt(y, mo, d).unwrap(), h * 60 + m)
}

fn monday(h: u32, m: u32) -> Ms {
    at(2026, 10, 19, h, m)
}

/// A week before the Monday everything is booked on.
fn ctx() -> RequestContext {
    RequestContext::new("t", at(2026, 10, 12, 12, 0))
}

struct Seed {
    worker: Ulid,
    service: Ulid,
    customer: Ulid,
}

async fn seed(engine: &Engine) -> Seed {
    let worker = Ulid::new();
    let service = Ulid::new();
    let customer = Ulid::new();
    engine.add_worker(worker, "Ana".into()).await.unwrap();
    engine
        .add_service(Service {
            id: service,
            name: "Haircut".into(),
            is_group: false,
            max_capacity: None,
            min_capacity: None,
            allow_waitlist: false,
        })
        .await
        .unwrap();
    engine
        .register_customer(customer, "Carla".into(), Some("+34 600 000 001".into()))
        .await
        .unwrap();
    Seed {
        worker,
        service,
        customer,
    }
}

async fn group_service(engine: &Engine, max: u32, min: Option<u32>, allow_waitlist: bool) -> Ulid {
    let id = Ulid::new();
    engine
        .add_service(Service {
            id,
            name: "Yoga".into(),
            is_group: true,
            max_capacity: Some(max),
            min_capacity: min,
            allow_waitlist,
        })
        .await
        .unwrap();
    id
}

async fn customer(engine: &Engine, name: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .register_customer(id, name.into(), None)
        .await
        .unwrap();
    id
}

fn request(s: &Seed, start: Ms, end: Ms) -> NewAppointment {
    NewAppointment {
        id: Ulid::new(),
        customer_id: s.customer,
        service_id: s.service,
        worker_id: s.worker,
        span: Span::new(start, end),
        participants: 1,
    }
}

fn group_request(s: &Seed, service: Ulid, customer: Ulid, participants: u32) -> NewAppointment {
    NewAppointment {
        id: Ulid::new(),
        customer_id: customer,
        service_id: service,
        worker_id: s.worker,
        span: Span::new(monday(16, 0), monday(17, 0)),
        participants,
    }
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn booking_is_confirmed_with_reminder() {
    let engine = new_engine("book_confirmed.wal");
    let s = seed(&engine).await;

    let req = request(&s, monday(10, 0), monday(10, 30));
    let id = req.id;
    let outcome = engine.book_appointment(&ctx(), req).await.unwrap();
    assert_eq!(
        outcome,
        BookingOutcome::Created {
            appointment_id: id,
            status: AppointmentStatus::Confirmed
        }
    );

    let appt = engine.get_appointment(id).await.unwrap();
    assert_eq!(appt.tenant_id, "t");
    assert_eq!(appt.current_participants, 1);

    // Default: one day before, at 09:00.
    let reminders = engine.get_reminders(id);
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].scheduled_for, at(2026, 10, 18, 9, 0));
    assert_eq!(reminders[0].days_before, 1);
    assert_eq!(reminders[0].status, ReminderStatus::Pending);
    assert_eq!(reminders[0].customer_id, s.customer);
}

#[tokio::test]
async fn overlapping_booking_conflicts_adjacent_does_not() {
    let engine = new_engine("conflict_half_open.wal");
    let s = seed(&engine).await;

    let first = request(&s, monday(10, 0), monday(10, 30));
    let first_id = first.id;
    engine.book_appointment(&ctx(), first).await.unwrap();

    let overlapping = engine
        .book_appointment(&ctx(), request(&s, monday(10, 15), monday(10, 45)))
        .await;
    assert!(matches!(overlapping, Err(EngineError::SlotConflict(id)) if id == first_id));

    let adjacent = engine
        .book_appointment(&ctx(), request(&s, monday(10, 30), monday(11, 0)))
        .await;
    assert_ok!(adjacent);

    let appts = engine.list_appointments(s.worker, None).await.unwrap();
    assert_eq!(appts.len(), 2);
}

#[tokio::test]
async fn booking_window_rejections_write_nothing() {
    let engine = new_engine("window_rejects.wal");
    let s = seed(&engine).await;

    let sunday = at(2026, 10, 18, 10, 0);
    let r = engine
        .book_appointment(&ctx(), request(&s, sunday, sunday + 30 * MINUTE_MS))
        .await;
    assert!(matches!(r, Err(EngineError::NotWorkingDay)));

    let r = engine
        .book_appointment(&ctx(), request(&s, monday(8, 0), monday(9, 0)))
        .await;
    assert!(matches!(r, Err(EngineError::OutsideWorkingHours)));

    let r = engine
        .book_appointment(&ctx(), request(&s, monday(17, 30), monday(18, 30)))
        .await;
    assert!(matches!(r, Err(EngineError::EndOutsideWorkingHours)));

    assert!(engine.list_appointments(s.worker, None).await.unwrap().is_empty());
    assert_eq!(engine.wal_appends_since_compact().await, 3); // seed only

    // Finishing exactly at closing time is fine.
    assert_ok!(
        engine
            .book_appointment(&ctx(), request(&s, monday(17, 30), monday(18, 0)))
            .await
    );
}

#[tokio::test]
async fn booking_unknown_references_rejected() {
    let engine = new_engine("unknown_refs.wal");
    let s = seed(&engine).await;

    let mut req = request(&s, monday(10, 0), monday(11, 0));
    req.worker_id = Ulid::new();
    let r = engine.book_appointment(&ctx(), req).await;
    assert!(matches!(r, Err(EngineError::NotFound { kind: "worker", .. })));

    let mut req = request(&s, monday(10, 0), monday(11, 0));
    req.customer_id = Ulid::new();
    let r = engine.book_appointment(&ctx(), req).await;
    assert!(matches!(r, Err(EngineError::NotFound { kind: "customer", .. })));

    let mut req = request(&s, monday(10, 0), monday(11, 0));
    req.participants = 2;
    let r = engine.book_appointment(&ctx(), req).await;
    assert!(matches!(r, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn duplicate_appointment_id_rejected() {
    let engine = new_engine("dup_appt.wal");
    let s = seed(&engine).await;

    let req = request(&s, monday(10, 0), monday(11, 0));
    let mut again = request(&s, monday(12, 0), monday(13, 0));
    again.id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();
    let r = engine.book_appointment(&ctx(), again).await;
    assert!(matches!(r, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn concurrent_bookings_for_same_slot_admit_one() {
    let engine = Arc::new(new_engine("concurrent_same_slot.wal"));
    let s = seed(&engine).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let req = request(&s, monday(14, 0), monday(15, 0));
        handles.push(tokio::spawn(async move { engine.book_appointment(&ctx(), req).await }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::SlotConflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn one_id_books_once_across_workers() {
    let engine = new_engine("same_id.wal");
    let s = seed(&engine).await;
    let other = Ulid::new();
    engine.add_worker(other, "Bea".into()).await.unwrap();

    let a = request(&s, monday(10, 0), monday(11, 0));
    let b = NewAppointment {
        worker_id: other,
        ..a.clone()
    };
    let c = ctx();
    let (ra, rb) = tokio::join!(engine.book_appointment(&c, a), engine.book_appointment(&c, b));

    assert_eq!([&ra, &rb].iter().filter(|r| r.is_ok()).count(), 1);
    let loser = if ra.is_ok() { rb } else { ra };
    assert!(matches!(loser, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn waitlist_entry_id_cannot_be_reused() {
    let engine = new_engine("waitlist_id.wal");
    let s = seed(&engine).await;
    let yoga = group_service(&engine, 1, None, true).await;
    let first = customer(&engine, "Dan").await;
    let second = customer(&engine, "Eve").await;

    engine
        .book_appointment(&ctx(), group_request(&s, yoga, first, 1))
        .await
        .unwrap();
    let queued = group_request(&s, yoga, second, 1);
    let outcome = engine.book_appointment(&ctx(), queued.clone()).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::Waitlisted { .. }));

    let again = engine.book_appointment(&ctx(), queued.clone()).await;
    assert!(matches!(again, Err(EngineError::AlreadyExists(id)) if id == queued.id));
    let single = NewAppointment {
        id: queued.id,
        ..request(&s, monday(10, 0), monday(11, 0))
    };
    assert_err!(engine.book_appointment(&ctx(), single).await);
    assert_eq!(engine.get_waitlist(s.worker).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_commit_leaves_no_booking_behind() {
    let mut engine = new_engine("failed_commit.wal");
    let s = seed(&engine).await;

    // A log that accepts everything except writes carrying a reminder.
    let (tx, mut rx) = mpsc::channel(16);
    engine.wal_tx = tx;
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            if let WalCommand::Append { events, response } = cmd {
                let result = if events.iter().any(|e| matches!(e, Event::ReminderQueued { .. })) {
                    Err(io::Error::other("disk full"))
                } else {
                    Ok(())
                };
                let _ = response.send(result);
            }
        }
    });

    let req = request(&s, monday(10, 0), monday(10, 30));
    let id = req.id;
    let r = engine.book_appointment(&ctx(), req).await;
    assert!(matches!(r, Err(EngineError::WalError(_))));
    assert!(engine.get_appointment(id).await.is_none());
    assert!(engine.get_reminders(id).is_empty());
    assert!(engine.list_appointments(s.worker, None).await.unwrap().is_empty());
}

// ── Approval ─────────────────────────────────────────────

#[tokio::test]
async fn pending_appointments_do_not_block_until_confirmed() {
    let engine = new_engine("approval_flow.wal");
    let s = seed(&engine).await;
    engine.update_settings(r#"{"requireApproval":true}"#).await.unwrap();

    let a = request(&s, monday(10, 0), monday(11, 0));
    let b = request(&s, monday(10, 30), monday(11, 30));
    let (a_id, b_id) = (a.id, b.id);

    let outcome = engine.book_appointment(&ctx(), a).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::Created { status: AppointmentStatus::Pending, .. }));
    assert!(engine.get_reminders(a_id).is_empty());

    // Overlaps a pending one: accepted.
    engine.book_appointment(&ctx(), b).await.unwrap();

    engine.confirm_appointment(&ctx(), a_id).await.unwrap();
    assert!(engine.get_appointment(a_id).await.unwrap().is_confirmed());
    assert_eq!(engine.get_reminders(a_id).len(), 1);

    let r = engine.confirm_appointment(&ctx(), b_id).await;
    assert!(matches!(r, Err(EngineError::SlotConflict(id)) if id == a_id));
    assert_eq!(
        engine.get_appointment(b_id).await.unwrap().status,
        AppointmentStatus::Pending
    );

    let again = engine.confirm_appointment(&ctx(), a_id).await;
    assert!(matches!(again, Err(EngineError::InvalidState(_))));
}

// ── Group sessions ───────────────────────────────────────

#[tokio::test]
async fn group_full_session_rejects_without_waitlist() {
    let engine = new_engine("group_full.wal");
    let s = seed(&engine).await;
    let yoga = group_service(&engine, 5, None, false).await;

    engine
        .book_appointment(&ctx(), group_request(&s, yoga, s.customer, 5))
        .await
        .unwrap();

    let late = customer(&engine, "Dora").await;
    let r = engine
        .book_appointment(&ctx(), group_request(&s, yoga, late, 1))
        .await;
    assert!(matches!(
        r,
        Err(EngineError::CapacityExceeded {
            max: 5,
            current: 5,
            requested: 1
        })
    ));
}

#[tokio::test]
async fn group_joins_up_to_capacity() {
    let engine = new_engine("group_join.wal");
    let s = seed(&engine).await;
    let yoga = group_service(&engine, 5, None, false).await;

    let first = engine
        .book_appointment(&ctx(), group_request(&s, yoga, s.customer, 4))
        .await
        .unwrap();
    let session = first.appointment_id().unwrap();

    let other = customer(&engine, "Dora").await;
    let joined = engine
        .book_appointment(&ctx(), group_request(&s, yoga, other, 1))
        .await
        .unwrap();
    assert_eq!(
        joined,
        BookingOutcome::Joined {
            appointment_id: session,
            current_participants: 5,
            status: AppointmentStatus::Confirmed
        }
    );

    let appt = engine.get_appointment(session).await.unwrap();
    assert_eq!(appt.current_participants, 5);
    assert_eq!(appt.attendees.len(), 2);
    // One reminder per attendee.
    assert_eq!(engine.get_reminders(session).len(), 2);
}

#[tokio::test]
async fn group_full_session_waitlists_when_allowed() {
    let engine = new_engine("group_waitlist.wal");
    let s = seed(&engine).await;
    let yoga = group_service(&engine, 2, None, true).await;

    let session = engine
        .book_appointment(&ctx(), group_request(&s, yoga, s.customer, 2))
        .await
        .unwrap()
        .appointment_id()
        .unwrap();

    let late = customer(&engine, "Dora").await;
    let req = group_request(&s, yoga, late, 1);
    let req_id = req.id;
    let outcome = engine.book_appointment(&ctx(), req).await.unwrap();
    assert_eq!(outcome, BookingOutcome::Waitlisted { entry_id: req_id });

    let waitlist = engine.get_waitlist(s.worker).await.unwrap();
    assert_eq!(waitlist.len(), 1);
    assert_eq!(waitlist[0].appointment_id, Some(session));
    assert_eq!(waitlist[0].customer_id, late);
    assert_eq!(engine.get_appointment(session).await.unwrap().current_participants, 2);
}

#[tokio::test]
async fn group_stays_pending_until_minimum() {
    let engine = new_engine("group_minimum.wal");
    let s = seed(&engine).await;
    let yoga = group_service(&engine, 5, Some(3), false).await;

    let first = engine
        .book_appointment(&ctx(), group_request(&s, yoga, s.customer, 1))
        .await
        .unwrap();
    assert!(matches!(first, BookingOutcome::Created { status: AppointmentStatus::Pending, .. }));
    let session = first.appointment_id().unwrap();
    assert!(engine.get_reminders(session).is_empty());

    let other = customer(&engine, "Dora").await;
    let joined = engine
        .book_appointment(&ctx(), group_request(&s, yoga, other, 2))
        .await
        .unwrap();
    assert!(matches!(
        joined,
        BookingOutcome::Joined {
            current_participants: 3,
            status: AppointmentStatus::Confirmed,
            ..
        }
    ));

    // Reaching the minimum reminds everyone already in the session.
    let recipients: Vec<Ulid> = engine
        .get_reminders(session)
        .iter()
        .map(|r| r.customer_id)
        .collect();
    assert_eq!(recipients.len(), 2);
    assert!(recipients.contains(&s.customer));
    assert!(recipients.contains(&other));
}

#[tokio::test]
async fn confirmed_group_session_blocks_single_booking() {
    let engine = new_engine("group_blocks_single.wal");
    let s = seed(&engine).await;
    let yoga = group_service(&engine, 5, None, false).await;

    let session = engine
        .book_appointment(&ctx(), group_request(&s, yoga, s.customer, 1))
        .await
        .unwrap()
        .appointment_id()
        .unwrap();

    let r = engine
        .book_appointment(&ctx(), request(&s, monday(16, 30), monday(17, 30)))
        .await;
    assert!(matches!(r, Err(EngineError::SlotConflict(id)) if id == session));
}

#[tokio::test]
async fn group_service_needs_capacity() {
    let engine = new_engine("group_capacity_validation.wal");
    let missing = Service {
        id: Ulid::new(),
        name: "Yoga".into(),
        is_group: true,
        max_capacity: None,
        min_capacity: None,
        allow_waitlist: false,
    };
    assert_err!(engine.add_service(missing).await);

    let inverted = Service {
        id: Ulid::new(),
        name: "Yoga".into(),
        is_group: true,
        max_capacity: Some(2),
        min_capacity: Some(3),
        allow_waitlist: false,
    };
    assert_err!(engine.add_service(inverted).await);
    assert!(engine.list_services().is_empty());
}

// ── Reminders ────────────────────────────────────────────

#[tokio::test]
async fn cancel_moves_only_pending_reminders() {
    let engine = new_engine("cancel_reminders.wal");
    let s = seed(&engine).await;
    engine
        .update_settings(r#"{"reminders":{"daysBefore":[1,2]}}"#)
        .await
        .unwrap();

    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();
    let reminders = engine.get_reminders(id);
    assert_eq!(reminders.len(), 2);

    // The two-days-before item goes out first.
    let due = engine.collect_due_reminders(at(2026, 10, 17, 9, 0));
    assert_eq!(due.len(), 1);
    engine
        .resolve_reminder(due[0].id, ReminderStatus::Sent, None)
        .await
        .unwrap();

    let cancelled = engine.cancel_appointment(id).await.unwrap();
    assert_eq!(cancelled, 1);

    let statuses: Vec<ReminderStatus> = engine.get_reminders(id).iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ReminderStatus::Sent, ReminderStatus::Cancelled]);
    assert_eq!(
        engine.get_appointment(id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );

    let again = engine.cancel_appointment(id).await;
    assert!(matches!(again, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn no_reminders_when_every_fire_time_passed() {
    let engine = new_engine("reminders_past.wal");
    let s = seed(&engine).await;

    // Twelve hours ahead with a one-day offset: the fire time is already gone.
    let now = monday(10, 0) - 12 * HOUR_MS;
    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine
        .book_appointment(&RequestContext::new("t", now), req)
        .await
        .unwrap();
    assert!(engine.get_reminders(id).is_empty());
}

#[tokio::test]
async fn same_day_reminder_only_if_still_ahead() {
    let engine = new_engine("reminders_same_day.wal");
    let s = seed(&engine).await;
    engine
        .update_settings(r#"{"reminders":{"daysBefore":[0],"defaultTime":"09:00"}}"#)
        .await
        .unwrap();

    let early = request(&s, monday(15, 0), monday(16, 0));
    let early_id = early.id;
    engine
        .book_appointment(&RequestContext::new("t", monday(8, 0)), early)
        .await
        .unwrap();
    assert_eq!(engine.get_reminders(early_id).len(), 1);

    let late = request(&s, monday(16, 0), monday(17, 0));
    let late_id = late.id;
    engine
        .book_appointment(&RequestContext::new("t", monday(9, 30)), late)
        .await
        .unwrap();
    assert!(engine.get_reminders(late_id).is_empty());
}

#[tokio::test]
async fn resolved_reminder_is_terminal() {
    let engine = new_engine("reminder_terminal.wal");
    let s = seed(&engine).await;
    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();

    let item = engine.get_reminders(id).remove(0);
    engine
        .resolve_reminder(item.id, ReminderStatus::Failed, Some("no route".into()))
        .await
        .unwrap();
    let r = engine
        .resolve_reminder(item.id, ReminderStatus::Sent, None)
        .await;
    assert!(matches!(r, Err(EngineError::InvalidState(_))));
    assert_eq!(
        engine.get_reminder(&item.id).unwrap().last_error.as_deref(),
        Some("no route")
    );
}

#[tokio::test]
async fn cancel_pending_reminders_leaves_resolved_ones() {
    let engine = new_engine("cancel_pending.wal");
    let s = seed(&engine).await;
    engine
        .update_settings(r#"{"reminders":{"daysBefore":[1,3]}}"#)
        .await
        .unwrap();
    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();

    let reminders = engine.get_reminders(id);
    assert_eq!(reminders.len(), 2);
    engine
        .resolve_reminder(reminders[0].id, ReminderStatus::Sent, None)
        .await
        .unwrap();

    assert_eq!(engine.cancel_pending_reminders(id).await.unwrap(), 1);
    assert_eq!(engine.cancel_pending_reminders(id).await.unwrap(), 0);
    assert_eq!(engine.get_reminder(&reminders[0].id).unwrap().status, ReminderStatus::Sent);
    assert_eq!(
        engine.get_reminder(&reminders[1].id).unwrap().status,
        ReminderStatus::Cancelled
    );
    // The appointment itself is untouched.
    assert!(engine.get_appointment(id).await.unwrap().is_confirmed());
}

// ── Reschedule / delete ──────────────────────────────────

#[tokio::test]
async fn reschedule_regenerates_reminders() {
    let engine = new_engine("reschedule.wal");
    let s = seed(&engine).await;

    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();

    let tuesday = at(2026, 10, 20, 10, 0);
    engine
        .reschedule_appointment(&ctx(), id, Span::new(tuesday, tuesday + HOUR_MS))
        .await
        .unwrap();

    let appt = engine.get_appointment(id).await.unwrap();
    assert_eq!(appt.span.start, tuesday);

    let reminders = engine.get_reminders(id);
    assert_eq!(reminders.len(), 2);
    assert_eq!(reminders[0].status, ReminderStatus::Cancelled);
    assert_eq!(reminders[0].scheduled_for, at(2026, 10, 18, 9, 0));
    assert_eq!(reminders[1].status, ReminderStatus::Pending);
    assert_eq!(reminders[1].scheduled_for, at(2026, 10, 19, 9, 0));
}

#[tokio::test]
async fn reschedule_into_conflict_changes_nothing() {
    let engine = new_engine("reschedule_conflict.wal");
    let s = seed(&engine).await;

    let a = request(&s, monday(10, 0), monday(11, 0));
    let b = request(&s, monday(12, 0), monday(13, 0));
    let (a_id, b_id) = (a.id, b.id);
    engine.book_appointment(&ctx(), a).await.unwrap();
    engine.book_appointment(&ctx(), b).await.unwrap();

    let r = engine
        .reschedule_appointment(&ctx(), b_id, Span::new(monday(10, 30), monday(11, 30)))
        .await;
    assert!(matches!(r, Err(EngineError::SlotConflict(id)) if id == a_id));

    let b = engine.get_appointment(b_id).await.unwrap();
    assert_eq!(b.span, Span::new(monday(12, 0), monday(13, 0)));
    assert_eq!(engine.get_reminders(b_id)[0].status, ReminderStatus::Pending);

    // Moving within its own span never conflicts with itself.
    assert_ok!(
        engine
            .reschedule_appointment(&ctx(), b_id, Span::new(monday(12, 30), monday(13, 30)))
            .await
    );
}

#[tokio::test]
async fn delete_keeps_reminders_cancelled() {
    let engine = new_engine("delete_appt.wal");
    let s = seed(&engine).await;

    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();

    assert_eq!(engine.delete_appointment(id).await.unwrap(), 1);
    assert!(engine.get_appointment(id).await.is_none());
    let reminders = engine.get_reminders(id);
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].status, ReminderStatus::Cancelled);

    let r = engine.delete_appointment(id).await;
    assert!(matches!(r, Err(EngineError::AppointmentNotFound(_))));
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn worker_with_live_appointments_cannot_be_removed() {
    let engine = new_engine("remove_worker.wal");
    let s = seed(&engine).await;

    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();

    let r = engine.remove_worker(s.worker).await;
    assert!(matches!(r, Err(EngineError::HasAppointments { kind: "worker", .. })));
    assert!(matches!(
        engine.remove_service(s.service).await,
        Err(EngineError::HasAppointments { kind: "service", .. })
    ));
    assert!(matches!(
        engine.remove_customer(s.customer).await,
        Err(EngineError::HasAppointments { kind: "customer", .. })
    ));

    engine.cancel_appointment(id).await.unwrap();
    engine.remove_worker(s.worker).await.unwrap();
    assert!(engine.list_workers().await.is_empty());
    assert!(engine.get_appointment(id).await.is_none());
}

#[tokio::test]
async fn taken_phone_falls_back_to_no_phone() {
    let engine = new_engine("phone_fallback.wal");

    let first = engine
        .register_customer(Ulid::new(), "Carla".into(), Some("+34 600-111-222".into()))
        .await
        .unwrap();
    assert!(!first.phone_dropped);
    assert_eq!(first.customer.phone.as_deref(), Some("+34600111222"));

    let second = engine
        .register_customer(Ulid::new(), "Clara".into(), Some("+34600111222".into()))
        .await
        .unwrap();
    assert!(second.phone_dropped);
    assert_eq!(second.customer.phone, None);
    assert_eq!(engine.list_customers().len(), 2);

    let r = engine
        .register_customer(Ulid::new(), "Nope".into(), Some("n/a".into()))
        .await;
    assert!(matches!(r, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn invalid_settings_leave_previous_in_place() {
    let engine = new_engine("settings_invalid.wal");
    engine
        .update_settings(r#"{"businessName":"Studio","workingDays":["mon","tue"]}"#)
        .await
        .unwrap();

    let r = engine.update_settings(r#"{"workingDays":[9]}"#).await;
    assert!(matches!(r, Err(EngineError::InvalidSettings(_))));
    let r = engine.update_settings("not json").await;
    assert!(matches!(r, Err(EngineError::InvalidSettings(_))));

    let settings = engine.settings();
    assert_eq!(settings.business_name, "Studio");
    assert_eq!(settings.calendar.working_days.len(), 2);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn day_slots_reflect_confirmed_bookings() {
    let engine = new_engine("day_slots.wal");
    let s = seed(&engine).await;
    engine
        .book_appointment(&ctx(), request(&s, monday(10, 0), monday(10, 30)))
        .await
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    let slots = engine.get_day_slots(s.worker, date).await.unwrap();
    assert_eq!(slots.len(), 18); // 09:00 .. 17:30
    let bookable = |t: &str| slots.iter().find(|s| s.time == t).unwrap().bookable;
    assert!(bookable("09:30"));
    assert!(!bookable("10:00"));
    assert!(bookable("10:30"));
    assert!(bookable("17:30"));

    let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
    let closed = engine.get_day_slots(s.worker, sunday).await.unwrap();
    assert!(closed.iter().all(|s| !s.bookable));

    let r = engine.get_day_slots(Ulid::new(), date).await;
    assert!(matches!(r, Err(EngineError::NotFound { kind: "worker", .. })));
}

#[tokio::test]
async fn week_starts_on_configured_day() {
    let engine = new_engine("week.wal");
    let wednesday = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
    let week = engine.get_week(wednesday);
    assert_eq!(week.len(), 7);
    assert_eq!(week[0].0, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
    assert!(week[0].1);
    assert!(!week[6].1); // Sunday
}

#[tokio::test]
async fn listeners_see_worker_events() {
    let engine = new_engine("notify_events.wal");
    let s = seed(&engine).await;
    let mut rx = engine.notify.subscribe(s.worker);

    let req = request(&s, monday(10, 0), monday(11, 0));
    let id = req.id;
    engine.book_appointment(&ctx(), req).await.unwrap();

    match rx.recv().await.unwrap() {
        Event::AppointmentBooked { appointment } => assert_eq!(appointment.id, id),
        other => panic!("unexpected event: {other:?}"),
    }
}

// ── WAL ──────────────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let (s, id, reminder) = {
        let engine = Engine::new("t", path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine.update_settings(r#"{"businessName":"Studio"}"#).await.unwrap();
        let s = seed(&engine).await;
        let req = request(&s, monday(10, 0), monday(11, 0));
        let id = req.id;
        engine.book_appointment(&ctx(), req).await.unwrap();
        let reminder = engine.get_reminders(id)[0].id;
        engine
            .resolve_reminder(reminder, ReminderStatus::Sent, None)
            .await
            .unwrap();
        (s, id, reminder)
    };

    let engine = Engine::new("t", path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.settings().business_name, "Studio");
    assert_eq!(engine.worker_name(&s.worker).await.as_deref(), Some("Ana"));
    assert!(engine.get_service(&s.service).is_some());
    assert!(engine.get_appointment(id).await.unwrap().is_confirmed());
    assert_eq!(engine.get_reminder(&reminder).unwrap().status, ReminderStatus::Sent);

    // The replayed timeline still blocks.
    let r = engine
        .book_appointment(&ctx(), request(&s, monday(10, 30), monday(11, 30)))
        .await;
    assert!(matches!(r, Err(EngineError::SlotConflict(_))));

    // The replayed phone index still rejects duplicates.
    let dup = engine
        .register_customer(Ulid::new(), "Copy".into(), Some("+34600000001".into()))
        .await
        .unwrap();
    assert!(dup.phone_dropped);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let (s, kept, cancelled) = {
        let engine = Engine::new("t", path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let s = seed(&engine).await;
        let a = request(&s, monday(10, 0), monday(11, 0));
        let b = request(&s, monday(12, 0), monday(13, 0));
        let (kept, cancelled) = (a.id, b.id);
        engine.book_appointment(&ctx(), a).await.unwrap();
        engine.book_appointment(&ctx(), b).await.unwrap();
        engine.cancel_appointment(cancelled).await.unwrap();
        engine
            .reschedule_appointment(&ctx(), kept, Span::new(monday(14, 0), monday(15, 0)))
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await > 0);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        (s, kept, cancelled)
    };

    let engine = Engine::new("t", path, Arc::new(NotifyHub::new())).unwrap();
    let appts = engine.list_appointments(s.worker, None).await.unwrap();
    assert_eq!(appts.len(), 2);
    assert_eq!(
        engine.get_appointment(kept).await.unwrap().span,
        Span::new(monday(14, 0), monday(15, 0))
    );
    assert_eq!(
        engine.get_appointment(cancelled).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    // Both fire on the same morning; one from before the move, one after.
    let reminders = engine.get_reminders(kept);
    assert_eq!(reminders.len(), 2);
    let pending = reminders.iter().filter(|r| r.status == ReminderStatus::Pending).count();
    assert_eq!(pending, 1);
    assert_eq!(engine.get_reminders(cancelled)[0].status, ReminderStatus::Cancelled);
}

#[tokio::test]
async fn writes_racing_compaction_survive_restart() {
    let path = test_wal_path("compaction_race.wal");
    let (seeded, late) = {
        let engine = Arc::new(Engine::new("t", path.clone(), Arc::new(NotifyHub::new())).unwrap());
        let s = seed(&engine).await;

        // Compaction stalls on the worker halfway through its snapshot.
        let held = engine.get_worker(&s.worker).unwrap().write_owned().await;
        let compaction = tokio::spawn({
            let engine = engine.clone();
            async move { engine.compact_wal().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let late = Ulid::new();
        let register = tokio::spawn({
            let engine = engine.clone();
            async move { engine.register_customer(late, "Late".into(), None).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(held);

        assert_ok!(compaction.await.unwrap());
        assert_ok!(register.await.unwrap());
        assert!(engine.get_customer(&late).is_some());
        (s.customer, late)
    };

    let engine = Engine::new("t", path, Arc::new(NotifyHub::new())).unwrap();
    assert!(engine.get_customer(&seeded).is_some());
    assert!(engine.get_customer(&late).is_some());
}

#[tokio::test]
async fn writes_after_torn_tail_survive_restart() {
    let path = test_wal_path("torn_recovery.wal");
    let (first, second) = (Ulid::new(), Ulid::new());
    {
        let engine = Engine::new("t", path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine.add_worker(first, "Ana".into()).await.unwrap();
    }
    let mut data = std::fs::read(&path).unwrap();
    data.extend_from_slice(&[1, 2, 3]);
    std::fs::write(&path, &data).unwrap();

    {
        let engine = Engine::new("t", path.clone(), Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(engine.list_workers().await.len(), 1);
        engine.add_worker(second, "Bea".into()).await.unwrap();
    }

    let engine = Engine::new("t", path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.worker_name(&first).await.as_deref(), Some("Ana"));
    assert_eq!(engine.worker_name(&second).await.as_deref(), Some("Bea"));
}

#[tokio::test]
async fn defaults_apply_before_any_settings() {
    let engine = new_engine("defaults.wal");
    assert_eq!(engine.settings(), TenantSettings::default());
    let r = engine.add_worker(Ulid::new(), " ".into()).await;
    assert!(matches!(r, Err(EngineError::InvalidState(_))));
}
