use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::calendar;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::retry::{normalize_phone, should_fall_back, RegistrationPlan, RegistrationStep};
use crate::settings::TenantSettings;

use super::conflict::{check_capacity, check_no_conflict, find_group_session, validate_name, validate_span};
use super::{Engine, EngineError, WalCommand};

/// A booking request as it arrives from the outside.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub worker_id: Ulid,
    pub span: Span,
    pub participants: u32,
}

/// Releases a booking id reserved by `claim_booking_id`.
struct IdClaim<'a> {
    ids: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}

/// Result of registering a customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRegistration {
    pub customer: Customer,
    /// The phone number was already taken and the customer was stored without it.
    pub phone_dropped: bool,
}

impl Engine {
    // ── Settings ─────────────────────────────────────────────

    pub async fn update_settings(&self, json: &str) -> Result<TenantSettings, EngineError> {
        let _gate = self.write_gate.read().await;
        if json.len() > MAX_SETTINGS_LEN {
            return Err(EngineError::LimitExceeded("settings document too large"));
        }
        let settings = TenantSettings::from_json(json)?;
        self.persist_shared(&Event::SettingsUpdated {
            settings: settings.clone(),
        })
        .await?;
        info!(tenant = %self.tenant, timezone = %settings.timezone, "settings updated");
        Ok(settings)
    }

    // ── Catalog ──────────────────────────────────────────────

    pub async fn add_worker(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        validate_name(&name)?;
        let _catalog = self.catalog_lock.lock().await;
        if self.workers.len() >= MAX_WORKERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many workers"));
        }
        if self.workers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_shared(&Event::WorkerAdded { id, name }).await
    }

    pub async fn remove_worker(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let ws = self.require_worker(id)?;
        // Held across the append so no booking slips in behind the check.
        let guard = ws.write().await;
        if guard.live_appointment_count() > 0 {
            return Err(EngineError::HasAppointments { kind: "worker", id });
        }
        self.persist_shared(&Event::WorkerRemoved { id }).await?;
        drop(guard);
        Ok(())
    }

    pub async fn add_service(&self, mut service: Service) -> Result<(), EngineError> {
        validate_name(&service.name)?;
        if service.is_group {
            let max = service
                .max_capacity
                .ok_or(EngineError::InvalidState("group services need a max capacity"))?;
            if max == 0 {
                return Err(EngineError::InvalidState("max capacity must be at least 1"));
            }
            if max > MAX_PARTICIPANTS {
                return Err(EngineError::LimitExceeded("max capacity too large"));
            }
            match service.min_capacity {
                Some(0) => service.min_capacity = None,
                Some(min) if min > max => {
                    return Err(EngineError::InvalidState("min capacity exceeds max capacity"));
                }
                _ => {}
            }
        } else {
            service.max_capacity = None;
            service.min_capacity = None;
            service.allow_waitlist = false;
        }

        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.services.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists(service.id));
        }
        self.persist_shared(&Event::ServiceAdded { service }).await
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        self.require_service(id)?;
        if self
            .any_live_appointment(|a| a.service_id == id)
            .await
        {
            return Err(EngineError::HasAppointments { kind: "service", id });
        }
        self.persist_shared(&Event::ServiceRemoved { id }).await
    }

    /// Register a customer, dropping the phone number if another customer
    /// already owns it.
    pub async fn register_customer(
        &self,
        id: Ulid,
        name: String,
        phone: Option<String>,
    ) -> Result<CustomerRegistration, EngineError> {
        validate_name(&name)?;
        let phone = phone.as_deref().map(normalize_phone).transpose()?;

        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.customers.len() >= MAX_CUSTOMERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many customers"));
        }
        if self.customers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut plan = RegistrationPlan::new(phone.is_some());
        let mut last_error = None;
        while let Some(step) = plan.next() {
            let customer = Customer {
                id,
                name: name.clone(),
                phone: match step {
                    RegistrationStep::WithPhone => phone.clone(),
                    RegistrationStep::WithoutPhone => None,
                },
            };
            match self.insert_customer(&customer).await {
                Ok(()) => {
                    return Ok(CustomerRegistration {
                        phone_dropped: phone.is_some() && customer.phone.is_none(),
                        customer,
                    });
                }
                Err(e) if should_fall_back(&e) && plan.remaining() > 0 => {
                    warn!(tenant = %self.tenant, customer = %id, "{e}; registering without phone");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(EngineError::InvalidState("registration plan exhausted")))
    }

    /// Caller holds the catalog lock.
    async fn insert_customer(&self, customer: &Customer) -> Result<(), EngineError> {
        if let Some(phone) = &customer.phone
            && self.phones.contains_key(phone)
        {
            return Err(EngineError::PhoneTaken(phone.clone()));
        }
        self.persist_shared(&Event::CustomerAdded {
            customer: customer.clone(),
        })
        .await
    }

    pub async fn remove_customer(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        self.require_customer(id)?;
        if self
            .any_live_appointment(|a| a.attendees.iter().any(|at| at.customer_id == id))
            .await
        {
            return Err(EngineError::HasAppointments { kind: "customer", id });
        }
        self.persist_shared(&Event::CustomerRemoved { id }).await
    }

    async fn any_live_appointment(&self, pred: impl Fn(&Appointment) -> bool) -> bool {
        let workers: Vec<_> = self.workers.iter().map(|e| e.value().clone()).collect();
        for ws in workers {
            let guard = ws.read().await;
            if guard.appointments.iter().any(|a| a.is_live() && pred(a)) {
                return true;
            }
        }
        false
    }

    // ── Appointments ─────────────────────────────────────────

    /// Validate, check and record a booking. For group services the request
    /// joins the matching session, opens a new one, or lands on the waitlist.
    pub async fn book_appointment(
        &self,
        ctx: &RequestContext,
        req: NewAppointment,
    ) -> Result<BookingOutcome, EngineError> {
        let result = self.try_book(ctx, &req).await;
        match &result {
            Ok(outcome) => {
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => observability::outcome_label(outcome))
                    .increment(1);
                info!(tenant = %ctx.tenant, worker = %req.worker_id, ?outcome, "booking accepted");
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => observability::rejection_label(e))
                    .increment(1);
            }
        }
        result
    }

    async fn try_book(&self, ctx: &RequestContext, req: &NewAppointment) -> Result<BookingOutcome, EngineError> {
        let _gate = self.write_gate.read().await;
        validate_span(&req.span)?;
        if req.participants == 0 {
            return Err(EngineError::InvalidState("participants must be at least 1"));
        }
        if req.participants > MAX_PARTICIPANTS {
            return Err(EngineError::LimitExceeded("too many participants"));
        }
        let service = self.require_service(req.service_id)?;
        self.require_customer(req.customer_id)?;
        if !service.is_group && req.participants > 1 {
            return Err(EngineError::InvalidState("only group services take more than one participant"));
        }
        let _claim = self.claim_booking_id(req.id)?;
        let settings = self.settings();
        calendar::validate_booking_window(&req.span, &settings.calendar)?;

        let ws = self.require_worker(req.worker_id)?;
        let mut guard = ws.write().await;
        if !self.workers.contains_key(&req.worker_id) {
            return Err(EngineError::NotFound {
                kind: "worker",
                id: req.worker_id,
            });
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_WORKER {
            return Err(EngineError::LimitExceeded("too many appointments on worker"));
        }

        if service.is_group {
            self.book_group(ctx, &mut guard, &service, req).await
        } else {
            self.book_single(ctx, &mut guard, req, settings.require_approval).await
        }
    }

    /// Reserve `id` for one in-flight booking. The claim is taken before the
    /// indexes are checked, so of two racing requests only one gets past here.
    fn claim_booking_id(&self, id: Ulid) -> Result<IdClaim<'_>, EngineError> {
        match self.claimed_ids.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let claim = IdClaim {
            ids: &self.claimed_ids,
            id,
        };
        if self.appointment_to_worker.contains_key(&id) || self.waitlist_to_worker.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(claim)
    }

    async fn book_single(
        &self,
        ctx: &RequestContext,
        ws: &mut WorkerState,
        req: &NewAppointment,
        require_approval: bool,
    ) -> Result<BookingOutcome, EngineError> {
        let status = if require_approval {
            AppointmentStatus::Pending
        } else {
            check_no_conflict(ws, &req.span, None)?;
            AppointmentStatus::Confirmed
        };
        let appointment = Appointment {
            id: req.id,
            tenant_id: ctx.tenant.clone(),
            customer_id: req.customer_id,
            service_id: req.service_id,
            worker_id: req.worker_id,
            span: req.span,
            status,
            is_group: false,
            current_participants: 1,
            max_capacity: None,
            attendees: vec![Attendee {
                customer_id: req.customer_id,
                participants: 1,
            }],
        };
        let reminders = self.reminder_events(&appointment, &[req.customer_id], ctx.now);
        self.persist_with_follow_ups(ws, &Event::AppointmentBooked { appointment }, reminders)
            .await?;
        Ok(BookingOutcome::Created {
            appointment_id: req.id,
            status,
        })
    }

    async fn book_group(
        &self,
        ctx: &RequestContext,
        ws: &mut WorkerState,
        service: &Service,
        req: &NewAppointment,
    ) -> Result<BookingOutcome, EngineError> {
        let max = service.max_capacity.unwrap_or(1);
        let meets_minimum = |total: u32| service.min_capacity.is_none_or(|min| total >= min);

        let Some(session) = find_group_session(ws, service.id, &req.span).cloned() else {
            if let Err(full) = check_capacity(max, 0, req.participants) {
                return self.waitlist_or(ws, service, req, None, full).await;
            }
            let status = if meets_minimum(req.participants) {
                check_no_conflict(ws, &req.span, None)?;
                AppointmentStatus::Confirmed
            } else {
                AppointmentStatus::Pending
            };
            let appointment = Appointment {
                id: req.id,
                tenant_id: ctx.tenant.clone(),
                customer_id: req.customer_id,
                service_id: service.id,
                worker_id: req.worker_id,
                span: req.span,
                status,
                is_group: true,
                current_participants: req.participants,
                max_capacity: Some(max),
                attendees: vec![Attendee {
                    customer_id: req.customer_id,
                    participants: req.participants,
                }],
            };
            let reminders = self.reminder_events(&appointment, &[req.customer_id], ctx.now);
            self.persist_with_follow_ups(ws, &Event::AppointmentBooked { appointment }, reminders)
                .await?;
            return Ok(BookingOutcome::Created {
                appointment_id: req.id,
                status,
            });
        };

        let session_max = session.max_capacity.unwrap_or(max);
        if let Err(full) = check_capacity(session_max, session.current_participants, req.participants) {
            return self.waitlist_or(ws, service, req, Some(session.id), full).await;
        }
        let total = session.current_participants + req.participants;
        let status = if session.status == AppointmentStatus::Pending && meets_minimum(total) {
            check_no_conflict(ws, &req.span, Some(session.id))?;
            AppointmentStatus::Confirmed
        } else {
            session.status
        };
        let already_attending = session.attendees.iter().any(|a| a.customer_id == req.customer_id);
        let recipients: Vec<Ulid> = if session.status == AppointmentStatus::Pending {
            // Reaching the minimum confirms the session for everyone on it.
            let mut all: Vec<Ulid> = session.attendees.iter().map(|a| a.customer_id).collect();
            if !already_attending {
                all.push(req.customer_id);
            }
            all
        } else if already_attending {
            Vec::new()
        } else {
            vec![req.customer_id]
        };
        let reminders = self.reminder_events(&Appointment { status, ..session.clone() }, &recipients, ctx.now);
        self.persist_with_follow_ups(
            ws,
            &Event::ParticipantsAdded {
                id: session.id,
                worker_id: req.worker_id,
                customer_id: req.customer_id,
                participants: req.participants,
                status,
            },
            reminders,
        )
        .await?;

        Ok(BookingOutcome::Joined {
            appointment_id: session.id,
            current_participants: total,
            status,
        })
    }

    async fn waitlist_or(
        &self,
        ws: &mut WorkerState,
        service: &Service,
        req: &NewAppointment,
        appointment_id: Option<Ulid>,
        full: EngineError,
    ) -> Result<BookingOutcome, EngineError> {
        if !service.allow_waitlist {
            return Err(full);
        }
        if ws.waitlist.len() >= MAX_WAITLIST_PER_WORKER {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }
        let entry = WaitlistEntry {
            id: req.id,
            appointment_id,
            service_id: service.id,
            worker_id: req.worker_id,
            customer_id: req.customer_id,
            span: req.span,
            participants: req.participants,
        };
        self.persist_on_worker(ws, &Event::Waitlisted { entry }).await?;
        Ok(BookingOutcome::Waitlisted { entry_id: req.id })
    }

    /// Approve a pending appointment. The window and conflict checks run again
    /// since the calendar or the worker's day may have changed meanwhile.
    pub async fn confirm_appointment(&self, ctx: &RequestContext, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let settings = self.settings();
        let mut guard = self.resolve_appointment_write(id).await?;
        let appointment = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))?;
        if appointment.status != AppointmentStatus::Pending {
            return Err(EngineError::InvalidState("only pending appointments can be confirmed"));
        }
        calendar::validate_booking_window(&appointment.span, &settings.calendar)?;
        check_no_conflict(&guard, &appointment.span, Some(id))?;

        let worker_id = appointment.worker_id;
        let confirmed = Appointment {
            status: AppointmentStatus::Confirmed,
            ..appointment
        };
        let recipients: Vec<Ulid> = confirmed.attendees.iter().map(|a| a.customer_id).collect();
        let reminders = self.reminder_events(&confirmed, &recipients, ctx.now);
        self.persist_with_follow_ups(&mut guard, &Event::AppointmentConfirmed { id, worker_id }, reminders)
            .await
    }

    /// Move an appointment to a new span on the same worker. Pending reminders
    /// are cancelled and regenerated from the new start.
    pub async fn reschedule_appointment(
        &self,
        ctx: &RequestContext,
        id: Ulid,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let settings = self.settings();
        calendar::validate_booking_window(&span, &settings.calendar)?;

        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_appointment_write(id).await?;
        let appointment = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))?;
        if !appointment.is_live() {
            return Err(EngineError::InvalidState("cancelled appointments cannot be rescheduled"));
        }
        if appointment.is_confirmed() {
            check_no_conflict(&guard, &span, Some(id))?;
        }

        let worker_id = appointment.worker_id;
        let moved = Appointment { span, ..appointment };
        let recipients: Vec<Ulid> = moved.attendees.iter().map(|a| a.customer_id).collect();

        let _transition = self.reminder_lock.lock().await;
        let mut follow_ups = self.reminder_cancellations(id);
        follow_ups.extend(self.reminder_events(&moved, &recipients, ctx.now));
        self.persist_with_follow_ups(
            &mut guard,
            &Event::AppointmentRescheduled { id, worker_id, span },
            follow_ups,
        )
        .await
    }

    /// Cancel an appointment and every pending reminder it has.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_appointment_write(id).await?;
        let worker_id = guard.id;
        if guard.appointment(id).is_some_and(|a| !a.is_live()) {
            return Err(EngineError::InvalidState("appointment already cancelled"));
        }
        let _transition = self.reminder_lock.lock().await;
        let cancellations = self.reminder_cancellations(id);
        let cancelled = cancellations.len();
        self.persist_with_follow_ups(&mut guard, &Event::AppointmentCancelled { id, worker_id }, cancellations)
            .await?;
        Ok(cancelled)
    }

    /// Remove an appointment outright. Its reminders stay queryable, cancelled.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_appointment_write(id).await?;
        let worker_id = guard.id;
        let _transition = self.reminder_lock.lock().await;
        let cancellations = self.reminder_cancellations(id);
        let cancelled = cancellations.len();
        self.persist_with_follow_ups(&mut guard, &Event::AppointmentDeleted { id, worker_id }, cancellations)
            .await?;
        Ok(cancelled)
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Rewrite the WAL as the minimal event sequence reproducing current state.
    /// Mutations wait on the write gate until the rewritten log is in place, so
    /// nothing acknowledged is left out of the snapshot.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let mut events = vec![Event::SettingsUpdated {
            settings: self.settings(),
        }];
        events.extend(self.services.iter().map(|s| Event::ServiceAdded {
            service: s.value().clone(),
        }));
        events.extend(self.customers.iter().map(|c| Event::CustomerAdded {
            customer: c.value().clone(),
        }));

        let workers: Vec<_> = self.workers.iter().map(|e| e.value().clone()).collect();
        for ws in workers {
            let guard = ws.read().await;
            events.push(Event::WorkerAdded {
                id: guard.id,
                name: guard.name.clone(),
            });
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentBooked {
                appointment: a.clone(),
            }));
            events.extend(guard.waitlist.iter().map(|w| Event::Waitlisted { entry: w.clone() }));
        }

        events.extend(self.reminders.iter().map(|r| Event::ReminderQueued {
            item: r.value().clone(),
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
