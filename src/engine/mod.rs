mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod reminders;
#[cfg(test)]
mod tests;

pub use availability::{day_slots, merge_overlapping, subtract_intervals, SlotInfo};
pub use conflict::check_capacity;
pub use error::EngineError;
pub use mutations::{CustomerRegistration, NewAppointment};
pub use reminders::reminder_times;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::calendar;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::settings::TenantSettings;
use crate::wal::Wal;

pub type SharedWorkerState = Arc<RwLock<WorkerState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events of one mutation; written and acknowledged together.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends that queue up while a flush is in
/// progress are written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch: Vec<PendingAppend> = Vec::new();
        let mut deferred = None;
        match cmd {
            WalCommand::Append { events, response } => batch.push((events, response)),
            other => deferred = Some(other),
        }

        while deferred.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => deferred = Some(other),
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
            let started = std::time::Instant::now();
            let result = write_batch(&mut wal, &batch);
            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            for (_, tx) in batch {
                let _ = tx.send(match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                });
            }
        }

        match deferred {
            Some(WalCommand::Compact { events, response }) => {
                let _ = response.send(wal.compact(&events));
            }
            Some(WalCommand::AppendsSinceCompact { response }) => {
                let _ = response.send(wal.appends_since_compact());
            }
            Some(WalCommand::Append { .. }) | None => {}
        }
    }
}

fn write_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes never leak into
    // the next batch; the whole batch is reported as failed either way.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

pub struct Engine {
    pub tenant: String,
    pub workers: DashMap<Ulid, SharedWorkerState>,
    pub(super) services: DashMap<Ulid, Service>,
    pub(super) customers: DashMap<Ulid, Customer>,
    /// Normalised phone → customer id.
    pub(super) phones: DashMap<String, Ulid>,
    pub(super) settings: std::sync::RwLock<TenantSettings>,
    /// Appointment id → worker id.
    pub(super) appointment_to_worker: DashMap<Ulid, Ulid>,
    pub(super) reminders: DashMap<Ulid, ReminderQueueItem>,
    pub(super) reminders_by_appointment: DashMap<Ulid, Vec<Ulid>>,
    /// Serialises reminder status transitions (dispatcher vs. cancellation).
    pub(super) reminder_lock: Mutex<()>,
    /// Waitlist entry id → worker id.
    pub(super) waitlist_to_worker: DashMap<Ulid, Ulid>,
    /// Booking ids of requests still in flight.
    pub(super) claimed_ids: DashMap<Ulid, ()>,
    /// Serialises catalog writes so uniqueness checks hold.
    pub(super) catalog_lock: Mutex<()>,
    /// Held shared by every mutation from its first check to its last append,
    /// exclusively by compaction. Taken before any other engine lock.
    pub(super) write_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(tenant: &str, wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            tenant: tenant.to_string(),
            workers: DashMap::new(),
            services: DashMap::new(),
            customers: DashMap::new(),
            phones: DashMap::new(),
            settings: std::sync::RwLock::new(TenantSettings::default()),
            appointment_to_worker: DashMap::new(),
            reminders: DashMap::new(),
            reminders_by_appointment: DashMap::new(),
            reminder_lock: Mutex::new(()),
            waitlist_to_worker: DashMap::new(),
            claimed_ids: DashMap::new(),
            catalog_lock: Mutex::new(()),
            write_gate: RwLock::new(()),
            wal_tx,
            notify,
        };

        // We are the sole owner of every Arc during replay, so try_write always
        // succeeds. Never block here: replay may run inside the async runtime.
        for event in &events {
            match event.worker_id() {
                Some(worker_id) if !matches!(event, Event::WorkerAdded { .. } | Event::WorkerRemoved { .. }) => {
                    if let Some(entry) = engine.workers.get(&worker_id) {
                        let ws = entry.value().clone();
                        drop(entry);
                        match ws.try_write() {
                            Ok(mut guard) => engine.apply_to_worker(&mut guard, event),
                            Err(_) => debug!("replay: worker {worker_id} busy, skipping {}", event.kind()),
                        }
                    }
                }
                _ => engine.apply_shared(event),
            }
        }
        debug!(tenant, events = events.len(), "replayed WAL");

        Ok(engine)
    }

    /// Apply a timeline event to a worker (caller holds the lock).
    fn apply_to_worker(&self, ws: &mut WorkerState, event: &Event) {
        match event {
            Event::AppointmentBooked { appointment } => {
                self.appointment_to_worker.insert(appointment.id, ws.id);
                ws.insert_appointment(appointment.clone());
            }
            Event::ParticipantsAdded {
                id,
                customer_id,
                participants,
                status,
                ..
            } => {
                if let Some(a) = ws.appointment_mut(*id) {
                    a.current_participants += participants;
                    a.status = *status;
                    match a.attendees.iter_mut().find(|at| at.customer_id == *customer_id) {
                        Some(at) => at.participants += participants,
                        None => a.attendees.push(Attendee {
                            customer_id: *customer_id,
                            participants: *participants,
                        }),
                    }
                }
            }
            Event::AppointmentConfirmed { id, .. } => {
                if let Some(a) = ws.appointment_mut(*id) {
                    a.status = AppointmentStatus::Confirmed;
                }
            }
            Event::AppointmentRescheduled { id, span, .. } => {
                if let Some(mut a) = ws.remove_appointment(*id) {
                    a.span = *span;
                    ws.insert_appointment(a);
                }
            }
            Event::AppointmentCancelled { id, .. } => {
                if let Some(a) = ws.appointment_mut(*id) {
                    a.status = AppointmentStatus::Cancelled;
                }
            }
            Event::AppointmentDeleted { id, .. } => {
                ws.remove_appointment(*id);
                self.appointment_to_worker.remove(id);
            }
            Event::Waitlisted { entry } => {
                self.waitlist_to_worker.insert(entry.id, ws.id);
                ws.waitlist.push(entry.clone());
            }
            _ => {}
        }
    }

    /// Apply an event that does not live on a worker timeline.
    fn apply_shared(&self, event: &Event) {
        match event {
            Event::SettingsUpdated { settings } => {
                *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings.clone();
            }
            Event::WorkerAdded { id, name } => {
                self.workers
                    .insert(*id, Arc::new(RwLock::new(WorkerState::new(*id, name.clone()))));
            }
            Event::WorkerRemoved { id } => {
                self.workers.remove(id);
                self.appointment_to_worker.retain(|_, worker| worker != id);
                self.waitlist_to_worker.retain(|_, worker| worker != id);
            }
            Event::ServiceAdded { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceRemoved { id } => {
                self.services.remove(id);
            }
            Event::CustomerAdded { customer } => {
                if let Some(phone) = &customer.phone {
                    self.phones.insert(phone.clone(), customer.id);
                }
                self.customers.insert(customer.id, customer.clone());
            }
            Event::CustomerRemoved { id } => {
                if let Some((_, c)) = self.customers.remove(id)
                    && let Some(phone) = c.phone
                {
                    self.phones.remove(&phone);
                }
            }
            Event::ReminderQueued { item } => {
                self.reminders_by_appointment
                    .entry(item.appointment_id)
                    .or_default()
                    .push(item.id);
                self.reminders.insert(item.id, item.clone());
            }
            Event::ReminderResolved { id, status, error } => {
                if let Some(mut item) = self.reminders.get_mut(id) {
                    item.status = *status;
                    item.last_error = error.clone();
                }
            }
            _ => {}
        }
    }

    /// Write events to the WAL via the background group-commit writer. They
    /// share one acknowledgement.
    pub(super) async fn wal_append(&self, events: &[Event]) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events: events.to_vec(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify for timeline events. Caller holds the worker lock.
    pub(super) async fn persist_on_worker(&self, ws: &mut WorkerState, event: &Event) -> Result<(), EngineError> {
        self.persist_with_follow_ups(ws, event, Vec::new()).await
    }

    /// Commit a timeline event together with the reminder events it implies.
    /// Nothing is applied unless the whole group is durable.
    pub(super) async fn persist_with_follow_ups(
        &self,
        ws: &mut WorkerState,
        event: &Event,
        follow_ups: Vec<Event>,
    ) -> Result<(), EngineError> {
        let mut events = Vec::with_capacity(1 + follow_ups.len());
        events.push(event.clone());
        events.extend(follow_ups);
        self.wal_append(&events).await?;
        self.apply_to_worker(ws, event);
        self.notify.send(ws.id, event);
        for follow_up in &events[1..] {
            self.apply_shared(follow_up);
            reminders::record_reminder_event(follow_up);
        }
        Ok(())
    }

    /// WAL-append + apply + notify for everything else.
    pub(super) async fn persist_shared(&self, event: &Event) -> Result<(), EngineError> {
        self.persist_shared_all(std::slice::from_ref(event)).await
    }

    pub(super) async fn persist_shared_all(&self, events: &[Event]) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }
        self.wal_append(events).await?;
        for event in events {
            self.apply_shared(event);
            if let Some(worker_id) = event.worker_id() {
                self.notify.send(worker_id, event);
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> TenantSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Context for a request arriving now, in the tenant's local time.
    pub fn context(&self) -> RequestContext {
        let tz = self.settings.read().unwrap_or_else(PoisonError::into_inner).tz();
        RequestContext::new(self.tenant.clone(), calendar::local_now(tz))
    }

    pub fn get_worker(&self, id: &Ulid) -> Option<SharedWorkerState> {
        self.workers.get(id).map(|e| e.value().clone())
    }

    pub(super) fn require_worker(&self, id: Ulid) -> Result<SharedWorkerState, EngineError> {
        self.get_worker(&id)
            .ok_or(EngineError::NotFound { kind: "worker", id })
    }

    pub(super) fn require_service(&self, id: Ulid) -> Result<Service, EngineError> {
        self.services
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound { kind: "service", id })
    }

    pub(super) fn require_customer(&self, id: Ulid) -> Result<Customer, EngineError> {
        self.customers
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::NotFound { kind: "customer", id })
    }

    /// Lookup appointment → worker, acquire the worker's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<WorkerState>, EngineError> {
        let worker_id = self
            .appointment_to_worker
            .get(&appointment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::AppointmentNotFound(appointment_id))?;
        let ws = self
            .get_worker(&worker_id)
            .ok_or(EngineError::AppointmentNotFound(appointment_id))?;
        let guard = ws.write_owned().await;
        if guard.appointment(appointment_id).is_none() {
            return Err(EngineError::AppointmentNotFound(appointment_id));
        }
        Ok(guard)
    }
}
