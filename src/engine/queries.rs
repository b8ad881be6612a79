use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar;
use crate::model::*;

use super::availability::{day_slots, SlotInfo};
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_workers(&self) -> Vec<Worker> {
        let handles: Vec<_> = self.workers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for ws in handles {
            let guard = ws.read().await;
            out.push(Worker {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        out.sort_by_key(|w| w.id);
        out
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut out: Vec<Service> = self.services.iter().map(|s| s.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn list_customers(&self) -> Vec<Customer> {
        let mut out: Vec<Customer> = self.customers.iter().map(|c| c.value().clone()).collect();
        out.sort_by_key(|c| c.id);
        out
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|s| s.value().clone())
    }

    pub fn get_customer(&self, id: &Ulid) -> Option<Customer> {
        self.customers.get(id).map(|c| c.value().clone())
    }

    pub async fn worker_name(&self, id: &Ulid) -> Option<String> {
        let ws = self.get_worker(id)?;
        let guard = ws.read().await;
        Some(guard.name.clone())
    }

    /// A worker's appointments in start order, optionally filtered by status.
    pub async fn list_appointments(
        &self,
        worker_id: Ulid,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, EngineError> {
        let ws = self.require_worker(worker_id)?;
        let guard = ws.read().await;
        Ok(guard
            .appointments
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let worker_id = *self.appointment_to_worker.get(&id)?.value();
        let ws = self.get_worker(&worker_id)?;
        let guard = ws.read().await;
        guard.appointment(id).cloned()
    }

    /// Every reminder ever queued for an appointment, in fire order.
    pub fn get_reminders(&self, appointment_id: Ulid) -> Vec<ReminderQueueItem> {
        let Some(ids) = self.reminders_by_appointment.get(&appointment_id) else {
            return Vec::new();
        };
        let mut out: Vec<ReminderQueueItem> = ids
            .iter()
            .filter_map(|id| self.reminders.get(id).map(|r| r.value().clone()))
            .collect();
        out.sort_by_key(|r| (r.scheduled_for, r.customer_id));
        out
    }

    pub fn get_reminder(&self, id: &Ulid) -> Option<ReminderQueueItem> {
        self.reminders.get(id).map(|r| r.value().clone())
    }

    pub async fn get_waitlist(&self, worker_id: Ulid) -> Result<Vec<WaitlistEntry>, EngineError> {
        let ws = self.require_worker(worker_id)?;
        let guard = ws.read().await;
        Ok(guard.waitlist.clone())
    }

    pub async fn get_day_slots(&self, worker_id: Ulid, date: NaiveDate) -> Result<Vec<SlotInfo>, EngineError> {
        let config = self.settings().calendar;
        let ws = self.require_worker(worker_id)?;
        let guard = ws.read().await;
        Ok(day_slots(&guard, date, &config))
    }

    pub fn get_week(&self, date: NaiveDate) -> Vec<(NaiveDate, bool)> {
        calendar::week_days(date, &self.settings().calendar)
    }
}
