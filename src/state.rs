use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::DomainError;
use crate::models::AppointmentRow;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Bound on critical-section waits; expiry surfaces a retryable error
/// instead of hanging the caller.
const LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
    pub locks: KeyedLocks,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        AppState {
            db,
            events,
            locks: KeyedLocks::default(),
        }
    }

    /// Fire-and-forget publish; a send error only means nobody is listening.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AppointmentPayload {
    pub id: String,
    pub customer_phone: String,
    pub customer_name: String,
    pub service_id: String,
    pub service_name: String,
    pub barber_id: String,
    pub barber_name: String,
    pub scheduled_at: String,
    pub status: String,
}

impl AppointmentPayload {
    pub fn from_row(row: &AppointmentRow) -> Self {
        AppointmentPayload {
            id: row.id.clone(),
            customer_phone: row.customer_phone.clone(),
            customer_name: row.customer_name.clone(),
            service_id: row.service_id.clone(),
            service_name: row.service_name.clone(),
            barber_id: row.barber_id.clone(),
            barber_name: row.barber_name.clone(),
            scheduled_at: row.scheduled_at.clone(),
            status: row.status.clone(),
        }
    }
}

/// Lifecycle events, delivered at-least-once to every subscribed observer.
/// Events for one appointment are published in commit order because the
/// publisher still holds that appointment's critical section.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerEvent {
    BookingCreated {
        appointment: AppointmentPayload,
    },
    StatusChanged {
        appointment: AppointmentPayload,
        previous_status: String,
    },
    LoyaltyMilestone {
        customer_phone: String,
        points: i64,
    },
}

impl ServerEvent {
    pub fn appointment_id(&self) -> Option<&str> {
        match self {
            ServerEvent::BookingCreated { appointment }
            | ServerEvent::StatusChanged { appointment, .. } => Some(&appointment.id),
            ServerEvent::LoyaltyMilestone { .. } => None,
        }
    }
}

/// One exclusive critical section per string key (`barber:{id}` for booking
/// commits, `appointment:{id}` for status transitions).
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    pub async fn acquire(&self, key: &str) -> Result<OwnedMutexGuard<()>, DomainError> {
        let slot = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(key.to_string()).or_default().clone()
        };
        tokio::time::timeout(LOCK_WAIT, slot.lock_owned())
            .await
            .map_err(|_| DomainError::Busy)
    }
}
