use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const SENDER_CLIENT: &str = "client";
pub const SENDER_STAFF: &str = "staff";

/// Appointment instants are naive local time, `YYYY-MM-DDTHH:MM:SS`. The
/// format sorts lexicographically, so day-range queries bind plain strings.
pub const INSTANT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_instant(value: NaiveDateTime) -> String {
    value.format(INSTANT_FORMAT).to_string()
}

pub fn parse_instant(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, INSTANT_FORMAT).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Status> {
        match value {
            "pending" => Some(Status::Pending),
            "confirmed" => Some(Status::Confirmed),
            "completed" => Some(Status::Completed),
            "cancelled" => Some(Status::Cancelled),
            _ => None,
        }
    }

    /// `pending -> confirmed|cancelled`, `confirmed -> completed|cancelled`.
    /// `completed` and `cancelled` are terminal.
    pub fn can_transition(self, target: Status) -> bool {
        matches!(
            (self, target),
            (Status::Pending, Status::Confirmed)
                | (Status::Pending, Status::Cancelled)
                | (Status::Confirmed, Status::Completed)
                | (Status::Confirmed, Status::Cancelled)
        )
    }

    /// Whether an appointment in this state blocks its slot.
    pub fn occupies_slot(self) -> bool {
        matches!(self, Status::Pending | Status::Confirmed)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub duration_minutes: i64,
    pub description: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StaffRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub active: bool,
    pub monthly_goal: Option<f64>,
    pub created_at: String,
}

/// Appointment joined with its service and barber, the shape every read path
/// uses.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub customer_phone: String,
    pub customer_name: String,
    pub service_id: String,
    pub barber_id: String,
    pub scheduled_at: String,
    pub status: String,
    pub created_at: String,
    pub discount_applied: f64,
    pub products_revenue: f64,
    pub observations: Option<String>,
    pub service_name: String,
    pub price: f64,
    pub duration_minutes: i64,
    pub barber_name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LoyaltyRow {
    pub customer_phone: String,
    pub display_name: String,
    pub points: i64,
    pub total_completed: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MessageRow {
    pub id: String,
    pub appointment_id: String,
    pub sender: String,
    pub body: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_matrix() {
        assert!(Status::Pending.can_transition(Status::Confirmed));
        assert!(Status::Pending.can_transition(Status::Cancelled));
        assert!(Status::Confirmed.can_transition(Status::Completed));
        assert!(Status::Confirmed.can_transition(Status::Cancelled));

        assert!(!Status::Pending.can_transition(Status::Completed));
        assert!(!Status::Confirmed.can_transition(Status::Pending));
        for from in [Status::Completed, Status::Cancelled] {
            for to in [
                Status::Pending,
                Status::Confirmed,
                Status::Completed,
                Status::Cancelled,
            ] {
                assert!(!from.can_transition(to), "{from:?} -> {to:?} must be illegal");
            }
        }
    }

    #[test]
    fn status_round_trip() {
        for status in [
            Status::Pending,
            Status::Confirmed,
            Status::Completed,
            Status::Cancelled,
        ] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert_eq!(Status::parse("declined"), None);
    }

    #[test]
    fn instant_round_trip() {
        let parsed = parse_instant("2025-03-14T09:30:00").unwrap();
        assert_eq!(format_instant(parsed), "2025-03-14T09:30:00");
        assert!(parse_instant("2025-03-14 09:30").is_none());
    }
}
