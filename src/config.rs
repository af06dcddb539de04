use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::DomainError;

/// Loyalty policy: one point per completed visit, ten points buy a fixed
/// discount. Consulted by the appointment ledger, not the loyalty ledger.
pub const REDEMPTION_THRESHOLD: i64 = 10;
pub const DISCOUNT_VALUE: f64 = 20.0;
pub const POINTS_PER_COMPLETION: i64 = 1;

/// Bookings must land strictly after now plus this window.
pub const MIN_ADVANCE_MINUTES: i64 = 60;

const TIME_FORMAT: &str = "%H:%M";

/// Shop-wide settings, persisted as the single `shop_config` row. Read by
/// the availability engine and the revenue aggregator, written only through
/// the admin routes; always passed in explicitly.
#[derive(Debug, Clone, Serialize)]
pub struct ShopConfig {
    #[serde(serialize_with = "serialize_time")]
    pub open_time: NaiveTime,
    #[serde(serialize_with = "serialize_time")]
    pub close_time: NaiveTime,
    pub slot_interval_minutes: u32,
    pub monthly_goal: f64,
    pub closed_weekdays: Vec<String>,
}

fn serialize_time<S: serde::Serializer>(value: &NaiveTime, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&value.format(TIME_FORMAT).to_string())
}

/// Admin update payload, validated before it becomes a `ShopConfig`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigInput {
    pub open_time: String,
    pub close_time: String,
    pub slot_interval_minutes: u32,
    pub monthly_goal: f64,
    #[serde(default)]
    pub closed_weekdays: Vec<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ConfigRow {
    open_time: String,
    close_time: String,
    slot_interval_minutes: i64,
    monthly_goal: f64,
    closed_weekdays: String,
}

impl ShopConfig {
    pub fn shop_default() -> Self {
        ShopConfig {
            open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
            slot_interval_minutes: 30,
            monthly_goal: 1500.0,
            closed_weekdays: vec!["sun".to_string()],
        }
    }

    pub fn from_input(input: ConfigInput) -> Result<Self, DomainError> {
        let open_time = parse_time(&input.open_time)?;
        let close_time = parse_time(&input.close_time)?;
        if open_time >= close_time {
            return Err(DomainError::validation("open time must precede close time"));
        }
        if input.slot_interval_minutes == 0 {
            return Err(DomainError::validation("slot interval must be positive"));
        }
        if input.monthly_goal < 0.0 {
            return Err(DomainError::validation("monthly goal must be non-negative"));
        }
        let mut closed_weekdays = Vec::new();
        for day in input.closed_weekdays {
            let day = day.trim().to_lowercase();
            if !WEEKDAY_NAMES.contains(&day.as_str()) {
                return Err(DomainError::validation(format!("unknown weekday '{day}'")));
            }
            if !closed_weekdays.contains(&day) {
                closed_weekdays.push(day);
            }
        }
        Ok(ShopConfig {
            open_time,
            close_time,
            slot_interval_minutes: input.slot_interval_minutes,
            monthly_goal: input.monthly_goal,
            closed_weekdays,
        })
    }

    pub fn is_closed(&self, date: NaiveDate) -> bool {
        let name = weekday_name(date.weekday());
        self.closed_weekdays.iter().any(|day| day == name)
    }

    pub async fn load(pool: &SqlitePool) -> Result<Self, DomainError> {
        let row = sqlx::query_as::<_, ConfigRow>(
            "SELECT open_time, close_time, slot_interval_minutes, monthly_goal, closed_weekdays \
             FROM shop_config WHERE id = 1",
        )
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => Ok(ShopConfig {
                open_time: parse_time(&row.open_time)?,
                close_time: parse_time(&row.close_time)?,
                slot_interval_minutes: row.slot_interval_minutes.max(1) as u32,
                monthly_goal: row.monthly_goal,
                closed_weekdays: row
                    .closed_weekdays
                    .split(',')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            None => Ok(ShopConfig::shop_default()),
        }
    }

    pub async fn save(&self, pool: &SqlitePool) -> Result<(), DomainError> {
        sqlx::query(
            r#"INSERT INTO shop_config (id, open_time, close_time, slot_interval_minutes, monthly_goal, closed_weekdays)
               VALUES (1, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 open_time = excluded.open_time,
                 close_time = excluded.close_time,
                 slot_interval_minutes = excluded.slot_interval_minutes,
                 monthly_goal = excluded.monthly_goal,
                 closed_weekdays = excluded.closed_weekdays"#,
        )
        .bind(self.open_time.format(TIME_FORMAT).to_string())
        .bind(self.close_time.format(TIME_FORMAT).to_string())
        .bind(self.slot_interval_minutes as i64)
        .bind(self.monthly_goal)
        .bind(self.closed_weekdays.join(","))
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn ensure_seeded(pool: &SqlitePool) -> Result<(), DomainError> {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shop_config WHERE id = 1")
            .fetch_one(pool)
            .await?;
        if exists == 0 {
            ShopConfig::shop_default().save(pool).await?;
        }
        Ok(())
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, DomainError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|_| DomainError::validation(format!("'{value}' is not a valid HH:MM time")))
}
