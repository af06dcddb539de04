use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::SqlitePool;

use crate::{
    config::{ShopConfig, MIN_ADVANCE_MINUTES},
    error::DomainError,
    models::{format_instant, parse_instant},
};

/// Occupied span of an existing appointment, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusyInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl BusyInterval {
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start < self.end && self.start < end
    }
}

/// Free slots for one barber and date, chronological ascending.
///
/// Starting at `open_time` and stepping by the configured interval, a
/// candidate is kept when the whole service fits before `close_time` (a
/// trailing partial slot is dropped, never truncated), it starts strictly
/// after `now` plus the minimum advance window, and no busy interval
/// overlaps it. Closed dates yield nothing.
pub fn available_slots(
    config: &ShopConfig,
    date: NaiveDate,
    duration_minutes: i64,
    now: NaiveDateTime,
    busy: &[BusyInterval],
) -> Vec<NaiveTime> {
    if config.is_closed(date) || duration_minutes <= 0 {
        return Vec::new();
    }

    let step = Duration::minutes(config.slot_interval_minutes as i64);
    let duration = Duration::minutes(duration_minutes);
    let earliest = now + Duration::minutes(MIN_ADVANCE_MINUTES);
    let close = date.and_time(config.close_time);

    let mut slots = Vec::new();
    let mut start = date.and_time(config.open_time);
    while start + duration <= close {
        let end = start + duration;
        let too_soon = start <= earliest;
        let taken = busy.iter().any(|interval| interval.overlaps(start, end));
        if !too_soon && !taken {
            slots.push(start.time());
        }
        start += step;
    }
    slots
}

/// Occupied spans of a barber's pending/confirmed appointments on `date`.
pub async fn busy_intervals<'e, E>(
    executor: E,
    barber_id: &str,
    date: NaiveDate,
) -> Result<Vec<BusyInterval>, DomainError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let day_start = date.and_time(NaiveTime::MIN);
    let day_end = day_start + Duration::days(1);

    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"SELECT a.scheduled_at, s.duration_minutes
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           WHERE a.barber_id = ?
             AND a.status IN ('pending', 'confirmed')
             AND a.scheduled_at >= ? AND a.scheduled_at < ?"#,
    )
    .bind(barber_id)
    .bind(format_instant(day_start))
    .bind(format_instant(day_end))
    .fetch_all(executor)
    .await?;

    let mut intervals = Vec::with_capacity(rows.len());
    for (scheduled_at, duration_minutes) in rows {
        let Some(start) = parse_instant(&scheduled_at) else {
            log::warn!("skipping appointment with unparseable schedule '{scheduled_at}'");
            continue;
        };
        intervals.push(BusyInterval {
            start,
            end: start + Duration::minutes(duration_minutes),
        });
    }
    Ok(intervals)
}

/// Store-backed entry point: assembles the busy intervals and evaluates the
/// engine against the current wall clock.
pub async fn available_slots_for(
    pool: &SqlitePool,
    config: &ShopConfig,
    barber_id: &str,
    date: NaiveDate,
    duration_minutes: i64,
) -> Result<Vec<NaiveTime>, DomainError> {
    let busy = busy_intervals(pool, barber_id, date).await?;
    Ok(available_slots(
        config,
        date,
        duration_minutes,
        Local::now().naive_local(),
        &busy,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn config(open: (u32, u32), close: (u32, u32), interval: u32) -> ShopConfig {
        let mut config = ShopConfig::shop_default();
        config.open_time = NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap();
        config.close_time = NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap();
        config.slot_interval_minutes = interval;
        config
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // a Monday, with "now" the evening before so the advance window is moot
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()
    }

    fn eve() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 16)
            .unwrap()
            .and_time(t(20, 0))
    }

    #[test]
    fn excludes_booked_slot() {
        let config = config((9, 0), (18, 0), 30);
        let date = monday();
        let busy = [BusyInterval {
            start: date.and_time(t(10, 0)),
            end: date.and_time(t(10, 30)),
        }];

        let slots = available_slots(&config, date, 30, eve(), &busy);
        assert!(slots.contains(&t(9, 0)));
        assert!(slots.contains(&t(9, 30)));
        assert!(!slots.contains(&t(10, 0)));
        assert!(slots.contains(&t(10, 30)));
        assert_eq!(slots.last(), Some(&t(17, 30)));
    }

    #[test]
    fn longer_service_collides_across_the_grid() {
        let config = config((9, 0), (18, 0), 30);
        let date = monday();
        let busy = [BusyInterval {
            start: date.and_time(t(10, 0)),
            end: date.and_time(t(10, 30)),
        }];

        let slots = available_slots(&config, date, 60, eve(), &busy);
        assert!(slots.contains(&t(9, 0)));
        // a 60-minute cut at 09:30 would run into the 10:00 booking
        assert!(!slots.contains(&t(9, 30)));
        assert!(slots.contains(&t(10, 30)));
    }

    #[test]
    fn final_slot_boundary() {
        let config = config((9, 0), (18, 0), 30);
        let date = monday();

        let half_hour = available_slots(&config, date, 30, eve(), &[]);
        assert_eq!(half_hour.last(), Some(&t(17, 30)));

        let full_hour = available_slots(&config, date, 60, eve(), &[]);
        assert_eq!(full_hour.last(), Some(&t(17, 0)));

        // a 45-minute service cannot start at 17:30: the partial slot is
        // dropped rather than truncated
        let partial = available_slots(&config, date, 45, eve(), &[]);
        assert_eq!(partial.last(), Some(&t(17, 0)));
    }

    #[test]
    fn advance_window_applies_today() {
        let config = config((9, 0), (18, 0), 30);
        let date = monday();
        let now = date.and_time(t(9, 30));

        let slots = available_slots(&config, date, 30, now, &[]);
        // now + 60min = 10:30; the first strictly later slot is 11:00
        assert_eq!(slots.first(), Some(&t(11, 0)));
        assert!(!slots.contains(&t(10, 30)));
    }

    #[test]
    fn closed_day_is_empty() {
        let config = config((9, 0), (18, 0), 30);
        let sunday = NaiveDate::from_ymd_opt(2025, 3, 16).unwrap();
        assert!(available_slots(&config, sunday, 30, eve(), &[]).is_empty());
    }

    #[test]
    fn uneven_span_drops_trailing_partial() {
        let config = config((9, 0), (18, 20), 30);
        let date = monday();
        let slots = available_slots(&config, date, 30, eve(), &[]);
        // 18:00 + 30 would pass 18:20
        assert_eq!(slots.last(), Some(&t(17, 30)));
    }
}
