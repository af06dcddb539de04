use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{error::DomainError, models::parse_instant};

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Fev", "Mar", "Abr", "Mai", "Jun", "Jul", "Ago", "Set", "Out", "Nov", "Dez",
];

/// Reporting window: the trailing n days ending today, or one calendar year.
#[derive(Debug, Clone, Copy)]
pub enum RevenueWindow {
    RecentDays(u32),
    Annual(i32),
}

/// Whose appointments a report covers. Non-admin staff are always pinned to
/// their own id no matter what they ask for.
#[derive(Debug, Clone)]
pub enum AccessScope {
    AllStaff,
    Staff(String),
}

impl AccessScope {
    pub fn for_caller(is_admin: bool, caller_id: &str, requested: Option<String>) -> AccessScope {
        if !is_admin {
            return AccessScope::Staff(caller_id.to_string());
        }
        match requested {
            Some(id) if !id.is_empty() => AccessScope::Staff(id),
            _ => AccessScope::AllStaff,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueBucket {
    pub label: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueReport {
    pub total: f64,
    pub today: f64,
    pub current_month: f64,
    pub current_month_products: f64,
    pub buckets: Vec<RevenueBucket>,
}

/// One completed appointment as the aggregator sees it. `revenue` is the
/// final figure (service price minus discount, plus products) captured at
/// completion time and keyed by the scheduled instant.
#[derive(Debug, Clone, Copy)]
pub struct CompletedVisit {
    pub scheduled_at: NaiveDateTime,
    pub revenue: f64,
    pub products: f64,
}

/// Folds completed visits into the window's buckets. The headline figures
/// (`today`, `current_month`) are computed over every visit regardless of
/// the window, so a daily report still carries the month-to-date totals.
pub fn bucketize(visits: &[CompletedVisit], window: RevenueWindow, today: NaiveDate) -> RevenueReport {
    let mut buckets = match window {
        RevenueWindow::RecentDays(days) => (0..days)
            .rev()
            .map(|offset| RevenueBucket {
                label: (today - Duration::days(offset as i64))
                    .format("%d/%m")
                    .to_string(),
                total: 0.0,
            })
            .collect::<Vec<_>>(),
        RevenueWindow::Annual(_) => MONTH_LABELS
            .iter()
            .map(|label| RevenueBucket {
                label: (*label).to_string(),
                total: 0.0,
            })
            .collect(),
    };

    let mut today_total = 0.0;
    let mut month_total = 0.0;
    let mut month_products = 0.0;

    for visit in visits {
        let date = visit.scheduled_at.date();
        if date == today {
            today_total += visit.revenue;
        }
        if date.year() == today.year() && date.month() == today.month() {
            month_total += visit.revenue;
            month_products += visit.products;
        }
        match window {
            RevenueWindow::RecentDays(days) => {
                let offset = (today - date).num_days();
                if offset >= 0 && (offset as u32) < days {
                    let index = (days as i64 - 1 - offset) as usize;
                    buckets[index].total += visit.revenue;
                }
            }
            RevenueWindow::Annual(year) => {
                if date.year() == year {
                    buckets[date.month0() as usize].total += visit.revenue;
                }
            }
        }
    }

    RevenueReport {
        total: buckets.iter().map(|bucket| bucket.total).sum(),
        today: today_total,
        current_month: month_total,
        current_month_products: month_products,
        buckets,
    }
}

/// Loads every completed appointment in scope and buckets it against the
/// current local date. Rows whose stored schedule fails to parse are logged
/// and skipped rather than poisoning the whole report.
pub async fn aggregate(
    pool: &SqlitePool,
    window: RevenueWindow,
    scope: &AccessScope,
) -> Result<RevenueReport, DomainError> {
    let base = r#"SELECT a.scheduled_at, s.price - a.discount_applied + a.products_revenue, a.products_revenue
                  FROM appointments a
                  JOIN services s ON a.service_id = s.id
                  WHERE a.status = 'completed'"#;
    let rows: Vec<(String, f64, f64)> = match scope {
        AccessScope::AllStaff => {
            sqlx::query_as(base).fetch_all(pool).await?
        }
        AccessScope::Staff(barber_id) => {
            sqlx::query_as(&format!("{base} AND a.barber_id = ?"))
                .bind(barber_id)
                .fetch_all(pool)
                .await?
        }
    };

    let mut visits = Vec::with_capacity(rows.len());
    for (scheduled_at, revenue, products) in rows {
        let Some(instant) = parse_instant(&scheduled_at) else {
            log::warn!("skipping completed appointment with unparseable schedule '{scheduled_at}'");
            continue;
        };
        visits.push(CompletedVisit {
            scheduled_at: instant,
            revenue,
            products,
        });
    }
    Ok(bucketize(&visits, window, Local::now().date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn visit(date: NaiveDate, revenue: f64, products: f64) -> CompletedVisit {
        CompletedVisit {
            scheduled_at: date.and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
            revenue,
            products,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn daily_buckets_run_oldest_first() {
        let today = d(2025, 3, 17);
        let visits = [
            visit(today, 25.0, 5.0),
            visit(today - Duration::days(1), 15.0, 0.0),
            visit(today - Duration::days(13), 10.0, 0.0),
            // outside the window
            visit(today - Duration::days(14), 99.0, 0.0),
        ];

        let report = bucketize(&visits, RevenueWindow::RecentDays(14), today);
        assert_eq!(report.buckets.len(), 14);
        assert_eq!(report.buckets[0].label, "03/03");
        assert_eq!(report.buckets[0].total, 10.0);
        assert_eq!(report.buckets[12].total, 15.0);
        assert_eq!(report.buckets[13].label, "17/03");
        assert_eq!(report.buckets[13].total, 25.0);
        assert_eq!(report.total, 50.0);
        assert_eq!(report.today, 25.0);
    }

    #[test]
    fn annual_buckets_sum_by_month() {
        let today = d(2025, 3, 17);
        let visits = [
            visit(d(2025, 1, 5), 20.0, 0.0),
            visit(d(2025, 1, 20), 30.0, 0.0),
            visit(d(2025, 3, 1), 25.0, 5.0),
            // wrong year
            visit(d(2024, 3, 1), 99.0, 0.0),
        ];

        let report = bucketize(&visits, RevenueWindow::Annual(2025), today);
        assert_eq!(report.buckets.len(), 12);
        assert_eq!(report.buckets[0].label, "Jan");
        assert_eq!(report.buckets[0].total, 50.0);
        assert_eq!(report.buckets[2].label, "Mar");
        assert_eq!(report.buckets[2].total, 25.0);
        assert_eq!(report.total, 75.0);
        assert_eq!(report.current_month, 25.0);
        assert_eq!(report.current_month_products, 5.0);
    }

    #[test]
    fn headline_figures_ignore_the_window() {
        let today = d(2025, 3, 17);
        let visits = [visit(today, 25.0, 5.0)];

        // an annual report for another year still carries today's totals
        let report = bucketize(&visits, RevenueWindow::Annual(2024), today);
        assert_eq!(report.total, 0.0);
        assert_eq!(report.today, 25.0);
        assert_eq!(report.current_month, 25.0);
    }

    #[test]
    fn non_admins_are_pinned_to_their_own_scope() {
        let scope = AccessScope::for_caller(false, "barber-1", Some("barber-2".to_string()));
        assert!(matches!(scope, AccessScope::Staff(id) if id == "barber-1"));

        let scope = AccessScope::for_caller(true, "admin", Some("barber-2".to_string()));
        assert!(matches!(scope, AccessScope::Staff(id) if id == "barber-2"));

        let scope = AccessScope::for_caller(true, "admin", None);
        assert!(matches!(scope, AccessScope::AllStaff));
    }
}
