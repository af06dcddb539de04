use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{staff_validator, AuthUser},
    config::ShopConfig,
    db,
    error::DomainError,
    ledger::{self, BookingRequest},
    models::{AppointmentRow, Status},
    revenue::{self, AccessScope, RevenueWindow},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/staff")
            .wrap(HttpAuthentication::basic(staff_validator))
            .service(
                web::resource("/appointments")
                    .route(web::get().to(list_appointments))
                    .route(web::post().to(create_walk_in)),
            )
            .service(
                web::resource("/appointments/{id}/status").route(web::post().to(update_status)),
            )
            .service(web::resource("/revenue").route(web::get().to(revenue_report)))
            .service(web::resource("/goal").route(web::post().to(set_goal))),
    );
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<String>,
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse, DomainError> {
    let status = match query.status.as_deref() {
        Some(value) if !value.is_empty() => Some(
            Status::parse(value)
                .ok_or_else(|| DomainError::validation(format!("unknown status '{value}'")))?,
        ),
        _ => None,
    };

    let rows = match (auth.is_admin, status) {
        (true, Some(status)) => {
            sqlx::query_as::<_, AppointmentRow>(&db::appointment_select(
                "WHERE a.status = ? ORDER BY a.scheduled_at",
            ))
            .bind(status.as_str())
            .fetch_all(&state.db)
            .await?
        }
        (true, None) => {
            sqlx::query_as::<_, AppointmentRow>(&db::appointment_select(
                "ORDER BY a.scheduled_at",
            ))
            .fetch_all(&state.db)
            .await?
        }
        (false, Some(status)) => {
            sqlx::query_as::<_, AppointmentRow>(&db::appointment_select(
                "WHERE a.barber_id = ? AND a.status = ? ORDER BY a.scheduled_at",
            ))
            .bind(&auth.id)
            .bind(status.as_str())
            .fetch_all(&state.db)
            .await?
        }
        (false, None) => {
            sqlx::query_as::<_, AppointmentRow>(&db::appointment_select(
                "WHERE a.barber_id = ? ORDER BY a.scheduled_at",
            ))
            .bind(&auth.id)
            .fetch_all(&state.db)
            .await?
        }
    };
    Ok(HttpResponse::Ok().json(rows))
}

/// Walk-in booked at the counter. The phone is optional because walk-in
/// customers often have no profile; bookings still validate like any other
/// and start out confirmed.
#[derive(Deserialize)]
struct WalkInInput {
    customer_phone: Option<String>,
    customer_name: String,
    service_id: String,
    barber_id: Option<String>,
    date: NaiveDate,
    time: String,
    #[serde(default)]
    use_loyalty_points: bool,
    #[serde(default)]
    observations: Option<String>,
}

const WALK_IN_PHONE: &str = "000000000";

async fn create_walk_in(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    payload: web::Json<WalkInInput>,
) -> Result<HttpResponse, DomainError> {
    let input = payload.into_inner();
    let barber_id = input.barber_id.unwrap_or_else(|| auth.id.clone());
    if !auth.is_admin && barber_id != auth.id {
        return Err(DomainError::Forbidden);
    }

    let request = BookingRequest {
        customer_phone: input
            .customer_phone
            .filter(|phone| !phone.trim().is_empty())
            .unwrap_or_else(|| WALK_IN_PHONE.to_string()),
        customer_name: input.customer_name,
        service_id: input.service_id,
        barber_id,
        date: input.date,
        time: input.time,
        use_loyalty_points: input.use_loyalty_points,
        observations: input.observations,
    };
    let config = ShopConfig::load(&state.db).await?;
    let row = ledger::create_appointment(&state, &config, request, true).await?;
    Ok(HttpResponse::Created().json(row))
}

#[derive(Deserialize)]
struct StatusInput {
    status: String,
    products_revenue: Option<f64>,
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    payload: web::Json<StatusInput>,
) -> Result<HttpResponse, DomainError> {
    let appointment_id = path.into_inner();
    let target = Status::parse(payload.status.trim())
        .ok_or_else(|| DomainError::validation(format!("unknown status '{}'", payload.status)))?;

    let row = db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))?;
    if !auth.is_admin && row.barber_id != auth.id {
        return Err(DomainError::Forbidden);
    }

    let updated =
        ledger::transition_status(&state, &appointment_id, target, payload.products_revenue)
            .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[derive(Deserialize)]
struct RevenueQuery {
    period: Option<String>,
    barber_id: Option<String>,
    year: Option<i32>,
}

async fn revenue_report(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<RevenueQuery>,
) -> Result<HttpResponse, DomainError> {
    let today = Local::now().date_naive();
    let window = match query.period.as_deref() {
        Some("annual") => RevenueWindow::Annual(query.year.unwrap_or_else(|| today.year())),
        Some("recent") | None => RevenueWindow::RecentDays(14),
        Some(other) => {
            return Err(DomainError::validation(format!("unknown period '{other}'")));
        }
    };
    let scope = AccessScope::for_caller(auth.is_admin, &auth.id, query.barber_id.clone());

    let config = ShopConfig::load(&state.db).await?;
    // per-barber goal override beats the shop-wide default
    let monthly_goal = match &scope {
        AccessScope::Staff(barber_id) => db::fetch_staff(&state.db, barber_id)
            .await?
            .and_then(|staff| staff.monthly_goal)
            .unwrap_or(config.monthly_goal),
        AccessScope::AllStaff => config.monthly_goal,
    };

    let report = revenue::aggregate(&state.db, window, &scope).await?;
    Ok(HttpResponse::Ok().json(json!({
        "monthly_goal": monthly_goal,
        "total": report.total,
        "today": report.today,
        "current_month": report.current_month,
        "current_month_products": report.current_month_products,
        "buckets": report.buckets,
    })))
}

#[derive(Deserialize)]
struct GoalInput {
    monthly_goal: Option<f64>,
}

/// Staff set (or clear) their own goal override; the shop-wide default
/// lives in the admin config.
async fn set_goal(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    payload: web::Json<GoalInput>,
) -> Result<HttpResponse, DomainError> {
    if let Some(goal) = payload.monthly_goal {
        if goal < 0.0 {
            return Err(DomainError::validation("monthly goal must be non-negative"));
        }
    }
    sqlx::query("UPDATE staff SET monthly_goal = ? WHERE id = ?")
        .bind(payload.monthly_goal)
        .bind(&auth.id)
        .execute(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "monthly_goal": payload.monthly_goal })))
}
