use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::new_id,
    config::{ShopConfig, DISCOUNT_VALUE, REDEMPTION_THRESHOLD},
    db,
    error::DomainError,
    ledger::{self, BookingRequest},
    loyalty,
    models::{MessageRow, ServiceRow, SENDER_CLIENT, SENDER_STAFF},
    slots,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/api")
                .service(web::resource("/services").route(web::get().to(list_services)))
                .service(web::resource("/barbers").route(web::get().to(list_barbers)))
                .service(web::resource("/slots").route(web::get().to(list_slots)))
                .service(web::resource("/appointments").route(web::post().to(create_booking)))
                .service(
                    web::resource("/appointments/{id}/messages")
                        .route(web::get().to(list_messages))
                        .route(web::post().to(post_message)),
                )
                .service(web::resource("/my/appointments").route(web::get().to(my_appointments)))
                .service(web::resource("/my/loyalty").route(web::get().to(my_loyalty)))
                .service(web::resource("/my/profile").route(web::post().to(update_profile))),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse, DomainError> {
    let services = sqlx::query_as::<_, ServiceRow>(
        "SELECT id, name, price, duration_minutes, description, active \
         FROM services WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(services))
}

#[derive(Deserialize)]
struct BarberQuery {
    service_id: Option<String>,
}

/// Public barber listing; credentials and goals never leave the staff table.
#[derive(Serialize, sqlx::FromRow)]
struct BarberSummary {
    id: String,
    display_name: String,
}

async fn list_barbers(
    state: web::Data<AppState>,
    query: web::Query<BarberQuery>,
) -> Result<HttpResponse, DomainError> {
    let barbers = match &query.service_id {
        Some(service_id) if !service_id.is_empty() => {
            sqlx::query_as::<_, BarberSummary>(
                r#"SELECT u.id, u.display_name
                   FROM staff u
                   JOIN staff_services ss ON ss.staff_id = u.id
                   WHERE u.active = 1 AND ss.service_id = ?
                   ORDER BY u.display_name"#,
            )
            .bind(service_id)
            .fetch_all(&state.db)
            .await?
        }
        _ => {
            sqlx::query_as::<_, BarberSummary>(
                "SELECT id, display_name FROM staff WHERE active = 1 ORDER BY display_name",
            )
            .fetch_all(&state.db)
            .await?
        }
    };
    Ok(HttpResponse::Ok().json(barbers))
}

#[derive(Deserialize)]
struct SlotQuery {
    barber_id: String,
    service_id: String,
    date: NaiveDate,
}

async fn list_slots(
    state: web::Data<AppState>,
    query: web::Query<SlotQuery>,
) -> Result<HttpResponse, DomainError> {
    let service = db::fetch_service(&state.db, &query.service_id)
        .await?
        .ok_or(DomainError::NotFound("service"))?;
    let config = ShopConfig::load(&state.db).await?;
    let open = slots::available_slots_for(
        &state.db,
        &config,
        &query.barber_id,
        query.date,
        service.duration_minutes,
    )
    .await?;
    let times: Vec<String> = open
        .iter()
        .map(|time| time.format("%H:%M").to_string())
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "date": query.date,
        "slots": times,
    })))
}

async fn create_booking(
    state: web::Data<AppState>,
    payload: web::Json<BookingRequest>,
) -> Result<HttpResponse, DomainError> {
    let config = ShopConfig::load(&state.db).await?;
    let row = ledger::create_appointment(&state, &config, payload.into_inner(), false).await?;
    Ok(HttpResponse::Created().json(row))
}

#[derive(Deserialize)]
struct PhoneQuery {
    phone: String,
}

async fn my_appointments(
    state: web::Data<AppState>,
    query: web::Query<PhoneQuery>,
) -> Result<HttpResponse, DomainError> {
    let phone = query.phone.trim();
    if phone.is_empty() {
        return Err(DomainError::validation("phone is required"));
    }
    let rows = sqlx::query_as::<_, crate::models::AppointmentRow>(&db::appointment_select(
        "WHERE a.customer_phone = ? ORDER BY a.scheduled_at DESC",
    ))
    .bind(phone)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn my_loyalty(
    state: web::Data<AppState>,
    query: web::Query<PhoneQuery>,
) -> Result<HttpResponse, DomainError> {
    let phone = query.phone.trim();
    if phone.is_empty() {
        return Err(DomainError::validation("phone is required"));
    }
    let profile = loyalty::profile(&state.db, phone).await?;
    Ok(HttpResponse::Ok().json(json!({
        "customer_phone": profile.customer_phone,
        "display_name": profile.display_name,
        "points": profile.points,
        "total_completed": profile.total_completed,
        "redemption_threshold": REDEMPTION_THRESHOLD,
        "discount_value": DISCOUNT_VALUE,
        "can_redeem": profile.points >= REDEMPTION_THRESHOLD,
    })))
}

#[derive(Deserialize)]
struct ProfileInput {
    phone: String,
    display_name: String,
}

async fn update_profile(
    state: web::Data<AppState>,
    payload: web::Json<ProfileInput>,
) -> Result<HttpResponse, DomainError> {
    let phone = payload.phone.trim();
    if phone.is_empty() {
        return Err(DomainError::validation("phone is required"));
    }
    let display_name = payload.display_name.trim();
    if display_name.is_empty() {
        return Err(DomainError::validation("display name is required"));
    }
    let mut conn = state.db.acquire().await?;
    loyalty::ensure_profile(&mut conn, phone, Some(display_name)).await?;
    drop(conn);

    let profile = loyalty::profile(&state.db, phone).await?;
    Ok(HttpResponse::Ok().json(profile))
}

async fn list_messages(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, DomainError> {
    let appointment_id = path.into_inner();
    db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))?;
    let messages = sqlx::query_as::<_, MessageRow>(
        "SELECT id, appointment_id, sender, body, created_at \
         FROM appointment_messages WHERE appointment_id = ? ORDER BY created_at",
    )
    .bind(&appointment_id)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[derive(Deserialize)]
struct MessageInput {
    sender: String,
    body: String,
}

async fn post_message(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MessageInput>,
) -> Result<HttpResponse, DomainError> {
    let appointment_id = path.into_inner();
    let sender = payload.sender.trim();
    if sender != SENDER_CLIENT && sender != SENDER_STAFF {
        return Err(DomainError::validation("sender must be 'client' or 'staff'"));
    }
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(DomainError::validation("message body is required"));
    }

    db::fetch_appointment(&state.db, &appointment_id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))?;

    let id = new_id();
    sqlx::query(
        "INSERT INTO appointment_messages (id, appointment_id, sender, body, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&appointment_id)
    .bind(sender)
    .bind(body)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    let message = sqlx::query_as::<_, MessageRow>(
        "SELECT id, appointment_id, sender, body, created_at FROM appointment_messages WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;
    Ok(HttpResponse::Created().json(message))
}
