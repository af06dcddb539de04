use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_validator, hash_password, new_id},
    config::{ConfigInput, ShopConfig},
    db::{self, ServiceDeleteOutcome},
    error::DomainError,
    ledger,
    models::ServiceRow,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(web::resource("/services/{id}").route(web::put().to(update_service)))
            .service(web::resource("/services/{id}/delete").route(web::post().to(delete_service)))
            .service(
                web::resource("/barbers")
                    .route(web::get().to(list_barbers))
                    .route(web::post().to(create_barber)),
            )
            .service(web::resource("/barbers/{id}").route(web::put().to(update_barber)))
            .service(
                web::resource("/appointments/{id}/transfer")
                    .route(web::post().to(transfer_appointment)),
            )
            .service(
                web::resource("/config")
                    .route(web::get().to(get_config))
                    .route(web::post().to(update_config)),
            ),
    );
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse, DomainError> {
    let services = sqlx::query_as::<_, ServiceRow>(
        "SELECT id, name, price, duration_minutes, description, active FROM services ORDER BY name",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(services))
}

#[derive(Deserialize)]
struct ServiceInput {
    name: String,
    price: f64,
    duration_minutes: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

fn validate_service(input: &ServiceInput) -> Result<(), DomainError> {
    if input.name.trim().is_empty() {
        return Err(DomainError::validation("service name is required"));
    }
    if input.price < 0.0 {
        return Err(DomainError::validation("price must be non-negative"));
    }
    if input.duration_minutes <= 0 {
        return Err(DomainError::validation("duration must be positive"));
    }
    Ok(())
}

async fn create_service(
    state: web::Data<AppState>,
    payload: web::Json<ServiceInput>,
) -> Result<HttpResponse, DomainError> {
    validate_service(&payload)?;
    let id = new_id();
    sqlx::query(
        "INSERT INTO services (id, name, price, duration_minutes, description, active) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(payload.name.trim())
    .bind(payload.price)
    .bind(payload.duration_minutes)
    .bind(&payload.description)
    .bind(payload.active)
    .execute(&state.db)
    .await?;

    let service = db::fetch_service(&state.db, &id)
        .await?
        .ok_or(DomainError::NotFound("service"))?;
    Ok(HttpResponse::Created().json(service))
}

async fn update_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ServiceInput>,
) -> Result<HttpResponse, DomainError> {
    let service_id = path.into_inner();
    validate_service(&payload)?;
    db::fetch_service(&state.db, &service_id)
        .await?
        .ok_or(DomainError::NotFound("service"))?;

    sqlx::query(
        "UPDATE services SET name = ?, price = ?, duration_minutes = ?, description = ?, active = ? \
         WHERE id = ?",
    )
    .bind(payload.name.trim())
    .bind(payload.price)
    .bind(payload.duration_minutes)
    .bind(&payload.description)
    .bind(payload.active)
    .bind(&service_id)
    .execute(&state.db)
    .await?;

    let service = db::fetch_service(&state.db, &service_id)
        .await?
        .ok_or(DomainError::NotFound("service"))?;
    Ok(HttpResponse::Ok().json(service))
}

async fn delete_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, DomainError> {
    let outcome = db::delete_service(&state.db, &path.into_inner()).await?;
    let result = match outcome {
        ServiceDeleteOutcome::Deleted => "deleted",
        ServiceDeleteOutcome::Retired => "retired",
    };
    Ok(HttpResponse::Ok().json(json!({ "result": result })))
}

#[derive(Deserialize)]
struct BarberInput {
    username: String,
    display_name: String,
    password: Option<String>,
    #[serde(default)]
    is_admin: bool,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    monthly_goal: Option<f64>,
    /// Absent means keep current assignments (on create: the whole catalog).
    #[serde(default)]
    service_ids: Option<Vec<String>>,
}

#[derive(serde::Serialize)]
struct BarberDetail {
    id: String,
    username: String,
    display_name: String,
    is_admin: bool,
    active: bool,
    monthly_goal: Option<f64>,
    service_ids: Vec<String>,
}

async fn barber_detail(state: &AppState, staff_id: &str) -> Result<BarberDetail, DomainError> {
    let staff = db::fetch_staff(&state.db, staff_id)
        .await?
        .ok_or(DomainError::NotFound("barber"))?;
    let service_ids = sqlx::query_scalar::<_, String>(
        "SELECT service_id FROM staff_services WHERE staff_id = ?",
    )
    .bind(staff_id)
    .fetch_all(&state.db)
    .await?;
    Ok(BarberDetail {
        id: staff.id,
        username: staff.username,
        display_name: staff.display_name,
        is_admin: staff.is_admin,
        active: staff.active,
        monthly_goal: staff.monthly_goal,
        service_ids,
    })
}

async fn list_barbers(state: web::Data<AppState>) -> Result<HttpResponse, DomainError> {
    let ids = sqlx::query_scalar::<_, String>("SELECT id FROM staff ORDER BY display_name")
        .fetch_all(&state.db)
        .await?;
    let mut barbers = Vec::with_capacity(ids.len());
    for id in ids {
        barbers.push(barber_detail(&state, &id).await?);
    }
    Ok(HttpResponse::Ok().json(barbers))
}

async fn replace_assignments(
    state: &AppState,
    staff_id: &str,
    service_ids: &[String],
) -> Result<(), DomainError> {
    sqlx::query("DELETE FROM staff_services WHERE staff_id = ?")
        .bind(staff_id)
        .execute(&state.db)
        .await?;
    for service_id in service_ids {
        db::fetch_service(&state.db, service_id)
            .await?
            .ok_or(DomainError::NotFound("service"))?;
        sqlx::query("INSERT OR IGNORE INTO staff_services (staff_id, service_id) VALUES (?, ?)")
            .bind(staff_id)
            .bind(service_id)
            .execute(&state.db)
            .await?;
    }
    Ok(())
}

async fn create_barber(
    state: web::Data<AppState>,
    payload: web::Json<BarberInput>,
) -> Result<HttpResponse, DomainError> {
    let input = payload.into_inner();
    let username = input.username.trim().to_string();
    if username.is_empty() {
        return Err(DomainError::validation("username is required"));
    }
    if input.display_name.trim().is_empty() {
        return Err(DomainError::validation("display name is required"));
    }
    let password = input
        .password
        .as_deref()
        .filter(|password| !password.is_empty())
        .ok_or_else(|| DomainError::validation("password is required"))?;

    let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM staff WHERE username = ?")
        .bind(&username)
        .fetch_one(&state.db)
        .await?;
    if taken > 0 {
        return Err(DomainError::validation("username is already taken"));
    }

    let password_hash =
        hash_password(password).map_err(|_| DomainError::validation("password hash failed"))?;
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO staff (id, username, display_name, password_hash, is_admin, active, monthly_goal, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&username)
    .bind(input.display_name.trim())
    .bind(&password_hash)
    .bind(input.is_admin)
    .bind(input.active)
    .bind(input.monthly_goal)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    let service_ids = match input.service_ids {
        Some(ids) => ids,
        None => {
            sqlx::query_scalar::<_, String>("SELECT id FROM services WHERE active = 1")
                .fetch_all(&state.db)
                .await?
        }
    };
    replace_assignments(&state, &id, &service_ids).await?;

    Ok(HttpResponse::Created().json(barber_detail(&state, &id).await?))
}

async fn update_barber(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<BarberInput>,
) -> Result<HttpResponse, DomainError> {
    let staff_id = path.into_inner();
    let input = payload.into_inner();
    let existing = db::fetch_staff(&state.db, &staff_id)
        .await?
        .ok_or(DomainError::NotFound("barber"))?;

    let username = input.username.trim().to_string();
    if username.is_empty() {
        return Err(DomainError::validation("username is required"));
    }
    if input.display_name.trim().is_empty() {
        return Err(DomainError::validation("display name is required"));
    }
    if username != existing.username {
        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM staff WHERE username = ?")
            .bind(&username)
            .fetch_one(&state.db)
            .await?;
        if taken > 0 {
            return Err(DomainError::validation("username is already taken"));
        }
    }

    let password_hash = match input.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            hash_password(password).map_err(|_| DomainError::validation("password hash failed"))?
        }
        None => existing.password_hash,
    };

    sqlx::query(
        r#"UPDATE staff SET username = ?, display_name = ?, password_hash = ?, is_admin = ?, active = ?, monthly_goal = ?
           WHERE id = ?"#,
    )
    .bind(&username)
    .bind(input.display_name.trim())
    .bind(&password_hash)
    .bind(input.is_admin)
    .bind(input.active)
    .bind(input.monthly_goal)
    .bind(&staff_id)
    .execute(&state.db)
    .await?;

    if let Some(service_ids) = input.service_ids {
        replace_assignments(&state, &staff_id, &service_ids).await?;
    }

    Ok(HttpResponse::Ok().json(barber_detail(&state, &staff_id).await?))
}

#[derive(Deserialize)]
struct TransferInput {
    barber_id: String,
}

async fn transfer_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<TransferInput>,
) -> Result<HttpResponse, DomainError> {
    let row =
        ledger::transfer_appointment(&state, &path.into_inner(), &payload.barber_id).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, DomainError> {
    let config = ShopConfig::load(&state.db).await?;
    Ok(HttpResponse::Ok().json(config))
}

async fn update_config(
    state: web::Data<AppState>,
    payload: web::Json<ConfigInput>,
) -> Result<HttpResponse, DomainError> {
    let config = ShopConfig::from_input(payload.into_inner())?;
    config.save(&state.db).await?;
    Ok(HttpResponse::Ok().json(config))
}
