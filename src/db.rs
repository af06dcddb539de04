use std::{env, fs, path::Path};

use chrono::{Local, Utc};
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    config::ShopConfig,
    error::DomainError,
    models::{format_instant, AppointmentRow, ServiceRow, StaffRow},
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), DomainError> {
    ShopConfig::ensure_seeded(pool).await?;
    let service_ids = seed_services(pool).await?;
    seed_admin(pool, &service_ids).await?;
    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<Vec<String>, DomainError> {
    let existing = sqlx::query_scalar::<_, String>("SELECT id FROM services")
        .fetch_all(pool)
        .await?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let catalog: [(&str, f64, i64, &str); 3] = [
        ("Corte", 15.0, 30, "Corte clássico na tesoura e máquina"),
        ("Barba", 10.0, 30, "Barba alinhada com toalha quente"),
        ("Corte + Barba", 25.0, 60, "Pacote completo de corte e barba"),
    ];

    let mut ids = Vec::new();
    for (name, price, duration, description) in catalog {
        let id = new_id();
        sqlx::query(
            r#"INSERT INTO services (id, name, price, duration_minutes, description, active)
               VALUES (?, ?, ?, ?, ?, 1)"#,
        )
        .bind(&id)
        .bind(name)
        .bind(price)
        .bind(duration)
        .bind(description)
        .execute(pool)
        .await?;
        ids.push(id);
    }
    Ok(ids)
}

async fn seed_admin(pool: &SqlitePool, service_ids: &[String]) -> Result<(), DomainError> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM staff WHERE is_admin = 1")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name = env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Master Admin".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| DomainError::validation("password hash failed"))?;
    let id = new_id();

    sqlx::query(
        r#"INSERT INTO staff (id, username, display_name, password_hash, is_admin, active, monthly_goal, created_at)
           VALUES (?, ?, ?, ?, 1, 1, NULL, ?)"#,
    )
    .bind(&id)
    .bind(username)
    .bind(display_name)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    // a fresh staff member starts assigned to the whole catalog
    for service_id in service_ids {
        sqlx::query("INSERT OR IGNORE INTO staff_services (staff_id, service_id) VALUES (?, ?)")
            .bind(&id)
            .bind(service_id)
            .execute(pool)
            .await?;
    }

    Ok(())
}

const APPOINTMENT_SELECT: &str = r#"
SELECT a.id, a.customer_phone, a.customer_name, a.service_id, a.barber_id,
       a.scheduled_at, a.status, a.created_at, a.discount_applied,
       a.products_revenue, a.observations,
       s.name AS service_name, s.price, s.duration_minutes,
       u.display_name AS barber_name
FROM appointments a
JOIN services s ON a.service_id = s.id
JOIN staff u ON a.barber_id = u.id
"#;

pub fn appointment_select(suffix: &str) -> String {
    format!("{APPOINTMENT_SELECT} {suffix}")
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<Option<AppointmentRow>, DomainError> {
    let row = sqlx::query_as::<_, AppointmentRow>(&appointment_select("WHERE a.id = ? LIMIT 1"))
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn fetch_service(
    pool: &SqlitePool,
    service_id: &str,
) -> Result<Option<ServiceRow>, DomainError> {
    let row = sqlx::query_as::<_, ServiceRow>(
        "SELECT id, name, price, duration_minutes, description, active FROM services WHERE id = ?",
    )
    .bind(service_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn fetch_staff(pool: &SqlitePool, staff_id: &str) -> Result<Option<StaffRow>, DomainError> {
    let row = sqlx::query_as::<_, StaffRow>(
        r#"SELECT id, username, display_name, password_hash, is_admin, active, monthly_goal, created_at
           FROM staff WHERE id = ?"#,
    )
    .bind(staff_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn service_assigned(
    pool: &SqlitePool,
    staff_id: &str,
    service_id: &str,
) -> Result<bool, DomainError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM staff_services WHERE staff_id = ? AND service_id = ?",
    )
    .bind(staff_id)
    .bind(service_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ServiceDeleteOutcome {
    /// No appointment ever referenced the service; the row is gone.
    Deleted,
    /// Historical appointments reference it, so it was deactivated instead.
    Retired,
}

/// Removing a service still referenced by an upcoming booking is refused;
/// one referenced only by history is retired so revenue stays reconstructible.
pub async fn delete_service(
    pool: &SqlitePool,
    service_id: &str,
) -> Result<ServiceDeleteOutcome, DomainError> {
    if fetch_service(pool, service_id).await?.is_none() {
        return Err(DomainError::NotFound("service"));
    }

    let now = format_instant(Local::now().naive_local());
    let upcoming = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM appointments
           WHERE service_id = ? AND status IN ('pending', 'confirmed') AND scheduled_at >= ?"#,
    )
    .bind(service_id)
    .bind(&now)
    .fetch_one(pool)
    .await?;
    if upcoming > 0 {
        return Err(DomainError::validation(
            "service has upcoming appointments and cannot be removed",
        ));
    }

    let referenced = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM appointments WHERE service_id = ?",
    )
    .bind(service_id)
    .fetch_one(pool)
    .await?;

    if referenced > 0 {
        sqlx::query("UPDATE services SET active = 0 WHERE id = ?")
            .bind(service_id)
            .execute(pool)
            .await?;
        return Ok(ServiceDeleteOutcome::Retired);
    }

    sqlx::query("DELETE FROM staff_services WHERE service_id = ?")
        .bind(service_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(service_id)
        .execute(pool)
        .await?;
    Ok(ServiceDeleteOutcome::Deleted)
}


#[cfg(test)]
mod tests {
    use super::test_util::{insert_barber, insert_service, test_state};
    use super::*;
    use crate::error::DomainError;

    #[tokio::test]
    async fn delete_service_policy() {
        let state = test_state().await;
        let unreferenced = insert_service(&state, "Risco", 5.0, 15).await;
        assert_eq!(
            delete_service(&state.db, &unreferenced).await.unwrap(),
            ServiceDeleteOutcome::Deleted
        );

        let booked = insert_service(&state, "Corte", 20.0, 30).await;
        let barber = insert_barber(&state, "Rui", &[booked.as_str()]).await;

        // future pending appointment blocks removal
        let future = chrono::Local::now().naive_local() + chrono::Duration::days(30);
        sqlx::query(
            r#"INSERT INTO appointments (id, customer_phone, customer_name, service_id, barber_id, scheduled_at, status, created_at)
               VALUES ('a1', '911', 'Ana', ?, ?, ?, 'pending', ?)"#,
        )
        .bind(&booked)
        .bind(&barber)
        .bind(format_instant(future))
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&state.db)
        .await
        .unwrap();
        assert!(matches!(
            delete_service(&state.db, &booked).await,
            Err(DomainError::Validation(_))
        ));

        // once only history references it, the service is retired
        sqlx::query("UPDATE appointments SET status = 'cancelled' WHERE id = 'a1'")
            .execute(&state.db)
            .await
            .unwrap();
        assert_eq!(
            delete_service(&state.db, &booked).await.unwrap(),
            ServiceDeleteOutcome::Retired
        );
        let active =
            sqlx::query_scalar::<_, bool>("SELECT active FROM services WHERE id = ?")
                .bind(&booked)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert!(!active);
    }

    #[tokio::test]
    async fn missing_service_is_not_found() {
        let state = test_state().await;
        assert!(matches!(
            delete_service(&state.db, "nope").await,
            Err(DomainError::NotFound("service"))
        ));
    }
}
