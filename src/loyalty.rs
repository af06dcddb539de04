use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    config::{POINTS_PER_COMPLETION, REDEMPTION_THRESHOLD},
    error::DomainError,
    models::LoyaltyRow,
};

/// Result of a credit, with the milestone flag raised exactly when this
/// credit carried the balance across the redemption threshold.
#[derive(Debug, Clone, Copy)]
pub struct CreditOutcome {
    pub points: i64,
    pub crossed_threshold: bool,
}

/// All functions take the caller's connection so loyalty arithmetic joins
/// the appointment ledger's transaction and commits (or rolls back) with it.
pub async fn ensure_profile(
    conn: &mut SqliteConnection,
    customer_phone: &str,
    display_name: Option<&str>,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"INSERT INTO loyalty_profiles (customer_phone, display_name, points, total_completed)
           VALUES (?, ?, 0, 0)
           ON CONFLICT(customer_phone) DO UPDATE SET
             display_name = CASE
               WHEN excluded.display_name != '' THEN excluded.display_name
               ELSE loyalty_profiles.display_name
             END"#,
    )
    .bind(customer_phone)
    .bind(display_name.unwrap_or(""))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn balance(conn: &mut SqliteConnection, customer_phone: &str) -> Result<i64, DomainError> {
    let points =
        sqlx::query_scalar::<_, i64>("SELECT points FROM loyalty_profiles WHERE customer_phone = ?")
            .bind(customer_phone)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(points.unwrap_or(0))
}

pub async fn credit(
    conn: &mut SqliteConnection,
    customer_phone: &str,
    delta: i64,
) -> Result<CreditOutcome, DomainError> {
    if delta <= 0 {
        return Err(DomainError::validation("credit delta must be positive"));
    }
    ensure_profile(conn, customer_phone, None).await?;
    let before = balance(conn, customer_phone).await?;
    let after = before + delta;
    sqlx::query("UPDATE loyalty_profiles SET points = ? WHERE customer_phone = ?")
        .bind(after)
        .bind(customer_phone)
        .execute(&mut *conn)
        .await?;
    Ok(CreditOutcome {
        points: after,
        crossed_threshold: before < REDEMPTION_THRESHOLD && after >= REDEMPTION_THRESHOLD,
    })
}

/// Atomic check-then-subtract; the balance never goes negative.
pub async fn debit(
    conn: &mut SqliteConnection,
    customer_phone: &str,
    delta: i64,
) -> Result<i64, DomainError> {
    if delta <= 0 {
        return Err(DomainError::validation("debit delta must be positive"));
    }
    let before = balance(conn, customer_phone).await?;
    if before < delta {
        return Err(DomainError::InsufficientBalance);
    }
    let after = before - delta;
    sqlx::query("UPDATE loyalty_profiles SET points = ? WHERE customer_phone = ?")
        .bind(after)
        .bind(customer_phone)
        .execute(&mut *conn)
        .await?;
    Ok(after)
}

/// One completed visit: +1 point and the completion counter bump, as a unit
/// inside the caller's transaction.
pub async fn record_completion(
    conn: &mut SqliteConnection,
    customer_phone: &str,
) -> Result<CreditOutcome, DomainError> {
    let outcome = credit(conn, customer_phone, POINTS_PER_COMPLETION).await?;
    sqlx::query(
        "UPDATE loyalty_profiles SET total_completed = total_completed + 1 WHERE customer_phone = ?",
    )
    .bind(customer_phone)
    .execute(&mut *conn)
    .await?;
    Ok(outcome)
}

/// Read-side profile lookup; absent customers read as an empty profile.
pub async fn profile(pool: &SqlitePool, customer_phone: &str) -> Result<LoyaltyRow, DomainError> {
    let row = sqlx::query_as::<_, LoyaltyRow>(
        "SELECT customer_phone, display_name, points, total_completed FROM loyalty_profiles WHERE customer_phone = ?",
    )
    .bind(customer_phone)
    .fetch_optional(pool)
    .await?;
    Ok(row.unwrap_or(LoyaltyRow {
        customer_phone: customer_phone.to_string(),
        display_name: String::new(),
        points: 0,
        total_completed: 0,
    }))
}
