use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;

use crate::{
    auth::new_id,
    config::{ShopConfig, DISCOUNT_VALUE, REDEMPTION_THRESHOLD},
    db,
    error::DomainError,
    loyalty,
    models::{format_instant, parse_instant, AppointmentRow, Status},
    slots,
    state::{AppState, AppointmentPayload, ServerEvent},
};

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub customer_phone: String,
    pub customer_name: String,
    pub service_id: String,
    pub barber_id: String,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default)]
    pub use_loyalty_points: bool,
    #[serde(default)]
    pub observations: Option<String>,
}

/// A booking that passed validation against the current slot list. Commit
/// re-checks the overlap inside the barber's critical section, so the gap
/// between the two can only surface as a `Conflict`.
#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    customer_phone: String,
    customer_name: String,
    service_id: String,
    barber_id: String,
    scheduled_at: NaiveDateTime,
    duration_minutes: i64,
    use_loyalty_points: bool,
    observations: Option<String>,
    status: Status,
}

/// Full booking path: validate, then commit.
pub async fn create_appointment(
    state: &AppState,
    config: &ShopConfig,
    request: BookingRequest,
    walk_in: bool,
) -> Result<AppointmentRow, DomainError> {
    let validated = validate_booking(state, config, request, walk_in).await?;
    commit_booking(state, validated).await
}

/// Checks referential and policy rules and that the requested time is in
/// the availability engine's current output. Walk-ins booked by staff go
/// through the identical checks; they only start out `confirmed`.
pub async fn validate_booking(
    state: &AppState,
    config: &ShopConfig,
    request: BookingRequest,
    walk_in: bool,
) -> Result<ValidatedBooking, DomainError> {
    let customer_phone = request.customer_phone.trim().to_string();
    if customer_phone.is_empty() {
        return Err(DomainError::validation("customer phone is required"));
    }
    let customer_name = request.customer_name.trim().to_string();
    if customer_name.is_empty() {
        return Err(DomainError::validation("customer name is required"));
    }
    let time = NaiveTime::parse_from_str(request.time.trim(), "%H:%M")
        .map_err(|_| DomainError::validation("time must be HH:MM"))?;

    let service = db::fetch_service(&state.db, &request.service_id)
        .await?
        .ok_or(DomainError::NotFound("service"))?;
    if !service.active {
        return Err(DomainError::validation("service is no longer offered"));
    }
    let barber = db::fetch_staff(&state.db, &request.barber_id)
        .await?
        .ok_or(DomainError::NotFound("barber"))?;
    if !barber.active {
        return Err(DomainError::validation("barber is not active"));
    }
    if !db::service_assigned(&state.db, &barber.id, &service.id).await? {
        return Err(DomainError::validation("barber does not offer this service"));
    }

    let open = slots::available_slots_for(
        &state.db,
        config,
        &barber.id,
        request.date,
        service.duration_minutes,
    )
    .await?;
    if !open.contains(&time) {
        return Err(DomainError::validation("requested time is not available"));
    }

    Ok(ValidatedBooking {
        customer_phone,
        customer_name,
        service_id: service.id,
        barber_id: barber.id,
        scheduled_at: request.date.and_time(time),
        duration_minutes: service.duration_minutes,
        use_loyalty_points: request.use_loyalty_points,
        observations: request
            .observations
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        status: if walk_in { Status::Confirmed } else { Status::Pending },
    })
}

/// Inside the barber's critical section and one transaction: re-check the
/// overlap invariant, debit loyalty if redemption was requested, persist.
/// An insufficient balance aborts the whole booking; nothing is debited
/// without the appointment row landing in the same commit.
pub async fn commit_booking(
    state: &AppState,
    booking: ValidatedBooking,
) -> Result<AppointmentRow, DomainError> {
    let _guard = state
        .locks
        .acquire(&format!("barber:{}", booking.barber_id))
        .await?;

    let mut tx = state.db.begin().await?;

    let busy = slots::busy_intervals(&mut *tx, &booking.barber_id, booking.scheduled_at.date()).await?;
    let end = booking.scheduled_at + Duration::minutes(booking.duration_minutes);
    if busy
        .iter()
        .any(|interval| interval.overlaps(booking.scheduled_at, end))
    {
        return Err(DomainError::Conflict);
    }

    loyalty::ensure_profile(&mut tx, &booking.customer_phone, Some(&booking.customer_name)).await?;
    let discount_applied = if booking.use_loyalty_points {
        loyalty::debit(&mut tx, &booking.customer_phone, REDEMPTION_THRESHOLD).await?;
        DISCOUNT_VALUE
    } else {
        0.0
    };

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, customer_phone, customer_name, service_id, barber_id, scheduled_at, status,
            created_at, discount_applied, products_revenue, observations)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
    )
    .bind(&id)
    .bind(&booking.customer_phone)
    .bind(&booking.customer_name)
    .bind(&booking.service_id)
    .bind(&booking.barber_id)
    .bind(format_instant(booking.scheduled_at))
    .bind(booking.status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(discount_applied)
    .bind(&booking.observations)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let row = db::fetch_appointment(&state.db, &id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))?;
    log::info!(
        "booking {} created for {} with {} at {}",
        row.id,
        row.customer_name,
        row.barber_name,
        row.scheduled_at
    );
    state.publish(ServerEvent::BookingCreated {
        appointment: AppointmentPayload::from_row(&row),
    });
    Ok(row)
}

/// Drives the status state machine. Completion persists the final revenue
/// figure and credits loyalty in the same transaction; cancelling a booking
/// that redeemed a discount credits the points back. A second `completed`
/// request fails the legality check, so loyalty is credited exactly once.
pub async fn transition_status(
    state: &AppState,
    appointment_id: &str,
    target: Status,
    products_revenue: Option<f64>,
) -> Result<AppointmentRow, DomainError> {
    let products_revenue = products_revenue.unwrap_or(0.0);
    if products_revenue < 0.0 {
        return Err(DomainError::validation("products revenue must be non-negative"));
    }

    let _guard = state
        .locks
        .acquire(&format!("appointment:{appointment_id}"))
        .await?;

    let mut tx = state.db.begin().await?;

    let current = sqlx::query_as::<_, (String, String, f64)>(
        "SELECT status, customer_phone, discount_applied FROM appointments WHERE id = ?",
    )
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((status, customer_phone, discount_applied)) = current else {
        return Err(DomainError::NotFound("appointment"));
    };
    let current_status = Status::parse(&status)
        .ok_or_else(|| DomainError::validation(format!("stored status '{status}' is invalid")))?;
    if !current_status.can_transition(target) {
        return Err(DomainError::InvalidTransition {
            from: status,
            to: target.as_str().to_string(),
        });
    }

    let mut milestone = None;
    match target {
        Status::Completed => {
            sqlx::query("UPDATE appointments SET status = ?, products_revenue = ? WHERE id = ?")
                .bind(target.as_str())
                .bind(products_revenue)
                .bind(appointment_id)
                .execute(&mut *tx)
                .await?;
            let outcome = loyalty::record_completion(&mut tx, &customer_phone).await?;
            if outcome.crossed_threshold {
                milestone = Some(outcome.points);
            }
        }
        Status::Cancelled => {
            sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
                .bind(target.as_str())
                .bind(appointment_id)
                .execute(&mut *tx)
                .await?;
            // the discount was never realized; give the points back
            if discount_applied > 0.0 {
                let outcome =
                    loyalty::credit(&mut tx, &customer_phone, REDEMPTION_THRESHOLD).await?;
                if outcome.crossed_threshold {
                    milestone = Some(outcome.points);
                }
            }
        }
        Status::Confirmed | Status::Pending => {
            sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
                .bind(target.as_str())
                .bind(appointment_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    let row = db::fetch_appointment(&state.db, appointment_id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))?;
    log::info!("appointment {} moved {} -> {}", row.id, current_status.as_str(), row.status);
    state.publish(ServerEvent::StatusChanged {
        appointment: AppointmentPayload::from_row(&row),
        previous_status: current_status.as_str().to_string(),
    });
    if let Some(points) = milestone {
        state.publish(ServerEvent::LoyaltyMilestone {
            customer_phone,
            points,
        });
    }
    Ok(row)
}

/// Moves an appointment to another barber without touching status or time.
/// The overlap invariant is re-validated against the target schedule.
pub async fn transfer_appointment(
    state: &AppState,
    appointment_id: &str,
    new_barber_id: &str,
) -> Result<AppointmentRow, DomainError> {
    let row = db::fetch_appointment(&state.db, appointment_id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))?;
    if row.barber_id == new_barber_id {
        return Ok(row);
    }

    let barber = db::fetch_staff(&state.db, new_barber_id)
        .await?
        .ok_or(DomainError::NotFound("barber"))?;
    if !barber.active {
        return Err(DomainError::validation("barber is not active"));
    }
    if !db::service_assigned(&state.db, &barber.id, &row.service_id).await? {
        return Err(DomainError::validation("barber does not offer this service"));
    }

    let scheduled_at = parse_instant(&row.scheduled_at)
        .ok_or_else(|| DomainError::validation("stored schedule is invalid"))?;
    let occupies = Status::parse(&row.status).is_some_and(Status::occupies_slot);

    let _guard = state
        .locks
        .acquire(&format!("barber:{new_barber_id}"))
        .await?;

    let mut tx = state.db.begin().await?;
    if occupies {
        let busy = slots::busy_intervals(&mut *tx, new_barber_id, scheduled_at.date()).await?;
        let end = scheduled_at + Duration::minutes(row.duration_minutes);
        if busy.iter().any(|interval| interval.overlaps(scheduled_at, end)) {
            return Err(DomainError::Conflict);
        }
    }
    sqlx::query("UPDATE appointments SET barber_id = ? WHERE id = ?")
        .bind(new_barber_id)
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    db::fetch_appointment(&state.db, appointment_id)
        .await?
        .ok_or(DomainError::NotFound("appointment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::{insert_barber, insert_service, test_state};
    use crate::revenue::{self, AccessScope, RevenueWindow};
    use chrono::{Datelike, Local};

    struct Fixture {
        state: AppState,
        config: ShopConfig,
        service_id: String,
        barber_id: String,
        date: NaiveDate,
    }

    /// First non-closed date at least a week out, so the advance window
    /// never interferes with the scenarios.
    fn next_open_date(config: &ShopConfig, from: NaiveDate) -> NaiveDate {
        let mut date = from;
        while config.is_closed(date) {
            date += Duration::days(1);
        }
        date
    }

    async fn fixture(price: f64, duration: i64) -> Fixture {
        let state = test_state().await;
        let config = ShopConfig::load(&state.db).await.unwrap();
        let service_id = insert_service(&state, "Corte", price, duration).await;
        let barber_id = insert_barber(&state, "Rui", &[service_id.as_str()]).await;
        let date = next_open_date(&config, Local::now().date_naive() + Duration::days(7));
        Fixture {
            state,
            config,
            service_id,
            barber_id,
            date,
        }
    }

    fn request(fx: &Fixture, phone: &str, time: &str, redeem: bool) -> BookingRequest {
        BookingRequest {
            customer_phone: phone.to_string(),
            customer_name: "Ana".to_string(),
            service_id: fx.service_id.clone(),
            barber_id: fx.barber_id.clone(),
            date: fx.date,
            time: time.to_string(),
            use_loyalty_points: redeem,
            observations: None,
        }
    }

    async fn seed_points(state: &AppState, phone: &str, points: i64) {
        let mut conn = state.db.acquire().await.unwrap();
        loyalty::credit(&mut conn, phone, points).await.unwrap();
    }

    async fn points(state: &AppState, phone: &str) -> i64 {
        loyalty::profile(&state.db, phone).await.unwrap().points
    }

    #[tokio::test]
    async fn client_booking_starts_pending_and_is_announced() {
        let fx = fixture(20.0, 30).await;
        let mut rx = fx.state.events.subscribe();

        let row = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", false), false)
            .await
            .unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.discount_applied, 0.0);

        match rx.recv().await.unwrap() {
            ServerEvent::BookingCreated { appointment } => {
                assert_eq!(appointment.id, row.id);
                assert_eq!(appointment.status, "pending");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn walk_in_starts_confirmed_but_validates_the_same() {
        let fx = fixture(20.0, 30).await;
        let row = create_appointment(&fx.state, &fx.config, request(&fx, "912", "11:00", false), true)
            .await
            .unwrap();
        assert_eq!(row.status, "confirmed");

        // a second walk-in on the occupied slot fails validation
        let err = create_appointment(&fx.state, &fx.config, request(&fx, "913", "11:00", false), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn booking_for_unassigned_service_is_rejected() {
        let fx = fixture(20.0, 30).await;
        let other_service = insert_service(&fx.state, "Barba", 10.0, 30).await;
        let mut req = request(&fx, "911", "10:00", false);
        req.service_id = other_service;
        let err = create_appointment(&fx.state, &fx.config, req, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn redemption_debits_ten_points_for_a_twenty_euro_discount() {
        let fx = fixture(25.0, 30).await;
        seed_points(&fx.state, "911", 10).await;

        let row = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", true), false)
            .await
            .unwrap();
        assert_eq!(row.discount_applied, 20.0);
        assert_eq!(points(&fx.state, "911").await, 0);
    }

    #[tokio::test]
    async fn insufficient_balance_aborts_the_whole_booking() {
        let fx = fixture(25.0, 30).await;
        seed_points(&fx.state, "911", 9).await;

        let err = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", true), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientBalance));
        // nothing was debited and the slot is still free
        assert_eq!(points(&fx.state, "911").await, 9);
        let open = slots::available_slots_for(
            &fx.state.db,
            &fx.config,
            &fx.barber_id,
            fx.date,
            30,
        )
        .await
        .unwrap();
        assert!(open.contains(&NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn cancel_refunds_redeemed_points() {
        let fx = fixture(25.0, 30).await;
        seed_points(&fx.state, "911", 10).await;
        let row = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", true), false)
            .await
            .unwrap();
        assert_eq!(points(&fx.state, "911").await, 0);

        transition_status(&fx.state, &row.id, Status::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(points(&fx.state, "911").await, 10);
    }

    #[tokio::test]
    async fn completion_credits_once_and_feeds_revenue() {
        let fx = fixture(20.0, 30).await;
        let row = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", false), false)
            .await
            .unwrap();
        transition_status(&fx.state, &row.id, Status::Confirmed, None)
            .await
            .unwrap();
        let done = transition_status(&fx.state, &row.id, Status::Completed, Some(5.0))
            .await
            .unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.products_revenue, 5.0);

        let profile = loyalty::profile(&fx.state.db, "911").await.unwrap();
        assert_eq!(profile.points, 1);
        assert_eq!(profile.total_completed, 1);

        // a racing second completion is rejected and credits nothing
        let err = transition_status(&fx.state, &row.id, Status::Completed, Some(5.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(points(&fx.state, "911").await, 1);

        // 20 service - 0 discount + 5 products lands in the scheduled
        // month's bucket; the fixture schedules a week ahead so the
        // annual window is the one that sees it
        let annual = revenue::aggregate(
            &fx.state.db,
            RevenueWindow::Annual(fx.date.year()),
            &AccessScope::AllStaff,
        )
        .await
        .unwrap();
        let month_bucket = &annual.buckets[fx.date.month0() as usize];
        assert!((month_bucket.total - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pending_cannot_jump_to_completed() {
        let fx = fixture(20.0, 30).await;
        let row = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", false), false)
            .await
            .unwrap();
        let err = transition_status(&fx.state, &row.id, Status::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn concurrent_commits_leave_exactly_one_winner() {
        let fx = fixture(20.0, 30).await;
        let req_a = request(&fx, "911", "10:00", false);
        let req_b = request(&fx, "922", "10:00", false);

        // both requests validated against the same free slot list, the race
        // resolves at commit time
        let validated_a = validate_booking(&fx.state, &fx.config, req_a, false).await.unwrap();
        let validated_b = validate_booking(&fx.state, &fx.config, req_b, false).await.unwrap();

        let (first, second) = tokio::join!(
            commit_booking(&fx.state, validated_a),
            commit_booking(&fx.state, validated_b),
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        let loser = outcomes
            .iter()
            .find(|outcome| outcome.is_err())
            .unwrap()
            .as_ref()
            .unwrap_err();
        assert!(matches!(loser, DomainError::Conflict));
    }

    #[tokio::test]
    async fn overlap_invariant_holds_for_offset_overlaps() {
        let fx = fixture(20.0, 60).await;
        create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", false), false)
            .await
            .unwrap();

        // the adjacent 11:00 slot is legal
        create_appointment(&fx.state, &fx.config, request(&fx, "922", "11:00", false), false)
            .await
            .unwrap();

        // 10:30 starts inside the 10:00-11:00 hour-long cut
        let err = create_appointment(&fx.state, &fx.config, request(&fx, "933", "10:30", false), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn transfer_checks_target_schedule() {
        let fx = fixture(20.0, 30).await;
        let other = insert_barber(&fx.state, "Zé", &[fx.service_id.as_str()]).await;

        let moved = create_appointment(&fx.state, &fx.config, request(&fx, "911", "10:00", false), false)
            .await
            .unwrap();

        // occupy the same slot on the target barber
        let mut blocking = request(&fx, "922", "10:00", false);
        blocking.barber_id = other.clone();
        create_appointment(&fx.state, &fx.config, blocking, false)
            .await
            .unwrap();

        let err = transfer_appointment(&fx.state, &moved.id, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict));

        // a free slot transfers cleanly and keeps status/time
        let mut free = request(&fx, "933", "12:00", false);
        free.barber_id = fx.barber_id.clone();
        let movable = create_appointment(&fx.state, &fx.config, free, false).await.unwrap();
        let transferred = transfer_appointment(&fx.state, &movable.id, &other).await.unwrap();
        assert_eq!(transferred.barber_id, other);
        assert_eq!(transferred.status, movable.status);
        assert_eq!(transferred.scheduled_at, movable.scheduled_at);
    }
}
