use actix_web::{http::header, web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{
    auth::staff_validator,
    state::{AppState, ServerEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/staff/events")
            .wrap(HttpAuthentication::basic(staff_validator))
            .route(web::get().to(stream_events)),
    )
    .service(
        web::resource("/api/appointments/{id}/events")
            .route(web::get().to(stream_appointment_events)),
    );
}

/// Firehose of lifecycle events for staff dashboards.
async fn stream_events(state: web::Data<AppState>) -> HttpResponse {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event))),
        Err(_) => None,
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

/// Public stream filtered to one appointment, so a waiting customer can
/// watch their own booking move through the state machine.
async fn stream_appointment_events(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let appointment_id = path.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            Err(_) => return None,
        };
        if event.appointment_id() != Some(appointment_id.as_str()) {
            return None;
        }
        Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event)))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &ServerEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}
