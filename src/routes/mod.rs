pub mod intake;
pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Intake
        .route("/api/v1/videos", post(intake::submit_video))
        // Queue overview
        .route("/api/v1/status", get(queue::status))
        .route("/api/v1/queue/today", get(queue::today))
        .route("/api/v1/queue/pass", post(queue::run_pass))
        // Records
        .route(
            "/api/v1/records/{id}",
            get(queue::get_record).patch(queue::edit_record),
        )
        .route("/api/v1/records/{id}/requeue", post(queue::requeue))
}
