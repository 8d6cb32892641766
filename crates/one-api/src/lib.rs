//! one-api — REST API for multi-staging environments.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/repos?filter=` | Branches of every catalog repository |
//! | POST | `/api/stagings` | Create an environment |
//! | GET | `/api/stagings` | List environments |
//! | GET | `/api/stagings/{name}` | Environment details |
//! | DELETE | `/api/stagings/{name}[?delete_secret=]` | Delete an environment |
//! | GET | `/api/stagings/{name}/pipelines/status` | CI job statuses |
//! | POST | `/api/stagings/{name}/pipelines/{repo}` | Re-trigger one project's CI job |
//! | GET | `/healthz` | Liveness |

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use one_lifecycle::EnvironmentLifecycle;

pub use auth::{AuthError, Authenticator, Caller};
pub use error::{ApiError, status_for};
pub use handlers::{ApiResponse, EnvironmentView};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: EnvironmentLifecycle,
    pub auth: Arc<Authenticator>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/repos", get(handlers::list_repos))
        .route(
            "/stagings",
            get(handlers::list_stagings).post(handlers::create_staging),
        )
        .route(
            "/stagings/{name}",
            get(handlers::get_staging).delete(handlers::delete_staging),
        )
        .route("/stagings/{name}/pipelines/status", get(handlers::pipeline_status))
        .route("/stagings/{name}/pipelines/{repo}", post(handlers::replay_pipeline));

    Router::new()
        .nest("/api", api_routes)
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
