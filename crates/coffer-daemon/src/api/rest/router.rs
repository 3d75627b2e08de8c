//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/capabilities", get(handlers::list_capabilities))
        // Workspaces
        .route("/workspaces", post(handlers::create_workspace))
        .route("/workspaces/:id", delete(handlers::delete_workspace))
        .route(
            "/identities/:identity/workspaces",
            get(handlers::identity_workspaces),
        )
        // Members and roles
        .route(
            "/workspaces/:id/members",
            get(handlers::list_members).post(handlers::add_member),
        )
        .route(
            "/workspaces/:id/members/:identity",
            delete(handlers::remove_member),
        )
        .route(
            "/workspaces/:id/members/:identity/roles",
            get(handlers::get_roles)
                .post(handlers::grant_roles)
                .delete(handlers::revoke_roles),
        )
        // Budget
        .route("/workspaces/:id/budget", get(handlers::budget_status))
        .route("/workspaces/:id/budget/history", get(handlers::budget_history))
        .route("/workspaces/:id/payments", get(handlers::payment_history))
        .route("/workspaces/:id/payouts", post(handlers::disburse))
        // Invoices
        .route("/workspaces/:id/invoices", post(handlers::register_invoice))
        .route("/workspaces/:id/invoices/count", get(handlers::invoice_count))
        .route("/workspaces/:id/invoices/poll", post(handlers::poll_invoices));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
