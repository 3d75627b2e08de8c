//! REST API under `/api/v1`

pub mod handlers;
pub mod identity;
pub mod router;
pub mod state;

pub use identity::{CallerIdentity, IDENTITY_HEADER};
pub use router::create_router;
pub use state::AppState;
