pub mod agent;
pub mod causal;
pub mod explain;
pub mod routes;

pub use routes::{create_router, ApiError, AppState};
