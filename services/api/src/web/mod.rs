pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers the binary wires into the router.
pub use middleware::require_user;
pub use rest::{delete_plan_handler, list_plans_handler};
pub use ws_handler::ws_handler;
