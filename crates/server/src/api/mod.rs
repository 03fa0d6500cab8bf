pub mod devices;
pub mod entries;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod routes;
pub mod ws;

pub use middleware::metrics_middleware;
pub use routes::create_router;
pub use ws::{WsBroadcaster, WsMessage};
