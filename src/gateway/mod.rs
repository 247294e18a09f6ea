//! HTTP surface: router, handlers and server lifecycle

mod router;
mod server;

pub use router::{AppState, cors_layer, create_router};
pub use server::Server;
