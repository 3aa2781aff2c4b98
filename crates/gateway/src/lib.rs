//! # Parley Gateway Crate
//!
//! Transport edge of the chat router. The [`router::Router`] is the
//! core orchestrator: it consumes decoded inbound events, consults the
//! presence directory, routes through the delivery store and retry
//! queue, and emits outbound events through the [`transport::Transport`]
//! trait. The WebSocket session layer and page routes around it are
//! the transport glue.

pub mod error;
pub mod events;
pub mod rest;
pub mod router;
pub mod state;
pub mod transport;
pub mod websocket;

pub use error::{GatewayError, GatewayResult};
pub use router::Router;
pub use state::GatewayState;
pub use transport::Transport;

use axum::Router as AxumRouter;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Create the main application router with all routes.
pub fn create_router(state: Arc<GatewayState>) -> AxumRouter {
    AxumRouter::new()
        .merge(rest::create_rest_routes().with_state(state.clone()))
        .merge(websocket::create_websocket_routes().with_state(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
