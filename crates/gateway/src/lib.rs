//! Gateway: HTTP webhook host for a parley [`App`](parley_app::App).
//!
//! `POST /api/messages` decodes a Bot Framework activity, runs one turn and
//! answers with the turn's status and body. Routing metadata is exposed as
//! the `x-parley-routes-matched` and `x-parley-stream-id` headers.
//! `GET /health` reports liveness.

pub mod server;

pub use server::{GatewayState, build_gateway_app, start_gateway};
