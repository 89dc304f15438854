//! The app: the single entry point an inbound activity enters through.
//!
//! ```text
//! activity ─▶ bus("activity") ─▶ Router::select ─▶ handler chain
//!          ─▶ close stream ─▶ bus("activity.response") ─▶ Response
//! ```

pub mod app;
pub mod builder;
pub mod response;
pub mod system_routes;

pub use {
    app::App,
    builder::AppBuilder,
    response::{Response, ResponseMeta},
};
