//! Route inbound activities to handlers.
//!
//! Precedence between routes sharing a name:
//! 1. User route (registered by the application)
//! 2. System route (registered by the app itself, e.g. the invoke fallback)
//!
//! Unnamed routes never conflict. Matching routes run in registration order
//! as one chain over a shared [`Context`].

pub mod context;
pub mod error;
pub mod route;
pub mod router;
pub mod selectors;

pub use {
    context::{BusErrorSink, Context},
    error::{Error, Result},
    route::{Route, RouteClass, RouteHandler, handler_fn},
    router::Router,
};
