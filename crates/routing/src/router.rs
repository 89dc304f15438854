use std::collections::HashSet;

use {parley_common::Activity, tracing::debug};

use crate::{Route, RouteClass};

/// Append-only route table.
#[derive(Debug, Default, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: Route) {
        debug!(route = route.label(), class = ?route.class(), "route registered");
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes that fire for `activity`, in registration order.
    ///
    /// A system route is dropped whenever a user route with the same name is
    /// registered, whether or not that user route matches.
    pub fn select(&self, activity: &Activity) -> Vec<Route> {
        let overridden: HashSet<&str> = self
            .routes
            .iter()
            .filter(|r| r.class() == RouteClass::User)
            .filter_map(Route::name)
            .collect();

        let selected: Vec<Route> = self
            .routes
            .iter()
            .filter(|r| {
                !(r.class() == RouteClass::System
                    && r.name().is_some_and(|name| overridden.contains(name)))
            })
            .filter(|r| r.matches(activity))
            .cloned()
            .collect();

        debug!(
            kind = activity.kind.name(),
            matched = selected.len(),
            "routes selected"
        );
        selected
    }
}
