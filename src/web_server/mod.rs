//! Handlers for the local dashboard, grouped by page.

pub(crate) mod api;
pub(crate) mod dashboard;
pub(crate) mod dishes;
pub(crate) mod images;
pub(crate) mod middleware;
pub(crate) mod prelude;
