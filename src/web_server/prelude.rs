pub use std::sync::Arc;

pub(crate) use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};

pub(crate) use askama::Template;
pub(crate) use askama_web::WebTemplate;

pub(crate) use serde::Serialize;

pub(crate) use crate::protocol::ApiResponse;
pub(crate) use crate::server::AppState;
pub(crate) use tracing::{debug, error, warn};
