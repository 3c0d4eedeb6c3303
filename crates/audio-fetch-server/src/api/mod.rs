//! HTTP API handlers.
//!
//! actix's route macros turn each handler into a unit struct, so handlers are
//! registered by their full path (`api::download::download`).

pub mod download;
pub mod health;
