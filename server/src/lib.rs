pub mod api;
pub mod auth;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod reactions;
pub mod statuses;
pub mod tweets;
pub mod users;

pub use error::{Error, Result};
