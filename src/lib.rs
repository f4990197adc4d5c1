pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod tasks;
pub mod voting;

pub use engine::PollEngine;
pub use error::PollError;
pub use models::{Poll, PollOption};
