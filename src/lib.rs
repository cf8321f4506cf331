pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod output;
pub mod projection;
pub mod query;
pub mod static_feed;
pub mod store;

pub use error::{Error, Result};
