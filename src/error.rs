//! Error taxonomy for ingestion, queries and the static feed cache.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The update references a stop the reference store has never seen.
    /// Ingestion heals this one by inserting the stop.
    #[error("stop '{stop_id}' is not in the reference store")]
    MissingStop { stop_id: String },

    /// The update references an unknown trip. Trips are loaded before live
    /// updates can exist, so this means the reference load was incomplete.
    #[error("trip '{trip_id}' is not in the reference store (reference load incomplete?)")]
    MissingTrip { trip_id: String },

    /// Any other foreign-key failure, named by the constraint that fired.
    #[error("referential integrity violation on constraint '{constraint}'")]
    Integrity { constraint: String },

    /// The store kept reporting the stop as missing after every heal.
    #[error(
        "gave up healing update for trip '{trip_id}' at stop '{stop_id}' after {attempts} attempt(s)"
    )]
    HealExhausted {
        trip_id: String,
        stop_id: String,
        attempts: u32,
    },

    /// Inserting the missing stop failed.
    #[error("could not insert unexpected stop '{stop_id}'")]
    Heal {
        stop_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
