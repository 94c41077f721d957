//! Error types for the Evento import core crate.

use thiserror::Error;

/// Top-level error type for all Evento import operations.
#[derive(Debug, Error)]
pub enum EventoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The feed could not be reached or returned a malformed envelope.
    /// Aborts the current run.
    #[error("communication error: {0}")]
    Communication(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A single record carried an unusable payload. The record is skipped.
    #[error("record error (evento id {}): {message}", display_id(.evento_id))]
    Record {
        evento_id: Option<i64>,
        message: String,
    },

    #[error("target system error: {0}")]
    Target(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

fn display_id(id: &Option<i64>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "not given".to_string(),
    }
}

impl EventoError {
    /// Build a record-level data fault.
    pub fn record(evento_id: Option<i64>, message: impl Into<String>) -> Self {
        Self::Record {
            evento_id,
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run instead of skipping one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Communication(_) | Self::Http(_))
    }
}

/// A convenience Result alias that defaults to [`EventoError`].
pub type Result<T> = std::result::Result<T, EventoError>;
