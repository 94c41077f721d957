//! Evento core: configuration, feed records, mapping store and the feed client.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
