pub mod common;
pub mod event;
pub mod import;
pub mod location;
pub mod membership;
pub mod user;
