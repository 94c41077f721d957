//! Evento import engine: action deciders, executors, membership
//! synchronization and the per-feed import tasks.

pub mod admin_task;
pub mod event_action;
pub mod event_executor;
pub mod event_task;
pub mod location;
pub mod logger;
pub mod membership;
pub mod target;
pub mod task;
pub mod user_action;
pub mod user_executor;
pub mod user_task;

#[cfg(test)]
mod fake_feed;

pub use admin_task::EventAdminImportTask;
pub use event_task::EventImportTask;
pub use location::LocationResolver;
pub use task::ImportSummary;
pub use user_task::UserImportTask;
