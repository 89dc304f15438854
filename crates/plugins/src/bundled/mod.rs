//! Plugins shipped with the workspace.

pub mod activity_log;

pub use activity_log::ActivityLogPlugin;
