pub mod config;
pub mod errors;
pub mod executor;
pub mod gitsync;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod registry;
pub mod remote;
pub mod server;
pub mod settings;
pub mod signature;
pub mod watcher;
