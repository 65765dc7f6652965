pub mod api;
pub mod chain;
pub mod config;
pub mod executor;
pub mod logging;
pub mod machine;
pub mod notifier;
pub mod order;
pub mod price;
pub mod watcher;
