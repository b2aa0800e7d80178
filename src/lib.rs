pub mod config;
pub mod db;
pub mod diff;
pub mod enrich;
pub mod error;
pub mod events;
pub mod logging;
pub mod resolver;
pub mod scheduler;
pub mod sources;
