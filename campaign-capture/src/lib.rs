pub mod api;
pub mod campaign;
pub mod campaign_endpoint;
pub mod config;
pub mod event;
pub mod extractors;
pub mod limiters;
pub mod prometheus;
pub mod resolver;
pub mod router;
pub mod sanitize;
pub mod server;
pub mod stats;
pub mod stores;
pub mod time;
pub mod track_endpoint;
pub mod validation;
