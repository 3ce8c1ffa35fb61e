use std::net::SocketAddr;
use std::num::{NonZeroU32, NonZeroU64};

use envconfig::Envconfig;
use tracing::Level;

use crate::resolver::CampaignIdPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    // Required unless the in-memory store is enabled
    pub database_url: Option<String>,

    #[envconfig(default = "10")]
    pub max_pg_connections: u32,

    #[envconfig(default = "5")]
    pub pg_acquire_timeout_secs: u64,

    #[envconfig(default = "true")]
    pub run_migrations: bool,

    // Local runs only, nothing survives a restart
    #[envconfig(default = "false")]
    pub memory_store: bool,

    #[envconfig(default = "100")]
    pub rate_limit_max_requests: NonZeroU32,

    #[envconfig(default = "60")]
    pub rate_limit_window_secs: NonZeroU64,

    #[envconfig(default = "verify")]
    pub campaign_id_policy: CampaignIdPolicy,

    #[envconfig(default = "10")]
    pub request_timeout_seconds: u64,

    #[envconfig(default = "65536")]
    pub max_body_bytes: usize,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "campaign-capture")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,
}
