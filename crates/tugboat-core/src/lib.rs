pub mod config;
pub mod duration;
pub mod naming;

pub use config::{
    BreakerScope, BreakerSettings, ClusterSettings, ConfigError, InfraBackend, InfraSettings,
    PipelineSettings, ResilienceSettings, RetrySettings, TugboatConfig,
};
pub use duration::parse_duration;
pub use naming::{NamingStrategy, short_id, slugify};
