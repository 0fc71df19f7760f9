//! Server configuration.

use std::time::Duration;

use crate::network::NetworkConfig;

/// Engine-level configuration. Every frequency is in milliseconds; the
/// binary fills these from flags and environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Scheduler tick period.
    pub tick_frequency_ms: u64,
    /// Synchronizer period.
    pub sync_frequency_ms: u64,
    /// DB flush period.
    pub db_flush_frequency_ms: u64,
    /// Identity-cache cleanup period.
    pub cache_clean_frequency_ms: u64,
    /// Idle duration after which cache entries expire.
    pub cache_default_duration_ms: u64,
    /// Subzone rectangle width in tiles.
    pub subzone_size_x: i32,
    /// Subzone rectangle height in tiles (staggered Y units).
    pub subzone_size_y: i32,
    /// Tiles per walking step.
    pub movement_walk_speed: i32,
    /// Tiles per running step.
    pub movement_run_speed: i32,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Maximum pooled connections.
    pub database_max_connections: u32,
    /// Locale identifier handed to the client-side translation layer.
    pub locale: String,
    pub network: NetworkConfig,
}

impl ServerConfig {
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_frequency_ms)
    }

    #[must_use]
    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_frequency_ms)
    }

    #[must_use]
    pub fn db_flush_period(&self) -> Duration {
        Duration::from_millis(self.db_flush_frequency_ms)
    }

    #[must_use]
    pub fn cache_clean_period(&self) -> Duration {
        Duration::from_millis(self.cache_clean_frequency_ms)
    }

    #[must_use]
    pub fn cache_default_duration(&self) -> Duration {
        Duration::from_millis(self.cache_default_duration_ms)
    }

    #[must_use]
    pub fn subzone_size(&self) -> tilemud_core::Vec2 {
        tilemud_core::Vec2::new(self.subzone_size_x, self.subzone_size_y)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_frequency_ms: 16,
            sync_frequency_ms: 100,
            db_flush_frequency_ms: 100,
            cache_clean_frequency_ms: 10_000,
            cache_default_duration_ms: 60_000,
            subzone_size_x: 16,
            subzone_size_y: 32,
            movement_walk_speed: 1,
            movement_run_speed: 2,
            database_url: "postgres://localhost/tilemud".to_string(),
            database_max_connections: 8,
            locale: "en".to_string(),
            network: NetworkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_frequencies() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_period(), Duration::from_millis(16));
        assert_eq!(config.sync_period(), Duration::from_millis(100));
        assert_eq!(config.db_flush_period(), Duration::from_millis(100));
        assert_eq!(config.subzone_size(), tilemud_core::Vec2::new(16, 32));
    }
}
