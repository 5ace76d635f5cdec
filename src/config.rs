use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub join_code_ttl_hours: i64,
    pub inactivity_threshold_days: i64,
    pub max_tx_attempts: u32,
    pub max_code_attempts: u32,
    pub change_log_capacity: usize,
    pub summary_cache_capacity: u64,
    pub summary_cache_ttl_secs: u64,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_env_only()
    }

    /// Load configuration from environment variables only (without loading .env files)
    /// This is useful for testing where you want to control the environment directly
    pub fn from_env_only() -> Result<Self> {
        Ok(Config {
            join_code_ttl_hours: env::var("JOIN_CODE_TTL_HOURS")
                .unwrap_or_else(|_| "72".to_string())
                .parse()
                .unwrap_or(72),
            inactivity_threshold_days: env::var("INACTIVITY_THRESHOLD_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            max_tx_attempts: env::var("MAX_TX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            max_code_attempts: env::var("MAX_CODE_ATTEMPTS")
                .unwrap_or_else(|_| "16".to_string())
                .parse()
                .unwrap_or(16),
            change_log_capacity: env::var("CHANGE_LOG_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .unwrap_or(64),
            summary_cache_capacity: env::var("SUMMARY_CACHE_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .unwrap_or(1024),
            summary_cache_ttl_secs: env::var("SUMMARY_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            join_code_ttl_hours: 72,
            inactivity_threshold_days: 30,
            max_tx_attempts: 5,
            max_code_attempts: 16,
            change_log_capacity: 64,
            summary_cache_capacity: 1024,
            summary_cache_ttl_secs: 300,
            environment: "development".to_string(),
        }
    }
}
