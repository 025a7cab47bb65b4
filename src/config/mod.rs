use std::env;

/// Runtime configuration for the marketplace backend
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Maximum upload size in bytes (default: 256 MB)
    pub max_upload_size: usize,

    /// JWT signing secret (HS256)
    pub jwt_secret: String,

    /// Shared secret for verifying payment-provider webhook signatures
    pub webhook_secret: String,

    /// Currency assumed when a design carries none (default: "USD")
    pub default_currency: String,

    /// Request timeout applied at external I/O boundaries, in seconds
    pub request_timeout_secs: u64,

    /// Allowed CORS origins (comma separated in env)
    pub allowed_origins: Vec<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 256 * 1024 * 1024,
            jwt_secret: "secret".to_string(),
            webhook_secret: "webhook-secret".to_string(),
            default_currency: "USD".to_string(),
            request_timeout_secs: 5,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl MarketConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            jwt_secret: env::var("JWT_SECRET").unwrap_or(default.jwt_secret),

            webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or(default.webhook_secret),

            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or(default.default_currency),

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.request_timeout_secs),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MarketConfig::default();
        assert_eq!(config.max_upload_size, 256 * 1024 * 1024);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.request_timeout_secs, 5);
    }
}
