//! Configuration module for land-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct LandConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub pesapal: PesapalConfig,
    pub signature: ServiceSignatureConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PesapalConfig {
    pub consumer_key: String,
    pub consumer_secret: Secret<String>,
    /// API root, e.g. `https://cybqa.pesapal.com/pesapalv3/api` for sandbox.
    pub base_url: String,
    /// Where the customer lands after paying.
    pub callback_url: String,
    /// IPN id returned by `RegisterIPN`, sent with every order.
    pub ipn_id: String,
    /// Public URL of our webhook, used when registering the IPN.
    pub ipn_url: String,
    pub currency: String,
    pub country_code: String,
    pub timeout_secs: u64,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceSignatureConfig {
    pub enabled: bool,
    pub secret: Secret<String>,
    pub nonce_ttl_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl LandConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "land-service"),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env_or("LOG_LEVEL", "info"),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: Secret::new(env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            pesapal: PesapalConfig {
                consumer_key: env_or("PESAPAL_CONSUMER_KEY", ""),
                consumer_secret: Secret::new(env_or("PESAPAL_CONSUMER_SECRET", "")),
                base_url: env_or(
                    "PESAPAL_BASE_URL",
                    "https://cybqa.pesapal.com/pesapalv3/api",
                ),
                callback_url: env_or(
                    "PESAPAL_CALLBACK_URL",
                    "http://localhost:3000/subscription/callback",
                ),
                ipn_id: env_or("PESAPAL_IPN_ID", ""),
                ipn_url: env_or(
                    "PESAPAL_IPN_URL",
                    "http://localhost:8080/webhooks/pesapal",
                ),
                currency: env_or("PESAPAL_CURRENCY", "KES"),
                country_code: env_or("PESAPAL_COUNTRY_CODE", "KE"),
                timeout_secs: env_parse("PESAPAL_TIMEOUT_SECS", 30),
                token_ttl_secs: env_parse("PESAPAL_TOKEN_TTL_SECS", 300),
            },
            signature: ServiceSignatureConfig {
                enabled: env_parse("LAND_SIGNATURE_ENABLED", false),
                secret: Secret::new(env_or("LAND_SIGNATURE_SECRET", "dev-secret")),
                nonce_ttl_secs: env_parse("LAND_SIGNATURE_NONCE_TTL_SECS", 300),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    #[test]
    #[serial]
    fn database_url_is_required() {
        env::remove_var("DATABASE_URL");
        assert!(matches!(
            LandConfig::from_env(),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    #[serial]
    fn pesapal_defaults_to_sandbox() {
        env::set_var("DATABASE_URL", "postgres://localhost/land");
        env::remove_var("PESAPAL_BASE_URL");
        env::set_var("PESAPAL_TIMEOUT_SECS", "not-a-number");

        let config = LandConfig::from_env().unwrap();
        assert_eq!(config.database.url.expose_secret(), "postgres://localhost/land");
        assert_eq!(
            config.pesapal.base_url,
            "https://cybqa.pesapal.com/pesapalv3/api"
        );
        assert_eq!(config.pesapal.timeout_secs, 30);

        env::remove_var("DATABASE_URL");
        env::remove_var("PESAPAL_TIMEOUT_SECS");
    }
}
