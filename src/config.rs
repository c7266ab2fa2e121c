//! Configuration management for the COLA sync server
//!
//! Everything is environment-variable driven; `from_env` fails fast on
//! missing or invalid values before any network activity happens.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sync::SyncPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },

    #[error("SYNC_STRATEGY=replace requires CONFIRM_REPLACE=true")]
    ReplaceNotConfirmed,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    /// `None` runs the scraper standalone and writes the export file.
    pub storage: Option<AirtableConfig>,
    /// `None` disables document fetching entirely.
    pub documents: Option<DocumentsConfig>,
    pub sync: SyncConfig,
    /// Flat JSON export (standalone mode) and post-sync backup target.
    pub export_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Product or fanciful name to search for
    pub product_name: String,
    /// Vendor code filter
    pub vendor_code: String,
    /// Delay between registry requests
    pub delay: Duration,
    /// Fetch one detail page per new record and merge its fields
    pub fetch_details: bool,
}

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub table_name: String,
    /// Attachment field that receives rendered COLA documents
    pub document_field: String,
}

#[derive(Debug, Clone)]
pub struct DocumentsConfig {
    pub solver_api_key: String,
    pub solver_base_url: String,
    pub browser_ws_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub policy: SyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            registry: RegistryConfig {
                product_name: "Shottys".to_string(),
                vendor_code: "23153".to_string(),
                delay: Duration::from_secs(1),
                fetch_details: false,
            },
            storage: None,
            documents: None,
            sync: SyncConfig {
                policy: SyncPolicy::Incremental,
            },
            export_file: PathBuf::from("ttb_results.json"),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let delay_secs = match env::var("TTB_DELAY") {
            Ok(raw) => raw.parse::<f64>().map_err(|_| ConfigError::InvalidVar {
                name: "TTB_DELAY",
                value: raw,
            })?,
            Err(_) => 1.0,
        };

        let registry = RegistryConfig {
            product_name: env::var("TTB_PRODUCT_NAME").unwrap_or_else(|_| "Shottys".to_string()),
            vendor_code: env::var("TTB_VENDOR_CODE").unwrap_or_else(|_| "23153".to_string()),
            delay: Duration::from_secs_f64(delay_secs),
            fetch_details: env_flag("TTB_FETCH_DETAILS"),
        };

        // Airtable is optional: without credentials the scraper runs
        // standalone and writes the export file instead.
        let storage = match (env::var("AIRTABLE_API_KEY"), env::var("AIRTABLE_BASE_ID")) {
            (Ok(api_key), Ok(base_id)) => Some(AirtableConfig {
                api_key,
                base_id,
                table_name: env::var("AIRTABLE_TABLE_NAME")
                    .unwrap_or_else(|_| "TTB COLAs".to_string()),
                document_field: env::var("AIRTABLE_DOCUMENT_FIELD")
                    .unwrap_or_else(|_| "Document".to_string()),
            }),
            _ => None,
        };

        // Document fetching needs both the solver key and a browser endpoint.
        let documents = if env_flag("FETCH_DOCUMENTS") {
            let solver_api_key = env::var("TWO_CAPTCHA_API_KEY")
                .map_err(|_| ConfigError::MissingVar("TWO_CAPTCHA_API_KEY"))?;
            let browser_ws_endpoint = env::var("BROWSERLESS_WS_ENDPOINT")
                .map_err(|_| ConfigError::MissingVar("BROWSERLESS_WS_ENDPOINT"))?;
            Some(DocumentsConfig {
                solver_api_key,
                solver_base_url: env::var("TWO_CAPTCHA_BASE_URL")
                    .unwrap_or_else(|_| "http://2captcha.com".to_string()),
                browser_ws_endpoint,
            })
        } else {
            None
        };

        let policy_raw = env::var("SYNC_STRATEGY").unwrap_or_else(|_| "incremental".to_string());
        let policy = policy_raw
            .parse::<SyncPolicy>()
            .map_err(|_| ConfigError::InvalidVar {
                name: "SYNC_STRATEGY",
                value: policy_raw,
            })?;

        // The replace policy deletes every remote row; refuse to even start
        // without the explicit confirmation switch.
        if policy == SyncPolicy::Replace && !env_flag("CONFIRM_REPLACE") {
            return Err(ConfigError::ReplaceNotConfirmed);
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            registry,
            storage,
            documents,
            sync: SyncConfig { policy },
            export_file: env::var("EXPORT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ttb_results.json")),
        })
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so all from_env assertions live in one
    // test to avoid interleaving with each other.
    #[test]
    fn from_env_fails_fast() {
        env::set_var("FETCH_DOCUMENTS", "true");
        env::remove_var("TWO_CAPTCHA_API_KEY");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("TWO_CAPTCHA_API_KEY")));
        env::remove_var("FETCH_DOCUMENTS");

        env::set_var("SYNC_STRATEGY", "replace");
        env::remove_var("CONFIRM_REPLACE");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ReplaceNotConfirmed));

        env::set_var("SYNC_STRATEGY", "sideways");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: "SYNC_STRATEGY", .. }));
        env::remove_var("SYNC_STRATEGY");
    }

    #[test]
    fn defaults_are_standalone_incremental() {
        let config = Config::default();
        assert!(config.storage.is_none());
        assert!(config.documents.is_none());
        assert_eq!(config.sync.policy, SyncPolicy::Incremental);
        assert_eq!(config.registry.delay, Duration::from_secs(1));
    }
}
