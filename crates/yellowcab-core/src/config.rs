//! Process configuration, read once at startup and passed to each component.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use yellowcab_bucket::S3Config;

use crate::error::{PipelineError, Result};

pub const DEFAULT_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net";
pub const DEFAULT_EXTRACT_BUCKET: &str = "taxi-data";
pub const DEFAULT_ARCHIVE_BUCKET: &str = "yellow-tripdata";
pub const ADMIN_DATABASE: &str = "postgres";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub quality: QualityConfig,
    pub dashboard: DashboardConfig,
    object_store: Option<ObjectStoreConfig>,
    warehouse: Option<WarehouseConfig>,
    mart: Option<MartConfig>,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub max_lookback: u32,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub s3: S3Config,
    pub extract_bucket: String,
    pub archive_bucket: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl DatabaseConfig {
    pub fn admin_options(&self) -> PgConnectOptions {
        self.options_for(ADMIN_DATABASE)
    }

    pub fn target_options(&self) -> PgConnectOptions {
        self.options_for(&self.database)
    }

    fn options_for(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(database)
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub database: DatabaseConfig,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct MartConfig {
    pub database: DatabaseConfig,
    pub sql_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub soda_dir: PathBuf,
    pub datasource: String,
    pub soda_bin: String,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub cache_ttl: Duration,
    pub sample_limit: i64,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let source = SourceConfig {
            base_url: env
                .get("TRIP_DATA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_lookback: env.parse_or("TRIP_DATA_LOOKBACK_MONTHS", 36)?,
            http_timeout: Duration::from_secs(env.parse_or("TRIP_DATA_HTTP_TIMEOUT_SECS", 60)?),
        };
        if source.max_lookback == 0 {
            return Err(PipelineError::Config(
                "TRIP_DATA_LOOKBACK_MONTHS must be at least 1".into(),
            ));
        }

        let object_store = env
            .section(&[
                "MINIO_HOSTNAME",
                "MINIO_PORT",
                "MINIO_ACCESS_KEY",
                "MINIO_SECRET_KEY",
            ])?
            .map(|values| -> Result<ObjectStoreConfig> {
                let [host, port, access_key, secret_key] = values;
                let scheme = if env.flag_or("MINIO_SECURE", false)? {
                    "https"
                } else {
                    "http"
                };
                let port: u16 = parse_value("MINIO_PORT", &port)?;
                Ok(ObjectStoreConfig {
                    s3: S3Config {
                        region: env
                            .get("MINIO_REGION")
                            .unwrap_or_else(|| "us-east-1".to_string()),
                        endpoint: Some(format!("{scheme}://{host}:{port}")),
                        access_key_id: Some(access_key),
                        secret_access_key: Some(secret_key),
                        force_path_style: true,
                    },
                    extract_bucket: env
                        .get("EXTRACT_BUCKET")
                        .unwrap_or_else(|| DEFAULT_EXTRACT_BUCKET.to_string()),
                    archive_bucket: env
                        .get("ARCHIVE_BUCKET")
                        .unwrap_or_else(|| DEFAULT_ARCHIVE_BUCKET.to_string()),
                })
            })
            .transpose()?;

        let warehouse = env
            .section(&[
                "WH_DBMS_USERNAME",
                "WH_DBMS_PASSWORD",
                "WH_DBMS_IP",
                "WH_DBMS_PORT",
                "WH_DBMS_DATABASE",
                "WH_DBMS_TABLE",
            ])?
            .map(|[username, password, host, port, database, table]| -> Result<_> {
                Ok(WarehouseConfig {
                    database: DatabaseConfig {
                        host,
                        port: parse_value("WH_DBMS_PORT", &port)?,
                        username,
                        password,
                        database,
                    },
                    table,
                })
            })
            .transpose()?;

        let mart = env
            .section(&[
                "DM_DBMS_USERNAME",
                "DM_DBMS_PASSWORD",
                "DM_DBMS_IP",
                "DM_DBMS_PORT",
                "DM_DBMS_DATABASE",
            ])?
            .map(|[username, password, host, port, database]| -> Result<_> {
                Ok(MartConfig {
                    database: DatabaseConfig {
                        host,
                        port: parse_value("DM_DBMS_PORT", &port)?,
                        username,
                        password,
                        database,
                    },
                    sql_dir: env.get("DM_SQL_DIR").map(PathBuf::from),
                })
            })
            .transpose()?;

        let quality = QualityConfig {
            soda_dir: env
                .get("SODA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("soda")),
            datasource: env
                .get("SODA_DATASOURCE")
                .unwrap_or_else(|| "datamart".to_string()),
            soda_bin: env.get("SODA_BIN").unwrap_or_else(|| "soda".to_string()),
        };

        let dashboard = DashboardConfig {
            cache_ttl: Duration::from_secs(env.parse_or("DASHBOARD_CACHE_TTL_SECS", 86_400)?),
            sample_limit: env.parse_or("DASHBOARD_SAMPLE_LIMIT", 100)?,
        };

        Ok(Self {
            source,
            quality,
            dashboard,
            object_store,
            warehouse,
            mart,
        })
    }

    pub fn object_store(&self) -> Result<&ObjectStoreConfig> {
        self.object_store
            .as_ref()
            .ok_or_else(|| not_configured("object store", "MINIO_*"))
    }

    pub fn warehouse(&self) -> Result<&WarehouseConfig> {
        self.warehouse
            .as_ref()
            .ok_or_else(|| not_configured("warehouse", "WH_DBMS_*"))
    }

    pub fn mart(&self) -> Result<&MartConfig> {
        self.mart
            .as_ref()
            .ok_or_else(|| not_configured("data mart", "DM_DBMS_*"))
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    /// Boolean switch accepting the usual `.env` spellings, case-insensitively.
    fn flag_or(&self, key: &str, default: bool) -> Result<bool> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(PipelineError::Config(format!("{key} has an invalid value '{raw}'"))),
        }
    }

    /// All-or-nothing group of variables: `None` when none is set, an error
    /// naming the gaps when only some are.
    fn section<const N: usize>(&self, keys: &[&str; N]) -> Result<Option<[String; N]>> {
        let values: Vec<Option<String>> = keys.iter().map(|key| self.get(key)).collect();
        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let missing: Vec<&str> = keys
            .iter()
            .zip(&values)
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let values: Vec<String> = values.into_iter().flatten().collect();
        values
            .try_into()
            .map(Some)
            .map_err(|_| PipelineError::Config("environment section size mismatch".into()))
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{key} has an invalid value '{raw}'")))
}

fn not_configured(section: &str, pattern: &str) -> PipelineError {
    PipelineError::Config(format!(
        "{section} is not configured; set the {pattern} environment variables"
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PipelineConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.source.max_lookback, 36);
        assert_eq!(config.dashboard.cache_ttl, Duration::from_secs(86_400));
        assert!(config.object_store().is_err());
        assert!(config.warehouse().is_err());
        assert!(config.mart().is_err());
    }

    #[test]
    fn partial_section_names_missing_variables() {
        let err = config_from(&[("WH_DBMS_USERNAME", "etl"), ("WH_DBMS_IP", "db")]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("WH_DBMS_PASSWORD"));
        assert!(message.contains("WH_DBMS_TABLE"));
        assert!(!message.contains("WH_DBMS_IP"));
    }

    #[test]
    fn object_store_section_builds_path_style_endpoint() {
        let config = config_from(&[
            ("MINIO_HOSTNAME", "localhost"),
            ("MINIO_PORT", "9000"),
            ("MINIO_ACCESS_KEY", "access"),
            ("MINIO_SECRET_KEY", "secret"),
        ])
        .unwrap();
        let store = config.object_store().unwrap();
        assert_eq!(store.s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(store.s3.force_path_style);
        assert_eq!(store.extract_bucket, "taxi-data");
        assert_eq!(store.archive_bucket, "yellow-tripdata");
    }

    #[test]
    fn secure_flag_accepts_common_spellings() {
        let minio = |secure: &'static str| {
            config_from(&[
                ("MINIO_HOSTNAME", "minio"),
                ("MINIO_PORT", "9000"),
                ("MINIO_ACCESS_KEY", "access"),
                ("MINIO_SECRET_KEY", "secret"),
                ("MINIO_SECURE", secure),
            ])
        };
        for secure in ["1", "True", "yes", "ON"] {
            let config = minio(secure).unwrap();
            assert_eq!(
                config.object_store().unwrap().s3.endpoint.as_deref(),
                Some("https://minio:9000"),
                "{secure}"
            );
        }
        for insecure in ["0", "False", "no"] {
            let config = minio(insecure).unwrap();
            assert_eq!(
                config.object_store().unwrap().s3.endpoint.as_deref(),
                Some("http://minio:9000"),
                "{insecure}"
            );
        }
        assert!(minio("maybe").is_err());
    }

    #[test]
    fn rejects_zero_lookback_and_bad_ports() {
        assert!(config_from(&[("TRIP_DATA_LOOKBACK_MONTHS", "0")]).is_err());
        let err = config_from(&[
            ("DM_DBMS_USERNAME", "u"),
            ("DM_DBMS_PASSWORD", "p"),
            ("DM_DBMS_IP", "h"),
            ("DM_DBMS_PORT", "not-a-port"),
            ("DM_DBMS_DATABASE", "mart"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("DM_DBMS_PORT"));
    }
}
