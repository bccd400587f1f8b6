//! 환경 변수 기반 설정
//!
//! `.env` 파일은 `main`에서 먼저 읽습니다. 값이 없거나 형식이 잘못되면 기본값을 사용합니다.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::metering::delta_tracker::SNAPSHOT_TTL;
use crate::metering::MAX_DELTA_PER_CALL;
use crate::node::PROBE_TTL;
use crate::settlement::SETTLEMENT_LOCK_TTL;

/// HTTP 서버 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/relaymeter.db".into(),
            max_connections: 5,
        }
    }
}

/// 임시 저장소 설정. `enabled = false`면 프로세스 내부 저장소 사용
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeteringConfig {
    pub snapshot_ttl: Duration,
    pub max_delta_per_call: i64,
    pub probe_ttl: Duration,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl: SNAPSHOT_TTL,
            max_delta_per_call: MAX_DELTA_PER_CALL,
            probe_ttl: PROBE_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
    pub lock_ttl: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            lock_ttl: SETTLEMENT_LOCK_TTL,
        }
    }
}

/// 애플리케이션 전체 설정
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub metering: MeteringConfig,
    pub settlement: SettlementConfig,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정 구성
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let string_or = |key: &str, default: String| {
            lookup(key).filter(|v| !v.is_empty()).unwrap_or(default)
        };

        AppConfig {
            server: ServerConfig {
                host: string_or("SERVER_HOST", defaults.server.host),
                port: parse_or(&lookup, "SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: string_or("DATABASE_URL", defaults.database.url),
                max_connections: parse_or(
                    &lookup,
                    "DB_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )
                .max(1),
            },
            redis: RedisConfig {
                url: string_or("REDIS_URL", defaults.redis.url),
                enabled: parse_bool_or(&lookup, "REDIS_ENABLED", defaults.redis.enabled),
            },
            metering: MeteringConfig {
                snapshot_ttl: secs_or(&lookup, "SNAPSHOT_TTL_SECS", defaults.metering.snapshot_ttl),
                max_delta_per_call: parse_or(
                    &lookup,
                    "MAX_DELTA_PER_CALL",
                    defaults.metering.max_delta_per_call,
                ),
                probe_ttl: secs_or(&lookup, "PROBE_TTL_SECS", defaults.metering.probe_ttl),
            },
            settlement: SettlementConfig {
                lock_ttl: secs_or(
                    &lookup,
                    "SETTLEMENT_LOCK_TTL_SECS",
                    defaults.settlement.lock_ttl,
                ),
            },
            log_level: string_or("LOG_LEVEL", "info".to_string()),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("잘못된 설정값 무시: {}={}", key, raw);
            default
        }),
        None => default,
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!("잘못된 설정값 무시: {}={}", key, v);
            default
        }
        None => default,
    }
}

/// 0초는 허용하지 않음
fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or::<F, u64>(lookup, key, default.as_secs()) {
        0 => default,
        secs => Duration::from_secs(secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "sqlite://data/relaymeter.db");
        assert!(config.redis.enabled);
        assert_eq!(config.metering.snapshot_ttl, Duration::from_secs(604_800));
        assert_eq!(config.metering.max_delta_per_call, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.metering.probe_ttl, Duration::from_secs(300));
        assert_eq!(config.settlement.lock_ttl, Duration::from_secs(10));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERVER_PORT", "9090"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("REDIS_ENABLED", "false"),
            ("SETTLEMENT_LOCK_TTL_SECS", "30"),
            ("LOG_LEVEL", "debug"),
        ]);

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(!config.redis.enabled);
        assert_eq!(config.settlement.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = config_from(&[
            ("SERVER_PORT", "not-a-port"),
            ("DB_MAX_CONNECTIONS", "0"),
            ("REDIS_ENABLED", "maybe"),
            ("SNAPSHOT_TTL_SECS", "0"),
            ("MAX_DELTA_PER_CALL", "-"),
        ]);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.max_connections, 1);
        assert!(config.redis.enabled);
        assert_eq!(config.metering.snapshot_ttl, SNAPSHOT_TTL);
        assert_eq!(config.metering.max_delta_per_call, MAX_DELTA_PER_CALL);
    }
}
