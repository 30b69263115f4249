use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub log_format: String,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub challenges: ChallengeConfig,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    pub key_prefix: String,
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
    pub access_expiry_secs: i64,
    pub refresh_expiry_secs: i64,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Clone, Debug)]
pub struct ChallengeConfig {
    /// Grant rewards in the same transaction that completes a challenge.
    pub auto_claim: bool,
    pub sweep_interval_secs: u64,
    pub catalogue_cache_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 5000),
            environment: env_or("APP_ENV", "development"),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            log_format: env_or("LOG_FORMAT", "pretty"),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "media_platform"),
                user: env_or("DB_USER", "media_admin"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 2),
                pool_max: env_or_parse("DB_POOL_MAX", 20),
            },
            redis: RedisConfig {
                host: env_or("REDIS_HOST", "localhost"),
                port: env_or_parse("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
                db: env_or_parse("REDIS_DB", 0),
                key_prefix: "media:".to_string(),
            },
            jwt: JwtConfig {
                secret: env_or("JWT_SECRET", "change-me-to-a-secure-random-string"),
                access_expiry_secs: parse_duration_to_secs(&env_or("JWT_ACCESS_EXPIRY", "1h")),
                refresh_expiry_secs: parse_duration_to_secs(&env_or("JWT_REFRESH_EXPIRY", "30d")),
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: env_or_parse("RATE_LIMIT_MAX", 100),
            },
            challenges: ChallengeConfig {
                auto_claim: parse_bool(&env_or("CHALLENGE_AUTO_CLAIM", "false")),
                sweep_interval_secs: env_or_parse("CHALLENGE_SWEEP_SECS", 300),
                catalogue_cache_secs: env_or_parse("CHALLENGE_CACHE_SECS", 30),
            },
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }

    pub fn redis_url(&self) -> String {
        if let Ok(url) = env::var("REDIS_URL") {
            return url;
        }
        match &self.redis.password {
            Some(pw) if !pw.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                pw, self.redis.host, self.redis.port, self.redis.db
            ),
            _ => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

fn parse_duration_to_secs(s: &str) -> i64 {
    let s = s.trim();
    if s.is_empty() {
        return 3600;
    }
    let (num_str, unit) = s.split_at(s.len() - 1);
    match unit {
        "s" => num_str.parse().unwrap_or(1),
        "m" => num_str.parse::<i64>().unwrap_or(1) * 60,
        "h" => num_str.parse::<i64>().unwrap_or(1) * 3600,
        "d" => num_str.parse::<i64>().unwrap_or(1) * 86400,
        _ => s.parse().unwrap_or(3600),
    }
}

#[cfg(test)]
impl Config {
    /// Config used by router tests; never reads the environment.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            environment: "test".into(),
            cors_origins: vec![],
            log_format: "pretty".into(),
            db: DbConfig {
                host: "localhost".into(),
                port: 5432,
                database: "media_test".into(),
                user: "test".into(),
                password: String::new(),
                pool_min: 0,
                pool_max: 1,
            },
            redis: RedisConfig {
                host: "localhost".into(),
                port: 6379,
                password: None,
                db: 0,
                key_prefix: "test:".into(),
            },
            jwt: JwtConfig {
                secret: "test-secret".into(),
                access_expiry_secs: 3600,
                refresh_expiry_secs: 86400,
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: 1000,
            },
            challenges: ChallengeConfig {
                auto_claim: false,
                sweep_interval_secs: 300,
                catalogue_cache_secs: 0,
            },
        }
    }
}
