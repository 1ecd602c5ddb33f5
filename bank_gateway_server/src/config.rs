use std::{env, fmt::Display, str::FromStr, time::Duration};

use bank_gateway_engine::{
    connection::{CircuitBreakerConfig, ConnectionConfig},
    fallback::FallbackCacheConfig,
    objects::DeliveryMode,
    DeliveryConfig,
};
use bgw_common::{helpers::parse_boolean_flag, Secret};
use log::*;
use merchant_tools::WebhookClientConfig;

const DEFAULT_BGW_HOST: &str = "127.0.0.1";
const DEFAULT_BGW_PORT: u16 = 8470;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/bank_gateway.db";
const DEFAULT_FALLBACK_KV_PATH: &str = "data/fallback_cache";
const DEFAULT_ORDER_EXPIRY: Duration = Duration::from_secs(30 * 60);
const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_WEBHOOK_RETRY_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// An optional read replica. Reads go here first and fall back to the primary.
    pub replica_database_url: Option<String>,
    /// Where the persistent tier of the fallback cache lives.
    pub fallback_kv_path: String,
    pub auth: AuthConfig,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    /// Pending and processing orders older than this are failed by the expiry sweeper.
    pub order_expiry: Duration,
    pub expiry_interval: Duration,
    pub webhook_retry_interval: Duration,
    pub start_workers: bool,
    pub connection: ConnectionConfig,
    pub cache: FallbackCacheConfig,
    pub delivery: DeliveryConfig,
    pub webhooks: WebhookClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BGW_HOST.to_string(),
            port: DEFAULT_BGW_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            replica_database_url: None,
            fallback_kv_path: DEFAULT_FALLBACK_KV_PATH.to_string(),
            auth: AuthConfig::default(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            order_expiry: DEFAULT_ORDER_EXPIRY,
            expiry_interval: DEFAULT_EXPIRY_INTERVAL,
            webhook_retry_interval: DEFAULT_WEBHOOK_RETRY_INTERVAL,
            start_workers: true,
            connection: ConnectionConfig::default(),
            cache: FallbackCacheConfig::default(),
            delivery: DeliveryConfig::default(),
            webhooks: WebhookClientConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("BGW_HOST").ok().unwrap_or_else(|| DEFAULT_BGW_HOST.into());
        let port = env_or_default("BGW_PORT", DEFAULT_BGW_PORT);
        let database_url = env::var("BGW_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ BGW_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let replica_database_url = env::var("BGW_REPLICA_DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        match &replica_database_url {
            Some(url) => info!("🪛️ Read replica: {url}"),
            None => info!("🪛️ No read replica is configured. All reads go to the primary store."),
        }
        let fallback_kv_path = env::var("BGW_FALLBACK_KV_PATH").ok().unwrap_or_else(|| {
            info!("🪛️ BGW_FALLBACK_KV_PATH is not set. Using {DEFAULT_FALLBACK_KV_PATH}.");
            DEFAULT_FALLBACK_KV_PATH.to_string()
        });
        let auth = AuthConfig::from_env();
        let use_x_forwarded_for = parse_boolean_flag(env::var("BGW_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("BGW_USE_FORWARDED").ok(), false);
        let start_workers = parse_boolean_flag(env::var("BGW_START_WORKERS").ok(), true);
        let order_expiry = Duration::from_secs(60 * env_or_default("BGW_ORDER_EXPIRY_MINUTES", 30u64));
        let expiry_interval = Duration::from_secs(env_or_default("BGW_EXPIRY_INTERVAL_SECS", 60u64));
        let webhook_retry_interval = Duration::from_secs(env_or_default("BGW_WEBHOOK_RETRY_INTERVAL_SECS", 300u64));
        Self {
            host,
            port,
            database_url,
            replica_database_url,
            fallback_kv_path,
            auth,
            use_x_forwarded_for,
            use_forwarded,
            order_expiry,
            expiry_interval,
            webhook_retry_interval,
            start_workers,
            connection: connection_config_from_env(),
            cache: cache_config_from_env(),
            delivery: delivery_config_from_env(),
            webhooks: WebhookClientConfig::default()
                .with_timeout(Duration::from_secs(env_or_default("BGW_WEBHOOK_TIMEOUT_SECS", 10u64))),
        }
    }
}

/// Reads and parses `name`, falling back to `default` (with a log line saying so) if it is missing or invalid.
fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

fn connection_config_from_env() -> ConnectionConfig {
    let defaults = CircuitBreakerConfig::default();
    let breaker = CircuitBreakerConfig {
        failure_threshold: env_or_default("BGW_BREAKER_FAILURE_THRESHOLD", defaults.failure_threshold),
        error_rate_threshold: env_or_default("BGW_BREAKER_ERROR_RATE", defaults.error_rate_threshold),
        min_calls: env_or_default("BGW_BREAKER_MIN_CALLS", defaults.min_calls),
        window: Duration::from_secs(env_or_default("BGW_BREAKER_WINDOW_SECS", defaults.window.as_secs())),
        cooldown: Duration::from_secs(env_or_default("BGW_BREAKER_COOLDOWN_SECS", defaults.cooldown.as_secs())),
    };
    let call_timeout = Duration::from_millis(env_or_default("BGW_STORE_TIMEOUT_MS", 5000u64));
    ConnectionConfig { call_timeout, breaker }
}

fn cache_config_from_env() -> FallbackCacheConfig {
    let defaults = FallbackCacheConfig::default();
    let ttl_hours = env_or_default("BGW_CACHE_TTL_HOURS", defaults.default_ttl.as_secs() / 3600);
    FallbackCacheConfig {
        capacity: env_or_default("BGW_CACHE_CAPACITY", defaults.capacity),
        default_ttl: Duration::from_secs(ttl_hours * 3600),
    }
}

fn delivery_config_from_env() -> DeliveryConfig {
    let defaults = DeliveryConfig::default();
    let config = DeliveryConfig {
        deposit_mode: env_or_default::<DeliveryMode>("BGW_DEPOSIT_DELIVERY_MODE", defaults.deposit_mode),
        withdraw_mode: env_or_default::<DeliveryMode>("BGW_WITHDRAW_DELIVERY_MODE", defaults.withdraw_mode),
        retry_batch_size: env_or_default("BGW_WEBHOOK_RETRY_BATCH", defaults.retry_batch_size),
        inter_request_delay: Duration::from_millis(env_or_default(
            "BGW_WEBHOOK_RETRY_DELAY_MS",
            u64::try_from(defaults.inter_request_delay.as_millis()).unwrap_or(200),
        )),
    };
    info!("🪛️ Webhook delivery modes: deposit={}, withdraw={}", config.deposit_mode, config.withdraw_mode);
    config
}

//-------------------------------------------------  AuthConfig  -------------------------------------------------------
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Shared secret bank portals send in the `X-Bank-Secret` header.
    pub bank_webhook_secret: Secret<String>,
    /// Bearer token for the admin endpoints. Also required in the body of manual replays.
    pub admin_key: Secret<String>,
    /// Bearer token for the scheduler-triggered endpoints.
    pub cron_secret: Secret<String>,
    pub max_attempts: u32,
    pub attempt_window: Duration,
    pub lockout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bank_webhook_secret: Secret::default(),
            admin_key: Secret::default(),
            cron_secret: Secret::default(),
            max_attempts: 5,
            attempt_window: Duration::from_secs(300),
            lockout: Duration::from_secs(900),
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bank_webhook_secret: secret_from_env("BGW_BANK_WEBHOOK_SECRET"),
            admin_key: secret_from_env("BGW_ADMIN_KEY"),
            cron_secret: secret_from_env("BGW_CRON_SECRET"),
            max_attempts: env_or_default("BGW_AUTH_MAX_ATTEMPTS", defaults.max_attempts),
            attempt_window: Duration::from_secs(env_or_default(
                "BGW_AUTH_WINDOW_SECS",
                defaults.attempt_window.as_secs(),
            )),
            lockout: Duration::from_secs(env_or_default("BGW_AUTH_LOCKOUT_SECS", defaults.lockout.as_secs())),
        }
    }
}

/// An unset secret is left empty, and an empty secret never matches anything, so the endpoints it guards stay closed.
fn secret_from_env(name: &str) -> Secret<String> {
    match env::var(name) {
        Ok(s) if !s.trim().is_empty() => Secret::new(s.trim().to_string()),
        _ => {
            warn!("🚨️ {name} is not set. The endpoints it protects will reject every request.");
            Secret::default()
        },
    }
}
