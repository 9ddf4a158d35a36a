use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::utils::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub stock_warning: StockWarningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 为空时使用进程内存储（开发 / 演示）
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(format!("unknown cache backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default)]
    pub redis_url: String,
    /// 所有缓存 key 的命名空间前缀
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "mall".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// PersistenceConflict 的最大重试次数
    pub max_retries: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// 单次准入（含重试）的总超时
    pub timeout_ms: u64,
    /// 单条语句等待行锁的上限
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    1_000
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_initial_delay_ms: 20,
            retry_max_delay_ms: 500,
            timeout_ms: 3_000,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .build()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// 场次/活动/拼团 时间驱动状态推进间隔
    pub campaign_interval_secs: u64,
    /// 拼团过期扫描间隔
    pub group_expiry_interval_secs: u64,
    /// 秒杀订单支付超时扫描间隔
    pub payment_timeout_interval_secs: u64,
    /// 秒杀订单未支付自动取消时间
    pub payment_timeout_secs: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            campaign_interval_secs: 5,
            group_expiry_interval_secs: 60,
            payment_timeout_interval_secs: 30,
            payment_timeout_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockWarningConfig {
    /// 普通库存低于等于该值时发出预警
    pub threshold: i64,
}

impl Default for StockWarningConfig {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 有配置文件先解析，没有则全部使用默认值 + 环境变量
        let mut config: Config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("Config file {config_path} not found, using defaults and environment");
                Config::default()
            }
            Err(e) => {
                return Err(format!("failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| format!("failed to parse config file: {e}"))?;
        Ok(config)
    }

    /// 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn get_env_parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            lookup(name).and_then(|v| v.parse::<T>().ok())
        }

        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(n) = get_env_parse(&lookup, "DB_MAX_CONNECTIONS") {
            self.database.max_connections = n;
        }
        if let Some(b) = get_env_parse(&lookup, "CACHE_BACKEND") {
            self.cache.backend = b;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.cache.redis_url = v;
        }
        if let Some(v) = lookup("CACHE_KEY_PREFIX") {
            self.cache.key_prefix = v;
        }
        if let Some(n) = get_env_parse(&lookup, "ADMISSION_MAX_RETRIES") {
            self.admission.max_retries = n;
        }
        if let Some(n) = get_env_parse(&lookup, "ADMISSION_TIMEOUT_MS") {
            self.admission.timeout_ms = n;
        }
        if let Some(n) = get_env_parse(&lookup, "ADMISSION_LOCK_TIMEOUT_MS") {
            self.admission.lock_timeout_ms = n;
        }
        if let Some(n) = get_env_parse(&lookup, "SWEEP_CAMPAIGN_INTERVAL_SECS") {
            self.sweep.campaign_interval_secs = n;
        }
        if let Some(n) = get_env_parse(&lookup, "SWEEP_GROUP_EXPIRY_INTERVAL_SECS") {
            self.sweep.group_expiry_interval_secs = n;
        }
        if let Some(n) = get_env_parse(&lookup, "SWEEP_PAYMENT_TIMEOUT_INTERVAL_SECS") {
            self.sweep.payment_timeout_interval_secs = n;
        }
        if let Some(n) = get_env_parse(&lookup, "PAYMENT_TIMEOUT_SECS") {
            self.sweep.payment_timeout_secs = n;
        }
        if let Some(n) = get_env_parse(&lookup, "STOCK_WARNING_THRESHOLD") {
            self.stock_warning.threshold = n;
        }
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_empty() {
            return Err("cache.backend = redis requires cache.redis_url".into());
        }
        if self.sweep.campaign_interval_secs == 0
            || self.sweep.group_expiry_interval_secs == 0
            || self.sweep.payment_timeout_interval_secs == 0
        {
            return Err("sweep intervals must be positive".into());
        }
        if self.sweep.payment_timeout_secs <= 0 {
            return Err("sweep.payment_timeout_secs must be positive".into());
        }
        if self.admission.timeout_ms == 0 || self.admission.lock_timeout_ms == 0 {
            return Err("admission timeouts must be positive".into());
        }
        Ok(())
    }
}
