//! 配置管理
//!
//! 所有组件的配置集中在 `Config` 中，可从 TOML 文件加载。
//! 每个分节都有默认值，配置文件只需写出需要覆盖的字段。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{CoreResult, QueryError};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub optimizer: OptimizerConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

/// 执行与并行化配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 是否全局启用并行执行
    pub enable_parallel: bool,
    /// 同时在途的子查询上限
    pub max_concurrency: usize,
    /// 预估耗时低于该值（毫秒）的作业不做并行
    pub min_parallel_duration_ms: u64,
    /// 时间分区使用的时间列
    pub time_field: String,
    /// 代价单位到毫秒的换算系数
    pub cost_ms_per_unit: f64,
    /// 检索后端每个具体索引的预估耗时（毫秒）
    pub search_ms_per_index: u64,
    /// 时间范围结束于该窗口（秒）之内的作业不写缓存
    pub recent_data_window_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_concurrency: num_cpus::get().clamp(2, 16),
            min_parallel_duration_ms: 5_000,
            time_field: "timestamp".to_string(),
            cost_ms_per_unit: 0.01,
            search_ms_per_index: 2_000,
            recent_data_window_secs: 300, // 5分钟
        }
    }
}

/// 查询优化器配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 优化结果缓存容量
    pub plan_cache_size: usize,
    /// 顺序扫描告警的行数阈值
    pub seq_scan_row_threshold: f64,
    /// 嵌套循环连接告警的行数阈值
    pub nested_loop_row_threshold: f64,
    /// DSL 未指定 `from` 时使用的表
    pub dsl_default_table: String,
    /// DSL 未指定 `limit` 时追加的安全行数上限
    pub dsl_default_limit: u64,
    /// DSL 裸词全文检索使用的文本列
    pub dsl_text_column: String,
    /// DSL 时间窗口使用的时间列
    pub dsl_time_column: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            plan_cache_size: 1000,
            seq_scan_row_threshold: 100_000.0,
            nested_loop_row_threshold: 10_000.0,
            dsl_default_table: "events".to_string(),
            dsl_default_limit: 10_000,
            dsl_text_column: "message".to_string(),
            dsl_time_column: "timestamp".to_string(),
        }
    }
}

/// 结果缓存实现
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheVariant {
    /// 精确键缓存
    Plain,
    /// 压缩 + 近似重复检测
    Compressed,
}

/// 结果缓存配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub variant: CacheVariant,
    /// 存储键前缀
    pub key_prefix: String,
    /// 未指定时使用的 TTL（秒）
    pub default_ttl_secs: u64,
    /// 序列化结果超过该字节数才尝试压缩
    pub compression_threshold_bytes: usize,
    /// 压缩至少节省的比例，不足则存原文
    pub min_compression_savings: f64,
    /// zstd 压缩级别
    pub compression_level: i32,
    /// 近似重复判定阈值
    pub similarity_threshold: f64,
    /// 指纹结构文本的截断长度
    pub fingerprint_shape_len: usize,
    /// 候选指纹分组使用的前缀长度
    pub fingerprint_prefix_len: usize,
    /// 保留的最近操作耗时条数
    pub latency_history: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            variant: CacheVariant::Compressed,
            key_prefix: "qc".to_string(),
            default_ttl_secs: 3600, // 1小时
            compression_threshold_bytes: 10 * 1024,
            min_compression_savings: 0.2,
            compression_level: 3,
            similarity_threshold: 0.95,
            fingerprint_shape_len: 200,
            fingerprint_prefix_len: 8,
            latency_history: 100,
        }
    }
}

/// 日志配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "querycore".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_files: 5,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| QueryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| QueryError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 开发环境：较小的并发和缓存，调试日志
    pub fn development() -> Self {
        let mut config = Self::default();
        config.execution.max_concurrency = 4;
        config.optimizer.plan_cache_size = 200;
        config.cache.default_ttl_secs = 300;
        config.log.level = "debug".to_string();
        config
    }

    /// 测试环境：固定的并发上限，较小的缓存
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.execution.max_concurrency = 4;
        config.optimizer.plan_cache_size = 16;
        config.cache.latency_history = 10;
        config.log.level = "warn".to_string();
        config
    }

    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: &str| Err(QueryError::Config(msg.to_string()));

        if self.execution.max_concurrency == 0 {
            return invalid("max_concurrency 必须大于0");
        }
        if self.execution.time_field.trim().is_empty() {
            return invalid("time_field 不能为空");
        }
        if self.optimizer.plan_cache_size == 0 {
            return invalid("plan_cache_size 必须大于0");
        }
        if !(0.0..1.0).contains(&self.cache.min_compression_savings) {
            return invalid("min_compression_savings 必须在 [0, 1) 之间");
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return invalid("similarity_threshold 必须在 [0, 1] 之间");
        }
        if self.cache.fingerprint_prefix_len == 0 || self.cache.fingerprint_prefix_len > 64 {
            return invalid("fingerprint_prefix_len 必须在 1..=64 之间");
        }
        if self.cache.key_prefix.is_empty() {
            return invalid("key_prefix 不能为空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.execution.enable_parallel);
        assert_eq!(config.execution.min_parallel_duration_ms, 5_000);
        assert_eq!(config.cache.min_compression_savings, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_save() {
        let temp_file = NamedTempFile::new().expect("Failed to create temporary file");

        let mut config = Config::testing();
        config.execution.max_concurrency = 8;
        config.save(temp_file.path()).expect("Failed to save config");

        let loaded = Config::load(temp_file.path()).expect("Failed to load config");
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        temp_file
            .write_all(b"[execution]\nmax_concurrency = 3\n\n[cache]\nvariant = \"plain\"\n")
            .expect("Failed to write TOML content");

        let loaded = Config::load(temp_file.path()).expect("Failed to load config");
        assert_eq!(loaded.execution.max_concurrency, 3);
        assert_eq!(loaded.cache.variant, CacheVariant::Plain);
        assert_eq!(loaded.optimizer.dsl_default_table, "events");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.execution.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.min_compression_savings = 1.5;
        assert!(config.validate().is_err());
    }
}
