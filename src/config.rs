//! 扫描配置
//!
//! 可选的 JSON 配置文件 + 命令行覆盖。所有检查在分配任何仿真资源之前完成。

use crate::orchestrator::RetryPolicy;
use crate::scenario::Protocol;
use crate::topo::{BottleneckOpts, build_bottleneck};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVICE_PORT: u16 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bottleneck bandwidth {bottleneck} Mbps must be lower than other bandwidth {other} Mbps")]
    BottleneckNotLower { bottleneck: u64, other: u64 },
    #[error("bandwidths must be positive")]
    NonPositiveBandwidth,
    #[error("no bottleneck bandwidths to test")]
    NoConstraints,
    #[error("invalid bandwidth `{0}` in constraints")]
    InvalidConstraint(String),
    #[error("test duration must be positive")]
    InvalidDuration,
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("test plan has no {0} test")]
    MissingProtocol(Protocol),
    #[error("`{0}` is not a host of the bottleneck topology")]
    UnknownHost(String),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn default_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

/// 每个扫描点要跑的一次测试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTest {
    pub client: String,
    pub server: String,
    pub protocol: Protocol,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl PlannedTest {
    fn new(client: &str, server: &str, protocol: Protocol) -> Self {
        Self {
            client: client.to_string(),
            server: server.to_string(),
            protocol,
            port: DEFAULT_SERVICE_PORT,
        }
    }
}

/// h1<->h3 双向 TCP，h2<->h4 双向 UDP
pub fn default_test_plan() -> Vec<PlannedTest> {
    vec![
        PlannedTest::new("h1", "h3", Protocol::Tcp),
        PlannedTest::new("h3", "h1", Protocol::Tcp),
        PlannedTest::new("h2", "h4", Protocol::Udp),
        PlannedTest::new("h4", "h2", Protocol::Udp),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub duration_secs: u64,
    /// 按此顺序扫描，结果也按此顺序排列
    pub constraints: Vec<u64>,
    pub other_mbps: u64,
    pub max_attempts: u32,
    pub artifact_timeout_ms: u64,
    pub results_root: PathBuf,
    pub service_root: PathBuf,
    /// 测试前运行 ifconfig/ping 检查
    pub diagnostics: bool,
    pub tests: Vec<PlannedTest>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            constraints: vec![8, 32, 64],
            other_mbps: 100,
            max_attempts: 5,
            artifact_timeout_ms: 10_000,
            results_root: PathBuf::from("./test-results"),
            service_root: PathBuf::from("./service"),
            diagnostics: true,
            tests: default_test_plan(),
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            artifact_timeout: Duration::from_millis(self.artifact_timeout_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_secs == 0 {
            return Err(ConfigError::InvalidDuration);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.constraints.is_empty() {
            return Err(ConfigError::NoConstraints);
        }
        if self.other_mbps == 0 {
            return Err(ConfigError::NonPositiveBandwidth);
        }
        for &bottleneck in &self.constraints {
            if bottleneck == 0 {
                return Err(ConfigError::NonPositiveBandwidth);
            }
            if bottleneck >= self.other_mbps {
                return Err(ConfigError::BottleneckNotLower {
                    bottleneck,
                    other: self.other_mbps,
                });
            }
        }
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            if !self.tests.iter().any(|t| t.protocol == protocol) {
                return Err(ConfigError::MissingProtocol(protocol));
            }
        }

        // 形状固定，用任意合法带宽构建一次即可校验主机名
        let shape = build_bottleneck(&BottleneckOpts::default())
            .map_err(|_| ConfigError::NonPositiveBandwidth)?;
        for test in &self.tests {
            for name in [&test.client, &test.server] {
                if !shape.node_by_name(name).is_some_and(|n| n.role.is_host()) {
                    return Err(ConfigError::UnknownHost(name.clone()));
                }
            }
        }
        Ok(())
    }
}

/// 解析 `"8 32 64"` 形式的带宽列表
pub fn parse_constraints(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split_whitespace()
        .map(|tok| {
            tok.parse::<u64>()
                .map_err(|_| ConfigError::InvalidConstraint(tok.to_string()))
        })
        .collect()
}
