//! 结果收集
//!
//! 按场景确定性地定位 client/server 两端的 JSON 报告，改名带上带宽后缀，
//! 解析并合并为一条记录，同时计算字节数与可靠性。

use crate::scenario::{ArtifactKey, Bandwidths, Protocol, Role, aggregate_file_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),
    /// Present but not (yet) a complete JSON document.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("report is missing `{0}`")]
    MissingField(&'static str),
    /// Reliability is undefined when nothing was sent.
    #[error("bytes_sent is zero, reliability is undefined")]
    DivisionUndefined,
    #[error("byte counter `{0}` overflows u64")]
    Overflow(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CollectError {
    /// 产物缺失或不完整可以重试；数据质量问题不行
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CollectError::DivisionUndefined | CollectError::Overflow(_)
        )
    }
}

/// 一次测试两端的原始报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub client: Value,
    pub server: Value,
}

/// 字节统计；`bytes_received` 与 `reliability` 只对 TCP 有意义
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferTotals {
    pub bytes_sent: u64,
    pub bytes_received: Option<u64>,
    pub reliability: Option<f64>,
}

/// 一次成功 Attempt 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub key: ArtifactKey,
    pub bytes_sent: u64,
    pub bytes_received: Option<u64>,
    pub reliability: Option<f64>,
    pub record: TestRecord,
}

fn counter(report: &Value, pointer: &'static str) -> Result<u64, CollectError> {
    report
        .pointer(pointer)
        .and_then(Value::as_u64)
        .ok_or(CollectError::MissingField(pointer))
}

fn accumulate(total: u64, report: &Value, pointer: &'static str) -> Result<u64, CollectError> {
    total
        .checked_add(counter(report, pointer)?)
        .ok_or(CollectError::Overflow(pointer))
}

/// 对若干条记录求和。
///
/// TCP 累加 client 端的 `end.sum_sent.bytes` 与 `end.sum_received.bytes`，
/// 可靠性 = 收 / 发；UDP 只累加 `end.sum.bytes`。
///
/// UDP 同样是所有记录的总和：一个扫描点的两条 UDP 测试都计入，
/// 所以 UDP 吞吐量是只取最后一条记录时的两倍左右。
pub fn summarize<'a>(
    protocol: Protocol,
    records: impl IntoIterator<Item = &'a TestRecord>,
) -> Result<TransferTotals, CollectError> {
    match protocol {
        Protocol::Tcp => {
            let (mut sent, mut received) = (0u64, 0u64);
            for record in records {
                sent = accumulate(sent, &record.client, "/end/sum_sent/bytes")?;
                received = accumulate(received, &record.client, "/end/sum_received/bytes")?;
            }
            if sent == 0 {
                return Err(CollectError::DivisionUndefined);
            }
            Ok(TransferTotals {
                bytes_sent: sent,
                bytes_received: Some(received),
                reliability: Some(received as f64 / sent as f64),
            })
        }
        Protocol::Udp => {
            let mut sent = 0u64;
            for record in records {
                sent = accumulate(sent, &record.client, "/end/sum/bytes")?;
            }
            Ok(TransferTotals {
                bytes_sent: sent,
                bytes_received: None,
                reliability: None,
            })
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn load_json(path: &Path) -> Result<Value, CollectError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CollectError::ArtifactNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw).map_err(|source| CollectError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// 流量生成器报告所在目录上的收集器
#[derive(Debug, Clone)]
pub struct ResultCollector {
    dir: PathBuf,
}

impl ResultCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn raw_path(&self, key: &ArtifactKey, role: Role) -> PathBuf {
        self.dir.join(key.raw_file_name(role))
    }

    pub fn scenario_path(&self, key: &ArtifactKey, role: Role) -> PathBuf {
        self.dir.join(key.scenario_file_name(role))
    }

    /// 删除该场景两端的所有旧产物，避免上一次 Attempt 的文件被误认为本次结果
    pub fn invalidate(&self, key: &ArtifactKey) -> io::Result<()> {
        for role in [Role::Client, Role::Server] {
            remove_if_exists(&self.raw_path(key, role))?;
            remove_if_exists(&self.scenario_path(key, role))?;
        }
        Ok(())
    }

    /// 把生成器写出的文件改名为带带宽后缀的名字（覆盖旧文件）
    fn promote(&self, key: &ArtifactKey, role: Role) -> io::Result<PathBuf> {
        let raw = self.raw_path(key, role);
        let target = self.scenario_path(key, role);
        match fs::rename(&raw, &target) {
            Ok(()) => trace!(from = %raw.display(), to = %target.display(), "产物已改名"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(target)
    }

    /// 收集一次测试的结果
    pub fn collect(&self, key: &ArtifactKey) -> Result<TestResult, CollectError> {
        let client_path = self.promote(key, Role::Client)?;
        let server_path = self.promote(key, Role::Server)?;
        let record = TestRecord {
            client: load_json(&client_path)?,
            server: load_json(&server_path)?,
        };
        let totals = summarize(key.protocol, std::iter::once(&record))?;
        debug!(
            protocol = %key.protocol,
            bytes_sent = totals.bytes_sent,
            bytes_received = ?totals.bytes_received,
            "结果已收集"
        );
        Ok(TestResult {
            key: *key,
            bytes_sent: totals.bytes_sent,
            bytes_received: totals.bytes_received,
            reliability: totals.reliability,
            record,
        })
    }
}

/// 写出扫描级汇总 `output-{tcp|udp}-{bb}-{bo}.json`，键为从 1 开始的序号
pub fn write_aggregate(
    final_dir: &Path,
    protocol: Protocol,
    bandwidths: &Bandwidths,
    records: &[Option<TestRecord>],
) -> Result<PathBuf, CollectError> {
    let doc: BTreeMap<String, Option<&TestRecord>> = records
        .iter()
        .enumerate()
        .map(|(i, r)| ((i + 1).to_string(), r.as_ref()))
        .collect();
    let path = final_dir.join(aggregate_file_name(protocol, bandwidths));
    let raw = serde_json::to_string(&doc).map_err(|source| CollectError::Parse {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, raw)?;
    Ok(path)
}

/// 读回汇总文件，按序号排列；`null` 条目为 `None`
pub fn load_aggregate(path: &Path) -> Result<Vec<Option<TestRecord>>, CollectError> {
    let doc: BTreeMap<String, Option<TestRecord>> =
        serde_json::from_value(load_json(path)?).map_err(|source| CollectError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let mut entries: Vec<(u64, Option<TestRecord>)> = doc
        .into_iter()
        .map(|(k, v)| (k.parse().unwrap_or(u64::MAX), v))
        .collect();
    entries.sort_by_key(|(k, _)| *k);
    Ok(entries.into_iter().map(|(_, v)| v).collect())
}
