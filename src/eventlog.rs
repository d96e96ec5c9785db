//! 事件日志
//!
//! 只追加、按实例递增编号的审计日志。每个关注点（配置/成功/错误）一个文件，
//! 每次写入都以 append 模式重新打开，不做轮转。

use crate::scenario::Bandwidths;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const DEFAULT_PREFIX: &str = "[ LOG ] >>";

/// 单个日志文件的写入器
#[derive(Debug)]
pub struct EventLogger {
    path: PathBuf,
    prefix: String,
    index: u64,
}

impl EventLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_prefix(path, DEFAULT_PREFIX)
    }

    pub fn with_prefix(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
            index: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 下一条事件的编号
    pub fn next_index(&self) -> u64 {
        self.index
    }

    /// 追加 `"{prefix} {index} >> {message}\n"`。
    ///
    /// 写入失败时编号不前进。
    pub fn log(&mut self, message: &str) -> io::Result<()> {
        let line = format!("{} {} >> {}\n", self.prefix, self.index, message);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(line.as_bytes())?;
        self.index += 1;
        Ok(())
    }
}

/// 一次运行的成功/错误两条日志流
#[derive(Debug)]
pub struct SessionLogs {
    success: EventLogger,
    error: EventLogger,
}

impl SessionLogs {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            success: EventLogger::new(log_dir.join("success-output.txt")),
            error: EventLogger::new(log_dir.join("error-output.txt")),
        }
    }

    pub fn success(&mut self, message: &str) {
        info!(%message, "✅");
        if let Err(e) = self.success.log(message) {
            warn!(path = %self.success.path().display(), error = %e, "写入成功日志失败");
        }
    }

    pub fn error(&mut self, message: &str) {
        error!(%message, "❌");
        if let Err(e) = self.error.log(message) {
            warn!(path = %self.error.path().display(), error = %e, "写入错误日志失败");
        }
    }
}

/// 每个扫描点单独的配置日志 `output-network-config-{bb}-{bo}.txt`
pub fn configuration_logger(log_dir: &Path, bandwidths: &Bandwidths) -> EventLogger {
    EventLogger::new(log_dir.join(format!(
        "output-network-config-{}.txt",
        bandwidths.suffix()
    )))
}

/// 给消息加上 `-{bottleneck}-{other}` 后缀，标明所属扫描点
pub fn instance_message(message: &str, bandwidths: &Bandwidths) -> String {
    format!("{}-{}", message, bandwidths.suffix())
}
