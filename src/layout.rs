//! 结果目录布局

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `./test-results/{final,iperf,ping,ifconfig,plots}` 与 `./service/logs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsLayout {
    results_root: PathBuf,
    service_root: PathBuf,
}

impl Default for ResultsLayout {
    fn default() -> Self {
        Self::new("./test-results", "./service")
    }
}

impl ResultsLayout {
    pub fn new(results_root: impl Into<PathBuf>, service_root: impl Into<PathBuf>) -> Self {
        Self {
            results_root: results_root.into(),
            service_root: service_root.into(),
        }
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    pub fn final_dir(&self) -> PathBuf {
        self.results_root.join("final")
    }

    pub fn iperf_dir(&self) -> PathBuf {
        self.results_root.join("iperf")
    }

    pub fn ping_dir(&self) -> PathBuf {
        self.results_root.join("ping")
    }

    pub fn ifconfig_dir(&self) -> PathBuf {
        self.results_root.join("ifconfig")
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.results_root.join("plots")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.service_root.join("logs")
    }

    /// 创建所有目录，可重复调用
    pub fn init(&self) -> io::Result<()> {
        for dir in [
            self.log_dir(),
            self.final_dir(),
            self.iperf_dir(),
            self.ping_dir(),
            self.ifconfig_dir(),
            self.plots_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
