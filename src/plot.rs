//! 绘图数据输出
//!
//! 本 crate 不负责渲染；扫描结束后把 (带宽, 指标) 序列交给 [`PlotSink`]。
//! 默认实现把每张图写成一个 JSON 文件，供外部渲染器读取。

use crate::metrics::{Metric, SweepResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    pub label: String,
    /// (x = 瓶颈带宽, y = 指标)
    pub points: Vec<(u64, f64)>,
}

/// 一张折线图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    pub file_name: String,
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub series: Vec<PlotSeries>,
}

pub trait PlotSink {
    fn emit(&mut self, plot: &PlotSpec) -> io::Result<()>;
}

/// 吞吐量图与可靠性图
pub fn sweep_plots(result: &SweepResult) -> Vec<PlotSpec> {
    let series = |label: &str, metric| PlotSeries {
        label: label.to_string(),
        points: result.series(metric),
    };
    vec![
        PlotSpec {
            file_name: "analysis.json".into(),
            title: "TCP and UDP Throughput vs Bottleneck Bandwidth".into(),
            xlabel: "Bottleneck Bandwidth (Mbps)".into(),
            ylabel: "Throughput (Bytes/Second)".into(),
            series: vec![
                series("TCP Throughput", Metric::TcpThroughput),
                series("UDP Throughput", Metric::UdpThroughput),
            ],
        },
        PlotSpec {
            file_name: "reliability.json".into(),
            title: "TCP Reliability vs Bottleneck Bandwidth".into(),
            xlabel: "Bottleneck Bandwidth (Mbps)".into(),
            ylabel: "Link reliability".into(),
            series: vec![series("Reliability", Metric::TcpReliability)],
        },
    ]
}

/// 写到 plots 目录
#[derive(Debug, Clone)]
pub struct JsonPlotWriter {
    dir: PathBuf,
}

impl JsonPlotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PlotSink for JsonPlotWriter {
    fn emit(&mut self, plot: &PlotSpec) -> io::Result<()> {
        let path = self.dir.join(&plot.file_name);
        let raw = serde_json::to_string_pretty(plot).map_err(io::Error::other)?;
        fs::write(&path, raw)?;
        info!(path = %path.display(), title = %plot.title, "📈 绘图数据已写出");
        Ok(())
    }
}
