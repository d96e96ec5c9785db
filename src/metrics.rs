//! 指标汇总
//!
//! 由字节数和测试时长计算吞吐量，并按扫描配置顺序累积每个瓶颈带宽的结果。

use crate::collect::TransferTotals;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("duration must be positive")]
    InvalidDuration,
    #[error("TCP totals carry no received byte count")]
    MissingReceived,
    #[error("TCP sent + received bytes overflow u64")]
    Overflow,
}

/// 吞吐量（字节/秒）
pub fn throughput(total_bytes: u64, duration_secs: u64) -> Result<f64, MetricsError> {
    if duration_secs == 0 {
        return Err(MetricsError::InvalidDuration);
    }
    Ok(total_bytes as f64 / duration_secs as f64)
}

/// 一个瓶颈带宽下的三项指标
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepPoint {
    pub tcp_throughput: f64,
    pub tcp_reliability: f64,
    pub udp_throughput: f64,
}

impl SweepPoint {
    /// TCP 吞吐量按 发 + 收 计算；UDP 只有发送字节
    pub fn from_totals(
        tcp: &TransferTotals,
        udp: &TransferTotals,
        duration_secs: u64,
    ) -> Result<Self, MetricsError> {
        let (Some(received), Some(reliability)) = (tcp.bytes_received, tcp.reliability) else {
            return Err(MetricsError::MissingReceived);
        };
        Ok(Self {
            tcp_throughput: throughput(
                tcp.bytes_sent
                    .checked_add(received)
                    .ok_or(MetricsError::Overflow)?,
                duration_secs,
            )?,
            tcp_reliability: reliability,
            udp_throughput: throughput(udp.bytes_sent, duration_secs)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    TcpThroughput,
    TcpReliability,
    UdpThroughput,
}

impl Metric {
    fn pick(self, p: &SweepPoint) -> f64 {
        match self {
            Metric::TcpThroughput => p.tcp_throughput,
            Metric::TcpReliability => p.tcp_reliability,
            Metric::UdpThroughput => p.udp_throughput,
        }
    }
}

/// 瓶颈带宽 -> 指标，保持插入顺序（即扫描配置顺序，不做数值排序）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepResult {
    points: Vec<(u64, SweepPoint)>,
}

impl SweepResult {
    /// 同一带宽再次插入时原位覆盖
    pub fn insert(&mut self, bottleneck_mbps: u64, point: SweepPoint) {
        match self.points.iter_mut().find(|(bw, _)| *bw == bottleneck_mbps) {
            Some(slot) => slot.1 = point,
            None => self.points.push((bottleneck_mbps, point)),
        }
    }

    pub fn get(&self, bottleneck_mbps: u64) -> Option<&SweepPoint> {
        self.points
            .iter()
            .find(|(bw, _)| *bw == bottleneck_mbps)
            .map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bandwidths(&self) -> Vec<u64> {
        self.points.iter().map(|(bw, _)| *bw).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u64, SweepPoint)> {
        self.points.iter()
    }

    /// 单项指标的 (带宽, 值) 序列
    pub fn series(&self, metric: Metric) -> Vec<(u64, f64)> {
        self.points
            .iter()
            .map(|(bw, p)| (*bw, metric.pick(p)))
            .collect()
    }
}
