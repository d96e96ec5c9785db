//! 带宽扫描
//!
//! 按配置顺序依次测试每个瓶颈带宽：清理仿真状态、构建拓扑、实例化并启动网络、
//! 跑完测试计划、停止网络、写汇总、计算指标。单个扫描点失败只会让该点缺席，
//! 配置错误则在分配任何仿真资源之前终止整个运行。

use crate::collect::{
    CollectError, ResultCollector, TestRecord, load_aggregate, summarize, write_aggregate,
};
use crate::config::{ConfigError, SweepConfig};
use crate::diagnostics::run_topology_checks;
use crate::emu::{EmulatedNetwork, EmulationError, EmulationProvider};
use crate::eventlog::{SessionLogs, configuration_logger, instance_message};
use crate::layout::ResultsLayout;
use crate::metrics::{MetricsError, SweepPoint, SweepResult};
use crate::orchestrator::Orchestrator;
use crate::plot::{PlotSink, sweep_plots};
use crate::scenario::{Bandwidths, Protocol, TestScenario, aggregate_file_name};
use crate::topo::{BottleneckOpts, TopologyError, build_bottleneck};
use crate::trafficgen::TrafficGenConfig;
use std::io;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare results directories: {0}")]
    Layout(#[source] io::Error),
}

/// 一个扫描点无法给出指标的原因
#[derive(Debug, Error)]
pub enum PointError {
    #[error("missing {0} results")]
    Missing(Protocol),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Emulation(#[from] EmulationError),
}

fn complete(protocol: Protocol, records: &[Option<TestRecord>]) -> Result<Vec<&TestRecord>, PointError> {
    if records.is_empty() {
        return Err(PointError::Missing(protocol));
    }
    records
        .iter()
        .map(|r| r.as_ref().ok_or(PointError::Missing(protocol)))
        .collect()
}

/// 由两种协议的全部记录计算一个扫描点；任何一条缺失都不给出结果
pub fn sweep_point(
    tcp: &[Option<TestRecord>],
    udp: &[Option<TestRecord>],
    duration_secs: u64,
) -> Result<SweepPoint, PointError> {
    let tcp = summarize(Protocol::Tcp, complete(Protocol::Tcp, tcp)?)?;
    let udp = summarize(Protocol::Udp, complete(Protocol::Udp, udp)?)?;
    Ok(SweepPoint::from_totals(&tcp, &udp, duration_secs)?)
}

fn emit_plots(result: &SweepResult, plots: &mut dyn PlotSink, logs: &mut SessionLogs) {
    for plot in sweep_plots(result) {
        if let Err(e) = plots.emit(&plot) {
            logs.error(&format!("[ ERROR ] failed to write plot {}: {e}", plot.file_name));
        }
    }
}

pub struct Sweep<'a> {
    config: &'a SweepConfig,
    trafficgen: &'a TrafficGenConfig,
    layout: ResultsLayout,
}

impl<'a> Sweep<'a> {
    pub fn new(config: &'a SweepConfig, trafficgen: &'a TrafficGenConfig) -> Self {
        Self {
            config,
            trafficgen,
            layout: ResultsLayout::new(&config.results_root, &config.service_root),
        }
    }

    pub fn layout(&self) -> &ResultsLayout {
        &self.layout
    }

    fn prepare(&self) -> Result<SessionLogs, SweepError> {
        self.config.validate()?;
        self.layout.init().map_err(SweepError::Layout)?;
        Ok(SessionLogs::new(&self.layout.log_dir()))
    }

    /// 运行完整扫描并输出绘图数据
    #[tracing::instrument(skip_all, fields(constraints = ?self.config.constraints))]
    pub fn run<P: EmulationProvider>(
        &self,
        provider: &mut P,
        plots: &mut dyn PlotSink,
    ) -> Result<SweepResult, SweepError> {
        let mut logs = self.prepare()?;
        let collector = ResultCollector::new(self.layout.iperf_dir());
        let mut result = SweepResult::default();

        for &bottleneck_mbps in &self.config.constraints {
            let bandwidths = Bandwidths {
                bottleneck_mbps,
                other_mbps: self.config.other_mbps,
            };
            info!(bottleneck_mbps, other_mbps = bandwidths.other_mbps, "🚦 开始扫描点");
            match self.run_point(provider, &bandwidths, &collector, &mut logs) {
                Ok(point) => result.insert(bottleneck_mbps, point),
                Err(e) => logs.error(&instance_message(
                    &format!("[ ERROR ] no data point recorded: {e}"),
                    &bandwidths,
                )),
            }
        }

        emit_plots(&result, plots, &mut logs);
        info!(points = result.len(), "扫描结束");
        Ok(result)
    }

    fn run_point<P: EmulationProvider>(
        &self,
        provider: &mut P,
        bandwidths: &Bandwidths,
        collector: &ResultCollector,
        logs: &mut SessionLogs,
    ) -> Result<SweepPoint, PointError> {
        let log_dir = self.layout.log_dir();
        let mut config_log = configuration_logger(&log_dir, bandwidths);
        let mut note = |message: String| {
            if let Err(e) = config_log.log(&message) {
                warn!(error = %e, "写入配置日志失败");
            }
        };
        note(instance_message("Preparing run_perf_tests...", bandwidths));
        note(format!(
            "Simulation (s) run duration is : {}.",
            self.config.duration_secs
        ));

        // 上一次运行可能残留 namespace
        if let Err(e) = provider.reset() {
            logs.error(&instance_message(
                &format!("[ ERROR ] failure to reset emulator state: {e}"),
                bandwidths,
            ));
        }

        let opts = BottleneckOpts {
            bottleneck_mbps: bandwidths.bottleneck_mbps,
            other_mbps: bandwidths.other_mbps,
        };
        let topology = build_bottleneck(&opts)?;
        let mut net = provider.instantiate(&topology)?;
        // 启动失败时 net 被 drop，namespace 随之清理
        net.start()?;
        logs.success(&instance_message("successfully started emulated network", bandwidths));

        note(format!(
            "Bandwidth for bottleneck link is : {}.",
            bandwidths.bottleneck_mbps
        ));
        note(format!(
            "Bandwidth for standard links is : {}.",
            bandwidths.other_mbps
        ));

        if self.config.diagnostics {
            run_topology_checks(&net, &topology, &self.layout, bandwidths, logs);
        }

        let mut tcp = Vec::new();
        let mut udp = Vec::new();
        let mut unusable: Option<CollectError> = None;
        {
            let mut orchestrator = Orchestrator::new(
                &net,
                collector,
                self.trafficgen,
                logs,
                self.config.retry_policy(),
            );
            for test in &self.config.tests {
                let scenario = TestScenario {
                    client: test.client.clone(),
                    server: test.server.clone(),
                    protocol: test.protocol,
                    port: test.port,
                    bandwidths: *bandwidths,
                    duration: self.config.duration(),
                };
                // 数据质量错误：汇总里记为缺失，扫描点报告这个原因
                let record = match orchestrator.run(&scenario) {
                    Ok(result) => result.map(|r| r.record),
                    Err(e) => {
                        unusable.get_or_insert(e);
                        None
                    }
                };
                match test.protocol {
                    Protocol::Tcp => tcp.push(record),
                    Protocol::Udp => udp.push(record),
                }
            }
        }

        if let Err(e) = net.stop() {
            logs.error(&instance_message(
                &format!("[ ERROR ] failure to gracefully stop emulated network: {e}"),
                bandwidths,
            ));
        }

        let final_dir = self.layout.final_dir();
        for (protocol, records) in [(Protocol::Tcp, &tcp), (Protocol::Udp, &udp)] {
            match write_aggregate(&final_dir, protocol, bandwidths, records) {
                Ok(path) => logs.success(&instance_message(
                    &format!("successfully wrote {}", path.display()),
                    bandwidths,
                )),
                Err(e) => logs.error(&instance_message(
                    &format!("[ ERROR ] failed to write {protocol} aggregate: {e}"),
                    bandwidths,
                )),
            }
        }

        if let Some(e) = unusable {
            return Err(e.into());
        }
        sweep_point(&tcp, &udp, self.config.duration_secs)
    }

    /// 不运行仿真，只读取已有的 `output-{tcp|udp}-*.json` 重新计算指标和绘图
    pub fn analyze_existing(&self, plots: &mut dyn PlotSink) -> Result<SweepResult, SweepError> {
        let mut logs = self.prepare()?;
        let final_dir = self.layout.final_dir();
        let mut result = SweepResult::default();

        for &bottleneck_mbps in &self.config.constraints {
            let bandwidths = Bandwidths {
                bottleneck_mbps,
                other_mbps: self.config.other_mbps,
            };
            let load = |protocol| load_aggregate(&final_dir.join(aggregate_file_name(protocol, &bandwidths)));
            let point = load(Protocol::Tcp)
                .and_then(|tcp| Ok((tcp, load(Protocol::Udp)?)))
                .map_err(PointError::from)
                .and_then(|(tcp, udp)| sweep_point(&tcp, &udp, self.config.duration_secs));
            match point {
                Ok(point) => result.insert(bottleneck_mbps, point),
                Err(e) => logs.error(&instance_message(
                    &format!("[ ERROR ] no data point recorded: {e}"),
                    &bandwidths,
                )),
            }
        }

        emit_plots(&result, plots, &mut logs);
        Ok(result)
    }
}
