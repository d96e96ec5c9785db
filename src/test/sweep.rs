use super::fake_emu::{Behaviour, FakeProvider, Shared, shared};
use super::unique_temp_dir;
use crate::collect::{TestRecord, load_aggregate};
use crate::config::{ConfigError, SweepConfig};
use crate::metrics::SweepResult;
use crate::plot::{PlotSink, PlotSpec};
use crate::sweep::{Sweep, SweepError, sweep_point};
use crate::trafficgen::TrafficGenConfig;
use serde_json::json;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Default)]
struct RecordingSink {
    plots: Vec<PlotSpec>,
}

impl PlotSink for RecordingSink {
    fn emit(&mut self, plot: &PlotSpec) -> io::Result<()> {
        self.plots.push(plot.clone());
        Ok(())
    }
}

fn config(root: &Path, constraints: Vec<u64>) -> SweepConfig {
    SweepConfig {
        duration_secs: 5,
        constraints,
        max_attempts: 2,
        artifact_timeout_ms: 20,
        results_root: root.join("results"),
        service_root: root.join("service"),
        diagnostics: false,
        ..SweepConfig::default()
    }
}

fn trafficgen() -> TrafficGenConfig {
    TrafficGenConfig {
        server_program: "trafficgen server".into(),
        client_program: "trafficgen client".into(),
        out_dir: None,
    }
}

fn run(cfg: &SweepConfig, state: &Shared) -> (Result<SweepResult, SweepError>, RecordingSink) {
    let tg = trafficgen();
    let sweep = Sweep::new(cfg, &tg);
    let mut provider = FakeProvider::new(state.clone());
    let mut sink = RecordingSink::default();
    let result = sweep.run(&mut provider, &mut sink);
    (result, sink)
}

#[test]
fn sweep_keeps_configured_order() {
    let dir = unique_temp_dir("sweep-order");
    let cfg = config(&dir, vec![64, 8, 32]);
    let state = shared(
        cfg.results_root.join("iperf"),
        Behaviour::WriteTcp {
            sent: 1_000_000,
            recv: 950_000,
        },
        Behaviour::WriteUdp { sent: 2_000_000 },
    );

    let (result, sink) = run(&cfg, &state);
    let result = result.expect("sweep ok");
    assert_eq!(result.bandwidths(), vec![64, 8, 32]);

    // 两条 TCP 测试、两条 UDP 测试累加
    let p = result.get(8).expect("point for 8");
    assert_eq!(p.tcp_throughput, 780_000.0);
    assert_eq!(p.tcp_reliability, 0.95);
    assert_eq!(p.udp_throughput, 800_000.0);

    {
        let s = state.borrow();
        assert_eq!(s.resets, 3);
        assert_eq!(s.instantiates, 3);
        assert_eq!(s.starts, 3);
        assert_eq!(s.stops, 3);
        assert_eq!(s.spawns, 12);
        assert_eq!(s.outstanding, 0);
        assert_eq!(s.max_outstanding, 1);
    }

    let final_dir = cfg.results_root.join("final");
    let tcp = load_aggregate(&final_dir.join("output-tcp-64-100.json")).expect("tcp aggregate");
    assert_eq!(tcp.len(), 2);
    assert!(tcp.iter().all(Option::is_some));
    assert!(final_dir.join("output-udp-32-100.json").exists());

    let config_log = fs::read_to_string(
        cfg.service_root
            .join("logs")
            .join("output-network-config-8-100.txt"),
    )
    .expect("config log");
    assert!(config_log.starts_with("[ LOG ] >> 0 >> Preparing run_perf_tests...-8-100\n"));
    assert!(config_log.contains("Bandwidth for bottleneck link is : 8."));

    assert_eq!(sink.plots.len(), 2);
    assert_eq!(sink.plots[0].file_name, "analysis.json");
    let xs: Vec<u64> = sink.plots[0].series[0].points.iter().map(|(x, _)| *x).collect();
    assert_eq!(xs, vec![64, 8, 32]);
}

#[test]
fn sweep_configuration_error_allocates_nothing() {
    let dir = unique_temp_dir("sweep-config-error");
    let cfg = config(&dir, vec![8, 200]);
    let state = shared(
        cfg.results_root.join("iperf"),
        Behaviour::NeverWrite,
        Behaviour::NeverWrite,
    );

    let (result, sink) = run(&cfg, &state);
    assert!(matches!(
        result,
        Err(SweepError::Config(ConfigError::BottleneckNotLower {
            bottleneck: 200,
            other: 100
        }))
    ));
    let s = state.borrow();
    assert_eq!(s.resets, 0);
    assert_eq!(s.instantiates, 0);
    assert!(sink.plots.is_empty());
    assert!(!cfg.results_root.exists());
}

#[test]
fn sweep_skips_points_with_missing_results() {
    let dir = unique_temp_dir("sweep-missing");
    let cfg = config(&dir, vec![8, 32]);
    let state = shared(
        cfg.results_root.join("iperf"),
        Behaviour::NeverWrite,
        Behaviour::WriteUdp { sent: 2_000_000 },
    );

    let (result, sink) = run(&cfg, &state);
    let result = result.expect("sweep completes");
    assert!(result.is_empty());
    assert_eq!(state.borrow().instantiates, 2);

    let tcp = load_aggregate(&cfg.results_root.join("final").join("output-tcp-8-100.json"))
        .expect("tcp aggregate");
    assert_eq!(tcp, vec![None, None]);

    let errors = fs::read_to_string(cfg.service_root.join("logs").join("error-output.txt"))
        .expect("error log");
    assert!(errors.contains("no data point recorded: missing tcp results-32-100"));
    assert_eq!(sink.plots.len(), 2);
    assert!(sink.plots[0].series[0].points.is_empty());
}

#[test]
fn analyze_existing_recomputes_from_aggregates() {
    let dir = unique_temp_dir("sweep-analyze");
    let cfg = config(&dir, vec![32, 8]);
    let state = shared(
        cfg.results_root.join("iperf"),
        Behaviour::WriteTcp {
            sent: 1_000_000,
            recv: 950_000,
        },
        Behaviour::WriteUdp { sent: 2_000_000 },
    );
    let (live, _) = run(&cfg, &state);
    let live = live.expect("live sweep");

    let tg = trafficgen();
    let mut sink = RecordingSink::default();
    let offline = Sweep::new(&cfg, &tg)
        .analyze_existing(&mut sink)
        .expect("analyze");
    assert_eq!(offline, live);
    assert_eq!(state.borrow().instantiates, 2);
}

#[test]
fn sweep_point_requires_every_record() {
    let tcp = TestRecord {
        client: json!({"end": {"sum_sent": {"bytes": 1_000_000}, "sum_received": {"bytes": 950_000}}}),
        server: json!({}),
    };
    let udp = TestRecord {
        client: json!({"end": {"sum": {"bytes": 2_000_000}}}),
        server: json!({}),
    };

    let p = sweep_point(&[Some(tcp.clone())], &[Some(udp.clone())], 5).expect("point");
    assert_eq!(p.tcp_throughput, 390_000.0);
    assert_eq!(p.udp_throughput, 400_000.0);

    assert!(sweep_point(&[Some(tcp.clone()), None], &[Some(udp.clone())], 5).is_err());
    assert!(sweep_point(&[Some(tcp)], &[], 5).is_err());
}

#[test]
fn sweep_reports_data_quality_cause_for_point() {
    let dir = unique_temp_dir("sweep-zero-sent");
    let cfg = config(&dir, vec![8]);
    let state = shared(
        cfg.results_root.join("iperf"),
        Behaviour::WriteTcp { sent: 0, recv: 0 },
        Behaviour::WriteUdp { sent: 2_000_000 },
    );

    let (result, _) = run(&cfg, &state);
    assert!(result.expect("sweep completes").is_empty());
    // 不可用的数据不重试
    assert_eq!(state.borrow().client_runs, 4);

    let tcp = load_aggregate(&cfg.results_root.join("final").join("output-tcp-8-100.json"))
        .expect("tcp aggregate");
    assert_eq!(tcp, vec![None, None]);

    let errors = fs::read_to_string(cfg.service_root.join("logs").join("error-output.txt"))
        .expect("error log");
    assert!(errors.contains(
        "no data point recorded: bytes_sent is zero, reliability is undefined-8-100"
    ));
    assert!(!errors.contains("missing tcp results"));
}
