//! 瓶颈带宽扫描
//!
//! 对每个瓶颈带宽构建 namespace 拓扑，跑 TCP/UDP 吞吐测试并汇总结果。

use bottleneck_rs::cli::{init_tracing, normalize_legacy_flags};
use bottleneck_rs::config::{SweepConfig, parse_constraints};
use bottleneck_rs::emu::{NetnsConfig, NetnsProvider};
use bottleneck_rs::layout::ResultsLayout;
use bottleneck_rs::plot::JsonPlotWriter;
use bottleneck_rs::sweep::{Sweep, SweepError};
use bottleneck_rs::trafficgen::TrafficGenConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

const LEGACY_FLAGS: &[&str] = &["time", "constraints", "bw_other"];

#[derive(Debug, Parser)]
#[command(
    name = "bottleneck-sweep",
    about = "Sweep bottleneck bandwidths and measure TCP/UDP throughput"
)]
struct Args {
    /// Duration of each traffic test (seconds)
    #[arg(long)]
    time: Option<u64>,

    /// Bottleneck bandwidths to test, space separated (e.g. "8 32 64")
    #[arg(long)]
    constraints: Option<String>,

    /// Bandwidth of the non-bottleneck links (Mbps)
    #[arg(long = "bw_other")]
    bw_other: Option<u64>,

    /// JSON config file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    results_dir: Option<PathBuf>,

    #[arg(long)]
    service_dir: Option<PathBuf>,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// How long to wait for both traffic reports after the client finishes (ms)
    #[arg(long)]
    artifact_timeout_ms: Option<u64>,

    /// Skip the ifconfig/ping captures before the throughput tests
    #[arg(long)]
    skip_diagnostics: bool,

    /// Recompute metrics and plots from existing aggregate files only
    #[arg(long)]
    analyze_only: bool,

    /// Namespace name prefix owned by this tool
    #[arg(long, default_value = "bn")]
    netns_prefix: String,

    /// Run ip/tc/kill through sudo
    #[arg(long)]
    sudo: bool,

    /// Extra one-way delay on every link (ms)
    #[arg(long)]
    link_delay_ms: Option<u32>,

    /// Server-side traffic generator command prefix
    #[arg(long)]
    server_program: Option<String>,

    /// Client-side traffic generator command prefix
    #[arg(long)]
    client_program: Option<String>,
}

fn build_config(args: &Args) -> Result<SweepConfig, SweepError> {
    let mut cfg = match &args.config {
        Some(path) => SweepConfig::load(path)?,
        None => SweepConfig::default(),
    };
    if let Some(t) = args.time {
        cfg.duration_secs = t;
    }
    if let Some(raw) = &args.constraints {
        cfg.constraints = parse_constraints(raw)?;
    }
    if let Some(bw) = args.bw_other {
        cfg.other_mbps = bw;
    }
    if let Some(dir) = &args.results_dir {
        cfg.results_root = dir.clone();
    }
    if let Some(dir) = &args.service_dir {
        cfg.service_root = dir.clone();
    }
    if let Some(n) = args.max_attempts {
        cfg.max_attempts = n;
    }
    if let Some(ms) = args.artifact_timeout_ms {
        cfg.artifact_timeout_ms = ms;
    }
    if args.skip_diagnostics {
        cfg.diagnostics = false;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn trafficgen_config(args: &Args, cfg: &SweepConfig) -> std::io::Result<TrafficGenConfig> {
    let mut tg = TrafficGenConfig::sibling_binary()?;
    if let Some(p) = &args.server_program {
        tg.server_program = p.clone();
    }
    if let Some(p) = &args.client_program {
        tg.client_program = p.clone();
    }
    let layout = ResultsLayout::new(&cfg.results_root, &cfg.service_root);
    let iperf_dir = std::path::absolute(layout.iperf_dir())?;
    Ok(tg.with_out_dir(iperf_dir))
}

fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse_from(normalize_legacy_flags(std::env::args_os(), LEGACY_FLAGS));

    let cfg = match build_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    let trafficgen = match trafficgen_config(&args, &cfg) {
        Ok(tg) => tg,
        Err(e) => {
            error!(error = %e, "failed to locate traffic generator");
            return ExitCode::FAILURE;
        }
    };

    let sweep = Sweep::new(&cfg, &trafficgen);
    let mut plots = JsonPlotWriter::new(sweep.layout().plots_dir());
    let outcome = if args.analyze_only {
        sweep.analyze_existing(&mut plots)
    } else {
        let mut provider = NetnsProvider::new(NetnsConfig {
            prefix: args.netns_prefix.clone(),
            sudo: args.sudo,
            link_delay_ms: args.link_delay_ms,
        });
        sweep.run(&mut provider, &mut plots)
    };

    match outcome {
        Ok(result) => {
            for (bw, p) in result.iter() {
                println!(
                    "bottleneck={bw}Mbps tcp_throughput={:.1}B/s tcp_reliability={:.4} udp_throughput={:.1}B/s",
                    p.tcp_throughput, p.tcp_reliability, p.udp_throughput
                );
            }
            println!("done, points={}/{}", result.len(), cfg.constraints.len());
            ExitCode::SUCCESS
        }
        Err(SweepError::Config(e)) => {
            error!(error = %e, "invalid configuration");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "sweep failed");
            ExitCode::FAILURE
        }
    }
}
