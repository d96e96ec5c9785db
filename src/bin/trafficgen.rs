//! 流量生成器
//!
//! 在仿真节点内运行 iperf3，并把 JSON 报告写到约定的文件名：
//!
//! ```text
//! trafficgen server -ip 10.0.0.3 -port 5000
//! trafficgen client -ip 10.0.0.1 -port 5000 -server_ip 10.0.0.3 -test tcp -time 5
//! ```

use bottleneck_rs::cli::{init_tracing, normalize_legacy_flags};
use bottleneck_rs::scenario::Protocol;
use bottleneck_rs::trafficgen::{DEFAULT_OUT_DIR, run_client, run_server};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

const LEGACY_FLAGS: &[&str] = &["ip", "port", "server_ip", "test", "time", "out_dir", "iperf3"];

#[derive(Debug, Parser)]
#[command(name = "trafficgen", about = "Run one iperf3 endpoint and store its JSON report")]
struct Args {
    #[command(subcommand)]
    role: RoleCmd,
}

#[derive(Debug, ClapArgs)]
struct Common {
    /// Address to bind
    #[arg(long)]
    ip: Ipv4Addr,

    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Directory for the JSON report
    #[arg(long = "out_dir", default_value = DEFAULT_OUT_DIR)]
    out_dir: PathBuf,

    #[arg(long, default_value = "iperf3")]
    iperf3: String,
}

#[derive(Debug, Subcommand)]
enum RoleCmd {
    /// Serve a single test, then exit
    Server {
        #[command(flatten)]
        common: Common,
    },
    /// Run a test against a server
    Client {
        #[command(flatten)]
        common: Common,

        #[arg(long = "server_ip")]
        server_ip: Ipv4Addr,

        /// tcp or udp
        #[arg(long, default_value = "tcp", value_parser = parse_protocol)]
        test: Protocol,

        /// Test duration (seconds)
        #[arg(long, default_value_t = 5)]
        time: u64,
    },
}

fn parse_protocol(raw: &str) -> Result<Protocol, String> {
    Protocol::parse(raw).ok_or_else(|| format!("unknown protocol `{raw}`, expected tcp or udp"))
}

fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse_from(normalize_legacy_flags(std::env::args_os(), LEGACY_FLAGS));
    let outcome = match args.role {
        RoleCmd::Server { common } => {
            run_server(&common.iperf3, common.ip, common.port, &common.out_dir)
        }
        RoleCmd::Client {
            common,
            server_ip,
            test,
            time,
        } => run_client(
            &common.iperf3,
            common.ip,
            common.port,
            server_ip,
            test,
            time,
            &common.out_dir,
        ),
    };

    match outcome {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "traffic test failed");
            ExitCode::FAILURE
        }
    }
}
