//! 流量生成器
//!
//! 两部分：编排器用来拼 server/client 命令行的 [`TrafficGenConfig`]，以及
//! `trafficgen` 可执行文件背后的 iperf3 封装（运行 iperf3、取出两端地址与协议、
//! 把 JSON 报告写到约定的文件名）。

use crate::scenario::{Protocol, Role, raw_artifact_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_OUT_DIR: &str = "./test-results/iperf/";

/// server/client 两种角色的命令前缀
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficGenConfig {
    pub server_program: String,
    pub client_program: String,
    /// 传给生成器的 `-out_dir`；`None` 时由生成器使用默认目录
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

impl TrafficGenConfig {
    /// 与当前可执行文件同目录的 `trafficgen`
    pub fn sibling_binary() -> io::Result<Self> {
        let exe = std::env::current_exe()?.with_file_name("trafficgen");
        let program = shell_quote(&exe.to_string_lossy());
        Ok(Self {
            server_program: format!("{program} server"),
            client_program: format!("{program} client"),
            out_dir: None,
        })
    }

    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    fn out_dir_flag(&self) -> String {
        match &self.out_dir {
            Some(dir) => format!(" -out_dir {}", shell_quote(&dir.to_string_lossy())),
            None => String::new(),
        }
    }

    /// `<server> -ip <bind> -port <port>`
    pub fn server_command(&self, server_ip: Ipv4Addr, port: u16) -> String {
        format!(
            "{} -ip {} -port {}{}",
            self.server_program,
            server_ip,
            port,
            self.out_dir_flag()
        )
    }

    /// `<client> -ip <bind> -port <port> -server_ip <addr> -test <tcp|udp> -time <s>`
    pub fn client_command(
        &self,
        client_ip: Ipv4Addr,
        port: u16,
        server_ip: Ipv4Addr,
        protocol: Protocol,
        duration_secs: u64,
    ) -> String {
        format!(
            "{} -ip {} -port {} -server_ip {} -test {} -time {}{}",
            self.client_program,
            client_ip,
            port,
            server_ip,
            protocol,
            duration_secs,
            self.out_dir_flag()
        )
    }
}

/// 在 server 节点上检查端口是否已有 TCP 监听；输出非空即就绪。
///
/// iperf3 的 UDP 测试同样先建立 TCP 控制连接，两种协议都用这一条。
pub fn listening_check_command(port: u16) -> String {
    format!("ss -Hltn 'sport = :{port}'")
}

/// 只在需要时加单引号
pub fn shell_quote(raw: &str) -> String {
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,".contains(c));
    if safe {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

#[derive(Debug, Error)]
pub enum TrafficGenError {
    #[error("failed to run iperf3: {0}")]
    Launch(#[source] io::Error),
    #[error("iperf3 exited with {status}: {message}")]
    Iperf { status: String, message: String },
    #[error("iperf3 produced an invalid report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("iperf3 report is missing `{0}`")]
    MissingField(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// `iperf3 -s -1 -J -B <ip> -p <port>`
pub fn server_args(bind: Ipv4Addr, port: u16) -> Vec<String> {
    vec![
        "-s".into(),
        "-1".into(),
        "-J".into(),
        "-B".into(),
        bind.to_string(),
        "-p".into(),
        port.to_string(),
    ]
}

/// `iperf3 -c <server> -B <ip> -p <port> -t <time> -l <blksize> -J [-u]`
pub fn client_args(
    bind: Ipv4Addr,
    port: u16,
    server: Ipv4Addr,
    protocol: Protocol,
    duration_secs: u64,
) -> Vec<String> {
    let mut args = vec![
        "-c".into(),
        server.to_string(),
        "-B".into(),
        bind.to_string(),
        "-p".into(),
        port.to_string(),
        "-t".into(),
        duration_secs.to_string(),
        "-l".into(),
        protocol.block_size().to_string(),
        "-J".into(),
    ];
    if protocol == Protocol::Udp {
        args.push("-u".into());
    }
    args
}

/// 报告里的 (本端地址, 对端地址, 大写协议名)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEndpoints {
    pub local_host: String,
    pub remote_host: String,
    pub protocol: String,
}

pub fn report_endpoints(report: &Value) -> Result<ReportEndpoints, TrafficGenError> {
    let text = |pointer: &'static str| {
        report
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(TrafficGenError::MissingField(pointer))
    };
    Ok(ReportEndpoints {
        local_host: text("/start/connected/0/local_host")?,
        remote_host: text("/start/connected/0/remote_host")?,
        protocol: text("/start/test_start/protocol")?.to_ascii_uppercase(),
    })
}

/// 按角色得到报告文件名；server 端的对端才是 client
pub fn artifact_name(role: Role, endpoints: &ReportEndpoints) -> String {
    match role {
        Role::Client => raw_artifact_name(
            role,
            &endpoints.local_host,
            &endpoints.remote_host,
            &endpoints.protocol,
        ),
        Role::Server => raw_artifact_name(
            role,
            &endpoints.remote_host,
            &endpoints.local_host,
            &endpoints.protocol,
        ),
    }
}

/// 先写临时文件再改名，读者看不到写了一半的 JSON
fn write_atomically(path: &Path, report: &Value) -> Result<(), TrafficGenError> {
    let tmp = path.with_extension("json.partial");
    fs::write(&tmp, serde_json::to_vec(report)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn run_iperf(iperf3: &str, args: &[String]) -> Result<Value, TrafficGenError> {
    debug!(iperf3, ?args, "运行 iperf3");
    let output = Command::new(iperf3)
        .args(args)
        .output()
        .map_err(TrafficGenError::Launch)?;
    let report: Value = match serde_json::from_slice(&output.stdout) {
        Ok(v) => v,
        Err(e) if output.status.success() => return Err(e.into()),
        Err(_) => {
            return Err(TrafficGenError::Iperf {
                status: output.status.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
    };
    if let Some(message) = report.get("error").and_then(Value::as_str) {
        return Err(TrafficGenError::Iperf {
            status: output.status.to_string(),
            message: message.to_string(),
        });
    }
    Ok(report)
}

fn store(role: Role, report: &Value, out_dir: &Path) -> Result<PathBuf, TrafficGenError> {
    let endpoints = report_endpoints(report)?;
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(artifact_name(role, &endpoints));
    write_atomically(&path, report)?;
    info!(path = %path.display(), "📝 报告已写出");
    Ok(path)
}

/// server 角色：等待一次测试结束后写出报告
pub fn run_server(
    iperf3: &str,
    bind: Ipv4Addr,
    port: u16,
    out_dir: &Path,
) -> Result<PathBuf, TrafficGenError> {
    let report = run_iperf(iperf3, &server_args(bind, port))?;
    store(Role::Server, &report, out_dir)
}

/// client 角色：阻塞 `duration_secs` 秒后写出报告
pub fn run_client(
    iperf3: &str,
    bind: Ipv4Addr,
    port: u16,
    server: Ipv4Addr,
    protocol: Protocol,
    duration_secs: u64,
    out_dir: &Path,
) -> Result<PathBuf, TrafficGenError> {
    let args = client_args(bind, port, server, protocol, duration_secs);
    let report = run_iperf(iperf3, &args)?;
    store(Role::Client, &report, out_dir)
}
