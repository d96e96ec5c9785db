//! 实验场景
//!
//! 一次实验的不可变参数，以及由其派生的产物文件名。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// `-test` 参数和汇总文件名使用的小写形式
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// 流量生成器报告里的大写形式
    pub fn upper(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    /// iperf3 的 `-l` 块大小
    pub fn block_size(self) -> u32 {
        match self {
            Protocol::Tcp => 22_016,
            Protocol::Udp => 1_234,
        }
    }

    pub fn parse(raw: &str) -> Option<Protocol> {
        match raw.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个扫描点的带宽约束（Mbps）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bandwidths {
    pub bottleneck_mbps: u64,
    pub other_mbps: u64,
}

impl Bandwidths {
    /// 文件名和日志中使用的 `{bottleneck}-{other}` 后缀
    pub fn suffix(&self) -> String {
        format!("{}-{}", self.bottleneck_mbps, self.other_mbps)
    }
}

/// 一次实验：节点、协议、端口、带宽和时长
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestScenario {
    pub client: String,
    pub server: String,
    pub protocol: Protocol,
    pub port: u16,
    pub bandwidths: Bandwidths,
    pub duration: Duration,
}

impl fmt::Display for TestScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} client {} -> server {} port {} ({})",
            self.protocol,
            self.client,
            self.server,
            self.port,
            self.bandwidths.suffix()
        )
    }
}

/// 结果文件属于哪一端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn tag(self) -> char {
        match self {
            Role::Client => 'c',
            Role::Server => 's',
        }
    }
}

/// 确定产物文件名所需的全部信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactKey {
    pub client_ip: Ipv4Addr,
    pub server_ip: Ipv4Addr,
    pub protocol: Protocol,
    pub bandwidths: Bandwidths,
}

impl ArtifactKey {
    pub fn new(scenario: &TestScenario, client_ip: Ipv4Addr, server_ip: Ipv4Addr) -> Self {
        Self {
            client_ip,
            server_ip,
            protocol: scenario.protocol,
            bandwidths: scenario.bandwidths,
        }
    }

    /// 流量生成器自己写出的文件名（不含带宽）
    pub fn raw_file_name(&self, role: Role) -> String {
        raw_artifact_name(role, self.client_ip, self.server_ip, self.protocol.upper())
    }

    /// 带宽后缀的文件名，同一场景重跑会覆盖而不是新增
    pub fn scenario_file_name(&self, role: Role) -> String {
        format!(
            "{}-iperf-client-{}-to-server-{}-test-{}-{}.json",
            role.tag(),
            self.client_ip,
            self.server_ip,
            self.protocol.upper(),
            self.bandwidths.suffix()
        )
    }
}

/// `{c|s}-iperf-client-{client}-to-server-{server}-test-{PROTOCOL}.json`
pub fn raw_artifact_name(
    role: Role,
    client: impl fmt::Display,
    server: impl fmt::Display,
    protocol_upper: &str,
) -> String {
    format!(
        "{}-iperf-client-{}-to-server-{}-test-{}.json",
        role.tag(),
        client,
        server,
        protocol_upper
    )
}

/// 扫描级汇总文件名 `output-{tcp|udp}-{bottleneck}-{other}.json`
pub fn aggregate_file_name(protocol: Protocol, bandwidths: &Bandwidths) -> String {
    format!("output-{}-{}.json", protocol.as_str(), bandwidths.suffix())
}
