//! 网络仿真后端适配层
//!
//! 编排逻辑只通过这里的 trait 与仿真引擎交互：实例化拓扑、启停网络、
//! 解析节点 IP、在节点上执行前台命令或启动后台进程。

mod netns;
mod shaping;

pub use netns::{NetnsConfig, NetnsNetwork, NetnsProcess, NetnsProvider, parse_inet_addr};
pub use shaping::{ShapingConfig, shaping_args};

use crate::topo::Topology;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulationError {
    /// The engine could not allocate namespaces or links for the topology.
    #[error("failed to instantiate emulated network: {0}")]
    Init(String),
    #[error("failed to start emulated network: {0}")]
    Start(String),
    #[error("failed to stop emulated network: {0}")]
    Stop(String),
    #[error("unknown node `{0}`")]
    UnknownNode(String),
    #[error("could not resolve IPv4 address of `{node}` from `{repr}`")]
    AddressParse { node: String, repr: String },
    #[error("failed to spawn `{command}` on {node}: {reason}")]
    Spawn {
        node: String,
        command: String,
        reason: String,
    },
    #[error("`{command}` on {node} failed: {reason}")]
    CommandFailed {
        node: String,
        command: String,
        reason: String,
    },
    #[error("failed to terminate process: {0}")]
    Terminate(String),
    #[error("failed to reset emulator state: {0}")]
    Reset(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 后台进程句柄，调用方负责终止
pub trait ProcessHandle {
    fn id(&self) -> Option<u32>;

    /// 进程是否已经自行结束（不阻塞）
    fn has_exited(&mut self) -> Result<bool, EmulationError>;

    /// 终止进程并回收。对已终止的进程再次调用应当无副作用。
    fn terminate(&mut self) -> Result<(), EmulationError>;
}

/// 已实例化的仿真网络
///
/// `start` 之后在没有 `stop` 的情况下不能再次 `start`。
pub trait EmulatedNetwork {
    type Process: ProcessHandle;

    fn start(&mut self) -> Result<(), EmulationError>;

    fn stop(&mut self) -> Result<(), EmulationError>;

    /// 节点的规范点分十进制 IPv4 地址
    fn resolve_ip(&self, node: &str) -> Result<Ipv4Addr, EmulationError>;

    /// 在节点上前台执行命令，阻塞到结束，返回 stdout
    fn exec(&self, node: &str, command: &str) -> Result<String, EmulationError>;

    /// 在节点上启动后台进程
    fn spawn(&self, node: &str, command: &str) -> Result<Self::Process, EmulationError>;
}

/// 仿真引擎
pub trait EmulationProvider {
    type Network: EmulatedNetwork;

    fn instantiate(&mut self, topology: &Topology) -> Result<Self::Network, EmulationError>;

    /// 清理上一次运行残留的仿真状态
    fn reset(&mut self) -> Result<(), EmulationError>;
}
