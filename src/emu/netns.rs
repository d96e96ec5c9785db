//! 基于 Linux network namespace 的仿真后端
//!
//! 每个节点一个 namespace；交换机在自己的 namespace 里建一个 bridge；
//! 每条链路是一对直接创建在两端 namespace 中的 veth，两端都挂 `tc netem rate`
//! 限速。主机地址按声明顺序分配 10.0.0.N/8。

use super::shaping::{ShapingConfig, shaping_args};
use super::{EmulatedNetwork, EmulationError, EmulationProvider, ProcessHandle};
use crate::topo::{NodeRole, Topology};
use std::net::Ipv4Addr;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const BRIDGE: &str = "br0";
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetnsConfig {
    /// namespace 名前缀，`reset` 只清理带此前缀的 namespace
    pub prefix: String,
    /// 所有 `ip`/`tc`/`kill` 调用前加 `sudo`
    pub sudo: bool,
    /// 每条链路附加的单向时延
    pub link_delay_ms: Option<u32>,
}

impl Default for NetnsConfig {
    fn default() -> Self {
        Self {
            prefix: "bn".to_string(),
            sudo: false,
            link_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetnsProvider {
    config: NetnsConfig,
}

impl NetnsProvider {
    pub fn new(config: NetnsConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug)]
struct NodeNs {
    name: String,
    ns: String,
    role: NodeRole,
    ifaces: Vec<String>,
}

/// 已实例化的 namespace 网络
#[derive(Debug)]
pub struct NetnsNetwork {
    sudo: bool,
    nodes: Vec<NodeNs>,
    running: bool,
    torn_down: bool,
}

fn command(sudo: bool, program: &str) -> Command {
    if sudo {
        let mut c = Command::new("sudo");
        c.arg(program);
        c
    } else {
        Command::new(program)
    }
}

fn run(sudo: bool, program: &str, args: &[&str]) -> Result<Output, EmulationError> {
    trace!(program, ?args, "执行宿主命令");
    Ok(command(sudo, program).args(args).output()?)
}

/// 执行并要求成功，失败时返回拼好的错误描述
fn run_checked(sudo: bool, program: &str, args: &[&str]) -> Result<String, String> {
    let output = run(sudo, program, args).map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "`{} {}` exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

fn ns_exec(sudo: bool, ns: &str, args: &[&str]) -> Result<String, String> {
    let mut full = vec!["netns", "exec", ns];
    full.extend_from_slice(args);
    run_checked(sudo, "ip", &full)
}

fn delete_namespace(sudo: bool, ns: &str) {
    if let Err(e) = run_checked(sudo, "ip", &["netns", "del", ns]) {
        warn!(ns, error = %e, "删除 namespace 失败");
    }
}

/// 从 `ip -4 -o addr show` 的输出中取出第一个 IPv4 地址。
///
/// 输入形如 `2: h1-eth0    inet 10.0.0.1/8 brd 10.255.255.255 scope global h1-eth0 ...`。
pub fn parse_inet_addr(repr: &str) -> Option<Ipv4Addr> {
    let mut tokens = repr.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "inet" {
            let cidr = tokens.next()?;
            return cidr.split('/').next()?.parse().ok();
        }
    }
    None
}

/// `ip netns list` 输出中的 namespace 名，如 `bn-h1 (id: 0)` -> `bn-h1`
fn parse_netns_list(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect()
}

impl EmulationProvider for NetnsProvider {
    type Network = NetnsNetwork;

    #[tracing::instrument(skip(self, topology), fields(prefix = %self.config.prefix))]
    fn instantiate(&mut self, topology: &Topology) -> Result<NetnsNetwork, EmulationError> {
        let sudo = self.config.sudo;
        let mut net = NetnsNetwork {
            sudo,
            nodes: Vec::with_capacity(topology.nodes().len()),
            running: false,
            torn_down: false,
        };

        // 出错时 net 被 drop，已创建的 namespace 随之删除
        for node in topology.nodes() {
            let ns = format!("{}-{}", self.config.prefix, node.name);
            run_checked(sudo, "ip", &["netns", "add", &ns]).map_err(EmulationError::Init)?;
            net.nodes.push(NodeNs {
                name: node.name.clone(),
                ns: ns.clone(),
                role: node.role,
                ifaces: Vec::new(),
            });
            ns_exec(sudo, &ns, &["ip", "link", "set", "lo", "up"]).map_err(EmulationError::Init)?;
            if node.role == NodeRole::Switch {
                ns_exec(sudo, &ns, &["ip", "link", "add", "name", BRIDGE, "type", "bridge"])
                    .map_err(EmulationError::Init)?;
            }
            debug!(node = %node.name, %ns, "namespace 已创建");
        }

        for link in topology.links() {
            let (a, b) = (link.a.0, link.b.0);
            let if_a = format!("{}-eth{}", net.nodes[a].name, net.nodes[a].ifaces.len());
            let if_b = format!("{}-eth{}", net.nodes[b].name, net.nodes[b].ifaces.len());
            let (ns_a, ns_b) = (net.nodes[a].ns.clone(), net.nodes[b].ns.clone());
            run_checked(
                sudo,
                "ip",
                &[
                    "link", "add", &if_a, "netns", &ns_a, "type", "veth", "peer", "name", &if_b,
                    "netns", &ns_b,
                ],
            )
            .map_err(EmulationError::Init)?;
            net.nodes[a].ifaces.push(if_a.clone());
            net.nodes[b].ifaces.push(if_b.clone());

            let shaping = ShapingConfig {
                delay_ms: self.config.link_delay_ms,
                ..ShapingConfig::rate(link.bandwidth_mbps)
            };
            for (ns, iface) in [(&ns_a, &if_a), (&ns_b, &if_b)] {
                let mut args = vec!["tc".to_string()];
                args.extend(shaping_args(iface, &shaping));
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                ns_exec(sudo, ns, &args).map_err(EmulationError::Init)?;
            }
            debug!(%if_a, %if_b, bandwidth_mbps = link.bandwidth_mbps, "链路已创建");
        }

        let mut host_ordinal = 0u8;
        for node in &net.nodes {
            match node.role {
                NodeRole::Switch => {
                    for iface in &node.ifaces {
                        ns_exec(sudo, &node.ns, &["ip", "link", "set", iface, "master", BRIDGE])
                            .map_err(EmulationError::Init)?;
                    }
                }
                NodeRole::Client | NodeRole::Server => {
                    host_ordinal = host_ordinal.checked_add(1).ok_or_else(|| {
                        EmulationError::Init("too many hosts for 10.0.0.0/8 numbering".into())
                    })?;
                    let Some(iface) = node.ifaces.first() else {
                        return Err(EmulationError::Init(format!("host {} has no link", node.name)));
                    };
                    let addr = format!("10.0.0.{host_ordinal}/8");
                    ns_exec(sudo, &node.ns, &["ip", "addr", "add", &addr, "dev", iface])
                        .map_err(EmulationError::Init)?;
                }
            }
        }

        info!(nodes = net.nodes.len(), links = topology.links().len(), "🧱 namespace 网络已实例化");
        Ok(net)
    }

    #[tracing::instrument(skip(self), fields(prefix = %self.config.prefix))]
    fn reset(&mut self) -> Result<(), EmulationError> {
        let listing =
            run_checked(self.config.sudo, "ip", &["netns", "list"]).map_err(EmulationError::Reset)?;
        let owned = format!("{}-", self.config.prefix);
        for ns in parse_netns_list(&listing) {
            if ns.starts_with(&owned) {
                debug!(ns, "清理残留 namespace");
                run_checked(self.config.sudo, "ip", &["netns", "del", ns])
                    .map_err(EmulationError::Reset)?;
            }
        }
        Ok(())
    }
}

impl NetnsNetwork {
    fn node(&self, name: &str) -> Result<&NodeNs, EmulationError> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| EmulationError::UnknownNode(name.to_string()))
    }

    fn teardown(&mut self) {
        for node in &self.nodes {
            delete_namespace(self.sudo, &node.ns);
        }
        self.torn_down = true;
        self.running = false;
    }
}

impl EmulatedNetwork for NetnsNetwork {
    type Process = NetnsProcess;

    fn start(&mut self) -> Result<(), EmulationError> {
        if self.running {
            return Err(EmulationError::Start("network already started".into()));
        }
        if self.torn_down {
            return Err(EmulationError::Start("network already torn down".into()));
        }
        for node in &self.nodes {
            if node.role == NodeRole::Switch {
                ns_exec(self.sudo, &node.ns, &["ip", "link", "set", BRIDGE, "up"])
                    .map_err(EmulationError::Start)?;
            }
            for iface in &node.ifaces {
                ns_exec(self.sudo, &node.ns, &["ip", "link", "set", iface, "up"])
                    .map_err(EmulationError::Start)?;
            }
        }
        self.running = true;
        info!("▶️  namespace 网络已启动");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EmulationError> {
        if self.torn_down {
            return Ok(());
        }
        self.teardown();
        info!("⏹️  namespace 网络已停止");
        Ok(())
    }

    fn resolve_ip(&self, node: &str) -> Result<Ipv4Addr, EmulationError> {
        let n = self.node(node)?;
        let Some(iface) = n.ifaces.first().filter(|_| n.role.is_host()) else {
            return Err(EmulationError::UnknownNode(node.to_string()));
        };
        let repr = ns_exec(self.sudo, &n.ns, &["ip", "-4", "-o", "addr", "show", "dev", iface])
            .map_err(|reason| EmulationError::CommandFailed {
                node: node.to_string(),
                command: "ip -4 -o addr show".into(),
                reason,
            })?;
        parse_inet_addr(&repr).ok_or_else(|| EmulationError::AddressParse {
            node: node.to_string(),
            repr: repr.trim().to_string(),
        })
    }

    #[tracing::instrument(skip(self))]
    fn exec(&self, node: &str, command: &str) -> Result<String, EmulationError> {
        let n = self.node(node)?;
        ns_exec(self.sudo, &n.ns, &["sh", "-c", command]).map_err(|reason| {
            EmulationError::CommandFailed {
                node: node.to_string(),
                command: command.to_string(),
                reason,
            }
        })
    }

    #[tracing::instrument(skip(self))]
    fn spawn(&self, node: &str, command: &str) -> Result<NetnsProcess, EmulationError> {
        let n = self.node(node)?;
        let child = self::command(self.sudo, "ip")
            .args(["netns", "exec", &n.ns, "sh", "-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // 独立进程组，终止时连同流量生成器的子进程一起结束
            .process_group(0)
            .spawn()
            .map_err(|e| EmulationError::Spawn {
                node: node.to_string(),
                command: command.to_string(),
                reason: e.to_string(),
            })?;
        debug!(pid = child.id(), "后台进程已启动");
        Ok(NetnsProcess {
            child,
            sudo: self.sudo,
            reaped: false,
        })
    }
}

impl Drop for NetnsNetwork {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

/// namespace 内的后台进程
#[derive(Debug)]
pub struct NetnsProcess {
    child: Child,
    sudo: bool,
    reaped: bool,
}

impl ProcessHandle for NetnsProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn has_exited(&mut self) -> Result<bool, EmulationError> {
        if !self.reaped && self.child.try_wait()?.is_some() {
            self.reaped = true;
        }
        Ok(self.reaped)
    }

    fn terminate(&mut self) -> Result<(), EmulationError> {
        if self.reaped {
            return Ok(());
        }
        if self.child.try_wait()?.is_some() {
            self.reaped = true;
            return Ok(());
        }

        let group = format!("-{}", self.child.id());
        if let Err(e) = run_checked(self.sudo, "kill", &["-TERM", "--", &group]) {
            debug!(error = %e, "SIGTERM 发送失败，直接 kill");
        }
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if self.child.try_wait()?.is_some() {
                self.reaped = true;
                return Ok(());
            }
            thread::sleep(Duration::from_millis(50));
        }

        // 整组 SIGKILL，流量生成器的子进程不能留下占着端口
        if let Err(e) = run_checked(self.sudo, "kill", &["-KILL", "--", &group]) {
            debug!(error = %e, "进程组 SIGKILL 发送失败");
        }
        if self.child.try_wait()?.is_none() {
            self.child
                .kill()
                .map_err(|e| EmulationError::Terminate(e.to_string()))?;
        }
        self.child.wait()?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for NetnsProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(error = %e, "后台进程回收失败");
        }
    }
}
