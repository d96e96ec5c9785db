//! 拓扑连通性检查
//!
//! 正式测试前在每台主机上抓 `ifconfig`，并 ping 其余所有主机，输出按主机落盘。
//! 任何一步失败只记日志，不影响后续测试。

use crate::emu::EmulatedNetwork;
use crate::eventlog::{SessionLogs, instance_message};
use crate::layout::ResultsLayout;
use crate::scenario::Bandwidths;
use crate::topo::Topology;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

fn append(path: &Path, contents: &str) -> io::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(contents.as_bytes())
}

/// 返回成功写入的捕获数量
pub fn run_topology_checks<N: EmulatedNetwork>(
    net: &N,
    topology: &Topology,
    layout: &ResultsLayout,
    bandwidths: &Bandwidths,
    logs: &mut SessionLogs,
) -> usize {
    let hosts: Vec<&str> = topology.hosts().map(|n| n.name.as_str()).collect();
    let mut captured = 0;

    for &host in &hosts {
        let ifconfig_path = layout.ifconfig_dir().join(format!(
            "output-ifconfig-{}-{host}.txt",
            bandwidths.suffix()
        ));
        match net.exec(host, "ifconfig") {
            Ok(out) => match append(&ifconfig_path, &out) {
                Ok(()) => {
                    captured += 1;
                    logs.success(&instance_message(
                        &format!("successfully logged command [{host} : ifconfig]"),
                        bandwidths,
                    ));
                }
                Err(e) => logs.error(&instance_message(
                    &format!("[ ERROR ] failure in logging ifconfig command for {host}: {e}"),
                    bandwidths,
                )),
            },
            Err(e) => logs.error(&instance_message(
                &format!("[ ERROR ] failure in sending ifconfig command for {host}: {e}"),
                bandwidths,
            )),
        }

        let ping_path = layout
            .ping_dir()
            .join(format!("output-ping-{}-{host}.txt", bandwidths.suffix()));
        for &peer in hosts.iter().filter(|&&h| h != host) {
            let output = net
                .resolve_ip(peer)
                .and_then(|ip| net.exec(host, &format!("ping -c3 {ip}")));
            match output {
                Ok(out) => match append(&ping_path, &out) {
                    Ok(()) => {
                        captured += 1;
                        logs.success(&instance_message(
                            &format!("successfully logged command [{host} : ping to {peer}]"),
                            bandwidths,
                        ));
                    }
                    Err(e) => logs.error(&instance_message(
                        &format!("[ ERROR ] failure in logging ping results for {host} to {peer}: {e}"),
                        bandwidths,
                    )),
                },
                Err(e) => logs.error(&instance_message(
                    &format!("[ ERROR ] failure in pinging test for {host} to {peer}: {e}"),
                    bandwidths,
                )),
            }
        }
    }

    info!(captured, hosts = hosts.len(), "🔍 拓扑检查完成");
    captured
}
