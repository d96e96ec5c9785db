//! 瓶颈拓扑构建

use super::graph::{NodeRole, Topology};
use thiserror::Error;
use tracing::debug;

/// 瓶颈拓扑配置选项（带宽单位 Mbps）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BottleneckOpts {
    pub bottleneck_mbps: u64,
    pub other_mbps: u64,
}

impl Default for BottleneckOpts {
    fn default() -> Self {
        Self {
            bottleneck_mbps: 10,
            other_mbps: 100,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The bottleneck must be strictly slower than every other link.
    #[error("bottleneck bandwidth {bottleneck} Mbps must be lower than other bandwidth {other} Mbps")]
    Configuration { bottleneck: u64, other: u64 },
    #[error("link bandwidth must be positive")]
    NonPositiveBandwidth,
    /// The declared graph violates the single-bottleneck shape.
    #[error("topology construction failed: {0}")]
    Construction(String),
}

/// 构建瓶颈拓扑
///
/// 拓扑结构：
///
/// ```text
/// h1 --\                /-- h3
///       s1 ==(瓶颈)== s2
/// h2 --/                \-- h4
/// ```
///
/// h1/h2 为 client，h3/h4 为 server。参数不合法时在声明任何节点之前返回错误。
pub fn build_bottleneck(opts: &BottleneckOpts) -> Result<Topology, TopologyError> {
    if opts.bottleneck_mbps == 0 || opts.other_mbps == 0 {
        return Err(TopologyError::NonPositiveBandwidth);
    }
    if opts.bottleneck_mbps >= opts.other_mbps {
        return Err(TopologyError::Configuration {
            bottleneck: opts.bottleneck_mbps,
            other: opts.other_mbps,
        });
    }

    let mut topo = Topology::default();
    let h1 = topo.add_host("h1", NodeRole::Client);
    let h2 = topo.add_host("h2", NodeRole::Client);
    let h3 = topo.add_host("h3", NodeRole::Server);
    let h4 = topo.add_host("h4", NodeRole::Server);
    let s1 = topo.add_switch("s1");
    let s2 = topo.add_switch("s2");

    // clients <-> s1
    topo.connect(h1, s1, opts.other_mbps);
    topo.connect(h2, s1, opts.other_mbps);
    // s1 <-> s2 (bottleneck)
    let bottleneck = topo.connect(s1, s2, opts.bottleneck_mbps);
    // s2 <-> servers
    topo.connect(s2, h3, opts.other_mbps);
    topo.connect(s2, h4, opts.other_mbps);

    match topo.bottleneck() {
        Some(link) if link.id == bottleneck => {}
        _ => {
            return Err(TopologyError::Construction(
                "bottleneck link is not the unique slowest link".to_string(),
            ));
        }
    }

    debug!(
        bottleneck_mbps = opts.bottleneck_mbps,
        other_mbps = opts.other_mbps,
        nodes = topo.nodes().len(),
        links = topo.links().len(),
        "瓶颈拓扑已构建"
    );
    Ok(topo)
}
