//! 网络拓扑模块
//!
//! 声明固定形状的瓶颈拓扑，供仿真后端实例化。

mod graph;

pub mod bottleneck;

pub use bottleneck::{BottleneckOpts, TopologyError, build_bottleneck};
pub use graph::{LinkId, LinkSpec, NodeId, NodeRole, NodeSpec, Topology};
