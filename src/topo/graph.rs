//! 拓扑描述
//!
//! 声明式的节点/链路集合，交给仿真后端去实例化。

use tracing::trace;

/// 拓扑内按声明顺序分配的节点下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// 链路下标，同样按声明顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);

/// 节点角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Client,
    Server,
    Switch,
}

impl NodeRole {
    pub fn is_host(self) -> bool {
        !matches!(self, NodeRole::Switch)
    }
}

/// 拓扑中的一个节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    pub role: NodeRole,
}

/// 双向链路，带宽单位 Mbps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub id: LinkId,
    pub a: NodeId,
    pub b: NodeId,
    pub bandwidth_mbps: u64,
}

/// 拓扑描述符
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<NodeSpec>,
    links: Vec<LinkSpec>,
}

impl Topology {
    /// 添加主机节点
    pub fn add_host(&mut self, name: impl Into<String>, role: NodeRole) -> NodeId {
        debug_assert!(role.is_host());
        self.add_node(name.into(), role)
    }

    /// 添加交换机节点
    pub fn add_switch(&mut self, name: impl Into<String>) -> NodeId {
        self.add_node(name.into(), NodeRole::Switch)
    }

    fn add_node(&mut self, name: String, role: NodeRole) -> NodeId {
        let id = NodeId(self.nodes.len());
        trace!(?id, %name, ?role, "添加节点");
        self.nodes.push(NodeSpec { id, name, role });
        id
    }

    /// 连接两个节点（双向链路）
    pub fn connect(&mut self, a: NodeId, b: NodeId, bandwidth_mbps: u64) -> LinkId {
        let id = LinkId(self.links.len());
        trace!(?id, ?a, ?b, bandwidth_mbps, "添加链路");
        self.links.push(LinkSpec {
            id,
            a,
            b,
            bandwidth_mbps,
        });
        id
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    pub fn node(&self, id: NodeId) -> &NodeSpec {
        &self.nodes[id.0]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// 所有主机（client + server），按声明顺序
    pub fn hosts(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(|n| n.role.is_host())
    }

    /// 与节点相连的链路，按声明顺序
    pub fn links_of(&self, id: NodeId) -> impl Iterator<Item = &LinkSpec> {
        self.links.iter().filter(move |l| l.a == id || l.b == id)
    }

    /// 唯一的瓶颈链路：带宽严格低于其余所有链路。
    ///
    /// 最小带宽不唯一（或没有链路）时返回 `None`。
    pub fn bottleneck(&self) -> Option<&LinkSpec> {
        let min = self.links.iter().min_by_key(|l| l.bandwidth_mbps)?;
        let ties = self
            .links
            .iter()
            .filter(|l| l.bandwidth_mbps == min.bandwidth_mbps)
            .count();
        (ties == 1).then_some(min)
    }
}
