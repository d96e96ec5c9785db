//! `tc netem` 限速参数

/// 链路整形参数，作用在 veth 的 root qdisc 上
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapingConfig {
    pub rate_mbps: u64,
    /// 单向时延；用于估算队列长度
    pub delay_ms: Option<u32>,
    /// netem 队列长度（包）。`None` 时按约 2 倍 BDP 估算，至少 20。
    pub limit: Option<u32>,
}

impl ShapingConfig {
    pub fn rate(rate_mbps: u64) -> Self {
        Self {
            rate_mbps,
            delay_ms: None,
            limit: None,
        }
    }

    fn queue_limit(&self) -> u32 {
        if let Some(explicit) = self.limit {
            return explicit;
        }
        let rtt_ms = u64::from(self.delay_ms.unwrap_or(20)) * 2;
        let bdp_bytes = (self.rate_mbps.saturating_mul(1_000_000) / 8).saturating_mul(rtt_ms) / 1000;
        let mtu = 1500u64;
        let bdp_packets = (bdp_bytes / mtu).min(u64::from(u32::MAX / 2)) as u32;
        bdp_packets.saturating_mul(2).max(20)
    }
}

/// `tc qdisc replace dev <iface> root netem limit N [delay Xms] rate Ymbit`
pub fn shaping_args(interface: &str, cfg: &ShapingConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "qdisc".into(),
        "replace".into(),
        "dev".into(),
        interface.into(),
        "root".into(),
        "netem".into(),
        "limit".into(),
        cfg.queue_limit().to_string(),
    ];
    if let Some(delay) = cfg.delay_ms {
        args.push("delay".into());
        args.push(format!("{delay}ms"));
    }
    args.push("rate".into());
    args.push(format!("{}mbit", cfg.rate_mbps));
    args
}
