use crate::scenario::{Bandwidths, Protocol, TestScenario, aggregate_file_name};
use std::time::Duration;

#[test]
fn protocol_forms() {
    assert_eq!(Protocol::parse("TCP"), Some(Protocol::Tcp));
    assert_eq!(Protocol::parse("udp"), Some(Protocol::Udp));
    assert_eq!(Protocol::parse("sctp"), None);
    assert_eq!(Protocol::Udp.upper(), "UDP");
    assert_eq!(Protocol::Tcp.to_string(), "tcp");
    assert_eq!(Protocol::Tcp.block_size(), 22_016);
    assert_eq!(Protocol::Udp.block_size(), 1_234);
}

#[test]
fn scenario_display_and_aggregate_name() {
    let bw = Bandwidths {
        bottleneck_mbps: 64,
        other_mbps: 100,
    };
    let scenario = TestScenario {
        client: "h2".into(),
        server: "h4".into(),
        protocol: Protocol::Udp,
        port: 5000,
        bandwidths: bw,
        duration: Duration::from_secs(5),
    };
    assert_eq!(
        scenario.to_string(),
        "udp client h2 -> server h4 port 5000 (64-100)"
    );
    assert_eq!(aggregate_file_name(Protocol::Tcp, &bw), "output-tcp-64-100.json");
}
