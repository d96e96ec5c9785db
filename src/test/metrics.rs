use crate::collect::{TestRecord, TransferTotals, summarize};
use crate::metrics::{Metric, MetricsError, SweepPoint, SweepResult, throughput};
use crate::scenario::Protocol;
use serde_json::json;

fn point(tcp: f64) -> SweepPoint {
    SweepPoint {
        tcp_throughput: tcp,
        tcp_reliability: 1.0,
        udp_throughput: 0.0,
    }
}

#[test]
fn tcp_scenario_throughput_counts_sent_and_received() {
    let record = TestRecord {
        client: json!({"end": {"sum_sent": {"bytes": 1_000_000}, "sum_received": {"bytes": 950_000}}}),
        server: json!({}),
    };
    let tcp = summarize(Protocol::Tcp, [&record]).expect("tcp");
    assert_eq!(tcp.reliability, Some(0.95));
    assert_eq!(throughput(tcp.bytes_sent + 950_000, 5), Ok(390_000.0));
}

#[test]
fn udp_scenario_throughput_has_no_reliability() {
    let record = TestRecord {
        client: json!({"end": {"sum": {"bytes": 2_000_000}}}),
        server: json!({}),
    };
    let udp = summarize(Protocol::Udp, [&record]).expect("udp");
    assert_eq!(udp.reliability, None);
    assert_eq!(udp.bytes_received, None);
    assert_eq!(throughput(udp.bytes_sent, 5), Ok(400_000.0));
}

#[test]
fn sweep_point_from_totals() {
    let tcp = TransferTotals {
        bytes_sent: 1_000_000,
        bytes_received: Some(950_000),
        reliability: Some(0.95),
    };
    let udp = TransferTotals {
        bytes_sent: 2_000_000,
        bytes_received: None,
        reliability: None,
    };
    let p = SweepPoint::from_totals(&tcp, &udp, 5).expect("point");
    assert_eq!(p.tcp_throughput, 390_000.0);
    assert_eq!(p.tcp_reliability, 0.95);
    assert_eq!(p.udp_throughput, 400_000.0);

    assert_eq!(
        SweepPoint::from_totals(&udp, &udp, 5),
        Err(MetricsError::MissingReceived)
    );
}

#[test]
fn zero_duration_is_rejected() {
    assert_eq!(throughput(100, 0), Err(MetricsError::InvalidDuration));
}

#[test]
fn sweep_result_keeps_insertion_order() {
    let mut result = SweepResult::default();
    result.insert(64, point(3.0));
    result.insert(8, point(1.0));
    result.insert(32, point(2.0));
    assert_eq!(result.bandwidths(), vec![64, 8, 32]);

    result.insert(8, point(5.0));
    assert_eq!(result.len(), 3);
    assert_eq!(result.bandwidths(), vec![64, 8, 32]);
    assert_eq!(result.get(8).map(|p| p.tcp_throughput), Some(5.0));
    assert_eq!(
        result.series(Metric::TcpThroughput),
        vec![(64, 3.0), (8, 5.0), (32, 2.0)]
    );
    assert!(result.get(16).is_none());
}

#[test]
fn tcp_sent_plus_received_overflow_is_an_error() {
    let tcp = TransferTotals {
        bytes_sent: u64::MAX,
        bytes_received: Some(1),
        reliability: Some(1.0),
    };
    let udp = TransferTotals {
        bytes_sent: 1,
        bytes_received: None,
        reliability: None,
    };
    assert_eq!(
        SweepPoint::from_totals(&tcp, &udp, 5),
        Err(MetricsError::Overflow)
    );
}
