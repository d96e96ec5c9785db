use super::fake_emu::{Behaviour, FakeNetwork, Shared, host_ip, shared};
use super::unique_temp_dir;
use crate::collect::{CollectError, ResultCollector};
use crate::eventlog::SessionLogs;
use crate::orchestrator::{AttemptOutcome, Orchestrator, RetryPolicy};
use crate::scenario::{ArtifactKey, Bandwidths, Protocol, Role, TestScenario};
use crate::trafficgen::TrafficGenConfig;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        server_ready_timeout: Duration::from_millis(20),
        artifact_timeout: Duration::from_millis(20),
        poll_initial: Duration::from_millis(2),
        poll_max: Duration::from_millis(8),
    }
}

fn trafficgen() -> TrafficGenConfig {
    TrafficGenConfig {
        server_program: "trafficgen server".into(),
        client_program: "trafficgen client".into(),
        out_dir: None,
    }
}

fn tcp_scenario() -> TestScenario {
    TestScenario {
        client: "h1".into(),
        server: "h3".into(),
        protocol: Protocol::Tcp,
        port: 5000,
        bandwidths: Bandwidths {
            bottleneck_mbps: 8,
            other_mbps: 100,
        },
        duration: Duration::from_secs(5),
    }
}

struct Fixture {
    state: Shared,
    net: FakeNetwork,
    collector: ResultCollector,
    logs: SessionLogs,
    report_dir: PathBuf,
    log_dir: PathBuf,
}

fn fixture(name: &str, tcp: Behaviour) -> Fixture {
    let dir = unique_temp_dir(name);
    let report_dir = dir.join("iperf");
    let log_dir = dir.join("logs");
    fs::create_dir_all(&report_dir).expect("create report dir");
    fs::create_dir_all(&log_dir).expect("create log dir");
    let state = shared(report_dir.clone(), tcp, Behaviour::NeverWrite);
    Fixture {
        net: FakeNetwork::new(state.clone()),
        state,
        collector: ResultCollector::new(&report_dir),
        logs: SessionLogs::new(&log_dir),
        report_dir,
        log_dir,
    }
}

#[test]
fn orchestrator_retries_exactly_max_attempts_then_gives_up() {
    let mut fx = fixture("orch-exhaust", Behaviour::NeverWrite);
    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());

    let result = orch.run(&tcp_scenario()).expect("no fatal error");
    assert!(result.is_none());
    assert_eq!(orch.attempts().len(), 5);
    assert!(
        orch.attempts()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::FailedResultMissing)
    );
    let ordinals: Vec<u32> = orch.attempts().iter().map(|a| a.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
    drop(orch);

    let s = fx.state.borrow();
    assert_eq!(s.spawns, 5);
    assert_eq!(s.terminates, 5);
    assert_eq!(s.outstanding, 0);
    assert_eq!(s.max_outstanding, 1);
    assert_eq!(s.client_runs, 5);

    let errors = fs::read_to_string(fx.log_dir.join("error-output.txt")).expect("error log");
    assert!(errors.contains("ATTEMPTS EXCEEDED"));
    assert!(errors.contains("[ LOG ] >> 0 >> "));
}

#[test]
fn orchestrator_success_renames_artifacts_and_reports_reliability() {
    let mut fx = fixture(
        "orch-success",
        Behaviour::WriteTcp {
            sent: 1_000_000,
            recv: 950_000,
        },
    );
    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());

    let scenario = tcp_scenario();
    let result = orch
        .run(&scenario)
        .expect("no fatal error")
        .expect("result present");
    assert_eq!(result.bytes_sent, 1_000_000);
    assert_eq!(result.bytes_received, Some(950_000));
    assert_eq!(result.reliability, Some(0.95));
    assert_eq!(orch.attempts().len(), 1);
    assert_eq!(orch.attempts()[0].outcome, AttemptOutcome::Success);
    drop(orch);

    let key = ArtifactKey::new(
        &scenario,
        host_ip("h1").expect("h1"),
        host_ip("h3").expect("h3"),
    );
    for role in [Role::Client, Role::Server] {
        assert!(fx.report_dir.join(key.scenario_file_name(role)).exists());
        assert!(!fx.report_dir.join(key.raw_file_name(role)).exists());
    }

    let s = fx.state.borrow();
    assert_eq!(s.spawns, 1);
    assert_eq!(s.terminates, 1);
    let (node, server_cmd) = &s.commands[0];
    assert_eq!(node, "h3");
    assert_eq!(server_cmd, "trafficgen server -ip 10.0.0.3 -port 5000");
    let (node, check_cmd) = &s.commands[1];
    assert_eq!(node, "h3");
    assert_eq!(check_cmd, "ss -Hltn 'sport = :5000'");
    let (node, client_cmd) = &s.commands[2];
    assert_eq!(node, "h1");
    assert_eq!(
        client_cmd,
        "trafficgen client -ip 10.0.0.1 -port 5000 -server_ip 10.0.0.3 -test tcp -time 5"
    );

    let success = fs::read_to_string(fx.log_dir.join("success-output.txt")).expect("success log");
    assert!(success.contains("@ attempt 1-8-100"));
}

#[test]
fn orchestrator_does_not_mistake_stale_artifacts_for_results() {
    let mut fx = fixture("orch-stale", Behaviour::NeverWrite);
    let scenario = tcp_scenario();
    let key = ArtifactKey::new(
        &scenario,
        host_ip("h1").expect("h1"),
        host_ip("h3").expect("h3"),
    );
    let stale = json!({"end": {"sum_sent": {"bytes": 999}, "sum_received": {"bytes": 999}}});
    for role in [Role::Client, Role::Server] {
        fs::write(fx.report_dir.join(key.scenario_file_name(role)), stale.to_string())
            .expect("write stale");
        fs::write(fx.report_dir.join(key.raw_file_name(role)), stale.to_string())
            .expect("write stale");
    }

    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());
    let result = orch.run(&scenario).expect("no fatal error");
    assert!(result.is_none());
    drop(orch);

    for role in [Role::Client, Role::Server] {
        assert!(!fx.report_dir.join(key.scenario_file_name(role)).exists());
        assert!(!fx.report_dir.join(key.raw_file_name(role)).exists());
    }
}

#[test]
fn orchestrator_zero_bytes_sent_is_fatal_and_not_retried() {
    let mut fx = fixture("orch-zero", Behaviour::WriteTcp { sent: 0, recv: 0 });
    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());

    let err = orch.run(&tcp_scenario()).expect_err("division undefined");
    assert!(matches!(err, CollectError::DivisionUndefined));
    assert_eq!(orch.attempts().len(), 1);
    drop(orch);

    let s = fx.state.borrow();
    assert_eq!(s.spawns, 1);
    assert_eq!(s.outstanding, 0);
}

#[test]
fn orchestrator_client_failure_still_terminates_server() {
    let mut fx = fixture("orch-client-fail", Behaviour::FailClient);
    let tg = trafficgen();
    let policy = RetryPolicy {
        max_attempts: 3,
        ..fast_policy()
    };
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, policy);

    assert!(orch.run(&tcp_scenario()).expect("no fatal error").is_none());
    assert!(
        orch.attempts()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::FailedClientRun)
    );
    drop(orch);

    let s = fx.state.borrow();
    assert_eq!(s.spawns, 3);
    assert_eq!(s.terminates, 3);
    assert_eq!(s.max_outstanding, 1);
}

#[test]
fn orchestrator_server_spawn_failure_is_retried() {
    let mut fx = fixture("orch-spawn-fail", Behaviour::FailSpawn);
    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());

    assert!(orch.run(&tcp_scenario()).expect("no fatal error").is_none());
    assert_eq!(orch.attempts().len(), 5);
    assert!(
        orch.attempts()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::FailedServerStart)
    );
    drop(orch);
    assert_eq!(fx.state.borrow().client_runs, 0);
}

#[test]
fn orchestrator_unknown_host_yields_absent_result_without_spawning() {
    let mut fx = fixture("orch-unknown", Behaviour::NeverWrite);
    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());

    let scenario = TestScenario {
        server: "h9".into(),
        ..tcp_scenario()
    };
    assert!(orch.run(&scenario).expect("no fatal error").is_none());
    assert!(orch.attempts().is_empty());
    drop(orch);
    assert_eq!(fx.state.borrow().spawns, 0);
}

#[test]
fn orchestrator_waits_for_server_to_listen_before_client() {
    let mut fx = fixture(
        "orch-slow-server",
        Behaviour::WriteTcp {
            sent: 1_000_000,
            recv: 950_000,
        },
    );
    fx.state.borrow_mut().ready_after = 3;
    let tg = trafficgen();
    let policy = RetryPolicy {
        server_ready_timeout: Duration::from_secs(5),
        ..fast_policy()
    };
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, policy);

    let result = orch.run(&tcp_scenario()).expect("no fatal error");
    assert!(result.is_some());
    assert_eq!(orch.attempts().len(), 1);
    drop(orch);

    let s = fx.state.borrow();
    assert_eq!(s.listen_checks, 4);
    assert_eq!(s.client_runs, 1);
    // client 只在端口就绪之后运行
    let client_at = s
        .commands
        .iter()
        .position(|(_, c)| c.contains("-server_ip"))
        .expect("client ran");
    let last_check = s
        .commands
        .iter()
        .rposition(|(_, c)| c.starts_with("ss "))
        .expect("checked port");
    assert!(last_check < client_at);
}

#[test]
fn orchestrator_server_never_listening_is_a_server_start_failure() {
    let mut fx = fixture("orch-deaf-server", Behaviour::NeverWrite);
    fx.state.borrow_mut().ready_after = usize::MAX;
    let tg = trafficgen();
    let policy = RetryPolicy {
        max_attempts: 2,
        ..fast_policy()
    };
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, policy);

    assert!(orch.run(&tcp_scenario()).expect("no fatal error").is_none());
    assert!(
        orch.attempts()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::FailedServerStart)
    );
    drop(orch);

    let s = fx.state.borrow();
    assert_eq!(s.client_runs, 0);
    assert_eq!(s.spawns, 2);
    assert_eq!(s.terminates, 2);
    let errors = fs::read_to_string(fx.log_dir.join("error-output.txt")).expect("error log");
    assert!(errors.contains("failed-server-start"));
    assert!(errors.contains("not listening on port 5000"));
}

#[test]
fn orchestrator_server_exiting_early_is_a_server_start_failure() {
    let mut fx = fixture("orch-dead-server", Behaviour::NeverWrite);
    fx.state.borrow_mut().server_exits_early = true;
    let tg = trafficgen();
    let mut orch = Orchestrator::new(&fx.net, &fx.collector, &tg, &mut fx.logs, fast_policy());

    assert!(orch.run(&tcp_scenario()).expect("no fatal error").is_none());
    assert_eq!(orch.attempts().len(), 5);
    assert!(
        orch.attempts()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::FailedServerStart)
    );
    drop(orch);

    let s = fx.state.borrow();
    assert_eq!(s.client_runs, 0);
    assert_eq!(s.listen_checks, 0);
    assert_eq!(s.spawns, 5);
    assert_eq!(s.outstanding, 0);
}
