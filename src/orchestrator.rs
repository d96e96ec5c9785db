//! 测试编排
//!
//! 对一个 [`TestScenario`] 最多尝试 `max_attempts` 次。每次 Attempt：
//!
//! ```text
//! Init -> ServerStarting -> ClientRunning -> AwaitingResult -> Done
//!   \            \                \                  \
//!    +------------+----------------+------------------+--> Failed(outcome)
//! ```
//!
//! server 进程由 [`ServerGuard`] 持有，无论 Attempt 如何结束都会在下一次
//! spawn 之前被终止。

use crate::collect::{CollectError, ResultCollector, TestResult};
use crate::emu::{EmulatedNetwork, EmulationError, ProcessHandle};
use crate::eventlog::{SessionLogs, instance_message};
use crate::scenario::{ArtifactKey, TestScenario};
use crate::trafficgen::{TrafficGenConfig, listening_check_command};
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// 重试与等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// 等待 server 开始监听的总时长
    pub server_ready_timeout: Duration,
    /// 等待两端报告的总时长
    pub artifact_timeout: Duration,
    /// 轮询间隔从这里开始翻倍
    pub poll_initial: Duration,
    pub poll_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            server_ready_timeout: Duration::from_secs(5),
            artifact_timeout: Duration::from_secs(10),
            poll_initial: Duration::from_millis(50),
            poll_max: Duration::from_secs(1),
        }
    }
}

/// Attempt 状态机的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Init,
    ServerStarting,
    ClientRunning,
    AwaitingResult,
    Done,
    Failed(AttemptOutcome),
}

/// Attempt 的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Success,
    FailedServerStart,
    FailedClientRun,
    FailedResultMissing,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::Success => "success",
            AttemptOutcome::FailedServerStart => "failed-server-start",
            AttemptOutcome::FailedClientRun => "failed-client-run",
            AttemptOutcome::FailedResultMissing => "failed-result-missing",
        }
    }
}

/// 一次尝试的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub ordinal: u32,
    pub outcome: AttemptOutcome,
}

/// 持有后台 server 进程；离开作用域时终止它
pub struct ServerGuard<P: ProcessHandle> {
    process: Option<P>,
}

impl<P: ProcessHandle> ServerGuard<P> {
    pub fn new(process: P) -> Self {
        Self {
            process: Some(process),
        }
    }

    /// server 是否已经自行退出
    pub fn has_exited(&mut self) -> Result<bool, EmulationError> {
        match self.process.as_mut() {
            Some(p) => p.has_exited(),
            None => Ok(true),
        }
    }

    /// 显式终止，拿到终止结果
    pub fn release(mut self) -> Result<(), EmulationError> {
        match self.process.take() {
            Some(mut p) => p.terminate(),
            None => Ok(()),
        }
    }
}

impl<P: ProcessHandle> Drop for ServerGuard<P> {
    fn drop(&mut self) {
        if let Some(mut p) = self.process.take() {
            if let Err(e) = p.terminate() {
                warn!(pid = ?p.id(), error = %e, "server 进程终止失败");
            }
        }
    }
}

/// 单次 Attempt 的失败原因
enum AttemptError {
    Failed(AttemptOutcome, String),
    /// 不可重试的数据质量错误
    Fatal(CollectError),
}

/// 在一张已启动的仿真网络上运行测试场景
pub struct Orchestrator<'a, N: EmulatedNetwork> {
    net: &'a N,
    collector: &'a ResultCollector,
    trafficgen: &'a TrafficGenConfig,
    logs: &'a mut SessionLogs,
    policy: RetryPolicy,
    attempts: Vec<Attempt>,
}

impl<'a, N: EmulatedNetwork> Orchestrator<'a, N> {
    pub fn new(
        net: &'a N,
        collector: &'a ResultCollector,
        trafficgen: &'a TrafficGenConfig,
        logs: &'a mut SessionLogs,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            net,
            collector,
            trafficgen,
            logs,
            policy,
            attempts: Vec::new(),
        }
    }

    /// 上一次 [`run`](Self::run) 的全部 Attempt
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// 运行场景。
    ///
    /// 次数用尽时返回 `Ok(None)`；只有数据质量错误（如发送字节为 0）
    /// 以 `Err` 返回，且不再重试。
    #[tracing::instrument(skip(self), fields(scenario = %scenario))]
    pub fn run(&mut self, scenario: &TestScenario) -> Result<Option<TestResult>, CollectError> {
        self.attempts.clear();
        let bw = scenario.bandwidths;

        let (server_ip, client_ip) = match self.resolve(scenario) {
            Ok(ips) => ips,
            Err(e) => {
                self.logs.error(&instance_message(
                    &format!("[ ERROR ] failure to extract IP addresses for {scenario}: {e}"),
                    &bw,
                ));
                return Ok(None);
            }
        };
        let key = ArtifactKey::new(scenario, client_ip, server_ip);

        for ordinal in 1..=self.policy.max_attempts {
            let mut attempt = Attempt {
                ordinal,
                outcome: AttemptOutcome::Pending,
            };
            match self.attempt(scenario, &key, ordinal) {
                Ok(result) => {
                    attempt.outcome = AttemptOutcome::Success;
                    self.attempts.push(attempt);
                    self.logs.success(&instance_message(
                        &format!("successfully performed {scenario} @ attempt {ordinal}"),
                        &bw,
                    ));
                    return Ok(Some(result));
                }
                Err(AttemptError::Failed(outcome, reason)) => {
                    attempt.outcome = outcome;
                    self.attempts.push(attempt);
                    self.logs.error(&instance_message(
                        &format!(
                            "[ ERROR ] {} in {scenario} @ attempt {ordinal}: {reason}",
                            outcome.as_str()
                        ),
                        &bw,
                    ));
                }
                Err(AttemptError::Fatal(e)) => {
                    attempt.outcome = AttemptOutcome::FailedResultMissing;
                    self.attempts.push(attempt);
                    self.logs.error(&instance_message(
                        &format!("[ ERROR ] unusable result for {scenario} @ attempt {ordinal}: {e}"),
                        &bw,
                    ));
                    return Err(e);
                }
            }
        }

        self.logs.error(&instance_message(
            &format!("failure to complete testing (ATTEMPTS EXCEEDED) {scenario}"),
            &bw,
        ));
        Ok(None)
    }

    fn resolve(&self, scenario: &TestScenario) -> Result<(Ipv4Addr, Ipv4Addr), EmulationError> {
        Ok((
            self.net.resolve_ip(&scenario.server)?,
            self.net.resolve_ip(&scenario.client)?,
        ))
    }

    fn attempt(
        &self,
        scenario: &TestScenario,
        key: &ArtifactKey,
        ordinal: u32,
    ) -> Result<TestResult, AttemptError> {
        let mut state = AttemptState::Init;
        trace!(ordinal, ?state, "开始 Attempt");

        if let Err(e) = self.collector.invalidate(key) {
            return Err(AttemptError::Failed(
                AttemptOutcome::FailedServerStart,
                format!("could not remove stale artifacts: {e}"),
            ));
        }

        // Init -> ServerStarting
        let command = self.trafficgen.server_command(key.server_ip, scenario.port);
        let mut server = match self.net.spawn(&scenario.server, &command) {
            Ok(p) => ServerGuard::new(p),
            Err(e) => {
                state = AttemptState::Failed(AttemptOutcome::FailedServerStart);
                debug!(ordinal, ?state, "server 启动失败");
                return Err(AttemptError::Failed(
                    AttemptOutcome::FailedServerStart,
                    e.to_string(),
                ));
            }
        };
        state = AttemptState::ServerStarting;
        debug!(ordinal, ?state, server = %scenario.server, "server 已启动，等待监听");
        if let Err(reason) = self.await_server(scenario, &mut server) {
            state = AttemptState::Failed(AttemptOutcome::FailedServerStart);
            debug!(ordinal, ?state, %reason, "server 未就绪");
            return Err(AttemptError::Failed(
                AttemptOutcome::FailedServerStart,
                reason,
            ));
        }

        // ServerStarting -> ClientRunning
        let command = self.trafficgen.client_command(
            key.client_ip,
            scenario.port,
            key.server_ip,
            scenario.protocol,
            scenario.duration.as_secs(),
        );
        state = AttemptState::ClientRunning;
        debug!(ordinal, ?state, client = %scenario.client, "运行 client");
        if let Err(e) = self.net.exec(&scenario.client, &command) {
            return Err(AttemptError::Failed(
                AttemptOutcome::FailedClientRun,
                e.to_string(),
            ));
        }

        // ClientRunning -> AwaitingResult
        state = AttemptState::AwaitingResult;
        debug!(ordinal, ?state, "等待两端报告");
        let collected = self.await_result(key);

        // 无论结果如何，先终止 server
        if let Err(e) = server.release() {
            warn!(ordinal, error = %e, "server 进程终止失败");
        }

        match collected {
            Ok(result) => {
                state = AttemptState::Done;
                info!(ordinal, ?state, bytes_sent = result.bytes_sent, "Attempt 成功");
                Ok(result)
            }
            Err(e) if e.is_retryable() => Err(AttemptError::Failed(
                AttemptOutcome::FailedResultMissing,
                e.to_string(),
            )),
            Err(e) => Err(AttemptError::Fatal(e)),
        }
    }

    /// 指数退避轮询 server 节点上的监听端口；server 提前退出或超时都算启动失败
    fn await_server(
        &self,
        scenario: &TestScenario,
        server: &mut ServerGuard<N::Process>,
    ) -> Result<(), String> {
        let check = listening_check_command(scenario.port);
        let deadline = Instant::now() + self.policy.server_ready_timeout;
        let mut delay = self.policy.poll_initial;
        let mut last_error = None;
        loop {
            match server.has_exited() {
                Ok(true) => return Err("server exited before listening".to_string()),
                Ok(false) => {}
                Err(e) => return Err(e.to_string()),
            }
            match self.net.exec(&scenario.server, &check) {
                Ok(out) if !out.trim().is_empty() => return Ok(()),
                Ok(_) => {}
                Err(e) => last_error = Some(e.to_string()),
            }
            let now = Instant::now();
            if now >= deadline {
                let mut reason = format!(
                    "server not listening on port {} after {:?}",
                    scenario.port, self.policy.server_ready_timeout
                );
                if let Some(e) = last_error {
                    reason.push_str(&format!(" (last check: {e})"));
                }
                return Err(reason);
            }
            trace!(?delay, port = scenario.port, "server 尚未监听");
            thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(self.policy.poll_max);
        }
    }

    /// 指数退避轮询，直到两端报告都存在且能解析，或超时
    fn await_result(&self, key: &ArtifactKey) -> Result<TestResult, CollectError> {
        let deadline = Instant::now() + self.policy.artifact_timeout;
        let mut delay = self.policy.poll_initial;
        loop {
            match self.collector.collect(key) {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(e);
                    }
                    trace!(error = %e, ?delay, "报告尚未就绪");
                    thread::sleep(delay.min(deadline - now));
                    delay = (delay * 2).min(self.policy.poll_max);
                }
            }
        }
    }
}
