//! Probe runner.
//!
//! Spawns the ping utility, streams its stdout through a [`LineParser`] and
//! gathers the samples. A shared semaphore caps how many utility processes
//! run at once; a slot is held from just before spawn until the process has
//! been reaped.

use std::net::IpAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{AddressFamily, LineParser, Platform, ProbeError, ProbeSample};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 4;

/// Probe runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// IPv4 command line. The first word is the program; any further words
    /// go before the ping arguments.
    pub ping4: Vec<String>,
    /// IPv6 command line.
    pub ping6: Vec<String>,
    pub platform: Platform,
    /// Ask the utility to timestamp each reply.
    pub timestamps: bool,
    /// Maximum number of utility processes running at once.
    pub max_concurrent: usize,
    /// Slack after the last scheduled echo request before the process is
    /// treated as hung and killed.
    pub grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ping4: vec!["ping".to_string()],
            ping6: vec!["ping6".to_string()],
            platform: Platform::detect(),
            timestamps: false,
            max_concurrent: 10,
            grace: Duration::from_secs(10),
        }
    }
}

/// Number of echo requests for a run: `floor(duration / period)`.
pub fn probe_count(period: Duration, duration: Duration) -> Result<u64, ProbeError> {
    if period.is_zero() {
        return Err(ProbeError::Config("period must be positive".to_string()));
    }

    let count = duration.as_nanos() / period.as_nanos();
    if count == 0 {
        return Err(ProbeError::Config(format!(
            "duration {:?} is shorter than period {:?}",
            duration, period
        )));
    }

    u64::try_from(count).map_err(|_| ProbeError::Config(format!("probe count {} too large", count)))
}

/// Interval argument for the utility: seconds with two decimals.
fn interval_arg(period: Duration) -> String {
    format!("{:.2}", period.as_secs_f64())
}

/// How long a run may take before its process is considered hung.
///
/// Based on the interval the utility is actually given, which can round up
/// from `period`. `None` when the schedule is too long to represent.
pub fn run_limit(period: Duration, count: u64, grace: Duration) -> Option<Duration> {
    let interval = interval_arg(period)
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map_or(period, |d| d.max(period));

    let nanos = interval.as_nanos().checked_mul(u128::from(count))?;
    let schedule = Duration::from_nanos(u64::try_from(nanos).ok()?);
    schedule.checked_add(grace)
}

/// Utility arguments: interval in seconds with two decimals, then count.
pub fn ping_args(
    target: IpAddr,
    period: Duration,
    count: u64,
    timestamp_flag: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        interval_arg(period),
        "-c".to_string(),
        count.to_string(),
    ];
    if let Some(flag) = timestamp_flag {
        args.push(flag.to_string());
    }
    args.push(target.to_string());
    args
}

/// Runs ping utility processes under a global concurrency cap.
pub struct ProbeRunner {
    config: RunnerConfig,
    slots: Arc<Semaphore>,
}

impl ProbeRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, slots }
    }

    /// Probe `target` every `period` for `duration` and collect all replies.
    ///
    /// A clean exit with no replies is not an error. Spawn failures and a
    /// non-zero exit are. A process still running `grace` after its last
    /// scheduled echo request is killed and reaped, and the run fails with
    /// [`ProbeError::Timeout`].
    pub async fn run(
        &self,
        target: IpAddr,
        period: Duration,
        duration: Duration,
    ) -> Result<Vec<ProbeSample>, ProbeError> {
        let mut stream = self.start(target, period, duration).await?;
        let deadline = stream
            .limit
            .and_then(|limit| Instant::now().checked_add(limit).map(|at| (at, limit)));

        let collect = async {
            let mut out = Vec::new();
            while let Some(sample) = stream.next().await {
                out.push(sample);
            }
            let status = stream.wait().await;
            (out, status)
        };
        let outcome = match deadline {
            Some((at, limit)) => tokio::time::timeout_at(at, collect)
                .await
                .map_err(|_| limit),
            None => Ok(collect.await),
        };

        let (samples, status) = match outcome {
            Ok(done) => done,
            Err(limit) => {
                tracing::warn!("pinging {}: still running after {:?}, killing", target, limit);
                stream.kill().await;
                return Err(ProbeError::Timeout(limit));
            }
        };
        stream.settle(status).await?;

        tracing::info!("pinging {}: {} replies", target, samples.len());
        Ok(samples)
    }

    /// Spawn the utility once a slot is free and return the live reply stream.
    pub async fn start(
        &self,
        target: IpAddr,
        period: Duration,
        duration: Duration,
    ) -> Result<ProbeStream, ProbeError> {
        let count = probe_count(period, duration)?;
        let family = AddressFamily::of(&target);
        let command = match family {
            AddressFamily::V4 => &self.config.ping4,
            AddressFamily::V6 => &self.config.ping6,
        };
        let (program, launcher_args) = command
            .split_first()
            .ok_or_else(|| ProbeError::Config(format!("no probe command for {:?}", family)))?;

        let flag = self
            .config
            .timestamps
            .then(|| self.config.platform.timestamp_flag());
        let args = ping_args(target, period, count, flag);
        let limit = run_limit(period, count, self.config.grace);

        let mut cmd = Command::new(program);
        cmd.args(launcher_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!("will run {} {}", command.join(" "), args.join(" "));

        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProbeError::Closed)?;

        let mut child = cmd.spawn().map_err(|source| ProbeError::Spawn {
            program: program.clone(),
            source,
        })?;

        tracing::info!("pinging {}: started {}", target, program);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProbeError::Config("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProbeError::Config("stderr was not captured".to_string()))?;

        let parser = LineParser::new(self.config.platform, family);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(read_replies(stdout, parser, tx));
        let stderr = tokio::spawn(read_stderr_tail(stderr));

        Ok(ProbeStream {
            child,
            samples: rx,
            stderr,
            program: program.clone(),
            limit,
            slot,
        })
    }
}

/// Replies of one running utility process, in arrival order.
///
/// The stream ends when the utility closes stdout. Dropping it kills the
/// process and frees its slot.
pub struct ProbeStream {
    child: Child,
    samples: mpsc::Receiver<ProbeSample>,
    stderr: JoinHandle<String>,
    program: String,
    limit: Option<Duration>,
    slot: OwnedSemaphorePermit,
}

impl ProbeStream {
    pub async fn next(&mut self) -> Option<ProbeSample> {
        self.samples.recv().await
    }

    /// Drain remaining output, reap the process and release the slot.
    pub async fn finish(mut self) -> Result<(), ProbeError> {
        let status = self.wait().await;
        self.settle(status).await
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        while self.samples.recv().await.is_some() {}
        self.child.wait().await
    }

    /// Release the slot of a reaped process and check how it exited.
    async fn settle(self, status: std::io::Result<ExitStatus>) -> Result<(), ProbeError> {
        let ProbeStream {
            stderr,
            program,
            slot,
            ..
        } = self;
        drop(slot);
        let status = status?;

        if status.success() {
            return Ok(());
        }

        let stderr = match tokio::time::timeout(Duration::from_secs(1), stderr).await {
            Ok(Ok(tail)) => tail,
            _ => String::new(),
        };
        Err(ProbeError::Exit {
            program,
            status,
            stderr,
        })
    }

    /// Kill and reap the process; the slot is freed only afterwards.
    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("failed to kill {}: {}", self.program, e);
        }
    }
}

async fn read_replies<R: AsyncRead + Unpin>(
    out: R,
    parser: LineParser,
    tx: mpsc::Sender<ProbeSample>,
) {
    let mut reader = BufReader::new(out);
    let mut buf = Vec::with_capacity(256);
    let mut last: Option<DateTime<Utc>> = None;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let Some(mut sample) = parser.parse(&line, Utc::now()) else {
                    continue;
                };

                // Keep timestamps non-decreasing within a run.
                if let Some(prev) = last {
                    if sample.at < prev {
                        sample.at = prev;
                    }
                }
                last = Some(sample.at);

                if tx.send(sample).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("error reading probe output: {}", e);
                break;
            }
        }
    }
}

async fn read_stderr_tail<R: AsyncRead + Unpin>(mut err: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = err.read_to_end(&mut buf).await {
        tracing::warn!("error reading probe stderr: {}", e);
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[skip..].join("; ")
}
