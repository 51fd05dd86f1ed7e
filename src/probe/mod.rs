//! Probe module for latency measurement.
//!
//! Drives the platform ping utility and turns its output into samples.

mod parser;
mod runner;

pub use parser::*;
pub use runner::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{program} exited with {status}{}", fmt_stderr(.stderr))]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe slots closed")]
    Closed,
}

fn fmt_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// One measured round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    /// Sequence number as reported by the utility.
    pub seq: u64,
    /// When the reply was observed. Serialized as fractional epoch seconds.
    #[serde(serialize_with = "ser_epoch", deserialize_with = "de_epoch")]
    pub at: DateTime<Utc>,
    /// Round-trip time. Serialized as fractional milliseconds.
    #[serde(serialize_with = "ser_millis", deserialize_with = "de_millis")]
    pub rtt: Duration,
}

/// Caller-supplied probe parameters, already defaulted by the intake layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub target: std::net::IpAddr,
    pub period: Duration,
    pub duration: Duration,
}

/// Convert fractional epoch seconds to a timestamp, keeping sub-second precision.
pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn ser_epoch<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    let secs = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9;
    s.serialize_f64(secs)
}

fn de_epoch<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let secs = f64::deserialize(d)?;
    from_epoch_secs(secs).ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}

fn ser_millis<S: Serializer>(rtt: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(rtt.as_nanos() as f64 / 1e6)
}

fn de_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let ms = f64::deserialize(d)?;
    if !ms.is_finite() || ms < 0.0 {
        return Err(serde::de::Error::custom("negative or invalid rtt"));
    }
    Ok(Duration::from_nanos((ms * 1e6).round() as u64))
}
