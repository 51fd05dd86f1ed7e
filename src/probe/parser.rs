//! Ping output line parsing.
//!
//! Each reply line of the ping utility becomes one [`ProbeSample`]. Field layout
//! and timestamp prefixes differ between the iputils and BSD flavours of ping,
//! so the parser is built for one [`Platform`] and address family up front.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;

use super::ProbeSample;

/// Flavour of the host ping utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// iputils ping. `-D` prefixes replies with `[epoch.micros]`.
    Linux,
    /// BSD / macOS ping. `--apple-time` prefixes replies with `HH:MM:SS.micros`.
    Darwin,
}

impl Platform {
    /// Pick the variant matching the OS this binary was built for.
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" | "ios" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" => Platform::Darwin,
            _ => Platform::Linux,
        }
    }

    /// Flag asking the utility to timestamp every reply line.
    pub fn timestamp_flag(self) -> &'static str {
        match self {
            Platform::Linux => "-D",
            Platform::Darwin => "--apple-time",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "darwin" | "macos" | "bsd" => Ok(Platform::Darwin),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Darwin => write!(f, "darwin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

const LINUX_V4: &str = r"(?:\[(?P<epoch>\d+\.\d+)\]\s+)?\d+ bytes from (?P<from>[^:]+): icmp_seq=(?P<seq>\d+) ttl=\d+ time=(?P<rtt>\d+(?:\.\d+)?) ms";
const LINUX_V6: &str = r"(?:\[(?P<epoch>\d+\.\d+)\]\s+)?\d+ bytes from (?P<from>\S+?)[:,]? icmp_seq=(?P<seq>\d+) (?:ttl|hlim)=\d+ time=(?P<rtt>\d+(?:\.\d+)?) ms";
const DARWIN_V4: &str = r"(?:(?P<clock>\d{1,2}:\d{2}:\d{2}\.\d+)\s+)?\d+ bytes from (?P<from>[^:]+): icmp_seq=(?P<seq>\d+) ttl=\d+ time=(?P<rtt>\d+(?:\.\d+)?) ms";
const DARWIN_V6: &str = r"(?:(?P<clock>\d{1,2}:\d{2}:\d{2}\.\d+)\s+)?\d+ bytes from (?P<from>[^,]+), icmp_seq=(?P<seq>\d+) hlim=\d+ time=(?P<rtt>\d+(?:\.\d+)?) ms";

fn pattern(platform: Platform, family: AddressFamily) -> &'static Regex {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [LINUX_V4, LINUX_V6, DARWIN_V4, DARWIN_V6].map(|p| Regex::new(p).unwrap())
    });

    match (platform, family) {
        (Platform::Linux, AddressFamily::V4) => &patterns[0],
        (Platform::Linux, AddressFamily::V6) => &patterns[1],
        (Platform::Darwin, AddressFamily::V4) => &patterns[2],
        (Platform::Darwin, AddressFamily::V6) => &patterns[3],
    }
}

/// Parser for one platform and address family.
#[derive(Debug, Clone, Copy)]
pub struct LineParser {
    re: &'static Regex,
}

impl LineParser {
    pub fn new(platform: Platform, family: AddressFamily) -> Self {
        Self {
            re: pattern(platform, family),
        }
    }

    /// Parse one line of utility output.
    ///
    /// Returns `None` for anything that is not a well-formed reply line:
    /// banners, statistics, timeouts, or numeric fields that do not parse.
    /// `arrived` is used when the line carries no timestamp of its own.
    pub fn parse(&self, line: &str, arrived: DateTime<Utc>) -> Option<ProbeSample> {
        let caps = self.re.captures(line.trim_end())?;

        let seq = caps.name("seq")?.as_str().parse::<u64>().ok()?;
        let rtt_ms = caps.name("rtt")?.as_str().parse::<f64>().ok()?;
        if !rtt_ms.is_finite() {
            return None;
        }
        let rtt = Duration::from_nanos((rtt_ms * 1e6).round() as u64);

        let at = if let Some(epoch) = caps.name("epoch") {
            parse_epoch(epoch.as_str())
        } else if let Some(clock) = caps.name("clock") {
            NaiveTime::parse_from_str(clock.as_str(), "%H:%M:%S%.f")
                .ok()
                .and_then(|t| resolve_clock(t, arrived, &Local))
        } else {
            None
        };

        Some(ProbeSample {
            seq,
            at: at.unwrap_or(arrived),
            rtt,
        })
    }
}

/// Parse `secs.frac` exactly, without a round trip through `f64`.
fn parse_epoch(s: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = s.split_once('.')?;
    let secs = secs.parse::<i64>().ok()?;
    let digits: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
    let nanos = digits.parse::<u32>().ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// Anchor a wall-clock time of day to the date on which the line arrived.
///
/// A clock value more than an hour ahead of arrival was printed just before
/// midnight, so it belongs to the previous day.
pub fn resolve_clock<Tz: TimeZone>(
    time: NaiveTime,
    arrived: DateTime<Utc>,
    tz: &Tz,
) -> Option<DateTime<Utc>> {
    let local_date = arrived.with_timezone(tz).date_naive();
    let candidate = tz
        .from_local_datetime(&local_date.and_time(time))
        .earliest()?
        .with_timezone(&Utc);

    if candidate > arrived + ChronoDuration::hours(1) {
        Some(candidate - ChronoDuration::days(1))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrived() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_linux_v4_reply() {
        let p = LineParser::new(Platform::Linux, AddressFamily::V4);
        let s = p
            .parse("64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=0.045 ms", arrived())
            .unwrap();
        assert_eq!(s.seq, 1);
        assert_eq!(s.rtt, Duration::from_nanos(45_000));
        assert_eq!(s.at, arrived());
    }

    #[test]
    fn test_linux_epoch_prefix() {
        let p = LineParser::new(Platform::Linux, AddressFamily::V4);
        let s = p
            .parse(
                "[1699999999.123456] 64 bytes from 10.0.0.1: icmp_seq=7 ttl=63 time=12.5 ms",
                arrived(),
            )
            .unwrap();
        assert_eq!(s.seq, 7);
        assert_eq!(s.at.timestamp(), 1_699_999_999);
        assert_eq!(s.at.timestamp_subsec_micros(), 123_456);
        assert_eq!(s.rtt, Duration::from_micros(12_500));
    }

    #[test]
    fn test_linux_v6_reply() {
        let p = LineParser::new(Platform::Linux, AddressFamily::V6);
        let s = p
            .parse("64 bytes from ::1: icmp_seq=3 ttl=64 time=0.031 ms", arrived())
            .unwrap();
        assert_eq!(s.seq, 3);
        assert_eq!(s.rtt, Duration::from_nanos(31_000));

        let s = p
            .parse("16 bytes from 2001:db8::1, icmp_seq=4 hlim=57 time=20.1 ms", arrived())
            .unwrap();
        assert_eq!(s.seq, 4);
    }

    #[test]
    fn test_darwin_replies() {
        let v4 = LineParser::new(Platform::Darwin, AddressFamily::V4);
        let s = v4
            .parse("64 bytes from 192.168.1.1: icmp_seq=0 ttl=64 time=3.210 ms", arrived())
            .unwrap();
        assert_eq!(s.seq, 0);
        assert_eq!(s.rtt, Duration::from_micros(3_210));

        let v6 = LineParser::new(Platform::Darwin, AddressFamily::V6);
        let s = v6
            .parse("16 bytes from ::1, icmp_seq=2 hlim=64 time=0.083 ms", arrived())
            .unwrap();
        assert_eq!(s.seq, 2);
        assert_eq!(s.rtt, Duration::from_nanos(83_000));
    }

    #[test]
    fn test_darwin_clock_prefix_is_parsed() {
        let p = LineParser::new(Platform::Darwin, AddressFamily::V4);
        let s = p
            .parse(
                "12:34:56.789012 64 bytes from 1.1.1.1: icmp_seq=5 ttl=57 time=9.9 ms",
                arrived(),
            )
            .unwrap();
        assert_eq!(s.seq, 5);
        assert_eq!(s.at.timestamp_subsec_micros(), 789_012);
    }

    #[test]
    fn test_integral_rtt() {
        let p = LineParser::new(Platform::Linux, AddressFamily::V4);
        let s = p
            .parse("64 bytes from 8.8.8.8: icmp_seq=9 ttl=117 time=112 ms", arrived())
            .unwrap();
        assert_eq!(s.rtt, Duration::from_millis(112));
    }

    #[test]
    fn test_non_reply_lines_yield_nothing() {
        let p = LineParser::new(Platform::Linux, AddressFamily::V4);
        let lines = [
            "",
            "PING 127.0.0.1 (127.0.0.1) 56(84) bytes of data.",
            "--- 127.0.0.1 ping statistics ---",
            "5 packets transmitted, 5 received, 0% packet loss, time 4005ms",
            "rtt min/avg/max/mdev = 0.031/0.045/0.061/0.010 ms",
            "Request timeout for icmp_seq 3",
            "From 10.0.0.1 icmp_seq=2 Destination Host Unreachable",
        ];
        for line in lines {
            assert!(p.parse(line, arrived()).is_none(), "matched {:?}", line);
        }
    }

    #[test]
    fn test_overflowing_seq_is_dropped() {
        let p = LineParser::new(Platform::Linux, AddressFamily::V4);
        let line = "64 bytes from 127.0.0.1: icmp_seq=99999999999999999999999 ttl=64 time=0.1 ms";
        assert!(p.parse(line, arrived()).is_none());
    }

    #[test]
    fn test_wrong_family_does_not_match() {
        let p = LineParser::new(Platform::Darwin, AddressFamily::V4);
        assert!(p
            .parse("16 bytes from ::1, icmp_seq=2 hlim=64 time=0.083 ms", arrived())
            .is_none());
    }

    #[test]
    fn test_resolve_clock_same_day() {
        let arrived = DateTime::parse_from_rfc3339("2024-03-10T12:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        let t = NaiveTime::from_hms_micro_opt(12, 0, 0, 500_000).unwrap();
        let at = resolve_clock(t, arrived, &Utc).unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-10T12:00:00.500+00:00");
    }

    #[test]
    fn test_resolve_clock_midnight_rollover() {
        let arrived = DateTime::parse_from_rfc3339("2024-03-10T00:00:00.2Z")
            .unwrap()
            .with_timezone(&Utc);
        let t = NaiveTime::from_hms_micro_opt(23, 59, 59, 900_000).unwrap();
        let at = resolve_clock(t, arrived, &Utc).unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-09T23:59:59.900+00:00");
    }

    #[test]
    fn test_platform_selection() {
        assert_eq!(Platform::from_os("linux"), Platform::Linux);
        assert_eq!(Platform::from_os("macos"), Platform::Darwin);
        assert_eq!("Darwin".parse::<Platform>().unwrap(), Platform::Darwin);
        assert!("plan9".parse::<Platform>().is_err());
        assert_eq!(Platform::Linux.timestamp_flag(), "-D");
    }
}
