//! Exit summaries for both roles.
//!
//! Summaries are accumulated incrementally as replies arrive; individual
//! records are never retained. Rendered summaries go to stderr so that stdout
//! stays a pure record stream.

/// Output format for exit summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for machine consumption.
    Json,
    /// CSV output for spreadsheet import.
    Csv,
}

/// Running round-trip statistics for the prober.
#[derive(Debug, Default)]
pub struct RttCollector {
    count: u64,
    min_us: Option<u64>,
    max_us: Option<u64>,
    sum_us: u128,
    jitter_sum_us: u128,
    jitter_count: u64,
    last_rtt_us: Option<u64>,
    // Welford running mean and sum of squared deviations.
    mean_us: f64,
    m2_us: f64,
}

impl RttCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one round-trip measurement into the running totals.
    pub fn record(&mut self, rtt_us: u64) {
        self.count += 1;
        self.min_us = Some(self.min_us.map_or(rtt_us, |m| m.min(rtt_us)));
        self.max_us = Some(self.max_us.map_or(rtt_us, |m| m.max(rtt_us)));
        self.sum_us += rtt_us as u128;

        let delta = rtt_us as f64 - self.mean_us;
        self.mean_us += delta / self.count as f64;
        self.m2_us += delta * (rtt_us as f64 - self.mean_us);

        // RFC 3550 jitter: mean |RTT_i - RTT_{i-1}|
        if let Some(prev) = self.last_rtt_us {
            self.jitter_sum_us += rtt_us.abs_diff(prev) as u128;
            self.jitter_count += 1;
        }
        self.last_rtt_us = Some(rtt_us);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Population standard deviation of RTT; needs at least two samples.
    pub fn std_dev_us(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        Some((self.m2_us / self.count as f64).max(0.0).sqrt())
    }

    pub fn snapshot(&self, probes_sent: u64) -> StatsSnapshot {
        StatsSnapshot {
            probes_sent,
            replies_received: self.count,
            min_rtt_us: self.min_us,
            max_rtt_us: self.max_us,
            avg_rtt_us: (self.count > 0).then(|| self.sum_us as f64 / self.count as f64),
            jitter_us: (self.jitter_count > 0)
                .then(|| self.jitter_sum_us as f64 / self.jitter_count as f64),
            std_dev_us: self.std_dev_us(),
        }
    }
}

/// Serializable prober statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatsSnapshot {
    pub probes_sent: u64,
    pub replies_received: u64,
    pub min_rtt_us: Option<u64>,
    pub max_rtt_us: Option<u64>,
    pub avg_rtt_us: Option<f64>,
    pub jitter_us: Option<f64>,
    pub std_dev_us: Option<f64>,
}

impl StatsSnapshot {
    pub fn print(&self, format: OutputFormat) {
        eprint!("{}", self.render(format));
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => {
                let mut out = String::from("\n--- RTT Statistics ---\n");
                out.push_str(&format!("Probes sent: {}\n", self.probes_sent));
                out.push_str(&format!("Replies received: {}\n", self.replies_received));
                if let Some(v) = self.min_rtt_us {
                    out.push_str(&format!("Min RTT: {} us\n", v));
                }
                if let Some(v) = self.avg_rtt_us {
                    out.push_str(&format!("Avg RTT: {:.1} us\n", v));
                }
                if let Some(v) = self.max_rtt_us {
                    out.push_str(&format!("Max RTT: {} us\n", v));
                }
                if let Some(v) = self.jitter_us {
                    out.push_str(&format!("Jitter: {:.1} us\n", v));
                }
                if let Some(v) = self.std_dev_us {
                    out.push_str(&format!("Std dev: {:.1} us\n", v));
                }
                out
            }
            OutputFormat::Json => to_json_line(self),
            OutputFormat::Csv => format!(
                "sent,received,min_us,avg_us,max_us,jitter_us,std_dev_us\n{},{},{},{},{},{},{}\n",
                self.probes_sent,
                self.replies_received,
                fmt_opt(self.min_rtt_us.map(|v| v as f64)),
                fmt_opt(self.avg_rtt_us),
                fmt_opt(self.max_rtt_us.map(|v| v as f64)),
                fmt_opt(self.jitter_us),
                fmt_opt(self.std_dev_us),
            ),
        }
    }
}

/// Serializable reflector statistics.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ReflectorStats {
    pub datagrams_received: u64,
    pub probes_reflected: u64,
    pub handshakes_answered: u64,
    pub unknown_forwarded: u64,
    pub unknown_dropped: u64,
}

impl ReflectorStats {
    pub fn print(&self, format: OutputFormat) {
        eprint!("{}", self.render(format));
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => format!(
                "\n--- Reflector Statistics ---\n\
                 Datagrams received: {}\n\
                 Probes reflected: {}\n\
                 Handshakes answered: {}\n\
                 Unknown forwarded: {}\n\
                 Unknown dropped: {}\n",
                self.datagrams_received,
                self.probes_reflected,
                self.handshakes_answered,
                self.unknown_forwarded,
                self.unknown_dropped,
            ),
            OutputFormat::Json => to_json_line(self),
            OutputFormat::Csv => format!(
                "received,reflected,handshakes,forwarded,dropped\n{},{},{},{},{}\n",
                self.datagrams_received,
                self.probes_reflected,
                self.handshakes_answered,
                self.unknown_forwarded,
                self.unknown_dropped,
            ),
        }
    }
}

fn to_json_line<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => format!("{}\n", json),
        Err(e) => {
            log::error!("Failed to serialize summary: {}", e);
            String::new()
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(String::new, |x| format!("{:.1}", x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collector() {
        let snapshot = RttCollector::new().snapshot(5);
        assert_eq!(snapshot.probes_sent, 5);
        assert_eq!(snapshot.replies_received, 0);
        assert_eq!(snapshot.min_rtt_us, None);
        assert_eq!(snapshot.avg_rtt_us, None);
        assert_eq!(snapshot.jitter_us, None);
    }

    #[test]
    fn test_collector_running_values() {
        let mut c = RttCollector::new();
        for rtt in [100, 300, 200] {
            c.record(rtt);
        }
        let s = c.snapshot(4);

        assert_eq!(c.count(), 3);
        assert_eq!(s.min_rtt_us, Some(100));
        assert_eq!(s.max_rtt_us, Some(300));
        assert_eq!(s.avg_rtt_us, Some(200.0));
        // |300-100| + |200-300| over two deltas
        assert_eq!(s.jitter_us, Some(150.0));
    }

    #[test]
    fn test_std_dev_needs_two_samples() {
        let mut c = RttCollector::new();
        assert_eq!(c.std_dev_us(), None);
        c.record(500);
        assert_eq!(c.std_dev_us(), None);
        assert_eq!(c.snapshot(1).std_dev_us, None);
    }

    #[test]
    fn test_std_dev_running_population() {
        let mut c = RttCollector::new();
        for rtt in [2, 4, 4, 4, 5, 5, 7, 9] {
            c.record(rtt);
        }
        let sd = c.snapshot(8).std_dev_us.unwrap();
        assert!((sd - 2.0).abs() < 1e-9, "std dev was {}", sd);

        // Identical samples have no spread.
        let mut flat = RttCollector::new();
        for _ in 0..1000 {
            flat.record(1_000_000);
        }
        assert_eq!(flat.std_dev_us(), Some(0.0));
    }

    #[test]
    fn test_std_dev_in_rendered_summaries() {
        let mut c = RttCollector::new();
        c.record(100);
        c.record(300);
        let s = c.snapshot(2);
        assert!(s.render(OutputFormat::Text).contains("Std dev: 100.0 us"));

        let parsed: serde_json::Value =
            serde_json::from_str(s.render(OutputFormat::Json).trim()).unwrap();
        assert_eq!(parsed["std_dev_us"], 100.0);

        let csv = s.render(OutputFormat::Csv);
        assert!(csv.starts_with("sent,received,min_us,avg_us,max_us,jitter_us,std_dev_us\n"));
        assert!(csv.ends_with(",100.0\n"));
    }

    #[test]
    fn test_stats_text_format() {
        let mut c = RttCollector::new();
        c.record(120);
        let text = c.snapshot(1).render(OutputFormat::Text);
        assert!(text.contains("Probes sent: 1"));
        assert!(text.contains("Min RTT: 120 us"));
        assert!(!text.contains("Jitter"));
    }

    #[test]
    fn test_stats_json_format() {
        let mut c = RttCollector::new();
        c.record(10);
        c.record(30);
        let json = c.snapshot(2).render(OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(json.trim()).unwrap();

        assert_eq!(parsed["probes_sent"], 2);
        assert_eq!(parsed["replies_received"], 2);
        assert_eq!(parsed["min_rtt_us"], 10);
        assert_eq!(parsed["max_rtt_us"], 30);
        assert_eq!(parsed["jitter_us"], 20.0);
    }

    #[test]
    fn test_stats_json_none_fields() {
        let json = RttCollector::new().snapshot(0).render(OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(json.trim()).unwrap();
        assert!(parsed["min_rtt_us"].is_null());
        assert!(parsed["avg_rtt_us"].is_null());
    }

    #[test]
    fn test_stats_csv_format() {
        let csv = RttCollector::new().snapshot(3).render(OutputFormat::Csv);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "3,0,,,,,");
    }

    #[test]
    fn test_reflector_stats_json() {
        let stats = ReflectorStats {
            datagrams_received: 7,
            probes_reflected: 5,
            handshakes_answered: 1,
            unknown_forwarded: 1,
            unknown_dropped: 0,
        };
        let parsed: serde_json::Value =
            serde_json::from_str(stats.render(OutputFormat::Json).trim()).unwrap();
        assert_eq!(parsed["datagrams_received"], 7);
        assert_eq!(parsed["probes_reflected"], 5);
        assert_eq!(parsed["handshakes_answered"], 1);
    }

    #[test]
    fn test_output_format_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OutputFormat::Json).unwrap(), "\"json\"");
    }
}
