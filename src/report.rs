//! Output adapter: the per-tick CSV row stream and the JSON history window
//! handed to chart consumers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One summary row per pacing tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Reference server wall time, Unix seconds.
    pub unix_time: f64,
    /// Same instant, ISO-8601 with nanosecond precision.
    pub utc_time: String,
    /// Offset per non-reference server in milliseconds; None when the
    /// server produced no sample this tick.
    pub offsets_ms: Vec<Option<f64>>,
    /// Observed counter frequency in MHz.
    pub frequency_mhz: f64,
}

/// One point of a server's bounded history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time: String,
    pub offset_seconds: f64,
}

pub trait OutputSink {
    fn header(&mut self, reference: &str, servers: &[String]) -> Result<()>;
    fn row(&mut self, row: &Row) -> Result<()>;
}

/// CSV writer: a two-row header (names, units), then one row per tick.
pub struct CsvSink<W: Write> {
    out: W,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        CsvSink { out }
    }
}

impl<W: Write> OutputSink for CsvSink<W> {
    fn header(&mut self, reference: &str, servers: &[String]) -> Result<()> {
        let mut names = vec![
            format!("{} - Unix Time", reference),
            format!("{} - UTC Time", reference),
        ];
        names.extend(servers.iter().map(|s| format!("{} - Offset", s)));
        names.push("Counter Frequency".to_string());
        writeln!(self.out, "{}", names.join(","))?;

        let mut units = vec!["Seconds Since 1970".to_string(), "UTC Time".to_string()];
        units.extend(servers.iter().map(|_| "Milliseconds".to_string()));
        units.push("MHz".to_string());
        writeln!(self.out, "{}", units.join(","))?;
        self.out.flush()?;
        Ok(())
    }

    fn row(&mut self, row: &Row) -> Result<()> {
        let mut fields = vec![format!("{:.6}", row.unix_time), row.utc_time.clone()];
        fields.extend(row.offsets_ms.iter().map(|o| match o {
            Some(ms) => format!("{:.4}", ms),
            None => "Unknown".to_string(),
        }));
        fields.push(format!("{:.6}", row.frequency_mhz));
        writeln!(self.out, "{}", fields.join(","))?;
        self.out.flush()?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Time;

    fn sink_output(f: impl FnOnce(&mut CsvSink<Vec<u8>>)) -> String {
        let mut sink = CsvSink::new(Vec::new());
        f(&mut sink);
        String::from_utf8(sink.out).expect("utf8 output")
    }

    #[test]
    fn test_header_rows() {
        let out = sink_output(|sink| {
            sink.header("ref.example", &["s1.example".to_string(), "s2.example".to_string()])
                .expect("header written");
        });
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some(
                "ref.example - Unix Time,ref.example - UTC Time,\
                 s1.example - Offset,s2.example - Offset,Counter Frequency"
            )
        );
        assert_eq!(
            lines.next(),
            Some("Seconds Since 1970,UTC Time,Milliseconds,Milliseconds,MHz")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_row_field_shape() {
        // one reference plus one server: exactly four fields
        let t = Time::from_unix(1_096_254_342, 250_000_000);
        let out = sink_output(|sink| {
            sink.row(&Row {
                unix_time: t.to_unix_seconds(),
                utc_time: t.to_iso8601().expect("in range"),
                offsets_ms: vec![Some(12.3456)],
                frequency_mhz: 1000.000213,
            })
            .expect("row written");
        });
        let line = out.trim_end();
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 4, "got {:?}", fields);
        assert_eq!(fields[0], "1096254342.250000");
        assert!(fields[1].starts_with("2004-09-27T03:05:42.25"), "got {}", fields[1]);
        assert_eq!(fields[2], "12.3456");
        assert_eq!(fields[3], "1000.000213");
    }

    #[test]
    fn test_row_unknown_offsets() {
        let out = sink_output(|sink| {
            sink.row(&Row {
                unix_time: 0.0,
                utc_time: "1970-01-01T00:00:00.000000000Z".to_string(),
                offsets_ms: vec![None, Some(-0.25), None],
                frequency_mhz: 1000.0,
            })
            .expect("row written");
        });
        let line = out.trim_end();
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields[2], "Unknown");
        assert_eq!(fields[3], "-0.2500");
        assert_eq!(fields[4], "Unknown");
    }

    #[test]
    fn test_history_point_json_roundtrip() {
        let point = HistoryPoint {
            time: "2004-09-27T03:19:02.250000000Z".to_string(),
            offset_seconds: -4.2e-5,
        };
        let json = serde_json::to_string(&point).expect("serialize");
        assert!(json.contains("\"offset_seconds\""), "got {}", json);
        let back: HistoryPoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, point);
    }

    #[test]
    fn test_history_window_serializes_as_array() {
        let window = vec![
            HistoryPoint {
                time: "2004-09-27T03:19:02.000000000Z".to_string(),
                offset_seconds: 1e-6,
            },
            HistoryPoint {
                time: "2004-09-27T03:19:04.000000000Z".to_string(),
                offset_seconds: 2e-6,
            },
        ];
        let json = serde_json::to_string(&window).expect("serialize");
        assert!(json.starts_with('['), "got {}", json);
        let back: Vec<HistoryPoint> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.len(), 2);
    }
}
