//! Streaming output of query results as JSON, JSON Lines or CSV.
//!
//! Rows are written as they arrive so a large query never has to be held in
//! memory. JSON output is still a single well-formed array.

use serde::Serialize;
use std::io::{self, Write};

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON array
    Json,
    /// One JSON object per line (newline-delimited JSON)
    JsonLines,
    /// Header row plus one record per row
    Csv,
}

impl OutputFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "jsonlines" | "ndjson" => Some(Self::JsonLines),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

enum Sink<W: Write> {
    Json { writer: W, pretty: bool },
    Lines(W),
    Csv(csv::Writer<W>),
}

/// Writes rows one at a time in the chosen format.
///
/// Call [`finish`](Self::finish) once all rows are written; for JSON it
/// closes the array.
pub struct OutputWriter<W: Write> {
    sink: Sink<W>,
    items_written: usize,
}

impl<W: Write> OutputWriter<W> {
    /// `pretty` only affects JSON output.
    pub fn new(writer: W, format: OutputFormat, pretty: bool) -> Self {
        let sink = match format {
            OutputFormat::Json => Sink::Json { writer, pretty },
            OutputFormat::JsonLines => Sink::Lines(writer),
            OutputFormat::Csv => Sink::Csv(csv::Writer::from_writer(writer)),
        };
        Self {
            sink,
            items_written: 0,
        }
    }

    /// Write one row.
    pub fn write<T: Serialize>(&mut self, item: &T) -> io::Result<()> {
        let first = self.items_written == 0;
        match &mut self.sink {
            Sink::Json { writer, pretty } => {
                writer.write_all(if first { b"[" } else { b"," })?;
                if *pretty {
                    writer.write_all(b"\n  ")?;
                    serde_json::to_writer(&mut *writer, item).map_err(io::Error::other)?;
                } else {
                    serde_json::to_writer(&mut *writer, item).map_err(io::Error::other)?;
                }
            }
            Sink::Lines(writer) => {
                serde_json::to_writer(&mut *writer, item).map_err(io::Error::other)?;
                writeln!(writer)?;
            }
            Sink::Csv(writer) => {
                writer.serialize(item).map_err(io::Error::other)?;
            }
        }
        self.items_written += 1;
        Ok(())
    }

    /// Write every row an iterator yields, stopping at the first error.
    pub fn write_iter<T, E, I>(&mut self, items: I) -> Result<usize, E>
    where
        T: Serialize,
        I: IntoIterator<Item = Result<T, E>>,
        E: From<io::Error>,
    {
        let before = self.items_written;
        for item in items {
            self.write(&item?)?;
        }
        Ok(self.items_written - before)
    }

    /// Get the number of items written.
    pub fn items_written(&self) -> usize {
        self.items_written
    }

    /// Close the output and flush it.
    pub fn finish(mut self) -> io::Result<W> {
        match &mut self.sink {
            Sink::Json { writer, pretty } => {
                if self.items_written == 0 {
                    writer.write_all(b"[")?;
                }
                if *pretty && self.items_written > 0 {
                    writer.write_all(b"\n")?;
                }
                writer.write_all(b"]\n")?;
                writer.flush()?;
            }
            Sink::Lines(writer) => writer.flush()?,
            Sink::Csv(writer) => writer.flush()?,
        }
        match self.sink {
            Sink::Json { writer, .. } | Sink::Lines(writer) => Ok(writer),
            Sink::Csv(writer) => writer.into_inner().map_err(|e| e.into_error()),
        }
    }
}

/// Serialize an item to a JSON string.
pub fn to_json<T: Serialize>(item: &T, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(item)
    } else {
        serde_json::to_string(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fingerprint, TagResult};
    use chrono::{TimeZone, Utc};

    fn row(label: &str, score: f32) -> TagResult {
        TagResult {
            media_fingerprint: Fingerprint::new("f00d"),
            label: label.to_string(),
            score,
            model_identity: "wd-swinv2-tagger-v3".to_string(),
            tagged_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn render(format: OutputFormat, pretty: bool, rows: &[TagResult]) -> String {
        let mut writer = OutputWriter::new(Vec::new(), format, pretty);
        for r in rows {
            writer.write(r).unwrap();
        }
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_json_is_one_array() {
        let output = render(OutputFormat::Json, false, &[row("cat", 0.7), row("dog", 0.5)]);
        let parsed: Vec<TagResult> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].label, "dog");
    }

    #[test]
    fn test_pretty_json_parses() {
        let output = render(OutputFormat::Json, true, &[row("cat", 0.7)]);
        let parsed: Vec<TagResult> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0].media_fingerprint.as_str(), "f00d");
    }

    #[test]
    fn test_empty_json_is_empty_array() {
        let output = render(OutputFormat::Json, false, &[]);
        assert_eq!(output.trim(), "[]");
    }

    #[test]
    fn test_jsonl_one_row_per_line() {
        let output = render(OutputFormat::JsonLines, false, &[row("a", 0.9), row("b", 0.8)]);
        let lines: Vec<&str> = output.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"label\":\"a\""));
    }

    #[test]
    fn test_csv_has_header() {
        let output = render(OutputFormat::Csv, false, &[row("cat", 0.5)]);
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("media_fingerprint,label,score,model_identity,tagged_at")
        );
        assert!(lines.next().unwrap().starts_with("f00d,cat,0.5,"));
    }

    #[test]
    fn test_write_iter_stops_at_error() {
        let rows: Vec<Result<TagResult, io::Error>> = vec![
            Ok(row("a", 0.9)),
            Err(io::Error::other("store went away")),
            Ok(row("b", 0.8)),
        ];
        let mut writer = OutputWriter::new(Vec::new(), OutputFormat::JsonLines, false);
        assert!(writer.write_iter(rows).is_err());
        assert_eq!(writer.items_written(), 1);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("JSONL"), Some(OutputFormat::JsonLines));
        assert_eq!(OutputFormat::parse("csv"), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::parse("invalid"), None);
    }
}
