//! Output formatting for the critic CLI.
//!
//! Every command prints a serializable value, either as pretty JSON or as
//! one concise text line per record.

use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Machine-readable JSON
    Json,
    /// Concise text, one record per line
    #[default]
    Text,
}

#[derive(Debug, Clone, Default)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format data according to the configured output format
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
            OutputFormat::Text => {
                let json_value = serde_json::to_value(data)?;
                Ok(render_text(&json_value))
            }
        }
    }

    /// Format and print data to stdout
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn print<T: Serialize>(&self, data: &T) -> Result<()> {
        let output = self.format(data)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{output}")?;
        Ok(())
    }

    /// Print a list, or `empty_message` in text mode when there is nothing.
    ///
    /// JSON output wraps the array in `{"<collection_name>": [...], "count": n}`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn print_list<T: Serialize>(
        &self,
        data: &[T],
        empty_message: &str,
        collection_name: &str,
    ) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let mut envelope = serde_json::Map::new();
                envelope.insert(collection_name.to_string(), serde_json::to_value(data)?);
                envelope.insert("count".to_string(), serde_json::json!(data.len()));
                self.print(&serde_json::Value::Object(envelope))
            }
            OutputFormat::Text if data.is_empty() => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{empty_message}")?;
                Ok(())
            }
            OutputFormat::Text => self.print(&data),
        }
    }
}

/// Render a JSON value as concise text
fn render_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            // Id-like fields lead the line
            let id_keys = ["id", "review", "chain", "batch_id"];
            let mut parts: Vec<String> = id_keys
                .iter()
                .filter_map(|key| map.get(*key))
                .map(render_field_value)
                .collect();

            for (key, val) in map {
                if id_keys.contains(&key.as_str()) {
                    continue;
                }
                match val {
                    serde_json::Value::Array(arr) if arr.is_empty() => {}
                    serde_json::Value::Null => {}
                    _ => parts.push(format!("{key}:{}", render_field_value(val))),
                }
            }
            parts.join("  ")
        }
        serde_json::Value::Array(arr) => arr.iter().map(render_text).collect::<Vec<_>>().join("\n"),
        _ => render_field_value(value),
    }
}

fn render_field_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            if s.contains(' ') || s.contains('\n') {
                format!("\"{}\"", s.replace('\n', "\\n"))
            } else {
                s.clone()
            }
        }
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(render_field_value).collect();
            format!("[{}]", items.join(","))
        }
        serde_json::Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{k}:{}", render_field_value(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Progress {
        review: i64,
        summary: String,
        accepted: bool,
        head: Option<i64>,
        tags: Vec<String>,
    }

    fn sample() -> Progress {
        Progress {
            review: 7,
            summary: "Tidy parser".to_string(),
            accepted: false,
            head: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_formatter_json_output() {
        let output = Formatter::new(OutputFormat::Json).format(&sample()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["review"], 7);
        assert_eq!(parsed["summary"], "Tidy parser");
        assert!(parsed["head"].is_null());
    }

    #[test]
    fn test_formatter_text_puts_ids_first_and_skips_empty() {
        let output = Formatter::new(OutputFormat::Text).format(&sample()).unwrap();
        // serde_json maps iterate in key order.
        assert_eq!(output, "7  accepted:false  summary:\"Tidy parser\"");
    }

    #[test]
    fn test_text_renders_nested_values() {
        let value = serde_json::json!({
            "id": 3,
            "anchors": [{"commit": 4, "content_hash": null, "first_line": 1}],
        });
        assert_eq!(render_text(&value), "3  anchors:[{commit:4,first_line:1}]");
    }

    #[test]
    fn test_default_is_text() {
        assert_eq!(Formatter::default().format, OutputFormat::Text);
    }
}
