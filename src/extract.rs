//! Plain-text samples from the history log.

use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Separator placed between messages in a written sample.
pub const SAMPLE_SEPARATOR: &str = "\n\n---\n\n";

/// Text of the first `limit` lines of a history log.
///
/// Lines that are not JSON still count toward `limit` and are skipped.
pub fn extract_texts(log_path: &Path, limit: usize) -> std::io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(log_path)?);
    let mut texts = Vec::new();

    for (i, line) in reader.lines().take(limit).enumerate() {
        let line = line?;
        match serde_json::from_str::<Value>(&line) {
            Ok(record) => texts.push(message_text(&record)),
            Err(e) => tracing::warn!(line = i + 1, error = %e, "Skipping bad JSON"),
        }
    }

    Ok(texts)
}

/// `text` followed by every plain text element of the message's rich text blocks.
pub fn message_text(record: &Value) -> String {
    let mut text = record
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let sections = record
        .get("blocks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|block| block["type"] == "rich_text")
        .flat_map(|block| elements(block))
        .filter(|element| element["type"] == "rich_text_section");

    for section in sections {
        for item in elements(section).filter(|item| item["type"] == "text") {
            if let Some(s) = item.get("text").and_then(Value::as_str) {
                text.push('\n');
                text.push_str(s);
            }
        }
    }

    text.trim().to_string()
}

fn elements(value: &Value) -> impl Iterator<Item = &Value> {
    value
        .get("elements")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Write the first `limit` texts of `input` to `output`. Returns how many were written.
pub fn write_sample(input: &Path, output: &Path, limit: usize) -> std::io::Result<usize> {
    let texts = extract_texts(input, limit)?;
    std::fs::write(output, texts.join(SAMPLE_SEPARATOR))?;
    Ok(texts.len())
}
