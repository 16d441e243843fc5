use std::path::Path;

/// Read whitelist entries from a plain-text file.
pub fn read_whitelist(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_whitelist(&text))
}

/// One entry per non-blank line.
///
/// Leading `#` characters are stripped but the line is kept, so `#general`
/// and `general` name the same channel. A `#` line is not a comment.
pub fn parse_whitelist(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.trim_start_matches('#').to_string())
        .collect()
}
