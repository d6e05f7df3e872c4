use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;

/// Parse one value per line, ignoring blank/comment lines. `what` names the values in errors.
fn parse_lines<T>(text: &str, what: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val = trimmed
            .parse::<T>()
            .with_context(|| format!("line {} is not {}: {}", idx + 1, what, trimmed))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no {} found", what);
    }
    Ok(out)
}

/// Parse newline-delimited floating point series.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    parse_lines(text, "numeric samples")
}

/// Parse newline-delimited sample indices (usize) into an Events-friendly list.
pub fn parse_event_indices(text: &str) -> Result<Vec<usize>> {
    parse_lines(text, "integer sample indices")
}

/// Read event indices from a file.
pub fn read_event_indices(path: &Path) -> Result<Vec<usize>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_event_indices(&text)
}

/// Parse a newline-delimited 0/1 heartbeat indicator train.
pub fn parse_indicator_train(text: &str) -> Result<Vec<u8>> {
    parse_lines(text, "indicator samples")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blank_lines() {
        let series = parse_f64_series("# rr\n0.8\n\n0.82 \n").unwrap();
        assert_eq!(series, vec![0.8, 0.82]);
    }

    #[test]
    fn rejects_non_numeric_lines() {
        let err = parse_event_indices("12\nabc\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_event_indices("-3\n").is_err());
    }

    #[test]
    fn indicator_train_keeps_raw_values() {
        assert_eq!(parse_indicator_train("0\n1\n1\n0\n").unwrap(), vec![0, 1, 1, 0]);
        // Range checking is left to IndicatorTrain::new.
        assert_eq!(parse_indicator_train("2\n").unwrap(), vec![2]);
        let err = parse_indicator_train("\n# none\n").unwrap_err();
        assert_eq!(err.to_string(), "no indicator samples found");
    }

    #[test]
    fn reads_indices_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.txt");
        std::fs::write(&path, "# beats\n100\n500\n").unwrap();
        assert_eq!(read_event_indices(&path).unwrap(), vec![100, 500]);
        assert!(read_event_indices(&dir.path().join("missing.txt")).is_err());
    }
}
