use std::fmt::Write;

use anyhow::{Context, Result};
use vextr::{DmStr, DmVector, SmStr};

/// Line storage with room for typical short lines.
type Line = SmStr<24>;

/// Reads `path`, stores each line in a [`Line`] and describes where the text ended up.
pub fn run(path: &str) -> Result<String> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;

    let mut lines: DmVector<Line> = DmVector::new();
    for line in text.lines() {
        let mut s = Line::new();
        s.push_str(line)?;
        lines.push(s)?;
    }

    let inline = lines.iter().filter(|l| l.is_inline()).count();
    let longest = lines.iter().map(|l| l.len()).max().unwrap_or(0);

    let mut report = DmStr::new();
    writeln!(report, "{} lines, {inline} inline, longest {longest} bytes", lines.len())?;
    if let Some(first) = lines.first_mut() {
        let c = first.c_str()?;
        writeln!(report, "first line as C string: {} bytes", c.to_bytes().len())?;
    }
    Ok(report.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::run;

    #[test]
    fn test_strings_report() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "short").unwrap();
        writeln!(file, "a line that is certainly longer than the buffer").unwrap();
        writeln!(file, "tiny").unwrap();
        file.flush().unwrap();

        let report = run(file.path().to_str().unwrap()).unwrap();
        assert!(report.starts_with("3 lines, 2 inline, longest 47 bytes"));
        assert!(report.contains("first line as C string: 5 bytes"));
    }

    #[test]
    fn test_missing_file() {
        let err = run("/nonexistent/vextr-cmd-input").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
