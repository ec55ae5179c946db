use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "R"),
            AccessKind::Write => write!(f, "W"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceAccess {
    pub kind: AccessKind,
    pub address: u64,
}

#[derive(Debug, Clone)]
pub struct TraceFile {
    pub name: String,
    pub entries: Vec<TraceAccess>,
}

impl TraceFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening trace file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!("reading line {} of {}", line_no + 1, path.display())
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let op = parts
                .next()
                .with_context(|| format!("{}:{}: missing access kind", path.display(), line_no + 1))?;
            let addr = parts
                .next()
                .with_context(|| format!("{}:{}: missing address", path.display(), line_no + 1))?;
            let kind = match op.to_ascii_lowercase().chars().next().unwrap_or('r') {
                'r' => AccessKind::Read,
                'w' => AccessKind::Write,
                _ => AccessKind::Read,
            };
            let address = parse_address(addr)
                .with_context(|| format!("{}:{}: invalid address {addr:?}", path.display(), line_no + 1))?;
            entries.push(TraceAccess { kind, address });
        }
        Ok(Self {
            name: path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            entries,
        })
    }
}

fn parse_address(token: &str) -> Result<u64> {
    let token = token.trim();
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).context("parsing hex address");
    }
    if let Some(bin) = token
        .strip_prefix("0b")
        .or_else(|| token.strip_prefix("0B"))
    {
        return u64::from_str_radix(bin, 2).context("parsing binary address");
    }
    if let Some(oct) = token
        .strip_prefix("0o")
        .or_else(|| token.strip_prefix("0O"))
    {
        return u64::from_str_radix(oct, 8).context("parsing octal address");
    }
    if let Ok(value) = u64::from_str_radix(token, 10) {
        return Ok(value);
    }
    if let Ok(value) = u64::from_str_radix(token, 16) {
        return Ok(value);
    }
    bail!("address token {token:?} is neither valid hex nor decimal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_trace(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn parses_hex_and_decimal_addresses() {
        let file = write_trace("r 0x10\nw 32\n# comment\n\nr 0b101\n");
        let trace = TraceFile::load(file.path()).unwrap();
        assert_eq!(trace.entries.len(), 3);
        assert_eq!(trace.entries[0].address, 0x10);
        assert_eq!(trace.entries[0].kind, AccessKind::Read);
        assert_eq!(trace.entries[1].address, 32);
        assert_eq!(trace.entries[1].kind, AccessKind::Write);
        assert_eq!(trace.entries[2].address, 0b101);
    }

    #[test]
    fn missing_file_is_an_error_not_a_panic() {
        let result = TraceFile::load("/nonexistent/path/to/trace.trace");
        assert!(result.is_err());
    }

    #[test]
    fn malformed_line_is_an_error_not_a_panic() {
        let file = write_trace("r\n");
        let result = TraceFile::load(file.path());
        assert!(result.is_err());
    }
}
