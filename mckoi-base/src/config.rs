// Config files are plain `key = value` text, comments begin with `#`. Two
// small grammars recur throughout: byte sizes (`16MB`) and time spans
// (`5 minutes 30 seconds`). Both are parsed once into normalized forms
// (bytes as u64, spans as milliseconds) so the rest of the system never
// re-parses a human-entered string.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{err_kind, ErrorKind};
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = match raw_line.find('#') {
                Some(i) => &raw_line[..i],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(err_kind(
                    ErrorKind::Config,
                    format!("line {}: expected `key = value`", lineno + 1),
                ));
            };
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Config { entries })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| err_kind(ErrorKind::Config, format!("reading config: {e}")))?;
        Self::parse(&text)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| err_kind(ErrorKind::Config, format!("missing required key `{key}`")))
    }

    pub fn get_bytes(&self, key: &str, default: u64) -> Result<u64> {
        match self.get_str(key) {
            None => Ok(default),
            Some("default") => Ok(default),
            Some(s) => parse_byte_size(s),
        }
    }

    pub fn get_duration_ms(&self, key: &str, default_ms: u64) -> Result<u64> {
        match self.get_str(key) {
            None => Ok(default_ms),
            Some(s) => parse_duration_ms(s),
        }
    }

    /// A comma-separated list, or `*` only where the caller explicitly allows
    /// it (the whitelist grammar). Most list-valued keys (e.g.
    /// `network_nodelist`) must enumerate: scenario S6 requires
    /// `network_nodelist=*` to be a config error.
    pub fn get_list(&self, key: &str, allow_star: bool) -> Result<Option<Vec<String>>> {
        match self.get_str(key) {
            None => Ok(None),
            Some("*") if allow_star => Ok(None),
            Some("*") => Err(err_kind(
                ErrorKind::Config,
                format!("key `{key}` must enumerate, not `*`"),
            )),
            Some(s) => Ok(Some(
                s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect(),
            )),
        }
    }
}

/// Optional integer followed by a unit `B|KB|MB|GB|TB` (case-insensitive).
/// A bare integer is bytes.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let bad = || err_kind(ErrorKind::Config, format!("invalid byte size `{s}`"));
    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(split_at);
    if num_part.is_empty() {
        return Err(bad());
    }
    let num: u64 = num_part.parse().map_err(|_| bad())?;
    let unit = unit_part.trim();
    let mult: u64 = if unit.is_empty() {
        1
    } else {
        match unit.to_ascii_uppercase().as_str() {
            "B" => 1,
            "KB" => 1024,
            "MB" => 1024 * 1024,
            "GB" => 1024 * 1024 * 1024,
            "TB" => 1024 * 1024 * 1024 * 1024,
            _ => return Err(bad()),
        }
    };
    num.checked_mul(mult).ok_or_else(bad)
}

/// Sum of terms `<decimal> (weeks|days|hours|minutes|seconds|ms)`.
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let bad = || err_kind(ErrorKind::Config, format!("invalid duration `{s}`"));
    let mut total: u64 = 0;
    let mut tokens = s.split_whitespace().peekable();
    if tokens.peek().is_none() {
        return Err(bad());
    }
    while let Some(num_tok) = tokens.next() {
        let num: f64 = num_tok.parse().map_err(|_| bad())?;
        let unit_tok = tokens.next().ok_or_else(bad)?;
        let per_unit_ms: f64 = match unit_tok {
            "weeks" | "week" => 7.0 * 24.0 * 3600.0 * 1000.0,
            "days" | "day" => 24.0 * 3600.0 * 1000.0,
            "hours" | "hour" => 3600.0 * 1000.0,
            "minutes" | "minute" => 60.0 * 1000.0,
            "seconds" | "second" => 1000.0,
            "ms" => 1.0,
            _ => return Err(bad()),
        };
        total = total.saturating_add((num * per_unit_ms).round() as u64);
    }
    Ok(total)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_byte_size_grammar() {
        assert_eq!(parse_byte_size("16MB").unwrap(), 16 * 1024 * 1024);
        assert_eq!(parse_byte_size("16mb").unwrap(), 16 * 1024 * 1024);
        assert_eq!(parse_byte_size("512").unwrap(), 512);
        assert_eq!(parse_byte_size("1TB").unwrap(), 1024 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("nope").is_err());
    }

    #[test]
    fn test_duration_grammar() {
        assert_eq!(parse_duration_ms("5 minutes 30 seconds").unwrap(), 330_000);
        assert_eq!(parse_duration_ms("120 ms").unwrap(), 120);
        assert!(parse_duration_ms("").is_err());
    }

    #[test]
    fn test_parse_and_lookup() {
        let cfg = Config::parse(
            "# a comment\n\
             network_password = hunter2\n\
             global_cache_size = 16MB\n\
             configcheck_timeout = 5 minutes 30 seconds\n",
        )
        .unwrap();
        assert_eq!(cfg.require_str("network_password").unwrap(), "hunter2");
        assert_eq!(cfg.get_bytes("global_cache_size", 0).unwrap(), 16 * 1024 * 1024);
        assert_eq!(cfg.get_duration_ms("configcheck_timeout", 0).unwrap(), 330_000);
        assert!(cfg.require_str("missing").is_err());
    }

    #[test]
    fn test_nodelist_star_rejected() {
        let cfg = Config::parse("network_nodelist = *\n").unwrap();
        let err = cfg.get_list("network_nodelist", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_whitelist_star_allowed() {
        let cfg = Config::parse("connect_whitelist = *\n").unwrap();
        assert_eq!(cfg.get_list("connect_whitelist", true).unwrap(), None);
    }
}
