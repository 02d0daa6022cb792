//! Layered glftpd.conf resolution.
//!
//! The daemon's config format is line-oriented `key value` text with `#`
//! comments. Only two keys matter here: `ipc_key` (the shared memory key,
//! in any C integer base) and `max_users` (`<limit> <reserved>`, summed
//! into the record cap). An `include <path>` directive splices another
//! file's lines in at that position, recursively.
//!
//! Resolution flattens the whole (possibly recursive) traversal into an
//! ordered list of directives first, then folds it with last-write-wins
//! semantics, so the observable result is exactly "the last assignment in
//! textual order".

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Compiled-in config path, used when no `-r` override is given.
pub const DEFAULT_CONF: &str = "/etc/glftpd.conf";

/// glftpd's historical default IPC key.
const DEFAULT_IPC_KEY: i32 = 0x0000_DEAD;

/// Hard limit on `include` nesting. An include chain deeper than this is
/// almost certainly a cycle.
const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {message}")]
    BadValue { path: PathBuf, message: String },
    #[error("include depth exceeded at {path} (include cycle?)")]
    IncludeDepth { path: PathBuf },
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// SysV IPC key of the daemon's session table segment.
    pub segment_key: i32,
    /// Maximum number of record slots to consider.
    pub record_cap: usize,
    /// The primary config file this was resolved from.
    pub source_path: PathBuf,
}

/// One recognized assignment, in traversal order.
#[derive(Debug, Clone, PartialEq)]
enum Directive {
    IpcKey(i32),
    MaxUsers(usize),
}

/// Resolves the effective configuration.
///
/// With no override, failure to open the default path is tolerated and the
/// compiled-in defaults are used. An explicit path that cannot be read is
/// an error, as is any failure inside an included file.
pub fn resolve(override_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    let path = override_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONF));

    let mut directives = Vec::new();
    match fs::read_to_string(&path) {
        Ok(content) => flatten_lines(&path, &content, 0, &mut directives)?,
        Err(source) if override_path.is_none() => {
            tracing::debug!(
                "default config {} not readable ({}), using built-in defaults",
                path.display(),
                source
            );
        }
        Err(source) => return Err(ConfigError::Unreadable { path, source }),
    }

    let mut resolved = ResolvedConfig {
        segment_key: DEFAULT_IPC_KEY,
        record_cap: usize::MAX,
        source_path: path,
    };
    for directive in directives {
        match directive {
            Directive::IpcKey(key) => resolved.segment_key = key,
            Directive::MaxUsers(cap) => resolved.record_cap = cap,
        }
    }
    Ok(resolved)
}

/// Reads one file and appends its directives, recursing into includes at
/// their textual position.
fn flatten(path: &Path, depth: usize, out: &mut Vec<Directive>) -> Result<(), ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    flatten_lines(path, &content, depth, out)
}

fn flatten_lines(
    path: &Path,
    content: &str,
    depth: usize,
    out: &mut Vec<Directive>,
) -> Result<(), ConfigError> {
    for raw_line in content.lines() {
        let line = raw_line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, rest)) = line.split_once(|c: char| c.is_whitespace()) else {
            continue;
        };
        let value = rest.trim();
        if value.is_empty() {
            continue;
        }
        match key {
            "ipc_key" => {
                let key = parse_ipc_key(value).map_err(|message| ConfigError::BadValue {
                    path: path.to_path_buf(),
                    message,
                })?;
                out.push(Directive::IpcKey(key));
            }
            "max_users" => {
                let cap = parse_max_users(value).map_err(|message| ConfigError::BadValue {
                    path: path.to_path_buf(),
                    message,
                })?;
                out.push(Directive::MaxUsers(cap));
            }
            "include" => {
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(ConfigError::IncludeDepth {
                        path: path.to_path_buf(),
                    });
                }
                let target = resolve_include_path(path, value);
                flatten(&target, depth + 1, out)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Include paths are either absolute or relative to the including file.
fn resolve_include_path(including: &Path, value: &str) -> PathBuf {
    let target = Path::new(value);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        including
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(target)
    }
}

/// Parses an `ipc_key` value with `strtol(val, _, 0)` semantics: optional
/// sign, base auto-detection (`0x` hex, leading `0` octal, otherwise
/// decimal), and any trailing garbage ignored. Errors when no digits were
/// consumed or the value does not fit a signed 32-bit key.
fn parse_ipc_key(value: &str) -> Result<i32, String> {
    let s = value.trim_start();
    let (negative, s) = match s.strip_prefix(['-', '+']) {
        Some(rest) => (s.starts_with('-'), rest),
        None => (false, s),
    };
    let (radix, digits, prefix_consumed) =
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            // strtol treats a lone "0x" as the number 0 followed by "x".
            (16u32, hex, true)
        } else if s.starts_with('0') {
            (8, &s[1..], true)
        } else {
            (10, s, false)
        };

    let mut magnitude: i64 = 0;
    let mut consumed = 0usize;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        magnitude = magnitude
            .saturating_mul(i64::from(radix))
            .saturating_add(i64::from(d));
        consumed += 1;
    }

    if consumed == 0 && !prefix_consumed {
        return Err(format!(
            "failed to convert ipc_key value ({value}) to a number"
        ));
    }
    let parsed = if negative { -magnitude } else { magnitude };
    i32::try_from(parsed).map_err(|_| format!("ipc_key value ({value}) out of range"))
}

/// Parses a `max_users` value: two non-negative integers, summed.
fn parse_max_users(value: &str) -> Result<usize, String> {
    let mut fields = value.split_whitespace();
    let (Some(limit), Some(reserved)) = (fields.next(), fields.next()) else {
        return Err(format!("failed to convert max_users values ({value})"));
    };
    let limit: usize = limit
        .parse()
        .map_err(|_| format!("failed to convert max_users values ({value})"))?;
    let reserved: usize = reserved
        .parse()
        .map_err(|_| format!("failed to convert max_users values ({value})"))?;
    Ok(limit.saturating_add(reserved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_conf(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn last_assignment_wins() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(
            &dir,
            "glftpd.conf",
            "ipc_key 0x1000\nmax_users 10 2\nipc_key 0x2000\nmax_users 50 10\n",
        );
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 0x2000);
        assert_eq!(resolved.record_cap, 60);
    }

    #[test]
    fn max_users_sums_limit_and_reserved() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "max_users 50 10\n");
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.record_cap, 60);
    }

    #[test]
    fn comments_blanks_and_unknown_keys_are_ignored() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(
            &dir,
            "glftpd.conf",
            "# a comment\n\n   \nsitename FOO\nbind_ip 0.0.0.0\n  # indented comment\nipc_key 42\n",
        );
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 42);
        assert_eq!(resolved.record_cap, usize::MAX);
    }

    #[test]
    fn key_without_value_is_ignored() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "ipc_key\nipc_key   \nipc_key 7\n");
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 7);
    }

    #[test]
    fn ipc_key_accepts_decimal_octal_and_hex() {
        let dir = TempDir::new().unwrap();
        for (text, expected) in [("4096", 4096), ("0x1000", 0x1000), ("0755", 0o755), ("0", 0)] {
            let conf = write_conf(&dir, "glftpd.conf", &format!("ipc_key {text}\n"));
            let resolved = resolve(Some(&conf)).unwrap();
            assert_eq!(resolved.segment_key, expected, "value {text}");
        }
    }

    #[test]
    fn ipc_key_ignores_trailing_garbage_like_strtol() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "ipc_key 123abc\n");
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 123);
    }

    #[test]
    fn non_numeric_ipc_key_is_bad_value() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "ipc_key oops\n");
        let err = resolve(Some(&conf)).unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }), "{err}");
    }

    #[test]
    fn out_of_range_ipc_key_is_bad_value() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "ipc_key 0x80000000\n");
        let err = resolve(Some(&conf)).unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }), "{err}");
    }

    #[test]
    fn malformed_max_users_is_bad_value() {
        let dir = TempDir::new().unwrap();
        for text in ["fifty ten", "50", "-5 10"] {
            let conf = write_conf(&dir, "glftpd.conf", &format!("max_users {text}\n"));
            let err = resolve(Some(&conf)).unwrap_err();
            assert!(matches!(err, ConfigError::BadValue { .. }), "value {text}");
        }
    }

    #[test]
    fn include_splices_at_directive_position() {
        let dir = TempDir::new().unwrap();
        write_conf(&dir, "extra.conf", "ipc_key 0x2222\n");
        let conf = write_conf(
            &dir,
            "glftpd.conf",
            "ipc_key 0x1111\ninclude extra.conf\nmax_users 5 0\n",
        );
        // Set before the include, overridden inside it, untouched after.
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 0x2222);
        assert_eq!(resolved.record_cap, 5);
    }

    #[test]
    fn assignment_after_include_overrides_included_value() {
        let dir = TempDir::new().unwrap();
        write_conf(&dir, "extra.conf", "ipc_key 0x2222\n");
        let conf = write_conf(&dir, "glftpd.conf", "include extra.conf\nipc_key 0x3333\n");
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 0x3333);
    }

    #[test]
    fn nested_includes_resolve_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.conf"), "max_users 3 1\n").unwrap();
        fs::write(dir.path().join("sub/mid.conf"), "include inner.conf\n").unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "include sub/mid.conf\n");
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.record_cap, 4);
    }

    #[test]
    fn missing_include_fails_the_whole_chain() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "ipc_key 1\ninclude nowhere.conf\n");
        let err = resolve(Some(&conf)).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }), "{err}");
    }

    #[test]
    fn bad_value_inside_include_aborts_resolution() {
        let dir = TempDir::new().unwrap();
        write_conf(&dir, "extra.conf", "ipc_key bogus\n");
        let conf = write_conf(&dir, "glftpd.conf", "include extra.conf\n");
        let err = resolve(Some(&conf)).unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }), "{err}");
    }

    #[test]
    fn include_cycle_is_detected() {
        let dir = TempDir::new().unwrap();
        write_conf(&dir, "a.conf", "include b.conf\n");
        write_conf(&dir, "b.conf", "include a.conf\n");
        let conf = write_conf(&dir, "glftpd.conf", "include a.conf\n");
        let err = resolve(Some(&conf)).unwrap_err();
        assert!(matches!(err, ConfigError::IncludeDepth { .. }), "{err}");
    }

    #[test]
    fn missing_explicit_path_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let err = resolve(Some(&dir.path().join("nope.conf"))).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }), "{err}");
    }

    #[test]
    fn defaults_apply_when_config_sets_nothing() {
        let dir = TempDir::new().unwrap();
        let conf = write_conf(&dir, "glftpd.conf", "# nothing relevant\n");
        let resolved = resolve(Some(&conf)).unwrap();
        assert_eq!(resolved.segment_key, 0x0000_DEAD);
        assert_eq!(resolved.record_cap, usize::MAX);
        assert_eq!(resolved.source_path, conf);
    }
}
