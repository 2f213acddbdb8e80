//! CLI argument parsing & help text: a hand-rolled
//! `argv` walk in the style of the teacher's `parse_args`/`print_help`, and of
//! `original_source/src/PtyNative/main.cpp`'s own hand-rolled parser. The wire
//! format here (`--cmd A;B`, raw pipe-handle integers) doesn't fit a
//! declarative derive-macro parser, and neither original this is grounded on
//! uses one.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::win32::RawHandle;

pub const DEFAULT_ROWS: u16 = 25;
pub const DEFAULT_COLS: u16 = 80;
const DEFAULT_LOG_LEVEL: u16 = 0;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum CliError {
    #[error("`{0}` requires a value")]
    MissingValue(&'static str),
    #[error("failed reading handle value from '{0}'")]
    InvalidHandle(String),
    #[error("invalid `--cmd`: {0}")]
    InvalidCmd(String),
    #[error("failed reading unsigned short value from '{0}'")]
    InvalidUshort(String),
    #[error("unknown argument `{0}`")]
    UnknownArgument(String),
    #[error("`--out` requires at least one of `--ins` and `--inr` to be specified also")]
    OutRequiresInput,
    #[error("shell executable name is missing")]
    MissingShell,
}

type Result<T> = std::result::Result<T, CliError>;

/// Everything a successful parse produces: either early help/version text, or
/// a fully-resolved set of bridge arguments ready to hand to [`crate::core`].
pub enum Action {
    Help,
    Version,
    Run(ParsedArgs),
}

/// Parsed and mode-resolved CLI arguments. `out.is_none()` is the
/// authoritative standalone/managed discriminant used throughout the crate.
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    pub rows: u16,
    pub cols: u16,
    pub dir: Option<PathBuf>,
    pub out: Option<RawHandle>,
    pub ins: Option<RawHandle>,
    pub inr: Option<RawHandle>,
    pub cmd: Option<(RawHandle, RawHandle)>,
    pub log_level: u16,
    pub syslog: bool,
    pub shell: Vec<String>,
}

impl ParsedArgs {
    pub fn standalone(&self) -> bool {
        self.out.is_none()
    }
}

pub fn print_help() {
    println!("Usage: <executable> [args] [-] <shell> [shell-args...]");
    println!();
    println!("Possible [args]:");
    println!("  --help         This help.");
    println!("  --version      Print version and exit.");
    println!("  --out <hout>   Output pipe handle. If specified, the process runs in");
    println!("                 \"managed mode\" (driven by another app); otherwise it runs");
    println!("                 in \"stand-alone\" mode. Requires at least one of `--ins`/`--inr`.");
    println!("  --ins <hins>   Input pipe handle, read as a plain byte stream. Ignored in");
    println!("                 stand-alone mode.");
    println!("  --inr <hinr>   Input-by-record pipe handle (20-byte INPUT_RECORDs: key,");
    println!("                 mouse, resize). Ignored in stand-alone mode.");
    println!("  --cmd A;B      Command channel: input handle A, output handle B, separated");
    println!("                 by exactly one `;`. Ignored in stand-alone mode.");
    println!("  --rows N       Terminal height in rows (default {DEFAULT_ROWS}; 0 = auto).");
    println!("  --cols N       Terminal width in columns (default {DEFAULT_COLS}; 0 = auto).");
    println!("  --dir P        Change working directory to P before exec; sets CHERE_INVOKING=1.");
    println!("  --log L        Minimum log level: 0=TRACE 1=DEBUG 2=INFO 3=WARN 4=ERROR.");
    println!("  --syslog       Mirror logs to the system debug stream (DebugView et al.).");
    println!();
    println!("  <shell>        Shell executable to launch.");
    println!("  [shell-args]   Arguments passed through to the shell unexamined.");
}

pub fn print_version() {
    println!("wincygbridge {VERSION}");
}

/// Parses `argv` (excluding `argv[0]`). Returns as soon as `--help`/
/// `--version` is seen; otherwise scans options until the first token that
/// doesn't start with `-` (the shell executable) or a literal `-` separator,
/// then treats everything remaining as the child's own argv.
pub fn parse(args: &[String]) -> Result<Action> {
    let mut rows = DEFAULT_ROWS;
    let mut cols = DEFAULT_COLS;
    let mut dir = None;
    let mut out = None;
    let mut ins = None;
    let mut inr = None;
    let mut cmd = None;
    let mut log_level = DEFAULT_LOG_LEVEL;
    let mut syslog = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg == "-" {
            i += 1;
            break;
        }
        if !arg.starts_with('-') {
            break;
        }
        i += 1;
        match arg {
            "--help" => return Ok(Action::Help),
            "--version" => return Ok(Action::Version),
            "--syslog" => syslog = true,
            "--out" => out = Some(parse_handle_value(take_value(args, &mut i, "--out")?)?),
            "--ins" => ins = Some(parse_handle_value(take_value(args, &mut i, "--ins")?)?),
            "--inr" => inr = Some(parse_handle_value(take_value(args, &mut i, "--inr")?)?),
            "--cmd" => cmd = Some(parse_cmd_value(take_value(args, &mut i, "--cmd")?)?),
            "--rows" => rows = parse_ushort_or_auto(take_value(args, &mut i, "--rows")?)?,
            "--cols" => cols = parse_ushort_or_auto(take_value(args, &mut i, "--cols")?)?,
            "--dir" => dir = Some(PathBuf::from(take_value(args, &mut i, "--dir")?)),
            "--log" => log_level = parse_ushort_or_auto(take_value(args, &mut i, "--log")?)?,
            other => return Err(CliError::UnknownArgument(other.to_string())),
        }
    }

    let shell: Vec<String> = args[i..].to_vec();
    if shell.is_empty() {
        return Err(CliError::MissingShell);
    }

    // Missing `--out` drops the managed-mode-only handles silently rather
    // than erroring, even if the caller supplied them: absence of `--out`
    // is what puts the process in stand-alone mode.
    if out.is_none() {
        ins = None;
        inr = None;
        cmd = None;
    } else if ins.is_none() && inr.is_none() {
        return Err(CliError::OutRequiresInput);
    }

    Ok(Action::Run(ParsedArgs {
        rows,
        cols,
        dir,
        out,
        ins,
        inr,
        cmd,
        log_level,
        syslog,
        shell,
    }))
}

/// Consumes the next token as an option's value. A missing token, or one
/// that itself looks like another option (`-`-prefixed), is an error -- this
/// mirrors the original's `argv[0][0] == '-'` guard.
fn take_value<'a>(args: &'a [String], i: &mut usize, option: &'static str) -> Result<&'a str> {
    if *i >= args.len() || args[*i].starts_with('-') {
        return Err(CliError::MissingValue(option));
    }
    let value = args[*i].as_str();
    *i += 1;
    Ok(value)
}

/// `strtol(value, &end, 0)`-style scan: optional sign, then a `0x`/`0X` hex
/// prefix, a legacy `0`-leading octal prefix, or plain decimal. Returns the
/// parsed value and how many bytes of `s` were consumed, so callers can
/// detect trailing garbage (`--cmd`'s `;` separator) themselves.
fn strtol_prefix(s: &str) -> Option<(i64, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }
    let (radix, prefix_len) = if bytes[i..].starts_with(b"0x") || bytes[i..].starts_with(b"0X") {
        (16u32, 2)
    } else if bytes.get(i) == Some(&b'0') && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        (8u32, 1)
    } else {
        (10u32, 0)
    };
    i += prefix_len;
    let digits_start = i;
    while i < bytes.len() && (bytes[i] as char).is_digit(radix) {
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    let mut value: i64 = i64::from_str_radix(&s[digits_start..i], radix).ok()?;
    if negative {
        value = -value;
    }
    Some((value, i))
}

fn parse_handle_value(s: &str) -> Result<RawHandle> {
    match strtol_prefix(s) {
        Some((value, consumed)) if consumed == s.len() && value >= 1 => Ok(value as RawHandle),
        _ => Err(CliError::InvalidHandle(s.to_string())),
    }
}

fn parse_cmd_value(s: &str) -> Result<(RawHandle, RawHandle)> {
    let (first, consumed) = strtol_prefix(s).ok_or_else(|| CliError::InvalidCmd(s.to_string()))?;
    if first < 1 || s.as_bytes().get(consumed) != Some(&b';') {
        return Err(CliError::InvalidCmd(s.to_string()));
    }
    let rest = &s[consumed + 1..];
    let (second, consumed2) =
        strtol_prefix(rest).ok_or_else(|| CliError::InvalidCmd(s.to_string()))?;
    if second < 1 || consumed2 != rest.len() {
        return Err(CliError::InvalidCmd(s.to_string()));
    }
    Ok((first as RawHandle, second as RawHandle))
}

/// `--rows`/`--cols`/`--log` share this shape: the literal string `"0"` is
/// special-cased to mean "auto"/TRACE before the general unsigned-short
/// parse, which otherwise requires a value of at least 1.
fn parse_ushort_or_auto(s: &str) -> Result<u16> {
    if s == "0" {
        return Ok(0);
    }
    match strtol_prefix(s) {
        Some((value, consumed)) if consumed == s.len() && (1..=i64::from(u16::MAX)).contains(&value) => {
            Ok(value as u16)
        }
        _ => Err(CliError::InvalidUshort(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn run(v: &[&str]) -> ParsedArgs {
        match parse(&args(v)).unwrap() {
            Action::Run(parsed) => parsed,
            _ => panic!("expected Action::Run"),
        }
    }

    #[test]
    fn missing_out_drops_every_other_managed_handle_silently() {
        let parsed = run(&["--ins", "5", "--inr", "6", "--cmd", "7;8", "bash"]);
        assert!(parsed.standalone());
        assert!(parsed.ins.is_none());
        assert!(parsed.inr.is_none());
        assert!(parsed.cmd.is_none());
    }

    #[test]
    fn out_without_any_input_handle_is_an_error() {
        let err = parse(&args(&["--out", "3", "bash"])).unwrap_err();
        assert!(matches!(err, CliError::OutRequiresInput));
    }

    #[test]
    fn managed_mode_wires_all_handles() {
        let parsed = run(&["--out", "3", "--ins", "4", "--cmd", "5;6", "bash", "-i"]);
        assert_eq!(parsed.out, Some(3));
        assert_eq!(parsed.ins, Some(4));
        assert_eq!(parsed.cmd, Some((5, 6)));
        assert_eq!(parsed.shell, vec!["bash".to_string(), "-i".to_string()]);
    }

    #[test]
    fn hex_handle_values_are_accepted() {
        let parsed = run(&["--out", "0x10", "--ins", "0x20", "bash"]);
        assert_eq!(parsed.out, Some(0x10));
        assert_eq!(parsed.ins, Some(0x20));
    }

    #[test]
    fn cmd_requires_exactly_one_semicolon_separated_pair() {
        assert!(matches!(
            parse(&args(&["--cmd", "5", "bash"])).unwrap_err(),
            CliError::InvalidCmd(_)
        ));
        assert!(matches!(
            parse(&args(&["--cmd", "5;6;7", "bash"])).unwrap_err(),
            CliError::InvalidCmd(_)
        ));
    }

    #[test]
    fn rows_cols_zero_mean_auto_without_erroring() {
        let parsed = run(&["--rows", "0", "--cols", "0", "bash"]);
        assert_eq!(parsed.rows, 0);
        assert_eq!(parsed.cols, 0);
    }

    #[test]
    fn rows_defaults_when_unspecified() {
        let parsed = run(&["bash"]);
        assert_eq!(parsed.rows, DEFAULT_ROWS);
        assert_eq!(parsed.cols, DEFAULT_COLS);
    }

    #[test]
    fn dash_separator_stops_option_scanning() {
        let parsed = run(&["--rows", "30", "-", "--not-an-option"]);
        assert_eq!(parsed.rows, 30);
        assert_eq!(parsed.shell, vec!["--not-an-option".to_string()]);
    }

    #[test]
    fn missing_shell_is_an_error() {
        assert!(matches!(
            parse(&args(&["--rows", "30"])).unwrap_err(),
            CliError::MissingShell
        ));
    }

    #[test]
    fn help_and_version_short_circuit_before_any_other_parsing() {
        assert!(matches!(parse(&args(&["--help"])).unwrap(), Action::Help));
        assert!(matches!(parse(&args(&["--version"])).unwrap(), Action::Version));
    }

    #[test]
    fn unknown_argument_is_rejected() {
        assert!(matches!(
            parse(&args(&["--bogus", "bash"])).unwrap_err(),
            CliError::UnknownArgument(_)
        ));
    }
}
