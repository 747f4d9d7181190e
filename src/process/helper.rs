//! Built-in search helper
//!
//! Run by the binary in `--search-helper` mode: reads text on stdin and
//! prints `N:line` for each matching 1-based line number, flushing each
//! match as it is found. Exit status: 0 if anything matched, 1 if nothing
//! did, 2 if the pattern is invalid or I/O failed.

use regex::Regex;
use std::io::{BufRead, Write};

pub const EXIT_MATCHED: i32 = 0;
pub const EXIT_NO_MATCH: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Scan `input` for `pattern`, writing matches to `output`
pub fn scan<R: BufRead, W: Write>(pattern: &str, input: R, mut output: W) -> i32 {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            eprintln!("invalid pattern: {}", e);
            return EXIT_ERROR;
        }
    };

    let mut matched = false;
    for (index, line) in input.split(b'\n').enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("read error: {}", e);
                return EXIT_ERROR;
            }
        };
        let text = String::from_utf8_lossy(&line);
        if regex.is_match(&text) {
            matched = true;
            if writeln!(output, "{}:{}", index + 1, text)
                .and_then(|_| output.flush())
                .is_err()
            {
                // Reader went away, nothing left to report to
                return EXIT_ERROR;
            }
        }
    }

    if matched {
        EXIT_MATCHED
    } else {
        EXIT_NO_MATCH
    }
}

/// Entry point for helper mode
pub fn run(pattern: &str) -> i32 {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    scan(pattern, stdin.lock(), stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_reports_one_based_lines() {
        let mut out = Vec::new();
        let code = scan("ERROR", &b"INFO a\nERROR b\nERROR c\n"[..], &mut out);
        assert_eq!(code, EXIT_MATCHED);
        assert_eq!(String::from_utf8(out).unwrap(), "2:ERROR b\n3:ERROR c\n");
    }

    #[test]
    fn test_scan_without_match() {
        let mut out = Vec::new();
        assert_eq!(scan("x", &b"a\nb"[..], &mut out), EXIT_NO_MATCH);
        assert!(out.is_empty());
    }

    #[test]
    fn test_scan_bad_pattern() {
        assert_eq!(scan("(", &b""[..], Vec::new()), EXIT_ERROR);
    }
}
