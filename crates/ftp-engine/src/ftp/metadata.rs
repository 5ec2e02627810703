//! MLST fact strings and MDTM timestamps (RFC 3659).
//!
//! ```text
//! type=file;size=42;modify=20240101000000; report.txt
//! ```

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FileRecord;
use chrono::{DateTime, Local, NaiveDate, TimeZone};

/// Decode one MLST / MLSD line into `(name, record)`.
///
/// The name is everything after the final `;` (one leading space removed).
/// Unknown facts are ignored; a known numeric or time fact that does not
/// parse is an error.
pub fn parse_mlst(line: &str) -> FtpResult<(String, FileRecord)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = match line.rfind(';') {
        Some(pos) => (&line[..pos], &line[pos + 1..]),
        None => ("", line),
    };
    let name = name.strip_prefix(' ').unwrap_or(name).to_string();

    let mut record = FileRecord::default();
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "type" => apply_type(&mut record, value),
            "size" => record.size = parse_int(key, value)?,
            "modify" => record.mtime = Some(parse_mdtm(value)?),
            "create" => record.ctime = Some(parse_mdtm(value)?),
            "perm" => record.permissions = Some(value.to_string()),
            "lang" => record.language = Some(value.to_string()),
            "media-type" => record.media_type = Some(value.to_string()),
            "charset" => record.charset = Some(value.to_string()),
            "unix.mode" => {
                let mode = u32::from_str_radix(value.trim(), 8).map_err(|_| {
                    FtpError::malformed(format!("Invalid unix.mode fact '{}'", value))
                })?;
                record.unix_mode = Some(mode);
            }
            "unix.uid" => record.unix_uid = Some(parse_int(key, value)?),
            "unix.gid" => record.unix_gid = Some(parse_int(key, value)?),
            _ => {}
        }
    }

    Ok((name, record))
}

fn apply_type(record: &mut FileRecord, value: &str) {
    let lower = value.to_ascii_lowercase();
    let (is_file, is_dir) = match lower.as_str() {
        "file" => (true, false),
        "dir" | "cdir" | "pdir" => (false, true),
        _ => (false, false),
    };
    record.is_file = is_file;
    record.is_directory = is_dir;
    // OS.unix=slink:/target or OS.unix=symlink
    record.is_symlink = lower.starts_with("os.unix=slink") || lower.starts_with("os.unix=symlink");
    record.fact_type = Some(value.to_string());
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> FtpResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FtpError::malformed(format!("Invalid {} fact '{}'", key, value)))
}

/// Parse `YYYYMMDDHHMMSS[.fff]` as a local date/time.
pub fn parse_mdtm(raw: &str) -> FtpResult<DateTime<Local>> {
    let raw = raw.trim();
    let bad = || FtpError::malformed(format!("Invalid MDTM timestamp '{}'", raw));

    let (whole, fraction) = match raw.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (raw, None),
    };
    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let field = |range: std::ops::Range<usize>| -> u32 {
        whole[range]
            .bytes()
            .fold(0, |acc, d| acc * 10 + u32::from(d - b'0'))
    };

    let nanos = match fraction {
        None => 0,
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => {
            // Scale to nanoseconds; digits past the ninth are dropped.
            let digits: String = f.chars().chain(std::iter::repeat('0')).take(9).collect();
            digits.parse::<u32>().map_err(|_| bad())?
        }
        Some(_) => return Err(bad()),
    };

    let naive = NaiveDate::from_ymd_opt(field(0..4) as i32, field(4..6), field(6..8))
        .and_then(|d| d.and_hms_nano_opt(field(8..10), field(10..12), field(12..14), nanos))
        .ok_or_else(bad)?;

    Local.from_local_datetime(&naive).earliest().ok_or_else(bad)
}
