//! LIST response parser.
//!
//! Supports two formats:
//! 1. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 2. **Windows/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//!
//! Lines that match neither (the `total 12` header, blanks) are skipped,
//! as are the `.` and `..` entries. MLSD output goes through
//! [`crate::ftp::metadata::parse_mlst`] instead.

use crate::ftp::types::FileRecord;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-])([rwxsStT-]{9})[.+@]?\s+  # type + permissions
        \d+\s+                                # link count
        \S+\s+                                # owner
        \S+\s+                                # group
        (\d+)\s+                              # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s           # date
        (.+)$                                 # name (possibly with -> target)
        "
    )
    .expect("valid unix LIST regex");
    static ref WINDOWS_LINE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+             # date
        (\d{1,2}:\d{2}(?:AM|PM)?)\s+          # time
        (<DIR>|\d+)\s+                        # size or <DIR>
        (.+)$                                 # name
        "
    )
    .expect("valid windows LIST regex");
}

/// Parse a full LIST response body.
pub fn parse_listing(raw: &str) -> Vec<(String, FileRecord)> {
    raw.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_line)
        .filter(|(name, _)| name != "." && name != "..")
        .collect()
}

/// Parse a single LIST line.
pub fn parse_line(line: &str) -> Option<(String, FileRecord)> {
    parse_unix(line).or_else(|| parse_windows(line.trim()))
}

// ─── Unix-style parser ───────────────────────────────────────────────

fn parse_unix(line: &str) -> Option<(String, FileRecord)> {
    let caps = UNIX_LINE.captures(line)?;

    let kind = caps.get(1)?.as_str();
    let perms = caps.get(2)?.as_str();
    let size = caps.get(3)?.as_str().parse::<u64>().ok()?;
    let date = caps.get(4)?.as_str();
    let name_raw = caps.get(5)?.as_str().trim_start();

    let is_symlink = kind == "l";
    let name = match name_raw.find(" -> ") {
        Some(pos) if is_symlink => &name_raw[..pos],
        _ => name_raw,
    };

    let record = FileRecord {
        is_file: kind == "-",
        is_directory: kind == "d",
        is_symlink,
        size,
        mtime: parse_unix_date(date),
        permissions: Some(format!("{}{}", kind, perms)),
        unix_mode: Some(mode_from_symbolic(perms)),
        ..FileRecord::default()
    };
    Some((name.to_string(), record))
}

/// `rwxr-xr-x` → `0o755`, including setuid/setgid/sticky.
fn mode_from_symbolic(perms: &str) -> u32 {
    let b = perms.as_bytes();
    let mut mode = 0u32;
    for (i, chunk) in b.chunks(3).take(3).enumerate() {
        let shift = 6 - 3 * i as u32;
        if chunk.first() == Some(&b'r') {
            mode |= 4 << shift;
        }
        if chunk.get(1) == Some(&b'w') {
            mode |= 2 << shift;
        }
        match chunk.get(2) {
            Some(b'x') => mode |= 1 << shift,
            Some(b's') | Some(b't') => mode |= (1 << shift) | special_bit(i),
            Some(b'S') | Some(b'T') => mode |= special_bit(i),
            _ => {}
        }
    }
    mode
}

fn special_bit(group: usize) -> u32 {
    match group {
        0 => 0o4000,
        1 => 0o2000,
        _ => 0o1000,
    }
}

/// Parse the date portion: `Jan  1 12:00` (current year) or `Jan  1  2025`.
fn parse_unix_date(s: &str) -> Option<DateTime<Local>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalised.contains(':') {
        let with_year = format!("{} {}", Local::now().year(), normalised);
        let dt = NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M").ok()?;
        return Local.from_local_datetime(&dt).earliest();
    }

    let date = NaiveDate::parse_from_str(&normalised, "%b %d %Y").ok()?;
    let dt = date.and_time(NaiveTime::MIN);
    Local.from_local_datetime(&dt).earliest()
}

// ─── Windows-style parser ────────────────────────────────────────────

fn parse_windows(line: &str) -> Option<(String, FileRecord)> {
    let caps = WINDOWS_LINE.captures(line)?;

    let date = caps.get(1)?.as_str();
    let time = caps.get(2)?.as_str();
    let size_or_dir = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str().to_string();

    let mut record = if size_or_dir == "<DIR>" {
        FileRecord::directory()
    } else {
        FileRecord {
            size: size_or_dir.parse().ok()?,
            ..FileRecord::default()
        }
    };
    record.mtime = parse_windows_date(date, time);
    Some((name, record))
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Local>> {
    let combined = format!("{} {}", date, time);
    let dt = ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())?;
    Local.from_local_datetime(&dt).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn unix_file() {
        let entries = parse_listing("-rw-r--r--   1 user group  1234 Jan  1 12:00 readme.txt");
        assert_eq!(entries.len(), 1);
        let (name, rec) = &entries[0];
        assert_eq!(name, "readme.txt");
        assert!(rec.is_file);
        assert_eq!(rec.size, 1234);
        assert_eq!(rec.unix_mode, Some(0o644));
        assert_eq!(rec.permissions.as_deref(), Some("-rw-r--r--"));
        let mtime = rec.mtime.expect("mtime");
        assert_eq!((mtime.month(), mtime.day(), mtime.hour()), (1, 1, 12));
    }

    #[test]
    fn unix_dir_with_year() {
        let entries = parse_listing("drwxr-xr-x   2 root root  4096 Mar  1  2025 sub dir");
        let (name, rec) = &entries[0];
        assert_eq!(name, "sub dir");
        assert!(rec.is_directory);
        assert!(!rec.is_file);
        assert_eq!(rec.unix_mode, Some(0o755));
        assert_eq!(rec.mtime.map(|t| t.year()), Some(2025));
    }

    #[test]
    fn unix_symlink() {
        let entries = parse_listing("lrwxrwxrwx   1 root root    22 Jan  5 08:00 link -> /var/target");
        let (name, rec) = &entries[0];
        assert_eq!(name, "link");
        assert!(rec.is_symlink);
        assert!(!rec.is_file);
    }

    #[test]
    fn special_bits() {
        assert_eq!(mode_from_symbolic("rwsr-xr-x"), 0o4755);
        assert_eq!(mode_from_symbolic("rwxrwxrwt"), 0o1777);
        assert_eq!(mode_from_symbolic("rw-r-Sr--"), 0o2644);
    }

    #[test]
    fn skips_header_and_dot_entries() {
        let raw = "total 8\r\n\
                   drwxr-xr-x 2 u g 4096 Jan  1 12:00 .\r\n\
                   drwxr-xr-x 2 u g 4096 Jan  1 12:00 ..\r\n\
                   -rw-r--r-- 1 u g   10 Jan  1 12:00 real.txt\r\n";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "real.txt");
    }

    #[test]
    fn windows_entries() {
        let raw = "01-01-26  12:00AM      <DIR> My Documents\r\n02-03-26  01:30PM       1234 notes.txt";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "My Documents");
        assert!(entries[0].1.is_directory);
        assert_eq!(entries[1].0, "notes.txt");
        assert_eq!(entries[1].1.size, 1234);
        let mtime = entries[1].1.mtime.expect("mtime");
        assert_eq!((mtime.year(), mtime.month(), mtime.hour(), mtime.minute()), (2026, 2, 13, 30));
    }
}
