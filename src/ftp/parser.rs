//! Parsing of `LIST` output.
//!
//! Two line grammars are understood:
//!
//! ```text
//! drwxr-xr-x   2 user group     4096 Mar 12 09:41 name
//! lrwxrwxrwx   1 user group        7 Mar 12  2019 link -> target
//! 03-12-24  09:41AM       <DIR>          name
//! 03-12-24  09:41AM                 1234 name
//! ```
//!
//! Lines matching neither grammar are skipped.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::cache::{Directory, Entry};
use crate::host::{S_IFDIR, S_IFLNK, S_IFREG};

/// An entry parsed out of a single listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub name: String,
    pub symlink: Option<String>,
    pub mode: u32,
    pub size: u64,
    pub nlink: u64,
    pub time: i64,
}

/// Splits off the next whitespace-delimited token, returning it and the rest
/// of the line starting at the separator that ended it
fn token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches([' ', '\t']);
    if s.is_empty() {
        return None;
    }
    let end = s.find([' ', '\t']).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let name = name.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}

fn unix_time(year: i32, month: u32, day: u32, time: NaiveTime) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(NaiveDateTime::new(date, time).and_utc().timestamp())
}

/// Places a date listed without a year into the current year, or the
/// previous one when that would put it more than a day into the future
fn recent_time(month: u32, day: u32, time: NaiveTime, now: NaiveDateTime) -> Option<i64> {
    let this_year = NaiveDate::from_ymd_opt(now.year(), month, day).map(|date| NaiveDateTime::new(date, time));
    match this_year {
        Some(stamp) if stamp <= now + Duration::days(1) => Some(stamp.and_utc().timestamp()),
        _ => unix_time(now.year() - 1, month, day, time),
    }
}

fn unix_mode(perms: &str) -> u32 {
    let mut mode = match perms.as_bytes().first() {
        Some(b'd') => S_IFDIR,
        Some(b'l') => S_IFLNK,
        _ => S_IFREG,
    };
    for (i, c) in perms.bytes().enumerate().skip(1).take(9) {
        if c != b'-' {
            mode |= 1 << (9 - i);
        }
    }
    mode
}

/// Parses a Unix `ls -l` style line
pub fn parse_unix_line(line: &str) -> Option<ParsedLine> {
    let (perms, rest) = token(line)?;
    if perms.len() < 10 {
        return None;
    }

    let (second, after_second) = token(rest)?;
    // the link count column is optional
    let (nlink, user_rest) = match second.parse::<u64>() {
        Ok(nlink) => (nlink, after_second),
        Err(_) => (1, rest),
    };
    let (_user, rest) = token(user_rest)?;
    let (_group, rest) = token(rest)?;
    let (size, rest) = token(rest)?;
    let size = size.parse::<u64>().ok()?;
    let (month, rest) = token(rest)?;
    let month = month_number(month)?;
    let (day, rest) = token(rest)?;
    let day = day.parse::<u32>().ok()?;
    let (year_or_time, rest) = token(rest)?;

    // exactly one separator precedes the name, further spaces belong to it
    let name_field = rest.get(1..).filter(|n| !n.is_empty())?;

    let time = if let Some((hh, mm)) = year_or_time.split_once(':') {
        let time = NaiveTime::from_hms_opt(hh.parse().ok()?, mm.parse().ok()?, 0)?;
        recent_time(month, day, time, Utc::now().naive_utc())?
    } else {
        unix_time(year_or_time.parse().ok()?, month, day, NaiveTime::from_hms_opt(0, 0, 0)?)?
    };

    let (name, symlink) = match name_field.split_once(" -> ") {
        Some((name, target)) => (name, Some(target.to_owned())),
        None => (name_field, None),
    };
    if name.is_empty() {
        return None;
    }

    Some(ParsedLine {
        name: name.to_owned(),
        symlink,
        mode: unix_mode(perms),
        size,
        nlink,
        time,
    })
}

/// Parses a DOS/Windows `dir` style line
pub fn parse_windows_line(line: &str) -> Option<ParsedLine> {
    let (date, rest) = token(line)?;
    let (time, rest) = token(rest)?;
    let (size, rest) = token(rest)?;
    let name = rest.trim_start_matches([' ', '\t']);
    if name.is_empty() {
        return None;
    }

    let date = NaiveDate::parse_from_str(date, "%m-%d-%y").ok()?;
    let time = NaiveTime::parse_from_str(time, "%I:%M%p").ok()?;
    let time = NaiveDateTime::new(date, time).and_utc().timestamp();

    let (mode, size) = if size == "<DIR>" {
        (S_IFDIR, 0)
    } else {
        (S_IFREG, size.parse().ok()?)
    };

    Some(ParsedLine {
        name: name.to_owned(),
        symlink: None,
        mode,
        size,
        nlink: 1,
        time,
    })
}

pub fn parse_line(line: &str) -> Option<ParsedLine> {
    parse_unix_line(line).or_else(|| parse_windows_line(line))
}

/// Parses a whole `LIST` response into a directory snapshot, leaving out
/// `.` and `..`
pub fn parse_listing(data: &str) -> Directory {
    let mut directory = Directory::default();

    for line in data.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Some(parsed) if parsed.name.is_empty() || parsed.name == "." || parsed.name == ".." => {}
            Some(parsed) => directory.entries.push(Entry {
                name: parsed.name,
                size: parsed.size,
                time: parsed.time,
                mode: parsed.mode,
                dirty: false,
            }),
            None => warn!("failed to parse listing line: {line}"),
        }
    }

    directory
}
