/// Progress scraping for transfer tool output.
///
/// Neither tool offers a structured progress channel, so percentages and
/// rates are pulled out of their human-oriented console lines. Lines
/// without a percentage are chatter and yield nothing.
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use storegame_shared::models::{ProgressUpdate, TransferRate};

/// `57%`, also `12.3%` (integer part kept).
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)(?:\.\d+)?%").unwrap()
});

/// aria2c readout `[#2089b0 400.0KiB/33.2MiB(12%) CN:10 ...]`.
static READOUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[#\w+\s.*?\((\d{1,3})(?:\.\d+)?%\)").unwrap()
});

/// aria2c summary `DL:1.2MiB`, or a generic `850KB/s` / `1.2 MiB/s`.
static RATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"DL:\s*(\d+(?:\.\d+)?)\s*([KMG]?)i?B\b|(\d+(?:\.\d+)?)\s?([KMG])i?B/s"
    ).unwrap()
});

/// Parse one line of tool output into a progress update.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let percent = parse_percent(line)?;
    Some(ProgressUpdate::downloading(percent, parse_rate(line)))
}

/// aria2c readout line only. Results rows and other chatter yield nothing,
/// even when a file name contains a percentage.
pub fn parse_readout_line(line: &str) -> Option<ProgressUpdate> {
    let percent: u8 = READOUT_RE.captures(line)?[1].parse().ok()?;
    if percent > 100 {
        return None;
    }
    Some(ProgressUpdate::downloading(percent, parse_rate(line)))
}

/// First plausible percentage on the line.
pub fn parse_percent(line: &str) -> Option<u8> {
    PERCENT_RE
        .captures_iter(line)
        .filter_map(|cap| cap[1].parse::<u32>().ok())
        .find(|p| *p <= 100)
        .map(|p| p as u8)
}

/// Transfer rate on the line, if any.
pub fn parse_rate(line: &str) -> Option<TransferRate> {
    let cap = RATE_RE.captures(line)?;
    let (value, unit) = rate_groups(&cap)?;
    let value: f64 = value.parse().ok()?;
    let multiplier = match unit {
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some(TransferRate {
        bytes_per_sec: (value * multiplier).round() as u64,
    })
}

fn rate_groups<'a>(cap: &Captures<'a>) -> Option<(&'a str, &'a str)> {
    if let (Some(value), Some(unit)) = (cap.get(1), cap.get(2)) {
        return Some((value.as_str(), unit.as_str()));
    }
    Some((cap.get(3)?.as_str(), cap.get(4)?.as_str()))
}
