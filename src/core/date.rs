use chrono::{Datelike, NaiveDate};

/// Parse a due date typed by the user.
///
/// Accepts `YYYY-MM-DD`, `MM/DD` and `MM-DD`. The short forms use `today`'s
/// year.
pub fn parse_due(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date);
    }
    for sep in ['/', '-'] {
        if let Some((m, d)) = input.split_once(sep) {
            let month: u32 = m.trim().parse().ok()?;
            let day: u32 = d.trim().parse().ok()?;
            return NaiveDate::from_ymd_opt(today.year(), month, day);
        }
    }
    None
}

/// Short display form (`11/15`), `-` when absent.
pub fn format_due(due: Option<NaiveDate>) -> String {
    match due {
        Some(d) => d.format("%m/%d").to_string(),
        None => "-".to_string(),
    }
}
