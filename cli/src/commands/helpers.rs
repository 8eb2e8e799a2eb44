use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, TimeDelta};

use rollin_core::models::{DATE_FORMAT, DayKey};
use rollin_core::sync::Reversion;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<DayKey> {
    let today = Local::now().date_naive();
    let date = match date_str.as_deref() {
        None | Some("today") => today,
        Some("yesterday") => today - TimeDelta::days(1),
        Some("tomorrow") => today + TimeDelta::days(1),
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| {
            format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
        })?,
    };
    Ok(DayKey::new(date))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// Tell the user which edits did not stick and what they are back to.
pub(crate) fn report_reversions(reversions: &[Reversion]) {
    for r in reversions {
        let restored = r
            .restored
            .map_or_else(|| "its default".to_string(), |v| v.to_string());
        eprintln!(
            "Could not save {} = {} for {}: {}. Reverted to {restored}.",
            r.field.field, r.attempted, r.field.entity, r.reason
        );
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub(crate) fn bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(width - filled.min(width)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_keywords() {
        let today = DayKey::today();
        assert_eq!(parse_date(None).unwrap(), today);
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(parse_date(Some("yesterday".to_string())).unwrap(), today.pred());
        assert_eq!(
            parse_date(Some("2024-02-29".to_string())).unwrap().to_string(),
            "2024-02-29"
        );
        assert!(parse_date(Some("2023-02-29".to_string())).is_err());
        assert!(parse_date(Some("last week".to_string())).is_err());
    }

    #[test]
    fn test_bar() {
        assert_eq!(bar(50.0, 10), "#####.....");
        assert_eq!(bar(0.0, 4), "....");
        assert_eq!(bar(130.0, 4), "####");
    }
}
