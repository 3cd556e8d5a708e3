use chrono::NaiveDateTime;
use log::warn;
use num_format::{Locale, ToFormattedString};

use crate::{Indicator, RegistrationLookup, RiskSignal};

/// Format of creation dates given as text
pub(crate) const CREATION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Registration creation date as reported by a WHOIS resolver
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CreationDate {
    /// One timestamp
    Single(NaiveDateTime),
    /// Several timestamps, the first one wins
    Many(Vec<NaiveDateTime>),
    /// Unparsed text in `YYYY-MM-DD HH:MM:SS`
    Text(String),
    /// Record has no creation date
    Missing,
}

impl CreationDate {
    /// Resolve to a single timestamp, if any
    ///
    /// ```
    /// # use antiphish::CreationDate;
    /// let date = CreationDate::Text("2020-01-02 03:04:05".to_string());
    /// assert!(date.resolve().is_some());
    /// assert!(CreationDate::Missing.resolve().is_none());
    /// ```
    pub fn resolve(&self) -> Option<NaiveDateTime> {
        match self {
            CreationDate::Single(d) => Some(*d),
            CreationDate::Many(ds) => ds.first().copied(),
            CreationDate::Text(s) => NaiveDateTime::parse_from_str(s.trim(), CREATION_DATE_FORMAT).ok(),
            CreationDate::Missing => None,
        }
    }
}

/// Classify domain age. `now` is naive UTC, like the creation date.
pub fn classify_age(creation_date: &CreationDate, now: NaiveDateTime) -> RiskSignal {
    let created = match creation_date.resolve() {
        Some(d) => d,
        None => return RiskSignal::new("Age not found", Indicator::NotFound),
    };

    let days = (now - created).num_days();
    let formatted = days.to_formatted_string(&Locale::en);
    if days <= 30 {
        RiskSignal::new(
            format!("Very suspicious: domain registered {formatted} days ago"),
            Indicator::Danger,
        )
    } else if days < 365 {
        RiskSignal::new(
            format!("Suspicious: domain registered {formatted} days ago"),
            Indicator::Warning,
        )
    } else {
        RiskSignal::new(
            format!("Likely safe: domain registered {formatted} days ago"),
            Indicator::Safe,
        )
    }
}

/// Ask the resolver for the creation date and classify it. Resolver failures
/// degrade to "Age not found".
pub async fn age_signal(
    registry: &dyn RegistrationLookup,
    hostname: &str,
    now: NaiveDateTime,
) -> RiskSignal {
    match registry.creation_date(hostname).await {
        Ok(creation_date) => classify_age(&creation_date, now),
        Err(e) => {
            warn!("failed to resolve creation date of {hostname}: {e}");
            RiskSignal::new("Age not found", Indicator::Danger)
        }
    }
}
