use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};

/// `HH:MM AM/PM` for messages from the same calendar day as `now`,
/// `Mon D` otherwise. The day boundary is taken in `now`'s time zone.
pub fn format_timestamp<Tz>(created_at: DateTime<Utc>, now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = created_at.with_timezone(&now.timezone());
    if local.date_naive() == now.date_naive() {
        local.format("%I:%M %p").to_string()
    } else {
        local.format("%b %-d").to_string()
    }
}
