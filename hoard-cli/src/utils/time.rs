use chrono::{DateTime, Utc};

/// Age of `timestamp` relative to `now`, in the largest sensible unit
pub fn format_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - timestamp).num_seconds().max(0);

    if seconds >= 86_400 {
        format!("{}d", seconds / 86_400)
    } else if seconds >= 3600 {
        format!("{}h", seconds / 3600)
    } else if seconds >= 60 {
        format!("{}m", seconds / 60)
    } else {
        format!("{seconds}s")
    }
}
