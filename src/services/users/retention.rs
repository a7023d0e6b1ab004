use chrono::{Duration, NaiveDateTime};

use crate::models::users::Users;

/// Drops every record whose last activity is older than `now - window`.
/// Records without a usable timestamp are kept, and so is everything when
/// the cutoff falls outside the representable date range.
pub fn sweep(users: &mut Users, window: Duration, now: NaiveDateTime) -> usize {
    let Some(cutoff) = now.checked_sub_signed(window) else {
        return 0;
    };
    let before = users.len();

    users.retain(|_, record| match record.last_activity_at {
        Some(last_activity) => last_activity >= cutoff,
        None => true,
    });

    before - users.len()
}
