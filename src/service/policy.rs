//! Renewal policy: decide between serving from cache and re-issuing.

use chrono::{DateTime, Utc};

use crate::store::CachedCert;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Whole days from `now` until `not_after`, rounded toward negative
/// infinity. An expired certificate yields a negative count.
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

/// A cached certificate needs renewal once fewer than
/// `renew_before_days` whole days of validity remain.
pub fn needs_renewal(cached: &CachedCert, renew_before_days: i64, now: DateTime<Utc>) -> bool {
    days_until(cached.not_after, now) < renew_before_days
}
