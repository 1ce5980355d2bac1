use chrono::{DateTime as UtcDateTime, Utc};

use crate::cdds::DateTime;

/// Days between the CCSDS epoch (1958-01-01) and the Unix epoch.
const CCSDS_TO_UNIX_DAYS: i64 = 4383;
const SECS_PER_DAY: i64 = 86_400;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime {
        from_utc(Utc::now())
    }
}

pub fn now() -> DateTime {
    SystemClock.now()
}

pub fn from_utc(time: UtcDateTime<Utc>) -> DateTime {
    let secs = time.timestamp();
    // leap seconds are folded into the last millisecond of the second
    let nanos = time.timestamp_subsec_nanos().min(999_999_999);
    let days = secs.div_euclid(SECS_PER_DAY) + CCSDS_TO_UNIX_DAYS;
    let secs_of_day = secs.rem_euclid(SECS_PER_DAY) as u32;
    DateTime {
        days: days as u32,
        ms_of_day: secs_of_day * 1_000 + nanos / 1_000_000,
        pico_secs_of_ms: (nanos % 1_000_000) * 1_000,
    }
}

pub fn to_utc(time: &DateTime) -> Option<UtcDateTime<Utc>> {
    let secs = (i64::from(time.days) - CCSDS_TO_UNIX_DAYS) * SECS_PER_DAY
        + i64::from(time.ms_of_day / 1_000);
    let nanos = (time.ms_of_day % 1_000) * 1_000_000 + time.pico_secs_of_ms / 1_000;
    UtcDateTime::<Utc>::from_timestamp(secs, nanos)
}

pub fn format(time: &DateTime) -> String {
    match to_utc(time) {
        Some(utc) => utc.to_rfc3339(),
        None => format!(
            "days={} ms_of_day={} pico_secs_of_ms={}",
            time.days, time.ms_of_day, time.pico_secs_of_ms
        ),
    }
}
