use bigdecimal::{num_bigint::BigInt, BigDecimal};
use chrono::{DateTime, Duration, Utc};

/// Parses a "(a,b,c),(d,e,f)" environment value into its tuple bodies.
pub fn parse_tuple_string(data: String) -> Vec<String> {
    if data.is_empty() {
        return Vec::new();
    }

    let str = &data[1..];
    let splited = str.split(",(");
    let mut items: Vec<String> = Vec::new();

    for c in splited {
        if let Some(index) = c.find(')') {
            let tuple_data = &c[0..index];
            items.push(tuple_data.to_owned());
        }
    }

    items
}

/// Truncates a timestamp down to its hour boundary.
pub fn floor_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    let secs = time.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    DateTime::from_timestamp(floored, 0).unwrap_or(time)
}

pub fn next_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    time + Duration::hours(1)
}

/// Whole hours from `from` up to `to`; zero when `to` is not ahead.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_hours().max(0)
}

/// Scales a base-unit quantity down by the token decimals, exactly.
pub fn scale_down(value: BigDecimal, decimals: i64) -> BigDecimal {
    if decimals == 0 {
        return value;
    }
    value * BigDecimal::new(BigInt::from(1), decimals)
}
