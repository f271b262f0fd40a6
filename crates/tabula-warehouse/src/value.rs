//! Conversion of engine values into JSON-safe values.

use ::duckdb::types::{TimeUnit, Value as DuckValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Number, Value};
use time::macros::format_description;
use time::{Date, Duration, PrimitiveDateTime, Time};

const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Convert a `DuckDB` value to a JSON value.
pub fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::HugeInt(value) => huge_int(value),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Decimal(value) => decimal_from_text(&value.to_string()),
        DuckValue::Text(value) | DuckValue::Enum(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(BASE64.encode(value)),
        DuckValue::Date32(days) => date_from_days(days).map_or(Value::Null, Value::String),
        DuckValue::Time64(unit, value) => {
            time_from_nanos(to_nanos(unit, value)).map_or(Value::Null, Value::String)
        }
        DuckValue::Timestamp(unit, value) => {
            timestamp_from_nanos(to_nanos(unit, value)).map_or(Value::Null, Value::String)
        }
        DuckValue::List(items) | DuckValue::Array(items) => {
            Value::Array(items.into_iter().map(to_json_value).collect())
        }
        DuckValue::Struct(fields) => {
            let mut object = Map::new();
            for (key, value) in fields.iter() {
                object.insert(key.clone(), to_json_value(value.clone()));
            }
            Value::Object(object)
        }
        DuckValue::Map(entries) => {
            let mut object = Map::new();
            for (key, value) in entries.iter() {
                object.insert(map_key(key.clone()), to_json_value(value.clone()));
            }
            Value::Object(object)
        }
        DuckValue::Union(inner) => to_json_value(*inner),
        DuckValue::Interval {
            months,
            days,
            nanos,
        } => Value::String(interval_iso(months, days, nanos)),
        _ => {
            tracing::debug!("tabular.value_unsupported");
            Value::Null
        }
    }
}

/// Read the first `column_count` values of a row as JSON values.
pub fn read_row(
    row: &::duckdb::Row<'_>,
    column_count: usize,
) -> Result<Vec<Value>, ::duckdb::Error> {
    let mut output = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value: DuckValue = row.get(index)?;
        output.push(to_json_value(value));
    }
    Ok(output)
}

/// Convert an f64 to a JSON number, returning Null for NaN/Inf.
pub fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Render a normalized value as a delimited-text cell.
pub fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(value) => value.to_string(),
        Value::Number(value) => value.to_string(),
        Value::String(value) => value.clone(),
        nested => nested.to_string(),
    }
}

fn huge_int(value: i128) -> Value {
    i64::try_from(value)
        .map(|value| Value::Number(Number::from(value)))
        .or_else(|_| u64::try_from(value).map(|value| Value::Number(Number::from(value))))
        .unwrap_or_else(|_| number_from_f64(value as f64))
}

/// Exact decimals collapse to integers when integral, else to floats.
fn decimal_from_text(text: &str) -> Value {
    let integral = match text.split_once('.') {
        Some((whole, fraction)) if fraction.bytes().all(|digit| digit == b'0') => Some(whole),
        Some(_) => None,
        None => Some(text),
    };
    if let Some(whole) = integral {
        if let Ok(value) = whole.parse::<i64>() {
            return Value::Number(Number::from(value));
        }
    }
    text.parse::<f64>().map_or(Value::Null, number_from_f64)
}

fn map_key(key: DuckValue) -> String {
    match to_json_value(key) {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn to_nanos(unit: TimeUnit, value: i64) -> i128 {
    let value = i128::from(value);
    match unit {
        TimeUnit::Second => value * 1_000_000_000,
        TimeUnit::Millisecond => value * 1_000_000,
        TimeUnit::Microsecond => value * 1_000,
        TimeUnit::Nanosecond => value,
    }
}

fn date_from_days(days: i32) -> Option<String> {
    let date = Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY.checked_add(days)?).ok()?;
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

fn time_from_nanos(nanos: i128) -> Option<String> {
    let nanos = i64::try_from(nanos.rem_euclid(86_400_000_000_000)).ok()?;
    let time = Time::MIDNIGHT + Duration::nanoseconds(nanos);
    Some(format_time(time))
}

fn timestamp_from_nanos(nanos: i128) -> Option<String> {
    let epoch = PrimitiveDateTime::new(
        Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY).ok()?,
        Time::MIDNIGHT,
    );
    let seconds = i64::try_from(nanos.div_euclid(1_000_000_000)).ok()?;
    let sub_nanos = i64::try_from(nanos.rem_euclid(1_000_000_000)).ok()?;
    let datetime = epoch
        .checked_add(Duration::seconds(seconds))?
        .checked_add(Duration::nanoseconds(sub_nanos))?;
    let date = datetime
        .date()
        .format(format_description!("[year]-[month]-[day]"))
        .ok()?;
    Some(format!("{date}T{}", format_time(datetime.time())))
}

/// ISO-8601 duration, e.g. `P1Y2M3DT4H5M6.5S`; zero renders as `PT0S`.
fn interval_iso(months: i32, days: i32, nanos: i64) -> String {
    const NANOS_PER_SECOND: i64 = 1_000_000_000;
    const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
    const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;

    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    for (amount, unit) in [(i64::from(years), 'Y'), (i64::from(months), 'M'), (i64::from(days), 'D')] {
        if amount != 0 {
            out.push_str(&format!("{amount}{unit}"));
        }
    }
    if nanos != 0 {
        out.push('T');
        let (hours, rest) = (nanos / NANOS_PER_HOUR, nanos % NANOS_PER_HOUR);
        let (minutes, rest) = (rest / NANOS_PER_MINUTE, rest % NANOS_PER_MINUTE);
        let (seconds, fraction) = (rest / NANOS_PER_SECOND, rest % NANOS_PER_SECOND);
        if hours != 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if fraction != 0 {
            let sign = if seconds == 0 && fraction < 0 { "-" } else { "" };
            let digits = format!("{:09}", fraction.unsigned_abs());
            out.push_str(&format!("{sign}{seconds}.{}S", digits.trim_end_matches('0')));
        } else if seconds != 0 {
            out.push_str(&format!("{seconds}S"));
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    out
}

/// ISO-8601 time of day; fractional seconds only when present.
fn format_time(time: Time) -> String {
    let (hour, minute, second, nanos) = time.as_hms_nano();
    if nanos == 0 {
        format!("{hour:02}:{minute:02}:{second:02}")
    } else if nanos % 1_000 == 0 {
        format!("{hour:02}:{minute:02}:{second:02}.{:06}", nanos / 1_000)
    } else {
        format!("{hour:02}:{minute:02}:{second:02}.{nanos:09}")
    }
}
