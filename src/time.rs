//! Timestamp parsing, time grouping and relative time-range presets.
//!
//! Log sources exchange timestamps as `YYYY-MM-DD HH:MM:SS` in local wall
//! clock time, so everything here works on [`NaiveDateTime`].

use std::fmt;
use std::str::FromStr;

use chrono::{DurationRound, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical wire format for timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_FORMATS: &[&str] = &[
	TIMESTAMP_FORMAT,
	"%Y-%m-%dT%H:%M:%S",
	"%Y-%m-%d %H:%M:%S%.f",
	"%Y-%m-%dT%H:%M:%S%.f",
	"%Y-%m-%d %H:%M",
	"%Y-%m-%dT%H:%M",
];

/// Parse a timestamp in any of the accepted layouts.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
	let value = value.trim();
	ACCEPTED_FORMATS
		.iter()
		.find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
	value.format(TIMESTAMP_FORMAT).to_string()
}

/// Unknown name passed to one of the `FromStr` impls in this module.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct UnknownVariant {
	kind: &'static str,
	value: String,
	expected: &'static str,
}

/// Granularity of distribution buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrouping {
	Second,
	Minute,
	Hour,
	Day,
	#[default]
	Auto,
}

impl TimeGrouping {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Second => "second",
			Self::Minute => "minute",
			Self::Hour => "hour",
			Self::Day => "day",
			Self::Auto => "auto",
		}
	}

	/// Pick a concrete unit for `Auto` based on the span being charted.
	#[must_use]
	pub fn resolve(self, span: TimeDelta) -> Self {
		if self != Self::Auto {
			return self;
		}
		if span <= TimeDelta::minutes(2) {
			Self::Second
		} else if span <= TimeDelta::hours(2) {
			Self::Minute
		} else if span <= TimeDelta::days(3) {
			Self::Hour
		} else {
			Self::Day
		}
	}

	/// Length of one bucket. `Auto` has no fixed width and reports `None`.
	pub fn bucket_width(self) -> Option<TimeDelta> {
		match self {
			Self::Second => Some(TimeDelta::seconds(1)),
			Self::Minute => Some(TimeDelta::minutes(1)),
			Self::Hour => Some(TimeDelta::hours(1)),
			Self::Day => Some(TimeDelta::days(1)),
			Self::Auto => None,
		}
	}

	/// Start of the bucket containing `timestamp`.
	pub fn truncate(self, timestamp: NaiveDateTime) -> NaiveDateTime {
		match self.bucket_width() {
			Some(width) => timestamp.duration_trunc(width).unwrap_or(timestamp),
			None => timestamp,
		}
	}
}

impl fmt::Display for TimeGrouping {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TimeGrouping {
	type Err = UnknownVariant;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim().to_ascii_lowercase().as_str() {
			"second" => Ok(Self::Second),
			"minute" => Ok(Self::Minute),
			"hour" => Ok(Self::Hour),
			"day" => Ok(Self::Day),
			"auto" => Ok(Self::Auto),
			_ => Err(UnknownVariant {
				kind: "time grouping",
				value: value.to_string(),
				expected: "second, minute, hour, day, auto",
			}),
		}
	}
}

/// Relative time ranges offered by the range picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRangePreset {
	Last5m,
	Last15m,
	Last30m,
	Last1h,
	Last8h,
	Last24h,
	Today,
	Yesterday,
	LastWeek,
}

impl TimeRangePreset {
	pub const ALL: [Self; 9] = [
		Self::Last5m,
		Self::Last15m,
		Self::Last30m,
		Self::Last1h,
		Self::Last8h,
		Self::Last24h,
		Self::Today,
		Self::Yesterday,
		Self::LastWeek,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Last5m => "last_5m",
			Self::Last15m => "last_15m",
			Self::Last30m => "last_30m",
			Self::Last1h => "last_1h",
			Self::Last8h => "last_8h",
			Self::Last24h => "last_24h",
			Self::Today => "today",
			Self::Yesterday => "yesterday",
			Self::LastWeek => "last_week",
		}
	}

	/// Absolute `(start, end)` bounds relative to `now`.
	pub fn resolve(self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
		let midnight = now.date().and_time(NaiveTime::MIN);
		match self {
			Self::Last5m => (now - TimeDelta::minutes(5), now),
			Self::Last15m => (now - TimeDelta::minutes(15), now),
			Self::Last30m => (now - TimeDelta::minutes(30), now),
			Self::Last1h => (now - TimeDelta::hours(1), now),
			Self::Last8h => (now - TimeDelta::hours(8), now),
			Self::Last24h => (now - TimeDelta::hours(24), now),
			Self::Today => (midnight, now),
			Self::Yesterday => (midnight - TimeDelta::days(1), midnight),
			Self::LastWeek => (now - TimeDelta::days(7), now),
		}
	}
}

impl fmt::Display for TimeRangePreset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TimeRangePreset {
	type Err = UnknownVariant;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let needle = value.trim().to_ascii_lowercase();
		Self::ALL
			.into_iter()
			.find(|preset| preset.as_str() == needle)
			.ok_or_else(|| UnknownVariant {
				kind: "time range",
				value: value.to_string(),
				expected: "last_5m, last_15m, last_30m, last_1h, last_8h, last_24h, today, yesterday, last_week",
			})
	}
}

/// Serde adapter for optional timestamps in [`TIMESTAMP_FORMAT`].
pub(crate) mod optional_timestamp {
	use chrono::NaiveDateTime;
	use serde::{Deserialize, Deserializer, Serializer, de};

	pub(crate) fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match value {
			Some(value) => serializer.serialize_str(&super::format_timestamp(value)),
			None => serializer.serialize_none(),
		}
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw: Option<String> = Option::deserialize(deserializer)?;
		match raw.as_deref().map(str::trim) {
			None | Some("") => Ok(None),
			Some(text) => super::parse_timestamp(text)
				.map(Some)
				.ok_or_else(|| de::Error::custom(format!("invalid timestamp '{text}'"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ts(text: &str) -> NaiveDateTime {
		parse_timestamp(text).expect("valid timestamp")
	}

	#[test]
	fn parses_space_and_t_separated_timestamps() {
		assert_eq!(ts("2025-01-01T00:00:00"), ts("2025-01-01 00:00:00"));
		assert_eq!(ts("2025-01-01 10:30"), ts("2025-01-01 10:30:00"));
		assert_eq!(
			format_timestamp(&ts("2025-01-01 10:30:15.250")),
			"2025-01-01 10:30:15"
		);
		assert!(parse_timestamp("yesterday-ish").is_none());
	}

	#[test]
	fn auto_grouping_scales_with_span() {
		let auto = TimeGrouping::Auto;
		assert_eq!(auto.resolve(TimeDelta::seconds(90)), TimeGrouping::Second);
		assert_eq!(auto.resolve(TimeDelta::hours(1)), TimeGrouping::Minute);
		assert_eq!(auto.resolve(TimeDelta::hours(30)), TimeGrouping::Hour);
		assert_eq!(auto.resolve(TimeDelta::days(30)), TimeGrouping::Day);
		assert_eq!(
			TimeGrouping::Hour.resolve(TimeDelta::seconds(1)),
			TimeGrouping::Hour
		);
	}

	#[test]
	fn truncate_snaps_to_bucket_start() {
		let value = ts("2025-03-04 05:06:07");
		assert_eq!(TimeGrouping::Minute.truncate(value), ts("2025-03-04 05:06:00"));
		assert_eq!(TimeGrouping::Hour.truncate(value), ts("2025-03-04 05:00:00"));
		assert_eq!(TimeGrouping::Day.truncate(value), ts("2025-03-04 00:00:00"));
		assert_eq!(TimeGrouping::Auto.truncate(value), value);
	}

	#[test]
	fn presets_resolve_relative_to_now() {
		let now = ts("2025-01-02 12:00:00");
		assert_eq!(
			TimeRangePreset::Last15m.resolve(now),
			(ts("2025-01-02 11:45:00"), now)
		);
		assert_eq!(
			TimeRangePreset::Today.resolve(now),
			(ts("2025-01-02 00:00:00"), now)
		);
		assert_eq!(
			TimeRangePreset::Yesterday.resolve(now),
			(ts("2025-01-01 00:00:00"), ts("2025-01-02 00:00:00"))
		);
	}

	#[test]
	fn names_round_trip_through_from_str() {
		for preset in TimeRangePreset::ALL {
			assert_eq!(preset.as_str().parse::<TimeRangePreset>(), Ok(preset));
		}
		assert_eq!("HOUR".parse::<TimeGrouping>(), Ok(TimeGrouping::Hour));
		assert!("fortnight".parse::<TimeGrouping>().is_err());
	}
}
