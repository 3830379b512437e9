use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow, ensure};
use chrono::NaiveDateTime;
use config::{Config, ConfigError, File};
use serde::Deserialize;

use logq::app_dirs;
use logq::logging::DEFAULT_LEVEL;
use logq::memory::DEFAULT_TIME_FIELD;
use logq::normalize::merge_where_clauses;
use logq::params::DEFAULT_PAGE_SIZE;
use logq::time::{TimeGrouping, TimeRangePreset};
use logq::{CoordinatorSettings, DEFAULT_WINDOW};

use crate::cli::CliArgs;

/// Range used when neither bounds nor a preset are given.
const DEFAULT_RANGE: TimeRangePreset = TimeRangePreset::Last15m;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
	coordinator: CoordinatorSection,
	source: SourceSection,
	logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CoordinatorSection {
	throttle_ms: Option<u64>,
	debounce_ms: Option<u64>,
	page_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SourceSection {
	file: Option<PathBuf>,
	datasource: Option<String>,
	table: Option<String>,
	time_field: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
	level: Option<String>,
}

/// Time bounds of the query, resolved against the clock only when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeBounds {
	Fixed(NaiveDateTime, NaiveDateTime),
	Relative(TimeRangePreset),
}

impl TimeBounds {
	pub(crate) fn resolve(self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
		match self {
			Self::Fixed(start, end) => (start, end),
			Self::Relative(preset) => preset.resolve(now),
		}
	}
}

/// Query options that only come from the command line.
#[derive(Debug, Clone)]
pub(crate) struct QueryOptions {
	pub(crate) keyword: String,
	pub(crate) sql_filter: String,
	pub(crate) bounds: TimeBounds,
	pub(crate) grouping: TimeGrouping,
	pub(crate) fields: Vec<String>,
	pub(crate) pages: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
	pub(crate) file: PathBuf,
	pub(crate) datasource: String,
	pub(crate) table: String,
	pub(crate) time_field: String,
	pub(crate) coordinator: CoordinatorSettings,
	pub(crate) page_size: usize,
	pub(crate) log_level: String,
	pub(crate) query: QueryOptions,
}

impl ResolvedConfig {
	pub(crate) fn print_summary(&self) {
		println!("Effective configuration:");
		println!("  File: {}", self.file.display());
		println!("  Data source: {}", self.datasource);
		println!("  Table: {}", self.table);
		println!("  Time field: {}", self.time_field);
		println!("  Page size: {}", self.page_size);
		println!("  Pages: {}", self.query.pages);
		println!(
			"  Throttle window: {} ms",
			self.coordinator.throttle_window.as_millis()
		);
		println!(
			"  Debounce window: {} ms",
			self.coordinator.debounce_window.as_millis()
		);
		println!("  Log level: {}", self.log_level);
		match self.query.bounds {
			TimeBounds::Fixed(start, end) => println!("  Time range: {start} .. {end}"),
			TimeBounds::Relative(preset) => println!("  Time range: {preset}"),
		}
		println!("  Grouping: {}", self.query.grouping);
		if !self.query.keyword.is_empty() {
			println!("  Keyword: {}", self.query.keyword);
		}
		if !self.query.sql_filter.is_empty() {
			println!("  Filter: {}", self.query.sql_filter);
		}
		if !self.query.fields.is_empty() {
			println!("  Fields: {}", self.query.fields.join(", "));
		}
	}
}

pub(crate) fn load(cli: &CliArgs) -> Result<ResolvedConfig> {
	let builder = build_config(cli)?;
	let mut raw: RawConfig = builder
		.try_deserialize()
		.map_err(|err| anyhow!("failed to deserialize configuration: {err}"))?;
	raw.apply_cli_overrides(cli);
	raw.resolve(cli)
}

fn build_config(cli: &CliArgs) -> Result<Config> {
	let mut builder = Config::builder();

	if !cli.no_config {
		for path in default_config_files() {
			builder = builder.add_source(File::from(path).required(false));
		}
	}

	for path in &cli.config {
		builder = builder.add_source(File::from(path.clone()).required(true));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("logq")
			.separator("__")
			.try_parsing(true),
	);

	builder.build().map_err(|err| match err {
		ConfigError::Frozen => anyhow!("configuration builder is frozen"),
		other => other.into(),
	})
}

fn default_config_files() -> Vec<PathBuf> {
	let mut files = Vec::new();

	if let Ok(dir) = app_dirs::get_config_dir() {
		files.push(dir.join("config.toml"));
	}

	if let Ok(current_dir) = env::current_dir() {
		files.push(current_dir.join("logq.toml"));
	}

	files
}

impl RawConfig {
	fn apply_cli_overrides(&mut self, cli: &CliArgs) {
		if let Some(file) = cli.file.clone() {
			self.source.file = Some(file);
		}
		if let Some(datasource) = cli.datasource.clone() {
			self.source.datasource = Some(datasource);
		}
		if let Some(table) = cli.table.clone() {
			self.source.table = Some(table);
		}
		if let Some(field) = cli.time_field.clone() {
			self.source.time_field = Some(field);
		}
		if let Some(value) = cli.page_size {
			self.coordinator.page_size = Some(value);
		}
		if let Some(value) = cli.throttle_ms {
			self.coordinator.throttle_ms = Some(value);
		}
		if let Some(value) = cli.debounce_ms {
			self.coordinator.debounce_ms = Some(value);
		}
		if let Some(level) = cli.log_level.clone() {
			self.logging.level = Some(level);
		}
	}

	fn resolve(self, cli: &CliArgs) -> Result<ResolvedConfig> {
		let file = self
			.source
			.file
			.ok_or_else(|| anyhow!("no log file configured; pass --file or set source.file"))?;
		let datasource = non_blank(self.source.datasource)
			.ok_or_else(|| anyhow!("no data source configured; pass --datasource or set source.datasource"))?;
		let table = non_blank(self.source.table)
			.ok_or_else(|| anyhow!("no table configured; pass --table or set source.table"))?;
		let time_field =
			non_blank(self.source.time_field).unwrap_or_else(|| DEFAULT_TIME_FIELD.to_string());

		let page_size = self.coordinator.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
		ensure!(page_size > 0, "page size must be at least 1");
		ensure!(cli.pages > 0, "at least one page must be requested");

		let coordinator = CoordinatorSettings::default()
			.with_throttle_window(window(self.coordinator.throttle_ms))
			.with_debounce_window(window(self.coordinator.debounce_ms));

		let bounds = match (cli.start, cli.end) {
			(Some(start), Some(end)) => {
				ensure!(start <= end, "--end must not be before --start");
				TimeBounds::Fixed(start, end)
			}
			_ => TimeBounds::Relative(cli.range.unwrap_or(DEFAULT_RANGE)),
		};
		let fields = cli
			.fields
			.iter()
			.flatten()
			.map(|field| field.trim().to_string())
			.filter(|field| !field.is_empty())
			.collect();

		Ok(ResolvedConfig {
			file,
			datasource,
			table,
			time_field,
			coordinator,
			page_size,
			log_level: non_blank(self.logging.level).unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
			query: QueryOptions {
				keyword: cli.keyword.clone().unwrap_or_default(),
				sql_filter: merge_where_clauses(&cli.where_clauses),
				bounds,
				grouping: cli.grouping.unwrap_or_default(),
				fields,
				pages: cli.pages,
			},
		})
	}
}

fn window(millis: Option<u64>) -> Duration {
	millis.map_or(DEFAULT_WINDOW, Duration::from_millis)
}

fn non_blank(value: Option<String>) -> Option<String> {
	value
		.map(|value| value.trim().to_string())
		.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
	use std::fs;

	use clap::Parser;
	use tempfile::tempdir;

	use super::*;

	fn cli(args: &[&str]) -> CliArgs {
		CliArgs::parse_from(["logq", "--no-config"].iter().chain(args))
	}

	#[test]
	fn config_file_supplies_source_and_windows() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("logq.toml");
		fs::write(
			&path,
			r#"
[coordinator]
throttle_ms = 50
page_size = 20

[source]
file = "logs.jsonl"
datasource = "ds1"
table = "t1"
time_field = "ts"

[logging]
level = "debug"
"#,
		)
		.unwrap();

		let resolved = load(&cli(&["--config", path.to_str().unwrap()])).unwrap();
		assert_eq!(resolved.file, PathBuf::from("logs.jsonl"));
		assert_eq!(resolved.datasource, "ds1");
		assert_eq!(resolved.time_field, "ts");
		assert_eq!(resolved.page_size, 20);
		assert_eq!(resolved.coordinator.throttle_window, Duration::from_millis(50));
		assert_eq!(resolved.coordinator.debounce_window, DEFAULT_WINDOW);
		assert_eq!(resolved.log_level, "debug");
		assert_eq!(resolved.query.bounds, TimeBounds::Relative(DEFAULT_RANGE));
	}

	#[test]
	fn command_line_overrides_config_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("logq.toml");
		fs::write(&path, "[source]\nfile = \"a.json\"\ndatasource = \"ds1\"\ntable = \"t1\"\n").unwrap();

		let resolved = load(&cli(&[
			"--config",
			path.to_str().unwrap(),
			"--table",
			"t2",
			"--page-size",
			"5",
			"--where",
			"level = 'error'",
			"--where",
			"host = 'a'",
		]))
		.unwrap();
		assert_eq!(resolved.table, "t2");
		assert_eq!(resolved.page_size, 5);
		assert_eq!(resolved.query.sql_filter, "(level = 'error') AND (host = 'a')");
	}

	#[test]
	fn missing_source_details_are_reported() {
		let err = load(&cli(&["--datasource", "ds1", "--table", "t1"])).unwrap_err();
		assert!(err.to_string().contains("no log file"));

		let err = load(&cli(&["--file", "a.json", "--datasource", " ", "--table", "t1"])).unwrap_err();
		assert!(err.to_string().contains("no data source"));
	}

	#[test]
	fn zero_page_size_is_rejected() {
		let err = load(&cli(&[
			"--file",
			"a.json",
			"--datasource",
			"ds1",
			"--table",
			"t1",
			"--page-size",
			"0",
		]))
		.unwrap_err();
		assert!(err.to_string().contains("page size"));
	}

	#[test]
	fn required_config_file_must_exist() {
		let dir = tempdir().unwrap();
		let missing = dir.path().join("absent.toml");
		assert!(load(&cli(&["--config", missing.to_str().unwrap()])).is_err());
	}

	#[test]
	fn fixed_bounds_resolve_without_the_clock() {
		let resolved = load(&cli(&[
			"--file",
			"a.json",
			"--datasource",
			"ds1",
			"--table",
			"t1",
			"--start",
			"2025-01-01 00:00:00",
			"--end",
			"2025-01-01 01:00:00",
		]))
		.unwrap();
		let TimeBounds::Fixed(start, end) = resolved.query.bounds else {
			panic!("expected fixed bounds");
		};
		assert_eq!(resolved.query.bounds.resolve(end), (start, end));
	}
}
