use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{ArgAction, ColorChoice, Parser};
use logq::time::{TimeGrouping, TimeRangePreset, parse_timestamp};

use super::options::OutputFormat;
use super::styles::{cli_styles, long_version};

/// Command-line arguments accepted by the `logq` binary.
#[derive(Parser, Debug)]
#[command(
	name = "logq",
	version,
	long_version = long_version(),
	about = "Page through log records and chart their distribution over time",
	color = ColorChoice::Auto,
	styles = cli_styles()
)]
pub(crate) struct CliArgs {
	#[arg(
		short,
		long = "config",
		value_name = "FILE",
		env = "LOGQ_CONFIG",
		action = ArgAction::Append,
		help = "Additional configuration file to merge (default: none)"
	)]
	pub(crate) config: Vec<PathBuf>,
	#[arg(
		short = 'n',
		long = "no-config",
		help = "Skip loading default configuration files (default: disabled)"
	)]
	pub(crate) no_config: bool,
	#[arg(
		short = 'f',
		long,
		value_name = "PATH",
		help = "JSON array or JSON-lines file holding the log records"
	)]
	pub(crate) file: Option<PathBuf>,
	#[arg(
		short = 'd',
		long,
		value_name = "NAME",
		help = "Data source to query (default: from configuration)"
	)]
	pub(crate) datasource: Option<String>,
	#[arg(
		short = 't',
		long,
		value_name = "NAME",
		help = "Table (module) to query (default: from configuration)"
	)]
	pub(crate) table: Option<String>,
	#[arg(
		long = "time-field",
		value_name = "FIELD",
		help = "Record field holding the timestamp (default: log_time)"
	)]
	pub(crate) time_field: Option<String>,
	#[arg(
		short = 'k',
		long,
		value_name = "TEXT",
		help = "Case-insensitive keyword matched against every field (default: none)"
	)]
	pub(crate) keyword: Option<String>,
	#[arg(
		short = 'w',
		long = "where",
		value_name = "SQL",
		action = ArgAction::Append,
		help = "Filter condition; repeat to combine with AND (default: none)"
	)]
	pub(crate) where_clauses: Vec<String>,
	#[arg(
		long,
		value_name = "TIME",
		value_parser = parse_time,
		requires = "end",
		conflicts_with = "range",
		help = "Inclusive start of the time range, e.g. 2025-01-01 00:00:00"
	)]
	pub(crate) start: Option<NaiveDateTime>,
	#[arg(
		long,
		value_name = "TIME",
		value_parser = parse_time,
		requires = "start",
		conflicts_with = "range",
		help = "Exclusive end of the time range"
	)]
	pub(crate) end: Option<NaiveDateTime>,
	#[arg(
		short = 'r',
		long,
		value_name = "PRESET",
		help = "Relative time range such as last_1h or today (default: last_15m)"
	)]
	pub(crate) range: Option<TimeRangePreset>,
	#[arg(
		short = 'g',
		long,
		value_name = "UNIT",
		help = "Histogram bucket: second, minute, hour, day or auto (default: auto)"
	)]
	pub(crate) grouping: Option<TimeGrouping>,
	#[arg(
		long = "page-size",
		value_name = "NUM",
		help = "Rows per page (default: 50)"
	)]
	pub(crate) page_size: Option<usize>,
	#[arg(
		short = 'p',
		long,
		value_name = "NUM",
		default_value_t = 1,
		help = "Number of pages to load"
	)]
	pub(crate) pages: usize,
	#[arg(
		long,
		value_delimiter = ',',
		value_name = "FIELD",
		help = "Comma-separated fields to keep in each row (default: all)"
	)]
	pub(crate) fields: Option<Vec<String>>,
	#[arg(
		long = "throttle-ms",
		value_name = "MS",
		help = "Minimum spacing between page fetches (default: 300)"
	)]
	pub(crate) throttle_ms: Option<u64>,
	#[arg(
		long = "debounce-ms",
		value_name = "MS",
		help = "Quiet period before a histogram fetch (default: 300)"
	)]
	pub(crate) debounce_ms: Option<u64>,
	#[arg(
		long = "log-level",
		value_name = "LEVEL",
		help = "Log filter used when RUST_LOG is unset (default: warn)"
	)]
	pub(crate) log_level: Option<String>,
	#[arg(
		long = "print-config",
		help = "Print the resolved configuration before running (default: disabled)"
	)]
	pub(crate) print_config: bool,
	#[arg(
		short = 'o',
		long = "output",
		value_enum,
		default_value_t = OutputFormat::Plain,
		help = "Choose how to print the result"
	)]
	pub(crate) output: OutputFormat,
}

fn parse_time(value: &str) -> Result<NaiveDateTime, String> {
	parse_timestamp(value).ok_or_else(|| format!("expected YYYY-MM-DD HH:MM:SS, got `{value}`"))
}
