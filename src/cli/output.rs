use anyhow::Result;
use logq::time::format_timestamp;
use serde_json::{Value, json};

use crate::workflow::QueryReport;

/// Widest histogram bar in plain output.
const BAR_WIDTH: u64 = 40;

/// Print rows and histogram as aligned text.
pub(crate) fn print_plain(report: &QueryReport) {
	println!(
		"{} of {} rows ({} page{}){}",
		report.rows.len(),
		report.total_count,
		report.pages_loaded,
		if report.pages_loaded == 1 { "" } else { "s" },
		if report.has_more { ", more available" } else { "" },
	);
	for row in &report.rows {
		println!("{}", format_row(report, &row.record));
	}

	if !report.distribution.is_empty() {
		println!();
		println!(
			"Histogram ({}):",
			report.distribution.time_unit.as_deref().unwrap_or("auto")
		);
		let peak = report
			.distribution
			.buckets
			.iter()
			.map(|bucket| bucket.count)
			.max()
			.unwrap_or(0)
			.max(1);
		for bucket in &report.distribution.buckets {
			let width = (bucket.count * BAR_WIDTH).div_ceil(peak) as usize;
			println!("  {}  {:>6}  {}", bucket.time_point, bucket.count, "#".repeat(width));
		}
	}

	if let Some(err) = &report.error {
		println!();
		println!("Stopped early: {err}");
	}
}

/// Leading time field, then the remaining columns as `name=value`.
fn format_row(report: &QueryReport, record: &logq::Record) -> String {
	let time = record
		.get(&report.time_field)
		.map(render)
		.unwrap_or_else(|| "-".to_string());
	let mut line = time;
	for column in report.columns.iter().filter(|c| **c != report.time_field) {
		if let Some(value) = record.get(column) {
			line.push_str(&format!(" {column}={}", render(value)));
		}
	}
	line
}

fn render(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}

pub(crate) fn format_report_json(report: &QueryReport) -> Result<String> {
	let params = &report.params;
	let payload = json!({
		"query": {
			"datasourceId": params.datasource,
			"module": params.table,
			"keyword": params.keyword,
			"whereSql": params.sql_filter,
			"startTime": params.start.as_ref().map(format_timestamp),
			"endTime": params.end.as_ref().map(format_timestamp),
			"timeGrouping": params.time_grouping,
			"pageSize": params.page_size,
		},
		"totalCount": report.total_count,
		"hasMore": report.has_more,
		"pagesLoaded": report.pages_loaded,
		"executionTimeMs": report.execution_time_ms,
		"columns": report.columns,
		"rows": report.rows,
		"distribution": report.distribution,
		"error": report.error,
	});

	Ok(serde_json::to_string_pretty(&payload)?)
}

pub(crate) fn print_json(report: &QueryReport) -> Result<()> {
	println!("{}", format_report_json(report)?);
	Ok(())
}

#[cfg(test)]
mod tests {
	use logq::source::{Distribution, DistributionBucket};
	use logq::time::parse_timestamp;
	use logq::{LogRow, QueryParameters, Record};

	use super::*;

	fn report() -> QueryReport {
		let mut record = Record::new();
		record.insert("log_time".into(), json!("2025-01-01 00:00:10"));
		record.insert("level".into(), json!("error"));
		QueryReport {
			params: QueryParameters::new("ds1", "t1").with_time_range(
				parse_timestamp("2025-01-01 00:00:00").unwrap(),
				parse_timestamp("2025-01-01 01:00:00").unwrap(),
			),
			time_field: "log_time".into(),
			rows: vec![LogRow {
				key: "1_0_0".into(),
				record,
			}],
			columns: vec!["log_time".into(), "level".into()],
			total_count: 1,
			has_more: false,
			pages_loaded: 1,
			execution_time_ms: Some(3),
			distribution: Distribution {
				buckets: vec![DistributionBucket {
					time_point: "2025-01-01 00:00:00".into(),
					count: 1,
				}],
				time_unit: Some("minute".into()),
				time_interval: Some(1),
			},
			error: None,
		}
	}

	#[test]
	fn rows_lead_with_the_time_field() {
		let report = report();
		assert_eq!(
			format_row(&report, &report.rows[0].record),
			"2025-01-01 00:00:10 level=error"
		);
	}

	#[test]
	fn json_report_uses_wire_names() {
		let json = format_report_json(&report()).expect("json");
		let value: Value = serde_json::from_str(&json).expect("parse");
		assert_eq!(value["query"]["datasourceId"], "ds1");
		assert_eq!(value["query"]["startTime"], "2025-01-01 00:00:00");
		assert_eq!(value["rows"][0]["_key"], "1_0_0");
		assert_eq!(value["rows"][0]["level"], "error");
		assert_eq!(value["distribution"]["buckets"][0]["timePoint"], "2025-01-01 00:00:00");
	}
}
