use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use logq::memory::MemorySource;
use logq::time::parse_timestamp;
use logq::{
	CoordinatorSettings, DistributionQuery, DistributionSource, FetchContext, PageResponse,
	PageSource, QueryError, QueryParameters, QueryRuntime, Record,
};
use serde_json::{Value, json};

const WAIT: Duration = Duration::from_secs(5);

fn params() -> QueryParameters {
	QueryParameters::new("ds1", "t1")
		.with_time_range(
			parse_timestamp("2025-01-01 00:00:00").unwrap(),
			parse_timestamp("2025-01-01 01:00:00").unwrap(),
		)
		.with_page_size(20)
}

fn records(count: usize) -> Vec<Record> {
	(0..count)
		.map(|index| {
			let Value::Object(record) = json!({
				"log_time": format!("2025-01-01 00:{:02}:00", index % 60),
				"message": format!("event {index}"),
			}) else {
				unreachable!()
			};
			record
		})
		.collect()
}

fn runtime<P, D>(pages: P, distributions: D) -> QueryRuntime
where
	P: PageSource + 'static,
	D: DistributionSource + 'static,
{
	QueryRuntime::new(
		Arc::new(pages),
		Arc::new(distributions),
		CoordinatorSettings::immediate(),
	)
}

/// Histogram source that always answers with a single bucket.
struct OneBucket;

impl DistributionSource for OneBucket {
	fn fetch_distribution(&self, _: &DistributionQuery, _: &FetchContext) -> Result<Value> {
		Ok(json!([{ "timePoint": "2025-01-01 00:00:00", "count": 1 }]))
	}
}

#[test]
fn pages_through_memory_source_until_exhausted() {
	let mut source = MemorySource::new();
	source.extend("ds1", "t1", records(45));
	let source = Arc::new(source);
	let mut runtime = QueryRuntime::new(source.clone(), source, CoordinatorSettings::immediate());

	runtime.update_parameters(params()).unwrap();
	assert!(runtime.wait_until_idle(WAIT));
	assert_eq!(runtime.state().rows().len(), 20);
	assert!(runtime.state().has_more());
	assert!(!runtime.state().buckets().is_empty());

	assert!(runtime.load_more());
	assert!(runtime.wait_until_idle(WAIT));
	assert_eq!(runtime.state().rows().len(), 40);

	assert!(runtime.load_more());
	assert!(runtime.wait_until_idle(WAIT));
	let state = runtime.state();
	assert_eq!(state.rows().len(), 45);
	assert_eq!(state.total_count(), 45);
	assert!(!state.has_more());
	assert_eq!(state.offset(), 40);
	assert!(!runtime.load_more());
}

/// Counts page calls and answers with five rows.
#[derive(Default)]
struct Counting {
	calls: Arc<AtomicUsize>,
}

impl PageSource for Counting {
	fn fetch_page(&self, _: &QueryParameters, _: &FetchContext) -> Result<PageResponse> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(PageResponse::new(records(5), 5))
	}
}

#[test]
fn identical_updates_reach_the_source_once() {
	let calls = Arc::new(AtomicUsize::new(0));
	let mut runtime = runtime(
		Counting {
			calls: Arc::clone(&calls),
		},
		OneBucket,
	);

	runtime.update_parameters(params()).unwrap();
	runtime.update_parameters(params()).unwrap();
	runtime
		.update_parameters(params().with_page_size(10))
		.unwrap();
	assert!(runtime.wait_until_idle(WAIT));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Keyword `slow` takes a while and returns many rows; anything else
/// answers immediately with three.
struct SlowFirst {
	saw_superseded: Arc<AtomicBool>,
}

impl PageSource for SlowFirst {
	fn fetch_page(&self, params: &QueryParameters, context: &FetchContext) -> Result<PageResponse> {
		if params.keyword == "slow" {
			thread::sleep(Duration::from_millis(200));
			self.saw_superseded
				.store(context.is_superseded(), Ordering::SeqCst);
			return Ok(PageResponse::new(records(20), 100));
		}
		Ok(PageResponse::new(records(3), 3))
	}
}

#[test]
fn late_answer_for_old_parameters_is_discarded() {
	let saw_superseded = Arc::new(AtomicBool::new(false));
	let mut runtime = runtime(
		SlowFirst {
			saw_superseded: Arc::clone(&saw_superseded),
		},
		OneBucket,
	);

	runtime
		.update_parameters(params().with_keyword("slow"))
		.unwrap();
	runtime
		.update_parameters(params().with_keyword("fast"))
		.unwrap();
	assert!(runtime.wait_until_idle(WAIT));
	assert_eq!(runtime.state().rows().len(), 3);

	thread::sleep(Duration::from_millis(400));
	runtime.pump();
	assert_eq!(runtime.state().rows().len(), 3);
	assert_eq!(runtime.state().total_count(), 3);
	assert!(saw_superseded.load(Ordering::SeqCst));
}

struct Panicking;

impl DistributionSource for Panicking {
	fn fetch_distribution(&self, _: &DistributionQuery, _: &FetchContext) -> Result<Value> {
		panic!("histogram backend exploded");
	}
}

#[test]
fn panicking_histogram_degrades_to_no_buckets() {
	let mut runtime = runtime(Counting::default(), Panicking);
	runtime.update_parameters(params()).unwrap();
	assert!(runtime.wait_until_idle(WAIT));

	let state = runtime.state();
	assert_eq!(state.rows().len(), 5);
	assert!(state.buckets().is_empty());
	assert!(state.error().is_none());
}

/// Fails the first call, then behaves.
#[derive(Default)]
struct FlakyOnce {
	failed: AtomicBool,
}

impl PageSource for FlakyOnce {
	fn fetch_page(&self, _: &QueryParameters, _: &FetchContext) -> Result<PageResponse> {
		if !self.failed.swap(true, Ordering::SeqCst) {
			bail!("connection refused");
		}
		Ok(PageResponse::new(records(20), 20))
	}
}

#[test]
fn failed_page_is_reported_and_retried() {
	let mut runtime = runtime(FlakyOnce::default(), OneBucket);
	runtime.update_parameters(params()).unwrap();
	assert!(runtime.wait_until_idle(WAIT));

	let error = runtime.state().error().cloned();
	assert!(matches!(error, Some(QueryError::FetchFailed(ref message)) if message.contains("connection refused")));
	assert!(error.is_some_and(|err| err.is_retryable()));
	assert_eq!(runtime.state().buckets().len(), 1);

	assert!(runtime.retry());
	assert!(runtime.wait_until_idle(WAIT));
	assert!(runtime.state().error().is_none());
	assert_eq!(runtime.state().rows().len(), 20);
}

#[test]
fn incomplete_parameters_never_reach_sources() {
	let calls = Arc::new(AtomicUsize::new(0));
	let mut runtime = runtime(
		Counting {
			calls: Arc::clone(&calls),
		},
		OneBucket,
	);

	let err = runtime
		.update_parameters(QueryParameters::new("ds1", ""))
		.unwrap_err();
	assert_eq!(err, QueryError::parameter_invalid("table"));
	assert!(runtime.wait_until_idle(WAIT));
	assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn refresh_fetches_the_same_query_again() {
	let calls = Arc::new(AtomicUsize::new(0));
	let mut runtime = runtime(
		Counting {
			calls: Arc::clone(&calls),
		},
		OneBucket,
	);
	runtime.update_parameters(params()).unwrap();
	assert!(runtime.wait_until_idle(WAIT));

	runtime.refresh().unwrap();
	assert!(runtime.wait_until_idle(WAIT));
	assert_eq!(calls.load(Ordering::SeqCst), 2);
	assert_eq!(runtime.state().rows().len(), 5);
}
