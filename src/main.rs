mod cli;
mod settings;
mod workflow;

use anyhow::Result;
use cli::{OutputFormat, parse_cli, print_json, print_plain};
use settings::ResolvedConfig;
use workflow::QueryWorkflow;

fn main() -> Result<()> {
	let cli = parse_cli();
	let resolved = settings::load(&cli)?;
	logq::logging::initialize(&resolved.log_level)?;

	if cli.print_config {
		resolved.print_summary();
	}

	run_query(cli.output, resolved)
}

/// Execute the query workflow and print output in the chosen format.
fn run_query(format: OutputFormat, settings: ResolvedConfig) -> Result<()> {
	let workflow = QueryWorkflow::from_config(settings)?;
	let report = workflow.run()?;

	match format {
		OutputFormat::Plain => print_plain(&report),
		OutputFormat::Json => print_json(&report)?,
	}

	Ok(())
}
