use anyhow::{Context, Result};
use benchtree::cli::{Cli, Command, TopArgs, TreeArgs};
use benchtree::{json_output, report, Benchmark};
use clap::Parser;
use std::fs;
use std::io::Write;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn tree(args: &TreeArgs) -> Result<()> {
    let file = fs::File::open(&args.result)
        .with_context(|| format!("Failed to open {}", args.result.display()))?;
    let benchmark: Benchmark = json_output::read_json(std::io::BufReader::new(file))
        .with_context(|| format!("Invalid benchmark result {}", args.result.display()))?;
    tracing::debug!(
        label = %benchmark.task.label,
        reports = benchmark.reports().count(),
        "loaded benchmark"
    );

    if args.json {
        println!("{}", json_output::to_json_pretty(&benchmark)?);
    } else if args.reports {
        print!("{}", benchmark);
    } else {
        print!("{}", benchmark.tree());
    }
    Ok(())
}

fn top(args: &TopArgs) -> Result<()> {
    let dump = fs::read(&args.profile)
        .with_context(|| format!("Failed to read {}", args.profile.display()))?;
    let options = args.report_options();
    let mut report = report::top(&dump, &args.label, &options);

    if let Some(path) = &args.output {
        match report.image.take() {
            Some(image) => {
                fs::write(path, image)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!("Call graph written to {}", path.display());
            }
            None => eprintln!("No call graph produced"),
        }
    }

    if args.json {
        println!("{}", json_output::to_json_pretty(&report)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{}", report)?;
        if let Some(image) = &report.image {
            if options.graph == report::Callgraph::Dot {
                stdout.write_all(image)?;
            }
        }
    }

    if !report.is_ok() {
        anyhow::bail!("report {} finished with {} error(s)", report.label, report.errors.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match &cli.command {
        Command::Tree(args) => tree(args),
        Command::Top(args) => top(args),
    }
}
