use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use tensorlink::backend::{self, ExecutionBackend};
use tensorlink::device::default_device;
use tensorlink::metrics::{self, CounterSource, MetricsSnapshot};
use tensorlink::program::{OpKind, Program};
use tensorlink::rng;

fn main() -> ExitCode {
    tensorlink::init_logging();
    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tlk-diag error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tlk-diag", about = "Counter diagnostics for the tensorlink runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        match self.command {
            Command::Run(args) => run_command(args),
            Command::Diff(args) => diff_command(args),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a demo workload and print the counter report.
    Run(RunArgs),
    /// Diff counter snapshots captured around a demo workload.
    Diff(DiffArgs),
}

#[derive(Args, Debug, Clone)]
struct WorkloadArgs {
    /// Elements per input buffer.
    #[arg(long, default_value_t = 1_024)]
    size: usize,
    /// Number of times to execute the program.
    #[arg(long, default_value_t = 8)]
    iterations: usize,
    /// Op pipeline preset for the demo program.
    #[arg(long, value_enum, default_value_t = WorkloadPreset::Mixed)]
    preset: WorkloadPreset,
    /// Run executions on scheduler worker threads instead of inline.
    #[arg(long, default_value_t = false)]
    scheduled: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    workload: WorkloadArgs,
    /// Output format for the counter report.
    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    format: ReportFormat,
}

#[derive(Args, Debug, Clone)]
struct DiffArgs {
    #[command(flatten)]
    workload: WorkloadArgs,
    /// Counter names to exclude from the difference report.
    #[arg(long = "ignore", value_name = "NAME")]
    ignore: Vec<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum WorkloadPreset {
    /// Scale + add over two inputs.
    Elementwise,
    /// Sum reduction under the precision policy.
    Reduction,
    /// Elementwise pipeline with a randomized perturbation and reduction.
    Mixed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Table,
}

fn run_command(args: RunArgs) -> Result<()> {
    backend::register_native_backend().context("registering native backend")?;
    execute_workload(&args.workload)?;

    match args.format {
        ReportFormat::Table => print!("{}", metrics::counters_report()),
        ReportFormat::Json => {
            let entries = metrics::registry().counter_entries();
            let json =
                serde_json::to_string_pretty(&entries).context("serializing counter report")?;
            println!("{json}");
        }
    }
    Ok(())
}

fn diff_command(args: DiffArgs) -> Result<()> {
    backend::register_native_backend().context("registering native backend")?;

    let start = MetricsSnapshot::capture();
    execute_workload(&args.workload)?;
    let end = MetricsSnapshot::capture();

    let ignore: HashSet<String> = args.ignore.into_iter().collect();
    let ignore_ref = (!ignore.is_empty()).then_some(&ignore);
    let report = start.dump_differences(&end, ignore_ref);
    if report.is_empty() {
        println!("No counters changed.");
    } else {
        print!("{report}");
    }
    Ok(())
}

fn execute_workload(args: &WorkloadArgs) -> Result<()> {
    let backend = backend::backend().context("resolving execution backend")?;
    let device = default_device();
    let program = demo_program(args.preset);
    let executable = backend.compile(&program).context("compiling demo program")?;
    let arity = program.input_arity();

    for _ in 0..args.iterations {
        let inputs: Vec<Vec<f32>> = (0..arity)
            .map(|_| rng::random_host_buffer(args.size))
            .collect();

        if args.scheduled {
            let pending = Arc::clone(&backend)
                .schedule(Arc::clone(&executable), inputs, device)
                .context("scheduling execution")?;
            pending.wait().context("waiting for scheduled execution")?;
        } else {
            backend
                .execute(&executable, &inputs, device)
                .context("executing demo program")?;
        }
    }
    Ok(())
}

fn demo_program(preset: WorkloadPreset) -> Program {
    match preset {
        WorkloadPreset::Elementwise => Program::new(
            "demo-elementwise",
            vec![OpKind::Scale(2.0), OpKind::Add],
        ),
        WorkloadPreset::Reduction => Program::new("demo-reduction", vec![OpKind::Sum]),
        WorkloadPreset::Mixed => Program::new(
            "demo-mixed",
            vec![
                OpKind::Scale(0.5),
                OpKind::Add,
                OpKind::Randomize,
                OpKind::Mul,
                OpKind::Sum,
            ],
        ),
    }
}
