use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use n2c::error::AbortRun;
use n2c::job::{Job, JobConfig, JobLog};
use n2c::pass::PassId;
use n2c::pipeline::{compute_provenance, run_pipeline, CompilationState};
use n2c::runtime_cache::RuntimeCache;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Generated C++ compiled and linked against the runtime
    Exe,
    /// Generated C++ only
    Cpp,
    /// Annotated equation-set tree after analysis
    Model,
    /// Provenance JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "n2c",
    version,
    about = "N2A C backend — compiles equation-set models to native simulation programs"
)]
struct Cli {
    /// Input model document (JSON)
    source: PathBuf,

    /// Output C++ file (the binary lands beside it with a .bin extension)
    #[arg(short, long, default_value = "model.cc")]
    output: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Cpp)]
    emit: EmitStage,

    /// JSON job configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Numeric type: float, double or int (fixed-point)
    #[arg(long = "type")]
    numeric_type: Option<String>,

    /// Integrator: Euler or RungeKutta
    #[arg(long)]
    integrator: Option<String>,

    /// Event mode: during, before or after
    #[arg(long)]
    event_mode: Option<String>,

    /// Simulated seconds (sets the time exponent in fixed-point mode)
    #[arg(long)]
    duration: Option<f64>,

    /// Directory holding runtime.h and the runtime sources
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// C++ compiler command
    #[arg(long)]
    cc: Option<String>,

    /// Job log file (default: stderr)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Print compiler phases and timing
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn job_config(&self) -> Result<JobConfig, AbortRun> {
        let mut config = match &self.config {
            Some(path) => JobConfig::load(path)?,
            None => JobConfig::default(),
        };
        if self.numeric_type.is_some() {
            config.numeric_type = self.numeric_type.clone();
        }
        if self.integrator.is_some() {
            config.integrator = self.integrator.clone();
        }
        if self.event_mode.is_some() {
            config.event_mode = self.event_mode.clone();
        }
        if self.duration.is_some() {
            config.duration = self.duration;
        }
        if let Some(dir) = &self.runtime_dir {
            config.runtime_dir = dir.clone();
        }
        if let Some(cc) = &self.cc {
            config.compiler = cc.clone();
        }
        if matches!(self.emit, EmitStage::Exe) {
            config.build = true;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.verbose {
        eprintln!("n2c: source = {}", cli.source.display());
        eprintln!("n2c: output = {}", cli.output.display());
        eprintln!("n2c: emit   = {:?}", cli.emit);
    }

    let config = match cli.job_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("n2c: {}", e.to_diagnostic());
            return ExitCode::from(2);
        }
    };

    let mut log = match &cli.log {
        Some(path) => match JobLog::file(path) {
            Ok(log) => log,
            Err(e) => {
                eprintln!("n2c: {}", e.to_diagnostic());
                return ExitCode::from(2);
            }
        },
        None => JobLog::stderr(),
    };

    let result = match cli.emit {
        EmitStage::Cpp | EmitStage::Exe => {
            let job = Job::new(&cli.source, &cli.output, config);
            let mut cache = RuntimeCache::new();
            job.run(&mut cache, &mut log, cli.verbose).map(|outcome| {
                if let Some(binary) = outcome.binary {
                    log.line(&format!("n2c: built {}", binary.display()));
                }
            })
        }
        EmitStage::Model | EmitStage::BuildInfo => inspect(&cli, &config, &mut log),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(AbortRun::Io { .. }) => ExitCode::from(2),
        Err(_) => ExitCode::from(1),
    }
}

/// `--emit model` and `--emit build-info`: print to stdout instead of
/// writing an output file.
fn inspect(cli: &Cli, config: &JobConfig, log: &mut JobLog) -> Result<(), AbortRun> {
    let (doc, text) = match n2c::document::load(&cli.source) {
        Ok(loaded) => loaded,
        Err(e) => {
            log.record(&e.to_diagnostic());
            return Err(e);
        }
    };
    let (options, warnings) = config.resolve(&doc.backend.clone().unwrap_or_default());
    for w in &warnings {
        log.record(w);
    }

    if matches!(cli.emit, EmitStage::BuildInfo) {
        print!("{}", compute_provenance(&text, &options).to_json());
        return Ok(());
    }

    let mut state = CompilationState::new(doc);
    let terminal = if options.fixed_point {
        PassId::Exponents
    } else {
        PassId::Analyze
    };
    if let Err(e) = run_pipeline(&mut state, terminal, &options, cli.verbose, |_, _| {}) {
        let abort = e.into_abort();
        log.record(&abort.to_diagnostic());
        return Err(abort);
    }
    if let Some(model) = &state.model {
        print!("{}", model);
    }
    Ok(())
}
