// job.rs — One compile job: configuration, log, and output
//
// Merges the job configuration with the document's backend settings,
// runs the pipeline to C++, writes the source atomically, and optionally
// builds the runtime and the model binary. Every warning and the fatal
// diagnostic, if any, go to the job log.
//
// Preconditions: `Job::source` names a model document.
// Postconditions: on success the C++ file exists at `Job::output` (and the
//                 binary beside it when building); on failure no output
//                 file is left behind.
// Failure modes: any `AbortRun` from loading, the pipeline, writing, or the
//                toolchain.
// Side effects: writes the output file, the job log, and toolchain
//               byproducts.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codegen::{CodegenOptions, EventMode, Integrator};
use crate::diag::{codes, Diagnostic};
use crate::document::{self, BackendDoc};
use crate::error::{AbortRun, Result};
use crate::pass::PassId;
use crate::pipeline::{compute_provenance, run_pipeline, CompilationState, Provenance};
use crate::runtime_cache::RuntimeCache;
use crate::toolchain::Toolchain;

// ── Configuration ──────────────────────────────────────────────────────────

/// Job settings. Unset backend fields fall through to the document's
/// `backend` object and then to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub numeric_type: Option<String>,
    pub integrator: Option<String>,
    pub event_mode: Option<String>,
    pub duration: Option<f64>,
    pub runtime_dir: PathBuf,
    pub compiler: String,
    /// Compile and link after generating C++.
    pub build: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            numeric_type: None,
            integrator: None,
            event_mode: None,
            duration: None,
            runtime_dir: PathBuf::from("runtime"),
            compiler: "g++".to_string(),
            build: false,
        }
    }
}

impl JobConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<JobConfig> {
        let text = std::fs::read_to_string(path).map_err(|e| AbortRun::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Code generation options plus any warnings about values that had to
    /// be replaced.
    pub fn resolve(&self, backend: &BackendDoc) -> (CodegenOptions, Vec<Diagnostic>) {
        let mut diags = Vec::new();

        let requested = self
            .numeric_type
            .clone()
            .or_else(|| backend.numeric_type.clone())
            .unwrap_or_else(|| "float".to_string());
        let numeric = numeric_type(&requested, &mut diags);

        let integrator = match self.integrator.as_ref().or(backend.integrator.as_ref()) {
            None => Integrator::default(),
            Some(name) => name.parse().unwrap_or_else(|_| {
                diags.push(
                    Diagnostic::warning(format!("Unknown integrator '{}'. Using Euler.", name))
                        .with_code(codes::W0002),
                );
                Integrator::Euler
            }),
        };

        let event_mode = match self.event_mode.as_ref().or(backend.event_mode.as_ref()) {
            None => EventMode::default(),
            Some(name) => name.parse().unwrap_or_else(|_| {
                diags.push(
                    Diagnostic::warning(format!("Unknown event mode '{}'. Using during.", name))
                        .with_code(codes::W0003),
                );
                EventMode::During
            }),
        };

        let duration = self.duration.or(backend.duration).unwrap_or(1.0);
        let options = CodegenOptions {
            fixed_point: numeric == "int",
            numeric,
            integrator,
            event_mode,
            duration,
        };
        (options, diags)
    }
}

fn numeric_type(requested: &str, diags: &mut Vec<Diagnostic>) -> String {
    let mut t = requested.to_string();
    if t.starts_with("int") && t.len() > 3 {
        t = "int".to_string();
        diags.push(
            Diagnostic::warning(
                "Only supported integer type is 'int', which is assumed to be signed 32-bit.",
            )
            .with_code(codes::W0001),
        );
    }
    if !matches!(t.as_str(), "int" | "double" | "float") {
        t = "float".to_string();
        diags.push(
            Diagnostic::warning("Unsupported numeric type. Defaulting to single-precision float.")
                .with_code(codes::W0001),
        );
    }
    t
}

// ── Job log ────────────────────────────────────────────────────────────────

/// Human-readable record of one job. Flushed however the job ends.
pub struct JobLog {
    sink: Box<dyn Write>,
}

impl JobLog {
    pub fn stderr() -> Self {
        JobLog {
            sink: Box::new(io::stderr()),
        }
    }

    pub fn file(path: &Path) -> Result<Self> {
        let f = File::create(path).map_err(|e| AbortRun::io(path, e))?;
        Ok(JobLog {
            sink: Box::new(BufWriter::new(f)),
        })
    }

    pub fn to_writer(sink: Box<dyn Write>) -> Self {
        JobLog { sink }
    }

    pub fn record(&mut self, d: &Diagnostic) {
        let _ = writeln!(self.sink, "{}", d);
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.sink, "{}", text);
    }
}

impl Drop for JobLog {
    fn drop(&mut self) {
        let _ = self.sink.flush();
    }
}

// ── Job ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Job {
    pub source: PathBuf,
    /// Generated C++ file.
    pub output: PathBuf,
    pub config: JobConfig,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub options: CodegenOptions,
    pub provenance: Provenance,
    pub binary: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Job {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, config: JobConfig) -> Self {
        Job {
            source: source.into(),
            output: output.into(),
            config,
        }
    }

    /// Directory that receives byproducts: the output's parent.
    pub fn job_dir(&self) -> PathBuf {
        match self.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Run the job. A fatal error is recorded in the log before it is
    /// returned.
    pub fn run(&self, cache: &mut RuntimeCache, log: &mut JobLog, verbose: bool) -> Result<JobOutcome> {
        let result = self.run_inner(cache, log, verbose);
        if let Err(e) = &result {
            log.record(&e.to_diagnostic());
        }
        result
    }

    fn run_inner(&self, cache: &mut RuntimeCache, log: &mut JobLog, verbose: bool) -> Result<JobOutcome> {
        let (doc, text) = document::load(&self.source)?;
        let backend = doc.backend.clone().unwrap_or_default();
        let (options, warnings) = self.config.resolve(&backend);
        for w in &warnings {
            warn!("{}", w.message);
            log.record(w);
        }

        let toolchain = Toolchain::new(
            self.config.compiler.clone(),
            self.config.runtime_dir.clone(),
            self.job_dir(),
        );
        let objects = if self.config.build {
            Some(toolchain.build_runtime(&options.numeric, cache)?)
        } else {
            None
        };

        let (source, mut diagnostics) = generate(doc, &options, verbose, log)?;
        write_atomically(&self.output, &source)?;
        info!("wrote {}", self.output.display());

        let binary = match objects {
            Some(objects) => Some(toolchain.build_model(&self.output, &options.numeric, &objects)?),
            None => None,
        };

        let mut all = warnings;
        all.append(&mut diagnostics);
        Ok(JobOutcome {
            provenance: compute_provenance(&text, &options),
            options,
            binary,
            diagnostics: all,
        })
    }
}

/// Run every pass on a loaded document and return the C++ text plus the
/// pipeline's diagnostics.
pub fn generate(
    doc: document::PartDoc,
    options: &CodegenOptions,
    verbose: bool,
    log: &mut JobLog,
) -> Result<(String, Vec<Diagnostic>)> {
    let mut state = CompilationState::new(doc);
    let outcome = run_pipeline(&mut state, PassId::Codegen, options, verbose, |_, diags| {
        for d in diags.iter().filter(|d| !d.is_error()) {
            log.record(d);
        }
    });
    outcome.map_err(|e| e.into_abort())?;
    let generated = state
        .generated
        .take()
        .ok_or(AbortRun::PassFailed("codegen"))?;
    Ok((generated.cpp_source, state.diagnostics))
}

/// Write to a hidden sibling, then rename into place.
pub fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model.cc".to_string());
    let temp = path.with_file_name(format!(".{}.tmp", name));
    if let Err(e) = std::fs::write(&temp, contents) {
        let _ = std::fs::remove_file(&temp);
        return Err(AbortRun::io(&temp, e));
    }
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        AbortRun::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Log sink the test can read back.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn codes_of(diags: &[Diagnostic]) -> Vec<&'static str> {
        diags.iter().filter_map(|d| d.code.map(|c| c.0)).collect()
    }

    #[test]
    fn defaults_are_float_euler_during() {
        let (opts, diags) = JobConfig::default().resolve(&BackendDoc::default());
        assert_eq!(opts, CodegenOptions::default());
        assert!(diags.is_empty());
    }

    #[test]
    fn config_overrides_document_backend() {
        let backend = BackendDoc {
            numeric_type: Some("double".into()),
            integrator: Some("RungeKutta".into()),
            event_mode: Some("after".into()),
            duration: Some(4.0),
        };
        let (opts, _) = JobConfig::default().resolve(&backend);
        assert_eq!(opts.numeric, "double");
        assert_eq!(opts.integrator, Integrator::RungeKutta);
        assert_eq!(opts.event_mode, EventMode::After);
        assert_eq!(opts.duration, 4.0);

        let config = JobConfig {
            numeric_type: Some("float".into()),
            integrator: Some("euler".into()),
            ..JobConfig::default()
        };
        let (opts, _) = config.resolve(&backend);
        assert_eq!(opts.numeric, "float");
        assert_eq!(opts.integrator, Integrator::Euler);
        assert_eq!(opts.event_mode, EventMode::After);
    }

    #[test]
    fn sized_int_collapses_to_int_with_warning() {
        let config = JobConfig {
            numeric_type: Some("int32".into()),
            ..JobConfig::default()
        };
        let (opts, diags) = config.resolve(&BackendDoc::default());
        assert_eq!(opts.numeric, "int");
        assert!(opts.fixed_point);
        assert_eq!(codes_of(&diags), vec!["W0001"]);
        assert!(diags[0].message.starts_with("Only supported integer type is 'int'"));
    }

    #[test]
    fn unknown_values_fall_back_with_warnings() {
        let config = JobConfig {
            numeric_type: Some("half".into()),
            integrator: Some("Verlet".into()),
            event_mode: Some("sometime".into()),
            ..JobConfig::default()
        };
        let (opts, diags) = config.resolve(&BackendDoc::default());
        assert_eq!(opts.numeric, "float");
        assert!(!opts.fixed_point);
        assert_eq!(opts.integrator, Integrator::Euler);
        assert_eq!(opts.event_mode, EventMode::During);
        assert_eq!(codes_of(&diags), vec!["W0001", "W0002", "W0003"]);
    }

    #[test]
    fn config_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, r#"{"numeric_type": "double", "build": true}"#).unwrap();
        let config = JobConfig::load(&path).unwrap();
        assert_eq!(config.numeric_type.as_deref(), Some("double"));
        assert!(config.build);
        assert_eq!(config.compiler, "g++");
    }

    #[test]
    fn job_writes_cpp_and_logs_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("model.json");
        std::fs::write(
            &source,
            r#"{"name": "M", "backend": {"type": "int64"}, "parts": [{"name": "A", "variables": [
                {"name": "$n", "equations": ["5"]},
                {"name": "x'", "equations": ["-x"]},
                {"name": "x", "equations": ["1 @ $init"]}
            ]}]}"#,
        )
        .unwrap();
        let output = dir.path().join("model.cc");
        let sink = Shared::default();
        let mut log = JobLog::to_writer(Box::new(sink.clone()));
        let job = Job::new(&source, &output, JobConfig::default());
        let outcome = job.run(&mut RuntimeCache::new(), &mut log, false).unwrap();
        drop(log);

        assert_eq!(outcome.options.numeric, "int");
        assert!(outcome.binary.is_none());
        let cpp = std::fs::read_to_string(&output).unwrap();
        assert!(cpp.contains("Event<int>::exponent"));
        assert!(sink.text().contains("warning[W0001]"));
        assert!(!dir.path().join(".model.cc.tmp").exists());
    }

    #[test]
    fn failed_job_leaves_no_output_and_logs_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("model.json");
        std::fs::write(
            &source,
            r#"{"name": "M", "variables": [{"name": "a", "equations": ["missing * 2"]}]}"#,
        )
        .unwrap();
        let output = dir.path().join("model.cc");
        let sink = Shared::default();
        let mut log = JobLog::to_writer(Box::new(sink.clone()));
        let job = Job::new(&source, &output, JobConfig::default());
        let err = job.run(&mut RuntimeCache::new(), &mut log, false).unwrap_err();
        drop(log);

        assert!(matches!(err, AbortRun::Unresolved { .. }));
        assert!(!output.exists());
        assert!(sink.text().contains("error[E0003]"));
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.cc");
        std::fs::write(&path, "old").unwrap();
        write_atomically(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join(".out.cc.tmp").exists());
    }
}
