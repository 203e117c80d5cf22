// toolchain.rs — C++ compiler invocation for the runtime and the model
//
// Builds the runtime support objects once per numeric type and links the
// generated model source against them. Every invocation is a blocking
// child process with stdout/stderr redirected to files in the job
// directory.
//
// Preconditions: `runtime_dir` holds runtime.h and the runtime sources.
// Postconditions: on success the requested object or binary exists.
// Failure modes: non-zero compiler exit → `AbortRun::Toolchain` carrying the
//                captured stderr; the compiler can't be started →
//                `AbortRun::Launch`.
// Side effects: creates and deletes `compile.out`/`compile.err` in the job
//               directory; writes objects next to the runtime sources.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error, info};

use crate::error::{AbortRun, Result};
use crate::runtime_cache::RuntimeCache;

/// Where the compiler lives and where its byproducts go.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Compiler command, `g++` unless configured otherwise.
    pub compiler: String,
    pub runtime_dir: PathBuf,
    /// Receives the captured compiler output.
    pub job_dir: PathBuf,
}

impl Toolchain {
    pub fn new(compiler: impl Into<String>, runtime_dir: impl Into<PathBuf>, job_dir: impl Into<PathBuf>) -> Self {
        Toolchain {
            compiler: compiler.into(),
            runtime_dir: runtime_dir.into(),
            job_dir: job_dir.into(),
        }
    }

    /// Runtime translation units needed for numeric type `t`.
    pub fn runtime_stems(t: &str) -> Vec<&'static str> {
        let mut stems = vec!["runtime", "io"];
        if t == "int" {
            stems.push("fixedpoint");
        }
        stems
    }

    pub fn object_path(&self, stem: &str, t: &str) -> PathBuf {
        self.runtime_dir.join(format!("{}_{}.o", stem, t))
    }

    fn type_flags(&self, t: &str) -> Vec<String> {
        vec![
            format!("-I{}", self.runtime_dir.display()),
            format!("-Dn2a_T={}", t),
            if t == "int" { "-Dn2a_FP".to_string() } else { String::new() },
        ]
    }

    /// Compile each runtime source whose cached fingerprint is stale.
    /// Returns the object files in link order.
    pub fn build_runtime(&self, t: &str, cache: &mut RuntimeCache) -> Result<Vec<PathBuf>> {
        let flags = self.type_flags(t);
        let fingerprint = cache.fingerprint(&self.runtime_dir, t, &flags)?;
        let mut objects = Vec::new();
        for stem in Self::runtime_stems(t) {
            let object = self.object_path(stem, t);
            if cache.is_fresh(&object, &fingerprint) {
                debug!("runtime object {} is current", object.display());
                objects.push(object);
                continue;
            }
            let source = self.runtime_dir.join(format!("{}.cc", stem));
            let mut args = vec![
                self.compiler.clone(),
                "-c".into(),
                "-O3".into(),
                "-std=c++11".into(),
                "-ffunction-sections".into(),
                "-fdata-sections".into(),
            ];
            args.extend(flags.iter().cloned());
            args.push("-o".into());
            args.push(object.display().to_string());
            args.push(source.display().to_string());
            let out = run_command(&args, &self.job_dir)?;
            remove_quietly(&out);
            cache.record(&object, &fingerprint)?;
            info!("built runtime object {}", object.display());
            objects.push(object);
        }
        Ok(objects)
    }

    /// Compile and link the generated model. The binary lands next to the
    /// source with a `.bin` extension.
    pub fn build_model(&self, source: &Path, t: &str, objects: &[PathBuf]) -> Result<PathBuf> {
        let stem = source
            .file_name()
            .map(|n| n.to_string_lossy().split('.').next().unwrap_or_default().to_string())
            .unwrap_or_else(|| "model".to_string());
        let binary = source
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}.bin", stem));

        let mut args = vec![
            self.compiler.clone(),
            "-O3".into(),
            "-std=c++11".into(),
            "-ffunction-sections".into(),
            "-fdata-sections".into(),
            "-Wl,--gc-sections".into(),
        ];
        args.extend(self.type_flags(t));
        args.extend(objects.iter().map(|o| o.display().to_string()));
        args.push("-o".into());
        args.push(binary.display().to_string());
        args.push(source.display().to_string());
        let out = run_command(&args, &self.job_dir)?;
        remove_quietly(&out);
        info!("built {}", binary.display());
        Ok(binary)
    }
}

/// Run one command to completion. Empty arguments are dropped so callers
/// can leave optional flags blank. Returns the path of the captured stdout,
/// which the caller owns.
pub fn run_command(args: &[String], job_dir: &Path) -> Result<PathBuf> {
    let args: Vec<&str> = args.iter().map(String::as_str).filter(|a| !a.is_empty()).collect();
    let command_line = args.join(" ");
    debug!("{}", command_line);

    let Some((program, rest)) = args.split_first() else {
        return Err(AbortRun::Launch {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let out = job_dir.join("compile.out");
    let err = job_dir.join("compile.err");
    let out_file = File::create(&out).map_err(|e| AbortRun::io(&out, e))?;
    let err_file = File::create(&err).map_err(|e| AbortRun::io(&err, e))?;

    let status = Command::new(program)
        .args(rest)
        .stdout(out_file)
        .stderr(err_file)
        .status()
        .map_err(|source| AbortRun::Launch {
            program: program.to_string(),
            source,
        })?;

    if !status.success() {
        let stderr = std::fs::read_to_string(&err).unwrap_or_default();
        error!("Failed to compile:\n{}", stderr);
        remove_quietly(&out);
        remove_quietly(&err);
        return Err(AbortRun::Toolchain {
            command: command_line,
            stderr,
        });
    }
    remove_quietly(&err);
    Ok(out)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("could not remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_adds_a_runtime_unit() {
        assert_eq!(Toolchain::runtime_stems("float"), vec!["runtime", "io"]);
        assert_eq!(Toolchain::runtime_stems("int"), vec!["runtime", "io", "fixedpoint"]);
    }

    #[test]
    fn objects_are_named_by_type() {
        let tc = Toolchain::new("g++", "/rt", "/job");
        assert_eq!(tc.object_path("io", "double"), PathBuf::from("/rt/io_double.o"));
    }

    #[test]
    fn float_flags_leave_fixed_point_blank() {
        let tc = Toolchain::new("g++", "/rt", "/job");
        let flags = tc.type_flags("float");
        assert_eq!(flags[0], "-I/rt");
        assert_eq!(flags[1], "-Dn2a_T=float");
        assert!(flags[2].is_empty());
        assert_eq!(tc.type_flags("int")[2], "-Dn2a_FP");
    }

    #[cfg(unix)]
    #[test]
    fn successful_command_keeps_stdout_only() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["sh".to_string(), String::new(), "-c".into(), "echo hello".into()];
        let out = run_command(&args, dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
        assert!(!dir.path().join("compile.err").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_stderr_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["sh".to_string(), "-c".into(), "echo broken >&2; exit 3".into()];
        let err = run_command(&args, dir.path()).unwrap_err();
        match err {
            AbortRun::Toolchain { stderr, .. } => assert_eq!(stderr, "broken\n"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("compile.out").exists());
        assert!(!dir.path().join("compile.err").exists());
    }

    #[test]
    fn missing_compiler_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["/nonexistent/cxx".to_string()];
        assert!(matches!(run_command(&args, dir.path()), Err(AbortRun::Launch { .. })));
    }
}
