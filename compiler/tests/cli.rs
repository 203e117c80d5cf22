// CLI tests: run the n2c binary against model documents in a scratch
// directory and check its outputs, logs and exit codes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn n2c_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_n2c"))
}

fn write_model(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("model.json");
    std::fs::write(&path, json).unwrap();
    path
}

fn run(args: &[&str]) -> Output {
    Command::new(n2c_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run n2c")
}

const DECAY: &str = r#"{"name": "M", "variables": [
    {"name": "x", "equations": ["1 @ $init"]},
    {"name": "x'", "equations": ["-x"]}
]}"#;

#[test]
fn emit_cpp_writes_the_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), DECAY);
    let out = dir.path().join("model.cc");
    let result = run(&[
        model.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--emit",
        "cpp",
    ]);
    assert!(
        result.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    let src = std::fs::read_to_string(&out).unwrap();
    assert!(src.starts_with("#include \"runtime.h\""));
    assert!(src.contains("int main (int argc, char * argv[])"));
    assert!(!dir.path().join(".model.cc.tmp").exists());
}

#[test]
fn build_info_prints_provenance_json() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), DECAY);
    let result = run(&[model.to_str().unwrap(), "--emit", "build-info"]);
    assert!(result.status.success());
    let info: serde_json::Value = serde_json::from_slice(&result.stdout).unwrap();
    assert_eq!(info["source_hash"].as_str().unwrap().len(), 64);
    assert_eq!(info["options_fingerprint"].as_str().unwrap().len(), 64);
    assert_eq!(info["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn emit_model_prints_the_analyzed_tree() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), DECAY);
    let result = run(&[model.to_str().unwrap(), "--emit", "model"]);
    assert!(result.status.success());
    let text = String::from_utf8(result.stdout).unwrap();
    assert!(text.contains("x'"));
}

#[test]
fn unresolved_model_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(
        dir.path(),
        r#"{"name": "M", "variables": [{"name": "y", "equations": ["ghost + 1"]}]}"#,
    );
    let out = dir.path().join("model.cc");
    let log = dir.path().join("job.log");
    let result = run(&[
        model.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--log",
        log.to_str().unwrap(),
    ]);
    assert_eq!(result.status.code(), Some(1));
    assert!(!out.exists());
    let logged = std::fs::read_to_string(&log).unwrap();
    assert!(logged.contains("error[E0003]"), "log: {}", logged);
}

#[test]
fn wide_integer_type_warns_and_falls_back_to_int() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), DECAY);
    let out = dir.path().join("model.cc");
    let result = run(&[
        model.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--type",
        "int64",
    ]);
    assert!(result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("warning[W0001]"), "stderr: {}", stderr);
    let src = std::fs::read_to_string(&out).unwrap();
    assert!(src.contains("Event<int>::exponent = "));
}

#[test]
fn missing_source_is_an_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    let result = run(&[missing.to_str().unwrap(), "--emit", "build-info"]);
    assert_eq!(result.status.code(), Some(2));
}
