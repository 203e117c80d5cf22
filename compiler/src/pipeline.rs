// pipeline.rs — Compilation state and pass orchestration
//
// Holds the model document, the annotated model, and the generated code,
// and runs the minimal set of passes for a given terminal PassId. The
// planner's side table borrows the model, so planning and code generation
// run together in one scoped block.
//
// Preconditions: the document is set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or
//                 has_error is set and the fatal diagnostic is recorded.
// Failure modes: any pass returning `AbortRun`.
// Side effects: calls on_pass_complete callback after each pass.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::codegen::{CodegenOptions, GeneratedCode};
use crate::diag::{DiagLevel, Diagnostic};
use crate::document::PartDoc;
use crate::error::AbortRun;
use crate::model::Model;
use crate::pass::{descriptor, required_passes, PassId};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw model document text.
/// `options_fingerprint`: SHA-256 of the backend options that shape output.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"options_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.options_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the document text and the resolved options.
pub fn compute_provenance(source: &str, options: &CodegenOptions) -> Provenance {
    let canonical = format!(
        "numeric={};fixed={};integrator={};event={:?};duration={}",
        options.numeric, options.fixed_point, options.integrator, options.event_mode, options.duration
    );
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub document: PartDoc,
    /// Annotated in place by resolve, analyze and exponents.
    pub model: Option<Model>,
    pub generated: Option<GeneratedCode>,
    /// Number of rounds the exponent solver needed.
    pub exponent_rounds: Option<usize>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(document: PartDoc) -> Self {
        Self {
            document,
            model: None,
            generated: None,
            exponent_rounds: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution stopped in a pass. The fatal diagnostic is the last
/// entry of `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
    /// The abort that stopped it, if the pass aborted rather than
    /// reporting error diagnostics.
    pub abort: Option<AbortRun>,
}

impl PipelineError {
    pub fn into_abort(self) -> AbortRun {
        self.abort.unwrap_or(AbortRun::PassFailed(descriptor(self.failing_pass).name))
    }
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose, error check.
/// Takes split borrows so it can run while the plan borrows the model.
fn finish_pass_core(
    all_diags: &mut Vec<Diagnostic>,
    has_error: &mut bool,
    pass_id: PassId,
    outcome: Result<Vec<Diagnostic>, AbortRun>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let (diags, abort) = match outcome {
        Ok(diags) => (diags, None),
        Err(abort) => (vec![abort.to_diagnostic()], Some(abort)),
    };
    on_pass_complete(pass_id, &diags);
    let is_err = diags.iter().any(|d| d.level == DiagLevel::Error);
    all_diags.extend(diags);
    let ms = elapsed.as_secs_f64() * 1000.0;
    debug!(pass = descriptor(pass_id).name, ms, "pass complete");
    if verbose {
        eprintln!("n2c: {} complete, {:.1}ms", descriptor(pass_id).name, ms);
    }
    if is_err {
        *has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
            abort,
        });
    }
    Ok(())
}

fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    outcome: Result<Vec<Diagnostic>, AbortRun>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    finish_pass_core(
        &mut state.diagnostics,
        &mut state.has_error,
        pass_id,
        outcome,
        elapsed,
        verbose,
        on_pass_complete,
    )
}

fn model_of(state: &mut CompilationState, pass_id: PassId) -> Result<&mut Model, AbortRun> {
    state
        .model
        .as_mut()
        .ok_or(AbortRun::PassOrder(descriptor(pass_id).name))
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    codegen_options: &CodegenOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal, codegen_options.fixed_point);

    for &pass_id in &passes {
        // Plan-dependent passes run in a scoped block
        if matches!(pass_id, PassId::Plan | PassId::Codegen) {
            return run_plan_and_downstream(
                state,
                &passes,
                codegen_options,
                verbose,
                &mut on_pass_complete,
            );
        }

        let t = Instant::now();
        let outcome = match pass_id {
            PassId::BuildTree => Model::from_document(&state.document).map(|model| {
                debug!("{} sets, {} variables", model.sets.len(), model.vars.len());
                state.model = Some(model);
                Vec::new()
            }),
            PassId::Resolve => {
                model_of(state, pass_id).and_then(|model| crate::resolve::resolve(model).map(|_| Vec::new()))
            }
            PassId::Analyze => model_of(state, pass_id).and_then(|model| {
                crate::analyze::analyze(model, codegen_options.fixed_point).map(|_| Vec::new())
            }),
            PassId::Exponents => {
                let duration = codegen_options.duration;
                let rounds = model_of(state, pass_id)
                    .and_then(|model| crate::exponent::determine_exponents(model, duration));
                rounds.map(|rounds| {
                    debug!("exponents settled after {} rounds", rounds);
                    state.exponent_rounds = Some(rounds);
                    Vec::new()
                })
            }
            PassId::Plan | PassId::Codegen => unreachable!(),
        };
        finish_pass(
            state,
            pass_id,
            outcome,
            t.elapsed(),
            verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

// ── Plan scoped block ──────────────────────────────────────────────────────

fn run_plan_and_downstream(
    state: &mut CompilationState,
    passes: &[PassId],
    codegen_options: &CodegenOptions,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let CompilationState {
        model,
        generated,
        diagnostics,
        has_error,
        ..
    } = state;

    let Some(model) = model.as_ref() else {
        let t = Instant::now();
        return finish_pass_core(
            diagnostics,
            has_error,
            PassId::Plan,
            Err(AbortRun::PassOrder(descriptor(PassId::Plan).name)),
            t.elapsed(),
            verbose,
            on_pass_complete,
        );
    };

    let t = Instant::now();
    let plans = match crate::plan::build_plans(model) {
        Ok(plans) => {
            finish_pass_core(
                diagnostics,
                has_error,
                PassId::Plan,
                Ok(Vec::new()),
                t.elapsed(),
                verbose,
                on_pass_complete,
            )?;
            plans
        }
        Err(abort) => {
            return finish_pass_core(
                diagnostics,
                has_error,
                PassId::Plan,
                Err(abort),
                t.elapsed(),
                verbose,
                on_pass_complete,
            );
        }
    };

    if passes.contains(&PassId::Codegen) {
        let t = Instant::now();
        let result = crate::codegen::codegen(model, &plans, codegen_options);
        let elapsed = t.elapsed();
        *generated = Some(result.generated);
        finish_pass_core(
            diagnostics,
            has_error,
            PassId::Codegen,
            Ok(result.diagnostics),
            elapsed,
            verbose,
            on_pass_complete,
        )?;
    }
    // plans drop here — model borrow released

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;

    fn state(json: &str) -> CompilationState {
        CompilationState::new(document::from_str(json).unwrap())
    }

    #[test]
    fn codegen_runs_every_float_pass_in_order() {
        let mut st = state(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "$n", "equations": ["5"]},
                {"name": "x'", "equations": ["-x"]},
                {"name": "x", "equations": ["1 @ $init"]}
            ]}]}"#,
        );
        let mut seen = Vec::new();
        run_pipeline(&mut st, PassId::Codegen, &CodegenOptions::default(), false, |p, _| {
            seen.push(p)
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                PassId::BuildTree,
                PassId::Resolve,
                PassId::Analyze,
                PassId::Plan,
                PassId::Codegen
            ]
        );
        assert!(!st.has_error);
        assert!(st.generated.unwrap().cpp_source.contains("class Wrapper"));
    }

    #[test]
    fn analyze_terminal_stops_before_planning() {
        let mut st = state(r#"{"name": "M", "variables": [{"name": "a", "equations": ["1"]}]}"#);
        run_pipeline(&mut st, PassId::Analyze, &CodegenOptions::default(), false, |_, _| {}).unwrap();
        assert!(st.model.is_some());
        assert!(st.generated.is_none());
    }

    #[test]
    fn unresolved_name_fails_in_resolve() {
        let mut st = state(r#"{"name": "M", "variables": [{"name": "a", "equations": ["nowhere + 1"]}]}"#);
        let err = run_pipeline(&mut st, PassId::Codegen, &CodegenOptions::default(), false, |_, _| {})
            .unwrap_err();
        assert_eq!(err.failing_pass, PassId::Resolve);
        assert!(st.has_error);
        let last = st.diagnostics.last().unwrap();
        assert!(last.is_error());
        assert!(last.message.contains("nowhere"));
    }

    #[test]
    fn provenance_tracks_source_and_options() {
        let opts = CodegenOptions::default();
        let a = compute_provenance("{}", &opts);
        let b = compute_provenance("{ }", &opts);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert_ne!(a.source_hash, b.source_hash);
        assert_eq!(a.options_fingerprint, b.options_fingerprint);

        let double = CodegenOptions {
            numeric: "double".into(),
            ..CodegenOptions::default()
        };
        assert_ne!(a.options_fingerprint, compute_provenance("{}", &double).options_fingerprint);
        assert!(a.to_json().contains("\"compiler_version\""));
    }
}
