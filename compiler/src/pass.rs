// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's six passes (document loading is outside the
// runner), their dependency edges, and the artifacts they produce. The
// pipeline runner uses this to compute the minimal pass list for each
// --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (document loading excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    BuildTree,
    Resolve,
    Analyze,
    Exponents,
    Plan,
    Codegen,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// or annotation layer in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Model,      // Model
    Resolution, // Variable::reference, uses/users
    Analysis,   // attributes, ordering, lethality, live references
    Exponents,  // Variable::exponent, Expr::scale
    Plans,      // Plans
    Generated,  // GeneratedCode
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
    /// Runs only for fixed-point (`int`) targets.
    pub fixed_point_only: bool,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::BuildTree => PassDescriptor {
            name: "build_tree",
            inputs: &[],
            outputs: &[ArtifactId::Model],
            invalidation_key: "document",
            invariants: "equations parsed, bindings resolved, specials added",
            fixed_point_only: false,
        },
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[PassId::BuildTree],
            outputs: &[ArtifactId::Resolution],
            invalidation_key: "model",
            invariants: "every reference bound to a variable",
            fixed_point_only: false,
        },
        PassId::Analyze => PassDescriptor {
            name: "analyze",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Analysis],
            invalidation_key: "model + numeric type",
            invariants: "attributes only added, evaluation order fixed",
            fixed_point_only: false,
        },
        PassId::Exponents => PassDescriptor {
            name: "exponents",
            inputs: &[PassId::Analyze],
            outputs: &[ArtifactId::Exponents],
            invalidation_key: "model + duration",
            invariants: "every expression carries an exponent",
            fixed_point_only: true,
        },
        PassId::Plan => PassDescriptor {
            name: "plan",
            inputs: &[PassId::Analyze, PassId::Exponents],
            outputs: &[ArtifactId::Plans],
            invalidation_key: "model",
            invariants: "storage of each variable decided once",
            fixed_point_only: false,
        },
        PassId::Codegen => PassDescriptor {
            name: "codegen",
            inputs: &[PassId::Plan],
            outputs: &[ArtifactId::Generated],
            invalidation_key: "model + plans + codegen_options",
            invariants: "one C++ translation unit emitted",
            fixed_point_only: false,
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::BuildTree,
    PassId::Resolve,
    PassId::Analyze,
    PassId::Exponents,
    PassId::Plan,
    PassId::Codegen,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order. Fixed-point-only
/// passes are dropped unless `fixed_point` is set.
pub fn required_passes(terminal: PassId, fixed_point: bool) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order.retain(|&p| fixed_point || !descriptor(p).fixed_point_only);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
