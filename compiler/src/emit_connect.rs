// emit_connect.rs — Connection instances, iterators and parameters
//
// A connection instance stores one endpoint pointer per binding and offers
// it to the runtime through `setPart`/`getPart`. Candidate instances come
// from a population's `getIterators`: plain connections share one iterator
// factory on their container instance, nearest-neighbor connections build
// their own, and matrix connections walk the nonzeros of a file.
//
// Preconditions: plans are built.
// Postconditions: the holder numbering computed by `holders` is the same
//   from the container and from each connection population.
// Failure modes: none.
// Side effects: none.

use crate::codegen::compute_temporaries;
use crate::cpp::{ClassCode, Stmt};
use crate::equations::multiconditional;
use crate::id::SetId;
use crate::model::{mangle, AccountableConnection, Model, Step};
use crate::plan::count_name;
use crate::render::{Phase, Renderer};

// ── Iterator factories ──────────────────────────────────────────────────────

/// Nearest-neighbor search parameters of one binding.
fn nn_parameters(model: &Model, set: SetId, alias: &str) -> bool {
    ["$k", "$radius"]
        .iter()
        .any(|p| model.find(set, &format!("{}.{}", alias, p), 0).is_some())
}

fn is_nn(model: &Model, set: SetId) -> bool {
    model
        .set(set)
        .bindings
        .iter()
        .any(|b| nn_parameters(model, set, &b.alias))
}

/// Connections whose candidates come from a shared factory on the container.
fn is_plain(model: &Model, set: SetId) -> bool {
    let s = model.set(set);
    s.is_connection() && s.matrix.is_none() && !is_nn(model, set)
}

/// Ascent count and endpoint population of each binding, as seen from the
/// connection's container.
type EndpointKey = Vec<(usize, SetId)>;

fn endpoint_key(model: &Model, connection: SetId) -> EndpointKey {
    model
        .set(connection)
        .bindings
        .iter()
        .map(|b| {
            let ascents = b
                .resolution
                .iter()
                .filter(|s| matches!(s, Step::Ascend(_)))
                .count();
            (ascents, b.endpoint)
        })
        .collect()
}

/// Shared iterator factories of `container`: each entry is the endpoint key
/// and the plain connections that use it, in child order.
pub fn holders(model: &Model, container: SetId) -> Vec<(EndpointKey, Vec<SetId>)> {
    let mut out: Vec<(EndpointKey, Vec<SetId>)> = Vec::new();
    for &c in &model.set(container).parts {
        if !is_plain(model, c) {
            continue;
        }
        let key = endpoint_key(model, c);
        match out.iter_mut().find(|(k, _)| *k == key) {
            Some((_, users)) => users.push(c),
            None => out.push((key, vec![c])),
        }
    }
    out
}

fn holder_index(model: &Model, connection: SetId) -> Option<usize> {
    let container = model.set(connection).container?;
    holders(model, container)
        .iter()
        .position(|(_, users)| users.contains(&connection))
}

/// Expression for an endpoint population, reached by walking `steps` from
/// `from`. `skip` drops the leading ascent, for code that already runs in
/// the connection's container.
fn endpoint_population(r: &Renderer<'_, '_>, from: SetId, steps: &[Step], skip: bool) -> String {
    let mut out = String::new();
    let steps = match steps.split_first() {
        Some((Step::Ascend(_), rest)) if skip => rest,
        _ => steps,
    };
    let mut current = from;
    for (i, step) in steps.iter().enumerate() {
        let last = i + 1 == steps.len();
        match *step {
            Step::Ascend(c) => {
                out.push_str("container->");
                current = c;
            }
            Step::Descend(p) => {
                out.push_str(&mangle(&r.model.set(p).name));
                if !last {
                    out.push('.');
                    if r.plans[p].singleton {
                        out.push_str("instance.");
                    }
                }
                current = p;
            }
            Step::Connect { binding, endpoint } => {
                out.push_str(&mangle(&r.model.set(current).bindings[binding].alias));
                out.push_str("->");
                current = endpoint;
            }
        }
    }
    out
}

/// Candidate list argument for `ConnectPopulation`.
fn candidates(r: &Renderer<'_, '_>, endpoint: SetId, population: &str) -> String {
    if r.plans[endpoint].singleton {
        format!(
            "new std::vector<Part<{}> *> (1, &{}.instance), true",
            r.t(),
            population
        )
    } else {
        format!("&{}.instances", population)
    }
}

fn iterator_list(r: &Renderer<'_, '_>, connection: SetId, skip: bool, nn: bool) -> Vec<Stmt> {
    let t = r.t();
    let bindings = &r.model.set(connection).bindings;
    let mut out = vec![Stmt::line(format!(
        "std::vector<ConnectPopulation<{t}> *> * iterators = new std::vector<ConnectPopulation<{t}> *> ({});",
        bindings.len()
    ))];
    for (i, b) in bindings.iter().enumerate() {
        let population = endpoint_population(r, connection, &b.resolution, skip);
        let class = if nn && nn_parameters(r.model, connection, &b.alias) {
            "ConnectPopulationNN"
        } else {
            "ConnectPopulation"
        };
        out.push(Stmt::line(format!(
            "(*iterators)[{}] = new {}<{}> ({}, {});",
            i,
            class,
            t,
            i,
            candidates(r, b.endpoint, &population)
        )));
    }
    out.push(Stmt::line(format!("return new ConnectIterators<{}> (iterators);", t)));
    out
}

/// Factories shared by this set's plain child connections.
pub fn holder_methods(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    for (k, (_, users)) in holders(r.model, r.set).iter().enumerate() {
        let Some(&first) = users.first() else {
            continue;
        };
        code.helper(
            &format!("ConnectIterator<{}> *", r.t()),
            &format!("getIterators{} ()", k),
            iterator_list(r, first, true, false),
        );
    }
}

// ── Instance side ───────────────────────────────────────────────────────────

pub fn binding_fields(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    for b in &r.model.set(r.set).bindings {
        code.decl(format!("{} * {}", r.model.prefix(Some(b.endpoint)), mangle(&b.alias)));
    }
}

pub fn instance_methods(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let s = model.set(r.set);
    if !s.is_connection() {
        return;
    }
    let plan = &r.plans[r.set];
    let t = r.t();

    let set_cases = s
        .bindings
        .iter()
        .enumerate()
        .map(|(i, b)| {
            (
                format!("case {}:", i),
                vec![Stmt::line(format!(
                    "{} = ({} *) part;",
                    mangle(&b.alias),
                    model.prefix(Some(b.endpoint))
                ))],
            )
        })
        .collect();
    code.method(
        "void",
        &format!("setPart (int i, Part<{}> * part)", t),
        vec![Stmt::Switch {
            subject: "i".into(),
            cases: set_cases,
        }],
    );

    let get_cases = s
        .bindings
        .iter()
        .enumerate()
        .map(|(i, b)| {
            (
                format!("case {}:", i),
                vec![Stmt::line(format!("return {};", mangle(&b.alias)))],
            )
        })
        .collect();
    code.method(
        &format!("Part<{}> *", t),
        "getPart (int i)",
        vec![
            Stmt::Switch {
                subject: "i".into(),
                cases: get_cases,
            },
            Stmt::line("return 0;"),
        ],
    );

    if !plan.accountable_endpoints.is_empty() {
        let cases = plan
            .accountable_endpoints
            .iter()
            .map(|&i| {
                let ac = AccountableConnection {
                    connection: r.set,
                    binding: i,
                };
                (
                    format!("case {}:", i),
                    vec![Stmt::line(format!(
                        "return {}->{};",
                        mangle(&s.bindings[i].alias),
                        count_name(model, &ac)
                    ))],
                )
            })
            .collect();
        code.method(
            "int",
            "getCount (int i)",
            vec![
                Stmt::Switch {
                    subject: "i".into(),
                    cases,
                },
                Stmt::line("return 0;"),
            ],
        );
    }

    let rc = r.in_phase(Phase::Connect);
    if plan.has_project {
        let mut cases = Vec::new();
        for (i, b) in s.bindings.iter().enumerate() {
            let Some(v) = model.find(r.set, &format!("{}.$project", b.alias), 0) else {
                continue;
            };
            let mut body = compute_temporaries(&rc, &[v]);
            if rc.model.var(v).is_member() {
                body.extend(multiconditional(&rc, v));
            }
            body.push(Stmt::line(format!("xyz = {};", rc.value(v))));
            cases.push((format!("case {}:", i), body));
        }
        code.method(
            "void",
            &format!("getProject (int i, MatrixFixed<{},3,1> & xyz)", t),
            vec![Stmt::Switch {
                subject: "i".into(),
                cases,
            }],
        );
    }

    if let Some(p) = plan.p {
        let var = model.var(p);
        if !var.equations.is_empty() {
            let mut body = compute_temporaries(&rc, &[p]);
            if var.is_member() {
                body.push(Stmt::line(format!("{} {};", rc.type_name(p), rc.name(p))));
                body.extend(multiconditional(&rc, p));
                body.push(Stmt::line(format!("return {};", rc.name(p))));
            } else {
                body.push(Stmt::line(format!("return {};", rc.value(p))));
            }
            code.method(t, "getP ()", body);
        }
    }
}

// ── Population side ─────────────────────────────────────────────────────────

/// Search parameter accessors of a nearest-neighbor connection population.
fn parameter_accessor(r: &Renderer<'_, '_>, code: &mut ClassCode, parameter: &str, ret: &str, method: &str) {
    let model = r.model;
    let mut cases = Vec::new();
    for (i, b) in model.set(r.set).bindings.iter().enumerate() {
        let Some(v) = model.find(r.set, &format!("{}.{}", b.alias, parameter), 0) else {
            continue;
        };
        let mut body = compute_temporaries(r, &[v]);
        let value = if ret == "int" {
            format!("(int) {}", r.value(v))
        } else {
            r.value(v)
        };
        body.push(Stmt::line(format!("return {};", value)));
        cases.push((format!("case {}:", i), body));
    }
    if cases.is_empty() {
        return;
    }
    code.method(
        ret,
        &format!("{} (int i)", method),
        vec![
            Stmt::Switch {
                subject: "i".into(),
                cases,
            },
            Stmt::line("return 0;"),
        ],
    );
}

pub fn population_methods(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let s = model.set(r.set);
    if !s.is_connection() {
        return;
    }
    let t = r.t();
    let ret = format!("ConnectIterator<{}> *", t);

    if let Some(matrix) = &s.matrix {
        let mut body = vec![Stmt::line(format!(
            "MatrixInput<{}> * matrix = matrixHelper<{}> (\"{}\"{});",
            t,
            t,
            matrix.file.replace('\\', "\\\\").replace('"', "\\\""),
            if r.fixed() { ", 0" } else { "" }
        ))];
        for (name, index) in [("rows", matrix.rows), ("columns", matrix.columns)] {
            let b = &s.bindings[index];
            let population = endpoint_population(r, r.set, &b.resolution, false);
            body.push(Stmt::line(format!(
                "ConnectPopulation<{}> * {} = new ConnectPopulation<{}> ({}, {});",
                t,
                name,
                t,
                index,
                candidates(r, b.endpoint, &population)
            )));
        }
        body.push(Stmt::line(format!(
            "return new ConnectMatrix<{}> (rows, columns, matrix->getIterator (), this);",
            t
        )));
        code.method(&ret, "getIterators ()", body);
        code.method("int", "mapIndex (int i, int rc)", vec![Stmt::line("return rc;")]);
    } else if is_nn(model, r.set) {
        code.method(&ret, "getIterators ()", iterator_list(r, r.set, false, true));
        parameter_accessor(r, code, "$k", "int", "getK");
        parameter_accessor(r, code, "$radius", t, "getRadius");
    } else if let Some(k) = holder_index(model, r.set) {
        code.method(
            &ret,
            "getIterators ()",
            vec![Stmt::line(format!("return container->getIterators{} ();", k))],
        );
    }

    parameter_accessor(r, code, "$max", "int", "getMax");
    parameter_accessor(r, code, "$min", "int", "getMin");
}
