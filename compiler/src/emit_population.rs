// emit_population.rs — The population class of an equation set
//
// One population object exists per container instance (one in total for
// the root, held by `Wrapper`). It owns the set's global variables, creates
// instances, keeps the index and tracking tables that connections iterate,
// and resizes itself when `$n` changes.
//
// Preconditions: plans are built; the renderer is positioned at the set
//   with `global` set.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use crate::attr::Attr;
use crate::codegen::{
    clear_flag, commit_external, init_variables, integrate_body, integrator_fields,
    integrator_init, integrator_methods, integrator_release, population_integrates,
    population_updates, set_flag, test_flag, update_variables,
};
use crate::cpp::{ClassCode, Stmt};
use crate::emit_connect;
use crate::equations::{clear_accumulator, zero};
use crate::id::VarId;
use crate::render::Renderer;

/// Expression giving the initial population size.
fn initial_n(r: &Renderer<'_, '_>) -> String {
    let plan = &r.plans[r.set];
    let Some(n) = plan.n else {
        return "1".to_string();
    };
    let var = r.model.var(n);
    if var.equations.is_empty() {
        "1".to_string()
    } else if var.has(Attr::Constant) {
        r.value(n)
    } else {
        r.name(n)
    }
}

/// `container->path (result); result += ".";` unless the container is the root.
pub fn container_prefix(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    match r.model.set(r.set).container {
        Some(c) if !r.model.is_root(c) => vec![
            Stmt::line("container->path (result);"),
            Stmt::line("result += \".\";"),
        ],
        _ => Vec::new(),
    }
}

/// Fill output column-name slots from the object's path.
pub fn column_names(r: &Renderer<'_, '_>, columns: &[(String, VarId)], has_path: bool) -> Vec<Stmt> {
    let mut out = Vec::new();
    for (slot, v) in columns {
        let name = r.model.var(*v).name_string();
        if has_path {
            out.push(Stmt::line(format!("path ({});", slot)));
            out.push(Stmt::line(format!("{} += \".{}\";", slot, name)));
        } else {
            out.push(Stmt::line(format!("{} = \"{}\";", slot, name)));
        }
    }
    out
}

pub fn population_class(r: &Renderer<'_, '_>) -> ClassCode {
    let model = r.model;
    let set = r.set;
    let plan = &r.plans[set];
    let global = &plan.global;
    let t = r.t();
    let instance = model.prefix(Some(set));
    let name = format!("{}_Population", instance);
    let mut code = ClassCode::new(name, Some(format!("Population<{}>", t)));

    // ── Fields ──
    code.decl(format!("{} * container", model.prefix(model.set(set).container)));
    if plan.singleton {
        code.decl(format!("{} instance", instance));
    }
    if plan.track_instances {
        code.decl(format!("std::vector<Part<{}> *> instances", t));
    }
    if plan.has_index {
        code.decl("int nextIndex");
    }
    let resizes = plan.can_resize && plan.can_grow_or_die;
    if resizes {
        code.decl("int oldN");
    }
    for &v in &global.members {
        code.decl(format!("{} {}", r.type_name(v), r.name(v)));
    }
    for &v in &global.buffered_external {
        code.decl(format!("{} {}", r.type_name(v), r.next_name(v)));
    }
    for (slot, _) in &global.columns {
        code.decl(format!("String {}", slot));
    }
    if let Some(ty) = global.flag_type {
        code.decl(format!("{} flags", ty));
    }
    integrator_fields(r, global, &mut code);
    code.blank();

    // ── Lifetime ──
    let mut ctor = integrator_init(global);
    if plan.has_index {
        ctor.push(Stmt::line("nextIndex = 0;"));
    }
    if resizes {
        ctor.push(Stmt::line("oldN = 0;"));
    }
    for &v in &global.members {
        ctor.push(zero(r, v, &r.name(v)));
    }
    for &v in &global.buffered_external {
        let next = r.next_name(v);
        ctor.push(clear_accumulator(r, v, &next).unwrap_or_else(|| zero(r, v, &next)));
    }
    if global.flag_type.is_some() {
        ctor.push(Stmt::line("flags = 0;"));
    }
    if global.need_ctor {
        code.constructor(ctor);
    }
    if global.need_dtor {
        code.destructor(integrator_release(global));
    }

    // ── Instance bookkeeping ──
    if !plan.singleton {
        code.method(
            &format!("Part<{}> *", t),
            "create ()",
            vec![
                Stmt::line(format!("{} * p = new {};", instance, instance)),
                Stmt::line("p->container = container;"),
                Stmt::line("return p;"),
            ],
        );
    }

    let local_ft = plan.local.flag_type.unwrap_or("bool");
    let global_ft = global.flag_type.unwrap_or("bool");
    if !plan.singleton && (plan.has_index || plan.newborn.is_some()) {
        let mut add = vec![Stmt::line(format!("{} * p = ({} *) part;", instance, instance))];
        if plan.has_index {
            add.push(Stmt::line("if (p->__24index < 0) p->__24index = nextIndex++;"));
        }
        if plan.track_instances {
            add.push(Stmt::line(
                "if (p->__24index >= (int) instances.size ()) instances.resize (p->__24index + 1);",
            ));
            add.push(Stmt::line("instances[p->__24index] = p;"));
        }
        if let (Some(newborn), Some(clear)) = (plan.newborn, plan.clear_new) {
            add.push(set_flag("p->", local_ft, newborn));
            add.push(Stmt::when(
                format!("!({})", test_flag("", global_ft, clear)),
                vec![
                    set_flag("", global_ft, clear),
                    Stmt::line(format!("{}.clearNew (this);", r.simulator())),
                ],
            ));
        }
        add.push(Stmt::line(format!("Population<{}>::add (part);", t)));
        code.method("void", &format!("add (Part<{}> * part)", t), add);

        let mut remove = Vec::new();
        if plan.track_instances {
            remove.push(Stmt::line(format!("{} * p = ({} *) part;", instance, instance)));
            remove.push(Stmt::line("instances[p->__24index] = 0;"));
        }
        remove.push(Stmt::line(format!("Population<{}>::remove (part);", t)));
        code.method("void", &format!("remove (Part<{}> * part)", t), remove);
    }

    if let (Some(newborn), Some(clear)) = (plan.newborn, plan.clear_new) {
        let mut body = vec![clear_flag("", global_ft, clear)];
        if plan.singleton {
            body.push(clear_flag("instance.", local_ft, newborn));
        }
        if plan.track_instances {
            body.push(Stmt::block(
                format!("for (Part<{}> * q : instances)", t),
                vec![Stmt::when(
                    "q",
                    vec![clear_flag(&format!("(({} *) q)->", instance), local_ft, newborn)],
                )],
            ));
        }
        code.method("void", "clearNew ()", body);
    }

    // ── Simulation phases ──
    let mut init = init_variables(r, global);
    init.extend(column_names(r, &global.columns, global.need_path));
    if model.set(set).is_connection() {
        init.push(Stmt::line(format!("{}.connect (this);", r.simulator())));
    } else if plan.singleton {
        init.push(Stmt::line("instance.enterSimulation ();"));
        init.push(Stmt::line("container->getEvent ()->enqueue (&instance);"));
        init.push(Stmt::line("instance.init ();"));
    } else {
        init.push(Stmt::line(format!("resize (max (0, (int) {}));", initial_n(r))));
    }
    code.method("void", "init ()", init);

    if population_integrates(plan) {
        code.method(
            "void",
            "integrate ()",
            integrate_body(r, global, &format!("{}.currentEvent->dt", r.simulator())),
        );
    }
    if population_updates(plan) {
        code.method("void", "update ()", update_variables(r, global));
    }
    if global.need_finalize {
        let mut finalize = commit_external(r, &global.buffered_external);
        if let (true, Some(n)) = (plan.can_resize, plan.n) {
            let n = r.name(n);
            finalize.push(Stmt::line(format!("int floorN = max (0, (int) {});", n)));
            let sim = r.simulator();
            if plan.can_grow_or_die {
                finalize.push(Stmt::when_else(
                    "floorN != oldN",
                    vec![Stmt::line(format!("{}.resize (this, floorN);", sim))],
                    vec![Stmt::line(format!("{}.resize (this, -1);", sim))],
                ));
            } else {
                finalize.push(Stmt::when(
                    "n != floorN",
                    vec![Stmt::line(format!("{}.resize (this, floorN);", sim))],
                ));
            }
        }
        finalize.push(Stmt::line("return true;"));
        code.method("bool", "finalize ()", finalize);
    }

    if resizes {
        if let Some(n) = plan.n {
            let n = r.name(n);
            code.method(
                "void",
                "resize (int n)",
                vec![
                    Stmt::when_else(
                        "n >= 0",
                        vec![Stmt::line(format!("Population<{}>::resize (n);", t))],
                        vec![Stmt::line(format!("{} = this->n;", n))],
                    ),
                    Stmt::line(format!("oldN = (int) {};", n)),
                ],
            );
        }
    }

    if global.need_path {
        let mut path = container_prefix(r);
        path.push(Stmt::line(format!(
            "result += \"{}\";",
            model.set(set).name.replace('"', "\\\"")
        )));
        code.method("void", "path (String & result)", path);
    }

    integrator_methods(r, global, &mut code);
    emit_connect::population_methods(r, &mut code);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::codegen::CodegenOptions;
    use crate::cpp::Printer;
    use crate::document;
    use crate::id::SetId;
    use crate::model::Model;
    use crate::plan::build_plans;
    use crate::render::Scratch;
    use crate::resolve::resolve;

    fn analyzed(json: &str) -> Model {
        let mut m = Model::from_document(&document::from_str(json).unwrap()).unwrap();
        resolve(&mut m).unwrap();
        analyze(&mut m, false).unwrap();
        m
    }

    fn part(m: &Model, name: &str) -> SetId {
        m.sets.iter().find(|s| s.name == name).unwrap().id
    }

    fn body(code: &ClassCode, signature: &str) -> String {
        let f = code
            .definitions
            .iter()
            .find(|f| f.signature == signature)
            .unwrap_or_else(|| panic!("missing {}", signature));
        let mut p = Printer::new();
        p.stmts(&f.body);
        p.finish()
    }

    fn has(code: &ClassCode, signature: &str) -> bool {
        code.definitions.iter().any(|f| f.signature == signature)
    }

    #[test]
    fn constant_n_resizes_at_init() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "$n", "equations": ["5"]},
                {"name": "x'", "equations": ["-x"]}
            ]}]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let a = part(&m, "A");
        let r = Renderer::new(&m, &plans, &options, &scratch).at(a, true);
        let code = population_class(&r);
        assert_eq!(code.name(), "_M__A_Population");
        assert_eq!(code.class.base.as_deref(), Some("Population<float>"));
        assert_eq!(body(&code, "void _M__A_Population::init ()"), "resize (max (0, (int) 5));\n");
        assert_eq!(
            body(&code, "Part<float> * _M__A_Population::create ()"),
            "_M__A * p = new _M__A;\np->container = container;\nreturn p;\n"
        );
        assert!(!has(&code, "void _M__A_Population::resize (int n)"));
    }

    #[test]
    fn constructor_only_when_it_has_work() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "$n", "equations": ["5"]}]},
                {"name": "B", "variables": [
                    {"name": "$n", "equations": ["5"]},
                    {"name": "g", "attributes": ["global"], "equations": ["$t"]}
                ]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let (a, b) = (part(&m, "A"), part(&m, "B"));
        let r = Renderer::new(&m, &plans, &options, &scratch);
        assert!(!plans[a].global.need_ctor);
        let plain = population_class(&r.at(a, true));
        assert!(!has(&plain, "_M__A_Population::_M__A_Population ()"));
        assert!(plans[b].global.need_ctor);
        let with_global = population_class(&r.at(b, true));
        assert_eq!(body(&with_global, "_M__B_Population::_M__B_Population ()"), "_g = 0;\n");
    }

    #[test]
    fn singleton_population_starts_its_instance() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "x", "equations": ["$t"]}
            ]}]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let a = part(&m, "A");
        let r = Renderer::new(&m, &plans, &options, &scratch).at(a, true);
        let code = population_class(&r);
        assert!(code.class.members.contains(&crate::cpp::Member::Decl("_M__A instance".into())));
        assert_eq!(
            body(&code, "void _M__A_Population::init ()"),
            "instance.enterSimulation ();\ncontainer->getEvent ()->enqueue (&instance);\ninstance.init ();\n"
        );
        assert!(!has(&code, "Part<float> * _M__A_Population::create ()"));
    }

    #[test]
    fn varying_n_checks_size_each_step() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "$n", "equations": ["$t * 10"]}
            ]}]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let a = part(&m, "A");
        let r = Renderer::new(&m, &plans, &options, &scratch).at(a, true);
        let code = population_class(&r);
        let finalize = body(&code, "bool _M__A_Population::finalize ()");
        assert!(finalize.contains("int floorN = max (0, (int) __24n);"));
        assert!(finalize.contains("if (n != floorN)"));
        assert!(finalize.contains("Simulator<float>::instance.resize (this, floorN);"));
        assert!(finalize.ends_with("return true;\n"));
    }

    #[test]
    fn connected_population_tracks_and_clears_newborns() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "$n", "equations": ["3"]}]},
                {"name": "C", "connect": [{"alias": "a", "endpoint": "A"}, {"alias": "b", "endpoint": "A"}]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let (a, c) = (part(&m, "A"), part(&m, "C"));
        let r = Renderer::new(&m, &plans, &options, &scratch);
        let code = population_class(&r.at(a, true));
        let add = body(&code, "void _M__A_Population::add (Part<float> * part)");
        assert!(add.contains("if (p->__24index < 0) p->__24index = nextIndex++;"));
        assert!(add.contains("instances[p->__24index] = p;"));
        assert!(add.contains("Simulator<float>::instance.clearNew (this);"));
        assert!(add.ends_with("Population<float>::add (part);\n"));
        assert!(has(&code, "void _M__A_Population::clearNew ()"));

        let connection = population_class(&r.at(c, true));
        assert_eq!(
            body(&connection, "void _M__C_Population::init ()"),
            "Simulator<float>::instance.connect (this);\n"
        );
    }
}
