//! Phase ordering, barriers, and the conversion universe.

use std::any::Any;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use modgraph::{
    BottomUpContext, ConversionDescriptor, DependencyTag, EngineError, Module, ModuleGraph,
    Pipeline, RegisterMutatorFn, TagRef, TopDownContext,
};

#[derive(Debug)]
struct DepTag;
impl DependencyTag for DepTag {}

static DEP: Lazy<TagRef> = Lazy::new(|| Arc::new(DepTag));

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn logged(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Clone, Default)]
struct TestModule {
    enabled: bool,
    deps: Vec<&'static str>,
}

impl Module for TestModule {
    fn enabled(&self) -> bool {
        self.enabled
    }
    fn deps_mutator(&mut self, ctx: &mut BottomUpContext<'_>) {
        for dep in self.deps.clone() {
            ctx.add_dependency(&DEP, &[dep]);
        }
    }
    fn clone_variant(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn module(deps: &[&'static str]) -> Box<dyn Module> {
    Box::new(TestModule {
        enabled: true,
        deps: deps.to_vec(),
    })
}

fn disabled_module(deps: &[&'static str]) -> Box<dyn Module> {
    Box::new(TestModule {
        enabled: false,
        deps: deps.to_vec(),
    })
}

#[test]
fn phases_run_in_fixed_order_with_registration_order_within_a_phase() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    let log = new_log();
    let mut pipeline = Pipeline::new();

    let l = log.clone();
    pipeline.post_deps_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("post-a", move |_| l.lock().unwrap().push("post-a".into()));
    });
    let l = log.clone();
    pipeline.pre_arch_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("pre-arch-a", move |_| l.lock().unwrap().push("pre-arch-a".into()));
    });
    let l = log.clone();
    pipeline.final_deps_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("final-a", move |_| l.lock().unwrap().push("final-a".into()));
    });
    let l = log.clone();
    pipeline.pre_deps_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("pre-deps-a", move |_| l.lock().unwrap().push("pre-deps-a".into()));
    });
    let l = log.clone();
    pipeline.post_deps_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("post-b", move |_| l.lock().unwrap().push("post-b".into()));
    });

    pipeline.run(&mut graph).unwrap();
    assert_eq!(
        logged(&log),
        vec!["pre-arch-a", "pre-deps-a", "post-a", "post-b", "final-a"]
    );
}

#[test]
fn rename_is_invisible_within_its_pass_and_visible_in_the_next() {
    let mut graph = ModuleGraph::new();
    graph.add_module("old", module(&[])).unwrap();
    graph.add_module("probe", module(&[])).unwrap();

    let log = new_log();
    let mut pipeline = Pipeline::new();

    let l = log.clone();
    pipeline.post_deps_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("renamer", move |c| {
            // `old` is visited before `probe`, so the probe observes the
            // lookup state after the rename request.
            match c.module_name().as_str() {
                "old" => c.rename("fresh"),
                "probe" => {
                    l.lock().unwrap().push(format!(
                        "same-pass old={} fresh={}",
                        c.module_exists("old"),
                        c.module_exists("fresh")
                    ));
                }
                _ => unreachable!(),
            }
        });
    });
    let l = log.clone();
    pipeline.post_deps_mutators(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("checker", move |c| {
            if c.module_name() == "probe" {
                l.lock().unwrap().push(format!(
                    "next-pass old={} fresh={}",
                    c.module_exists("old"),
                    c.module_exists("fresh")
                ));
                c.add_dependency(&DEP, &["fresh"]);
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    assert_eq!(
        logged(&log),
        vec!["same-pass old=true fresh=false", "next-pass old=false fresh=true"]
    );
    let probe = graph.variants_of("probe")[0].id();
    let fresh = graph.variants_of("fresh")[0].id();
    let targets: Vec<_> = graph.variant(probe).concrete_deps().map(|(_, t)| t).collect();
    assert_eq!(targets, vec![fresh]);
    // The breadcrumb name tracks the rename.
    assert_eq!(graph.variants_of("fresh")[0].common().debug_name, "fresh");
}

#[test]
fn renaming_twice_in_one_pass_is_fatal() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("renamer", |c| {
            c.rename("first");
            c.rename("second");
        });
    });
    let err = pipeline.run(&mut graph).unwrap_err();
    assert!(err
        .iter()
        .any(|e| matches!(e, EngineError::DuplicateRename { .. })));
}

#[test]
fn created_modules_become_visible_in_the_next_pass() {
    let mut graph = ModuleGraph::new();
    graph.add_module("seed", module(&[])).unwrap();
    graph.add_module("lib", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.pre_arch_mutators(|ctx| {
        ctx.top_down("synthesize", |c| {
            if c.module_name() == "seed" {
                c.create_module("generated", module(&["lib"]));
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    // The synthesized module went through the deps pass like any other.
    let generated = graph.variants_of("generated");
    assert_eq!(generated.len(), 1);
    let lib = graph.variants_of("lib")[0].id();
    let targets: Vec<_> = graph
        .variant(generated[0].id())
        .concrete_deps()
        .map(|(_, t)| t)
        .collect();
    assert_eq!(targets, vec![lib]);
}

#[test]
fn variant_creation_in_final_deps_is_fatal_and_leaves_the_graph_unchanged() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();
    let before = graph.debug_snapshot();

    let mut pipeline = Pipeline::new();
    pipeline.final_deps_mutators(|ctx| {
        ctx.bottom_up("late-split", |c| {
            c.create_variations(&["x", "y"]);
        });
    });
    let err = pipeline.run(&mut graph).unwrap_err();

    assert!(err
        .iter()
        .any(|e| matches!(e, EngineError::PhaseViolation { .. })));
    assert_eq!(graph.variants_of("m").len(), 1);
    assert_eq!(graph.debug_snapshot(), before);
}

#[test]
fn disabled_modules_are_skipped_by_the_deps_mutators_but_stay_in_the_graph() {
    let mut graph = ModuleGraph::new();
    graph.add_module("dead", disabled_module(&["lib"])).unwrap();
    graph.add_module("lib", module(&[])).unwrap();

    Pipeline::new().run(&mut graph).unwrap();

    let dead = graph.variants_of("dead");
    assert_eq!(dead.len(), 1, "disabled modules remain in the graph");
    assert_eq!(dead[0].concrete_deps().count(), 0, "deps hook must not run");
}

#[test]
fn mutator_errors_accumulate_to_a_single_barrier_report() {
    let mut graph = ModuleGraph::new();
    graph.add_module("a", module(&["ghost1"])).unwrap();
    graph.add_module("b", module(&["ghost2"])).unwrap();

    let err = Pipeline::new().run(&mut graph).unwrap_err();
    assert_eq!(err.len(), 2, "independent problems report together: {err}");
}

#[test]
fn conversion_universe_suffixes_every_mutator_name() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    let log = new_log();
    let l = log.clone();
    let pre_arch: Vec<RegisterMutatorFn> = vec![Box::new(move |ctx| {
        let l = l.clone();
        ctx.bottom_up("custom", move |c| {
            l.lock().unwrap().push(c.mutator_name().to_string());
        });
    })];

    let l = log.clone();
    Pipeline::new()
        .run_conversion(&mut graph, &pre_arch, move |c| {
            l.lock().unwrap().push(c.mutator_name().to_string());
        })
        .unwrap();

    assert_eq!(logged(&log), vec!["custom_conv", "conversion_conv"]);
}

#[test]
fn conversion_targets_attach_to_the_module() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    Pipeline::new()
        .run_conversion(&mut graph, &[], |c| {
            let name = c.module_name();
            c.create_conversion_target(ConversionDescriptor {
                rule_class: "cc_library".into(),
                target_name: name,
                attrs: serde_json::json!({ "srcs": ["m.c"] }),
                restriction: None,
            });
        })
        .unwrap();

    let info = &graph.variants_of("m")[0].common().conversion_info;
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].rule_class, "cc_library");
    assert_eq!(info[0].target_name, "m");
}

#[test]
fn conversion_filter_restricts_emitted_modules() {
    let mut graph = ModuleGraph::new();
    graph.add_module("keep", module(&[])).unwrap();
    graph.add_module("skip", module(&[])).unwrap();

    Pipeline::new()
        .run_conversion_filtered(
            &mut graph,
            &[],
            Arc::new(|c: &TopDownContext<'_>| c.module_name() == "keep"),
            |c| {
                let name = c.module_name();
                c.create_conversion_target(ConversionDescriptor {
                    rule_class: "cc_library".into(),
                    target_name: name,
                    attrs: serde_json::Value::Null,
                    restriction: None,
                });
            },
        )
        .unwrap();

    assert_eq!(graph.variants_of("keep")[0].common().conversion_info.len(), 1);
    assert!(graph.variants_of("skip")[0].common().conversion_info.is_empty());
}

#[test]
fn conversion_targets_are_rejected_outside_conversion_mode() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.top_down("rogue", |c| {
            c.create_conversion_target(ConversionDescriptor {
                rule_class: "cc_library".into(),
                target_name: "m".into(),
                attrs: serde_json::Value::Null,
                restriction: None,
            });
        });
    });
    let err = pipeline.run(&mut graph).unwrap_err();
    assert!(err.iter().any(|e| matches!(e, EngineError::Mutator { .. })));
}

#[test]
fn duplicate_mutator_names_fail_before_any_pass_runs() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.pre_arch_mutators(|ctx| {
        ctx.bottom_up("twice", |_| {});
    });
    pipeline.final_deps_mutators(|ctx| {
        ctx.top_down("twice", |_| {});
    });
    let err = pipeline.run(&mut graph).unwrap_err();
    assert!(err
        .iter()
        .any(|e| matches!(e, EngineError::DuplicateMutatorName(name) if name == "twice")));
}
