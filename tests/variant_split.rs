//! Variant splitting and automatic dependency re-pointing.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::Lazy;

use modgraph::{
    BottomUpContext, DependencyTag, EngineError, Module, ModuleGraph, Pipeline, TagRef, VariantId,
    Variation,
};

#[derive(Debug)]
struct LinkTag;
impl DependencyTag for LinkTag {}

static LINK: Lazy<TagRef> = Lazy::new(|| Arc::new(LinkTag));

#[derive(Clone, Default)]
struct TestModule {
    deps: Vec<&'static str>,
}

impl Module for TestModule {
    fn deps_mutator(&mut self, ctx: &mut BottomUpContext<'_>) {
        for dep in self.deps.clone() {
            ctx.add_dependency(&LINK, &[dep]);
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
        deps: deps.to_vec(),
    })
}

fn dep_targets(graph: &ModuleGraph, v: VariantId) -> Vec<VariantId> {
    graph.variant(v).concrete_deps().map(|(_, t)| t).collect()
}

#[test]
fn split_repoints_edges_between_matching_siblings() {
    let mut graph = ModuleGraph::new();
    graph.add_module("a", module(&["b"])).unwrap();
    graph.add_module("b", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("abi", |c| {
            c.create_variations(&["x", "y"]);
        });
    });
    pipeline.run(&mut graph).unwrap();

    for variation in ["x", "y"] {
        let a = graph.find_variant("a", &[("abi", variation)]).unwrap();
        let b = graph.find_variant("b", &[("abi", variation)]).unwrap();
        assert_eq!(
            dep_targets(&graph, a),
            vec![b],
            "a.{variation} must depend only on b.{variation}"
        );
    }
}

#[test]
fn alias_repoints_presplit_edges_at_pass_end() {
    let mut graph = ModuleGraph::new();
    graph.add_module("app", module(&[])).unwrap();
    graph.add_module("m", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("kind", |c| {
            // `app` is visited first and records its edge against the
            // pre-split identity of `m`.
            match c.module_name().as_str() {
                "app" => {
                    c.add_dependency(&LINK, &["m"]);
                }
                "m" => {
                    c.create_variations(&["lib", "bin"]);
                    c.alias_variation("lib");
                }
                _ => unreachable!(),
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    let app = graph.variants_of("app")[0].id();
    let m_lib = graph.find_variant("m", &[("kind", "lib")]).unwrap();
    assert_eq!(dep_targets(&graph, app), vec![m_lib]);
}

#[test]
fn created_alias_resolves_a_synthetic_variation_name() {
    let mut graph = ModuleGraph::new();
    graph.add_module("consumer", module(&[])).unwrap();
    graph.add_module("lib", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("kind", |c| {
            if c.module_name() == "lib" {
                c.create_variations(&["impl32", "impl64"]);
                c.create_alias_variation("default", "impl64");
            }
        });
    });
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("wire", |c| {
            if c.module_name() == "consumer" {
                c.add_variation_dependencies(
                    &[Variation::new("kind", "default")],
                    &LINK,
                    &["lib"],
                );
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    let consumer = graph.variants_of("consumer")[0].id();
    let impl64 = graph.find_variant("lib", &[("kind", "impl64")]).unwrap();
    assert_eq!(dep_targets(&graph, consumer), vec![impl64]);
}

#[test]
fn unresolved_dangling_edge_is_fatal_at_pass_end() {
    let mut graph = ModuleGraph::new();
    graph.add_module("a", module(&["b"])).unwrap();
    graph.add_module("b", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("abi", |c| {
            if c.module_name() == "b" {
                c.create_variations(&["x", "y"]);
            }
        });
    });
    let err = pipeline.run(&mut graph).unwrap_err();
    assert!(
        err.iter()
            .any(|e| matches!(e, EngineError::UnknownVariation { .. })),
        "expected an unknown-variation error, got: {err}"
    );
}

#[test]
fn missing_dependency_is_reported_with_the_originating_module() {
    let mut graph = ModuleGraph::new();
    graph.add_module("a", module(&["ghost"])).unwrap();

    let err = Pipeline::new().run(&mut graph).unwrap_err();
    let found = err.iter().any(|e| {
        matches!(e, EngineError::ModuleNotFound { name, from }
            if name == "ghost" && from.contains('a'))
    });
    assert!(found, "expected a module-not-found error, got: {err}");
}

#[test]
fn default_dependency_variation_catches_unmatched_edges() {
    let mut graph = ModuleGraph::new();
    graph.add_module("a", module(&["b"])).unwrap();
    graph.add_module("b", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    // The default has to be in place before the dependency splits, so it is
    // established one pass ahead of the split.
    pipeline.pre_deps_mutators(|ctx| {
        ctx.bottom_up("prep", |c| {
            if c.module_name() == "a" {
                c.set_default_dependency_variation(Some("y"));
            }
        });
    });
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("abi", |c| {
            if c.module_name() == "b" {
                c.create_variations(&["x", "y"]);
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    let a = graph.variants_of("a")[0].id();
    let b_y = graph.find_variant("b", &[("abi", "y")]).unwrap();
    assert_eq!(dep_targets(&graph, a), vec![b_y]);
}

#[test]
fn set_dependency_variation_overrides_the_default() {
    let mut graph = ModuleGraph::new();
    graph.add_module("a", module(&["b"])).unwrap();
    graph.add_module("b", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("abi", |c| {
            // `b` splits first (it is `a`'s dependency), leaving the edge
            // from `a` dangling; `a` then pins it to the `x` variation.
            match c.module_name().as_str() {
                "a" => c.set_dependency_variation("x"),
                "b" => {
                    c.create_variations(&["x", "y"]);
                }
                _ => unreachable!(),
            };
        });
    });
    pipeline.run(&mut graph).unwrap();

    let a = graph.variants_of("a")[0].id();
    let b_x = graph.find_variant("b", &[("abi", "x")]).unwrap();
    assert_eq!(dep_targets(&graph, a), vec![b_x]);
}

#[test]
fn local_variations_require_an_exact_variant_name() {
    let mut graph = ModuleGraph::new();
    graph.add_module("prebuilt", module(&[])).unwrap();
    graph.add_module("user", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("pick", |c| {
            match c.module_name().as_str() {
                "prebuilt" => {
                    c.create_local_variations(&["v1", "v2"]);
                }
                "user" => {
                    c.add_variation_dependencies(
                        &[Variation::new("pick", "v2")],
                        &LINK,
                        &["prebuilt"],
                    );
                }
                _ => unreachable!(),
            };
        });
    });
    pipeline.run(&mut graph).unwrap();

    let user = graph.variants_of("user")[0].id();
    let targets = dep_targets(&graph, user);
    assert_eq!(targets.len(), 1);
    let picked = graph.variant(targets[0]);
    assert!(picked.variations().is_empty(), "local axes stay non-identity");
    assert_eq!(picked.local_variations()[0].variation, "v2");
}

#[test]
fn far_variation_dependencies_ignore_the_source_breadcrumb() {
    let mut graph = ModuleGraph::new();
    graph.add_module("tool", module(&[])).unwrap();
    graph.add_module("lib", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("abi", |c| {
            if c.module_name() == "lib" {
                c.create_variations(&["x", "y"]);
            }
        });
    });
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("host", |c| {
            if c.module_name() == "tool" {
                // `tool` has no abi variant of its own; a near dependency
                // would dangle, a far one picks the named axis directly.
                c.add_far_variation_dependencies(
                    &[Variation::new("abi", "y")],
                    &LINK,
                    &["lib"],
                );
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    let tool = graph.variants_of("tool")[0].id();
    let lib_y = graph.find_variant("lib", &[("abi", "y")]).unwrap();
    assert_eq!(dep_targets(&graph, tool), vec![lib_y]);
}

#[test]
fn far_dependencies_with_no_axes_pick_the_first_variant() {
    let mut graph = ModuleGraph::new();
    graph.add_module("tool", module(&[])).unwrap();
    graph.add_module("lib", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("abi", |c| {
            if c.module_name() == "lib" {
                c.create_variations(&["x", "y"]);
            }
        });
    });
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("host", |c| {
            if c.module_name() == "tool" {
                c.add_far_variation_dependencies(&[], &LINK, &["lib"]);
            }
        });
    });
    pipeline.run(&mut graph).unwrap();

    let tool = graph.variants_of("tool")[0].id();
    let lib_x = graph.find_variant("lib", &[("abi", "x")]).unwrap();
    assert_eq!(dep_targets(&graph, tool), vec![lib_x]);
}

#[test]
fn breadcrumbs_record_every_split_in_order() {
    let mut graph = ModuleGraph::new();
    graph.add_module("m", module(&[])).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.pre_deps_mutators(|ctx| {
        ctx.bottom_up("first", |c| {
            c.create_variations(&["a"]);
        });
    });
    pipeline.post_deps_mutators(|ctx| {
        ctx.bottom_up("second", |c| {
            c.create_variations(&["b", "c"]);
        });
    });
    pipeline.run(&mut graph).unwrap();

    let variants = graph.variants_of("m");
    assert_eq!(variants.len(), 2);
    for v in variants {
        assert_eq!(v.common().debug_mutators, vec!["first", "second"]);
        assert_eq!(v.common().debug_variations.len(), 2);
        assert_eq!(v.common().debug_variations[0], "a");
    }
}
