//! Pass-barrier resolution.
//!
//! Within one pass the ordering contract is: aliases first, then the
//! re-points performed by the splits themselves, then replacement rules,
//! then buffered reverse edges. Renames and synthesized modules land last.
//! Anything still dangling after that is an error naming the originating
//! module.

use crate::error::EngineError;
use crate::tag::TagRef;
use crate::variant::{overlay, ModuleId, VariantId, VariationMap};

use super::{describe_variations, DepEdge, DepTarget, ModuleGraph};

/// Buffered `add_reverse_dependency`: at the barrier the destination gains
/// an edge onto `target`, the variant that requested the reversal.
pub(crate) struct PendingReverse {
    pub(crate) dest: String,
    pub(crate) target: VariantId,
    pub(crate) tag: TagRef,
}

/// Predicate over `(tag, source variant, target variant)` for conditional
/// replacement rules.
pub(crate) type ReplacePredicate =
    Box<dyn Fn(&TagRef, VariantId, VariantId) -> bool + Send + Sync>;

/// Buffered `replace_dependencies[_if]`: every edge onto the identical
/// variant of the named module is re-targeted at `with`.
pub(crate) struct PendingReplace {
    pub(crate) name: String,
    pub(crate) with: VariantId,
    pub(crate) predicate: Option<ReplacePredicate>,
}

impl ModuleGraph {
    /// Runs every barrier step. Problems are accumulated rather than
    /// short-circuited so independent mistakes surface together.
    pub(crate) fn finish_pass(&mut self, errors: &mut Vec<EngineError>) {
        self.resolve_dangling(errors);
        self.apply_replacements(errors);
        self.apply_reverse_deps(errors);
        self.apply_renames(errors);
        self.materialize_new_modules(errors);
        self.clear_split_records();
    }

    pub(crate) fn variant_desc(&self, v: VariantId) -> String {
        let name = self.variant_module_name(v);
        let variations = describe_variations(self.variant(v).variations());
        if variations.is_empty() {
            name.to_string()
        } else {
            format!("{name}{{{variations}}}")
        }
    }

    fn resolve_dangling(&mut self, errors: &mut Vec<EngineError>) {
        let mut updates: Vec<(usize, usize, VariantId)> = Vec::new();
        for vi in 0..self.variants.len() {
            if !self.variants[vi].alive {
                continue;
            }
            let source_map = self.variants[vi].variation_map();
            let from = self.variant_desc(self.variants[vi].id);
            for (ei, edge) in self.variants[vi].deps.iter().enumerate() {
                let DepTarget::Dangling {
                    name,
                    explicit,
                    far,
                } = &edge.target
                else {
                    continue;
                };
                match self.module_id(name) {
                    None => errors.push(EngineError::ModuleNotFound {
                        name: name.clone(),
                        from: from.clone(),
                    }),
                    Some(mid) => {
                        let requested = if *far {
                            explicit.clone()
                        } else {
                            overlay(&source_map, explicit)
                        };
                        match self.find_matching(mid, &requested, explicit, *far) {
                            Some(target) => updates.push((vi, ei, target)),
                            None => errors.push(EngineError::UnknownVariation {
                                from: from.clone(),
                                module: name.clone(),
                                requested: render_map(&requested),
                            }),
                        }
                    }
                }
            }
        }
        for (vi, ei, target) in updates {
            self.variants[vi].deps[ei].target = DepTarget::Concrete(target);
        }
    }

    fn apply_replacements(&mut self, errors: &mut Vec<EngineError>) {
        let pending = std::mem::take(&mut self.pending_replace);
        for rule in pending {
            let with = self.current_descendant(rule.with);
            let Some(mid) = self.module_id(&rule.name) else {
                errors.push(EngineError::ModuleNotFound {
                    name: rule.name,
                    from: self.variant_desc(with),
                });
                continue;
            };
            let with_map = self.variants[with.index()].variation_map();
            let victim = self.modules[mid.index()]
                .variants
                .iter()
                .map(|v| &self.variants[v.index()])
                .find(|v| v.alive && v.variation_map() == with_map)
                .map(|v| v.id);
            let Some(victim) = victim else {
                errors.push(EngineError::UnknownVariation {
                    from: self.variant_desc(with),
                    module: rule.name,
                    requested: render_map(&with_map),
                });
                continue;
            };
            if victim == with {
                continue;
            }
            for u in 0..self.variants.len() {
                if !self.variants[u].alive || self.variants[u].id == with {
                    continue;
                }
                let source = self.variants[u].id;
                for e in 0..self.variants[u].deps.len() {
                    let DepTarget::Concrete(t) = self.variants[u].deps[e].target else {
                        continue;
                    };
                    if t != victim {
                        continue;
                    }
                    let keep = match &rule.predicate {
                        Some(p) => p(&self.variants[u].deps[e].tag, source, victim),
                        None => true,
                    };
                    if keep {
                        self.variants[u].deps[e].target = DepTarget::Concrete(with);
                    }
                }
            }
        }
    }

    /// Reverse dependencies are applied sorted by destination module name
    /// and then by the name of the module gaining the edge, so the order a
    /// destination observes is independent of worker timing.
    fn apply_reverse_deps(&mut self, errors: &mut Vec<EngineError>) {
        let pending = std::mem::take(&mut self.pending_reverse);
        let mut keyed: Vec<(String, String, PendingReverse)> = pending
            .into_iter()
            .map(|p| {
                let target = self.current_descendant(p.target);
                let target_name = self.variant_module_name(target).to_string();
                (
                    p.dest.clone(),
                    target_name,
                    PendingReverse { target, ..p },
                )
            })
            .collect();
        keyed.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        for (dest, _, p) in keyed {
            let Some(mid) = self.module_id(&dest) else {
                errors.push(EngineError::ModuleNotFound {
                    name: dest,
                    from: self.variant_desc(p.target),
                });
                continue;
            };
            let requested = self.variants[p.target.index()].variation_map();
            let Some(dv) = self.find_matching(mid, &requested, &VariationMap::new(), false) else {
                errors.push(EngineError::UnknownVariation {
                    from: self.variant_desc(p.target),
                    module: dest,
                    requested: render_map(&requested),
                });
                continue;
            };
            self.variants[dv.index()].deps.push(DepEdge {
                tag: p.tag,
                target: DepTarget::Concrete(p.target),
            });
        }
    }

    fn apply_renames(&mut self, errors: &mut Vec<EngineError>) {
        let mut renames = Vec::new();
        for (i, module) in self.modules.iter_mut().enumerate() {
            if let Some(new) = module.pending_rename.take() {
                renames.push((i, module.name.clone(), new));
            }
        }
        for (_, old, _) in &renames {
            self.names.remove(old);
        }
        for (i, old, new) in renames {
            if self.names.contains_key(&new) {
                errors.push(EngineError::DuplicateModuleName(new));
                self.names.insert(old.clone(), ModuleId(i as u32));
            } else {
                self.modules[i].name = new.clone();
                self.names.insert(new, ModuleId(i as u32));
            }
        }
    }

    fn materialize_new_modules(&mut self, errors: &mut Vec<EngineError>) {
        let pending = std::mem::take(&mut self.pending_modules);
        for (name, logic) in pending {
            if let Err(err) = self.add_module(name, logic) {
                errors.push(err);
            }
        }
    }
}

fn render_map(map: &VariationMap) -> String {
    map.iter()
        .map(|(axis, value)| format!("{axis}:{value}"))
        .collect::<Vec<_>>()
        .join(",")
}
