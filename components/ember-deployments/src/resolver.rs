use std::collections::BTreeSet;

use crate::builder::BuildContext;
use crate::types::{DeploymentError, ModuleSpecification};

/// Orders a module's futures (including embedded sub-modules) so that
/// every future appears after all futures it depends on. Ties among
/// independent futures are broken by declaration order, so the result
/// is deterministic across runs. Structural errors are reported before
/// any network action can take place.
pub fn resolve(
    ctx: &BuildContext,
    module: &ModuleSpecification,
) -> Result<Vec<String>, DeploymentError> {
    // future_ids already carries the set-union of embedded modules;
    // first occurrence wins so shared sub-modules stay single nodes.
    let mut merged = vec![];
    let mut seen = BTreeSet::new();
    for future_id in module.future_ids.iter() {
        if seen.insert(future_id.clone()) {
            merged.push(future_id.clone());
        }
    }

    for future_id in merged.iter() {
        let spec = match ctx.get_future(future_id) {
            Some(spec) => spec,
            None => {
                return Err(DeploymentError::DanglingReference {
                    future_id: module.name.clone(),
                    missing: future_id.clone(),
                })
            }
        };
        for dependency in spec.dependencies() {
            if !seen.contains(&dependency) {
                return Err(DeploymentError::DanglingReference {
                    future_id: future_id.clone(),
                    missing: dependency,
                });
            }
        }
    }

    let mut ordered = Vec::with_capacity(merged.len());
    let mut emitted: BTreeSet<String> = BTreeSet::new();
    while ordered.len() < merged.len() {
        let mut progressed = false;
        for future_id in merged.iter() {
            if emitted.contains(future_id) {
                continue;
            }
            let spec = ctx
                .get_future(future_id)
                .expect("future presence checked above");
            if spec.dependencies().iter().all(|dep| emitted.contains(dep)) {
                emitted.insert(future_id.clone());
                ordered.push(future_id.clone());
                progressed = true;
                break;
            }
        }
        if !progressed {
            let remaining = merged
                .iter()
                .filter(|id| !emitted.contains(*id))
                .cloned()
                .collect();
            return Err(DeploymentError::CyclicDependency(remaining));
        }
    }

    Ok(ordered)
}
