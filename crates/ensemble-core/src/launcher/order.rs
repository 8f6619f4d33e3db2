use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use ensemble_types::Project;

use crate::error::{Error, Result};

/// Dependency lists keyed by service name.
pub(crate) type DependencyGraph<'a> = BTreeMap<&'a str, &'a [String]>;

/// Order in which `services` and everything they depend on must be started.
///
/// An empty `services` list selects every service of the project. Services
/// whose dependencies are satisfied at the same time start in name order.
///
/// # Errors
///
/// Returns an error if a service or dependency is unknown or the dependencies
/// form a cycle.
pub fn startup_order(project: &Project, services: &[String]) -> Result<Vec<String>> {
    let graph: DependencyGraph<'_> = project
        .services
        .iter()
        .map(|(name, service)| (name.as_str(), service.deps.as_slice()))
        .collect();

    toposort(&graph, services)
}

pub(crate) fn toposort(graph: &DependencyGraph<'_>, services: &[String]) -> Result<Vec<String>> {
    let mut to_process: VecDeque<String> = if services.is_empty() {
        graph.keys().map(|name| (*name).to_owned()).collect()
    } else {
        services.iter().cloned().collect()
    };
    let mut processed = HashSet::with_capacity(graph.len());
    let mut dependents: HashMap<String, Vec<String>> = HashMap::with_capacity(graph.len());
    let mut deps_count: HashMap<String, usize> = HashMap::with_capacity(graph.len());

    while let Some(service_name) = to_process.pop_front() {
        if !processed.insert(service_name.clone()) {
            continue;
        }
        let Some(deps) = graph.get(service_name.as_str()) else {
            return Err(Error::ServiceNotFound(service_name));
        };

        dependents.entry(service_name.clone()).or_default();
        let count = deps_count.entry(service_name.clone()).or_default();

        for dependency in *deps {
            if !graph.contains_key(dependency.as_str()) {
                return Err(Error::ServiceNotFound(dependency.clone()));
            }
            dependents
                .entry(dependency.clone())
                .or_default()
                .push(service_name.clone());
            *count += 1;
            to_process.push_back(dependency.clone());
        }
    }

    let mut ready: Vec<String> = deps_count
        .iter()
        .filter_map(|(s, &c)| (c == 0).then(|| s.clone()))
        .collect();
    ready.sort_unstable_by(|a, b| b.cmp(a));

    let mut result = Vec::with_capacity(deps_count.len());
    // `ready` is kept sorted in reverse so the smallest name pops first.
    while let Some(service) = ready.pop() {
        if let Some(waiting) = dependents.get(&service) {
            for dependent in waiting {
                if let Some(c) = deps_count.get_mut(dependent) {
                    *c -= 1;
                    if *c == 0 {
                        ready.push(dependent.clone());
                        ready.sort_unstable_by(|a, b| b.cmp(a));
                    }
                }
            }
        }
        result.push(service);
    }

    if result.len() != processed.len() {
        return Err(Error::CircularDependencyDetected);
    }

    Ok(result)
}
