//! # Dependency graph between children.
//!
//! Nodes are child names; an edge `a → b` means "a depends on b". Dependencies may
//! name children registered later, so resolution is checked at start, while cycles
//! are rejected as soon as the closing edge is added.

use std::collections::{BTreeSet, HashMap};

use crate::error::SupervisorError;

#[derive(Debug, Default)]
pub(crate) struct Dag {
    /// Registration order.
    names: Vec<String>,
    index: HashMap<String, usize>,
    deps: Vec<Vec<String>>,
}

impl Dag {
    /// Adds a node; rejects a duplicate name or an edge set that closes a cycle.
    pub(crate) fn add(&mut self, name: &str, deps: &[String]) -> Result<usize, SupervisorError> {
        if self.index.contains_key(name) {
            return Err(SupervisorError::DuplicateChild(name.to_string()));
        }
        for dep in deps {
            if let Some(path) = self.path(dep, name) {
                let mut cycle = Vec::with_capacity(path.len() + 1);
                cycle.push(name.to_string());
                cycle.extend(path);
                return Err(SupervisorError::DependencyCycle { cycle });
            }
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        self.deps.push(deps.to_vec());
        Ok(idx)
    }

    /// Dependencies of node `idx`, resolved to registration indexes.
    pub(crate) fn resolve(&self, idx: usize) -> Result<Vec<usize>, SupervisorError> {
        self.deps[idx]
            .iter()
            .map(|dep| {
                self.index
                    .get(dep)
                    .copied()
                    .ok_or_else(|| SupervisorError::UnknownDependency {
                        child: self.names[idx].clone(),
                        dependency: dep.clone(),
                    })
            })
            .collect()
    }

    /// Start order: dependencies first, ties broken by registration index.
    pub(crate) fn order(&self) -> Result<Vec<usize>, SupervisorError> {
        let n = self.names.len();
        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for idx in 0..n {
            for dep in self.resolve(idx)? {
                pending[idx] += 1;
                dependents[dep].push(idx);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        Ok(order)
    }

    /// Path of names from `from` to `to` along dependency edges, both ends included.
    fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![to.to_string()]);
        }
        let mut stack = vec![(from.to_string(), vec![from.to_string()])];
        let mut seen = BTreeSet::new();
        while let Some((node, path)) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            let Some(&idx) = self.index.get(&node) else {
                continue;
            };
            for dep in &self.deps[idx] {
                let mut next = path.clone();
                next.push(dep.clone());
                if dep == to {
                    return Some(next);
                }
                stack.push((dep.clone(), next));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn forward_references_resolve_at_order_time() {
        let mut dag = Dag::default();
        dag.add("api", &deps(&["db"])).unwrap();
        dag.add("cache", &[]).unwrap();
        assert!(matches!(
            dag.order(),
            Err(SupervisorError::UnknownDependency { ref dependency, .. }) if dependency == "db"
        ));

        dag.add("db", &[]).unwrap();
        // api(0) waits for db(2); cache(1) is free
        assert_eq!(dag.order().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn closing_edge_is_rejected_with_path() {
        let mut dag = Dag::default();
        dag.add("a", &deps(&["b"])).unwrap();
        dag.add("b", &deps(&["c"])).unwrap();
        match dag.add("c", &deps(&["a"])) {
            Err(SupervisorError::DependencyCycle { cycle }) => {
                assert_eq!(cycle, deps(&["c", "a", "b", "c"]));
            }
            other => panic!("unexpected {other:?}"),
        }
        // the rejected node is not kept
        dag.add("c", &[]).unwrap();
        assert_eq!(dag.order().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn self_dependency_and_duplicates() {
        let mut dag = Dag::default();
        assert!(matches!(
            dag.add("a", &deps(&["a"])),
            Err(SupervisorError::DependencyCycle { .. })
        ));
        dag.add("a", &[]).unwrap();
        assert!(matches!(dag.add("a", &[]), Err(SupervisorError::DuplicateChild(_))));
    }
}
