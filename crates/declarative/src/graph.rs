//! Dependency ordering over resource references

use crate::error::{Error, Result};
use crate::types::ResourceAddress;
use std::collections::{BTreeSet, HashMap};

/// Dependency graph over a fixed list of nodes, addressed by index
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    /// For each node, the nodes it depends on
    pub dependencies: Vec<Vec<usize>>,
    /// For each node, the nodes that depend on it
    pub dependents: Vec<Vec<usize>>,
    addresses: Vec<ResourceAddress>,
}

impl DependencyGraph {
    /// Build a graph; edges to addresses outside `nodes` are dropped.
    pub fn new<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a ResourceAddress, &'a [ResourceAddress])>,
    {
        let nodes: Vec<_> = nodes.into_iter().collect();
        let index: HashMap<&ResourceAddress, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, (address, _))| (*address, i))
            .collect();

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, (_, deps)) in nodes.iter().enumerate() {
            for dep in *deps {
                if let Some(&j) = index.get(dep)
                    && !dependencies[i].contains(&j)
                {
                    dependencies[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        Self {
            dependencies,
            dependents,
            addresses: nodes.iter().map(|(a, _)| (*a).clone()).collect(),
        }
    }

    /// Kahn's algorithm; ties keep input order so plans are deterministic.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..remaining.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(remaining.len());

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &d in &self.dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }

        if order.len() < remaining.len() {
            return Err(Error::CyclicDependency {
                cycle: self.find_cycle(&remaining),
            });
        }
        Ok(order)
    }

    /// Walk unresolved dependencies until a node repeats.
    fn find_cycle(&self, remaining: &[usize]) -> Vec<String> {
        let Some(start) = (0..remaining.len()).find(|&i| remaining[i] > 0) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = self.dependencies[current].iter().find(|&&d| remaining[d] > 0) else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.addresses[i].to_string())
                    .collect();
                cycle.push(self.addresses[next].to_string());
                return cycle;
            }
            path.push(next);
            current = next;
        }

        path.iter().map(|&i| self.addresses[i].to_string()).collect()
    }
}
