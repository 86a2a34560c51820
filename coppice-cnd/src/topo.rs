use std::collections::{HashMap, HashSet};

use coppice_base::{err, Result};

/// Topologically sorts a dependency graph (node -> its dependents, i.e. the
/// supertypes it must come after) via iterative... actually recursive DFS,
/// returning dependents before their dependers. Errors name a missing
/// dependent, or list every node on a discovered cycle sorted and
/// comma-joined, matching the CND compiler's diagnostic format exactly.
pub fn topological_sort<'a>(graph: &HashMap<&'a str, Vec<&'a str>>) -> Result<Vec<&'a str>> {
    let mut sorter = Sorter {
        graph,
        traversed: Vec::new(),
        done: HashSet::new(),
        ancestors: HashSet::new(),
    };
    let mut names: Vec<&str> = graph.keys().copied().collect();
    names.sort_unstable();
    for name in names {
        sorter.visit(name)?;
    }
    Ok(sorter.traversed)
}

struct Sorter<'a, 'g> {
    graph: &'g HashMap<&'a str, Vec<&'a str>>,
    traversed: Vec<&'a str>,
    done: HashSet<&'a str>,
    ancestors: HashSet<&'a str>,
}

impl<'a, 'g> Sorter<'a, 'g> {
    fn visit(&mut self, node: &'a str) -> Result<()> {
        if self.done.contains(node) {
            return Ok(());
        }
        self.ancestors.insert(node);
        let deps = self
            .graph
            .get(node)
            .ok_or_else(|| err(format!("Missing dependent {node:?} in graph")))?;
        for &dep in deps {
            if !self.graph.contains_key(dep) {
                return Err(err(format!("Missing dependent {dep:?} in {node:?}")));
            }
            if self.ancestors.contains(dep) {
                let mut loop_names: Vec<&str> = self.ancestors.iter().copied().collect();
                loop_names.sort_unstable();
                let joined = loop_names
                    .iter()
                    .map(|n| format!("{n:?}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(err(format!("Loop involving {joined}")));
            }
            self.visit(dep)?;
        }
        self.ancestors.remove(node);
        if !self.done.contains(node) {
            self.traversed.push(node);
            self.done.insert(node);
        }
        Ok(())
    }
}
