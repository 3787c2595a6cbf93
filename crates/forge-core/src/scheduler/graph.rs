//! Dependency graph.
//!
//! Design:
//! - Arena of nodes addressed by index; `index` maps TaskId -> slot.
//! - Forward edges (`deps`): task -> tasks it waits for.
//! - Reverse edges (`dependents`): task -> tasks waiting for it.
//! - Invariant: both edge lists are kept in sync, and a removed node leaves
//!   no edge behind (slots are reused through `free`).
//!
//! Only live tasks are nodes. A task is removed once it is terminal and its
//! dependents have been updated.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::TaskId;

struct Node {
    id: TaskId,
    deps: Vec<usize>,
    dependents: Vec<usize>,
}

#[derive(Default)]
pub(crate) struct DependencyGraph {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<TaskId, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    Grey,
    Black,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    pub(crate) fn add_node(&mut self, id: TaskId) -> usize {
        if let Some(&slot) = self.index.get(&id) {
            return slot;
        }
        let node = Node {
            id,
            deps: Vec::new(),
            dependents: Vec::new(),
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(id, slot);
        slot
    }

    /// `task` waits for `dependency`. Both must be nodes. `false` otherwise.
    pub(crate) fn add_edge(&mut self, task: TaskId, dependency: TaskId) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(&task), self.index.get(&dependency)) else {
            return false;
        };
        if let Some(node) = self.nodes[from].as_mut()
            && !node.deps.contains(&to)
        {
            node.deps.push(to);
        } else {
            return true;
        }
        if let Some(node) = self.nodes[to].as_mut() {
            node.dependents.push(from);
        }
        true
    }

    /// Tasks directly waiting for `id`.
    pub(crate) fn dependents(&self, id: TaskId) -> Vec<TaskId> {
        self.node(id)
            .map(|node| node.dependents.iter().filter_map(|&i| self.id_at(i)).collect())
            .unwrap_or_default()
    }

    /// Tasks `id` directly waits for.
    pub(crate) fn dependencies(&self, id: TaskId) -> Vec<TaskId> {
        self.node(id)
            .map(|node| node.deps.iter().filter_map(|&i| self.id_at(i)).collect())
            .unwrap_or_default()
    }

    /// Every task that (transitively) waits for `id`, in breadth-first order,
    /// each listed once.
    pub(crate) fn transitive_dependents(&self, id: TaskId) -> Vec<TaskId> {
        let Some(&root) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut out = Vec::new();
        while let Some(slot) = queue.pop_front() {
            let Some(node) = self.nodes[slot].as_ref() else {
                continue;
            };
            for &next in &node.dependents {
                if seen.insert(next) {
                    if let Some(id) = self.id_at(next) {
                        out.push(id);
                    }
                    queue.push_back(next);
                }
            }
        }
        out
    }

    /// Unlink `id` from its neighbours and free its slot.
    pub(crate) fn remove(&mut self, id: TaskId) -> bool {
        let Some(slot) = self.index.remove(&id) else {
            return false;
        };
        let Some(node) = self.nodes[slot].take() else {
            return false;
        };
        for dep in node.deps {
            if let Some(n) = self.nodes[dep].as_mut() {
                n.dependents.retain(|&i| i != slot);
            }
        }
        for dependent in node.dependents {
            if let Some(n) = self.nodes[dependent].as_mut() {
                n.deps.retain(|&i| i != slot);
            }
        }
        self.free.push(slot);
        true
    }

    /// Would adding `pending` (task, declared dependencies) close a cycle?
    ///
    /// DFS with grey/black colouring over the graph plus the pending edges.
    /// Returns the cycle as a dependency path that starts and ends with the
    /// same task, e.g. `[a, b, a]` for "a waits for b, b waits for a".
    pub(crate) fn find_cycle(&self, pending: &[(TaskId, &BTreeSet<TaskId>)]) -> Option<Vec<TaskId>> {
        let overlay: HashMap<TaskId, &BTreeSet<TaskId>> =
            pending.iter().map(|(id, deps)| (*id, *deps)).collect();
        let deps_of = |id: TaskId| -> Vec<TaskId> {
            match overlay.get(&id) {
                Some(deps) => deps.iter().copied().collect(),
                None => self.dependencies(id),
            }
        };

        let mut colour: HashMap<TaskId, Colour> = HashMap::new();
        for &(start, _) in pending {
            if colour.contains_key(&start) {
                continue;
            }
            colour.insert(start, Colour::Grey);
            // Frames: (task, its dependencies, next dependency to visit).
            let mut stack: Vec<(TaskId, Vec<TaskId>, usize)> = vec![(start, deps_of(start), 0)];

            loop {
                let Some(top) = stack.last_mut() else {
                    break;
                };
                let Some(&child) = top.1.get(top.2) else {
                    colour.insert(top.0, Colour::Black);
                    stack.pop();
                    continue;
                };
                top.2 += 1;

                match colour.get(&child) {
                    None => {
                        colour.insert(child, Colour::Grey);
                        stack.push((child, deps_of(child), 0));
                    }
                    Some(Colour::Grey) => {
                        let pos = stack.iter().position(|frame| frame.0 == child)?;
                        let mut cycle: Vec<TaskId> =
                            stack[pos..].iter().map(|frame| frame.0).collect();
                        cycle.push(child);
                        return Some(cycle);
                    }
                    Some(Colour::Black) => {}
                }
            }
        }
        None
    }

    fn node(&self, id: TaskId) -> Option<&Node> {
        self.index
            .get(&id)
            .and_then(|&slot| self.nodes[slot].as_ref())
    }

    fn id_at(&self, slot: usize) -> Option<TaskId> {
        self.nodes.get(slot)?.as_ref().map(|n| n.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u128) -> TaskId {
        TaskId::from_u128(n)
    }

    fn deps(ids: &[u128]) -> BTreeSet<TaskId> {
        ids.iter().map(|&n| t(n)).collect()
    }

    fn chain() -> DependencyGraph {
        // 3 waits for 2, 2 waits for 1
        let mut g = DependencyGraph::new();
        for n in 1..=3 {
            g.add_node(t(n));
        }
        g.add_edge(t(2), t(1));
        g.add_edge(t(3), t(2));
        g
    }

    #[test]
    fn edges_are_tracked_both_ways() {
        let g = chain();
        assert_eq!(g.dependents(t(1)), vec![t(2)]);
        assert_eq!(g.dependencies(t(3)), vec![t(2)]);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut g = chain();
        assert!(g.add_edge(t(2), t(1)));
        assert_eq!(g.dependents(t(1)), vec![t(2)]);
    }

    #[test]
    fn remove_unlinks_both_directions() {
        let mut g = chain();
        assert!(g.remove(t(2)));
        assert!(g.dependents(t(1)).is_empty());
        assert!(g.dependencies(t(3)).is_empty());
        assert!(!g.remove(t(2)));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn freed_slots_are_reused_without_stale_edges() {
        let mut g = chain();
        g.remove(t(2));
        g.add_node(t(9));
        assert!(g.dependents(t(9)).is_empty());
        assert!(g.dependencies(t(9)).is_empty());
        assert!(g.dependents(t(1)).is_empty());
    }

    #[test]
    fn transitive_dependents_are_listed_once() {
        // diamond: 2 and 3 wait for 1, 4 waits for 2 and 3
        let mut g = DependencyGraph::new();
        for n in 1..=4 {
            g.add_node(t(n));
        }
        g.add_edge(t(2), t(1));
        g.add_edge(t(3), t(1));
        g.add_edge(t(4), t(2));
        g.add_edge(t(4), t(3));

        let mut got = g.transitive_dependents(t(1));
        got.sort();
        assert_eq!(got, vec![t(2), t(3), t(4)]);
    }

    #[test]
    fn two_task_cycle_is_found() {
        let g = DependencyGraph::new();
        let a = deps(&[2]);
        let b = deps(&[1]);
        let cycle = g.find_cycle(&[(t(1), &a), (t(2), &b)]).unwrap();
        assert_eq!(cycle, vec![t(1), t(2), t(1)]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let g = DependencyGraph::new();
        let a = deps(&[1]);
        assert_eq!(g.find_cycle(&[(t(1), &a)]), Some(vec![t(1), t(1)]));
    }

    #[test]
    fn pending_tasks_on_existing_chain_are_acyclic() {
        let g = chain();
        let d = deps(&[3, 1]);
        assert_eq!(g.find_cycle(&[(t(4), &d)]), None);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let g = DependencyGraph::new();
        let top = deps(&[2, 3]);
        let left = deps(&[4]);
        let right = deps(&[4]);
        let bottom = deps(&[]);
        let pending = [(t(1), &top), (t(2), &left), (t(3), &right), (t(4), &bottom)];
        assert_eq!(g.find_cycle(&pending), None);
    }

    #[test]
    fn three_task_cycle_reports_path() {
        let g = DependencyGraph::new();
        let a = deps(&[2]);
        let b = deps(&[3]);
        let c = deps(&[1]);
        let cycle = g.find_cycle(&[(t(1), &a), (t(2), &b), (t(3), &c)]).unwrap();
        assert_eq!(cycle, vec![t(1), t(2), t(3), t(1)]);
    }
}
