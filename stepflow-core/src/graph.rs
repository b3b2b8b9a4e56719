//! State graph built from a definition's states and transitions.
//!
//! Nodes are states in declaration order. There is an edge `s -> t` whenever
//! some transition (enabled or not) lists `s` as a source and targets `t`.
//! Traversals use explicit stacks/queues so pathological inputs cannot
//! exhaust the call stack.

use crate::definition::{State, Transition};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// An edge that closes a cycle during depth-first search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackEdge<'a> {
    /// The in-progress state the edge re-enters.
    pub to: &'a str,
    /// The state the edge leaves from.
    pub from: &'a str,
}

/// Immutable adjacency view over a set of states and transitions.
#[derive(Debug)]
pub struct Graph<'a> {
    nodes: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
    edges: Vec<Vec<usize>>,
}

impl<'a> Graph<'a> {
    /// Builds the graph. References to undeclared states are ignored; the
    /// validator rejects them before any traversal runs.
    pub fn build(states: &'a [State], transitions: &'a [Transition]) -> Self {
        let nodes: Vec<&str> = states.iter().map(|s| s.id.as_str()).collect();
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, id) in nodes.iter().enumerate() {
            index.entry(*id).or_insert(i);
        }

        let mut edges = vec![Vec::new(); nodes.len()];
        for t in transitions {
            let Some(&to) = index.get(t.to.as_str()) else {
                continue;
            };
            for from in &t.from {
                if let Some(&from) = index.get(from.as_str()) {
                    edges[from].push(to);
                }
            }
        }

        Self {
            nodes,
            index,
            edges,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates state ids in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.nodes.iter().copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Iterates the targets of edges leaving `id`.
    pub fn successors(&self, id: &str) -> impl Iterator<Item = &'a str> + '_ {
        self.index
            .get(id)
            .map(|&i| self.edges[i].as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&j| self.nodes[j])
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.index.get(id).map(|&i| self.edges[i].len()).unwrap_or(0)
    }

    fn roots(&self, roots: &[&str]) -> Vec<usize> {
        roots
            .iter()
            .filter_map(|r| self.index.get(r).copied())
            .collect()
    }

    /// Depth-first search from each root, coloring nodes
    /// unvisited -> in-progress -> done. Returns the first edge into an
    /// in-progress node, which proves a cycle reachable from a root.
    pub fn find_cycle(&self, roots: &[&str]) -> Option<BackEdge<'a>> {
        let mut color = vec![Color::Unvisited; self.nodes.len()];

        for root in self.roots(roots) {
            if color[root] != Color::Unvisited {
                continue;
            }

            color[root] = Color::InProgress;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                match self.edges[node].get(frame.1) {
                    Some(&next) => {
                        frame.1 += 1;
                        match color[next] {
                            Color::InProgress => {
                                return Some(BackEdge {
                                    to: self.nodes[next],
                                    from: self.nodes[node],
                                });
                            }
                            Color::Unvisited => {
                                color[next] = Color::InProgress;
                                stack.push((next, 0));
                            }
                            Color::Done => {}
                        }
                    }
                    None => {
                        color[node] = Color::Done;
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    /// Breadth-first search from the roots. Returns every state never
    /// visited, in declaration order.
    pub fn unreachable_from(&self, roots: &[&str]) -> Vec<&'a str> {
        let mut visited = vec![false; self.nodes.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();

        for root in self.roots(roots) {
            if !visited[root] {
                visited[root] = true;
                queue.push_back(root);
            }
        }

        while let Some(node) = queue.pop_front() {
            for &next in &self.edges[node] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        self.nodes
            .iter()
            .zip(visited)
            .filter(|(_, seen)| !seen)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(ids: &[&str]) -> Vec<State> {
        ids.iter().map(|id| State::new(*id)).collect()
    }

    #[test]
    fn test_edges_include_disabled_transitions() {
        let states = states(&["a", "b", "c"]);
        let transitions = vec![
            Transition::new("ab", ["a"], "b"),
            Transition::new("ac", ["a"], "c").disabled(),
        ];
        let graph = Graph::build(&states, &transitions);

        let succ: Vec<_> = graph.successors("a").collect();
        assert_eq!(succ, vec!["b", "c"]);
        assert_eq!(graph.out_degree("a"), 2);
        assert_eq!(graph.out_degree("c"), 0);
        assert_eq!(graph.successors("missing").count(), 0);
        assert_eq!(graph.nodes().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_multi_source_edges() {
        let states = states(&["a", "b", "z"]);
        let transitions = vec![Transition::new("cancel", ["a", "b"], "z")];
        let graph = Graph::build(&states, &transitions);

        assert_eq!(graph.successors("a").collect::<Vec<_>>(), vec!["z"]);
        assert_eq!(graph.successors("b").collect::<Vec<_>>(), vec!["z"]);
    }

    #[test]
    fn test_dangling_references_ignored() {
        let states = states(&["a"]);
        let transitions = vec![
            Transition::new("x", ["a"], "nowhere"),
            Transition::new("y", ["ghost"], "a"),
        ];
        let graph = Graph::build(&states, &transitions);
        assert_eq!(graph.out_degree("a"), 0);
        assert!(!graph.contains("ghost"));
    }

    #[test]
    fn test_find_cycle() {
        let states = states(&["a", "b", "c"]);
        let transitions = vec![
            Transition::new("ab", ["a"], "b"),
            Transition::new("bc", ["b"], "c"),
            Transition::new("cb", ["c"], "b"),
        ];
        let graph = Graph::build(&states, &transitions);

        let back = graph.find_cycle(&["a"]).unwrap();
        assert_eq!(back.to, "b");
        assert_eq!(back.from, "c");
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let states = states(&["a"]);
        let transitions = vec![Transition::new("again", ["a"], "a")];
        let graph = Graph::build(&states, &transitions);

        let back = graph.find_cycle(&["a"]).unwrap();
        assert_eq!((back.from, back.to), ("a", "a"));
    }

    #[test]
    fn test_diamond_is_not_cycle() {
        let states = states(&["a", "b", "c", "d"]);
        let transitions = vec![
            Transition::new("ab", ["a"], "b"),
            Transition::new("ac", ["a"], "c"),
            Transition::new("bd", ["b"], "d"),
            Transition::new("cd", ["c"], "d"),
        ];
        let graph = Graph::build(&states, &transitions);
        assert!(graph.find_cycle(&["a"]).is_none());
    }

    #[test]
    fn test_unreachable_cycle_not_reported() {
        // The x <-> y loop is not reachable from a.
        let states = states(&["a", "b", "x", "y"]);
        let transitions = vec![
            Transition::new("ab", ["a"], "b"),
            Transition::new("xy", ["x"], "y"),
            Transition::new("yx", ["y"], "x"),
        ];
        let graph = Graph::build(&states, &transitions);
        assert!(graph.find_cycle(&["a"]).is_none());
        assert_eq!(graph.unreachable_from(&["a"]), vec!["x", "y"]);
    }

    #[test]
    fn test_long_chain_no_stack_overflow() {
        let ids: Vec<String> = (0..100_000).map(|i| format!("s{}", i)).collect();
        let states: Vec<State> = ids.iter().map(State::new).collect();
        let transitions: Vec<Transition> = ids
            .windows(2)
            .map(|w| Transition::new(format!("t{}", w[0]), [w[0].clone()], w[1].clone()))
            .collect();
        let graph = Graph::build(&states, &transitions);

        assert!(graph.find_cycle(&["s0"]).is_none());
        assert!(graph.unreachable_from(&["s0"]).is_empty());
    }
}
