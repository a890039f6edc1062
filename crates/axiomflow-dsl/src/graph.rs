use std::collections::{HashMap, HashSet, VecDeque};

use axiomflow_core::error::{AxiomError, Result};

use crate::schema::Edge;

/// Dependency graph over step ids.
///
/// Node order is declaration order (steps first, then any ids that only
/// appear on edges), and each node's successors keep edge declaration
/// order, so every traversal here is deterministic.
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    step_count: usize,
}

impl Dag {
    pub fn new<'a>(steps: impl IntoIterator<Item = &'a str>, edges: &[Edge]) -> Self {
        let mut dag = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            step_count: 0,
        };
        for id in steps {
            dag.intern(id);
        }
        dag.step_count = dag.nodes.len();
        for edge in edges {
            let from = dag.intern(&edge.from);
            let to = dag.intern(&edge.to);
            dag.successors[from].push(to);
            dag.predecessors[to].push(from);
        }
        dag
    }

    fn intern(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(id.to_string());
        self.index.insert(id.to_string(), i);
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        i
    }

    /// Find a back-edge with a depth-first walk that tracks the nodes on the
    /// current path. Returns the node the back-edge points to.
    pub fn find_cycle(&self) -> Option<&str> {
        let n = self.nodes.len();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];

        for start in 0..n {
            if visited[start] {
                continue;
            }
            // (node, index of next successor to explore)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            on_stack[start] = true;

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(&succ) = self.successors[node].get(frame.1) {
                    frame.1 += 1;
                    if on_stack[succ] {
                        return Some(&self.nodes[succ]);
                    }
                    if !visited[succ] {
                        on_stack[succ] = true;
                        stack.push((succ, 0));
                    }
                } else {
                    on_stack[node] = false;
                    visited[node] = true;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Kahn's algorithm with a FIFO ready queue seeded in declaration order.
    ///
    /// Fails with `GraphInconsistency` when the order cannot cover every
    /// node, which only happens if a cycle got past validation.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let n = self.nodes.len();
        let mut indegree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = ready.pop_front() {
            order.push(self.nodes[node].clone());
            for &succ in &self.successors[node] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.push_back(succ);
                }
            }
        }

        if order.len() < n {
            return Err(AxiomError::GraphInconsistency {
                ordered: order.len(),
                total: n,
            });
        }
        Ok(order)
    }

    /// Every node with a path to `id`, excluding `id` itself unless it sits
    /// on a cycle.
    pub fn ancestors(&self, id: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };
        let mut queue: VecDeque<usize> = self.predecessors[start].iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(self.nodes[node].as_str()) {
                queue.extend(self.predecessors[node].iter().copied());
            }
        }
        seen
    }

    /// Ids referenced by edges but not declared as steps.
    pub fn undeclared(&self) -> impl Iterator<Item = &str> {
        self.nodes[self.step_count..].iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
