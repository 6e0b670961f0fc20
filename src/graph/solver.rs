//! The min-cut oracle contract and a CPU implementation of it.
//!
//! The oracle sees one rectangular region in row-major order: a biased
//! terminal cost per pixel and four non-negative link planes. A decoded
//! terminal `t = stored - bias` is positive when the pixel prefers the
//! source (foreground) and negative when it prefers the sink.

use std::collections::VecDeque;

use crate::error::{Result, SegmentError};

#[derive(Debug, Clone)]
pub struct GraphCutProblem {
    pub width: u32,
    pub height: u32,
    pub bias: i32,
    /// Terminal costs stored as `t + bias`
    pub terminals: Vec<i32>,
    pub left: Vec<i32>,
    pub right: Vec<i32>,
    pub up: Vec<i32>,
    pub down: Vec<i32>,
}

impl GraphCutProblem {
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded terminal cost of pixel `index`
    #[inline]
    pub fn terminal(&self, index: usize) -> i32 {
        self.terminals[index] - self.bias
    }

    pub fn check(&self) -> Result<()> {
        let n = self.len();
        let planes = [&self.terminals, &self.left, &self.right, &self.up, &self.down];
        if n == 0 || planes.iter().any(|p| p.len() != n) {
            return Err(SegmentError::Oracle(format!(
                "malformed {}x{} problem",
                self.width, self.height
            )));
        }
        if [&self.left, &self.right, &self.up, &self.down]
            .iter()
            .any(|p| p.iter().any(|&c| c < 0))
        {
            return Err(SegmentError::Oracle("negative link cost".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverStatus {
    Success,
    /// The cut was produced but the oracle flagged something about it
    Warning(String),
}

#[derive(Debug, Clone)]
pub struct Solution {
    /// One entry per pixel of the region, true on the source side
    pub labels: Vec<bool>,
    pub status: SolverStatus,
}

/// Minimum s-t cut over a 4-connected grid.
pub trait MinCutSolver: Send {
    fn solve(&mut self, problem: &GraphCutProblem) -> Result<Solution>;
}

/// Dinic max-flow; the source side of the residual graph is the
/// foreground.
#[derive(Debug, Default)]
pub struct DinicSolver {
    graph: FlowGraph,
}

impl DinicSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MinCutSolver for DinicSolver {
    fn solve(&mut self, problem: &GraphCutProblem) -> Result<Solution> {
        let _span = tracing::debug_span!("graphcut").entered();
        problem.check()?;

        let n = problem.len();
        let width = problem.width as usize;
        let source = n;
        let sink = n + 1;
        self.graph.reset(n + 2);

        for p in 0..n {
            let t = problem.terminal(p) as i64;
            if t > 0 {
                self.graph.add_edge(source, p, t, 0);
            } else if t < 0 {
                self.graph.add_edge(p, sink, -t, 0);
            }

            let x = p % width;
            if x + 1 < width {
                self.graph
                    .add_edge(p, p + 1, problem.right[p] as i64, problem.left[p + 1] as i64);
            }
            if p + width < n {
                self.graph
                    .add_edge(p, p + width, problem.down[p] as i64, problem.up[p + width] as i64);
            }
        }

        let flow = self.graph.max_flow(source, sink);
        let reachable = self.graph.reachable_from(source);
        tracing::debug!("Max flow {} over {} pixels", flow, n);

        Ok(Solution {
            labels: reachable[..n].to_vec(),
            status: SolverStatus::Success,
        })
    }
}

#[derive(Debug, Default)]
struct FlowGraph {
    head: Vec<Vec<usize>>,
    to: Vec<usize>,
    capacity: Vec<i64>,
    level: Vec<i32>,
    cursor: Vec<usize>,
}

impl FlowGraph {
    fn reset(&mut self, nodes: usize) {
        self.head.clear();
        self.head.resize_with(nodes, Vec::new);
        self.to.clear();
        self.capacity.clear();
        self.level = vec![-1; nodes];
        self.cursor = vec![0; nodes];
    }

    /// Edge pair `a -> b` / `b -> a`; edge `e` has its twin at `e ^ 1`.
    fn add_edge(&mut self, a: usize, b: usize, forward: i64, backward: i64) {
        self.head[a].push(self.to.len());
        self.to.push(b);
        self.capacity.push(forward);
        self.head[b].push(self.to.len());
        self.to.push(a);
        self.capacity.push(backward);
    }

    fn build_levels(&mut self, source: usize, sink: usize) -> bool {
        self.level.fill(-1);
        self.level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            for &e in &self.head[v] {
                let w = self.to[e];
                if self.capacity[e] > 0 && self.level[w] < 0 {
                    self.level[w] = self.level[v] + 1;
                    queue.push_back(w);
                }
            }
        }
        self.level[sink] >= 0
    }

    /// Blocking flow on the current level graph, walking augmenting paths
    /// with an explicit stack.
    fn blocking_flow(&mut self, source: usize, sink: usize) -> i64 {
        self.cursor.fill(0);
        let mut total = 0;
        let mut path: Vec<usize> = Vec::new();
        let mut v = source;

        loop {
            if v == sink {
                let bottleneck = path.iter().map(|&e| self.capacity[e]).min().unwrap_or(0);
                for &e in &path {
                    self.capacity[e] -= bottleneck;
                    self.capacity[e ^ 1] += bottleneck;
                }
                total += bottleneck;
                // resume from the tail of the first saturated edge
                let saturated = path.iter().position(|&e| self.capacity[e] == 0).unwrap_or(0);
                v = self.to[path[saturated] ^ 1];
                path.truncate(saturated);
                continue;
            }

            let mut advanced = false;
            while self.cursor[v] < self.head[v].len() {
                let e = self.head[v][self.cursor[v]];
                let w = self.to[e];
                if self.capacity[e] > 0 && self.level[w] == self.level[v] + 1 {
                    path.push(e);
                    v = w;
                    advanced = true;
                    break;
                }
                self.cursor[v] += 1;
            }

            if !advanced {
                // dead end: prune it from the level graph and back off
                self.level[v] = -1;
                match path.pop() {
                    Some(e) => {
                        v = self.to[e ^ 1];
                        self.cursor[v] += 1;
                    }
                    None => break,
                }
            }
        }
        total
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> i64 {
        let mut flow = 0;
        while self.build_levels(source, sink) {
            flow += self.blocking_flow(source, sink);
        }
        flow
    }

    fn reachable_from(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.head.len()];
        seen[source] = true;
        let mut stack = vec![source];
        while let Some(v) = stack.pop() {
            for &e in &self.head[v] {
                let w = self.to[e];
                if self.capacity[e] > 0 && !seen[w] {
                    seen[w] = true;
                    stack.push(w);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIAS: i32 = 32767;

    fn problem(width: u32, height: u32, terminals: &[i32], link: i32) -> GraphCutProblem {
        let n = (width * height) as usize;
        let w = width as usize;
        let mut right = vec![link; n];
        let mut down = vec![link; n];
        for p in 0..n {
            if p % w == w - 1 {
                right[p] = 0;
            }
            if p + w >= n {
                down[p] = 0;
            }
        }
        let left = (0..n).map(|p| if p % w == 0 { 0 } else { right[p - 1] }).collect();
        let up = (0..n).map(|p| if p < w { 0 } else { down[p - w] }).collect();
        GraphCutProblem {
            width,
            height,
            bias: BIAS,
            terminals: terminals.iter().map(|t| t + BIAS).collect(),
            left,
            right,
            up,
            down,
        }
    }

    #[test]
    fn isolated_pixels_follow_their_terminals() {
        let p = problem(4, 1, &[5, -5, 0, 7], 0);
        let solution = DinicSolver::new().solve(&p).unwrap();
        assert_eq!(solution.labels, vec![true, false, false, true]);
        assert_eq!(solution.status, SolverStatus::Success);
    }

    #[test]
    fn strong_links_pull_weak_pixels_along() {
        // a weakly background pixel between two strong foreground pixels
        let p = problem(3, 1, &[100, -3, 100], 10);
        let solution = DinicSolver::new().solve(&p).unwrap();
        assert_eq!(solution.labels, vec![true, true, true]);

        let p = problem(3, 1, &[100, -3, 100], 1);
        let solution = DinicSolver::new().solve(&p).unwrap();
        assert_eq!(solution.labels, vec![true, false, true]);
    }

    #[test]
    fn cut_follows_cheap_links() {
        // left half prefers foreground, right half background; 2D grid
        let (width, height) = (6u32, 4u32);
        let terminals: Vec<i32> = (0..width * height)
            .map(|i| if i % width < 3 { 20 } else { -20 })
            .collect();
        let p = problem(width, height, &terminals, 5);
        let solution = DinicSolver::new().solve(&p).unwrap();
        for (i, &label) in solution.labels.iter().enumerate() {
            assert_eq!(label, (i as u32 % width) < 3, "pixel {i}");
        }
    }

    #[test]
    fn malformed_problems_are_rejected() {
        let mut p = problem(2, 2, &[1, 1, 1, 1], 1);
        p.down.pop();
        assert!(matches!(DinicSolver::new().solve(&p), Err(SegmentError::Oracle(_))));

        let mut p = problem(2, 2, &[1, 1, 1, 1], 1);
        p.left[1] = -1;
        assert!(DinicSolver::new().solve(&p).is_err());
    }

    #[test]
    fn solver_is_reusable() {
        let mut solver = DinicSolver::new();
        let first = solver.solve(&problem(2, 1, &[4, -4], 1)).unwrap();
        let second = solver.solve(&problem(3, 1, &[-4, -4, 4], 1)).unwrap();
        assert_eq!(first.labels, vec![true, false]);
        assert_eq!(second.labels, vec![false, false, true]);
    }
}
