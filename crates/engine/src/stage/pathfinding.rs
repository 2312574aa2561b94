use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

use thiserror::Error;
use tracing::debug;

/// Lazily expanded search graph node. Neighbour slots are addressed by
/// index so a node can report absent neighbours without allocating.
pub trait PathNode: Sized {
    type Id: Clone + Eq + Hash;

    fn id(&self) -> Self::Id;
    /// Admissible estimate of the remaining cost; zero marks the goal.
    fn heuristic(&self) -> f64;
    fn neighbor_slots(&self) -> usize;
    fn neighbor(&self, index: usize) -> Option<Self>;
    fn distance(&self, index: usize) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathOptions {
    /// Heuristic weight; 1.0 is plain A*.
    pub epsilon: f64,
    pub max_expanded: usize,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            max_expanded: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    #[error("pathfinder epsilon must be positive, got {0}")]
    NonPositiveEpsilon(f64),
}

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    f_cost: f64,
    h_cost: f64,
    insertion_order: u64,
    slot: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so BinaryHeap pops the lowest f, then lowest h, then oldest.
impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_cost
            .total_cmp(&self.f_cost)
            .then_with(|| other.h_cost.total_cmp(&self.h_cost))
            .then_with(|| other.insertion_order.cmp(&self.insertion_order))
    }
}

struct Visited<N> {
    node: N,
    g_cost: f64,
    parent: Option<usize>,
    closed: bool,
}

/// Weighted A* from `start` to the first node whose heuristic is zero.
/// Returns the node sequence including both ends, or `None` when the goal is
/// unreachable within `max_expanded` expansions.
pub fn find_path<N: PathNode>(start: N, options: PathOptions) -> Result<Option<Vec<N>>, PathError> {
    if options.epsilon.is_nan() || options.epsilon <= 0.0 {
        return Err(PathError::NonPositiveEpsilon(options.epsilon));
    }

    let mut visited: Vec<Visited<N>> = Vec::new();
    let mut slots: HashMap<N::Id, usize> = HashMap::new();
    let mut open = BinaryHeap::new();
    let mut next_insertion = 0u64;

    let start_h = start.heuristic();
    slots.insert(start.id(), 0);
    visited.push(Visited {
        node: start,
        g_cost: 0.0,
        parent: None,
        closed: false,
    });
    open.push(OpenEntry {
        f_cost: options.epsilon * start_h,
        h_cost: start_h,
        insertion_order: next_insertion,
        slot: 0,
    });

    let mut expanded = 0usize;
    while let Some(entry) = open.pop() {
        let current = entry.slot;
        if visited[current].closed {
            continue;
        }
        if entry.h_cost <= 0.0 {
            debug!(expanded, "path_found");
            return Ok(Some(unwind(visited, current)));
        }
        if expanded >= options.max_expanded {
            debug!(expanded, "path_search_exhausted");
            return Ok(None);
        }
        expanded += 1;
        visited[current].closed = true;

        let g_cost = visited[current].g_cost;
        for index in 0..visited[current].node.neighbor_slots() {
            let Some(neighbor) = visited[current].node.neighbor(index) else {
                continue;
            };
            let tentative = g_cost + visited[current].node.distance(index);
            let id = neighbor.id();
            let slot = match slots.get(&id).copied() {
                Some(slot) => {
                    let known = &mut visited[slot];
                    if known.closed || tentative >= known.g_cost {
                        continue;
                    }
                    known.g_cost = tentative;
                    known.parent = Some(current);
                    slot
                }
                None => {
                    let slot = visited.len();
                    slots.insert(id, slot);
                    visited.push(Visited {
                        node: neighbor,
                        g_cost: tentative,
                        parent: Some(current),
                        closed: false,
                    });
                    slot
                }
            };
            let h_cost = visited[slot].node.heuristic();
            next_insertion = next_insertion.saturating_add(1);
            open.push(OpenEntry {
                f_cost: tentative + options.epsilon * h_cost,
                h_cost,
                insertion_order: next_insertion,
                slot,
            });
        }
    }

    debug!(expanded, "path_unreachable");
    Ok(None)
}

fn unwind<N>(visited: Vec<Visited<N>>, goal: usize) -> Vec<N> {
    let mut order = Vec::new();
    let mut cursor = Some(goal);
    while let Some(slot) = cursor {
        order.push(slot);
        cursor = visited[slot].parent;
    }
    let mut nodes: Vec<Option<N>> = visited.into_iter().map(|entry| Some(entry.node)).collect();
    order
        .into_iter()
        .rev()
        .filter_map(|slot| nodes[slot].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit-cost line graph `0..len` searching toward `goal`.
    #[derive(Debug, Clone)]
    struct LineNode {
        at: i32,
        goal: i32,
        len: i32,
        wall: Option<i32>,
    }

    impl PathNode for LineNode {
        type Id = i32;

        fn id(&self) -> i32 {
            self.at
        }

        fn heuristic(&self) -> f64 {
            f64::from((self.goal - self.at).abs())
        }

        fn neighbor_slots(&self) -> usize {
            2
        }

        fn neighbor(&self, index: usize) -> Option<Self> {
            let at = if index == 0 { self.at - 1 } else { self.at + 1 };
            if at < 0 || at >= self.len || Some(at) == self.wall {
                return None;
            }
            Some(Self { at, ..self.clone() })
        }

        fn distance(&self, _index: usize) -> f64 {
            1.0
        }
    }

    fn line(at: i32, goal: i32, wall: Option<i32>) -> LineNode {
        LineNode {
            at,
            goal,
            len: 10,
            wall,
        }
    }

    #[test]
    fn walks_straight_line() {
        let path = find_path(line(2, 6, None), PathOptions::default())
            .expect("options")
            .expect("path");
        let ids: Vec<i32> = path.iter().map(PathNode::id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn start_on_goal_is_single_node() {
        let path = find_path(line(4, 4, None), PathOptions::default())
            .expect("options")
            .expect("path");
        assert_eq!(path.len(), 1);
    }

    #[test]
    fn wall_makes_goal_unreachable() {
        let result = find_path(line(2, 6, Some(4)), PathOptions::default()).expect("options");
        assert!(result.is_none());
    }

    #[test]
    fn expansion_budget_is_respected() {
        let options = PathOptions {
            epsilon: 1.0,
            max_expanded: 2,
        };
        assert!(find_path(line(0, 9, None), options).expect("options").is_none());
    }

    #[test]
    fn rejects_non_positive_epsilon() {
        for epsilon in [0.0, -1.0, f64::NAN] {
            let options = PathOptions {
                epsilon,
                max_expanded: 10,
            };
            assert!(find_path(line(0, 1, None), options).is_err());
        }
    }
}
