//! Conflict-free partitioning of chunk systems into parallel steps.
//!
//! Two systems block each other when they share a component and at least one of them declares
//! write access to it (see [`Filter::conflicts_with`]). The blocking relation is computed once as
//! an `n × n` matrix, then systems are greedily packed into steps in registration order: a system
//! joins the current step if it blocks nobody already in it, otherwise it waits for a later step.
//!
//! ```text
//!  systems:  0: w(Pos) r(Vel)   1: r(Pos)   2: w(Vel)   3: w(Health)
//!
//!  blocking:    0 1 2 3
//!            0  . x x .
//!            1  x . . .
//!            2  x . . .
//!            3  . . . .
//!
//!  plan:  [0, 3] | [1, 2]
//!  order: Run(0) Run(3) Barrier Run(1) Run(2)
//! ```
//!
//! All chunk work inside a step may run concurrently. A barrier is a full join.

use fixedbitset::FixedBitSet;

use crate::ecs::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Run(usize),
    Barrier,
}

/// The cached step order of a set of systems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    order: Vec<Slot>,
}

impl Plan {
    /// Partition systems, identified by their position in `filters`.
    pub fn build(filters: &[&Filter]) -> Self {
        let blocking = blocking_matrix(filters);
        let n = filters.len();

        let mut order = Vec::with_capacity(n * 2);
        let mut remaining: Vec<usize> = (0..n).collect();
        let mut step = Vec::with_capacity(n);

        while !remaining.is_empty() {
            step.clear();
            remaining.retain(|&system| {
                if step.iter().any(|&other| blocking.contains(system * n + other)) {
                    return true;
                }
                step.push(system);
                false
            });

            if !order.is_empty() {
                order.push(Slot::Barrier);
            }
            order.extend(step.iter().map(|&system| Slot::Run(system)));
        }

        Self { order }
    }

    pub(crate) fn from_order(order: Vec<Slot>) -> Self {
        Self { order }
    }

    #[inline]
    pub fn order(&self) -> &[Slot] {
        &self.order
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Steps separated by barriers.
    pub fn steps(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        self.order
            .split(|slot| *slot == Slot::Barrier)
            .filter(|step| !step.is_empty())
            .map(|step| {
                step.iter()
                    .filter_map(|slot| match slot {
                        Slot::Run(system) => Some(*system),
                        Slot::Barrier => None,
                    })
                    .collect()
            })
    }

    #[inline]
    pub fn step_count(&self) -> usize {
        self.steps().count()
    }
}

/// Bit `i * n + j` is set when systems `i` and `j` may not share a step.
pub fn blocking_matrix(filters: &[&Filter]) -> FixedBitSet {
    let n = filters.len();
    let mut matrix = FixedBitSet::with_capacity(n * n);
    for i in 0..n {
        for j in (i + 1)..n {
            if filters[i].conflicts_with(filters[j]) {
                matrix.insert(i * n + j);
                matrix.insert(j * n + i);
            }
        }
    }
    matrix
}

/// Pairs of systems that conflict but share a step of `plan`.
pub fn conflicts_within_steps(plan: &Plan, filters: &[&Filter]) -> Vec<(usize, usize)> {
    let mut conflicts = Vec::new();
    for step in plan.steps() {
        for (position, &a) in step.iter().enumerate() {
            for &b in &step[position + 1..] {
                if filters[a].conflicts_with(filters[b]) {
                    conflicts.push((a, b));
                }
            }
        }
    }
    conflicts
}
