//! Memory offset planning
//!
//! Turns a schedule's lifetimes into concrete byte offsets with the
//! best-fit rectangle heuristic: each value is a rectangle spanning its
//! lifetime horizontally with its byte size as height. A `Container` keeps
//! a skyline of `Step`s; the packer repeatedly takes the lowest step,
//! places the largest unplaced block whose lifetime fits on it, and lifts
//! the step to its lowest neighbor when nothing fits.

use crate::error::ForgeResult;
use crate::graph::{Graph, ValueId};
use crate::internal_error;
use crate::sched::life::LifetimeStat;
use std::collections::HashMap;

/// One horizontal segment of the container's skyline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// First time step covered
    pub begin: i32,
    /// Number of time steps covered; the next step starts at `begin + width`
    pub width: i32,
    /// Current height (byte offset) of the skyline here
    pub offset: u64,
}

impl Step {
    /// One past the last time step covered
    pub fn end(&self) -> i32 {
        self.begin + self.width
    }

    /// Whether a block spanning `[gen, kill)` fits on this step
    pub fn can_place(&self, gen: i32, kill: i32) -> bool {
        gen >= self.begin && kill <= self.end()
    }
}

/// Spatial-temporal descriptor of a placed (or to-be-placed) value
#[derive(Debug, Clone, Copy)]
pub struct MemoryDesc {
    /// The described value
    pub value: ValueId,
    /// Lifetime begin
    pub gen: i32,
    /// Lifetime end (exclusive)
    pub kill: i32,
    /// Byte size
    pub size: u64,
    /// Assigned byte offset
    pub offset: u64,
}

impl MemoryDesc {
    /// Lifetime length in time steps
    pub fn length(&self) -> i32 {
        self.kill - self.gen
    }
}

/// A skyline container over the schedule's time range
#[derive(Debug, Clone)]
pub struct Container {
    t_begin: i32,
    t_end: i32,
    max_height: u64,
    /// Steps sorted by begin time, covering `[t_begin, t_end)` exactly
    steps: Vec<Step>,
}

impl Container {
    /// Create a container covering `[begin, end)` at height zero.
    pub fn new(begin: i32, end: i32) -> Self {
        Self {
            t_begin: begin,
            t_end: end,
            max_height: 0,
            steps: vec![Step {
                begin,
                width: end - begin,
                offset: 0,
            }],
        }
    }

    /// Highest point the skyline ever reached
    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    /// The step with the lowest offset; earliest wins ties.
    pub fn min_offset_step(&self) -> Step {
        *self
            .steps
            .iter()
            .min_by_key(|s| s.offset)
            .expect("container always covers its range")
    }

    /// Place a block of `height` bytes over `[begin, begin + width)`.
    ///
    /// The block must lie within the step at `begin`; the step splits
    /// around it and equal-offset neighbors merge back. Returns the offset
    /// the block was placed at.
    pub fn place(&mut self, begin: i32, width: i32, height: u64) -> ForgeResult<u64> {
        let end = begin + width;
        if begin < self.t_begin || end > self.t_end {
            return Err(internal_error!(
                "block [{begin}, {end}) outside container [{}, {})",
                self.t_begin,
                self.t_end
            ));
        }
        let idx = self.find_step_at(begin);
        let step = self.steps[idx];
        if end > step.end() {
            return Err(internal_error!(
                "block [{begin}, {end}) does not fit step [{}, {})",
                step.begin,
                step.end()
            ));
        }

        let new_height = step.offset + height;
        self.max_height = self.max_height.max(new_height);

        // Replace the step by up to three: left fringe, the raised middle,
        // right fringe
        let mut inserted = Vec::with_capacity(3);
        if begin != step.begin {
            inserted.push(Step {
                begin: step.begin,
                width: begin - step.begin,
                offset: step.offset,
            });
        }
        inserted.push(Step {
            begin,
            width,
            offset: new_height,
        });
        if end != step.end() {
            inserted.push(Step {
                begin: end,
                width: step.end() - end,
                offset: step.offset,
            });
        }
        let n_inserted = inserted.len();
        self.steps.splice(idx..=idx, inserted);

        let merge_from = idx.saturating_sub(1);
        self.try_merge(merge_from, n_inserted + 1);
        Ok(step.offset)
    }

    /// Lift the step at `time` to the lower of its neighbors' offsets.
    pub fn lift(&mut self, time: i32) -> ForgeResult<()> {
        if self.steps.len() == 1 {
            return Err(internal_error!("cannot lift the only step in container"));
        }
        let idx = self.find_step_at(time);
        let offset = self.steps[idx].offset;

        let target = if idx == 0 {
            self.steps[1].offset
        } else if idx == self.steps.len() - 1 {
            self.steps[idx - 1].offset
        } else {
            self.steps[idx - 1].offset.min(self.steps[idx + 1].offset)
        };
        if offset > target {
            return Err(internal_error!(
                "step at {time} is higher than its neighbors"
            ));
        }
        self.steps[idx].offset = target;
        let merge_from = idx.saturating_sub(1);
        self.try_merge(merge_from, 2);
        Ok(())
    }

    /// Index of the step covering `time`
    fn find_step_at(&self, time: i32) -> usize {
        // Steps are sorted by begin; find the last one starting at or
        // before `time`
        match self.steps.binary_search_by_key(&time, |s| s.begin) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        }
    }

    /// Merge up to `n_trial` adjacent equal-offset step pairs starting at
    /// `begin_idx`.
    fn try_merge(&mut self, begin_idx: usize, n_trial: usize) {
        let mut idx = begin_idx;
        for _ in 0..n_trial {
            if idx + 1 >= self.steps.len() {
                return;
            }
            if self.steps[idx].offset == self.steps[idx + 1].offset {
                self.steps[idx].width += self.steps[idx + 1].width;
                self.steps.remove(idx + 1);
            } else {
                idx += 1;
            }
        }
    }

    #[cfg(test)]
    fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// A complete offset assignment
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    /// Packed peak: the maximum of `offset + size` over all values
    pub peak: u64,
    /// Placed descriptors, ascending by (gen, kill)
    pub descs: Vec<MemoryDesc>,
    /// Value to offset lookup
    pub offsets: HashMap<ValueId, u64>,
}

impl MemoryPlan {
    fn new(peak: u64, mut descs: Vec<MemoryDesc>) -> Self {
        descs.sort_unstable_by_key(|d| (d.gen, d.kill, d.value));
        let offsets = descs.iter().map(|d| (d.value, d.offset)).collect();
        Self {
            peak,
            descs,
            offsets,
        }
    }
}

/// Assign a byte offset to every value of a schedule by best fit.
pub fn best_fit(stat: &LifetimeStat, graph: &Graph) -> ForgeResult<MemoryPlan> {
    let mut unplaced: Vec<MemoryDesc> = stat
        .values
        .iter()
        .map(|lt| MemoryDesc {
            value: lt.value,
            gen: lt.gen,
            kill: lt.kill,
            size: graph.value(lt.value).size(),
            offset: 0,
        })
        .collect();

    if unplaced.is_empty() {
        return Ok(MemoryPlan::new(0, Vec::new()));
    }

    let mut container = Container::new(stat.begin, stat.end);
    let mut placed = Vec::with_capacity(unplaced.len());
    while !unplaced.is_empty() {
        let step = container.min_offset_step();

        // Largest fitting block; longer lifetime then earlier gen on ties
        let best = unplaced
            .iter()
            .enumerate()
            .filter(|(_, d)| step.can_place(d.gen, d.kill))
            .max_by(|(_, a), (_, b)| {
                a.size
                    .cmp(&b.size)
                    .then(a.length().cmp(&b.length()))
                    .then(b.gen.cmp(&a.gen))
                    .then(b.value.cmp(&a.value))
            });

        match best {
            None => container.lift(step.begin)?,
            Some((idx, _)) => {
                let mut desc = unplaced.swap_remove(idx);
                desc.offset = container.place(desc.gen, desc.length(), desc.size)?;
                placed.push(desc);
            }
        }
    }

    Ok(MemoryPlan::new(container.max_height(), placed))
}
