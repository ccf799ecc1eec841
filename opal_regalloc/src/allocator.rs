//! Linear-scan register allocation over live-range intervals.
//!
//! Respects pre-colored variables, per-variable candidate register masks
//! (register classes), allocation weights, and caller-save clobbers at call
//! sites. Variables left unassigned are spilled; the target's frame layout
//! gives them stack slots.

use crate::liveness::{compute_live_ranges, LiveRange};
use crate::{AllocInst, Weight};

/// Allocation inputs, indexed by variable number.
pub struct AllocInput<'a> {
    /// Pre-assigned physical register, if any.
    pub precolored: &'a [Option<u8>],
    /// Allocation weight.
    pub weight: &'a [Weight],
    /// Bitmask of registers this variable may occupy (its register class).
    pub candidates: &'a [u32],
    /// Bitmask of registers the allocator may hand out at all.
    pub allocatable: u32,
}

/// Result of register allocation: None means spilled.
pub struct AllocResult {
    pub assignments: Vec<Option<u8>>,
}

struct Active {
    end: u32,
    var: u32,
    fixed: bool,
}

/// Allocate registers for the flattened instruction stream.
pub fn allocate<I: AllocInst>(insts: &[I], input: &AllocInput) -> AllocResult {
    let var_count = input.precolored.len();
    let mut assignments: Vec<Option<u8>> = vec![None; var_count];
    if var_count == 0 {
        return AllocResult { assignments };
    }

    let ranges = compute_live_ranges(insts, var_count);

    // Clobber points (register kill markers at calls).
    let mut clobber_points: Vec<(u32, u32)> = Vec::new();
    let mut scratch = Vec::new();
    for (i, inst) in insts.iter().enumerate() {
        scratch.clear();
        inst.clobbers(&mut scratch);
        if !scratch.is_empty() {
            let mask = scratch.iter().fold(0u32, |m, r| m | (1 << r));
            clobber_points.push((i as u32, mask));
        }
    }
    let clobbers_crossing = |r: &LiveRange| -> u32 {
        clobber_points
            .iter()
            .filter(|(p, _)| *p > r.start && *p < r.end)
            .fold(0u32, |m, (_, cm)| m | cm)
    };

    let mut free: u32 = input.allocatable;
    let mut active: Vec<Active> = Vec::new();

    let range_of = |v: u32, ranges: &[LiveRange]| -> Option<LiveRange> {
        ranges.iter().find(|r| r.var == v).cloned()
    };

    for range in &ranges {
        let vi = range.var as usize;

        // Expire intervals that ended at or before this start.
        active.retain(|a| {
            if a.end <= range.start {
                if let Some(reg) = assignments[a.var as usize] {
                    if input.allocatable & (1 << reg) != 0 {
                        free |= 1 << reg;
                    }
                }
                false
            } else {
                true
            }
        });

        if input.weight[vi] == Weight::Zero && input.precolored[vi].is_none() {
            continue;
        }

        if let Some(fixed) = input.precolored[vi] {
            let bit = 1u32 << fixed;
            if input.allocatable & bit == 0 {
                // Non-allocatable register (esp, ebp, ah): assign directly.
                // Multiple variables may share such a register.
                assignments[vi] = Some(fixed);
                continue;
            }
            if free & bit != 0 {
                free &= !bit;
            } else if let Some(pos) = active
                .iter()
                .position(|a| assignments[a.var as usize] == Some(fixed) && !a.fixed)
            {
                // Evict the occupant; try to reassign it, else spill it.
                let evicted = active.remove(pos);
                let evi = evicted.var as usize;
                assignments[evi] = None;
                if let Some(er) = range_of(evicted.var, &ranges) {
                    let mask = input.candidates[evi] & free & !clobbers_crossing(&er);
                    if mask != 0 {
                        let reg = mask.trailing_zeros() as u8;
                        free &= !(1 << reg);
                        assignments[evi] = Some(reg);
                        active.push(Active {
                            end: evicted.end,
                            var: evicted.var,
                            fixed: false,
                        });
                    } else {
                        debug_assert!(
                            input.weight[evi] != Weight::Infinite,
                            "evicted an infinite-weight variable with no register left"
                        );
                    }
                }
            }
            assignments[vi] = Some(fixed);
            active.push(Active {
                end: range.end,
                var: range.var,
                fixed: true,
            });
            active.sort_by_key(|a| a.end);
            continue;
        }

        let mask = input.candidates[vi] & free & !clobbers_crossing(range);
        if mask != 0 {
            let reg = mask.trailing_zeros() as u8;
            free &= !(1 << reg);
            assignments[vi] = Some(reg);
            active.push(Active {
                end: range.end,
                var: range.var,
                fixed: false,
            });
            active.sort_by_key(|a| a.end);
            continue;
        }

        // No free register. Spill the furthest-ending evictable interval if
        // it helps (always for infinite weight; for finite weight only when
        // the victim lives longer).
        let wanted = input.candidates[vi] & !clobbers_crossing(range);
        let victim = active
            .iter()
            .rposition(|a| {
                !a.fixed
                    && input.weight[a.var as usize] != Weight::Infinite
                    && assignments[a.var as usize]
                        .map(|r| wanted & (1 << r) != 0)
                        .unwrap_or(false)
            })
            .filter(|&pos| {
                input.weight[vi] == Weight::Infinite || active[pos].end > range.end
            });
        if let Some(pos) = victim {
            let victim = active.remove(pos);
            let reg = assignments[victim.var as usize].take().unwrap();
            assignments[vi] = Some(reg);
            active.push(Active {
                end: range.end,
                var: range.var,
                fixed: false,
            });
            active.sort_by_key(|a| a.end);
        } else {
            debug_assert!(
                input.weight[vi] != Weight::Infinite,
                "no register available for infinite-weight variable"
            );
            log::debug!(target: "opal::regalloc", "spilling v{}", range.var);
        }
    }

    AllocResult { assignments }
}
