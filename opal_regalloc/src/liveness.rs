//! Liveness analysis for variables in a machine-instruction stream.
//!
//! Control flow is recovered in a single forward scan: a block opens at the
//! stream head, at every label, and behind every terminator, and branch
//! edges are collected from every instruction (mid-block conditional jumps
//! included). The backward dataflow runs as a predecessor-driven worklist
//! that re-scans a block's instructions directly, so convergence work is
//! proportional to the blocks whose sets actually change. The result is one
//! conservative [start, end) interval per variable, sorted by start point
//! for linear scan.

use std::collections::{HashMap, HashSet};

use crate::{AllocInst, OpKind};

/// A live range for a single variable: [start, end) in instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRange {
    pub var: u32,
    pub start: u32,
    pub end: u32,
}

/// Block boundaries and edges of the flattened stream. Block `b` spans
/// `starts[b] .. starts[b+1]` (the stream end for the last block).
struct Cfg {
    starts: Vec<u32>,
    succs: Vec<Vec<u32>>,
    preds: Vec<Vec<u32>>,
}

impl Cfg {
    fn build<I: AllocInst>(insts: &[I]) -> Cfg {
        let mut starts: Vec<u32> = Vec::new();
        // Label id -> block opened by it, filled during the same scan.
        let mut label_blocks: HashMap<u32, u32> = HashMap::new();
        // (block, target label) pairs, resolved once every block is known.
        let mut branch_edges: Vec<(u32, u32)> = Vec::new();
        let mut fallthrough_from: Vec<u32> = Vec::new();

        let mut open = false;
        let mut targets = Vec::new();
        for (i, inst) in insts.iter().enumerate() {
            let label = inst.label_id();
            if !open || label.is_some() {
                if open {
                    // The block being cut off by this label runs into it.
                    fallthrough_from.push(starts.len() as u32 - 1);
                }
                starts.push(i as u32);
                open = true;
            }
            let block = starts.len() as u32 - 1;
            if let Some(l) = label {
                label_blocks.insert(l, block);
            }
            targets.clear();
            inst.branch_targets(&mut targets);
            branch_edges.extend(targets.iter().map(|&t| (block, t)));
            if inst.is_terminator() {
                if inst.falls_through() && i + 1 < insts.len() {
                    fallthrough_from.push(block);
                }
                open = false;
            }
        }

        let nblocks = starts.len();
        let mut succs: Vec<Vec<u32>> = vec![Vec::new(); nblocks];
        let mut preds: Vec<Vec<u32>> = vec![Vec::new(); nblocks];
        let connect = |succs: &mut Vec<Vec<u32>>, preds: &mut Vec<Vec<u32>>, from: u32, to: u32| {
            if !succs[from as usize].contains(&to) {
                succs[from as usize].push(to);
                preds[to as usize].push(from);
            }
        };
        for (from, label) in branch_edges {
            if let Some(&to) = label_blocks.get(&label) {
                connect(&mut succs, &mut preds, from, to);
            }
        }
        for from in fallthrough_from {
            if ((from + 1) as usize) < nblocks {
                connect(&mut succs, &mut preds, from, from + 1);
            }
        }

        Cfg {
            starts,
            succs,
            preds,
        }
    }

    fn span(&self, b: usize, stream_len: usize) -> (u32, u32) {
        let lo = self.starts[b];
        let hi = self
            .starts
            .get(b + 1)
            .copied()
            .unwrap_or(stream_len as u32);
        (lo, hi)
    }
}

/// live-in of a span given its live-out: walk the instructions backward,
/// killing at pure definitions and reviving at uses.
fn flow_backward<I: AllocInst>(
    insts: &[I],
    (lo, hi): (u32, u32),
    live_out: &HashSet<u32>,
) -> HashSet<u32> {
    let mut live = live_out.clone();
    let mut ops = Vec::new();
    for i in (lo..hi).rev() {
        ops.clear();
        insts[i as usize].reg_operands(&mut ops);
        for op in &ops {
            if op.kind == OpKind::Def {
                live.remove(&op.var);
            }
        }
        for op in &ops {
            if matches!(op.kind, OpKind::Use | OpKind::UseDef) {
                live.insert(op.var);
            }
        }
    }
    live
}

/// Compute live ranges for all variables in the instruction stream.
pub fn compute_live_ranges<I: AllocInst>(insts: &[I], var_count: usize) -> Vec<LiveRange> {
    if insts.is_empty() || var_count == 0 {
        return Vec::new();
    }
    let cfg = Cfg::build(insts);
    let nblocks = cfg.starts.len();

    let mut live_in: Vec<HashSet<u32>> = vec![HashSet::new(); nblocks];
    let mut live_out: Vec<HashSet<u32>> = vec![HashSet::new(); nblocks];

    // Seed the worklist with every block; a block re-enters whenever one of
    // its successors' live-in sets grows.
    let mut pending: Vec<u32> = (0..nblocks as u32).collect();
    let mut queued = vec![true; nblocks];
    while let Some(b) = pending.pop() {
        let bu = b as usize;
        queued[bu] = false;
        let mut out = HashSet::new();
        for &s in &cfg.succs[bu] {
            out.extend(live_in[s as usize].iter().copied());
        }
        let inn = flow_backward(insts, cfg.span(bu, insts.len()), &out);
        live_out[bu] = out;
        if inn != live_in[bu] {
            live_in[bu] = inn;
            for &p in &cfg.preds[bu] {
                if !queued[p as usize] {
                    queued[p as usize] = true;
                    pending.push(p);
                }
            }
        }
    }

    // Fold intervals per block: block-boundary liveness and instruction
    // occurrences widen the same [start, end) entry.
    let mut ranges: Vec<Option<(u32, u32)>> = vec![None; var_count];
    let stretch = |ranges: &mut Vec<Option<(u32, u32)>>, v: u32, s: u32, e: u32| {
        let r = ranges[v as usize].get_or_insert((s, e));
        r.0 = r.0.min(s);
        r.1 = r.1.max(e);
    };
    let mut ops = Vec::new();
    for b in 0..nblocks {
        let (lo, hi) = cfg.span(b, insts.len());
        for &v in &live_in[b] {
            stretch(&mut ranges, v, lo, lo);
        }
        for &v in &live_out[b] {
            stretch(&mut ranges, v, hi, hi);
        }
        for i in lo..hi {
            ops.clear();
            insts[i as usize].reg_operands(&mut ops);
            for op in &ops {
                stretch(&mut ranges, op.var, i, i + 1);
            }
        }
    }

    let mut result: Vec<LiveRange> = ranges
        .iter()
        .enumerate()
        .filter_map(|(v, r)| {
            r.map(|(start, end)| LiveRange {
                var: v as u32,
                start,
                end,
            })
        })
        .collect();
    result.sort_by_key(|r| r.start);
    result
}
