//! Dominance, natural loops, loop preheaders, execution frequencies.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::cfg::{Cfg, EdgeKind, VertexId};
use crate::rtl::{CompileCtx, Rtl, RtlKind};

/// Assumed iteration count of every natural loop.
pub const LOOP_TRIP_COUNT: f64 = 100.0;

/// The input never carries branch weights, so every conditional jump is an
/// even split.
pub const BRANCH_TAKEN_PROB: f64 = 0.5;

/// Run the whole loop-structure pipeline: dominators, loop depths,
/// preheader insertion, frequency estimation. Returns the loop headers.
pub fn analyze(cfg: &mut Cfg, ctx: &mut CompileCtx) -> HashSet<VertexId> {
  dominance(cfg);
  let headers = identify_loops(cfg, ctx);
  compute_frequency(cfg, &headers);
  headers
}

/// Iterative dominator computation. The entry dominates only itself at the
/// start; everything else starts at the full vertex set and shrinks
/// monotonically, so the fixpoint arrives in at most |V| passes. Vertices
/// with no predecessors (dead code after a non-returning call) keep the
/// full set.
pub fn dominance(cfg: &mut Cfg) {
  let ids = cfg.order.clone();
  let all: HashSet<VertexId> = ids.iter().copied().collect();

  let entry = cfg.entry();
  cfg.vertex_mut(entry).dom = [entry].iter().copied().collect();
  for &id in &ids[1..] {
    cfg.vertex_mut(id).dom = all.clone();
  }

  let mut change = true;
  while change {
    change = false;
    for &id in &ids[1..] {
      let preds = cfg.preds(id);
      if preds.is_empty() {
        continue;
      }

      let mut tmp = cfg.vertex(preds[0]).dom.clone();
      for &pred in &preds[1..] {
        let dom = &cfg.vertex(pred).dom;
        tmp.retain(|v| dom.contains(v));
      }
      tmp.insert(id);

      if tmp.len() != cfg.vertex(id).dom.len() {
        cfg.vertex_mut(id).dom = tmp;
        change = true;
      }
    }
  }
}

/// The natural loop of a backedge m -> n: walk predecessors backward from m,
/// stopping at n, collecting everything visited.
fn identify_loop(cfg: &Cfg, m: VertexId, n: VertexId) -> HashSet<VertexId> {
  let mut members: HashSet<VertexId> = [m, n].iter().copied().collect();
  let mut stack = Vec::new();
  if m != n {
    stack.push(m);
  }

  while let Some(p) = stack.pop() {
    for q in cfg.preds(p) {
      if members.insert(q) {
        stack.push(q);
      }
    }
  }
  members
}

/// Find backedges, bump loop depths, and give every loop header a synthetic
/// preheader that absorbs its sequential in-edges. Returns the headers.
pub fn identify_loops(cfg: &mut Cfg, ctx: &mut CompileCtx) -> HashSet<VertexId> {
  let mut headers = Vec::new();
  let mut header_set = HashSet::new();

  for &id in &cfg.order.clone() {
    for &eid in &cfg.vertex(id).out_edges.clone() {
      let target = cfg.edge(eid).end;
      if !cfg.vertex(id).dom.contains(&target) {
        continue;
      }

      let members = identify_loop(cfg, id, target);
      debug!(
        "backedge {} -> {}: natural loop of {} vertices",
        cfg.vertex(id).rtl.this_insn,
        cfg.vertex(target).rtl.this_insn,
        members.len()
      );
      for member in members {
        cfg.vertex_mut(member).loop_depth += 1;
      }
      if header_set.insert(target) {
        headers.push(target);
      }
    }
  }

  let mut max_bb = cfg
    .order
    .iter()
    .map(|&id| cfg.vertex(id).rtl.basic_block)
    .max()
    .unwrap_or(0);

  for &header in &headers {
    max_bb += 1;
    let pre = cfg.add_vertex(Rtl::new(ctx.synth_id(), max_bb, RtlKind::Preheader));
    cfg.vertex_mut(pre).loop_depth = cfg.vertex(header).loop_depth.saturating_sub(1);

    // sequential in-edges land on the preheader, the backedge stays put
    let in_edges = std::mem::take(&mut cfg.vertex_mut(header).in_edges);
    let mut kept = Vec::new();
    let mut moved = Vec::new();
    for eid in in_edges {
      match cfg.edge(eid).kind {
        EdgeKind::Sequential => {
          cfg.edge_mut(eid).end = pre;
          moved.push(eid);
        }
        EdgeKind::Jump => kept.push(eid),
      }
    }
    cfg.vertex_mut(pre).in_edges = moved;
    cfg.vertex_mut(header).in_edges = kept;
    cfg.link(pre, header, EdgeKind::Sequential);

    let pos = cfg.position(header).expect("header not in program order");
    cfg.order.insert(pos, pre);
  }

  header_set
}

/// Does `pred` branch into a preheader other than `vertex` itself?  Such
/// predecessors route their flow through the loop entry and are excluded
/// from direct sums.
fn feeds_other_preheader(cfg: &Cfg, pred: VertexId, vertex: VertexId) -> bool {
  cfg.vertex(pred).out_edges.iter().any(|&eid| {
    let end = cfg.edge(eid).end;
    end != vertex && cfg.vertex(end).rtl.kind.is_preheader()
  })
}

/// Fixpoint frequency estimation. The entry runs once; a loop header runs
/// its preheader's count times the trip constant; everything else sums its
/// predecessors' contributions, split by branch probability at conditional
/// jumps. Each vertex records the per-predecessor contributions for trace
/// selection.
pub fn compute_frequency(cfg: &mut Cfg, headers: &HashSet<VertexId>) {
  let ids = cfg.order.clone();
  let entry = cfg.entry();
  cfg.vertex_mut(entry).freq = 1.0;

  let mut change = true;
  while change {
    change = false;

    for &id in &ids[1..] {
      let mut new_freq = 0.0;
      let mut contributions: HashMap<VertexId, f64> = HashMap::new();

      if headers.contains(&id) {
        for &eid in &cfg.vertex(id).in_edges {
          let edge = cfg.edge(eid);
          if edge.kind == EdgeKind::Sequential {
            let contrib = LOOP_TRIP_COUNT * cfg.vertex(edge.start).freq;
            contributions.insert(edge.start, contrib);
            new_freq = contrib;
          }
        }
      } else {
        for &eid in &cfg.vertex(id).in_edges {
          let edge = cfg.edge(eid);
          let pred = edge.start;
          if feeds_other_preheader(cfg, pred, id) {
            continue;
          }

          let pred_freq = cfg.vertex(pred).freq;
          let is_cond = cfg.vertex(pred).rtl.kind.is_cond_jump();
          let contrib = match edge.kind {
            EdgeKind::Sequential if is_cond => (1.0 - BRANCH_TAKEN_PROB) * pred_freq,
            EdgeKind::Jump if is_cond => BRANCH_TAKEN_PROB * pred_freq,
            _ => pred_freq,
          };
          new_freq += contrib;
          contributions.insert(pred, contrib);
        }
      }

      #[allow(clippy::float_cmp)]
      if new_freq != cfg.vertex(id).freq {
        change = true;
      }
      let vertex = cfg.vertex_mut(id);
      vertex.freq = new_freq;
      vertex.freq_from = contributions;
    }
  }
}
