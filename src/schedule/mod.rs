//! Instruction scheduling: per-block list scheduling and cross-block trace
//! scheduling over the frequency-hottest path.

pub mod dag;

use std::collections::HashSet;

use log::debug;

use crate::cfg::{Cfg, EdgeKind, VertexId};
use crate::registers::consts::CONDITION_CODES;
use crate::registers::{Reg, RegType};
use crate::rtl::value::Value;
use crate::rtl::{RegMap, RtlKind};
use crate::schedule::dag::{DepDag, SchedInfo};

/// Scheduling view of one vertex. Defs and uses go through the allocation
/// when one exists, so post-allocation passes track machine registers. The
/// condition-code register is threaded in explicitly (compares define it,
/// conditional jumps read it); it never allocates, but reordering must see
/// the dependency.
fn sched_info(cfg: &Cfg, id: VertexId, mapping: Option<&RegMap>) -> SchedInfo {
  let rtl = &cfg.vertex(id).rtl;

  let map_set = |set: HashSet<Reg>| -> HashSet<Reg> {
    match mapping {
      Some(mapping) => set
        .into_iter()
        .map(|reg| mapping.get(&reg).copied().unwrap_or(reg))
        .collect(),
      None => set,
    }
  };

  let mut defs = map_set(rtl.defs());
  let mut uses = map_set(rtl.uses());
  match &rtl.kind {
    RtlKind::Set { def_value, .. } => {
      if let Value::Reg(cc @ Reg::CondCodes(..)) = def_value {
        defs.insert(*cc);
      }
    }
    RtlKind::CondJump { .. } => {
      uses.insert(Reg::CondCodes(RegType::Cc, CONDITION_CODES));
    }
    _ => {}
  }

  SchedInfo {
    defs,
    uses,
    is_call: rtl.kind.is_call(),
    reads_mem: reads_mem(cfg, id),
    writes_mem: writes_mem(cfg, id),
  }
}

fn reads_mem(cfg: &Cfg, id: VertexId) -> bool {
  match &cfg.vertex(id).rtl.kind {
    RtlKind::Load { .. } => true,
    RtlKind::Set { use_value, .. } => use_value.is_mem(),
    _ => false,
  }
}

fn writes_mem(cfg: &Cfg, id: VertexId) -> bool {
  match &cfg.vertex(id).rtl.kind {
    RtlKind::Store { .. } => true,
    RtlKind::Set { def_value, .. } => def_value.is_mem(),
    _ => false,
  }
}

/// Schedule every basic block: consecutive program-order runs with the same
/// block id, with the leading label and trailing jump pinned in place.
pub fn schedule_blocks(cfg: &mut Cfg, mapping: Option<&RegMap>) {
  let mut start = 0;
  while start < cfg.order.len() {
    let bb = cfg.vertex(cfg.order[start]).rtl.basic_block;
    let mut end = start;
    while end + 1 < cfg.order.len() && cfg.vertex(cfg.order[end + 1]).rtl.basic_block == bb {
      end += 1;
    }
    schedule_block(cfg, start, end, mapping);
    start = end + 1;
  }
}

fn schedule_block(cfg: &mut Cfg, mut start: usize, mut end: usize, mapping: Option<&RegMap>) {
  if cfg.vertex(cfg.order[start]).rtl.kind.is_label() {
    start += 1;
  }
  if start >= end {
    return;
  }
  if cfg.vertex(cfg.order[end]).rtl.is_jump() {
    end -= 1;
  }
  if end <= start {
    return;
  }

  let old_ids: Vec<VertexId> = cfg.order[start..=end].to_vec();

  // scheduling permutes straight-line code only: every interior vertex must
  // sit on a simple sequential chain (an embedded non-returning call breaks
  // it, and such a block is left alone)
  let mut chain: Vec<usize> = Vec::with_capacity(old_ids.len() - 1);
  for window in old_ids.windows(2) {
    let out = &cfg.vertex(window[0]).out_edges;
    if out.len() != 1 {
      return;
    }
    let eid = out[0];
    if cfg.edge(eid).end != window[1] || cfg.edge(eid).kind != EdgeKind::Sequential {
      return;
    }
    chain.push(eid);
  }
  for &id in &old_ids[1..] {
    if cfg.vertex(id).in_edges.len() != 1 {
      return;
    }
  }

  let infos: Vec<SchedInfo> = old_ids
    .iter()
    .map(|&id| sched_info(cfg, id, mapping))
    .collect();
  let perm = dag::DepDag::build(&infos).list_schedule();
  debug_assert_eq!(perm.len(), old_ids.len());

  let new_ids: Vec<VertexId> = perm.iter().map(|&p| old_ids[p]).collect();
  if new_ids == old_ids {
    return;
  }
  debug!(
    "rescheduled block {} ({} instructions)",
    cfg.vertex(old_ids[0]).rtl.basic_block,
    old_ids.len()
  );

  // rewire: boundary edges keep their outside endpoints, the chain edges
  // are re-threaded through the new order
  let entry_edges = std::mem::take(&mut cfg.vertex_mut(old_ids[0]).in_edges);
  let exit_edges = std::mem::take(&mut cfg.vertex_mut(*old_ids.last().unwrap()).out_edges);
  for &id in &old_ids {
    cfg.vertex_mut(id).in_edges.clear();
    cfg.vertex_mut(id).out_edges.clear();
  }

  let first = new_ids[0];
  for &eid in &entry_edges {
    cfg.edge_mut(eid).end = first;
  }
  cfg.vertex_mut(first).in_edges = entry_edges;

  for (k, &eid) in chain.iter().enumerate() {
    let from = new_ids[k];
    let to = new_ids[k + 1];
    cfg.edge_mut(eid).start = from;
    cfg.edge_mut(eid).end = to;
    cfg.vertex_mut(from).out_edges.push(eid);
    cfg.vertex_mut(to).in_edges.push(eid);
  }

  let last = *new_ids.last().unwrap();
  for &eid in &exit_edges {
    cfg.edge_mut(eid).start = last;
  }
  cfg.vertex_mut(last).out_edges = exit_edges;

  cfg.order[start..=end].copy_from_slice(&new_ids);
}

/// Highest-frequency successor of a vertex, first wins ties.
fn hottest_succ(cfg: &Cfg, id: VertexId) -> Option<VertexId> {
  let mut best: Option<(VertexId, f64)> = None;
  for &eid in &cfg.vertex(id).out_edges {
    let end = cfg.edge(eid).end;
    let freq = cfg.vertex(end).freq;
    if best.map_or(true, |(_, b)| freq > b) {
      best = Some((end, freq));
    }
  }
  best.map(|(id, _)| id)
}

/// The predecessor contributing the largest frequency share, first wins
/// ties (walking the in-edge list keeps this deterministic).
fn dominant_pred(cfg: &Cfg, id: VertexId) -> Option<VertexId> {
  let vertex = cfg.vertex(id);
  let mut best: Option<(VertexId, f64)> = None;
  for &eid in &vertex.in_edges {
    let pred = cfg.edge(eid).start;
    let share = vertex.freq_from.get(&pred).copied().unwrap_or(0.0);
    if best.map_or(true, |(_, b)| share > b) {
      best = Some((pred, share));
    }
  }
  best.map(|(id, _)| id)
}

/// Pick the hottest trace: seed at the maximum-frequency vertex, grow
/// forward while the hottest successor is dominated by the current vertex,
/// grow backward symmetrically, never entering a preheader and never
/// folding back over the program order. Returns ascending order positions.
fn select_trace(cfg: &Cfg) -> Vec<usize> {
  let mut seed = 0;
  let mut best = f64::NEG_INFINITY;
  for (pos, &id) in cfg.order.iter().enumerate() {
    let freq = cfg.vertex(id).freq;
    if freq > best {
      best = freq;
      seed = pos;
    }
  }

  let mut trace = std::collections::VecDeque::new();
  trace.push_back(seed);

  let mut cur = seed;
  loop {
    let cand = match hottest_succ(cfg, cfg.order[cur]) {
      Some(cand) => cand,
      None => break,
    };
    if cfg.vertex(cand).rtl.kind.is_preheader() {
      break;
    }
    let cand_pos = match cfg.position(cand) {
      Some(pos) if pos > cur => pos,
      _ => break,
    };
    if dominant_pred(cfg, cand) != Some(cfg.order[cur]) {
      break;
    }
    trace.push_back(cand_pos);
    cur = cand_pos;
  }

  cur = seed;
  loop {
    let cand = match dominant_pred(cfg, cfg.order[cur]) {
      Some(cand) => cand,
      None => break,
    };
    if cfg.vertex(cand).rtl.kind.is_preheader() {
      break;
    }
    let cand_pos = match cfg.position(cand) {
      Some(pos) if pos < cur => pos,
      _ => break,
    };
    if hottest_succ(cfg, cand) != Some(cfg.order[cur]) {
      break;
    }
    trace.push_front(cand_pos);
    cur = cand_pos;
  }

  trace.into_iter().collect()
}

/// Conservative cross-block constraints. At a join (label) an instruction
/// defining a register live into the join stays on its side of it; at a
/// split (jump) the same holds for registers live out of the branch; memory
/// writes and calls never cross any boundary; boundaries keep mutual order.
fn add_boundary_pins(
  cfg: &Cfg,
  ids: &[VertexId],
  infos: &[SchedInfo],
  mapping: &RegMap,
  dag: &mut DepDag,
) {
  let is_boundary: Vec<bool> = ids
    .iter()
    .map(|&id| {
      matches!(
        cfg.vertex(id).rtl.kind,
        RtlKind::Label | RtlKind::Jump { .. } | RtlKind::CondJump { .. }
      )
    })
    .collect();
  let pinned: Vec<bool> = infos
    .iter()
    .map(|info| info.writes_mem || info.is_call)
    .collect();

  for (k, &id) in ids.iter().enumerate() {
    if !is_boundary[k] {
      continue;
    }

    let vertex = cfg.vertex(id);
    let live_raw = if vertex.rtl.kind.is_label() {
      &vertex.live_in
    } else {
      &vertex.live_out
    };
    let live: HashSet<Reg> = live_raw
      .iter()
      .map(|reg| mapping.get(reg).copied().unwrap_or(*reg))
      .collect();

    for j in 0..ids.len() {
      if j == k {
        continue;
      }
      let must_pin =
        is_boundary[j] || pinned[j] || !infos[j].defs.is_disjoint(&live);
      if !must_pin {
        continue;
      }
      if j < k {
        dag.pin(j, k);
      } else {
        dag.pin(k, j);
      }
    }
  }
}

/// Trace scheduling: build the cross-block DAG over the selected trace,
/// schedule it, and splice the result back into the sorted original
/// positions, leaving non-trace instructions where they were. Runs last, so
/// only program order (which emission reads) is updated.
pub fn schedule_trace(cfg: &mut Cfg, mapping: &RegMap) {
  let slots = select_trace(cfg);
  if slots.len() < 2 {
    return;
  }
  debug!(
    "trace of {} instructions seeded at frequency {}",
    slots.len(),
    cfg.vertex(cfg.order[slots[0]]).freq
  );

  let ids: Vec<VertexId> = slots.iter().map(|&pos| cfg.order[pos]).collect();
  let infos: Vec<SchedInfo> = ids
    .iter()
    .map(|&id| sched_info(cfg, id, Some(mapping)))
    .collect();

  let mut dag = DepDag::build(&infos);
  add_boundary_pins(cfg, &ids, &infos, mapping, &mut dag);

  let perm = dag.list_schedule();
  for (slot, &p) in slots.iter().zip(perm.iter()) {
    cfg.order[*slot] = ids[p];
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cfg::loops;
  use crate::regalloc::compute_liveness;
  use crate::rtl::CompileCtx;
  use crate::testutil::*;

  #[test]
  fn block_scheduling_preserves_count_and_topology() {
    // two independent chains inside one block; count stays, deps hold
    let mut cfg = Cfg::from_rtls(vec![
      label(1, 2),
      load_mem(2, 2, 134, 140),
      set_add(3, 2, 135, 134, 134),
      set_const(4, 2, 136, 7),
      set_add(5, 2, 137, 136, 136),
      jump(6, 2, 1),
    ])
    .unwrap();
    let before: HashSet<VertexId> = cfg.order.iter().copied().collect();

    schedule_blocks(&mut cfg, None);

    assert_eq!(cfg.order.len(), 6);
    let after: HashSet<VertexId> = cfg.order.iter().copied().collect();
    assert_eq!(before, after);

    // label stays first, jump stays last
    assert!(cfg.vertex(cfg.order[0]).rtl.kind.is_label());
    assert!(cfg.vertex(cfg.order[5]).rtl.is_jump());

    // defs still precede uses in the new order
    let pos = |id: VertexId| cfg.position(id).unwrap();
    assert!(pos(1) < pos(2)); // load before its add
    assert!(pos(3) < pos(4)); // const before its add

    // the sequential chain matches the new order
    for window in cfg.order.windows(2) {
      assert_eq!(cfg.succs(window[0]), vec![window[1]], "chain broken");
    }
  }

  #[test]
  fn memory_latency_hoists_the_load() {
    // load feeds the last add; list scheduling hoists it above the
    // unrelated consts to hide the four-cycle latency
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 136, 1),
      set_const(2, 1, 137, 2),
      load_mem(3, 1, 134, 140),
      set_add(4, 1, 135, 134, 134),
    ])
    .unwrap();
    schedule_blocks(&mut cfg, None);

    assert_eq!(cfg.order[0], 2, "load should schedule first");
    assert_eq!(cfg.order.len(), 4);
    let pos = |id: VertexId| cfg.position(id).unwrap();
    assert!(pos(2) < pos(3));
  }

  #[test]
  fn blocks_with_embedded_exit_calls_are_left_alone() {
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 134, 1),
      call(2, 1, "exit"),
      set_const(3, 1, 135, 2),
      set_const(4, 1, 136, 3),
    ])
    .unwrap();
    let before = cfg.order.clone();
    schedule_blocks(&mut cfg, None);
    assert_eq!(cfg.order, before);
  }

  #[test]
  fn store_load_pair_keeps_register_dependency() {
    // v134 is stored to memory and an unrelated value is computed; the
    // address register dependency keeps the store after its def
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 134, 9),
      store_mem(2, 1, 140, 134),
      set_const(3, 1, 135, 4),
    ])
    .unwrap();
    schedule_blocks(&mut cfg, None);
    let pos = |id: VertexId| cfg.position(id).unwrap();
    assert!(pos(0) < pos(1));
  }

  #[test]
  fn trace_follows_the_loop_body() {
    // loop body is the hottest path; the trace stays inside it
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 135, 3),
      label(10, 2),
      set_add(11, 2, 134, 134, 135),
      set_add(12, 2, 136, 134, 134),
      cond_jump(13, 2, "lt", 10),
      use_marker(14, 3, 0),
    ])
    .unwrap();
    let mut ctx = CompileCtx::new("f".to_string());
    loops::analyze(&mut cfg, &mut ctx);
    compute_liveness(&mut cfg);

    let slots = select_trace(&cfg);
    let ids: Vec<VertexId> = slots.iter().map(|&p| cfg.order[p]).collect();

    // the trace covers the loop: label, both adds, backedge branch
    assert!(ids.contains(&1));
    assert!(ids.contains(&2));
    assert!(ids.contains(&3));
    assert!(ids.contains(&4));
    // and never the preheader
    assert!(ids.iter().all(|&id| !cfg.vertex(id).rtl.kind.is_preheader()));
  }

  #[test]
  fn trace_scheduling_preserves_instruction_set_and_gaps() {
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 135, 3),
      label(10, 2),
      set_add(11, 2, 134, 134, 135),
      cond_jump(12, 2, "lt", 10),
      use_marker(13, 3, 0),
    ])
    .unwrap();
    let mut ctx = CompileCtx::new("f".to_string());
    loops::analyze(&mut cfg, &mut ctx);
    compute_liveness(&mut cfg);

    let mapping: RegMap = [
      (vreg(134), crate::registers::REAL_REGISTERS[4]),
      (vreg(135), crate::registers::REAL_REGISTERS[5]),
    ]
    .iter()
    .copied()
    .collect();

    let order_before = cfg.order.clone();
    let slots = select_trace(&cfg);
    schedule_trace(&mut cfg, &mapping);

    let before: HashSet<VertexId> = order_before.iter().copied().collect();
    let after: HashSet<VertexId> = cfg.order.iter().copied().collect();
    assert_eq!(before, after);

    // non-trace instructions kept their positions, trace slots still hold
    // trace instructions
    let trace_ids: HashSet<VertexId> = slots.iter().map(|&p| order_before[p]).collect();
    for pos in 0..cfg.order.len() {
      if slots.contains(&pos) {
        assert!(trace_ids.contains(&cfg.order[pos]));
      } else {
        assert_eq!(cfg.order[pos], order_before[pos]);
      }
    }
  }

  #[test]
  fn boundary_pins_keep_the_branch_ordered_after_its_compare() {
    // compare -> conditional jump must stay ordered inside a trace
    let cc = Reg::CondCodes(RegType::Cc, CONDITION_CODES);
    let cmp = crate::rtl::Rtl::new(
      11,
      2,
      RtlKind::Set {
        def_value: Value::Reg(cc),
        use_value: Value::Compare {
          ty: RegType::Cc,
          lhs: Box::new(Value::Reg(vreg(134))),
          rhs: Box::new(Value::Const(0)),
        },
      },
    );
    let mut cfg = Cfg::from_rtls(vec![
      label(10, 2),
      cmp,
      cond_jump(12, 2, "lt", 10),
    ])
    .unwrap();
    compute_liveness(&mut cfg);

    let ids: Vec<VertexId> = vec![0, 1, 2];
    let infos: Vec<SchedInfo> = ids.iter().map(|&id| sched_info(&cfg, id, None)).collect();
    let dag = DepDag::build(&infos);

    // the compare defines the condition codes the branch consumes
    assert!(dag.has_edge(1, 2));
  }
}
