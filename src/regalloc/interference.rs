//! Interference graph construction from liveness results.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::registers::{Reg, CALLER_SAVE_REGISTERS, REAL_REGISTERS};
use crate::utils::Graph;

#[derive(Debug)]
pub struct InterferenceGraph {
  graph: Graph<Reg>,
}

impl InterferenceGraph {
  /// Seed all pairs of machine registers (they can never share a color),
  /// then connect every pair of registers simultaneously live at some
  /// vertex. A call clobbers the caller-save set, so those registers join
  /// the live set at call vertices. Registers referenced but never live
  /// (dead defs) still enter as isolated nodes so coloring covers them.
  pub fn from_cfg(cfg: &Cfg) -> Self {
    let mut graph = Graph::new();

    for (i, &a) in REAL_REGISTERS.iter().enumerate() {
      for &b in &REAL_REGISTERS[i + 1..] {
        graph.add_edge(a, b);
      }
    }

    for &id in &cfg.order {
      let vertex = cfg.vertex(id);

      let mut live: HashSet<Reg> = vertex.live_in.iter().copied().collect();
      if vertex.rtl.kind.is_call() {
        live.extend(CALLER_SAVE_REGISTERS.iter().copied());
      }

      let live: Vec<Reg> = live.into_iter().collect();
      for (i, &a) in live.iter().enumerate() {
        graph.add_node(a);
        for &b in &live[i + 1..] {
          graph.add_edge(a, b);
        }
      }

      for reg in vertex.rtl.defs().into_iter().chain(vertex.rtl.uses()) {
        graph.add_node(reg);
      }
    }

    InterferenceGraph { graph }
  }

  pub fn graph(&self) -> &Graph<Reg> {
    &self.graph
  }

  pub fn neighbors(&self, reg: &Reg) -> Option<&HashSet<Reg>> {
    self.graph.neighbors(reg)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::regalloc::liveness::compute_liveness;
  use crate::testutil::*;

  #[test]
  fn machine_registers_pairwise_interfere() {
    let cfg = Cfg::from_rtls(vec![set_const(1, 1, 134, 5)]).unwrap();
    let igraph = InterferenceGraph::from_cfg(&cfg);

    for (i, a) in REAL_REGISTERS.iter().enumerate() {
      for b in &REAL_REGISTERS[i + 1..] {
        assert!(igraph.neighbors(a).unwrap().contains(b));
      }
    }
  }

  #[test]
  fn simultaneously_live_registers_interfere() {
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 134, 5),
      set_const(2, 1, 135, 6),
      set_add(3, 1, 136, 134, 135),
    ])
    .unwrap();
    compute_liveness(&mut cfg);
    let igraph = InterferenceGraph::from_cfg(&cfg);

    // both live into insn 3
    assert!(igraph.neighbors(&vreg(134)).unwrap().contains(&vreg(135)));
  }

  #[test]
  fn call_clobbers_caller_save_set() {
    // v134 live across the call picks up edges to every caller-save register
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 134, 5),
      call(2, 1, "printf"),
      set_reg(3, 1, 135, 134),
    ])
    .unwrap();
    compute_liveness(&mut cfg);
    let igraph = InterferenceGraph::from_cfg(&cfg);

    let neighbors = igraph.neighbors(&vreg(134)).unwrap();
    for reg in CALLER_SAVE_REGISTERS.iter() {
      assert!(neighbors.contains(reg), "missing clobber edge to {}", reg);
    }
  }

  #[test]
  fn exit_call_still_sees_clobber_set() {
    // caller-save r0 is set up for the call and live into it; the clobber
    // extension applies at the exit call's vertex even though nothing
    // follows it
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 134, 5),
      use_marker(2, 1, 0),
      call(3, 1, "exit"),
    ])
    .unwrap();
    compute_liveness(&mut cfg);

    assert!(cfg.succs(2).is_empty());
    assert!(cfg.vertex(1).live_in.contains(&caller_save(0)));

    let igraph = InterferenceGraph::from_cfg(&cfg);
    // v134 is dead but referenced, so it is present for coloring
    assert!(igraph.graph().contains(&vreg(134)));
  }

  #[test]
  fn dead_defs_become_isolated_nodes() {
    let cfg = Cfg::from_rtls(vec![set_const(1, 1, 134, 5)]).unwrap();
    let igraph = InterferenceGraph::from_cfg(&cfg);
    assert!(igraph.graph().contains(&vreg(134)));
    assert_eq!(igraph.graph().degree(&vreg(134)), 0);
  }
}
