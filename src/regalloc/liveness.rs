//! Backward liveness fixpoint over the CFG.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::registers::Reg;

/// Compute live-in/live-out for every vertex. Def/use sets are snapshotted
/// fresh on every run because spill rewriting changes the operand trees;
/// this must be re-run after every spill before interference is rebuilt.
pub fn compute_liveness(cfg: &mut Cfg) {
  let ids = cfg.order.clone();

  let mut defs: Vec<HashSet<Reg>> = vec![HashSet::new(); cfg.len()];
  let mut uses: Vec<HashSet<Reg>> = vec![HashSet::new(); cfg.len()];
  for &id in &ids {
    let vertex = cfg.vertex_mut(id);
    defs[id] = vertex.rtl.defs();
    uses[id] = vertex.rtl.uses();
    vertex.live_in.clear();
    vertex.live_out.clear();
  }

  let mut iterate = true;
  while iterate {
    iterate = false;

    for &id in ids.iter().rev() {
      let mut live_out = HashSet::new();
      for succ in cfg.succs(id) {
        live_out.extend(cfg.vertex(succ).live_in.iter().copied());
      }

      let mut live_in = uses[id].clone();
      live_in.extend(live_out.difference(&defs[id]).copied());

      let vertex = cfg.vertex_mut(id);
      vertex.live_out = live_out;
      if live_in != vertex.live_in {
        vertex.live_in = live_in;
        iterate = true;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::*;

  #[test]
  fn straight_line_ranges() {
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 134, 5),
      set_reg(2, 1, 135, 134),
      set_reg(3, 1, 136, 135),
    ])
    .unwrap();
    compute_liveness(&mut cfg);

    assert!(cfg.vertex(0).live_in.is_empty());
    assert_eq!(
      cfg.vertex(1).live_in,
      [vreg(134)].iter().copied().collect()
    );
    assert_eq!(
      cfg.vertex(2).live_in,
      [vreg(135)].iter().copied().collect()
    );
    assert!(cfg.vertex(2).live_out.is_empty());
  }

  #[test]
  fn loop_carried_value_stays_live() {
    // v135 is defined before the loop and used inside it every iteration
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 135, 3),
      label(10, 2),
      set_add(11, 2, 134, 134, 135),
      cond_jump(12, 2, "lt", 10),
    ])
    .unwrap();
    compute_liveness(&mut cfg);

    // live around the backedge
    for id in 1..4 {
      assert!(
        cfg.vertex(id).live_in.contains(&vreg(135)),
        "v135 dead at vertex {}",
        id
      );
      assert!(cfg.vertex(id).live_in.contains(&vreg(134)));
    }
    assert!(!cfg.vertex(0).live_in.contains(&vreg(135)));
  }

  #[test]
  fn fixpoint_satisfies_the_dataflow_equation() {
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 135, 3),
      label(10, 2),
      set_add(11, 2, 134, 134, 135),
      cond_jump(12, 2, "lt", 10),
      use_marker(13, 3, 0),
    ])
    .unwrap();
    compute_liveness(&mut cfg);

    for id in 0..cfg.len() {
      let vertex = cfg.vertex(id);
      let mut expected: std::collections::HashSet<_> = vertex.rtl.uses();
      expected.extend(
        vertex
          .live_out
          .difference(&vertex.rtl.defs())
          .copied(),
      );
      assert_eq!(vertex.live_in, expected, "equation fails at vertex {}", id);

      let mut out = std::collections::HashSet::new();
      for succ in cfg.succs(id) {
        out.extend(cfg.vertex(succ).live_in.iter().copied());
      }
      assert_eq!(vertex.live_out, out);
    }
  }

  #[test]
  fn rerunning_is_idempotent() {
    let mut cfg = Cfg::from_rtls(vec![
      set_const(1, 1, 135, 3),
      label(10, 2),
      set_add(11, 2, 134, 134, 135),
      cond_jump(12, 2, "lt", 10),
    ])
    .unwrap();
    compute_liveness(&mut cfg);
    let before: Vec<_> = (0..cfg.len())
      .map(|id| (cfg.vertex(id).live_in.clone(), cfg.vertex(id).live_out.clone()))
      .collect();

    compute_liveness(&mut cfg);
    let after: Vec<_> = (0..cfg.len())
      .map(|id| (cfg.vertex(id).live_in.clone(), cfg.vertex(id).live_out.clone()))
      .collect();
    assert_eq!(before, after);
  }
}
