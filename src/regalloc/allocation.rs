//! Graph coloring, spill selection and rewriting, and the allocation loop.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use log::debug;

use crate::cfg::{Cfg, EdgeKind};
use crate::regalloc::interference::InterferenceGraph;
use crate::regalloc::liveness::compute_liveness;
use crate::registers::consts::NUM_REAL_REGISTERS;
use crate::registers::{Reg, REAL_REGISTERS};
use crate::rtl::{CompileCtx, RegMap, Rtl, RtlKind};

/// One color per allocatable machine register.
pub const NUM_COLORS: usize = NUM_REAL_REGISTERS;

/// The finished allocation: where every symbolic register lives, and the
/// spill order that fixes stack-slot offsets.
pub struct Allocation {
  pub mapping: RegMap,
  pub spilled: Vec<Reg>,
}

/// Simplify-and-select coloring. Remove a node of degree < k when one
/// exists, otherwise the first node of maximum degree (an optimistic spill);
/// color in reverse removal order with the smallest color unused among
/// already-colored neighbors in the full graph. `None` means uncolorable,
/// which is the loop condition of `allocate`, not a fault.
pub fn color_graph(igraph: &InterferenceGraph) -> Option<HashMap<Reg, u32>> {
  let mut work = igraph.graph().clone();
  let mut removal = Vec::with_capacity(work.len());

  while work.len() > 0 {
    let mut nodes: Vec<Reg> = work.nodes().copied().collect();
    nodes.sort();

    let mut pick = None;
    let mut max_degree = 0;
    for &node in &nodes {
      let degree = work.degree(&node);
      if degree < NUM_COLORS {
        pick = Some(node);
        break;
      }
      if pick.is_none() || degree > max_degree {
        pick = Some(node);
        max_degree = degree;
      }
    }

    let pick = pick.expect("non-empty graph has a node");
    work.remove_node(pick);
    removal.push(pick);
  }

  let mut colors: HashMap<Reg, u32> = HashMap::new();
  for &node in removal.iter().rev() {
    let neighbor_colors: HashSet<u32> = igraph
      .neighbors(&node)
      .map(|neighbors| neighbors.iter().filter_map(|n| colors.get(n)).copied().collect())
      .unwrap_or_default();

    match (0..NUM_COLORS as u32).find(|c| !neighbor_colors.contains(c)) {
      Some(color) => {
        colors.insert(node, color);
      }
      None => return None,
    }
  }
  Some(colors)
}

/// Colors map back to machine registers through the seeded real-register
/// nodes: each real register names its own color.
pub fn color_to_register(colors: &HashMap<Reg, u32>) -> RegMap {
  let mut color_to_real: HashMap<u32, Reg> = HashMap::new();
  for reg in REAL_REGISTERS.iter() {
    color_to_real.insert(colors[reg], *reg);
  }

  colors
    .iter()
    .map(|(&reg, color)| (reg, color_to_real[color]))
    .collect()
}

/// Cheapest register to spill: among virtual registers still at their input
/// generation, minimize Σ 2^loop-depth over referencing vertices. Ties go to
/// the register referenced earliest in program order.
pub fn spill_candidate(cfg: &Cfg) -> Option<Reg> {
  let mut seen: Vec<Reg> = Vec::new();
  let mut costs: HashMap<Reg, u64> = HashMap::new();

  for &id in &cfg.order {
    let vertex = cfg.vertex(id);
    let weight = 1u64 << vertex.loop_depth.min(63);
    for reg in vertex.rtl.defs().into_iter().chain(vertex.rtl.uses()) {
      if !matches!(reg, Reg::Virtual(_, _, 0)) {
        continue;
      }
      if !costs.contains_key(&reg) {
        seen.push(reg);
      }
      *costs.entry(reg).or_insert(0) += weight;
    }
  }

  seen.into_iter().min_by_key(|reg| costs[reg])
}

/// Demote `reg` to a stack slot: every use site gets a reload in front of it
/// (absorbing the site's in-edges) and every def site a writeback after it
/// (absorbing its out-edges). The renamed generations are tagged by the site
/// instruction id, negated on the def side so a use-and-def site yields two
/// distinct generations.
pub fn spill_register(cfg: &mut Cfg, ctx: &mut CompileCtx, reg: Reg) {
  let mut idx = 0;
  while idx < cfg.order.len() {
    let id = cfg.order[idx];
    let site_insn = cfg.vertex(id).rtl.this_insn;
    let bb = cfg.vertex(id).rtl.basic_block;
    let depth = cfg.vertex(id).loop_depth;

    if cfg.vertex(id).rtl.uses().contains(&reg) {
      let new_reg = reg.with_prime(site_insn);
      cfg.vertex_mut(id).rtl.rename_virt_uses(&reg, site_insn);

      let load = cfg.add_vertex(Rtl::new(ctx.synth_id(), bb, RtlKind::Load { reg: new_reg }));
      cfg.vertex_mut(load).loop_depth = depth;

      let in_edges = std::mem::take(&mut cfg.vertex_mut(id).in_edges);
      for &eid in &in_edges {
        cfg.edge_mut(eid).end = load;
      }
      cfg.vertex_mut(load).in_edges = in_edges;
      cfg.link(load, id, EdgeKind::Sequential);

      cfg.order.insert(idx, load);
      idx += 1;
    }

    if cfg.vertex(id).rtl.defs().contains(&reg) {
      let store_gen = -site_insn;
      let new_reg = reg.with_prime(store_gen);
      cfg.vertex_mut(id).rtl.rename_virt_defs(&reg, store_gen);

      let store = cfg.add_vertex(Rtl::new(ctx.synth_id(), bb, RtlKind::Store { reg: new_reg }));
      cfg.vertex_mut(store).loop_depth = depth;

      let out_edges = std::mem::take(&mut cfg.vertex_mut(id).out_edges);
      for &eid in &out_edges {
        cfg.edge_mut(eid).start = store;
      }
      cfg.vertex_mut(store).out_edges = out_edges;
      cfg.link(id, store, EdgeKind::Sequential);

      cfg.order.insert(idx + 1, store);
      idx += 2;
    } else {
      idx += 1;
    }
  }
}

/// The allocation loop: liveness, interference, coloring; one spill per
/// failed attempt. Terminates because every iteration permanently spills a
/// previously unspilled virtual register.
pub fn allocate(cfg: &mut Cfg, ctx: &mut CompileCtx) -> Result<Allocation> {
  let mut spilled: Vec<Reg> = Vec::new();

  loop {
    compute_liveness(cfg);
    let igraph = InterferenceGraph::from_cfg(cfg);

    if let Some(colors) = color_graph(&igraph) {
      debug!(
        "allocated {} registers with {} spills",
        colors.len(),
        spilled.len()
      );
      return Ok(Allocation {
        mapping: color_to_register(&colors),
        spilled,
      });
    }

    let candidate = match spill_candidate(cfg) {
      Some(candidate) => candidate,
      None => bail!("allocation failed: uncolorable with no spillable register left"),
    };
    debug!("uncolorable, spilling {}", candidate);
    spilled.push(candidate);
    spill_register(cfg, ctx, candidate);
  }
}
