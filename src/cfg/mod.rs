//! Control-flow graph over RTL nodes.
//!
//! Vertices and edges live in arenas and are addressed by stable indices, so
//! the passes that splice new vertices in (preheader insertion, spill code)
//! never invalidate existing handles. `order` is the program order the
//! emitter will walk; splicing is an insertion into that list.

pub mod loops;

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::registers::Reg;
use crate::rtl::Rtl;

pub type VertexId = usize;
pub type EdgeId = usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EdgeKind {
  /// Fall-through to the next instruction in program order.
  Sequential,
  /// Explicit branch to a label.
  Jump,
}

#[derive(Debug)]
pub struct Edge {
  pub start: VertexId,
  pub end: VertexId,
  pub kind: EdgeKind,
  // basic-block ids of the endpoints, for diagnostics
  pub src_bb: i64,
  pub dest_bb: i64,
}

#[derive(Debug)]
pub struct Vertex {
  pub rtl: Rtl,
  pub in_edges: Vec<EdgeId>,
  pub out_edges: Vec<EdgeId>,
  /// Number of natural loops this vertex sits inside.
  pub loop_depth: u32,
  pub dom: HashSet<VertexId>,
  pub live_in: HashSet<Reg>,
  pub live_out: HashSet<Reg>,
  /// Estimated execution count relative to one function entry.
  pub freq: f64,
  /// Contribution to `freq` per predecessor, for trace selection.
  pub freq_from: HashMap<VertexId, f64>,
}

impl Vertex {
  fn new(rtl: Rtl) -> Self {
    Vertex {
      rtl,
      in_edges: Vec::new(),
      out_edges: Vec::new(),
      loop_depth: 0,
      dom: HashSet::new(),
      live_in: HashSet::new(),
      live_out: HashSet::new(),
      freq: 0.0,
      freq_from: HashMap::new(),
    }
  }
}

#[derive(Debug)]
pub struct Cfg {
  vertices: Vec<Vertex>,
  edges: Vec<Edge>,
  pub order: Vec<VertexId>,
}

impl Cfg {
  /// Build the instruction-level CFG. A jump links a JUMP edge to its target
  /// (missing targets are an inconsistent input program and fatal); a
  /// conditional jump additionally falls through; a non-returning call ends
  /// its path; everything else falls through. Fall-through edges need a next
  /// instruction, so the last node links none; its jump edge, if any, is
  /// still linked.
  pub fn from_rtls(rtls: Vec<Rtl>) -> Result<Cfg> {
    let mut cfg = Cfg {
      vertices: rtls.into_iter().map(Vertex::new).collect(),
      edges: Vec::new(),
      order: Vec::new(),
    };
    cfg.order = (0..cfg.vertices.len()).collect();

    let insn_reference: HashMap<i64, VertexId> = cfg
      .vertices
      .iter()
      .enumerate()
      .map(|(id, vertex)| (vertex.rtl.this_insn, id))
      .collect();

    for idx in 0..cfg.vertices.len() {
      let id = cfg.order[idx];
      let rtl = &cfg.vertices[id].rtl;

      if let Some(target) = rtl.jump_target() {
        let is_conditional = rtl.kind.is_cond_jump();
        let target_id = match insn_reference.get(&target) {
          Some(&target_id) => target_id,
          None => bail!("jump from insn {} to missing insn {}", rtl.this_insn, target),
        };
        cfg.link(id, target_id, EdgeKind::Jump);
        if is_conditional && idx + 1 < cfg.order.len() {
          cfg.link(id, cfg.order[idx + 1], EdgeKind::Sequential);
        }
      } else if cfg.vertices[id].rtl.is_exit_call() {
        // no path continues
      } else if idx + 1 < cfg.order.len() {
        cfg.link(id, cfg.order[idx + 1], EdgeKind::Sequential);
      }
    }

    Ok(cfg)
  }

  pub fn len(&self) -> usize {
    self.vertices.len()
  }

  pub fn entry(&self) -> VertexId {
    self.order[0]
  }

  pub fn vertex(&self, id: VertexId) -> &Vertex {
    &self.vertices[id]
  }

  pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
    &mut self.vertices[id]
  }

  pub fn edge(&self, id: EdgeId) -> &Edge {
    &self.edges[id]
  }

  pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
    &mut self.edges[id]
  }

  /// Add a vertex to the arena without placing it in program order; the
  /// caller splices it where it belongs.
  pub fn add_vertex(&mut self, rtl: Rtl) -> VertexId {
    self.vertices.push(Vertex::new(rtl));
    self.vertices.len() - 1
  }

  pub fn link(&mut self, start: VertexId, end: VertexId, kind: EdgeKind) -> EdgeId {
    let edge = Edge {
      start,
      end,
      kind,
      src_bb: self.vertices[start].rtl.basic_block,
      dest_bb: self.vertices[end].rtl.basic_block,
    };
    let id = self.edges.len();
    self.edges.push(edge);
    self.vertices[start].out_edges.push(id);
    self.vertices[end].in_edges.push(id);
    id
  }

  pub fn preds(&self, id: VertexId) -> Vec<VertexId> {
    self.vertices[id]
      .in_edges
      .iter()
      .map(|&e| self.edges[e].start)
      .collect()
  }

  pub fn succs(&self, id: VertexId) -> Vec<VertexId> {
    self.vertices[id]
      .out_edges
      .iter()
      .map(|&e| self.edges[e].end)
      .collect()
  }

  pub fn position(&self, id: VertexId) -> Option<usize> {
    self.order.iter().position(|&v| v == id)
  }
}
