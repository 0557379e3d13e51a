//! Dependency DAG and priority machinery shared by both scheduling passes.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::registers::{Reg, CALLER_SAVE_REGISTERS};

/// Result latency when the producing instruction reads memory.
pub const MEM_LATENCY: i64 = 4;
/// Result latency of register-to-register instructions.
pub const DEF_USE_LATENCY: i64 = 1;
/// Anti dependencies order instructions without modeling latency.
pub const ANTI_LATENCY: i64 = 0;

/// What the DAG builder needs to know about one instruction.
#[derive(Debug, Clone)]
pub struct SchedInfo {
  pub defs: HashSet<Reg>,
  pub uses: HashSet<Reg>,
  pub is_call: bool,
  pub reads_mem: bool,
  pub writes_mem: bool,
}

/// Scheduling priority: longest weighted path to a sink, then successor
/// count, then earliest original position. Ordered so that the greater
/// priority schedules first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Priority {
  pub path: i64,
  pub succ_count: usize,
  pub order: usize,
}

impl Ord for Priority {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .path
      .cmp(&other.path)
      .then(self.succ_count.cmp(&other.succ_count))
      .then(other.order.cmp(&self.order))
  }
}

impl PartialOrd for Priority {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

#[derive(Debug)]
pub struct DepDag {
  n: usize,
  succs: Vec<HashMap<usize, i64>>,
  preds: Vec<HashMap<usize, i64>>,
}

impl DepDag {
  /// Build register dependencies over a straight-line view of `items`.
  ///
  /// Scanning backward from each instruction while its pending defs
  /// survive, an earlier use of a pending def is an anti dependency
  /// (earlier use -> later def, weight 0). Scanning forward, an instruction
  /// consuming a pending def is a true dependency at memory or register
  /// latency; a redefinition closes the window. Calls def and use the whole
  /// caller-save set. Memory accesses are not disambiguated: a write keeps
  /// its order against every other access (spill slots alias through
  /// distinct register generations, so register deps alone cannot see
  /// store-to-load ordering).
  pub fn build(items: &[SchedInfo]) -> DepDag {
    let n = items.len();
    let mut dag = DepDag {
      n,
      succs: vec![HashMap::new(); n],
      preds: vec![HashMap::new(); n],
    };

    let effective = |set: &HashSet<Reg>, is_call: bool| -> HashSet<Reg> {
      let mut set = set.clone();
      if is_call {
        set.extend(CALLER_SAVE_REGISTERS.iter().copied());
      }
      set
    };
    let defs: Vec<HashSet<Reg>> = items.iter().map(|it| effective(&it.defs, it.is_call)).collect();
    let uses: Vec<HashSet<Reg>> = items.iter().map(|it| effective(&it.uses, it.is_call)).collect();

    for i in 0..n {
      // anti dependencies
      let mut pending = defs[i].clone();
      let mut j = i;
      while j > 0 && !pending.is_empty() {
        j -= 1;
        pending.retain(|reg| !defs[j].contains(reg));
        if pending.iter().any(|reg| uses[j].contains(reg)) {
          dag.add_edge(j, i, ANTI_LATENCY);
        }
      }

      // true dependencies
      let latency = if items[i].reads_mem {
        MEM_LATENCY
      } else {
        DEF_USE_LATENCY
      };
      let mut pending = defs[i].clone();
      for j in i + 1..n {
        if pending.is_empty() {
          break;
        }
        if pending.iter().any(|reg| uses[j].contains(reg)) {
          dag.add_edge(i, j, latency);
        }
        pending.retain(|reg| !defs[j].contains(reg));
      }
    }

    // memory ordering
    for i in 0..n {
      for j in i + 1..n {
        let ordered = (items[i].writes_mem && (items[j].writes_mem || items[j].reads_mem))
          || (items[i].reads_mem && items[j].writes_mem);
        if ordered {
          dag.pin(i, j);
        }
      }
    }

    dag
  }

  pub fn len(&self) -> usize {
    self.n
  }

  pub fn add_edge(&mut self, from: usize, to: usize, weight: i64) {
    debug_assert!(from < to, "dependency edges always point forward");
    self.succs[from].insert(to, weight);
    self.preds[to].insert(from, weight);
  }

  /// Ordering-only edge that never downgrades an existing latency edge.
  pub fn pin(&mut self, from: usize, to: usize) {
    if !self.succs[from].contains_key(&to) {
      self.add_edge(from, to, ANTI_LATENCY);
    }
  }

  pub fn has_edge(&self, from: usize, to: usize) -> bool {
    self.succs[from].contains_key(&to)
  }

  /// Longest weighted path from each node to any sink, by relaxing in
  /// reverse-topological (sinks first) order.
  fn critical_paths(&self) -> Vec<i64> {
    let mut out_degree: Vec<usize> = self.succs.iter().map(HashMap::len).collect();
    let mut stack: Vec<usize> = (0..self.n).filter(|&i| out_degree[i] == 0).collect();
    let mut paths = vec![0i64; self.n];

    while let Some(node) = stack.pop() {
      for (&pred, &weight) in &self.preds[node] {
        paths[pred] = paths[pred].max(paths[node] + weight);
        out_degree[pred] -= 1;
        if out_degree[pred] == 0 {
          stack.push(pred);
        }
      }
    }
    paths
  }

  pub fn priorities(&self) -> Vec<Priority> {
    let paths = self.critical_paths();
    (0..self.n)
      .map(|i| Priority {
        path: paths[i],
        succ_count: self.succs[i].len(),
        order: i,
      })
      .collect()
  }

  /// Ready-set list scheduling: repeatedly emit the highest-priority node
  /// with no unscheduled predecessor. Returns the chosen permutation of
  /// 0..n, always a topological order of the DAG.
  pub fn list_schedule(&self) -> Vec<usize> {
    let priorities = self.priorities();
    let mut in_degree: Vec<usize> = self.preds.iter().map(HashMap::len).collect();

    let mut ready: BinaryHeap<(Priority, usize)> = (0..self.n)
      .filter(|&i| in_degree[i] == 0)
      .map(|i| (priorities[i], i))
      .collect();

    let mut scheduled = Vec::with_capacity(self.n);
    while let Some((_, node)) = ready.pop() {
      scheduled.push(node);
      for &succ in self.succs[node].keys() {
        in_degree[succ] -= 1;
        if in_degree[succ] == 0 {
          ready.push((priorities[succ], succ));
        }
      }
    }

    debug_assert_eq!(scheduled.len(), self.n);
    scheduled
  }
}
