//! The RTL instruction model: one node per input descriptor, each knowing
//! its def/use register sets and its final assembly rendering.

pub mod value;

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use enum_as_inner::EnumAsInner;

use crate::registers::consts::INT_SIZE;
use crate::registers::Reg;
use crate::sexp::{Atom, Sexp};
use crate::rtl::value::Value;

/// Final placement of every symbolic register.
pub type RegMap = HashMap<Reg, Reg>;

/// Callees that never return; their call sites end the block.
const EXIT_FUNCS: [&str; 3] = ["exit", "abort", "_exit"];

/// Per-function state threaded through the pipeline: the label namespace and
/// a counter for the instruction ids of synthesized nodes.
pub struct CompileCtx {
  pub func_name: String,
  next_synth: i64,
}

impl CompileCtx {
  pub fn new(func_name: String) -> Self {
    CompileCtx {
      func_name,
      next_synth: 0,
    }
  }

  /// Fresh negative instruction id; input ids are positive, so synthesized
  /// nodes never collide with them.
  pub fn synth_id(&mut self) -> i64 {
    self.next_synth -= 1;
    self.next_synth
  }
}

/// Everything rendering needs: the label namespace, the allocation, and the
/// spill list that fixes stack-slot order.
pub struct AsmEnv<'a> {
  pub func_name: &'a str,
  pub mapping: &'a RegMap,
  pub spilled: &'a [Reg],
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum RtlKind {
  /// def := use
  Set { def_value: Value, use_value: Value },
  /// Bare use/clobber marker; keeps its operands live, renders nothing.
  Use { use_value: Value },
  Jump { target: i64 },
  CondJump { target: i64, comp: String },
  Call { callee: String },
  Label,
  /// Reload of a spilled register, synthesized in front of a use site.
  Load { reg: Reg },
  /// Writeback of a spilled register, synthesized after a def site.
  Store { reg: Reg },
  /// Empty landing block in front of a loop header.
  Preheader,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rtl {
  pub this_insn: i64,
  pub basic_block: i64,
  pub kind: RtlKind,
}

impl Rtl {
  pub fn new(this_insn: i64, basic_block: i64, kind: RtlKind) -> Self {
    Rtl {
      this_insn,
      basic_block,
      kind,
    }
  }

  pub fn make_label(func_name: &str, insn: i64) -> String {
    format!("L{}_{}", insn, func_name)
  }

  pub fn is_exit_call(&self) -> bool {
    match &self.kind {
      RtlKind::Call { callee } => EXIT_FUNCS.contains(&callee.as_str()),
      _ => false,
    }
  }

  pub fn is_jump(&self) -> bool {
    matches!(self.kind, RtlKind::Jump { .. } | RtlKind::CondJump { .. })
  }

  pub fn jump_target(&self) -> Option<i64> {
    match self.kind {
      RtlKind::Jump { target } | RtlKind::CondJump { target, .. } => Some(target),
      _ => None,
    }
  }

  /// Registers written by this node. Recomputed on demand; spilling mutates
  /// operand trees, so nothing here may be cached.
  pub fn defs(&self) -> HashSet<Reg> {
    match &self.kind {
      RtlKind::Set { def_value, .. } => def_value.defs(),
      RtlKind::Load { reg } => reg.def_set(),
      _ => HashSet::new(),
    }
  }

  /// Registers read by this node. A memory destination's address registers
  /// count as uses.
  pub fn uses(&self) -> HashSet<Reg> {
    match &self.kind {
      RtlKind::Set {
        def_value,
        use_value,
      } => {
        let mut uses = use_value.uses();
        if def_value.is_mem() {
          uses.extend(def_value.uses());
        }
        uses
      }
      RtlKind::Use { use_value } => use_value.uses(),
      RtlKind::Store { reg } => reg.use_set(),
      _ => HashSet::new(),
    }
  }

  /// Rewrite `old` throughout the use side of this instruction (including a
  /// memory destination's address) to the given generation.
  pub fn rename_virt_uses(&mut self, old: &Reg, prime: i64) {
    match &mut self.kind {
      RtlKind::Set {
        def_value,
        use_value,
      } => {
        use_value.update_virt_reg(old, prime);
        if def_value.is_mem() {
          def_value.update_virt_reg(old, prime);
        }
      }
      RtlKind::Use { use_value } => use_value.update_virt_reg(old, prime),
      _ => {}
    }
  }

  /// Rewrite `old` in the def position of this instruction.
  pub fn rename_virt_defs(&mut self, old: &Reg, prime: i64) {
    if let RtlKind::Set { def_value, .. } = &mut self.kind {
      if !def_value.is_mem() {
        def_value.update_virt_reg(old, prime);
      }
    }
  }

  fn spill_slot(&self, reg: &Reg, env: &AsmEnv) -> Result<String> {
    let idx = match env.spilled.iter().position(|s| reg.fuzzy_eq(s)) {
      Some(idx) => idx,
      None => bail!("register {} has no spill slot", reg),
    };
    let reg_name = Value::Reg(*reg).asm(env, false)?;
    Ok(format!(
      "{}, [{},#{}]",
      reg_name,
      crate::registers::consts::SP,
      idx as u32 * INT_SIZE
    ))
  }

  /// Render this node into zero or more assembly lines. An operand
  /// combination outside the lowering table is a fatal internal error.
  pub fn asm(&self, env: &AsmEnv) -> Result<Vec<String>> {
    match &self.kind {
      RtlKind::Set {
        def_value,
        use_value,
      } => self.set_asm(def_value, use_value, env),
      RtlKind::Use { .. } | RtlKind::Preheader => Ok(vec![]),
      RtlKind::Jump { target } => Ok(vec![format!(
        "b {}",
        Rtl::make_label(env.func_name, *target)
      )]),
      RtlKind::CondJump { target, comp } => Ok(vec![format!(
        "b{} {}",
        comp,
        Rtl::make_label(env.func_name, *target)
      )]),
      RtlKind::Call { callee } => Ok(vec![format!("bl {}", callee)]),
      RtlKind::Label => Ok(vec![format!(
        "{}:",
        Rtl::make_label(env.func_name, self.this_insn)
      )]),
      RtlKind::Load { reg } => Ok(vec![format!("ldr {}", self.spill_slot(reg, env)?)]),
      RtlKind::Store { reg } => Ok(vec![format!("str {}", self.spill_slot(reg, env)?)]),
    }
  }

  fn set_asm(&self, def_value: &Value, use_value: &Value, env: &AsmEnv) -> Result<Vec<String>> {
    if def_value.is_reg() {
      match use_value {
        Value::Reg(_) | Value::Const(_) => {
          let def_asm = def_value.asm(env, false)?;
          let use_asm = use_value.asm(env, false)?;
          if def_asm == use_asm {
            Ok(vec![])
          } else {
            Ok(vec![format!("mov {}, {}", def_asm, use_asm)])
          }
        }
        Value::Compare { lhs, rhs, .. } => Ok(vec![format!(
          "cmp {}, {}",
          lhs.asm(env, false)?,
          rhs.asm(env, false)?
        )]),
        Value::Arith { op, lhs, rhs, .. } => Ok(vec![format!(
          "{} {}, {}, {}",
          op.as_ref(),
          def_value.asm(env, false)?,
          lhs.asm(env, false)?,
          rhs.asm(env, false)?
        )]),
        Value::Mem { .. } => Ok(vec![format!(
          "ldr {}, {}",
          def_value.asm(env, false)?,
          use_value.asm(env, false)?
        )]),
      }
    } else if def_value.is_mem() {
      Ok(vec![format!(
        "str {}, {}",
        use_value.asm(env, false)?,
        def_value.asm(env, false)?
      )])
    } else {
      bail!("no lowering for destination {:?}", def_value)
    }
  }
}

/// Parse one instruction descriptor into zero or one node. Descriptor kinds
/// the backend does not model (notes, barriers, ...) and descriptors too
/// short to carry the `(kind id _ _ bb ...)` shape are dropped; a recognized
/// kind with a malformed body is fatal.
pub fn parse_node(sexp: &Sexp) -> Result<Option<Rtl>> {
  let items = match sexp.as_list() {
    Some(items) => items,
    None => return Ok(None),
  };
  let kind = match sexp.head_sym() {
    Some(kind) => kind.to_lowercase(),
    None => return Ok(None),
  };
  if !matches!(kind.as_str(), "insn" | "jump_insn" | "call_insn" | "code_label") {
    return Ok(None);
  }
  if items.len() < 5 {
    return Ok(None);
  }

  let field = |idx: usize| -> Result<i64> {
    match items.get(idx).and_then(|s| s.as_atom()).and_then(Atom::as_int) {
      Some(&v) => Ok(v),
      None => bail!("malformed {} descriptor: {:?}", kind, sexp),
    }
  };
  let this_insn = field(1)?;
  let basic_block = field(4)?;
  let rest = &items[5..];

  let rtl_kind = match kind.as_str() {
    "insn" => parse_insn_body(rest)?,
    "jump_insn" => parse_jump_body(rest)?,
    "call_insn" => parse_call_body(rest)?,
    "code_label" => RtlKind::Label,
    _ => unreachable!(),
  };

  Ok(Some(Rtl::new(this_insn, basic_block, rtl_kind)))
}

fn parse_insn_body(rest: &[Sexp]) -> Result<RtlKind> {
  let body = match rest.first().and_then(Sexp::as_list) {
    Some(body) => body,
    None => bail!("insn without a body: {:?}", rest),
  };
  match body.len() {
    3 => Ok(RtlKind::Set {
      def_value: Value::parse(&body[1])?,
      use_value: Value::parse(&body[2])?,
    }),
    2 => Ok(RtlKind::Use {
      use_value: Value::parse(&body[1])?,
    }),
    _ => bail!("malformed insn body: {:?}", body),
  }
}

fn parse_jump_body(rest: &[Sexp]) -> Result<RtlKind> {
  // (set (pc) <locs>)
  let body = match rest.first().and_then(Sexp::as_list) {
    Some(body) if body.len() == 3 => body,
    _ => bail!("malformed jump body: {:?}", rest),
  };
  let locs = match body[2].as_list() {
    Some(locs) => locs,
    None => bail!("malformed jump target: {:?}", body),
  };

  match locs.len() {
    // (label_ref N)
    2 => match locs[1].as_atom().and_then(Atom::as_int) {
      Some(&target) => Ok(RtlKind::Jump { target }),
      None => bail!("malformed label_ref: {:?}", locs),
    },
    // (if_then_else (<cc> ..) (label_ref N) (pc))
    4 => {
      let comp = match locs[1].head_sym() {
        Some(comp) => comp.to_lowercase(),
        None => bail!("malformed branch condition: {:?}", locs),
      };
      let taken = match locs[2].as_list() {
        Some(taken) if taken.len() == 2 => taken,
        _ => bail!("malformed branch target: {:?}", locs),
      };
      match taken[1].as_atom().and_then(Atom::as_int) {
        Some(&target) => Ok(RtlKind::CondJump { target, comp }),
        None => bail!("malformed branch target: {:?}", taken),
      }
    }
    _ => bail!("malformed jump form: {:?}", locs),
  }
}

fn parse_call_body(rest: &[Sexp]) -> Result<RtlKind> {
  fn flatten<'a>(sexps: &'a [Sexp], out: &mut Vec<&'a Atom>) {
    for sexp in sexps {
      match sexp {
        Sexp::Atom(atom) => out.push(atom),
        Sexp::List(items) => flatten(items, out),
      }
    }
  }

  let mut flattened = Vec::new();
  flatten(rest, &mut flattened);

  for (idx, atom) in flattened.iter().enumerate() {
    if let Atom::Sym(sym) = atom {
      if sym.to_lowercase().contains("symbol_ref") {
        let callee = match flattened.get(idx + 1) {
          Some(Atom::Str(name)) => name.clone(),
          Some(Atom::Sym(name)) => name.clone(),
          _ => bail!("call without a callee symbol: {:?}", rest),
        };
        return Ok(RtlKind::Call { callee });
      }
    }
  }
  bail!("call without a symbol_ref: {:?}", rest)
}
