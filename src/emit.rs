//! Assembly emission: prologue, one rendering per node, epilogue.

use std::collections::HashSet;

use anyhow::Result;

use crate::cfg::Cfg;
use crate::regalloc::Allocation;
use crate::registers::consts::{FP, INT_SIZE, LR, PC, SP};
use crate::registers::Reg;
use crate::rtl::{AsmEnv, CompileCtx};

/// Callee-saved registers the allocation actually handed to some symbolic
/// register, sorted by register number.
fn used_callee_registers(allocation: &Allocation) -> Vec<Reg> {
  let mut used: Vec<Reg> = allocation
    .mapping
    .iter()
    .filter(|(sym, real)| !sym.is_machine() && real.is_callee_saved())
    .map(|(_, real)| *real)
    .collect::<HashSet<Reg>>()
    .into_iter()
    .collect();
  used.sort();
  used
}

/// Render the whole function. Labels sit flush left; everything else is
/// tab-indented; renderings of more than one line get blank lines around
/// them. Nothing is written anywhere until the whole body rendered.
pub fn generate_assembly(cfg: &Cfg, ctx: &CompileCtx, allocation: &Allocation) -> Result<String> {
  let env = AsmEnv {
    func_name: &ctx.func_name,
    mapping: &allocation.mapping,
    spilled: &allocation.spilled,
  };

  let mut asm = vec![
    ".arch armv7a".to_string(),
    format!(".global {}", ctx.func_name),
    format!("{}:", ctx.func_name),
    format!("\tmov {}, {}", FP, SP),
  ];

  let callee_saved = used_callee_registers(allocation);
  let mut push_list: Vec<String> = callee_saved.iter().map(Reg::machine_name).collect();
  push_list.push(LR.to_string());
  asm.push(format!("\tpush {{{}}}", push_list.join(", ")));

  let spill_bytes = allocation.spilled.len() as u32 * INT_SIZE;
  if spill_bytes > 0 {
    asm.push(format!("\tsub {0}, {0}, #{1}", SP, spill_bytes));
  }

  for &id in &cfg.order {
    let rtl = &cfg.vertex(id).rtl;
    let lines = rtl.asm(&env)?;
    if lines.is_empty() {
      continue;
    }

    let multi = lines.len() > 1;
    if multi {
      asm.push(String::new());
    }
    for line in lines {
      if rtl.kind.is_label() {
        asm.push(line);
      } else {
        asm.push(format!("\t{}", line));
      }
    }
    if multi {
      asm.push(String::new());
    }
  }

  if spill_bytes > 0 {
    asm.push(format!("\tadd {0}, {0}, #{1}", SP, spill_bytes));
  }
  let mut pop_list: Vec<String> = callee_saved.iter().map(Reg::machine_name).collect();
  pop_list.push(PC.to_string());
  asm.push(format!("\tpop {{{}}}", pop_list.join(", ")));

  Ok(asm.join("\n") + "\n")
}
