//! RTL-to-ARM backend: reads one function's RTL dump, reconstructs control
//! flow, allocates registers with spilling, schedules instructions, and
//! writes ARMv7-A assembly.

mod args;
mod cfg;
mod emit;
mod regalloc;
mod registers;
mod rtl;
mod schedule;
mod sexp;
#[cfg(test)]
mod testutil;
mod utils;

use anyhow::{Context, Result};
use log::info;

use crate::rtl::CompileCtx;

fn main() {
  env_logger::builder()
    .target(env_logger::Target::Stdout)
    .format_timestamp(None)
    .init();

  if let Err(err) = run() {
    eprintln!("{:#}", err);
    std::process::exit(1);
  }
}

fn run() -> Result<()> {
  let config = args::parse_args()?;

  let (func_name, rtl_sexps) = sexp::read_rtl_file(&config.in_file)?;
  let mut ctx = CompileCtx::new(func_name);

  let mut rtls = Vec::new();
  for rtl_sexp in &rtl_sexps {
    if let Some(rtl) = rtl::parse_node(rtl_sexp)? {
      rtls.push(rtl);
    }
  }
  info!("{}: {} instructions", ctx.func_name, rtls.len());

  let mut cfg = cfg::Cfg::from_rtls(rtls)?;
  let headers = cfg::loops::analyze(&mut cfg, &mut ctx);

  let list_schedule = config.schedule && args::PASS_OPTIONS.list_schedule;
  let trace_schedule = config.schedule && args::PASS_OPTIONS.trace_schedule;

  if list_schedule {
    schedule::schedule_blocks(&mut cfg, None);
  }

  let allocation = regalloc::allocate(&mut cfg, &mut ctx)?;
  info!(
    "{}: {} spills, {} callee-saved in use",
    ctx.func_name,
    allocation.spilled.len(),
    allocation
      .mapping
      .values()
      .filter(|reg| reg.is_callee_saved())
      .count()
  );

  if list_schedule {
    schedule::schedule_blocks(&mut cfg, Some(&allocation.mapping));
  }
  if trace_schedule {
    // spill code landed after the last estimate; refresh before selection
    cfg::loops::compute_frequency(&mut cfg, &headers);
    schedule::schedule_trace(&mut cfg, &allocation.mapping);
  }

  let asm = emit::generate_assembly(&cfg, &ctx, &allocation)?;
  std::fs::write(&config.out_file, &asm)
    .with_context(|| format!("cannot write {}", config.out_file))?;
  Ok(())
}
