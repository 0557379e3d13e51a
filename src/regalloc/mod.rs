// Liveness analysis, interference construction, and graph-coloring register
// allocation with iterative spilling.
mod allocation;
mod interference;
mod liveness;

pub use allocation::{allocate, Allocation};
pub use interference::InterferenceGraph;
pub use liveness::compute_liveness;
