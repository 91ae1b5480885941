mod grid;
mod outputs;
mod pool;
pub mod sweep;

pub use grid::{Assignment, SweepParam};
