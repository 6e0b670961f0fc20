mod assembler;
mod smoothness;
mod solver;

pub use assembler::{combine_data_costs, CostAssembler, CostMaps, HARD_COST};
pub use smoothness::{SmoothnessCosts, SmoothnessModel};
pub use solver::{DinicSolver, GraphCutProblem, MinCutSolver, Solution, SolverStatus};
