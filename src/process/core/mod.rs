/*!
 * Process Core Types
 * Score lattice, flag sets and enums shared by the graph and the adjuster
 */

pub mod types;

pub use types::*;
