/*!
 * Process Module
 * Process graph and the importance scheduler that runs over it
 */

pub mod adjuster;
pub mod connection;
pub mod core;
pub mod record;
pub mod table;

// Re-export for convenience
pub use adjuster::{AdjusterTask, OomAdjuster, PassReport};
pub use connection::{ProviderConnection, ServiceConnection};
pub use record::{ProcessRecord, ProcessSignals, ProcessTimes};
pub use table::ProcessTable;
