//! Process-group ownership, stop signals and stray process cleanup

pub mod handle;
pub mod interrupt;
pub mod reaper;

pub use handle::{group_members, ProcessHandle};
pub use interrupt::{Interrupt, InterruptTrigger, StopSignal};
pub use reaper::{CleanupReaper, SweepTargets};
