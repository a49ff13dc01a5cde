pub mod lead_sync;
pub mod lifecycle;

pub use lead_sync::{HookOutcome, IgnoreReason, LeadSync};
pub use lifecycle::CrmService;
