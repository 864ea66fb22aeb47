pub mod arbiter;
pub mod finalizer;
pub mod payment;
pub mod sweeper;

pub use arbiter::{HoldArbiter, HoldOutcome};
pub use finalizer::{PurchaseFinalizer, PurchaseOutcome};
pub use payment::{PaymentStatusService, Settlement};
pub use sweeper::{ExpirySweeper, SweepReport};
