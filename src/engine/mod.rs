pub mod deadline;
pub mod dispatch;
pub mod fare;
pub mod ledger;
pub mod lifecycle;
pub mod liveness;
pub mod queue;
