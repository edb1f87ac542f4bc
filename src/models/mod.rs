pub mod availability;
pub mod plan;
pub mod scheduling;
