//! Records, value objects and the collaborator ports the services depend on.

pub mod accrual;
pub mod identity;
pub mod metadata;
pub mod money;
pub mod page;
pub mod ports;
pub mod transaction;
