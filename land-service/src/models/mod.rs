//! Domain models for land-service.

pub mod audit;
pub mod booking;
pub mod payment;
pub mod plan;
pub mod project;
pub mod sales;
pub mod subscription;
pub mod user;

pub use audit::*;
pub use booking::*;
pub use payment::*;
pub use plan::*;
pub use project::*;
pub use sales::*;
pub use subscription::*;
pub use user::*;
