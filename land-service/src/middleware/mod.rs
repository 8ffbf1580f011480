//! Request extractors for caller identity and the subscription gate.

pub mod caller;
pub mod subscription;

pub use caller::Caller;
pub use subscription::SubscribedCaller;
