//! HTTP handlers for land-service.

pub mod audit;
pub mod bookings;
pub mod gateway;
pub mod payments;
pub mod plans;
pub mod plots;
pub mod projects;
pub mod sales;
pub mod subscriptions;
pub mod users;
pub mod webhooks;
