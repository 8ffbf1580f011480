//! land-service: projects, plots, bookings and installment sales, gated by
//! subscriptions paid through Pesapal.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
