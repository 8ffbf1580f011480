//! Project and plot models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub location: String,
    pub size: String,
    pub description: String,
    pub phases: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Project {
    pub fn has_phase(&self, phase: &str) -> bool {
        self.phases.iter().any(|p| p == phase)
    }
}

#[derive(Debug, Clone)]
pub struct CreateProject {
    pub owner_id: i64,
    pub name: String,
    pub location: String,
    pub size: String,
    pub description: String,
    pub phases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub location: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub phases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Residential,
    Commercial,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Residential => "residential",
            PropertyType::Commercial => "commercial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plot {
    pub plot_id: i64,
    pub project_id: i64,
    pub plot_number: String,
    pub size: Decimal,
    pub price: Decimal,
    pub property_type: String,
    pub phases: Vec<String>,
    pub is_available: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Plot {
    pub fn has_phase(&self, phase: &str) -> bool {
        self.phases.iter().any(|p| p == phase)
    }
}

#[derive(Debug, Clone)]
pub struct CreatePlot {
    pub project_id: i64,
    pub plot_number: String,
    pub size: Decimal,
    pub price: Decimal,
    pub property_type: PropertyType,
    pub phases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListProjectsFilter {
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPlotsFilter {
    pub project_id: Option<i64>,
    pub is_available: Option<bool>,
}

/// Trim, drop blanks and duplicates while keeping first-seen order.
pub fn normalize_phases(phases: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(phases.len());
    for phase in phases {
        let phase = phase.trim();
        if !phase.is_empty() && !out.iter().any(|p| p == phase) {
            out.push(phase.to_string());
        }
    }
    out
}
