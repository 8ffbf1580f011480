//! Which projects, plots and bookings a user may see or touch.
//!
//! A [`Scope`] is derived from nothing but the user row and its project
//! assignments, so two requests with the same inputs always get the same
//! answer. Stores turn a scope into a query predicate; handlers use the
//! `permits_*` checks for single objects and report a miss as not-found.

use crate::models::{Booking, Plot, Project, Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Project,
    Plot,
    Booking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Everything.
    Unrestricted,
    /// Projects owned by the user, and whatever hangs off them.
    OwnedBy { owner_id: i64 },
    /// Projects the user is assigned to.
    Assigned { project_ids: Vec<i64> },
    /// Bookings the user created on projects it is assigned to.
    AssignedAndCreatedBy { user_id: i64, project_ids: Vec<i64> },
    /// Nothing at all.
    Denied,
}

/// Resolve the scope of `user` for one kind of entity.
pub fn scope_for(user: &User, assigned_project_ids: &[i64], kind: EntityKind) -> Scope {
    if !user.is_active {
        return Scope::Denied;
    }

    match user.role() {
        Role::SuperAdmin => Scope::Unrestricted,
        Role::Admin => Scope::OwnedBy {
            owner_id: user.user_id,
        },
        Role::Client | Role::Subagent => {
            let mut project_ids = assigned_project_ids.to_vec();
            project_ids.sort_unstable();
            project_ids.dedup();

            match kind {
                EntityKind::Project | EntityKind::Plot => Scope::Assigned { project_ids },
                EntityKind::Booking => Scope::AssignedAndCreatedBy {
                    user_id: user.user_id,
                    project_ids,
                },
            }
        }
        Role::Unknown => Scope::Denied,
    }
}

impl Scope {
    pub fn is_denied(&self) -> bool {
        match self {
            Scope::Denied => true,
            Scope::Assigned { project_ids } | Scope::AssignedAndCreatedBy { project_ids, .. } => {
                project_ids.is_empty()
            }
            Scope::Unrestricted | Scope::OwnedBy { .. } => false,
        }
    }

    pub fn permits_project(&self, project: &Project) -> bool {
        match self {
            Scope::Unrestricted => true,
            Scope::OwnedBy { owner_id } => project.owner_id == *owner_id,
            Scope::Assigned { project_ids } | Scope::AssignedAndCreatedBy { project_ids, .. } => {
                project_ids.contains(&project.project_id)
            }
            Scope::Denied => false,
        }
    }

    /// `project` must be the plot's own project.
    pub fn permits_plot(&self, plot: &Plot, project: &Project) -> bool {
        plot.project_id == project.project_id && self.permits_project(project)
    }

    /// `project` must be the project the booking's plot belongs to.
    pub fn permits_booking(&self, booking: &Booking, project: &Project) -> bool {
        match self {
            Scope::AssignedAndCreatedBy { user_id, .. } => {
                booking.created_by == *user_id && self.permits_project(project)
            }
            _ => self.permits_project(project),
        }
    }

    /// Whether the scope lets the user manage the project itself (edit,
    /// delete, assign people). Assignment alone never does.
    pub fn manages_project(&self, project: &Project) -> bool {
        match self {
            Scope::Unrestricted => true,
            Scope::OwnedBy { owner_id } => project.owner_id == *owner_id,
            _ => false,
        }
    }
}
