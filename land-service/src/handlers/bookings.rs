//! Bookings and installment payments.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    BookingResponse, CreateBookingRequest, InstallmentRequest, ListBookingsQuery,
    UpdateBookingRequest,
};
use crate::middleware::SubscribedCaller;
use crate::models::{
    AuditAction, AuditResource, CreateBooking, ListBookingsFilter, UpdateBooking,
};
use crate::services::{record_booking_operation, EntityKind, InstallmentReceipt};
use crate::services::store::LandStore;
use crate::startup::AppState;

/// POST /bookings
///
/// Claims the plot. A plot that is already booked is a conflict.
pub async fn create_booking(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    req.validate()?;

    let not_found = || AppError::NotFound(anyhow::anyhow!("Plot {} not found", req.plot_id));
    let plot = state
        .store
        .get_plot(req.plot_id)
        .await?
        .ok_or_else(not_found)?;
    let project = state
        .store
        .get_project(plot.project_id)
        .await?
        .ok_or_else(not_found)?;
    if !caller.scope(EntityKind::Plot).permits_plot(&plot, &project) {
        return Err(not_found());
    }

    if !plot.is_available {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Plot {} is already booked",
            plot.plot_number
        )));
    }

    let phase = req
        .phase
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    if let Some(phase) = &phase {
        if !plot.has_phase(phase) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Phase '{}' is not available on plot {}",
                phase,
                plot.plot_number
            )));
        }
    }

    let booking = state
        .store
        .create_booking(&CreateBooking {
            plot_id: plot.plot_id,
            created_by: caller.user_id(),
            customer_name: req.customer_name.trim().to_string(),
            customer_contact: req.customer_contact,
            phase,
            purchase_price: req.purchase_price.unwrap_or(plot.price),
            amount_paid: req.amount_paid,
            payment_reference: req.payment_reference,
        })
        .await?;

    record_booking_operation("create");
    tracing::info!(
        booking_id = booking.booking_id,
        plot_id = booking.plot_id,
        created_by = booking.created_by,
        "Booking created"
    );

    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

/// GET /bookings
pub async fn list_bookings(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let scope = caller.scope(EntityKind::Booking);
    if scope.is_denied() {
        return Ok(Json(Vec::new()));
    }

    let bookings = state
        .store
        .list_bookings(
            &scope,
            &ListBookingsFilter {
                project_id: query.project_id,
                plot_id: query.plot_id,
                status: query.status,
            },
        )
        .await?;

    Ok(Json(
        bookings.into_iter().map(BookingResponse::from).collect(),
    ))
}

/// GET /bookings/:id
pub async fn get_booking(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(booking_id): Path<i64>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .installments
        .visible_booking(&caller.scope(EntityKind::Booking), booking_id)
        .await?;

    Ok(Json(BookingResponse::from(booking)))
}

/// PATCH /bookings/:id
pub async fn update_booking(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(booking_id): Path<i64>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    req.validate()?;
    state
        .installments
        .visible_booking(&caller.scope(EntityKind::Booking), booking_id)
        .await?;

    let booking = state
        .store
        .update_booking(
            booking_id,
            &UpdateBooking {
                customer_name: req.customer_name.map(|n| n.trim().to_string()),
                customer_contact: req.customer_contact,
                status: req.status,
                payment_reference: req.payment_reference,
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Booking {} not found", booking_id)))?;

    Ok(Json(BookingResponse::from(booking)))
}

/// DELETE /bookings/:id
///
/// The plot becomes available again.
pub async fn delete_booking(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(booking_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let booking = state
        .installments
        .visible_booking(&caller.scope(EntityKind::Booking), booking_id)
        .await?;

    if !state.store.delete_booking(booking_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Booking {} not found",
            booking_id
        )));
    }

    record_booking_operation("delete");
    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Delete,
            AuditResource::Booking,
            Some(booking_id),
            format!("Deleted booking for {}", booking.customer_name),
            json!({
                "plot_id": booking.plot_id,
                "customer_name": booking.customer_name,
                "amount_paid": booking.amount_paid,
            }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /bookings/:id/installments
pub async fn pay_installment(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(booking_id): Path<i64>,
    Json(req): Json<InstallmentRequest>,
) -> Result<Json<InstallmentReceipt>, AppError> {
    req.validate()?;

    let receipt = state
        .installments
        .pay(
            &caller.scope(EntityKind::Booking),
            booking_id,
            &req.agent_name,
            req.amount,
        )
        .await?;

    Ok(Json(receipt))
}
