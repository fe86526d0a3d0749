//! Webhook fan-out.
//!
//! Receives an alert webhook and:
//! 1. Splits it into version 1 (`alert`) and version 2+ (`alerts`) alerts
//! 2. Renders each alert with the template for its format
//! 3. Submits one message per alert to every room tracking at least one project
//!
//! An alert whose template fails to render is logged and skipped; the other
//! alerts of the same webhook are still queued.
//!
//! Submission only enqueues; delivery happens later on the delivery worker.

use std::sync::Arc;

use serde::Serialize;

use herald_common::error::AppError;
use herald_common::types::{AlertFormat, WebhookPayload};
use herald_notifier::DeliveryQueue;

use crate::render::render;
use crate::rooms::RoomTracker;
use crate::store::ProjectStore;

/// What a single webhook produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Alerts found in the payload
    pub alerts: usize,
    /// Rooms the alerts were fanned out to
    pub rooms: usize,
    /// Messages added to the delivery queue
    pub queued: usize,
    /// Alerts skipped because their template failed to render
    pub render_errors: usize,
}

/// Turns webhooks into queued room messages.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    store: Arc<ProjectStore>,
    tracker: RoomTracker,
    queue: DeliveryQueue,
}

impl AlertDispatcher {
    pub fn new(store: Arc<ProjectStore>, tracker: RoomTracker, queue: DeliveryQueue) -> Self {
        Self {
            store,
            tracker,
            queue,
        }
    }

    /// Parse a raw webhook body and dispatch it.
    pub fn dispatch_json(&self, raw: &[u8]) -> Result<DispatchSummary, AppError> {
        let payload: WebhookPayload = serde_json::from_slice(raw)
            .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {e}")))?;
        Ok(self.dispatch(&payload))
    }

    /// Render and enqueue every alert of `payload` for every tracking room.
    pub fn dispatch(&self, payload: &WebhookPayload) -> DispatchSummary {
        let rooms = self.tracker.rooms_with_tracking();
        let mut summary = DispatchSummary {
            alerts: payload.alert.len() + payload.alerts.len(),
            rooms: rooms.len(),
            ..DispatchSummary::default()
        };

        if rooms.is_empty() {
            tracing::info!(alerts = summary.alerts, "No room tracks any project, alerts dropped");
            return summary;
        }

        let v1_template = self.store.template(AlertFormat::V1);
        let v2_template = self.store.template(AlertFormat::V2);

        for (format, alert) in payload.alerts_with_format() {
            let template = match format {
                AlertFormat::V1 => &v1_template,
                AlertFormat::V2 => &v2_template,
            };
            let body = match render(template, alert) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(
                        format = %format,
                        error = %e,
                        "Failed to render alert, skipping it"
                    );
                    summary.render_errors += 1;
                    continue;
                }
            };

            for room in &rooms {
                let sequence = self.queue.enqueue(room.clone(), body.clone());
                tracing::debug!(
                    room_id = %room,
                    sequence,
                    format = %format,
                    "Queued alert message"
                );
                summary.queued += 1;
            }
        }

        tracing::info!(
            alerts = summary.alerts,
            rooms = summary.rooms,
            queued = summary.queued,
            render_errors = summary.render_errors,
            receiver = payload.receiver.as_deref().unwrap_or("-"),
            "Webhook dispatched"
        );

        summary
    }
}
