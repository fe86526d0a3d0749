//! Outbound delivery seam.

use std::future::Future;
use std::sync::Arc;

use herald_common::types::RoomId;

use crate::error::Result;

/// Sends one rendered message to one room.
///
/// Implementations perform exactly one attempt per call and report failures
/// through [`DeliveryError`](crate::error::DeliveryError); retrying is the
/// delivery worker's job.
pub trait Deliverer: Send + Sync + 'static {
    fn deliver(
        &self,
        destination: &RoomId,
        body: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<D: Deliverer> Deliverer for Arc<D> {
    fn deliver(
        &self,
        destination: &RoomId,
        body: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).deliver(destination, body)
    }
}
