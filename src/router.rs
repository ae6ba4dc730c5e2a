//! Message router
//!
//! Pure routing over registry snapshots: resolves direct-message
//! recipients and fans events out room-wide. No locking of its own;
//! callers pass in the member snapshot they already hold.
//!
//! Each delivery is one bounded-time attempt against the recipient's
//! outbound queue, run concurrently across recipients, so a stalled
//! client slows nobody else down.

use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::warn;

use crate::error::{DeliveryError, RouteError};
use crate::message::{DirectMessage, NewDirectMessage, ServerEvent};
use crate::registry::Member;
use crate::types::UserId;

/// Bound on one delivery attempt against a recipient's outbound queue
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hand one event to one member's outbound queue
pub async fn deliver(member: &Member, event: ServerEvent) -> Result<(), DeliveryError> {
    member
        .outbound
        .send_timeout(event, DELIVERY_TIMEOUT)
        .await
        .map_err(|e| match e {
            SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
            SendTimeoutError::Closed(_) => DeliveryError::Closed,
        })
}

/// Deliver `event` to every member of the snapshot except `except`
///
/// Deliveries run concurrently and independently; failures are logged
/// per recipient and never propagate. Returns the number of members
/// the event actually reached.
pub async fn fan_out(members: &[Member], except: Option<UserId>, event: &ServerEvent) -> usize {
    let attempts = members
        .iter()
        .filter(|m| Some(m.id) != except)
        .map(|m| async move { (m.id, deliver(m, event.clone()).await) });

    let mut delivered = 0;
    for (id, result) in join_all(attempts).await {
        match result {
            Ok(()) => delivered += 1,
            Err(e) => warn!(recipient = %id, error = %e, "fan-out delivery failed"),
        }
    }
    delivered
}

/// Route a direct message to its addressed recipient
///
/// Looks `to_id` up in the snapshot; an unknown recipient or a failed
/// handover comes back as an error for the sender's session to report.
pub async fn route_direct(members: &[Member], dm: &DirectMessage) -> Result<(), RouteError> {
    let recipient = members
        .iter()
        .find(|m| m.id == dm.to_id)
        .ok_or(RouteError::RecipientNotFound(dm.to_id))?;

    let event = ServerEvent::NewDirectMessage(NewDirectMessage {
        from_id: dm.from_id,
        text: dm.text.clone(),
    });
    deliver(recipient, event)
        .await
        .map_err(|source| RouteError::Undeliverable {
            to_id: dm.to_id,
            source,
        })
}
