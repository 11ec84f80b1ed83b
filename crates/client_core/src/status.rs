//! Per-message delivery aggregation over recipient status records.
//!
//! Every function here is pure and cheap enough to call on each render.

use shared::domain::{MessageStatus, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

/// True iff every recipient has a record with `delivered_at` set.
///
/// An empty status collection or an empty recipient set is never "all".
pub fn is_delivered_to_all(status: &[MessageStatus], recipients: &[UserId]) -> bool {
    all_recipients(status, recipients, |entry| entry.delivered_at.is_some())
}

/// True iff every recipient has a record with `read_at` set.
pub fn is_read_by_all(status: &[MessageStatus], recipients: &[UserId]) -> bool {
    all_recipients(status, recipients, |entry| entry.read_at.is_some())
}

pub fn status_for<'a>(status: &'a [MessageStatus], user_id: &UserId) -> Option<&'a MessageStatus> {
    status.iter().find(|entry| &entry.user_id == user_id)
}

/// Recipients that have read the message, in recipient order.
pub fn read_by<'a>(status: &[MessageStatus], recipients: &'a [UserId]) -> Vec<&'a UserId> {
    recipients
        .iter()
        .filter(|user_id| status_for(status, user_id).is_some_and(|entry| entry.read_at.is_some()))
        .collect()
}

pub fn delivered_to<'a>(status: &[MessageStatus], recipients: &'a [UserId]) -> Vec<&'a UserId> {
    recipients
        .iter()
        .filter(|user_id| {
            status_for(status, user_id).is_some_and(|entry| entry.delivered_at.is_some())
        })
        .collect()
}

pub fn delivery_state(status: &[MessageStatus], recipients: &[UserId]) -> DeliveryState {
    if is_read_by_all(status, recipients) {
        DeliveryState::Read
    } else if is_delivered_to_all(status, recipients) {
        DeliveryState::Delivered
    } else {
        DeliveryState::Sent
    }
}

fn all_recipients(
    status: &[MessageStatus],
    recipients: &[UserId],
    reached: impl Fn(&MessageStatus) -> bool,
) -> bool {
    if status.is_empty() || recipients.is_empty() {
        return false;
    }
    recipients
        .iter()
        .all(|user_id| status.iter().any(|entry| &entry.user_id == user_id && reached(entry)))
}

#[cfg(test)]
#[path = "tests/status_tests.rs"]
mod tests;
