//! WebSocket Message Types
//!
//! Server→client frames are `{status, error?, event?}`. Client→server
//! frames are filter updates, see [`SubscriptionFilter`](super::SubscriptionFilter).

use serde::Serialize;

use crate::event::Event;

/// Outcome carried by every server frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "KO")]
    Ko,
}

/// Frame sent from server to client
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame<'a> {
    pub status: FrameStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<&'a Event>,
}

impl<'a> ServerFrame<'a> {
    /// An event delivered to the viewer
    pub fn event(event: &'a Event) -> Self {
        Self {
            status: FrameStatus::Ok,
            error: None,
            event: Some(event),
        }
    }

    /// A rejected client request
    pub fn rejection(error: &'a str) -> Self {
        Self {
            status: FrameStatus::Ko,
            error: Some(error),
            event: None,
        }
    }
}
