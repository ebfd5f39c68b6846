//! Typed views over the platform-native webhook payloads.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::platform::Platform;

pub mod meet;
pub mod teams;
pub mod zoom;

pub use meet::{MeetNotification, PushEnvelope};
pub use teams::GraphNotification;
pub use zoom::ZoomEvent;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("malformed {platform} payload: {source}")]
    Json {
        platform: Platform,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed google_meet payload: {0}")]
    Meet(#[from] meet::MeetPayloadError),
}

/// A stored payload parsed into the narrow form of its platform.
///
/// Zoom payloads are the whole webhook body, Teams payloads a single item of
/// the Graph `value` array, and Meet payloads the Pub/Sub push envelope.
#[derive(Debug, Clone)]
pub enum PlatformNotification {
    Zoom(ZoomEvent),
    Teams(GraphNotification),
    Meet(MeetNotification),
}

impl PlatformNotification {
    pub fn parse(platform: Platform, payload: &Value) -> Result<Self, NotificationError> {
        let json_error = |source| NotificationError::Json { platform, source };
        match platform {
            Platform::Zoom => ZoomEvent::deserialize(payload)
                .map(PlatformNotification::Zoom)
                .map_err(json_error),
            Platform::MicrosoftTeams => GraphNotification::deserialize(payload)
                .map(PlatformNotification::Teams)
                .map_err(json_error),
            Platform::GoogleMeet => {
                let envelope = PushEnvelope::deserialize(payload).map_err(json_error)?;
                Ok(PlatformNotification::Meet(envelope.into_notification()?))
            }
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformNotification::Zoom(_) => Platform::Zoom,
            PlatformNotification::Teams(_) => Platform::MicrosoftTeams,
            PlatformNotification::Meet(_) => Platform::GoogleMeet,
        }
    }
}
