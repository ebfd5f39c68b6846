use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Meeting platforms that deliver webhooks to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Zoom,
    MicrosoftTeams,
    GoogleMeet,
}

impl Platform {
    pub const ALL: [Platform; 3] = [
        Platform::Zoom,
        Platform::MicrosoftTeams,
        Platform::GoogleMeet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Zoom => "zoom",
            Platform::MicrosoftTeams => "microsoft_teams",
            Platform::GoogleMeet => "google_meet",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "zoom" => Ok(Platform::Zoom),
            "microsoft_teams" => Ok(Platform::MicrosoftTeams),
            "google_meet" => Ok(Platform::GoogleMeet),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Platform;

    #[test]
    fn parses_every_stored_name() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("webex".parse::<Platform>().is_err());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&Platform::MicrosoftTeams).unwrap();
        assert_eq!(json, "\"microsoft_teams\"");
    }
}
