//! Client roles.
//!
//! A role is announced by the client as the very first line it sends.

/// What kind of client sits on the other end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// An operator console that issues commands and watches node state.
    ControlPanel,

    /// A field node reporting telemetry and exposing one actuator.
    SensorActuator,

    /// Anything that did not announce a known role.
    Unclassified,
}

impl Role {
    /// Parses a handshake token. Matching ignores case and surrounding
    /// whitespace; unknown tokens map to [`Role::Unclassified`].
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.eq_ignore_ascii_case("CONTROL_PANEL") {
            Self::ControlPanel
        } else if token.eq_ignore_ascii_case("SENSOR_ACTUATOR") {
            Self::SensorActuator
        } else {
            Self::Unclassified
        }
    }

    /// The canonical handshake token for this role.
    pub fn token(&self) -> &'static str {
        match self {
            Self::ControlPanel => "CONTROL_PANEL",
            Self::SensorActuator => "SENSOR_ACTUATOR",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }

    /// Whether sessions with this role get a registry entry.
    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unclassified)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_token_ignores_case_and_whitespace() {
        assert_eq!(Role::from_token("CONTROL_PANEL"), Role::ControlPanel);
        assert_eq!(Role::from_token("control_panel"), Role::ControlPanel);
        assert_eq!(Role::from_token("  Sensor_Actuator\r"), Role::SensorActuator);
    }

    #[test]
    fn test_unknown_token_is_unclassified() {
        assert_eq!(Role::from_token("GREENHOUSE"), Role::Unclassified);
        assert_eq!(Role::from_token(""), Role::Unclassified);
        assert!(!Role::Unclassified.is_classified());
    }

    #[test]
    fn test_display_uses_handshake_token() {
        assert_eq!(Role::SensorActuator.to_string(), "SENSOR_ACTUATOR");
        assert_eq!(Role::from_token(Role::ControlPanel.token()), Role::ControlPanel);
    }
}
