//! Connect parameters carried by the WebSocket upgrade request.
//!
//! The client opens `ws://host/ws?userId=..&username=..[&roomId=..]`. The
//! user id and display name come from the authentication collaborator; this
//! module only checks that they are present and well formed.

use url::form_urlencoded;

use crate::{ProtocolError, RoomId, UserId};

/// Longest display name we accept, in characters.
const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Why a connect request was rejected. The `Display` text becomes the body
/// of the HTTP 400 response.
#[derive(Debug, thiserror::Error)]
pub enum ConnectParamsError {
    /// A required query parameter is absent or empty.
    #[error("missing required parameter `{0}`")]
    Missing(&'static str),

    /// An identifier parameter failed validation.
    #[error(transparent)]
    Invalid(#[from] ProtocolError),

    /// The display name is too long or contains control characters.
    #[error("invalid display name: {0}")]
    InvalidDisplayName(String),
}

/// Identity of a connecting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub user_id: UserId,
    pub display_name: String,
    /// Room whose recent history should be replayed on connect. Membership
    /// of every chat message is still checked per message.
    pub room_id: Option<RoomId>,
}

impl ConnectParams {
    /// Parses the upgrade request's query string.
    ///
    /// Values are percent-decoded. Unknown parameters are ignored. An empty
    /// `roomId` is treated as absent.
    pub fn from_query(query: Option<&str>) -> Result<Self, ConnectParamsError> {
        let mut user_id = None;
        let mut display_name = None;
        let mut room_id = None;

        for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match key.as_ref() {
                "userId" => user_id = Some(value.into_owned()),
                "username" => display_name = Some(value.into_owned()),
                "roomId" => room_id = Some(value.into_owned()),
                _ => {}
            }
        }

        let user_id = user_id
            .filter(|v| !v.is_empty())
            .ok_or(ConnectParamsError::Missing("userId"))?;
        let display_name = display_name
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConnectParamsError::Missing("username"))?;

        if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(ConnectParamsError::InvalidDisplayName(format!(
                "longer than {MAX_DISPLAY_NAME_CHARS} characters"
            )));
        }
        if display_name.chars().any(char::is_control) {
            return Err(ConnectParamsError::InvalidDisplayName(
                "contains control characters".into(),
            ));
        }

        let room_id = match room_id.filter(|v| !v.is_empty()) {
            Some(raw) => Some(RoomId::parse(raw)?),
            None => None,
        };

        Ok(Self {
            user_id: UserId::parse(user_id)?,
            display_name,
            room_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_query_minimal() {
        let params = ConnectParams::from_query(Some("userId=alice&username=Alice")).unwrap();
        assert_eq!(params.user_id.as_str(), "alice");
        assert_eq!(params.display_name, "Alice");
        assert!(params.room_id.is_none());
    }

    #[test]
    fn test_from_query_with_room_and_percent_encoding() {
        let params = ConnectParams::from_query(Some(
            "userId=u1&username=Ann%C3%A9e+Li&roomId=r-general&extra=1",
        ))
        .unwrap();
        assert_eq!(params.display_name, "Année Li");
        assert_eq!(params.room_id.unwrap().as_str(), "r-general");
    }

    #[test]
    fn test_from_query_missing_user_id() {
        let err = ConnectParams::from_query(Some("username=Alice")).unwrap_err();
        assert!(matches!(err, ConnectParamsError::Missing("userId")));
    }

    #[test]
    fn test_from_query_missing_everything() {
        let err = ConnectParams::from_query(None).unwrap_err();
        assert!(matches!(err, ConnectParamsError::Missing("userId")));
    }

    #[test]
    fn test_from_query_blank_username() {
        let err = ConnectParams::from_query(Some("userId=alice&username=%20%20")).unwrap_err();
        assert!(matches!(err, ConnectParamsError::Missing("username")));
    }

    #[test]
    fn test_from_query_malformed_user_id() {
        let err = ConnectParams::from_query(Some("userId=al%20ice&username=A")).unwrap_err();
        assert!(matches!(err, ConnectParamsError::Invalid(_)));
        assert!(err.to_string().contains("user id"));
    }

    #[test]
    fn test_from_query_empty_room_is_absent() {
        let params = ConnectParams::from_query(Some("userId=a&username=A&roomId=")).unwrap();
        assert!(params.room_id.is_none());
    }

    #[test]
    fn test_from_query_rejects_control_characters_in_name() {
        let err = ConnectParams::from_query(Some("userId=a&username=A%0Ab")).unwrap_err();
        assert!(matches!(err, ConnectParamsError::InvalidDisplayName(_)));
    }
}
