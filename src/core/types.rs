//! Identifiers and shared vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::TEMP_ID_PREFIX;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an opaque identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-issued identifier of one matched pairing.
    SessionId
);

string_id!(
    /// Opaque identity of the matched partner.
    PartnerId
);

string_id!(
    /// Server-issued permanent message identifier.
    MessageId
);

string_id!(
    /// Locally generated provisional message identifier.
    ///
    /// Join key between an optimistic send and the server's later
    /// `message_sent` confirmation.
    TempId
);

impl TempId {
    /// Generate a fresh, process-unique temporary id.
    pub fn generate() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }
}

/// What kind of session the user is searching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Text and attachments only.
    #[default]
    Text,
    /// Voice call.
    Audio,
    /// Video call.
    Video,
}

impl SessionKind {
    /// Whether this kind of session carries a peer-media connection.
    pub fn has_media(self) -> bool {
        matches!(self, SessionKind::Audio | SessionKind::Video)
    }

    /// Track set announced in `media_ready`.
    pub fn media_type(self) -> Option<&'static str> {
        match self {
            SessionKind::Text => None,
            SessionKind::Audio => Some("audio"),
            SessionKind::Video => Some("both"),
        }
    }
}

/// Matching criteria carried by a search request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Requested session kind.
    #[serde(rename = "type")]
    pub kind: SessionKind,
    /// Free-form interest tags.
    #[serde(default)]
    pub interests: Vec<String>,
    /// Preferred conversation language (e.g. `en`).
    pub language: String,
    /// Coarse locale hint used for regional matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale_hint: Option<String>,
}

impl SearchCriteria {
    /// Criteria for a session of `kind` in English with no interests.
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            interests: Vec::new(),
            language: "en".to_string(),
            locale_hint: None,
        }
    }

    /// Add interest tags.
    pub fn with_interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests.extend(interests.into_iter().map(Into::into));
        self
    }

    /// Set the conversation language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the locale hint.
    pub fn with_locale_hint(mut self, hint: impl Into<String>) -> Self {
        self.locale_hint = Some(hint.into());
        self
    }
}

/// Handshake role for the peer-media exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Sends the first media description.
    Offerer,
    /// Answers the offerer's description.
    Answerer,
    /// No session yet.
    #[default]
    Unset,
}

impl Role {
    /// Role committed from the match payload's initiator flag.
    pub fn from_initiator(initiator: bool) -> Self {
        if initiator {
            Role::Offerer
        } else {
            Role::Answerer
        }
    }
}

/// A local media track that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone.
    Audio,
    /// Camera.
    Video,
}
