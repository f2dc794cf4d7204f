use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use concord_store::HashRecord;
use concord_types::models::UserProfile;

pub const REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Store-side lifetime of a refresh session, matching its `expires_at`.
pub const REFRESH_SESSION_TTL: Duration = Duration::from_secs(REFRESH_TOKEN_TTL_SECONDS as u64);

pub fn session_key(refresh_token: &str) -> String {
    format!("refresh_token:{}", refresh_token)
}

/// Server-side state behind one refresh token: the identity snapshot taken
/// at login and an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub user: UserProfile,
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    pub fn starting_at(user: UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            user,
            expires_at: now + chrono::Duration::seconds(REFRESH_TOKEN_TTL_SECONDS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn to_record(&self) -> HashRecord {
        HashRecord::from([
            ("user_id".to_string(), self.user.user_id.to_string()),
            ("username".to_string(), self.user.username.clone()),
            ("avatar_url".to_string(), self.user.avatar_url.clone()),
            ("avatar_color".to_string(), self.user.avatar_color.clone()),
            (
                "expires_at".to_string(),
                self.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ])
    }

    /// `None` if a required field is missing or unparseable.
    pub fn from_record(record: &HashRecord) -> Option<Self> {
        let user_id = record.get("user_id")?.parse().ok()?;
        let username = record.get("username").filter(|name| !name.is_empty())?.clone();
        let expires_at = DateTime::parse_from_rfc3339(record.get("expires_at")?)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            user: UserProfile {
                user_id,
                username,
                avatar_url: record.get("avatar_url").cloned().unwrap_or_default(),
                avatar_color: record.get("avatar_color").cloned().unwrap_or_default(),
            },
            expires_at,
        })
    }
}
