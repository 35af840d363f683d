use serde::{Deserialize, Serialize};

/// A peer participating in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub last_activity: i64,
    /// Kept on the wire for compatibility; the typing set is authoritative.
    #[serde(default)]
    pub is_typing: bool,
    pub tab_id: String,
}

/// Partial user record carried by `USER_UPDATE`. Missing fields are retained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

impl UserPatch {
    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(last_activity) = self.last_activity {
            user.last_activity = last_activity;
        }
        if let Some(is_typing) = self.is_typing {
            user.is_typing = is_typing;
        }
        if let Some(tab_id) = &self.tab_id {
            user.tab_id = tab_id.clone();
        }
    }
}

/// One chat message. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl ChatMessage {
    /// A message is void once its expiry has passed, whether or not GC has removed it yet.
    pub fn is_void(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Content as it should be shown at `now`; `None` for a void message.
    pub fn visible_content(&self, now: i64) -> Option<&str> {
        if self.is_void(now) {
            None
        } else {
            Some(&self.content)
        }
    }

    /// Whole seconds left before expiry, rounded up. `None` without a TTL or once void.
    pub fn remaining_secs(&self, now: i64) -> Option<i64> {
        let expires_at = self.expires_at?;
        if expires_at <= now {
            return None;
        }
        Some((expires_at - now + 999) / 1000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterState {
    pub value: i64,
    pub last_updated_by: Option<String>,
    pub last_updated_at: Option<i64>,
}

/// The full replica exchanged wholesale during join reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub users: Vec<User>,
    pub messages: Vec<ChatMessage>,
    pub counter: CounterState,
    pub typing_users: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(expires_at: Option<i64>) -> ChatMessage {
        ChatMessage {
            id: "msg-1".into(),
            user_id: "user-a".into(),
            username: "MageRogue7".into(),
            content: "hi".into(),
            timestamp: 1_000,
            expires_at,
        }
    }

    #[test]
    fn message_without_ttl_never_voids() {
        let msg = message(None);
        assert!(!msg.is_void(i64::MAX));
        assert_eq!(msg.visible_content(i64::MAX), Some("hi"));
        assert_eq!(msg.remaining_secs(5_000), None);
    }

    #[test]
    fn message_voids_at_expiry() {
        let msg = message(Some(3_000));
        assert_eq!(msg.visible_content(2_999), Some("hi"));
        assert!(msg.is_void(3_000));
        assert_eq!(msg.visible_content(3_000), None);
    }

    #[test]
    fn remaining_secs_rounds_up() {
        let msg = message(Some(3_000));
        assert_eq!(msg.remaining_secs(1_000), Some(2));
        assert_eq!(msg.remaining_secs(1_001), Some(2));
        assert_eq!(msg.remaining_secs(2_500), Some(1));
        assert_eq!(msg.remaining_secs(3_000), None);
    }

    #[test]
    fn patch_keeps_missing_fields() {
        let mut user = User {
            id: "user-a".into(),
            username: "DruidShaman3".into(),
            last_activity: 10,
            is_typing: false,
            tab_id: "tab-a".into(),
        };
        let patch = UserPatch {
            id: "user-a".into(),
            last_activity: Some(99),
            ..Default::default()
        };
        patch.apply_to(&mut user);
        assert_eq!(user.last_activity, 99);
        assert_eq!(user.username, "DruidShaman3");
        assert_eq!(user.tab_id, "tab-a");
    }
}
