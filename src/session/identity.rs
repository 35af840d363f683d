use chrono::Utc;
use rand::Rng;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::common::User;

const FIRST_PARTS: [&str; 5] = ["DeathKnight", "Druid", "Hunter", "Mage", "Paladin"];
const SECOND_PARTS: [&str; 5] = ["Priest", "Rogue", "Shaman", "Warlock", "Warrior"];
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Who this process is for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tab_id: String,
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn generate() -> Self {
        Self::from_tab_id(generate_tab_id(), generate_username())
    }

    pub fn from_tab_id(tab_id: impl Into<String>, username: impl Into<String>) -> Self {
        let tab_id = tab_id.into();
        Self {
            user_id: format!("user-{tab_id}"),
            tab_id,
            username: username.into(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn to_user(&self, now: i64) -> User {
        User {
            id: self.user_id.clone(),
            username: self.username.clone(),
            last_activity: now,
            is_typing: false,
            tab_id: self.tab_id.clone(),
        }
    }
}

/// `tab-{epoch_ms}-{9 base36 chars}`.
pub fn generate_tab_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("tab-{}-{suffix}", Utc::now().timestamp_millis())
}

pub fn generate_username() -> String {
    let mut rng = rand::thread_rng();
    let first = FIRST_PARTS.choose(&mut rng).copied().unwrap_or(FIRST_PARTS[0]);
    let second = SECOND_PARTS.choose(&mut rng).copied().unwrap_or(SECOND_PARTS[0]);
    let number: u8 = rng.gen_range(0..100);
    format!("{first}{second}{number}")
}

pub fn generate_message_id(now: i64) -> String {
    format!("msg-{now}-{}", Uuid::new_v4())
}
