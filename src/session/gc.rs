//! Local, uncoordinated expiry of stale users, expired messages and forgotten typing flags.
//! Sweeps never broadcast anything.

use super::state::Session;

impl Session {
    /// Drops every user other than ourselves whose last activity is `threshold_ms` or more in the
    /// past. Returns the evicted ids.
    pub fn sweep_users(&mut self, now: i64, threshold_ms: u64) -> Vec<String> {
        let threshold = threshold_ms as i64;
        let my_id = self.identity.user_id.clone();
        let mut evicted = Vec::new();

        self.users.retain(|user| {
            let keep = user.id == my_id || now - user.last_activity < threshold;
            if !keep {
                evicted.push(user.id.clone());
            }
            keep
        });
        for user_id in &evicted {
            self.remove_typing(user_id);
            log::info!("Evicted inactive user {user_id}");
        }

        evicted
    }

    /// Physically removes messages whose expiry has passed. Returns how many were removed.
    pub fn sweep_messages(&mut self, now: i64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|msg| !msg.is_void(now));
        let removed = before - self.messages.len();
        if removed > 0 {
            log::debug!("Removed {removed} expired messages");
        }
        removed
    }

    /// Forgets typing flags we have not heard refreshed for `expiry_ms`.
    pub fn sweep_typing(&mut self, now: i64, expiry_ms: u64) -> usize {
        let expiry = expiry_ms as i64;
        let before = self.typing.len();
        self.typing.retain(|entry| now - entry.since < expiry);
        before - self.typing.len()
    }
}
