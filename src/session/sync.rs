//! Join-time state transfer: answering REQUEST_STATE and merging STATE_SYNC.

use crate::common::{SessionAction, SessionSnapshot};

use super::state::Session;

impl Session {
    /// Builds the STATE_SYNC answer for `requester_id` from the current replica.
    ///
    /// The requester is never reported as typing in its own reply.
    pub fn reply_to_request(&self, requester_id: &str) -> SessionAction {
        let mut snapshot = self.snapshot();
        snapshot.typing_users.retain(|id| id != requester_id);
        log::debug!(
            "Answering state request from {requester_id}: {} users, {} messages",
            snapshot.users.len(),
            snapshot.messages.len()
        );
        SessionAction::StateSync(snapshot)
    }

    /// Merges a STATE_SYNC answer into the replica.
    ///
    /// Users are merged by id without overwriting anyone already known. Message history and the
    /// counter are adopted only while our message list is empty, so the first answer wins and
    /// redundant answers cannot clobber it. Typing ids are merged, minus our own.
    pub fn merge_snapshot(&mut self, snapshot: SessionSnapshot, now: i64) {
        let SessionSnapshot {
            users,
            messages,
            counter,
            typing_users,
        } = snapshot;

        let mut added = 0usize;
        for user in users {
            if !self.users.iter().any(|known| known.id == user.id) {
                self.users.push(user);
                added += 1;
            }
        }

        let adopted = self.messages.is_empty();
        if adopted {
            self.messages = messages;
            self.counter = counter;
        }

        let my_id = self.identity.user_id.clone();
        for user_id in typing_users {
            if user_id != my_id {
                self.mark_typing(user_id, now);
            }
        }

        log::debug!(
            "Merged state sync: {added} new users, history {}",
            if adopted { "adopted" } else { "kept" }
        );
    }
}
