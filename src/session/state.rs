//! The per-peer replica of the shared session and the rules for applying bus actions to it.
//!
//! `Session` is plain data: every method takes the current time explicitly and returns the
//! action(s) the caller must broadcast. The runner owns it and serializes all access.

use crate::common::{
    ChatMessage, CounterState, Delivery, SessionAction, SessionSnapshot, User, UserPatch,
};

use super::identity::{Identity, generate_message_id};

/// A peer believed to be typing, and when we last heard it start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypingEntry {
    pub(crate) user_id: String,
    pub(crate) since: i64,
}

#[derive(Debug)]
pub struct Session {
    pub(crate) identity: Identity,
    pub(crate) users: Vec<User>,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) counter: CounterState,
    pub(crate) typing: Vec<TypingEntry>,
    started: bool,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            users: Vec::new(),
            messages: Vec::new(),
            counter: CounterState::default(),
            typing: Vec::new(),
            started: false,
        }
    }

    /// Inserts ourselves and returns the JOIN + REQUEST_STATE pair to broadcast.
    /// Only the first call does anything.
    pub fn start(&mut self, now: i64) -> Vec<SessionAction> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        let me = self.identity.to_user(now);
        self.users.retain(|user| user.id != me.id);
        self.users.insert(0, me.clone());
        log::info!(
            "Joining session as {} ({})",
            self.identity.username,
            self.identity.user_id
        );

        vec![
            SessionAction::Join(me),
            SessionAction::RequestState {
                requester_id: self.identity.user_id.clone(),
            },
        ]
    }

    pub fn leave(&self) -> SessionAction {
        SessionAction::Leave {
            user_id: self.identity.user_id.clone(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn counter(&self) -> &CounterState {
        &self.counter
    }

    pub fn typing_users(&self) -> Vec<String> {
        self.typing.iter().map(|entry| entry.user_id.clone()).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            users: self.users.clone(),
            messages: self.messages.clone(),
            counter: self.counter.clone(),
            typing_users: self.typing_users(),
        }
    }

    // ---- local commands -------------------------------------------------

    /// Blank content is refused and nothing is broadcast.
    pub fn send_message(
        &mut self,
        content: &str,
        expires_in_secs: Option<u64>,
        now: i64,
    ) -> Option<SessionAction> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let expires_at = expires_in_secs
            .filter(|secs| *secs > 0)
            .map(|secs| {
                let secs = i64::try_from(secs).unwrap_or(i64::MAX);
                now.saturating_add(secs.saturating_mul(1_000))
            });
        let message = ChatMessage {
            id: generate_message_id(now),
            user_id: self.identity.user_id.clone(),
            username: self.identity.username.clone(),
            content: content.to_string(),
            timestamp: now,
            expires_at,
        };

        self.messages.push(message.clone());
        self.refresh_self(now);
        Some(SessionAction::MessageSend(message))
    }

    /// Only our own messages can be deleted.
    pub fn delete_message(&mut self, message_id: &str) -> Option<SessionAction> {
        let own = self
            .messages
            .iter()
            .any(|msg| msg.id == message_id && msg.user_id == self.identity.user_id);
        if !own {
            log::warn!("Refusing to delete {message_id}: not one of our messages");
            return None;
        }

        self.messages.retain(|msg| msg.id != message_id);
        Some(SessionAction::MessageDelete {
            message_id: message_id.to_string(),
            user_id: self.identity.user_id.clone(),
        })
    }

    pub fn adjust_counter(&mut self, increment: bool, now: i64) -> SessionAction {
        let value = self.counter.value + if increment { 1 } else { -1 };
        self.counter = CounterState {
            value,
            last_updated_by: Some(self.identity.username.clone()),
            last_updated_at: Some(now),
        };
        self.refresh_self(now);

        SessionAction::CounterUpdate {
            value,
            user_id: self.identity.user_id.clone(),
            username: self.identity.username.clone(),
        }
    }

    pub fn set_typing(&mut self, is_typing: bool, now: i64) -> SessionAction {
        self.refresh_self(now);
        let user_id = self.identity.user_id.clone();
        if is_typing {
            SessionAction::TypingStart { user_id }
        } else {
            SessionAction::TypingStop { user_id }
        }
    }

    pub fn touch(&mut self, now: i64) -> SessionAction {
        self.refresh_self(now);
        let me = self.identity.to_user(now);
        SessionAction::UserUpdate(UserPatch {
            id: me.id,
            username: Some(me.username),
            last_activity: Some(me.last_activity),
            is_typing: Some(false),
            tab_id: Some(me.tab_id),
        })
    }

    // ---- remote actions -------------------------------------------------

    /// Applies one delivered action. Returns the reply to broadcast, if the action calls for one.
    pub fn apply(&mut self, delivery: Delivery, now: i64) -> Option<SessionAction> {
        let Delivery { source, action } = delivery;
        let from_self = source == self.identity.tab_id;
        if from_self && action.is_applied_optimistically() {
            log::debug!("Ignoring echo of our own {}", action.name());
            return None;
        }
        log::debug!("Applying {} from {source}", action.name());

        match action {
            SessionAction::Join(user) => {
                if !self.users.iter().any(|known| known.id == user.id) {
                    log::info!("{} joined", user.username);
                    self.users.push(user);
                }
            }
            SessionAction::Leave { user_id } => {
                self.users.retain(|user| user.id != user_id);
                self.remove_typing(&user_id);
            }
            SessionAction::UserUpdate(patch) => {
                if let Some(user) = self.users.iter_mut().find(|user| user.id == patch.id) {
                    patch.apply_to(user);
                }
            }
            SessionAction::MessageSend(message) => {
                self.note_activity(&message.user_id, now);
                self.remove_typing(&message.user_id);
                if !self.messages.iter().any(|known| known.id == message.id) {
                    self.messages.push(message);
                }
            }
            SessionAction::MessageDelete {
                message_id,
                user_id,
            } => {
                if user_id != self.identity.user_id {
                    self.messages.retain(|msg| msg.id != message_id);
                }
            }
            SessionAction::CounterUpdate {
                value,
                user_id,
                username,
            } => {
                // Last writer wins: concurrent edits from two peers may overwrite each other.
                self.counter = CounterState {
                    value,
                    last_updated_by: Some(username),
                    last_updated_at: Some(now),
                };
                self.note_activity(&user_id, now);
            }
            SessionAction::TypingStart { user_id } => {
                if user_id != self.identity.user_id {
                    self.note_activity(&user_id, now);
                    self.mark_typing(user_id, now);
                }
            }
            SessionAction::TypingStop { user_id } => self.remove_typing(&user_id),
            SessionAction::RequestState { requester_id } => {
                if requester_id != self.identity.user_id {
                    return Some(self.reply_to_request(&requester_id));
                }
            }
            SessionAction::StateSync(snapshot) => {
                if !from_self {
                    self.merge_snapshot(snapshot, now);
                }
            }
        }

        None
    }

    // ---- helpers --------------------------------------------------------

    fn refresh_self(&mut self, now: i64) {
        let my_id = self.identity.user_id.as_str();
        if let Some(me) = self.users.iter_mut().find(|user| user.id == my_id) {
            me.last_activity = now;
            me.is_typing = false;
        }
    }

    fn note_activity(&mut self, user_id: &str, now: i64) {
        if let Some(user) = self.users.iter_mut().find(|user| user.id == user_id) {
            user.last_activity = user.last_activity.max(now);
        }
    }

    pub(crate) fn mark_typing(&mut self, user_id: String, now: i64) {
        match self.typing.iter_mut().find(|entry| entry.user_id == user_id) {
            Some(entry) => entry.since = now,
            None => self.typing.push(TypingEntry {
                user_id,
                since: now,
            }),
        }
    }

    pub(crate) fn remove_typing(&mut self, user_id: &str) {
        self.typing.retain(|entry| entry.user_id != user_id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn session(tab: &str) -> Session {
        Session::new(Identity::from_tab_id(tab, format!("Name-{tab}")))
    }

    pub(crate) fn remote_user(tab: &str, last_activity: i64) -> User {
        Identity::from_tab_id(tab, format!("Name-{tab}")).to_user(last_activity)
    }

    fn deliver(
        session: &mut Session,
        source: &str,
        action: SessionAction,
        now: i64,
    ) -> Option<SessionAction> {
        session.apply(Delivery::new(source, action), now)
    }

    #[test]
    fn start_announces_once() {
        let mut a = session("tab-a");
        let actions = a.start(100);
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], SessionAction::Join(user) if user.id == "user-tab-a"));
        assert!(matches!(
            &actions[1],
            SessionAction::RequestState { requester_id } if requester_id == "user-tab-a"
        ));
        assert!(a.start(200).is_empty());

        assert_eq!(a.users().len(), 1);
        assert!(a.messages().is_empty());
        assert_eq!(a.counter(), &CounterState::default());
    }

    #[test]
    fn join_is_idempotent_and_order_independent() {
        let joins: Vec<User> = ["tab-b", "tab-c", "tab-d"]
            .iter()
            .map(|tab| remote_user(tab, 10))
            .collect();

        let mut forward = session("tab-a");
        forward.start(0);
        for user in &joins {
            deliver(&mut forward, &user.tab_id, SessionAction::Join(user.clone()), 1);
            deliver(&mut forward, &user.tab_id, SessionAction::Join(user.clone()), 1);
        }

        let mut backward = session("tab-a");
        backward.start(0);
        for user in joins.iter().rev() {
            deliver(&mut backward, &user.tab_id, SessionAction::Join(user.clone()), 1);
        }

        let mut a: Vec<&str> = forward.users().iter().map(|u| u.id.as_str()).collect();
        let mut b: Vec<&str> = backward.users().iter().map(|u| u.id.as_str()).collect();
        a.sort();
        b.sort();
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
    }

    #[test]
    fn own_message_echo_is_not_duplicated() {
        let mut a = session("tab-a");
        a.start(0);
        let sent = a.send_message("hi", None, 10).unwrap();

        assert!(deliver(&mut a, "tab-a", sent.clone(), 11).is_none());
        assert_eq!(a.messages().len(), 1);

        // the same message relayed by someone else is deduplicated by id
        deliver(&mut a, "tab-b", sent, 12);
        assert_eq!(a.messages().len(), 1);
    }

    #[test]
    fn own_counter_echo_is_ignored() {
        let mut a = session("tab-a");
        a.start(0);
        a.adjust_counter(true, 10);
        let stale = SessionAction::CounterUpdate {
            value: 0,
            user_id: "user-tab-a".into(),
            username: "Name-tab-a".into(),
        };
        deliver(&mut a, "tab-a", stale, 11);
        assert_eq!(a.counter().value, 1);
    }

    #[test]
    fn counter_is_last_writer_wins() {
        let mut c = session("tab-c");
        c.start(0);
        let update = |value, tab: &str| SessionAction::CounterUpdate {
            value,
            user_id: format!("user-{tab}"),
            username: format!("Name-{tab}"),
        };

        deliver(&mut c, "tab-a", update(5, "tab-a"), 10);
        deliver(&mut c, "tab-b", update(7, "tab-b"), 20);

        assert_eq!(c.counter().value, 7);
        assert_eq!(c.counter().last_updated_by.as_deref(), Some("Name-tab-b"));
        assert_eq!(c.counter().last_updated_at, Some(20));
    }

    #[test]
    fn concurrent_increments_can_be_lost() {
        let mut a = session("tab-a");
        let mut b = session("tab-b");
        a.start(0);
        b.start(0);

        let from_a = a.adjust_counter(true, 10);
        let from_b = b.adjust_counter(true, 10);
        deliver(&mut a, "tab-b", from_b, 11);
        deliver(&mut b, "tab-a", from_a, 11);

        assert_eq!(a.counter().value, 1);
        assert_eq!(b.counter().value, 1);
    }

    #[test]
    fn counter_moves_by_one() {
        let mut a = session("tab-a");
        a.start(0);
        a.adjust_counter(false, 1);
        a.adjust_counter(false, 2);
        a.adjust_counter(true, 3);
        assert_eq!(a.counter().value, -1);
        assert_eq!(a.counter().last_updated_by.as_deref(), Some("Name-tab-a"));
    }

    #[test]
    fn blank_messages_are_refused() {
        let mut a = session("tab-a");
        a.start(0);
        assert!(a.send_message("   ", None, 1).is_none());
        assert!(a.messages().is_empty());
    }

    #[test]
    fn ttl_sets_expiry() {
        let mut a = session("tab-a");
        a.start(0);
        a.send_message(" bye ", Some(2), 1_000);
        a.send_message("stay", Some(0), 1_000);
        assert_eq!(a.messages()[0].content, "bye");
        assert_eq!(a.messages()[0].expires_at, Some(3_000));
        assert_eq!(a.messages()[1].expires_at, None);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_expiring() {
        let mut a = session("tab-a");
        a.start(0);
        a.send_message("forever", Some(u64::MAX), 1_000);
        let message = &a.messages()[0];
        assert_eq!(message.expires_at, Some(i64::MAX));
        assert!(!message.is_void(1_000));
        assert_eq!(message.visible_content(2_000), Some("forever"));
    }

    #[test]
    fn local_actions_refresh_own_activity() {
        let mut a = session("tab-a");
        a.start(0);
        a.send_message("hi", None, 50);
        assert_eq!(a.users()[0].last_activity, 50);
        a.adjust_counter(true, 60);
        assert_eq!(a.users()[0].last_activity, 60);
        a.set_typing(true, 70);
        assert_eq!(a.users()[0].last_activity, 70);
        let update = a.touch(80);
        assert_eq!(a.users()[0].last_activity, 80);
        assert!(matches!(
            update,
            SessionAction::UserUpdate(patch) if patch.last_activity == Some(80)
        ));
    }

    #[test]
    fn delete_only_own_messages() {
        let mut a = session("tab-a");
        a.start(0);
        let SessionAction::MessageSend(mine) = a.send_message("mine", None, 1).unwrap() else {
            panic!("expected MESSAGE_SEND");
        };
        let theirs = ChatMessage {
            id: "msg-b".into(),
            user_id: "user-tab-b".into(),
            username: "Name-tab-b".into(),
            content: "theirs".into(),
            timestamp: 2,
            expires_at: None,
        };
        deliver(&mut a, "tab-b", SessionAction::MessageSend(theirs), 2);

        assert!(a.delete_message("msg-b").is_none());
        assert!(a.delete_message("msg-unknown").is_none());
        assert_eq!(a.messages().len(), 2);

        let delete = a.delete_message(&mine.id).unwrap();
        assert_eq!(
            delete,
            SessionAction::MessageDelete {
                message_id: mine.id.clone(),
                user_id: "user-tab-a".into()
            }
        );
        assert_eq!(a.messages().len(), 1);
    }

    #[test]
    fn remote_delete_claiming_our_id_is_ignored() {
        let mut a = session("tab-a");
        a.start(0);
        let SessionAction::MessageSend(mine) = a.send_message("mine", None, 1).unwrap() else {
            panic!("expected MESSAGE_SEND");
        };
        let delete = SessionAction::MessageDelete {
            message_id: mine.id.clone(),
            user_id: "user-tab-a".into(),
        };
        deliver(&mut a, "tab-b", delete, 2);
        assert_eq!(a.messages().len(), 1);

        let mut b = session("tab-b");
        b.start(0);
        deliver(&mut b, "tab-a", SessionAction::MessageSend(mine.clone()), 2);
        let delete = SessionAction::MessageDelete {
            message_id: mine.id,
            user_id: "user-tab-a".into(),
        };
        deliver(&mut b, "tab-a", delete, 3);
        assert!(b.messages().is_empty());
    }

    #[test]
    fn leave_removes_user_and_typing() {
        let mut a = session("tab-a");
        a.start(0);
        deliver(&mut a, "tab-b", SessionAction::Join(remote_user("tab-b", 0)), 1);
        deliver(&mut a, "tab-b", SessionAction::TypingStart { user_id: "user-tab-b".into() }, 2);
        assert_eq!(a.typing_users(), vec!["user-tab-b".to_string()]);

        deliver(&mut a, "tab-b", SessionAction::Leave { user_id: "user-tab-b".into() }, 3);
        assert_eq!(a.users().len(), 1);
        assert!(a.typing_users().is_empty());
    }

    #[test]
    fn user_update_merges_known_users_only() {
        let mut a = session("tab-a");
        a.start(0);
        deliver(&mut a, "tab-b", SessionAction::Join(remote_user("tab-b", 0)), 1);

        let patch = UserPatch {
            id: "user-tab-b".into(),
            last_activity: Some(500),
            ..Default::default()
        };
        deliver(&mut a, "tab-b", SessionAction::UserUpdate(patch), 2);
        let unknown = UserPatch {
            id: "user-tab-z".into(),
            last_activity: Some(500),
            ..Default::default()
        };
        deliver(&mut a, "tab-z", SessionAction::UserUpdate(unknown), 2);

        assert_eq!(a.users().len(), 2);
        assert_eq!(a.users()[1].last_activity, 500);
        assert_eq!(a.users()[1].username, "Name-tab-b");
    }

    #[test]
    fn typing_never_marks_ourselves() {
        let mut a = session("tab-a");
        a.start(0);
        deliver(&mut a, "tab-x", SessionAction::TypingStart { user_id: "user-tab-a".into() }, 1);
        assert!(a.typing_users().is_empty());

        deliver(&mut a, "tab-b", SessionAction::TypingStart { user_id: "user-tab-b".into() }, 1);
        deliver(&mut a, "tab-b", SessionAction::TypingStart { user_id: "user-tab-b".into() }, 2);
        assert_eq!(a.typing_users(), vec!["user-tab-b".to_string()]);

        deliver(&mut a, "tab-b", SessionAction::TypingStop { user_id: "user-tab-b".into() }, 3);
        assert!(a.typing_users().is_empty());
    }

    #[test]
    fn incoming_message_refreshes_author_and_clears_typing() {
        let mut a = session("tab-a");
        a.start(0);
        deliver(&mut a, "tab-b", SessionAction::Join(remote_user("tab-b", 0)), 1);
        deliver(&mut a, "tab-b", SessionAction::TypingStart { user_id: "user-tab-b".into() }, 2);

        let message = ChatMessage {
            id: "msg-b".into(),
            user_id: "user-tab-b".into(),
            username: "Name-tab-b".into(),
            content: "hello".into(),
            timestamp: 3,
            expires_at: None,
        };
        deliver(&mut a, "tab-b", SessionAction::MessageSend(message), 4_000);

        assert!(a.typing_users().is_empty());
        assert_eq!(a.users()[1].last_activity, 4_000);
    }

    #[test]
    fn own_join_echo_is_harmless() {
        let mut a = session("tab-a");
        let actions = a.start(0);
        for action in actions {
            assert!(deliver(&mut a, "tab-a", action, 1).is_none());
        }
        assert_eq!(a.users().len(), 1);
    }
}
