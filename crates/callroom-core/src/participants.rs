use std::sync::Arc;

use crate::settings::CallSettings;

/// A participant identity: an invitee when creating a call, or a remote
/// member reported by the call backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub id: String,
    pub name: Option<String>,
}

impl Member {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Build the invitee list for a new call from the chat's users.
    ///
    /// The local user is never invited, and each identity appears once.
    pub fn invitees_from(
        chat_users: impl IntoIterator<Item = Member>,
        local_user_id: &str,
    ) -> Vec<Member> {
        let mut invitees: Vec<Member> = Vec::new();
        for user in chat_users {
            if user.id == local_user_id || invitees.iter().any(|m| m.id == user.id) {
                continue;
            }
            invitees.push(user);
        }
        invitees
    }
}

/// The signed-in user on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub display_name: String,
}

impl LocalUser {
    /// Falls back to the configured default name when the account has none.
    pub fn resolve(id: impl Into<String>, display_name: Option<String>, settings: &CallSettings) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| settings.default_display_name.clone());
        Self {
            id: id.into(),
            display_name,
        }
    }
}

/// Immutable view of the remote participants at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSnapshot {
    members: Arc<[Member]>,
}

impl ParticipantSnapshot {
    pub fn new(members: Vec<Member>) -> Self {
        let mut unique: Vec<Member> = Vec::with_capacity(members.len());
        for m in members {
            if !unique.iter().any(|u| u.id == m.id) {
                unique.push(m);
            }
        }
        Self {
            members: unique.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id)
    }
}

/// One participant-set notification: the snapshot before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantChange {
    pub previous: ParticipantSnapshot,
    pub current: ParticipantSnapshot,
}

impl ParticipantChange {
    pub fn new(previous: ParticipantSnapshot, current: ParticipantSnapshot) -> Self {
        Self { previous, current }
    }

    /// Whether this change means nobody is left in the call.
    #[allow(clippy::nonminimal_bool)]
    pub fn ends_call(&self) -> bool {
        // The last remote participant leaving is listed on its own even though
        // an empty snapshot already covers it.
        let last_one_left = self.previous.len() == 1 && self.current.is_empty();
        self.current.is_empty() || last_one_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Member {
        Member::new(id, Some(format!("name-{id}")))
    }

    fn snapshot(ids: &[&str]) -> ParticipantSnapshot {
        ParticipantSnapshot::new(ids.iter().map(|id| member(id)).collect())
    }

    #[test]
    fn invitees_exclude_local_user() {
        let users = vec![member("me"), member("a"), member("b")];
        let invitees = Member::invitees_from(users, "me");
        let ids: Vec<&str> = invitees.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn invitees_are_unique() {
        let users = vec![member("a"), member("a"), member("b")];
        assert_eq!(Member::invitees_from(users, "me").len(), 2);
    }

    #[test]
    fn local_user_falls_back_to_default_name() {
        let settings = CallSettings::default();
        let user = LocalUser::resolve("u1", None, &settings);
        assert_eq!(user.display_name, "User");

        let blank = LocalUser::resolve("u1", Some("  ".to_string()), &settings);
        assert_eq!(blank.display_name, "User");

        let named = LocalUser::resolve("u1", Some("Karen".to_string()), &settings);
        assert_eq!(named.display_name, "Karen");
    }

    #[test]
    fn snapshot_has_no_duplicate_members() {
        let s = snapshot(&["a", "a", "b"]);
        assert_eq!(s.len(), 2);
        assert!(s.contains("a"));
        assert!(s.contains("b"));
        assert!(!s.contains("c"));
    }

    #[test]
    fn change_to_empty_ends_call() {
        assert!(ParticipantChange::new(snapshot(&["a"]), ParticipantSnapshot::empty()).ends_call());
        assert!(ParticipantChange::new(snapshot(&["a", "b"]), ParticipantSnapshot::empty()).ends_call());
        assert!(ParticipantChange::new(ParticipantSnapshot::empty(), ParticipantSnapshot::empty()).ends_call());
    }

    #[test]
    fn non_empty_change_keeps_call() {
        assert!(!ParticipantChange::new(snapshot(&["a"]), snapshot(&["a", "b"])).ends_call());
        assert!(!ParticipantChange::new(snapshot(&["a", "b"]), snapshot(&["b"])).ends_call());
        assert!(!ParticipantChange::new(ParticipantSnapshot::empty(), snapshot(&["a"])).ends_call());
    }
}
