//! Socket/account/user session index.
//!
//! Four maps bind transport sockets to the account and user signed in on
//! them, in both directions. Registration is idempotent; removing the last
//! socket of an account or user drops that side's entry entirely, so the
//! maps never hold empty sets.

use std::collections::HashSet;

use dashmap::DashMap;
use tilemud_core::EntityId;

use crate::network::SocketId;

/// Bidirectional socket↔account and socket↔user index.
#[derive(Debug, Default)]
pub struct SessionIndex {
    account_by_socket: DashMap<SocketId, EntityId>,
    user_by_socket: DashMap<SocketId, EntityId>,
    sockets_by_account: DashMap<EntityId, HashSet<SocketId>>,
    sockets_by_user: DashMap<EntityId, HashSet<SocketId>>,
}

impl SessionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `socket` to `account`. Re-binding the same pair is a no-op;
    /// re-binding the socket to a different account moves it.
    pub fn log_in_account(&self, socket: SocketId, account: EntityId) {
        if let Some(previous) = self.account_by_socket.insert(socket, account) {
            if previous == account {
                return;
            }
            Self::detach(&self.sockets_by_account, previous, socket);
        }
        self.sockets_by_account.entry(account).or_default().insert(socket);
    }

    /// Binds `socket` to `user`. Same idempotency as account binding.
    pub fn log_in_user(&self, socket: SocketId, user: EntityId) {
        if let Some(previous) = self.user_by_socket.insert(socket, user) {
            if previous == user {
                return;
            }
            Self::detach(&self.sockets_by_user, previous, socket);
        }
        self.sockets_by_user.entry(user).or_default().insert(socket);
    }

    /// Unbinds the user slot of `socket`, if any.
    pub fn log_out_user(&self, socket: SocketId) {
        if let Some((_, user)) = self.user_by_socket.remove(&socket) {
            Self::detach(&self.sockets_by_user, user, socket);
        }
    }

    /// Unbinds both slots of `socket`. A user session cannot outlive its
    /// account session.
    pub fn log_out_account(&self, socket: SocketId) {
        self.log_out_user(socket);
        if let Some((_, account)) = self.account_by_socket.remove(&socket) {
            Self::detach(&self.sockets_by_account, account, socket);
        }
    }

    /// Full teardown on socket close. Exactly one traversal of the index.
    pub fn handle_close(&self, socket: SocketId) {
        self.log_out_account(socket);
    }

    #[must_use]
    pub fn is_logged_into_account(&self, socket: SocketId) -> bool {
        self.account_by_socket.contains_key(&socket)
    }

    #[must_use]
    pub fn is_logged_as_user(&self, socket: SocketId) -> bool {
        self.user_by_socket.contains_key(&socket)
    }

    #[must_use]
    pub fn account_by_socket(&self, socket: SocketId) -> Option<EntityId> {
        self.account_by_socket.get(&socket).map(|r| *r)
    }

    #[must_use]
    pub fn user_by_socket(&self, socket: SocketId) -> Option<EntityId> {
        self.user_by_socket.get(&socket).map(|r| *r)
    }

    /// Sockets the given user is signed in on. Usually one, but multiple
    /// clients may share a user.
    #[must_use]
    pub fn sockets_by_user(&self, user: EntityId) -> Vec<SocketId> {
        self.sockets_by_user
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn sockets_by_account(&self, account: EntityId) -> Vec<SocketId> {
        self.sockets_by_account
            .get(&account)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the user is online on at least one socket.
    #[must_use]
    pub fn is_user_online(&self, user: EntityId) -> bool {
        self.sockets_by_user.contains_key(&user)
    }

    fn detach(map: &DashMap<EntityId, HashSet<SocketId>>, id: EntityId, socket: SocketId) {
        let remove_entry = map.get_mut(&id).is_some_and(|mut sockets| {
            sockets.remove(&socket);
            sockets.is_empty()
        });
        if remove_entry {
            map.remove_if(&id, |_, sockets| sockets.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: SocketId = SocketId(1);
    const S2: SocketId = SocketId(2);

    #[test]
    fn log_in_account_binds_both_directions() {
        let index = SessionIndex::new();
        index.log_in_account(S1, 10);

        assert!(index.is_logged_into_account(S1));
        assert_eq!(index.account_by_socket(S1), Some(10));
        assert_eq!(index.sockets_by_account(10), vec![S1]);
        assert!(!index.is_logged_as_user(S1));
    }

    #[test]
    fn log_in_account_is_idempotent() {
        let index = SessionIndex::new();
        index.log_in_account(S1, 10);
        index.log_in_account(S1, 10);

        assert_eq!(index.sockets_by_account(10).len(), 1);
    }

    #[test]
    fn rebinding_socket_moves_it_between_accounts() {
        let index = SessionIndex::new();
        index.log_in_account(S1, 10);
        index.log_in_account(S1, 11);

        assert_eq!(index.account_by_socket(S1), Some(11));
        assert!(index.sockets_by_account(10).is_empty());
        assert_eq!(index.sockets_by_account(11), vec![S1]);
    }

    #[test]
    fn two_sockets_one_user() {
        let index = SessionIndex::new();
        index.log_in_user(S1, 5);
        index.log_in_user(S2, 5);

        let mut sockets = index.sockets_by_user(5);
        sockets.sort_by_key(|s| s.0);
        assert_eq!(sockets, vec![S1, S2]);
    }

    #[test]
    fn log_out_user_keeps_account_session() {
        let index = SessionIndex::new();
        index.log_in_account(S1, 10);
        index.log_in_user(S1, 5);

        index.log_out_user(S1);
        assert!(!index.is_logged_as_user(S1));
        assert!(index.is_logged_into_account(S1));
    }

    #[test]
    fn log_out_account_also_logs_out_user() {
        let index = SessionIndex::new();
        index.log_in_account(S1, 10);
        index.log_in_user(S1, 5);

        index.log_out_account(S1);
        assert!(!index.is_logged_as_user(S1));
        assert!(!index.is_logged_into_account(S1));
        assert!(!index.is_user_online(5));
    }

    #[test]
    fn last_socket_removal_drops_reverse_entry() {
        let index = SessionIndex::new();
        index.log_in_user(S1, 5);
        index.log_in_user(S2, 5);

        index.log_out_user(S1);
        assert!(index.is_user_online(5));
        index.log_out_user(S2);
        assert!(!index.is_user_online(5));
        assert!(index.sockets_by_user(5).is_empty());
    }

    #[test]
    fn handle_close_tears_down_everything() {
        let index = SessionIndex::new();
        index.log_in_account(S1, 10);
        index.log_in_user(S1, 5);

        index.handle_close(S1);
        assert!(index.account_by_socket(S1).is_none());
        assert!(index.user_by_socket(S1).is_none());
        assert!(index.sockets_by_account(10).is_empty());
        assert!(index.sockets_by_user(5).is_empty());
    }

    #[test]
    fn handle_close_of_unknown_socket_is_noop() {
        let index = SessionIndex::new();
        index.handle_close(SocketId(99));
    }
}
