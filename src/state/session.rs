//! Player session store: identity by name, connection tracking and the
//! reconnection grace period.

use indexmap::IndexMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{error::GameError, state::clock::Millis};

/// Opaque handle the transport layer assigns to each connection.
pub type ConnectionId = Uuid;

/// Maximum number of characters allowed in a player name.
pub const MAX_NAME_CHARS: usize = 20;

/// Per-round transient fields, cleared at the start of every round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundEntry {
    /// Whether a guess was recorded this round.
    pub submitted: bool,
    /// Year guessed by the player.
    pub guessed_year: Option<i32>,
    /// Server-side timestamp of the accepted submission.
    pub submission_time: Option<Millis>,
    /// Round time consumed at submission, excluding pauses.
    pub elapsed_ms: Option<Millis>,
    /// Points earned in the round (set at reveal).
    pub round_score: u32,
    /// Distance to the answer (set at reveal).
    pub years_off: Option<u32>,
    /// Whether a double-or-nothing bet was attached.
    pub bet_active: bool,
}

/// One connected (or recently disconnected) identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    /// Display name, trimmed, unique case-insensitively.
    pub name: String,
    /// Transport handle currently bound to the session.
    pub connection: Option<ConnectionId>,
    /// Whether the transport is currently attached.
    pub connected: bool,
    /// When the player first joined.
    pub joined_at: Millis,
    /// When the transport dropped, if it did.
    pub disconnected_at: Option<Millis>,
    /// Whether this player controls the game.
    pub is_admin: bool,
    /// Running total across rounds.
    pub score: u32,
    /// Consecutive close-enough rounds.
    pub streak: u32,
    /// Transient state of the current round.
    pub round: RoundEntry,
}

impl PlayerSession {
    fn new(name: String, connection: ConnectionId, now: Millis) -> Self {
        Self {
            name,
            connection: Some(connection),
            connected: true,
            joined_at: now,
            disconnected_at: None,
            is_admin: false,
            score: 0,
            streak: 0,
            round: RoundEntry::default(),
        }
    }

    fn grace_expired(&self, now: Millis, grace_ms: Millis) -> bool {
        match self.disconnected_at {
            Some(at) if !self.connected => now.saturating_sub(at) > grace_ms,
            _ => false,
        }
    }
}

/// Trim and validate a requested player name.
pub fn normalize_name(raw: &str) -> Result<String, GameError> {
    let name = raw.trim();
    let chars = name.chars().count();
    if chars == 0 {
        return Err(GameError::NameInvalid("name must not be empty".into()));
    }
    if chars > MAX_NAME_CHARS {
        return Err(GameError::NameInvalid(format!(
            "name must be at most {MAX_NAME_CHARS} characters (got {chars})"
        )));
    }
    Ok(name.to_string())
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Sessions of the active game keyed by their case-folded name, in join order.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: IndexMap<String, PlayerSession>,
    capacity: usize,
    grace_ms: Millis,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new(capacity: usize, grace_ms: Millis) -> Self {
        Self {
            sessions: IndexMap::new(),
            capacity,
            grace_ms,
        }
    }

    /// Register a new session bound to `connection`.
    ///
    /// Disconnected sessions still inside their grace window keep their name
    /// reserved and count against capacity.
    pub fn add(
        &mut self,
        name: &str,
        connection: ConnectionId,
        now: Millis,
    ) -> Result<&PlayerSession, GameError> {
        let name = normalize_name(name)?;
        self.purge_expired(now);

        let key = name_key(&name);
        if self.sessions.contains_key(&key) {
            return Err(GameError::NameTaken(name));
        }
        if self.sessions.len() >= self.capacity {
            return Err(GameError::GameFull(self.capacity));
        }

        info!(player = %name, "player session created");
        let entry = self
            .sessions
            .entry(key)
            .or_insert(PlayerSession::new(name, connection, now));
        Ok(&*entry)
    }

    /// Look a session up by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&PlayerSession> {
        self.sessions.get(&name_key(name))
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&name_key(name))
    }

    /// Find the session currently bound to a transport handle.
    pub fn find_by_connection(&self, connection: ConnectionId) -> Option<&PlayerSession> {
        self.sessions
            .values()
            .find(|session| session.connection == Some(connection))
    }

    /// Permanently drop a session.
    pub fn remove(&mut self, name: &str) -> Option<PlayerSession> {
        self.sessions.shift_remove(&name_key(name))
    }

    /// Flag a session as disconnected and start its grace countdown.
    pub fn mark_disconnected(&mut self, name: &str, now: Millis) -> bool {
        let Some(session) = self.get_mut(name) else {
            return false;
        };
        if !session.connected {
            return false;
        }
        session.connected = false;
        session.connection = None;
        session.disconnected_at = Some(now);
        debug!(player = %session.name, "player session disconnected");
        true
    }

    /// Rebind a disconnected session to a new transport handle.
    ///
    /// Returns `true` only when the session exists, is disconnected and its
    /// grace window has not elapsed. Score, streak and admin flag are kept.
    pub fn mark_reconnected(&mut self, name: &str, connection: ConnectionId, now: Millis) -> bool {
        self.purge_expired(now);
        let grace_ms = self.grace_ms;
        let Some(session) = self.get_mut(name) else {
            return false;
        };
        if session.connected || session.grace_expired(now, grace_ms) {
            return false;
        }
        session.connected = true;
        session.connection = Some(connection);
        session.disconnected_at = None;
        info!(player = %session.name, "player session reconnected");
        true
    }

    /// Grant the admin flag, enforcing the single-admin invariant.
    pub fn set_admin(&mut self, name: &str) -> Result<(), GameError> {
        let key = name_key(name);
        if self
            .sessions
            .iter()
            .any(|(other, session)| session.is_admin && *other != key)
        {
            return Err(GameError::AdminExists);
        }
        let session = self.sessions.get_mut(&key).ok_or(GameError::NotInGame)?;
        session.is_admin = true;
        Ok(())
    }

    /// Reconnect the disconnected admin under its original name.
    pub fn reclaim_admin(
        &mut self,
        name: &str,
        connection: ConnectionId,
        now: Millis,
    ) -> Result<(), GameError> {
        match self.get(name) {
            Some(session) if session.is_admin => {}
            Some(_) => return Err(GameError::NotAdmin("reclaim the admin seat")),
            None => return Err(GameError::NotInGame),
        }
        if self.mark_reconnected(name, connection, now) {
            Ok(())
        } else {
            Err(GameError::NameTaken(name.trim().to_string()))
        }
    }

    /// Current admin session, connected or not.
    pub fn admin(&self) -> Option<&PlayerSession> {
        self.sessions.values().find(|session| session.is_admin)
    }

    /// Whether `name` belongs to a session currently within its grace window.
    pub fn is_reserved(&self, name: &str, now: Millis) -> bool {
        self.get(name)
            .is_some_and(|session| !session.connected && !session.grace_expired(now, self.grace_ms))
    }

    /// Drop every disconnected session whose grace window has elapsed.
    pub fn purge_expired(&mut self, now: Millis) -> Vec<PlayerSession> {
        let grace_ms = self.grace_ms;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.grace_expired(now, grace_ms))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.sessions.shift_remove(&key))
            .inspect(|session| info!(player = %session.name, "reconnection window elapsed; session purged"))
            .collect()
    }

    /// Sessions in join order.
    pub fn list(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Mutable sessions in join order.
    pub fn list_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }

    /// Number of sessions, connected or within grace.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Millis = 60_000;

    fn store() -> SessionStore {
        SessionStore::new(20, GRACE)
    }

    #[test]
    fn add_trims_and_rejects_invalid_names() {
        let mut store = store();
        let session = store.add("  Tom  ", Uuid::new_v4(), 0).unwrap();
        assert_eq!(session.name, "Tom");

        assert!(matches!(
            store.add("   ", Uuid::new_v4(), 0),
            Err(GameError::NameInvalid(_))
        ));
        assert!(matches!(
            store.add(&"x".repeat(21), Uuid::new_v4(), 0),
            Err(GameError::NameInvalid(_))
        ));
        assert!(store.add(&"é".repeat(20), Uuid::new_v4(), 0).is_ok());
    }

    #[test]
    fn names_are_unique_case_insensitively() {
        let mut store = store();
        store.add("Sarah", Uuid::new_v4(), 0).unwrap();
        assert_eq!(
            store.add("sARAH", Uuid::new_v4(), 0).unwrap_err(),
            GameError::NameTaken("sARAH".into())
        );
    }

    #[test]
    fn capacity_is_enforced() {
        let mut store = SessionStore::new(2, GRACE);
        store.add("a", Uuid::new_v4(), 0).unwrap();
        store.add("b", Uuid::new_v4(), 0).unwrap();
        assert_eq!(
            store.add("c", Uuid::new_v4(), 0).unwrap_err(),
            GameError::GameFull(2)
        );
    }

    #[test]
    fn disconnected_names_stay_reserved_until_grace_elapses() {
        let mut store = store();
        store.add("Tom", Uuid::new_v4(), 0).unwrap();
        assert!(store.mark_disconnected("Tom", 1_000));
        assert!(store.is_reserved("tom", 1_000));

        assert!(matches!(
            store.add("Tom", Uuid::new_v4(), 1_000 + GRACE),
            Err(GameError::NameTaken(_))
        ));

        let fresh = Uuid::new_v4();
        let session = store.add("Tom", fresh, 1_001 + GRACE).unwrap();
        assert_eq!(session.connection, Some(fresh));
        assert_eq!(session.score, 0);
    }

    #[test]
    fn reconnect_within_grace_preserves_progress() {
        let mut store = store();
        store.add("Tom", Uuid::new_v4(), 0).unwrap();
        {
            let session = store.get_mut("Tom").unwrap();
            session.score = 42;
            session.streak = 3;
        }
        store.mark_disconnected("Tom", 5_000);

        let handle = Uuid::new_v4();
        assert!(store.mark_reconnected("TOM", handle, 5_000 + GRACE));
        let session = store.get("Tom").unwrap();
        assert!(session.connected);
        assert_eq!(session.connection, Some(handle));
        assert_eq!((session.score, session.streak), (42, 3));
    }

    #[test]
    fn reconnect_after_grace_fails_and_purges() {
        let mut store = store();
        store.add("Tom", Uuid::new_v4(), 0).unwrap();
        store.mark_disconnected("Tom", 0);
        assert!(!store.mark_reconnected("Tom", Uuid::new_v4(), GRACE + 1));
        assert!(store.get("Tom").is_none());
    }

    #[test]
    fn reconnect_requires_disconnected_session() {
        let mut store = store();
        store.add("Tom", Uuid::new_v4(), 0).unwrap();
        assert!(!store.mark_reconnected("Tom", Uuid::new_v4(), 10));
        assert!(!store.mark_reconnected("Nobody", Uuid::new_v4(), 10));
    }

    #[test]
    fn independent_grace_windows() {
        let mut store = store();
        store.add("a", Uuid::new_v4(), 0).unwrap();
        store.add("b", Uuid::new_v4(), 0).unwrap();
        store.mark_disconnected("a", 0);
        store.mark_disconnected("b", 30_000);

        let purged = store.purge_expired(GRACE + 1);
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].name, "a");
        assert!(store.get("b").is_some());

        let purged = store.purge_expired(30_000 + GRACE + 1);
        assert_eq!(purged[0].name, "b");
        assert!(store.is_empty());
    }

    #[test]
    fn single_admin_invariant() {
        let mut store = store();
        store.add("Sarah", Uuid::new_v4(), 0).unwrap();
        store.add("Tom", Uuid::new_v4(), 0).unwrap();
        store.set_admin("Sarah").unwrap();
        store.set_admin("sarah").unwrap();
        assert_eq!(store.set_admin("Tom").unwrap_err(), GameError::AdminExists);
        assert_eq!(store.list().filter(|s| s.is_admin).count(), 1);
    }

    #[test]
    fn reclaim_admin_only_for_the_admin() {
        let mut store = store();
        store.add("Sarah", Uuid::new_v4(), 0).unwrap();
        store.add("Tom", Uuid::new_v4(), 0).unwrap();
        store.set_admin("Sarah").unwrap();
        store.mark_disconnected("Sarah", 100);
        store.mark_disconnected("Tom", 100);

        assert!(matches!(
            store.reclaim_admin("Tom", Uuid::new_v4(), 200),
            Err(GameError::NotAdmin(_))
        ));
        store.reclaim_admin("Sarah", Uuid::new_v4(), 200).unwrap();
        assert!(store.get("Sarah").unwrap().connected);
    }

    #[test]
    fn find_by_connection_follows_rebinding() {
        let mut store = store();
        let first = Uuid::new_v4();
        store.add("Tom", first, 0).unwrap();
        assert_eq!(store.find_by_connection(first).unwrap().name, "Tom");

        store.mark_disconnected("Tom", 1);
        assert!(store.find_by_connection(first).is_none());

        let second = Uuid::new_v4();
        store.mark_reconnected("Tom", second, 2);
        assert_eq!(store.find_by_connection(second).unwrap().name, "Tom");
    }
}
