//! Per-call shared transcript.
//!
//! Both aggregators append to the same container; the lifecycle controller
//! seals it before taking its read-only snapshot. Entries are never mutated
//! or removed.

use crate::error::{IntakeError, Result};
use crate::pipeline::frame::{Role, Turn};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct State {
    turns: Vec<Turn>,
    sealed: bool,
}

impl State {
    fn push(&mut self, turn: Turn) -> Result<()> {
        if self.sealed {
            return Err(IntakeError::Pipeline {
                message: format!("transcript sealed, dropping {} turn", turn.role),
            });
        }
        self.turns.push(turn);
        Ok(())
    }
}

/// Append-only, sealable list of conversation turns. Cloning shares the list.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    state: Arc<RwLock<State>>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transcript pre-seeded with the system instruction at index 0.
    pub fn with_system(instruction: impl Into<String>) -> Self {
        let transcript = Self::new();
        transcript.write_state().turns.push(Turn::system(instruction));
        transcript
    }

    /// Appends a turn, returning its index.
    ///
    /// Fails once the transcript has been sealed.
    pub fn append(&self, turn: Turn) -> Result<usize> {
        let mut state = self.write_state();
        state.push(turn)?;
        Ok(state.turns.len() - 1)
    }

    /// Appends a turn and copies the transcript under the same guard, so the
    /// returned snapshot always ends with `turn`.
    pub fn append_and_snapshot(&self, turn: Turn) -> Result<Vec<Turn>> {
        let mut state = self.write_state();
        state.push(turn)?;
        Ok(state.turns.clone())
    }

    /// Appends `content` under `role`.
    pub fn push(&self, role: Role, content: impl Into<String>) -> Result<usize> {
        self.append(Turn::new(role, content))
    }

    /// Copies the current turns in order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.read_state().turns.clone()
    }

    /// Closes the transcript to further appends.
    ///
    /// Returns true if this call sealed it, false if it was already sealed.
    pub fn seal(&self) -> bool {
        let mut state = self.write_state();
        !std::mem::replace(&mut state.sealed, true)
    }

    pub fn is_sealed(&self) -> bool {
        self.read_state().sealed
    }

    pub fn len(&self) -> usize {
        self.read_state().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().turns.is_empty()
    }

    /// Returns the most recent turn, if any.
    pub fn last(&self) -> Option<Turn> {
        self.read_state().turns.last().cloned()
    }

    // A panic while holding the lock cannot leave a half-written Vec behind
    // (push is the only mutation), so a poisoned lock is still usable.
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_system_seeds_index_zero() {
        let transcript = Transcript::with_system("be helpful");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.snapshot()[0], Turn::system("be helpful"));
    }

    #[test]
    fn test_append_preserves_order_across_clones() {
        let transcript = Transcript::with_system("sys");
        let user_side = transcript.clone();
        let assistant_side = transcript.clone();

        user_side.push(Role::User, "my house is flooding").unwrap();
        assistant_side.push(Role::Assistant, "how many people?").unwrap();
        user_side.push(Role::User, "two").unwrap();

        let roles: Vec<Role> = transcript.snapshot().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
    }

    #[test]
    fn test_append_returns_index() {
        let transcript = Transcript::new();
        assert_eq!(transcript.push(Role::User, "a").unwrap(), 0);
        assert_eq!(transcript.push(Role::User, "b").unwrap(), 1);
    }

    #[test]
    fn test_seal_blocks_appends() {
        let transcript = Transcript::with_system("sys");
        assert!(transcript.seal());
        assert!(!transcript.seal(), "second seal reports already sealed");
        assert!(transcript.is_sealed());

        let result = transcript.push(Role::User, "late");
        assert!(matches!(result, Err(IntakeError::Pipeline { .. })));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_last_turn() {
        let transcript = Transcript::new();
        assert!(transcript.last().is_none());
        transcript.push(Role::Assistant, "bye <END>").unwrap();
        assert_eq!(transcript.last(), Some(Turn::assistant("bye <END>")));
    }

    #[test]
    fn test_append_and_snapshot_ends_with_own_turn() {
        let transcript = Transcript::with_system("sys");
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let t = transcript.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                        let turn = Turn::new(role, format!("{i}-{j}"));
                        let snapshot = t.append_and_snapshot(turn.clone()).unwrap();
                        assert_eq!(snapshot.last(), Some(&turn));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(transcript.len(), 201);
    }

    #[test]
    fn test_append_and_snapshot_refused_when_sealed() {
        let transcript = Transcript::with_system("sys");
        transcript.seal();
        let result = transcript.append_and_snapshot(Turn::assistant("late <END>"));
        assert!(matches!(result, Err(IntakeError::Pipeline { .. })));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let transcript = Transcript::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let t = transcript.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        t.push(Role::User, format!("{i}-{j}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(transcript.len(), 100);
    }
}
