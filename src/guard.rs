//! Generation-token mount guard.
//!
//! Each subscription owns one [`MountGuard`]. Before issuing a request it captures a
//! [`MountToken`]; before applying the response it checks
//! [`is_current`](MountGuard::is_current). Teardown, remount and re-keying call
//! [`bump`](MountGuard::bump), which invalidates every token issued before it.
//!
//! Unlike a boolean "mounted" flag, a generation counter distinguishes "torn down"
//! from "torn down and mounted again since this request started", so a slow response
//! from a previous generation can never overwrite state owned by the current one.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// A captured generation, owned by the call site that issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountToken {
    generation: u64,
}

impl MountToken {
    pub fn generation(self) -> u64 {
        self.generation
    }
}

/// Monotonic generation counter shared by clones of the same guard.
#[derive(Debug, Clone, Default)]
pub struct MountGuard {
    generation: Arc<AtomicU64>,
}

impl MountGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the live generation for a request about to be issued.
    pub fn new_token(&self) -> MountToken {
        MountToken {
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Whether `token` was captured in the live generation.
    pub fn is_current(&self, token: MountToken) -> bool {
        self.generation.load(Ordering::SeqCst) == token.generation
    }

    /// Start a new generation, invalidating every previously issued token.
    ///
    /// Returns the new generation.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_current_until_bump() {
        let guard = MountGuard::new();
        let token = guard.new_token();
        assert!(guard.is_current(token));
        assert_eq!(guard.bump(), 1);
        assert!(!guard.is_current(token));
        assert!(guard.is_current(guard.new_token()));
    }

    #[test]
    fn test_rapid_remount_invalidates_older_generations() {
        // unmount + remount must not revive a request from the first mount
        let guard = MountGuard::new();
        let first_mount = guard.new_token();
        guard.bump(); // teardown
        guard.bump(); // remount
        let second_mount = guard.new_token();
        assert!(!guard.is_current(first_mount));
        assert!(guard.is_current(second_mount));
        assert_ne!(first_mount, second_mount);
    }

    #[test]
    fn test_clones_share_generation() {
        let guard = MountGuard::new();
        let clone = guard.clone();
        let token = guard.new_token();
        clone.bump();
        assert!(!guard.is_current(token));
    }
}
