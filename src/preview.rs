//! SecureVault Core - Preview Buffers
//!
//! A preview hands decrypted bytes to the renderer together with a token.
//! The buffer zeroizes when the guard is released (or dropped), and while
//! any preview is open the manager keeps the platform's screen-privacy
//! flags raised. The flags are advisory; they are not part of the
//! cryptographic guarantee.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroizing;

/// Platform hook for "hide in task switcher" / "block screenshots" flags.
///
/// Actual implementations are platform-specific; the default does
/// nothing.
pub trait ScreenPrivacy: Send + Sync {
    /// Called when the first preview opens
    fn previews_opened(&self);
    /// Called when the last preview closes
    fn previews_closed(&self);
}

/// No-op privacy hook
pub struct NoPrivacy;

impl ScreenPrivacy for NoPrivacy {
    fn previews_opened(&self) {}
    fn previews_closed(&self) {}
}

/// Tracks open preview tokens and drives the privacy flags
pub struct PreviewTracker {
    open: Mutex<HashSet<u64>>,
    next_token: Mutex<u64>,
    privacy: Box<dyn ScreenPrivacy>,
}

impl PreviewTracker {
    pub fn new(privacy: Box<dyn ScreenPrivacy>) -> Self {
        Self {
            open: Mutex::new(HashSet::new()),
            next_token: Mutex::new(1),
            privacy,
        }
    }

    /// Register a new preview buffer
    pub fn acquire(tracker: &Arc<Self>, data: Vec<u8>) -> PreviewGuard {
        let token = {
            let mut next = tracker.next_token.lock();
            let token = *next;
            *next += 1;
            token
        };

        let first = {
            let mut open = tracker.open.lock();
            open.insert(token);
            open.len() == 1
        };
        if first {
            tracker.privacy.previews_opened();
        }

        PreviewGuard {
            token,
            data: Zeroizing::new(data),
            tracker: Arc::clone(tracker),
        }
    }

    /// Number of previews currently open
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    fn release(&self, token: u64) {
        let last = {
            let mut open = self.open.lock();
            open.remove(&token) && open.is_empty()
        };
        if last {
            self.privacy.previews_closed();
        }
    }
}

/// Caller-held decrypted preview buffer.
///
/// The renderer presents the token back on release; dropping the guard
/// wipes the plaintext and releases the token either way.
pub struct PreviewGuard {
    token: u64,
    data: Zeroizing<Vec<u8>>,
    tracker: Arc<PreviewTracker>,
}

impl PreviewGuard {
    /// The token identifying this preview to the manager
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Explicit release; equivalent to dropping the guard
    pub fn release(self) {}
}

impl Deref for PreviewGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for PreviewGuard {
    fn drop(&mut self) {
        // Zeroizing wipes the buffer; deregister the token
        self.tracker.release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPrivacy {
        raised: AtomicUsize,
        lowered: AtomicUsize,
    }

    impl ScreenPrivacy for Arc<CountingPrivacy> {
        fn previews_opened(&self) {
            self.raised.fetch_add(1, Ordering::SeqCst);
        }
        fn previews_closed(&self) {
            self.lowered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn privacy_flags_follow_first_and_last_preview() {
        let counts = Arc::new(CountingPrivacy {
            raised: AtomicUsize::new(0),
            lowered: AtomicUsize::new(0),
        });
        let tracker = Arc::new(PreviewTracker::new(Box::new(Arc::clone(&counts))));

        let a = PreviewTracker::acquire(&tracker, b"one".to_vec());
        let b = PreviewTracker::acquire(&tracker, b"two".to_vec());
        assert_eq!(tracker.open_count(), 2);
        assert_eq!(counts.raised.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(counts.lowered.load(Ordering::SeqCst), 0);

        b.release();
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(counts.lowered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_exposes_bytes_and_token() {
        let tracker = Arc::new(PreviewTracker::new(Box::new(NoPrivacy)));
        let guard = PreviewTracker::acquire(&tracker, b"hello".to_vec());
        assert_eq!(&*guard, b"hello");
        assert!(guard.token() > 0);
    }
}
