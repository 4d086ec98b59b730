use std::fmt;
use std::num::NonZeroUsize;

use parking_lot::RwLock;

use crate::Unblock;

/// Holds the unblock callback of a limit. Empty until a limiter installs one.
#[derive(Default)]
pub(crate) struct Notifier {
    slot: RwLock<Option<Unblock>>,
}

impl Notifier {
    pub(crate) fn set(&self, notifier: Unblock) {
        *self.slot.write() = Some(notifier);
    }

    /// Calls the notifier without holding the slot lock, so the callback may
    /// freely re-enter the limit that fired it.
    pub(crate) fn fire(&self, hint: Option<NonZeroUsize>) {
        let notifier = self.slot.read().clone();
        if let Some(notifier) = notifier {
            notifier(hint);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("installed", &self.slot.read().is_some())
            .finish()
    }
}
