//! Connection token: one granted budget slot, released exactly once.

use std::sync::Arc;

use super::Inner;
use crate::host::HostKey;

/// One granted connection slot for a host.
///
/// The slot is returned to the budget when the token is dropped or passed to
/// [`ConnectionToken::release`]. `release` consumes the token, so a second
/// release of the same slot cannot be written.
#[must_use = "dropping the token releases the connection slot immediately"]
#[derive(Debug)]
pub struct ConnectionToken {
    inner: Arc<Inner>,
    host: HostKey,
    active: bool,
}

impl ConnectionToken {
    pub(super) fn new(inner: Arc<Inner>, host: HostKey) -> Self {
        Self {
            inner,
            host,
            active: true,
        }
    }

    /// Host this slot was granted for.
    pub fn host(&self) -> &HostKey {
        &self.host
    }

    /// Return the slot to the budget now.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.active {
            self.active = false;
            self.inner.release(&self.host);
        }
    }
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.release_once();
    }
}
