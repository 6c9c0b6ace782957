//! Verification state machine and the verifying entry reader.
//!
//! # Global states
//! `Unverified` (no session, or session dropped) | `CollectingMeta` ->
//! `Active`. `done_with_meta` is the only transition out of
//! `CollectingMeta` and it is one-way: to `Active`, or to `Unverified` when
//! the session reports nothing to verify.
//!
//! # Per-entry states (only while `Active`)
//! `NotStarted -> Verifying -> Verified | Failed`.
//!
//! # Invariants
//! - Every chunk handed to the caller is first mirrored into the session.
//! - An entry is finalized on the read that reaches its known size, or on
//!   the read that observes end of data, whichever comes first; reads never
//!   go past a known size.
//! - A failure is returned on the read that discovered it and on every later
//!   read of the same reader.
//! - Signers are only reported for `Verified` entries.

use std::io::{self, Read};

use ahash::AHashMap;
use tracing::{debug, trace, warn};

use crate::errors::IntegrityError;
use crate::verify::{EntryDescriptor, Signer, Update, Verifier};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalState {
    Unverified,
    CollectingMeta,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    NotStarted,
    Verifying,
    Verified,
    Failed,
}

pub struct VerificationProtocol<V> {
    session: Option<V>,
    state: GlobalState,
    entries: AHashMap<String, EntryState>,
}

impl<V: Verifier> Default for VerificationProtocol<V> {
    fn default() -> Self {
        Self::unverified()
    }
}

impl<V: Verifier> VerificationProtocol<V> {
    /// Pass-through protocol with no session.
    pub fn unverified() -> Self {
        Self {
            session: None,
            state: GlobalState::Unverified,
            entries: AHashMap::new(),
        }
    }

    /// Start collecting metadata for `session`.
    pub fn new(session: V) -> Self {
        Self {
            session: Some(session),
            state: GlobalState::CollectingMeta,
            entries: AHashMap::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> GlobalState {
        self.state
    }

    pub fn session(&self) -> Option<&V> {
        self.session.as_ref()
    }

    /// Feed one whole metadata entry. No-op outside `CollectingMeta`.
    pub fn feed_meta(
        &mut self,
        entry: &EntryDescriptor<'_>,
        content: &[u8],
    ) -> Result<(), IntegrityError> {
        if self.state != GlobalState::CollectingMeta {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        trace!(path = entry.path, len = content.len(), "feeding metadata entry");
        session.begin_entry(entry)?;
        session.update(Update::Bytes(content))?;
        session.update(Update::End)
    }

    /// Close the metadata phase. Idempotent.
    pub fn done_with_meta(&mut self) {
        if self.state != GlobalState::CollectingMeta {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            self.state = GlobalState::Unverified;
            return;
        };
        session.done_with_meta();
        if session.nothing_to_verify() {
            debug!("nothing to verify; dropping verifier session");
            self.session = None;
            self.state = GlobalState::Unverified;
        } else {
            debug!("verifier session active");
            self.state = GlobalState::Active;
        }
    }

    pub fn entry_state(&self, path: &str) -> EntryState {
        self.entries
            .get(path)
            .copied()
            .unwrap_or(EntryState::NotStarted)
    }

    /// Signers of `path`, once it has been read through and verified.
    pub fn signers(&self, path: &str) -> Option<&[Signer]> {
        if self.entry_state(path) != EntryState::Verified {
            return None;
        }
        self.session.as_ref()?.signers(path)
    }

    /// Wrap an entry's content reader.
    ///
    /// While `Active` this begins the entry with the session; in any other
    /// state the returned reader is a plain pass-through.
    pub fn wrap<'a, R: Read>(
        &'a mut self,
        entry: &EntryDescriptor<'_>,
        inner: R,
    ) -> Result<VerifyingReader<'a, R, V>, IntegrityError> {
        let session = match (self.state, self.session.as_mut()) {
            (GlobalState::Active, Some(session)) => session,
            _ => return Ok(VerifyingReader { inner, tracker: None }),
        };

        let state = self
            .entries
            .entry(entry.path.to_string())
            .or_insert(EntryState::NotStarted);
        trace!(path = entry.path, "begin verified entry");
        if let Err(err) = session.begin_entry(entry) {
            *state = EntryState::Failed;
            return Err(err);
        }
        *state = EntryState::Verifying;

        Ok(VerifyingReader {
            inner,
            tracker: Some(Tracker {
                session,
                state,
                remaining: entry.size,
                failure: None,
            }),
        })
    }
}

struct Tracker<'a, V> {
    session: &'a mut V,
    state: &'a mut EntryState,
    remaining: Option<u64>,
    failure: Option<IntegrityError>,
}

impl<V: Verifier> Tracker<'_, V> {
    fn fail(&mut self, err: IntegrityError) -> io::Error {
        warn!(error = %err, "entry failed verification");
        *self.state = EntryState::Failed;
        self.failure = Some(err.clone());
        err.into_io()
    }

    fn update(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.session
            .update(Update::Bytes(bytes))
            .map_err(|err| self.fail(err))
    }

    fn finish(&mut self) -> io::Result<()> {
        if *self.state != EntryState::Verifying {
            return Ok(());
        }
        match self.session.update(Update::End) {
            Ok(()) => {
                *self.state = EntryState::Verified;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }
}

/// Entry reader that mirrors every chunk into the verifier session.
pub struct VerifyingReader<'a, R, V> {
    inner: R,
    tracker: Option<Tracker<'a, V>>,
}

impl<R, V> VerifyingReader<'_, R, V> {
    /// `None` for pass-through readers.
    pub fn state(&self) -> Option<EntryState> {
        self.tracker.as_ref().map(|t| *t.state)
    }

    pub fn is_verifying(&self) -> bool {
        self.tracker.is_some()
    }
}

impl<R: Read, V: Verifier> Read for VerifyingReader<'_, R, V> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let Some(t) = self.tracker.as_mut() else {
            return self.inner.read(dst);
        };
        if let Some(err) = &t.failure {
            return Err(err.clone().into_io());
        }
        if *t.state != EntryState::Verifying {
            return Ok(0);
        }
        if dst.is_empty() {
            return Ok(0);
        }

        let want = match t.remaining {
            Some(left) => left.min(dst.len() as u64) as usize,
            None => dst.len(),
        };
        if want == 0 {
            t.finish()?;
            return Ok(0);
        }

        let n = self.inner.read(&mut dst[..want])?;
        if n == 0 {
            t.finish()?;
            return Ok(0);
        }
        t.update(&dst[..n])?;
        if let Some(left) = t.remaining.as_mut() {
            *left -= n as u64;
            if *left == 0 {
                t.finish()?;
            }
        }
        Ok(n)
    }
}
