//! Client engine for a KeyMint trusted application (TA) reached over a mapped-buffer channel.
//!
//! Commands are fixed-layout TCI messages (see [`tkm_wire::tci`]).  Bulk data does not travel in
//! the command itself: each buffer is mapped into the secure world through a [`SecureTransport`]
//! and referenced by address and length.  Every mapping made by this crate is held by a
//! [`Mapping`] guard, so is torn down on every exit path.

extern crate alloc;

use log::error;
use std::sync::Arc;
use tkm_common::{km_err, wrapper::RepeatedTagPolicy, Error};
use tkm_wire::tci::{DataBlob, ProtocolVersion};

pub mod chunk;
pub mod keys;
pub mod operation;
pub mod session;

pub use keys::{AttestationKey, KeyCharacteristics};
pub use session::{BeginResult, FinishResult, KeyCreationResult, TeeSession, UpdateResult};

/// Identifier of an open session with the TA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u32);

/// A buffer mapped into the secure world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedRef {
    /// Address of the buffer as seen by the TA.
    pub secure_addr: u32,
    pub len: u32,
}

impl From<MappedRef> for DataBlob {
    fn from(m: MappedRef) -> Self {
        DataBlob { data: m.secure_addr, data_length: m.len }
    }
}

/// Abstraction of the secure-world channel primitives.
///
/// `map` shares the current contents of a buffer with the TA; anything the TA writes into a
/// mapped buffer is retrieved with `read_back` before the buffer is unmapped.
pub trait SecureTransport: Send + Sync {
    fn open_session(&self) -> Result<SessionHandle, Error>;

    fn close_session(&self, session: SessionHandle) -> Result<(), Error>;

    /// Map `buf` into the secure world.  `buf` is never empty.
    fn map(&self, session: SessionHandle, buf: &[u8]) -> Result<MappedRef, Error>;

    /// Copy the first `buf.len()` bytes of a mapped buffer into `buf`.
    fn read_back(
        &self,
        session: SessionHandle,
        mapped: &MappedRef,
        buf: &mut [u8],
    ) -> Result<(), Error>;

    fn unmap(&self, session: SessionHandle, mapped: MappedRef) -> Result<(), Error>;

    /// Send a serialized TCI command and wait for the TA's response.
    fn exchange(&self, session: SessionHandle, command: &[u8]) -> Result<Vec<u8>, Error>;
}

impl<T: SecureTransport + ?Sized> SecureTransport for Arc<T> {
    fn open_session(&self) -> Result<SessionHandle, Error> {
        (**self).open_session()
    }
    fn close_session(&self, session: SessionHandle) -> Result<(), Error> {
        (**self).close_session(session)
    }
    fn map(&self, session: SessionHandle, buf: &[u8]) -> Result<MappedRef, Error> {
        (**self).map(session, buf)
    }
    fn read_back(
        &self,
        session: SessionHandle,
        mapped: &MappedRef,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        (**self).read_back(session, mapped, buf)
    }
    fn unmap(&self, session: SessionHandle, mapped: MappedRef) -> Result<(), Error> {
        (**self).unmap(session, mapped)
    }
    fn exchange(&self, session: SessionHandle, command: &[u8]) -> Result<Vec<u8>, Error> {
        (**self).exchange(session, command)
    }
}

/// Scoped mapping of a buffer into the secure world, unmapped when dropped.
///
/// An empty buffer is not mapped at all, and is referenced as a zero [`DataBlob`].
pub struct Mapping<'a, T: SecureTransport + ?Sized> {
    transport: &'a T,
    session: SessionHandle,
    mapped: Option<MappedRef>,
}

impl<'a, T: SecureTransport + ?Sized> Mapping<'a, T> {
    pub fn new(transport: &'a T, session: SessionHandle, buf: &[u8]) -> Result<Self, Error> {
        let mapped = if buf.is_empty() {
            None
        } else {
            if u32::try_from(buf.len()).is_err() {
                return Err(km_err!(InvalidInputLength, "cannot map {} bytes", buf.len()));
            }
            Some(transport.map(session, buf)?)
        };
        Ok(Self { transport, session, mapped })
    }

    /// Reference to the mapping for use in a TCI command.
    pub fn blob(&self) -> DataBlob {
        self.mapped.map(DataBlob::from).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.mapped.map(|m| m.len as usize).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the first `buf.len()` bytes of the mapped buffer out.
    pub fn read_into(&self, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() > self.len() {
            return Err(km_err!(
                InsufficientBufferSpace,
                "read of {} bytes from mapping of {}",
                buf.len(),
                self.len()
            ));
        }
        match &self.mapped {
            Some(m) if !buf.is_empty() => self.transport.read_back(self.session, m, buf),
            _ => Ok(()),
        }
    }
}

impl<'a, T: SecureTransport + ?Sized> Drop for Mapping<'a, T> {
    fn drop(&mut self) {
        if let Some(m) = self.mapped.take() {
            if let Err(e) = self.transport.unmap(self.session, m) {
                error!("failed to unmap {} bytes at {:#x}: {:?}", m.len, m.secure_addr, e);
            }
        }
    }
}

/// Engine settings, fixed for the lifetime of a [`TeeSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Command set spoken by the TA.
    pub protocol: ProtocolVersion,
    /// Number of operations that may be open at once.
    pub max_operations: usize,
    /// Upper bound on the AAD plus input bytes submitted in one command.
    pub chunk_size: usize,
    /// Size of the buffer offered for parameters returned by `begin`.
    pub begin_out_params_size: usize,
    /// Handling of a repeated algorithm or secure user ID in a wrapped key's authorizations.
    pub repeated_tag_policy: RepeatedTagPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::KeyMint,
            max_operations: 32,
            chunk_size: 16 * 1024,
            begin_out_params_size: 1024,
            repeated_tag_policy: RepeatedTagPolicy::LastWins,
        }
    }
}

impl EngineConfig {
    /// Check that the settings describe a usable engine.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_operations == 0 {
            return Err(km_err!(InvalidArgument, "operation table needs at least one slot"));
        }
        if self.chunk_size == 0 || u32::try_from(self.chunk_size).is_err() {
            return Err(km_err!(InvalidArgument, "chunk size {} out of range", self.chunk_size));
        }
        Ok(())
    }
}
