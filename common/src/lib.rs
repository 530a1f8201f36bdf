//! Functionality for the TEE KeyMint client that does not depend on the secure transport: DER
//! parsing, key parameter encoding, wrapped key parsing and buffer sizing.

#![no_std]
extern crate alloc;

use alloc::{string::String, vec::Vec};
use core::convert::From;
use tkm_wire::keymint::ErrorCode;

pub mod der;
pub mod keydata;
pub mod params;
pub mod size;
pub mod wrapper;

pub use tkm_wire as wire;

/// General error type.
#[derive(Debug)]
pub enum Error {
    /// KeyMint-level failure, with a diagnostic message.
    Hal(ErrorCode, String),
    /// Failure to encode or decode a TCI message.
    Wire(tkm_wire::Error),
    /// Failure to allocate memory.
    Alloc(&'static str),
}

// The following macros for error generation allow the message portion to be automatically
// compiled out in future, avoiding potential information leakage and allocation.

/// Macro to build an [`Error::Hal`] instance for a specific [`ErrorCode`] value known at compile time:
/// `km_err!(InvalidTag, "some {} format", arg)`.
#[macro_export]
macro_rules! km_err {
    { $error_code:ident, $($arg:tt)+ } => {
        $crate::Error::Hal($crate::wire::keymint::ErrorCode::$error_code,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

/// Macro to build an [`Error::Hal`] instance:
/// `km_verr!(rc, "some {} format", arg)`.
#[macro_export]
macro_rules! km_verr {
    { $error_code:expr, $($arg:tt)+ } => {
        $crate::Error::Hal($error_code,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

impl Error {
    /// Return the KeyMint error code corresponding to this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Hal(rc, _msg) => *rc,
            Error::Wire(tkm_wire::Error::AllocationFailed) => ErrorCode::MemoryAllocationFailed,
            Error::Wire(tkm_wire::Error::DataTruncated) => ErrorCode::InsufficientBufferSpace,
            Error::Wire(tkm_wire::Error::InvalidEnumValue(_)) => ErrorCode::InvalidArgument,
            Error::Wire(_) => ErrorCode::SecureHwCommunicationFailed,
            Error::Alloc(_) => ErrorCode::MemoryAllocationFailed,
        }
    }
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> Self {
        e.code()
    }
}

impl From<tkm_wire::Error> for Error {
    fn from(e: tkm_wire::Error) -> Self {
        Error::Wire(e)
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_e: alloc::collections::TryReserveError) -> Self {
        Error::Alloc("allocation of Vec failed")
    }
}

/// Extension trait for `Vec` that adds fallible variants of the growing operations.
pub trait FallibleAllocExt<T> {
    /// Try to add the `value` to the collection, failing on memory exhaustion.
    fn try_push(&mut self, value: T) -> Result<(), alloc::collections::TryReserveError>;
    /// Try to extend the collection with the contents of `other`, failing on memory exhaustion.
    fn try_extend_from_slice(
        &mut self,
        other: &[T],
    ) -> Result<(), alloc::collections::TryReserveError>
    where
        T: Clone;
}

impl<T> FallibleAllocExt<T> for Vec<T> {
    fn try_push(&mut self, value: T) -> Result<(), alloc::collections::TryReserveError> {
        self.try_reserve(1)?;
        self.push(value);
        Ok(())
    }
    fn try_extend_from_slice(
        &mut self,
        other: &[T],
    ) -> Result<(), alloc::collections::TryReserveError>
    where
        T: Clone,
    {
        self.try_reserve(other.len())?;
        self.extend_from_slice(other);
        Ok(())
    }
}

/// Function that mimics `slice.to_vec()` but which detects allocation failures.
#[inline]
pub fn try_to_vec<T: Clone>(s: &[T]) -> Result<Vec<T>, Error> {
    let mut v = vec_try_with_capacity!(s.len())?;
    v.extend_from_slice(s);
    Ok(v)
}

/// Macro that mimics `Vec::with_capacity` but which detects allocation failure.
#[macro_export]
macro_rules! vec_try_with_capacity {
    { $len:expr } => {
        {
            let mut v = alloc::vec::Vec::new();
            match v.try_reserve($len) {
                Err(_e) => Err($crate::Error::Alloc("allocation of Vec failed")),
                Ok(_) => Ok(v),
            }
        }
    }
}

/// Macro that mimics `vec!` but which detects allocation failure.
#[macro_export]
macro_rules! vec_try {
    { $elem:expr ; $len:expr } => {
        $crate::wire::vec_try_fill_with_alloc_err($elem, $len,
                                                  || $crate::Error::Alloc("allocation of Vec failed"))
    };
    { $x1:expr, $x2:expr $(,)? } => {
        $crate::wire::vec_try2_with_alloc_err($x1, $x2,
                                              || $crate::Error::Alloc("allocation of Vec failed"))
    };
    { $x1:expr $(,)? } => {
        $crate::wire::vec_try1_with_alloc_err($x1,
                                              || $crate::Error::Alloc("allocation of Vec failed"))
    };
}

/// Check for an expected error.
#[macro_export]
macro_rules! expect_err {
    ($result:expr, $err_msg:expr) => {
        assert!(
            $result.is_err(),
            "Expected error containing '{}', got success {:?}",
            $err_msg,
            $result
        );
        let err = $result.err();
        assert!(
            alloc::format!("{:?}", err).contains($err_msg),
            "Unexpected error {:?}, doesn't contain '{}'",
            err,
            $err_msg
        );
    };
}
