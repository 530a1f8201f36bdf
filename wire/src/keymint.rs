//! Local equivalents of the KeyMint HAL enums, together with the typed key parameter
//! representation exchanged with the TA.
//!
//! - Enums are exhaustive Rust enums backed by `i32`, using Rust naming conventions.
//! - `KeyParameter` keeps the raw `Tag` next to a loosely typed `KeyParamValue`, because the
//!   parameter sets moved through this layer are opaque to it apart from their encoding.

use crate::try_from_n;
use alloc::vec::Vec;
use enumn::N;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the MAC in a [`HardwareAuthToken`].
pub const AUTH_TOKEN_MAC_LENGTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, N)]
#[repr(i32)]
pub enum Algorithm {
    Rsa = 1,
    Ec = 3,
    Aes = 32,
    TripleDes = 33,
    Hmac = 128,
}
try_from_n!(Algorithm);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum BlockMode {
    Ecb = 1,
    Cbc = 2,
    Ctr = 3,
    Gcm = 32,
}
try_from_n!(BlockMode);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum Digest {
    None = 0,
    Md5 = 1,
    Sha1 = 2,
    Sha224 = 3,
    Sha256 = 4,
    Sha384 = 5,
    Sha512 = 6,
}
try_from_n!(Digest);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum EcCurve {
    P224 = 0,
    P256 = 1,
    P384 = 2,
    P521 = 3,
    Curve25519 = 4,
}
try_from_n!(EcCurve);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    RootOfTrustAlreadySet = -1,
    UnsupportedPurpose = -2,
    IncompatiblePurpose = -3,
    UnsupportedAlgorithm = -4,
    IncompatibleAlgorithm = -5,
    UnsupportedKeySize = -6,
    UnsupportedBlockMode = -7,
    IncompatibleBlockMode = -8,
    UnsupportedMacLength = -9,
    UnsupportedPaddingMode = -10,
    IncompatiblePaddingMode = -11,
    UnsupportedDigest = -12,
    IncompatibleDigest = -13,
    InvalidExpirationTime = -14,
    InvalidUserId = -15,
    InvalidAuthorizationTimeout = -16,
    UnsupportedKeyFormat = -17,
    IncompatibleKeyFormat = -18,
    UnsupportedKeyEncryptionAlgorithm = -19,
    UnsupportedKeyVerificationAlgorithm = -20,
    InvalidInputLength = -21,
    KeyExportOptionsInvalid = -22,
    DelegationNotAllowed = -23,
    KeyNotYetValid = -24,
    KeyExpired = -25,
    KeyUserNotAuthenticated = -26,
    OutputParameterNull = -27,
    InvalidOperationHandle = -28,
    InsufficientBufferSpace = -29,
    VerificationFailed = -30,
    TooManyOperations = -31,
    UnexpectedNullPointer = -32,
    InvalidKeyBlob = -33,
    ImportedKeyNotEncrypted = -34,
    ImportedKeyDecryptionFailed = -35,
    ImportedKeyNotSigned = -36,
    ImportedKeyVerificationFailed = -37,
    InvalidArgument = -38,
    UnsupportedTag = -39,
    InvalidTag = -40,
    MemoryAllocationFailed = -41,
    ImportParameterMismatch = -44,
    SecureHwAccessDenied = -45,
    OperationCancelled = -46,
    ConcurrentAccessConflict = -47,
    SecureHwBusy = -48,
    SecureHwCommunicationFailed = -49,
    UnsupportedEcField = -50,
    MissingNonce = -51,
    InvalidNonce = -52,
    MissingMacLength = -53,
    KeyRateLimitExceeded = -54,
    CallerNonceProhibited = -55,
    KeyMaxOpsExceeded = -56,
    InvalidMacLength = -57,
    MissingMinMacLength = -58,
    UnsupportedMinMacLength = -59,
    UnsupportedKdf = -60,
    UnsupportedEcCurve = -61,
    KeyRequiresUpgrade = -62,
    AttestationChallengeMissing = -63,
    KeymintNotConfigured = -64,
    AttestationApplicationIdMissing = -65,
    CannotAttestIds = -66,
    RollbackResistanceUnavailable = -67,
    HardwareTypeUnavailable = -68,
    ProofOfPresenceRequired = -69,
    ConcurrentProofOfPresenceRequested = -70,
    NoUserConfirmation = -71,
    DeviceLocked = -72,
    EarlyBootEnded = -73,
    AttestationKeysNotProvisioned = -74,
    AttestationIdsNotProvisioned = -75,
    InvalidOperation = -76,
    StorageKeyUnsupported = -77,
    IncompatibleMgfDigest = -78,
    UnsupportedMgfDigest = -79,
    MissingNotBefore = -80,
    MissingNotAfter = -81,
    MissingIssuerSubject = -82,
    InvalidIssuerSubject = -83,
    BootLevelExceeded = -84,
    HardwareNotYetAvailable = -85,
    Unimplemented = -100,
    VersionMismatch = -101,
    UnknownError = -1000,
}
try_from_n!(ErrorCode);

impl ErrorCode {
    /// Convert a raw return code from the TA, folding unrecognized values into
    /// [`ErrorCode::UnknownError`].
    pub fn from_raw(rc: u32) -> Self {
        Self::n(rc as i32).unwrap_or(ErrorCode::UnknownError)
    }
}

/// Hardware authentication token, passed through to the TA on every operation command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HardwareAuthToken {
    pub challenge: i64,
    pub user_id: i64,
    pub authenticator_id: i64,
    pub authenticator_type: HardwareAuthenticatorType,
    pub timestamp: i64,
    pub mac: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum HardwareAuthenticatorType {
    None = 0,
    Password = 1,
    Fingerprint = 2,
    Any = -1,
}
try_from_n!(HardwareAuthenticatorType);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum KeyFormat {
    X509 = 0,
    Pkcs8 = 1,
    Raw = 3,
}
try_from_n!(KeyFormat);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum KeyPurpose {
    Encrypt = 0,
    Decrypt = 1,
    Sign = 2,
    Verify = 3,
    WrapKey = 5,
    AgreeKey = 6,
    AttestKey = 7,
}
try_from_n!(KeyPurpose);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum PaddingMode {
    None = 1,
    RsaOaep = 2,
    RsaPss = 3,
    RsaPkcs115Encrypt = 4,
    RsaPkcs115Sign = 5,
    Pkcs7 = 64,
}
try_from_n!(PaddingMode);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, N)]
#[repr(i32)]
pub enum Tag {
    Invalid = 0,
    Purpose = 536870913,
    Algorithm = 268435458,
    KeySize = 805306371,
    BlockMode = 536870916,
    Digest = 536870917,
    Padding = 536870918,
    CallerNonce = 1879048199,
    MinMacLength = 805306376,
    EcCurve = 268435466,
    RsaPublicExponent = 1342177480,
    IncludeUniqueId = 1879048394,
    RsaOaepMgfDigest = 536871115,
    BootloaderOnly = 1879048494,
    RollbackResistance = 1879048495,
    HardwareType = 268435760,
    EarlyBootOnly = 1879048497,
    ActiveDatetime = 1610613136,
    OriginationExpireDatetime = 1610613137,
    UsageExpireDatetime = 1610613138,
    MinSecondsBetweenOps = 805306771,
    MaxUsesPerBoot = 805306772,
    UsageCountLimit = 805306773,
    UserId = 805306869,
    UserSecureId = -1610612234,
    NoAuthRequired = 1879048695,
    UserAuthType = 268435960,
    AuthTimeout = 805306873,
    AllowWhileOnBody = 1879048698,
    TrustedUserPresenceRequired = 1879048699,
    TrustedConfirmationRequired = 1879048700,
    UnlockedDeviceRequired = 1879048701,
    ApplicationId = -1879047591,
    ApplicationData = -1879047492,
    CreationDatetime = 1610613437,
    Origin = 268436158,
    RootOfTrust = -1879047488,
    OsVersion = 805307073,
    OsPatchlevel = 805307074,
    UniqueId = -1879047485,
    AttestationChallenge = -1879047484,
    AttestationApplicationId = -1879047483,
    AttestationIdBrand = -1879047482,
    AttestationIdDevice = -1879047481,
    AttestationIdProduct = -1879047480,
    AttestationIdSerial = -1879047479,
    AttestationIdImei = -1879047478,
    AttestationIdMeid = -1879047477,
    AttestationIdManufacturer = -1879047476,
    AttestationIdModel = -1879047475,
    VendorPatchlevel = 805307086,
    BootPatchlevel = 805307087,
    DeviceUniqueAttestation = 1879048912,
    IdentityCredentialKey = 1879048913,
    StorageKey = 1879048914,
    AssociatedData = -1879047192,
    Nonce = -1879047191,
    MacLength = 805307371,
    ResetSinceIdRotation = 1879049196,
    ConfirmationToken = -1879047187,
    CertificateSerial = -2147482642,
    CertificateSubject = -1879047185,
    CertificateNotBefore = 1610613744,
    CertificateNotAfter = 1610613745,
    MaxBootLevel = 805307378,
}
try_from_n!(Tag);

impl Tag {
    /// Return the tag as it appears on the wire.
    pub fn raw(self) -> u32 {
        self as i32 as u32
    }

    /// Look up a tag from its on-the-wire value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::n(raw as i32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(i32)]
pub enum TagType {
    Invalid = 0,
    Enum = 268435456,
    EnumRep = 536870912,
    Uint = 805306368,
    UintRep = 1073741824,
    Ulong = 1342177280,
    Date = 1610612736,
    Bool = 1879048192,
    Bignum = -2147483648,
    Bytes = -1879048192,
    UlongRep = -1610612736,
}
try_from_n!(TagType);

/// Mask selecting the [`TagType`] bits of a raw tag value.
pub const TAG_TYPE_MASK: u32 = 0xf000_0000;

/// Determine the tag type for a raw tag value, based on its top 4 bits.
pub fn raw_tag_type(raw: u32) -> TagType {
    match TagType::n((raw & TAG_TYPE_MASK) as i32) {
        Some(tt) => tt,
        None => TagType::Invalid,
    }
}

/// Determine the tag type for a tag.
pub fn tag_type(tag: Tag) -> TagType {
    raw_tag_type(tag.raw())
}

/// Determine the raw tag value with tag type information stripped out.
pub fn raw_tag_value(tag: Tag) -> u32 {
    tag.raw() & !TAG_TYPE_MASK
}

/// Value carried by a [`KeyParameter`]; the variant in use is implied by the tag's [`TagType`].
#[derive(Clone, Debug, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub enum KeyParamValue {
    /// `TagType::Enum` and `TagType::EnumRep`.
    Enum(u32),
    /// `TagType::Uint` and `TagType::UintRep`.
    UInt(u32),
    /// `TagType::Ulong` and `TagType::UlongRep`.
    ULong(u64),
    /// `TagType::Date`, as milliseconds since the epoch.
    DateTime(u64),
    /// `TagType::Bool`.  Presence means `true`, so a `false` value is never serialized.
    Bool(bool),
    /// `TagType::Bytes` and `TagType::Bignum`.
    Bytes(Vec<u8>),
}

/// A single key parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyParameter {
    pub tag: Tag,
    pub value: KeyParamValue,
}

impl KeyParameter {
    pub fn new(tag: Tag, value: KeyParamValue) -> Self {
        Self { tag, value }
    }

    /// Build an enumerated parameter (single or repeatable).
    pub fn enumerated(tag: Tag, value: i32) -> Self {
        Self::new(tag, KeyParamValue::Enum(value as u32))
    }

    pub fn uint(tag: Tag, value: u32) -> Self {
        Self::new(tag, KeyParamValue::UInt(value))
    }

    pub fn ulong(tag: Tag, value: u64) -> Self {
        Self::new(tag, KeyParamValue::ULong(value))
    }

    pub fn date(tag: Tag, ms_since_epoch: u64) -> Self {
        Self::new(tag, KeyParamValue::DateTime(ms_since_epoch))
    }

    /// Build a boolean parameter; presence alone means `true`.
    pub fn flag(tag: Tag) -> Self {
        Self::new(tag, KeyParamValue::Bool(true))
    }

    pub fn bytes(tag: Tag, value: Vec<u8>) -> Self {
        Self::new(tag, KeyParamValue::Bytes(value))
    }

    /// Indicate whether the value variant is the one implied by the tag's type.
    pub fn is_consistent(&self) -> bool {
        matches!(
            (tag_type(self.tag), &self.value),
            (TagType::Enum | TagType::EnumRep, KeyParamValue::Enum(_))
                | (TagType::Uint | TagType::UintRep, KeyParamValue::UInt(_))
                | (TagType::Ulong | TagType::UlongRep, KeyParamValue::ULong(_))
                | (TagType::Date, KeyParamValue::DateTime(_))
                | (TagType::Bool, KeyParamValue::Bool(_))
                | (TagType::Bignum | TagType::Bytes, KeyParamValue::Bytes(_))
        )
    }
}
