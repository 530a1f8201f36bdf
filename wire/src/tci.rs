//! Fixed-layout messages exchanged with the KeyMint TA through the TCI (trustlet control
//! interface) buffer.
//!
//! Every command starts with a `u32` command identifier, which combines a command code in the
//! low 16 bits with a protocol version in bits 16..21.  The remaining fields follow in declaration
//! order, packed, with all integers little-endian.  Bulk data never travels inside the TCI buffer
//! itself: it is referenced through a [`DataBlob`] holding the secure-side address and length of a
//! separately mapped buffer.
//!
//! A response starts with the command identifier (with [`RSP_ID_MASK`] set) and a `u32` return
//! code; the command's out-fields follow only when the return code is zero.
//!
//! Two command sets are supported:
//! - [`ProtocolVersion::Keymaster4`] (v1), where `update` and `finish` carry a serialized parameter
//!   set, so additional authenticated data is pushed through `Tag::AssociatedData`.
//! - [`ProtocolVersion::KeyMint`] (v2), where `update` and `finish` carry no parameters and AAD is
//!   submitted with a separate `UPDATE_AAD` command.

use crate::{
    keymint::{ErrorCode, HardwareAuthToken, AUTH_TOKEN_MAC_LENGTH},
    try_from_n, Error,
};
use alloc::vec::Vec;
use enumn::N;
use tkm_derive::TciSerialize;
use zeroize::ZeroizeOnDrop;

/// Mask for the command code part of a command identifier.
pub const CMD_MASK_ID: u32 = 0x0000_ffff;
/// Mask for the protocol version part of a command identifier.
pub const CMD_MASK_VERSION: u32 = 0x001f_0000;
/// Shift for the protocol version part of a command identifier.
pub const CMD_SHIFT_VERSION: u32 = 16;
/// Bit set in the identifier echoed back in a response.
pub const RSP_ID_MASK: u32 = 0x8000_0000;
/// Size of the response header (identifier + return code).
pub const RSP_HEADER_SIZE: usize = 8;

/// Maximum length of the IV carried in an `IMPORT_WRAPPED_KEY` command.
pub const WRAPPED_KEY_IV_MAX_LEN: usize = 16;
/// Length of the GCM tag carried in an `IMPORT_WRAPPED_KEY` command.
pub const WRAPPED_KEY_TAG_LEN: usize = 16;
/// Length of the masking key carried in an `IMPORT_WRAPPED_KEY` command.
pub const MASKING_KEY_LEN: usize = 32;

/// Command set spoken by the TA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(i32)]
pub enum ProtocolVersion {
    /// Keymaster4-style commands (v1).
    Keymaster4 = 4,
    /// KeyMint-style commands (v2).
    KeyMint = 5,
}
try_from_n!(ProtocolVersion);

/// Command codes understood by the TA (without version bits).
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(i32)]
pub enum TciCommandCode {
    AddRngEntropy = 0x01,
    GenerateKey = 0x02,
    GetKeyCharacteristics = 0x03,
    ImportKey = 0x04,
    ExportKey = 0x05,
    Begin = 0x06,
    Update = 0x07,
    Finish = 0x08,
    Abort = 0x09,
    UpgradeKey = 0x0b,
    UpdateAad = 0x0c,
    ImportWrappedKey = 0x0e,
    DeleteKey = 0x14,
    DeleteAllKeys = 0x15,
    /// Key type and size of a key blob, used to size the buffer for an export.
    GetKeyInfo = 0x0101,
}
try_from_n!(TciCommandCode);

/// Build the raw command identifier for a command in a particular protocol version.
pub fn command_id(version: ProtocolVersion, code: TciCommandCode) -> u32 {
    ((version as u32) << CMD_SHIFT_VERSION) | (code as u32)
}

/// Split a raw command identifier into its protocol version and command code.
pub fn parse_command_id(raw: u32) -> Result<(ProtocolVersion, TciCommandCode), Error> {
    let version = (raw & CMD_MASK_VERSION) >> CMD_SHIFT_VERSION;
    let version = ProtocolVersion::n(version as i32).ok_or(Error::UnknownCommand(raw))?;
    let code = TciCommandCode::n((raw & CMD_MASK_ID) as i32).ok_or(Error::UnknownCommand(raw))?;
    if (raw & !(CMD_MASK_ID | CMD_MASK_VERSION)) != 0 {
        return Err(Error::UnknownCommand(raw));
    }
    Ok((version, code))
}

/// Trait that serializes a message to/from the packed layout used in the TCI buffer.
pub trait InnerSerialize: Sized {
    fn deserialize(data: &[u8]) -> Result<(Self, &[u8]), Error>;
    fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error>;
}

impl InnerSerialize for u64 {
    fn deserialize(data: &[u8]) -> Result<(Self, &[u8]), Error> {
        if data.len() < 8 {
            return Err(Error::DataTruncated);
        }
        let int_data: [u8; 8] = data[..8].try_into().map_err(|_e| Error::DataTruncated)?;
        Ok((<u64>::from_le_bytes(int_data), &data[8..]))
    }
    fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.try_reserve(8).map_err(|_e| Error::AllocationFailed)?;
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl InnerSerialize for u32 {
    fn deserialize(data: &[u8]) -> Result<(Self, &[u8]), Error> {
        if data.len() < 4 {
            return Err(Error::DataTruncated);
        }
        let int_data: [u8; 4] = data[..4].try_into().map_err(|_e| Error::DataTruncated)?;
        Ok((<u32>::from_le_bytes(int_data), &data[4..]))
    }
    fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.try_reserve(4).map_err(|_e| Error::AllocationFailed)?;
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl InnerSerialize for u8 {
    fn deserialize(data: &[u8]) -> Result<(Self, &[u8]), Error> {
        match data.split_first() {
            Some((b, rest)) => Ok((*b, rest)),
            None => Err(Error::DataTruncated),
        }
    }
    fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.try_reserve(1).map_err(|_e| Error::AllocationFailed)?;
        buf.push(*self);
        Ok(())
    }
}

/// Fixed-size arrays are embedded directly, with no length prefix.
impl<const N: usize> InnerSerialize for [u8; N] {
    fn deserialize(data: &[u8]) -> Result<(Self, &[u8]), Error> {
        if data.len() < N {
            return Err(Error::DataTruncated);
        }
        let arr: [u8; N] = data[..N].try_into().map_err(|_e| Error::DataTruncated)?;
        Ok((arr, &data[N..]))
    }
    fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.try_reserve(N).map_err(|_e| Error::AllocationFailed)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

/// Reference to a buffer mapped into the secure world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, TciSerialize)]
pub struct DataBlob {
    /// Secure-side virtual address; zero when nothing is mapped.
    pub data: u32,
    pub data_length: u32,
}

/// Hardware auth token fields, as flattened into operation commands.
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct AuthTokenFields {
    pub challenge: u64,
    pub user_id: u64,
    pub authenticator_id: u64,
    pub authenticator_type: u32,
    pub timestamp: u64,
    pub mac: [u8; AUTH_TOKEN_MAC_LENGTH],
}

impl Default for AuthTokenFields {
    fn default() -> Self {
        Self {
            challenge: 0,
            user_id: 0,
            authenticator_id: 0,
            authenticator_type: 0,
            timestamp: 0,
            mac: [0; AUTH_TOKEN_MAC_LENGTH],
        }
    }
}

impl AuthTokenFields {
    /// Flatten an optional auth token.  An absent token is sent as all zeroes, as is an empty
    /// MAC; any other MAC length is rejected.
    pub fn from_token(token: Option<&HardwareAuthToken>) -> Result<Self, ErrorCode> {
        let token = match token {
            None => return Ok(Self::default()),
            Some(t) => t,
        };
        let mut mac = [0u8; AUTH_TOKEN_MAC_LENGTH];
        if !token.mac.is_empty() {
            if token.mac.len() != AUTH_TOKEN_MAC_LENGTH {
                return Err(ErrorCode::InvalidArgument);
            }
            mac.copy_from_slice(&token.mac);
        }
        Ok(Self {
            challenge: token.challenge as u64,
            user_id: token.user_id as u64,
            authenticator_id: token.authenticator_id as u64,
            authenticator_type: token.authenticator_type as i32 as u32,
            timestamp: token.timestamp as u64,
            mac,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct BeginRequest {
    pub purpose: u32,
    pub params: DataBlob,
    pub key_blob: DataBlob,
    pub out_params: DataBlob,
    pub auth: AuthTokenFields,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct BeginResponse {
    pub handle: u64,
    /// Number of bytes of serialized out-params written.
    pub out_params_length: u32,
    /// Key type of the operation, as an `Algorithm` discriminant.
    pub algorithm: u32,
    /// Upper bound on the extra output `finish` may produce.
    pub final_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct UpdateRequest {
    pub handle: u64,
    pub input: DataBlob,
    pub output: DataBlob,
    pub auth: AuthTokenFields,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct Keymaster4UpdateRequest {
    pub handle: u64,
    pub params: DataBlob,
    pub input: DataBlob,
    pub output: DataBlob,
    pub auth: AuthTokenFields,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct UpdateResponse {
    pub input_consumed: u32,
    pub output_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct FinishRequest {
    pub handle: u64,
    pub signature: DataBlob,
    pub output: DataBlob,
    pub input: DataBlob,
    pub auth: AuthTokenFields,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct Keymaster4FinishRequest {
    pub handle: u64,
    pub params: DataBlob,
    pub signature: DataBlob,
    pub output: DataBlob,
    pub input: DataBlob,
    pub auth: AuthTokenFields,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct FinishResponse {
    pub output_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct AbortRequest {
    pub handle: u64,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct AbortResponse {}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct UpdateAadRequest {
    pub handle: u64,
    pub aad: DataBlob,
    pub auth: AuthTokenFields,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct UpdateAadResponse {}

/// Import of a key wrapped under a wrapping key held by the TA.
///
/// The `params` buffer holds, back to back: the serialized key parameters, the encrypted
/// transport key, the raw key description and the encrypted key; the `*_offset` fields locate the
/// last three.  The `wrap` buffer holds the serialized unwrapping parameters followed by the
/// wrapping key blob at `wkb_offset`.
#[derive(Clone, PartialEq, Eq, TciSerialize, ZeroizeOnDrop)]
pub struct ImportWrappedKeyRequest {
    pub key_format: u32,
    pub key_type: u32,
    #[zeroize(skip)]
    pub params: DataBlob,
    pub etk_offset: u32,
    pub kd_offset: u32,
    pub ek_offset: u32,
    pub initialization_vector: [u8; WRAPPED_KEY_IV_MAX_LEN],
    pub iv_len: u8,
    pub tag: [u8; WRAPPED_KEY_TAG_LEN],
    pub masking_key: [u8; MASKING_KEY_LEN],
    #[zeroize(skip)]
    pub wrap: DataBlob,
    pub wkb_offset: u32,
    pub password_sid: u64,
    pub biometric_sid: u64,
    #[zeroize(skip)]
    pub key_blob: DataBlob,
    #[zeroize(skip)]
    pub key_characteristics: DataBlob,
    #[zeroize(skip)]
    pub cert_chain: DataBlob,
}

impl core::fmt::Debug for ImportWrappedKeyRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Masking key and IV are not printed.
        f.debug_struct("ImportWrappedKeyRequest")
            .field("key_format", &self.key_format)
            .field("key_type", &self.key_type)
            .field("params", &self.params)
            .field("etk_offset", &self.etk_offset)
            .field("kd_offset", &self.kd_offset)
            .field("ek_offset", &self.ek_offset)
            .field("iv_len", &self.iv_len)
            .field("wrap", &self.wrap)
            .field("wkb_offset", &self.wkb_offset)
            .field("key_blob", &self.key_blob)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct ImportWrappedKeyResponse {
    pub key_blob_length: u32,
    pub key_characteristics_length: u32,
    pub cert_chain_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct AddRngEntropyRequest {
    pub rng_data: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct AddRngEntropyResponse {}

/// Creation of a new key, optionally attested by a caller-supplied attestation key.
///
/// `attest_key_params` and `attest_issuer_blob` live inside the buffers of `params` and
/// `attest_key_blob` respectively, directly after the main contents.  Likewise `cert_chain`
/// follows `characteristics` in a single mapping.
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct GenerateKeyRequest {
    pub params: DataBlob,
    pub attest_key_params: DataBlob,
    pub attest_key_blob: DataBlob,
    pub attest_issuer_blob: DataBlob,
    pub key_blob: DataBlob,
    pub characteristics: DataBlob,
    pub cert_chain: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct GenerateKeyResponse {
    pub key_blob_length: u32,
    pub characteristics_length: u32,
    pub cert_chain_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct GetKeyCharacteristicsRequest {
    pub key_blob: DataBlob,
    pub client_id: DataBlob,
    pub app_data: DataBlob,
    pub characteristics: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct GetKeyCharacteristicsResponse {
    pub characteristics_length: u32,
}

/// Import of plaintext key material, already converted into the TA key data layout.
///
/// The attestation key blob and issuer follow the space reserved for the new key blob in the
/// `key_blob` mapping.
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct ImportKeyRequest {
    pub params: DataBlob,
    pub attest_key_params: DataBlob,
    pub attest_key_blob: DataBlob,
    pub attest_issuer_blob: DataBlob,
    pub key_data: DataBlob,
    pub key_blob: DataBlob,
    pub characteristics: DataBlob,
    pub cert_chain: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct ImportKeyResponse {
    pub key_blob_length: u32,
    pub characteristics_length: u32,
    pub cert_chain_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct GetKeyInfoRequest {
    pub key_blob: DataBlob,
    pub client_id: DataBlob,
    pub app_data: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct GetKeyInfoResponse {
    /// Key type, as an `Algorithm` discriminant.
    pub key_type: u32,
    /// Key size in bits.
    pub key_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct ExportKeyRequest {
    pub key_blob: DataBlob,
    pub client_id: DataBlob,
    pub app_data: DataBlob,
    pub key_data: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct ExportKeyResponse {
    pub key_data_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct UpgradeKeyRequest {
    pub key_to_upgrade: DataBlob,
    pub upgrade_params: DataBlob,
    pub upgraded_key: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct UpgradeKeyResponse {
    /// Zero when the key did not need upgrading.
    pub upgraded_key_length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct DeleteKeyRequest {
    pub key_to_delete: DataBlob,
}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct DeleteKeyResponse {}

#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct DeleteAllKeysRequest {}
#[derive(Clone, Debug, PartialEq, Eq, TciSerialize)]
pub struct DeleteAllKeysResponse {}

/// Declare a command enum for one protocol version, with a variant per request type, along with
/// its serialization to and from the TCI buffer.
macro_rules! declare_command_enum {
    {
        $cenum:ident => $version:expr => {
            $( $cname:ident($rtype:ident), )*
        }
    } => {
        #[derive(Debug)]
        pub enum $cenum {
            $( $cname($rtype), )*
        }

        impl $cenum {
            /// Protocol version of the command set.
            pub const VERSION: ProtocolVersion = $version;

            /// Command code, without version bits.
            pub fn code(&self) -> TciCommandCode {
                match self {
                    $( Self::$cname(_) => TciCommandCode::$cname, )*
                }
            }

            /// Full command identifier, including version bits.
            pub fn command_id(&self) -> u32 {
                command_id(Self::VERSION, self.code())
            }

            /// Serialize the command, including its identifier, into a TCI buffer image.
            pub fn into_vec(&self) -> Result<Vec<u8>, Error> {
                let mut buf = Vec::new();
                self.command_id().serialize_into(&mut buf)?;
                match self {
                    $( Self::$cname(req) => req.serialize_into(&mut buf)?, )*
                }
                Ok(buf)
            }

            /// Parse a TCI buffer image holding a command of this protocol version.
            pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
                let (raw, data) = <u32>::deserialize(data)?;
                let (version, code) = parse_command_id(raw)?;
                if version != Self::VERSION {
                    return Err(Error::UnknownCommand(raw));
                }
                let (cmd, rest) = match code {
                    $(
                        TciCommandCode::$cname => {
                            let (req, rest) = <$rtype>::deserialize(data)?;
                            (Self::$cname(req), rest)
                        }
                    )*
                    #[allow(unreachable_patterns)]
                    _ => return Err(Error::UnknownCommand(raw)),
                };
                if !rest.is_empty() {
                    return Err(Error::ExcessData(rest.len()));
                }
                Ok(cmd)
            }
        }
    };
}

declare_command_enum! {
    Keymaster4Command => ProtocolVersion::Keymaster4 => {
        Begin(BeginRequest),
        Update(Keymaster4UpdateRequest),
        Finish(Keymaster4FinishRequest),
        Abort(AbortRequest),
        ImportWrappedKey(ImportWrappedKeyRequest),
        AddRngEntropy(AddRngEntropyRequest),
        GenerateKey(GenerateKeyRequest),
        GetKeyCharacteristics(GetKeyCharacteristicsRequest),
        ImportKey(ImportKeyRequest),
        GetKeyInfo(GetKeyInfoRequest),
        ExportKey(ExportKeyRequest),
        UpgradeKey(UpgradeKeyRequest),
        DeleteKey(DeleteKeyRequest),
        DeleteAllKeys(DeleteAllKeysRequest),
    }
}

declare_command_enum! {
    KeyMintCommand => ProtocolVersion::KeyMint => {
        Begin(BeginRequest),
        Update(UpdateRequest),
        UpdateAad(UpdateAadRequest),
        Finish(FinishRequest),
        Abort(AbortRequest),
        ImportWrappedKey(ImportWrappedKeyRequest),
        AddRngEntropy(AddRngEntropyRequest),
        GenerateKey(GenerateKeyRequest),
        GetKeyCharacteristics(GetKeyCharacteristicsRequest),
        ImportKey(ImportKeyRequest),
        GetKeyInfo(GetKeyInfoRequest),
        ExportKey(ExportKeyRequest),
        UpgradeKey(UpgradeKeyRequest),
        DeleteKey(DeleteKeyRequest),
        DeleteAllKeys(DeleteAllKeysRequest),
    }
}

/// A command in either protocol version.
#[derive(Debug)]
pub enum TciCommand {
    V1(Keymaster4Command),
    V2(KeyMintCommand),
}

impl TciCommand {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            TciCommand::V1(_) => Keymaster4Command::VERSION,
            TciCommand::V2(_) => KeyMintCommand::VERSION,
        }
    }

    pub fn code(&self) -> TciCommandCode {
        match self {
            TciCommand::V1(c) => c.code(),
            TciCommand::V2(c) => c.code(),
        }
    }

    pub fn command_id(&self) -> u32 {
        command_id(self.version(), self.code())
    }

    pub fn into_vec(&self) -> Result<Vec<u8>, Error> {
        match self {
            TciCommand::V1(c) => c.into_vec(),
            TciCommand::V2(c) => c.into_vec(),
        }
    }

    /// Parse a command of whichever protocol version its identifier announces.
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        let (raw, _) = <u32>::deserialize(data)?;
        match parse_command_id(raw)?.0 {
            ProtocolVersion::Keymaster4 => Ok(TciCommand::V1(Keymaster4Command::from_slice(data)?)),
            ProtocolVersion::KeyMint => Ok(TciCommand::V2(KeyMintCommand::from_slice(data)?)),
        }
    }
}

/// Out-fields of a successful command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TciResponse {
    Begin(BeginResponse),
    Update(UpdateResponse),
    UpdateAad(UpdateAadResponse),
    Finish(FinishResponse),
    Abort(AbortResponse),
    ImportWrappedKey(ImportWrappedKeyResponse),
    AddRngEntropy(AddRngEntropyResponse),
    GenerateKey(GenerateKeyResponse),
    GetKeyCharacteristics(GetKeyCharacteristicsResponse),
    ImportKey(ImportKeyResponse),
    GetKeyInfo(GetKeyInfoResponse),
    ExportKey(ExportKeyResponse),
    UpgradeKey(UpgradeKeyResponse),
    DeleteKey(DeleteKeyResponse),
    DeleteAllKeys(DeleteAllKeysResponse),
}

impl TciResponse {
    pub fn code(&self) -> TciCommandCode {
        match self {
            TciResponse::Begin(_) => TciCommandCode::Begin,
            TciResponse::Update(_) => TciCommandCode::Update,
            TciResponse::UpdateAad(_) => TciCommandCode::UpdateAad,
            TciResponse::Finish(_) => TciCommandCode::Finish,
            TciResponse::Abort(_) => TciCommandCode::Abort,
            TciResponse::ImportWrappedKey(_) => TciCommandCode::ImportWrappedKey,
            TciResponse::AddRngEntropy(_) => TciCommandCode::AddRngEntropy,
            TciResponse::GenerateKey(_) => TciCommandCode::GenerateKey,
            TciResponse::GetKeyCharacteristics(_) => TciCommandCode::GetKeyCharacteristics,
            TciResponse::ImportKey(_) => TciCommandCode::ImportKey,
            TciResponse::GetKeyInfo(_) => TciCommandCode::GetKeyInfo,
            TciResponse::ExportKey(_) => TciCommandCode::ExportKey,
            TciResponse::UpgradeKey(_) => TciCommandCode::UpgradeKey,
            TciResponse::DeleteKey(_) => TciCommandCode::DeleteKey,
            TciResponse::DeleteAllKeys(_) => TciCommandCode::DeleteAllKeys,
        }
    }
}

/// Serialize a successful response to the command with identifier `cmd_id`.
pub fn serialize_response(cmd_id: u32, rsp: &TciResponse) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    (cmd_id | RSP_ID_MASK).serialize_into(&mut buf)?;
    (ErrorCode::Ok as i32 as u32).serialize_into(&mut buf)?;
    match rsp {
        TciResponse::Begin(r) => r.serialize_into(&mut buf)?,
        TciResponse::Update(r) => r.serialize_into(&mut buf)?,
        TciResponse::UpdateAad(r) => r.serialize_into(&mut buf)?,
        TciResponse::Finish(r) => r.serialize_into(&mut buf)?,
        TciResponse::Abort(r) => r.serialize_into(&mut buf)?,
        TciResponse::ImportWrappedKey(r) => r.serialize_into(&mut buf)?,
        TciResponse::AddRngEntropy(r) => r.serialize_into(&mut buf)?,
        TciResponse::GenerateKey(r) => r.serialize_into(&mut buf)?,
        TciResponse::GetKeyCharacteristics(r) => r.serialize_into(&mut buf)?,
        TciResponse::ImportKey(r) => r.serialize_into(&mut buf)?,
        TciResponse::GetKeyInfo(r) => r.serialize_into(&mut buf)?,
        TciResponse::ExportKey(r) => r.serialize_into(&mut buf)?,
        TciResponse::UpgradeKey(r) => r.serialize_into(&mut buf)?,
        TciResponse::DeleteKey(r) => r.serialize_into(&mut buf)?,
        TciResponse::DeleteAllKeys(r) => r.serialize_into(&mut buf)?,
    }
    Ok(buf)
}

/// Serialize an error response to the command with identifier `cmd_id`.
pub fn serialize_error_response(cmd_id: u32, rc: ErrorCode) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve(RSP_HEADER_SIZE).map_err(|_e| Error::AllocationFailed)?;
    (cmd_id | RSP_ID_MASK).serialize_into(&mut buf)?;
    (rc as i32 as u32).serialize_into(&mut buf)?;
    Ok(buf)
}

/// Parse a response to the command with identifier `cmd_id`.  The outer `Result` reports a
/// malformed response; the inner one carries the TA's return code.
pub fn deserialize_response(
    cmd_id: u32,
    data: &[u8],
) -> Result<Result<TciResponse, ErrorCode>, Error> {
    let (raw, data) = <u32>::deserialize(data)?;
    if raw != (cmd_id | RSP_ID_MASK) {
        return Err(Error::UnexpectedResponse);
    }
    let (rc, data) = <u32>::deserialize(data)?;
    if rc != 0 {
        return Ok(Err(ErrorCode::from_raw(rc)));
    }
    let (_version, code) = parse_command_id(cmd_id)?;
    let (rsp, rest) = match code {
        TciCommandCode::Begin => {
            let (r, rest) = BeginResponse::deserialize(data)?;
            (TciResponse::Begin(r), rest)
        }
        TciCommandCode::Update => {
            let (r, rest) = UpdateResponse::deserialize(data)?;
            (TciResponse::Update(r), rest)
        }
        TciCommandCode::UpdateAad => {
            let (r, rest) = UpdateAadResponse::deserialize(data)?;
            (TciResponse::UpdateAad(r), rest)
        }
        TciCommandCode::Finish => {
            let (r, rest) = FinishResponse::deserialize(data)?;
            (TciResponse::Finish(r), rest)
        }
        TciCommandCode::Abort => {
            let (r, rest) = AbortResponse::deserialize(data)?;
            (TciResponse::Abort(r), rest)
        }
        TciCommandCode::ImportWrappedKey => {
            let (r, rest) = ImportWrappedKeyResponse::deserialize(data)?;
            (TciResponse::ImportWrappedKey(r), rest)
        }
        TciCommandCode::AddRngEntropy => {
            let (r, rest) = AddRngEntropyResponse::deserialize(data)?;
            (TciResponse::AddRngEntropy(r), rest)
        }
        TciCommandCode::GenerateKey => {
            let (r, rest) = GenerateKeyResponse::deserialize(data)?;
            (TciResponse::GenerateKey(r), rest)
        }
        TciCommandCode::GetKeyCharacteristics => {
            let (r, rest) = GetKeyCharacteristicsResponse::deserialize(data)?;
            (TciResponse::GetKeyCharacteristics(r), rest)
        }
        TciCommandCode::ImportKey => {
            let (r, rest) = ImportKeyResponse::deserialize(data)?;
            (TciResponse::ImportKey(r), rest)
        }
        TciCommandCode::GetKeyInfo => {
            let (r, rest) = GetKeyInfoResponse::deserialize(data)?;
            (TciResponse::GetKeyInfo(r), rest)
        }
        TciCommandCode::ExportKey => {
            let (r, rest) = ExportKeyResponse::deserialize(data)?;
            (TciResponse::ExportKey(r), rest)
        }
        TciCommandCode::UpgradeKey => {
            let (r, rest) = UpgradeKeyResponse::deserialize(data)?;
            (TciResponse::UpgradeKey(r), rest)
        }
        TciCommandCode::DeleteKey => {
            let (r, rest) = DeleteKeyResponse::deserialize(data)?;
            (TciResponse::DeleteKey(r), rest)
        }
        TciCommandCode::DeleteAllKeys => {
            let (r, rest) = DeleteAllKeysResponse::deserialize(data)?;
            (TciResponse::DeleteAllKeys(r), rest)
        }
    };
    if !rest.is_empty() {
        return Err(Error::ExcessData(rest.len()));
    }
    Ok(Ok(rsp))
}
