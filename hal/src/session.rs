//! Client session with the TA: operations and wrapped key import.

use crate::chunk::{Chunk, ChunkResult, ChunkSink, Splitter, Stream};
use crate::operation::{Operation, OperationTable, SlotRef};
use crate::{EngineConfig, Mapping, SecureTransport, SessionHandle};
use log::{debug, error, info, warn};
use tkm_common::{
    km_err, km_verr,
    params::{self, find_bytes},
    size::{block_output_overhead, key_blob_max_size, CERT_CHAIN_MAX_SIZE, RSA_MAX_KEY_SIZE},
    try_to_vec, vec_try, vec_try_with_capacity,
    wrapper::{parse_authorization_list, parse_secure_key_wrapper},
    Error, FallibleAllocExt,
};
use tkm_wire::{
    keymint::{
        Algorithm, ErrorCode, HardwareAuthToken, HardwareAuthenticatorType, KeyParameter,
        KeyPurpose, Tag,
    },
    tci::{
        deserialize_response, AbortRequest, AuthTokenFields, BeginRequest, BeginResponse,
        DataBlob, FinishRequest, ImportWrappedKeyRequest, KeyMintCommand, Keymaster4Command,
        Keymaster4FinishRequest, Keymaster4UpdateRequest, ProtocolVersion, TciCommand,
        TciResponse, UpdateAadRequest, UpdateRequest, MASKING_KEY_LEN, WRAPPED_KEY_IV_MAX_LEN,
        WRAPPED_KEY_TAG_LEN,
    },
    OpHandle,
};
use zeroize::Zeroizing;

/// Result of starting an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeginResult {
    pub handle: OpHandle,
    pub algorithm: Algorithm,
    /// Parameters generated by the TA, such as a nonce.
    pub out_params: Vec<KeyParameter>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateResult {
    pub input_consumed: usize,
    pub output: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishResult {
    pub output: Vec<u8>,
}

/// A key created by generation or import, with its characteristics and any certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCreationResult {
    pub key_blob: Vec<u8>,
    pub hw_enforced: Vec<KeyParameter>,
    pub sw_enforced: Vec<KeyParameter>,
    pub cert_chain: Vec<Vec<u8>>,
}

fn auth_fields(auth_token: Option<&HardwareAuthToken>) -> Result<AuthTokenFields, Error> {
    AuthTokenFields::from_token(auth_token).map_err(|rc| km_verr!(rc, "malformed auth token"))
}

pub(crate) fn len_u32(len: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_e| km_err!(InvalidInputLength, "{} of {} bytes", what, len))
}

pub(crate) fn unexpected(rsp: &TciResponse) -> Error {
    km_err!(SecureHwCommunicationFailed, "unexpected {:?} response", rsp.code())
}

/// An open session with the TA, tracking the operations started through it.
pub struct TeeSession<T: SecureTransport> {
    transport: T,
    session: SessionHandle,
    config: EngineConfig,
    operations: OperationTable,
}

impl<T: SecureTransport> TeeSession<T> {
    /// Open a session over `transport`.
    pub fn new(transport: T, config: EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        let session = transport.open_session()?;
        info!("opened TA session {:?} using {:?} commands", session, config.protocol);
        let operations = OperationTable::new(config.max_operations);
        Ok(Self { transport, session, config, operations })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    pub(crate) fn map(&self, buf: &[u8]) -> Result<Mapping<'_, T>, Error> {
        Mapping::new(&self.transport, self.session, buf)
    }

    pub(crate) fn command(&self, v1: Keymaster4Command, v2: KeyMintCommand) -> TciCommand {
        match self.config.protocol {
            ProtocolVersion::Keymaster4 => TciCommand::V1(v1),
            ProtocolVersion::KeyMint => TciCommand::V2(v2),
        }
    }

    /// Send a command and return the TA's out-fields, turning a non-zero return code into an
    /// error.
    pub(crate) fn execute(&self, cmd: &TciCommand) -> Result<TciResponse, Error> {
        let data = cmd.into_vec()?;
        let rsp = self.transport.exchange(self.session, &data)?;
        match deserialize_response(cmd.command_id(), &rsp)? {
            Ok(rsp) => Ok(rsp),
            Err(rc) => {
                debug!("{:?} command failed with {:?}", cmd.code(), rc);
                Err(km_verr!(rc, "TA failed {:?} command", cmd.code()))
            }
        }
    }

    fn slot(&self, handle: OpHandle) -> Result<SlotRef, Error> {
        self.operations
            .lookup(handle)
            .ok_or_else(|| km_err!(InvalidOperationHandle, "no operation {:#x}", handle.0))
    }

    /// Parameters to put in update/finish commands, which only the v1 commands carry.
    fn stream_params<'p>(
        &self,
        params: &'p [KeyParameter],
    ) -> Result<Option<&'p [KeyParameter]>, Error> {
        match self.config.protocol {
            ProtocolVersion::Keymaster4 => Ok(Some(params)),
            ProtocolVersion::KeyMint => {
                if find_bytes(params, Tag::AssociatedData).is_some() {
                    return Err(km_err!(
                        InvalidArgument,
                        "associated data must be supplied with update_aad"
                    ));
                }
                Ok(None)
            }
        }
    }

    /// Start an operation with the key in `key_blob`.
    pub fn begin(
        &self,
        purpose: KeyPurpose,
        key_blob: &[u8],
        params: &[KeyParameter],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<BeginResult, Error> {
        let auth = auth_fields(auth_token)?;
        let params_data = params::serialize(params, None, None)?;
        let mut out_params = vec_try![0u8; self.config.begin_out_params_size]?;

        let (rsp, read) = {
            let params_map = self.map(&params_data)?;
            let key_map = self.map(key_blob)?;
            let out_map = self.map(&out_params)?;
            let req = BeginRequest {
                purpose: purpose as i32 as u32,
                params: params_map.blob(),
                key_blob: key_map.blob(),
                out_params: out_map.blob(),
                auth,
            };
            let cmd = self.command(
                Keymaster4Command::Begin(req.clone()),
                KeyMintCommand::Begin(req),
            );
            let rsp = match self.execute(&cmd)? {
                TciResponse::Begin(rsp) => rsp,
                other => return Err(unexpected(&other)),
            };
            let out_len = rsp.out_params_length as usize;
            let read = if out_len <= out_params.len() {
                out_map.read_into(&mut out_params[..out_len]).map(|()| out_len)
            } else {
                Err(km_err!(
                    SecureHwCommunicationFailed,
                    "TA wrote {} bytes of out params into {}",
                    out_len,
                    out_params.len()
                ))
            };
            (rsp, read)
        };

        let handle = OpHandle(rsp.handle);
        let outcome = read.and_then(|out_len| begin_outcome(&rsp, &out_params[..out_len]));
        let (algorithm, out_params) = match outcome {
            Ok(v) => v,
            Err(e) => {
                self.abort_on_ta(handle);
                return Err(e);
            }
        };

        let op = Operation { handle, algorithm, final_length: rsp.final_length as usize };
        match self.operations.allocate(op) {
            Ok(_slot) => Ok(BeginResult { handle, algorithm, out_params }),
            Err(e) => {
                // A duplicate handle belongs to an operation that is still live, which must
                // not be aborted.
                if e.code() == ErrorCode::TooManyOperations {
                    self.abort_on_ta(handle);
                }
                Err(e)
            }
        }
    }

    /// Push `input` (and, for v1 commands, any associated data in `params`) into an operation.
    /// The TA may accept less than all of the input.
    pub fn update(
        &self,
        handle: OpHandle,
        params: &[KeyParameter],
        input: &[u8],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<UpdateResult, Error> {
        let slot = self.slot(handle)?;
        let result = self.update_slot(&slot, params, input, auth_token);
        if result.is_err() {
            self.operations.release(&slot);
        }
        result
    }

    fn update_slot(
        &self,
        slot: &SlotRef,
        params: &[KeyParameter],
        input: &[u8],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<UpdateResult, Error> {
        let auth = auth_fields(auth_token)?;
        let stream_params = self.stream_params(params)?;
        let op = slot.operation();
        let output_capacity = match block_output_overhead(op.algorithm) {
            Some(extra) => input.len() + extra,
            None => 0,
        };
        let mut sink = OperationSink { session: self, handle: op.handle, auth, signature: None };
        let out = Splitter::new(&self.transport, self.session, self.config.chunk_size).run(
            &Stream { params: stream_params, input, output_capacity, at_least_one: false },
            &mut sink,
        )?;
        Ok(UpdateResult { input_consumed: out.input_consumed, output: out.output })
    }

    /// Supply associated data to an operation.  Only available with the KeyMint command set.
    pub fn update_aad(
        &self,
        handle: OpHandle,
        aad: &[u8],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<(), Error> {
        if self.config.protocol != ProtocolVersion::KeyMint {
            return Err(km_err!(Unimplemented, "UPDATE_AAD is not in the Keymaster4 command set"));
        }
        let slot = self.slot(handle)?;
        let result = self.update_aad_slot(&slot, aad, auth_token);
        if result.is_err() {
            self.operations.release(&slot);
        }
        result
    }

    fn update_aad_slot(
        &self,
        slot: &SlotRef,
        aad: &[u8],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<(), Error> {
        let auth = auth_fields(auth_token)?;
        let aad = Zeroizing::new(try_to_vec(aad)?);
        let aad_map = self.map(&aad)?;
        let req = UpdateAadRequest { handle: slot.handle().0, aad: aad_map.blob(), auth };
        match self.execute(&TciCommand::V2(KeyMintCommand::UpdateAad(req)))? {
            TciResponse::UpdateAad(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Complete an operation, which is closed whatever the outcome.
    pub fn finish(
        &self,
        handle: OpHandle,
        params: &[KeyParameter],
        input: &[u8],
        signature: &[u8],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<FinishResult, Error> {
        let slot = self.slot(handle)?;
        let result = self.finish_slot(&slot, params, input, signature, auth_token);
        self.operations.release(&slot);
        result
    }

    fn finish_slot(
        &self,
        slot: &SlotRef,
        params: &[KeyParameter],
        input: &[u8],
        signature: &[u8],
        auth_token: Option<&HardwareAuthToken>,
    ) -> Result<FinishResult, Error> {
        let auth = auth_fields(auth_token)?;
        let stream_params = self.stream_params(params)?;
        let op = slot.operation();
        let mut output_capacity = op.final_length;
        if block_output_overhead(op.algorithm).is_some() {
            output_capacity += input.len();
        }
        let signature_map = self.map(signature)?;
        let mut sink = OperationSink {
            session: self,
            handle: op.handle,
            auth,
            signature: Some(signature_map.blob()),
        };
        let out = Splitter::new(&self.transport, self.session, self.config.chunk_size).run(
            &Stream { params: stream_params, input, output_capacity, at_least_one: true },
            &mut sink,
        )?;
        if out.input_consumed != input.len() {
            // FINISH was never sent, so the TA still holds the operation.
            self.abort_on_ta(op.handle);
            return Err(km_err!(
                UnknownError,
                "TA consumed {} of {} input bytes in finish",
                out.input_consumed,
                input.len()
            ));
        }
        Ok(FinishResult { output: out.output })
    }

    /// Cancel an operation, which is closed whatever the outcome.
    pub fn abort(&self, handle: OpHandle) -> Result<(), Error> {
        let slot = self.slot(handle)?;
        let result = self.send_abort(handle);
        self.operations.release(&slot);
        result
    }

    fn send_abort(&self, handle: OpHandle) -> Result<(), Error> {
        let req = AbortRequest { handle: handle.0 };
        let cmd = self.command(
            Keymaster4Command::Abort(req.clone()),
            KeyMintCommand::Abort(req),
        );
        match self.execute(&cmd)? {
            TciResponse::Abort(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Abort an operation the TA has started but which is not in the table.
    fn abort_on_ta(&self, handle: OpHandle) {
        if let Err(e) = self.send_abort(handle) {
            error!("failed to abort untracked operation {:#x}: {:?}", handle.0, e);
        }
    }

    fn send_update(
        &self,
        handle: OpHandle,
        chunk: &Chunk,
        auth: &AuthTokenFields,
    ) -> Result<ChunkResult, Error> {
        let cmd = self.command(
            Keymaster4Command::Update(Keymaster4UpdateRequest {
                handle: handle.0,
                params: chunk.params,
                input: chunk.input,
                output: chunk.output,
                auth: auth.clone(),
            }),
            KeyMintCommand::Update(UpdateRequest {
                handle: handle.0,
                input: chunk.input,
                output: chunk.output,
                auth: auth.clone(),
            }),
        );
        match self.execute(&cmd)? {
            TciResponse::Update(rsp) => Ok(ChunkResult {
                input_consumed: rsp.input_consumed as usize,
                output_len: rsp.output_length as usize,
            }),
            other => Err(unexpected(&other)),
        }
    }

    fn send_finish(
        &self,
        handle: OpHandle,
        chunk: &Chunk,
        signature: DataBlob,
        auth: &AuthTokenFields,
    ) -> Result<ChunkResult, Error> {
        let cmd = self.command(
            Keymaster4Command::Finish(Keymaster4FinishRequest {
                handle: handle.0,
                params: chunk.params,
                signature,
                output: chunk.output,
                input: chunk.input,
                auth: auth.clone(),
            }),
            KeyMintCommand::Finish(FinishRequest {
                handle: handle.0,
                signature,
                output: chunk.output,
                input: chunk.input,
                auth: auth.clone(),
            }),
        );
        match self.execute(&cmd)? {
            // FINISH always takes all of its input.
            TciResponse::Finish(rsp) => Ok(ChunkResult {
                input_consumed: chunk.input.data_length as usize,
                output_len: rsp.output_length as usize,
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// Import a key wrapped for the key in `wrapping_key_blob`.
    ///
    /// `password_sid` and `biometric_sid` are only passed on if the wrapped key's
    /// USER_SECURE_ID has the corresponding authenticator type bit set.
    pub fn import_wrapped_key(
        &self,
        wrapped_key_data: &[u8],
        wrapping_key_blob: &[u8],
        masking_key: &[u8],
        unwrapping_params: &[KeyParameter],
        password_sid: u64,
        biometric_sid: u64,
    ) -> Result<KeyCreationResult, Error> {
        let wrapper = parse_secure_key_wrapper(wrapped_key_data)?;
        let auths =
            parse_authorization_list(wrapper.authorization_list, self.config.repeated_tag_policy)?;
        if auths.key_type == 0 {
            return Err(km_err!(InvalidArgument, "wrapped key has no algorithm"));
        }
        let masking_key: [u8; MASKING_KEY_LEN] = masking_key
            .try_into()
            .map_err(|_e| km_err!(InvalidArgument, "masking key of {} bytes", masking_key.len()))?;
        let unwrap_params = params::serialize(unwrapping_params, None, None)?;

        // params = key params | encrypted transport key | key description | encrypted key
        let etk_offset = auths.key_params.len();
        let kd_offset = etk_offset + wrapper.encrypted_transport_key.len();
        let ek_offset = kd_offset + wrapper.key_description.len();
        let mut params_data = vec_try_with_capacity!(ek_offset + wrapper.encrypted_key.len())?;
        params_data.try_extend_from_slice(&auths.key_params)?;
        params_data.try_extend_from_slice(wrapper.encrypted_transport_key)?;
        params_data.try_extend_from_slice(wrapper.key_description)?;
        params_data.try_extend_from_slice(wrapper.encrypted_key)?;

        // wrap = unwrapping params | wrapping key blob
        let wkb_offset = unwrap_params.len();
        let mut wrap_data = vec_try_with_capacity!(wkb_offset + wrapping_key_blob.len())?;
        wrap_data.try_extend_from_slice(&unwrap_params)?;
        wrap_data.try_extend_from_slice(wrapping_key_blob)?;

        // The key type and size are encrypted, so assume the largest.
        let key_blob_size = key_blob_max_size(Algorithm::Rsa, RSA_MAX_KEY_SIZE, wkb_offset);
        let chars_size = key_blob_size;
        let mut key_blob = vec_try![0u8; key_blob_size]?;
        let mut certs_and_chars = vec_try![0u8; chars_size + CERT_CHAIN_MAX_SIZE]?;

        let iv_len = wrapper.initialization_vector.len();
        let mut initialization_vector = [0u8; WRAPPED_KEY_IV_MAX_LEN];
        initialization_vector
            .get_mut(..iv_len)
            .ok_or_else(|| km_err!(InvalidArgument, "IV of {} bytes", iv_len))?
            .copy_from_slice(wrapper.initialization_vector);
        let tag: [u8; WRAPPED_KEY_TAG_LEN] = wrapper
            .tag
            .try_into()
            .map_err(|_e| km_err!(InvalidArgument, "tag of {} bytes", wrapper.tag.len()))?;

        let sid = auths.secure_user_id;
        let password_bit = HardwareAuthenticatorType::Password as i32 as u64;
        let fingerprint_bit = HardwareAuthenticatorType::Fingerprint as i32 as u64;

        let params_map = self.map(&params_data)?;
        let wrap_map = self.map(&wrap_data)?;
        let key_map = self.map(&key_blob)?;
        let certs_map = self.map(&certs_and_chars)?;
        let certs_blob = certs_map.blob();
        let cert_chain_addr = certs_blob
            .data
            .checked_add(len_u32(chars_size, "characteristics buffer")?)
            .ok_or_else(|| km_err!(InvalidInputLength, "certificate buffer address overflow"))?;
        let req = ImportWrappedKeyRequest {
            key_format: wrapper.key_format,
            key_type: auths.key_type,
            params: params_map.blob(),
            etk_offset: len_u32(etk_offset, "key params")?,
            kd_offset: len_u32(kd_offset, "transport key offset")?,
            ek_offset: len_u32(ek_offset, "encrypted key offset")?,
            initialization_vector,
            iv_len: iv_len as u8,
            tag,
            masking_key,
            wrap: wrap_map.blob(),
            wkb_offset: len_u32(wkb_offset, "unwrapping params")?,
            password_sid: if sid & password_bit != 0 { password_sid } else { 0 },
            biometric_sid: if sid & fingerprint_bit != 0 { biometric_sid } else { 0 },
            key_blob: key_map.blob(),
            key_characteristics: DataBlob {
                data: certs_blob.data,
                data_length: len_u32(chars_size, "characteristics buffer")?,
            },
            cert_chain: DataBlob {
                data: cert_chain_addr,
                data_length: CERT_CHAIN_MAX_SIZE as u32,
            },
        };
        debug!("importing wrapped {}-byte key: {:?}", wrapper.encrypted_key.len(), req);
        let cmd = self.command(
            Keymaster4Command::ImportWrappedKey(req.clone()),
            KeyMintCommand::ImportWrappedKey(req),
        );
        let rsp = match self.execute(&cmd)? {
            TciResponse::ImportWrappedKey(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };

        let blob_len = rsp.key_blob_length as usize;
        if blob_len > key_blob.len()
            || rsp.key_characteristics_length as usize > chars_size
            || rsp.cert_chain_length as usize > CERT_CHAIN_MAX_SIZE
        {
            return Err(km_err!(
                SecureHwCommunicationFailed,
                "TA reported lengths {:?} beyond the buffers supplied",
                rsp
            ));
        }
        key_map.read_into(&mut key_blob[..blob_len])?;
        key_blob.truncate(blob_len);
        certs_map.read_into(&mut certs_and_chars)?;

        let (hw_enforced, sw_enforced) =
            params::deserialize_characteristics(&certs_and_chars[..chars_size])?;
        let cert_chain = params::deserialize_cert_chain(&certs_and_chars[chars_size..])?;
        info!(
            "imported wrapped key: {}-byte blob, {} certificates",
            key_blob.len(),
            cert_chain.len()
        );
        Ok(KeyCreationResult { key_blob, hw_enforced, sw_enforced, cert_chain })
    }
}

impl<T: SecureTransport> Drop for TeeSession<T> {
    fn drop(&mut self) {
        let live = self.operations.live();
        if live > 0 {
            warn!("closing TA session with {} operations still open", live);
        }
        if let Err(e) = self.transport.close_session(self.session) {
            error!("failed to close TA session {:?}: {:?}", self.session, e);
        }
    }
}

/// Check the TA's response to BEGIN and decode the parameters it returned.
fn begin_outcome(
    rsp: &BeginResponse,
    out_params: &[u8],
) -> Result<(Algorithm, Vec<KeyParameter>), Error> {
    let algorithm = Algorithm::n(rsp.algorithm as i32).ok_or_else(|| {
        km_err!(SecureHwCommunicationFailed, "TA returned unknown algorithm {}", rsp.algorithm)
    })?;
    let out_params =
        if out_params.is_empty() { Vec::new() } else { params::deserialize(out_params)? };
    Ok((algorithm, out_params))
}

/// Submits the chunks of an update or finish call for one operation.
struct OperationSink<'a, T: SecureTransport> {
    session: &'a TeeSession<T>,
    handle: OpHandle,
    auth: AuthTokenFields,
    /// Signature to verify, present only when finishing.
    signature: Option<DataBlob>,
}

impl<'a, T: SecureTransport> ChunkSink for OperationSink<'a, T> {
    fn intermediate(&mut self, chunk: &Chunk) -> Result<ChunkResult, Error> {
        self.session.send_update(self.handle, chunk, &self.auth)
    }

    fn last(&mut self, chunk: &Chunk) -> Result<ChunkResult, Error> {
        match self.signature {
            Some(signature) => self.session.send_finish(self.handle, chunk, signature, &self.auth),
            None => self.session.send_update(self.handle, chunk, &self.auth),
        }
    }
}
