//! Scripted stand-in for the TA, for exercising the client engine end to end.

// Explicitly include alloc because macros from `tkm_common` assume it.
extern crate alloc;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tkm_common::{km_err, params, Error};
use tkm_hal::{MappedRef, SecureTransport, SessionHandle};
use tkm_wire::keymint::{Algorithm, ErrorCode, KeyParameter, Tag};
use tkm_wire::tci::{
    serialize_error_response, serialize_response, AbortResponse, BeginResponse, DataBlob,
    FinishResponse, KeyMintCommand, Keymaster4Command, TciCommand, TciCommandCode, TciResponse,
    UpdateAadResponse, UpdateResponse,
};

/// Buffers currently mapped into the fake secure world.
#[derive(Debug, Default)]
pub struct TaMemory {
    next_addr: u32,
    regions: BTreeMap<u32, Vec<u8>>,
}

impl TaMemory {
    fn region(&self, blob: DataBlob) -> Result<(u32, usize), ErrorCode> {
        let (start, data) = self
            .regions
            .range(..=blob.data)
            .next_back()
            .ok_or(ErrorCode::SecureHwCommunicationFailed)?;
        let offset = (blob.data - start) as usize;
        if offset + blob.data_length as usize > data.len() {
            return Err(ErrorCode::SecureHwCommunicationFailed);
        }
        Ok((*start, offset))
    }

    /// Contents of the buffer referenced by `blob`.
    pub fn read(&self, blob: DataBlob) -> Result<Vec<u8>, ErrorCode> {
        if blob.data_length == 0 {
            return Ok(Vec::new());
        }
        let (start, offset) = self.region(blob)?;
        Ok(self.regions[&start][offset..offset + blob.data_length as usize].to_vec())
    }

    /// Write `data` to the start of the buffer referenced by `blob`.
    pub fn write(&mut self, blob: DataBlob, data: &[u8]) -> Result<(), ErrorCode> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > blob.data_length as usize {
            return Err(ErrorCode::InsufficientBufferSpace);
        }
        let (start, offset) = self.region(blob)?;
        let region = self.regions.get_mut(&start).ok_or(ErrorCode::SecureHwCommunicationFailed)?;
        region[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Behaviour of a fake TA: turns each command into a response or an error code.
pub trait Script: Send {
    fn process(&mut self, mem: &mut TaMemory, cmd: &TciCommand) -> Result<TciResponse, ErrorCode>;
}

impl<F> Script for F
where
    F: FnMut(&mut TaMemory, &TciCommand) -> Result<TciResponse, ErrorCode> + Send,
{
    fn process(&mut self, mem: &mut TaMemory, cmd: &TciCommand) -> Result<TciResponse, ErrorCode> {
        self(mem, cmd)
    }
}

struct State {
    memory: TaMemory,
    script: Box<dyn Script>,
    commands: Vec<TciCommand>,
    sessions: BTreeSet<u32>,
    next_session: u32,
}

/// A [`SecureTransport`] backed by an in-process [`Script`].
pub struct FakeTa {
    state: Mutex<State>,
}

impl FakeTa {
    pub fn new<S: Script + 'static>(script: S) -> Self {
        Self {
            state: Mutex::new(State {
                memory: TaMemory { next_addr: 0x8000_0000, regions: BTreeMap::new() },
                script: Box::new(script),
                commands: Vec::new(),
                sessions: BTreeSet::new(),
                next_session: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Codes of the commands received so far, in order.
    pub fn command_codes(&self) -> Vec<TciCommandCode> {
        self.state().commands.iter().map(|c| c.code()).collect()
    }

    /// Raw identifiers of the commands received so far, in order.
    pub fn command_ids(&self) -> Vec<u32> {
        self.state().commands.iter().map(|c| c.command_id()).collect()
    }

    /// Apply `f` to the commands received so far.
    pub fn with_commands<R>(&self, f: impl FnOnce(&[TciCommand]) -> R) -> R {
        f(&self.state().commands)
    }

    /// Number of buffers still mapped.
    pub fn mapped(&self) -> usize {
        self.state().memory.regions.len()
    }

    /// Number of sessions still open.
    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    fn check_session(state: &State, session: SessionHandle) -> Result<(), Error> {
        if state.sessions.contains(&session.0) {
            Ok(())
        } else {
            Err(km_err!(SecureHwCommunicationFailed, "session {:?} not open", session))
        }
    }
}

impl SecureTransport for FakeTa {
    fn open_session(&self) -> Result<SessionHandle, Error> {
        let mut state = self.state();
        let session = state.next_session;
        state.next_session += 1;
        state.sessions.insert(session);
        Ok(SessionHandle(session))
    }

    fn close_session(&self, session: SessionHandle) -> Result<(), Error> {
        if self.state().sessions.remove(&session.0) {
            Ok(())
        } else {
            Err(km_err!(SecureHwCommunicationFailed, "session {:?} not open", session))
        }
    }

    fn map(&self, session: SessionHandle, buf: &[u8]) -> Result<MappedRef, Error> {
        let mut state = self.state();
        Self::check_session(&state, session)?;
        let len = u32::try_from(buf.len())
            .map_err(|_e| km_err!(InvalidInputLength, "cannot map {} bytes", buf.len()))?;
        let secure_addr = state.memory.next_addr;
        // Leave a gap between buffers so that overruns hit unmapped space.
        state.memory.next_addr = secure_addr
            .checked_add(len)
            .and_then(|end| end.checked_add(0x1000))
            .ok_or_else(|| km_err!(MemoryAllocationFailed, "secure address space exhausted"))?;
        state.memory.regions.insert(secure_addr, buf.to_vec());
        Ok(MappedRef { secure_addr, len })
    }

    fn read_back(
        &self,
        session: SessionHandle,
        mapped: &MappedRef,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let state = self.state();
        Self::check_session(&state, session)?;
        let region = state
            .memory
            .regions
            .get(&mapped.secure_addr)
            .ok_or_else(|| km_err!(SecureHwCommunicationFailed, "{:?} not mapped", mapped))?;
        let src = region
            .get(..buf.len())
            .ok_or_else(|| km_err!(InsufficientBufferSpace, "{:?} too short", mapped))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn unmap(&self, session: SessionHandle, mapped: MappedRef) -> Result<(), Error> {
        let mut state = self.state();
        Self::check_session(&state, session)?;
        match state.memory.regions.remove(&mapped.secure_addr) {
            Some(_) => Ok(()),
            None => Err(km_err!(SecureHwCommunicationFailed, "{:?} not mapped", mapped)),
        }
    }

    fn exchange(&self, session: SessionHandle, command: &[u8]) -> Result<Vec<u8>, Error> {
        let mut state = self.state();
        Self::check_session(&state, session)?;
        let cmd = TciCommand::from_slice(command)?;
        let State { memory, script, .. } = &mut *state;
        let rsp = match script.process(memory, &cmd) {
            Ok(rsp) => serialize_response(cmd.command_id(), &rsp)?,
            Err(rc) => serialize_error_response(cmd.command_id(), rc)?,
        };
        state.commands.push(cmd);
        Ok(rsp)
    }
}

/// Fake TA that copies operation input to output.
///
/// FINISH emits the remaining input followed by `final_length` bytes of `0xf1`.  Every piece of
/// associated data received, by either route, is collected in `aad`.
#[derive(Debug)]
pub struct EchoTa {
    pub algorithm: Algorithm,
    pub final_length: u32,
    /// Upper bound on the input taken from each UPDATE.
    pub max_consume: usize,
    /// Operations started and not yet finished or aborted.
    pub open: BTreeSet<u64>,
    pub aad: Vec<u8>,
    /// AAD and input sizes of each UPDATE or FINISH received.
    pub chunks: Vec<(usize, usize)>,
    next_handle: u64,
}

impl EchoTa {
    pub fn new(algorithm: Algorithm, final_length: u32) -> Self {
        Self {
            algorithm,
            final_length,
            max_consume: usize::MAX,
            open: BTreeSet::new(),
            aad: Vec::new(),
            chunks: Vec::new(),
            next_handle: 0x1000,
        }
    }

    /// Shareable instance, so a test can inspect the TA's state while a session uses it.
    pub fn shared(algorithm: Algorithm, final_length: u32) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(algorithm, final_length)))
    }

    /// Script that drives a shared instance.
    pub fn script(ta: Arc<Mutex<Self>>) -> impl Script {
        move |mem: &mut TaMemory, cmd: &TciCommand| {
            ta.lock().unwrap_or_else(|e| e.into_inner()).process(mem, cmd)
        }
    }

    fn check_handle(&self, handle: u64) -> Result<(), ErrorCode> {
        if self.open.contains(&handle) {
            Ok(())
        } else {
            Err(ErrorCode::InvalidOperationHandle)
        }
    }

    fn collect_aad(&mut self, mem: &TaMemory, blob: DataBlob) -> Result<usize, ErrorCode> {
        let data = mem.read(blob)?;
        if data.is_empty() {
            return Ok(0);
        }
        let params: Vec<KeyParameter> =
            params::deserialize(&data).map_err(|_e| ErrorCode::InvalidArgument)?;
        let aad = params::find_bytes(&params, Tag::AssociatedData).unwrap_or(&[]);
        self.aad.extend_from_slice(aad);
        Ok(aad.len())
    }

    fn update(
        &mut self,
        mem: &mut TaMemory,
        handle: u64,
        aad_len: usize,
        input: DataBlob,
        output: DataBlob,
    ) -> Result<TciResponse, ErrorCode> {
        self.check_handle(handle)?;
        let input = mem.read(input)?;
        self.chunks.push((aad_len, input.len()));
        let n = std::cmp::min(input.len(), self.max_consume);
        mem.write(output, &input[..n])?;
        Ok(TciResponse::Update(UpdateResponse { input_consumed: n as u32, output_length: n as u32 }))
    }

    fn finish(
        &mut self,
        mem: &mut TaMemory,
        handle: u64,
        aad_len: usize,
        input: DataBlob,
        output: DataBlob,
    ) -> Result<TciResponse, ErrorCode> {
        self.check_handle(handle)?;
        self.open.remove(&handle);
        let mut out = mem.read(input)?;
        self.chunks.push((aad_len, out.len()));
        out.resize(out.len() + self.final_length as usize, 0xf1);
        mem.write(output, &out)?;
        Ok(TciResponse::Finish(FinishResponse { output_length: out.len() as u32 }))
    }

    fn abort(&mut self, handle: u64) -> Result<TciResponse, ErrorCode> {
        if !self.open.remove(&handle) {
            return Err(ErrorCode::InvalidOperationHandle);
        }
        Ok(TciResponse::Abort(AbortResponse {}))
    }

    pub fn process(
        &mut self,
        mem: &mut TaMemory,
        cmd: &TciCommand,
    ) -> Result<TciResponse, ErrorCode> {
        use KeyMintCommand as V2;
        use Keymaster4Command as V1;
        match cmd {
            TciCommand::V1(V1::Begin(_)) | TciCommand::V2(V2::Begin(_)) => {
                let handle = self.next_handle;
                self.next_handle += 1;
                self.open.insert(handle);
                Ok(TciResponse::Begin(BeginResponse {
                    handle,
                    out_params_length: 0,
                    algorithm: self.algorithm as u32,
                    final_length: self.final_length,
                }))
            }
            TciCommand::V1(V1::Update(req)) => {
                let aad_len = self.collect_aad(mem, req.params)?;
                self.update(mem, req.handle, aad_len, req.input, req.output)
            }
            TciCommand::V2(V2::Update(req)) => {
                self.update(mem, req.handle, 0, req.input, req.output)
            }
            TciCommand::V2(V2::UpdateAad(req)) => {
                self.check_handle(req.handle)?;
                let aad = mem.read(req.aad)?;
                self.aad.extend_from_slice(&aad);
                Ok(TciResponse::UpdateAad(UpdateAadResponse {}))
            }
            TciCommand::V1(V1::Finish(req)) => {
                let aad_len = self.collect_aad(mem, req.params)?;
                self.finish(mem, req.handle, aad_len, req.input, req.output)
            }
            TciCommand::V2(V2::Finish(req)) => {
                self.finish(mem, req.handle, 0, req.input, req.output)
            }
            TciCommand::V1(V1::Abort(req)) | TciCommand::V2(V2::Abort(req)) => {
                self.abort(req.handle)
            }
            _ => Err(ErrorCode::Unimplemented),
        }
    }
}
