//! Streaming of update/finish data through bounded command submissions.
//!
//! Each submission carries at most `chunk_size` bytes of associated data plus input.  Associated
//! data (which only travels inside the parameter blob of v1 commands) is always drained before
//! any input is sent.  The submission that exhausts both is the last one, and is offered the
//! whole of the remaining output space; earlier submissions are offered only as much output
//! space as their input plus [`PENDING_OUTPUT_MAX`].
//!
//! At most one set of buffers is mapped at a time: the previous chunk's mappings are torn down
//! before the next chunk's are made.

use crate::{Mapping, SecureTransport, SessionHandle};
use core::cmp::min;
use log::{debug, warn};
use tkm_common::{
    km_err,
    params::{find_bytes, serialize_with_aad},
    vec_try, Error,
};
use tkm_wire::{
    keymint::{KeyParameter, Tag},
    tci::DataBlob,
};

/// Output a chunk may produce beyond its own input, from data buffered by earlier chunks.
pub const PENDING_OUTPUT_MAX: usize = 16;

/// Buffers of one submission, as mapped for the TA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    pub params: DataBlob,
    pub input: DataBlob,
    pub output: DataBlob,
}

/// Outcome of one submission, as reported by the TA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkResult {
    pub input_consumed: usize,
    pub output_len: usize,
}

/// Destination for the chunks of a stream.
pub trait ChunkSink {
    /// Submit a chunk that will be followed by more.
    fn intermediate(&mut self, chunk: &Chunk) -> Result<ChunkResult, Error>;

    /// Submit the chunk that carries the end of the associated data and input.
    fn last(&mut self, chunk: &Chunk) -> Result<ChunkResult, Error>;
}

/// Data for one streaming call.
#[derive(Clone, Copy, Debug)]
pub struct Stream<'a> {
    /// Parameters, for commands that carry a parameter blob.  A `Tag::AssociatedData` entry is
    /// split across chunks; everything else is repeated in each chunk.
    pub params: Option<&'a [KeyParameter]>,
    pub input: &'a [u8],
    /// Total output space available across all chunks.
    pub output_capacity: usize,
    /// Submit an (empty) last chunk even if there is no data at all.
    pub at_least_one: bool,
}

/// Combined result of all the chunks of a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamOutput {
    /// Input bytes accepted by the TA.
    pub input_consumed: usize,
    pub output: Vec<u8>,
    /// Number of submissions made.
    pub chunks: usize,
}

/// Splits streams into chunks of a fixed budget.
pub struct Splitter<'a, T: SecureTransport + ?Sized> {
    transport: &'a T,
    session: SessionHandle,
    chunk_size: usize,
}

impl<'a, T: SecureTransport + ?Sized> Splitter<'a, T> {
    pub fn new(transport: &'a T, session: SessionHandle, chunk_size: usize) -> Self {
        Self { transport, session, chunk_size }
    }

    /// Feed `stream` through `sink`, one chunk at a time.
    ///
    /// Stops after the last chunk, or early if the TA accepts nothing from an intermediate
    /// chunk; the caller learns how much input was taken from
    /// [`StreamOutput::input_consumed`].
    pub fn run<S: ChunkSink>(&self, stream: &Stream, sink: &mut S) -> Result<StreamOutput, Error> {
        if self.chunk_size == 0 {
            return Err(km_err!(InvalidArgument, "zero chunk size"));
        }
        let params = stream.params.unwrap_or(&[]);
        let aad = find_bytes(params, Tag::AssociatedData).unwrap_or(&[]);
        let plain_params = match stream.params {
            Some(params) => serialize_with_aad(params, None)?,
            None => Vec::new(),
        };
        let input = stream.input;
        let mut output = vec_try![0u8; stream.output_capacity]?;

        let (mut aad_pos, mut in_pos, mut out_pos) = (0, 0, 0);
        let mut at_least_one = stream.at_least_one;
        let mut chunks = 0;
        while at_least_one || aad_pos < aad.len() || in_pos < input.len() {
            at_least_one = false;
            let mut budget = self.chunk_size;
            let mut last = true;

            let aad_left = aad.len() - aad_pos;
            let aad_take = min(aad_left, budget);
            if aad_take < aad_left {
                last = false;
            }
            budget -= aad_take;
            let aad_params;
            let params_data: &[u8] = if aad_take > 0 {
                aad_params = serialize_with_aad(params, Some(&aad[aad_pos..aad_pos + aad_take]))?;
                &aad_params
            } else {
                &plain_params
            };

            let in_left = input.len() - in_pos;
            let in_take = min(in_left, budget);
            if in_take < in_left {
                last = false;
            }

            let out_room = output.len() - out_pos;
            let out_take =
                if last { out_room } else { min(out_room, in_take + PENDING_OUTPUT_MAX) };

            let params_map = Mapping::new(self.transport, self.session, params_data)?;
            let input_map =
                Mapping::new(self.transport, self.session, &input[in_pos..in_pos + in_take])?;
            let output_map =
                Mapping::new(self.transport, self.session, &output[out_pos..out_pos + out_take])?;
            let chunk = Chunk {
                params: params_map.blob(),
                input: input_map.blob(),
                output: output_map.blob(),
            };
            debug!(
                "chunk {}: {} AAD bytes, {} input bytes, {} output bytes{}",
                chunks,
                aad_take,
                in_take,
                out_take,
                if last { " (last)" } else { "" }
            );
            let result = if last { sink.last(&chunk)? } else { sink.intermediate(&chunk)? };
            if result.input_consumed > in_take || result.output_len > out_take {
                return Err(km_err!(
                    SecureHwCommunicationFailed,
                    "TA reported {} of {} input bytes consumed, {} of {} output bytes used",
                    result.input_consumed,
                    in_take,
                    result.output_len,
                    out_take
                ));
            }
            output_map.read_into(&mut output[out_pos..out_pos + result.output_len])?;

            aad_pos += aad_take;
            in_pos += result.input_consumed;
            out_pos += result.output_len;
            chunks += 1;

            if last {
                break;
            }
            if result.input_consumed == 0 && aad_take == 0 {
                warn!("TA accepted no input from chunk {}, stopping", chunks - 1);
                break;
            }
        }

        output.truncate(out_pos);
        Ok(StreamOutput { input_consumed: in_pos, output, chunks })
    }
}
