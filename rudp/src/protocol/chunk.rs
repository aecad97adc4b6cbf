use super::{Packet, SequenceNumber, MAX_CHUNKS, MAX_DATA_PER_CHUNK, MAX_PAYLOAD_SIZE};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub(crate) enum ChunkError {
    #[error("received chunk declaring {1} chunks while reassembling a message of {0} chunks")]
    ConflictingChunkCount(usize, usize),
    #[error("received chunk {0} twice for the same message")]
    DuplicateChunk(usize),
    #[error("received chunk index {0} for a message of {1} chunks")]
    IndexOutOfRange(usize, usize),
}

/// Splits a payload into chunk packets numbered consecutively from `first`.
pub(crate) fn split_into_chunks(payload: &[u8], first: SequenceNumber) -> Vec<Packet> {
    assert!(payload.len() <= MAX_PAYLOAD_SIZE);

    let chunks = payload.chunks(MAX_DATA_PER_CHUNK).collect::<Vec<_>>();
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, data)| Packet::chunk(first + index as u16, total, index, data.to_vec()))
        .collect()
}

/// Collects the chunks of one message at a time.
#[derive(Debug, Default)]
pub(crate) struct ChunkAssembler {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl ChunkAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_assembling(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Stores a chunk and returns the whole message once its last chunk arrives
    pub(crate) fn push(
        &mut self,
        total: usize,
        index: usize,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, ChunkError> {
        if total == 0 || total > MAX_CHUNKS || index >= total {
            return Err(ChunkError::IndexOutOfRange(index, total));
        }

        if !self.is_assembling() {
            self.chunks = vec![None; total];
        } else if self.chunks.len() != total {
            return Err(ChunkError::ConflictingChunkCount(self.chunks.len(), total));
        }

        if self.chunks[index].is_some() {
            return Err(ChunkError::DuplicateChunk(index));
        }

        self.chunks[index] = Some(payload);
        self.received += 1;

        if self.received < total {
            return Ok(None);
        }

        let message = self.chunks.drain(..).flatten().flatten().collect::<Vec<u8>>();
        self.received = 0;

        Ok(Some(message))
    }
}
