//! Chunk planning: splitting a file into contiguous byte ranges

/// Per-chunk transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// One contiguous byte range of the source file, transferred as a single
/// HTTP request
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the plan; S3 part number is `index + 1`
    pub index: usize,
    /// First byte offset (inclusive)
    pub start: u64,
    /// One past the last byte offset
    pub end: u64,
    /// `end - start`
    pub size: u64,
    /// Whether this chunk reaches the end of the file
    pub is_last: bool,
    /// SHA-256 of the chunk bytes, computed lazily by the worker
    pub hash: Option<[u8; 32]>,
    /// Transfer attempts made so far (across manual retries this is reset)
    pub attempts: u32,
    pub status: ChunkStatus,
}

impl Chunk {
    fn new(index: usize, start: u64, end: u64, is_last: bool) -> Self {
        Self {
            index,
            start,
            end,
            size: end - start,
            is_last,
            hash: None,
            attempts: 0,
            status: ChunkStatus::Pending,
        }
    }

    /// True while the chunk has never been handed to a worker; only such
    /// chunks may have their boundaries rebuilt
    pub fn is_untouched(&self) -> bool {
        self.attempts == 0 && self.status == ChunkStatus::Pending
    }
}

/// Split `[0, total_size)` into `ceil(total_size / chunk_size)` contiguous
/// chunks of `chunk_size` bytes, the last one possibly short.
///
/// An empty file yields exactly one zero-size chunk with `is_last` set, so
/// every session has at least one chunk to drive through the provider.
pub fn plan(total_size: u64, chunk_size: u64) -> Vec<Chunk> {
    assert!(chunk_size > 0, "chunk size must be positive");

    if total_size == 0 {
        return vec![Chunk::new(0, 0, 0, true)];
    }

    let n_chunks = total_size.div_ceil(chunk_size) as usize;
    let mut chunks = Vec::with_capacity(n_chunks);
    for index in 0..n_chunks {
        let start = index as u64 * chunk_size;
        let end = (start + chunk_size).min(total_size);
        chunks.push(Chunk::new(index, start, end, end == total_size));
    }
    chunks
}

/// Rebuild the plan tail with a new chunk size.
///
/// Only the contiguous suffix of never-attempted chunks is rebuilt; chunks
/// that completed or were handed to a worker keep their original boundaries
/// so provider part integrity is preserved. Returns true when the plan
/// changed.
pub fn replan_pending(chunks: &mut Vec<Chunk>, total_size: u64, new_chunk_size: u64) -> bool {
    assert!(new_chunk_size > 0, "chunk size must be positive");

    // First index after the last chunk with any attempt
    let keep = chunks
        .iter()
        .rposition(|c| !c.is_untouched())
        .map(|i| i + 1)
        .unwrap_or(0);

    if keep >= chunks.len() {
        return false;
    }

    let tail_start = chunks[keep].start;
    let tail_len = total_size - tail_start;
    if tail_len == 0 {
        return false;
    }

    let n_new = tail_len.div_ceil(new_chunk_size) as usize;
    if n_new == chunks.len() - keep {
        // Same shape; nothing to gain from rebuilding
        let same = chunks[keep..]
            .iter()
            .enumerate()
            .all(|(i, c)| c.start == tail_start + i as u64 * new_chunk_size);
        if same {
            return false;
        }
    }

    chunks.truncate(keep);
    for i in 0..n_new {
        let start = tail_start + i as u64 * new_chunk_size;
        let end = (start + new_chunk_size).min(total_size);
        chunks.push(Chunk::new(keep + i, start, end, end == total_size));
    }
    true
}
