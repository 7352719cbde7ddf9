//! Chunk planner.
//!
//! Maps a byte range of an object onto the backend's fixed chunk grid. The
//! output order (ascending chunk index) is the order the prefetch engine must
//! deliver results in.

use chunkstream_common::{Error, FetchDescriptor, Result};

/// Number of chunks needed to cover an object.
pub fn chunk_count(object_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    object_size.div_ceil(chunk_size)
}

/// Plan the chunk reads covering `[range_start, range_end]`.
///
/// `range_end` is clamped to the last byte of the object; `None` means
/// "to the end of the object".
pub fn plan(
    object_size: u64,
    chunk_size: u64,
    range_start: u64,
    range_end: Option<u64>,
) -> Result<Vec<FetchDescriptor>> {
    if chunk_size == 0 {
        return Err(Error::invalid_input("chunk size must be non-zero"));
    }
    if object_size == 0 || range_start > object_size - 1 {
        return Err(Error::range_not_satisfiable(object_size));
    }

    let last_byte = object_size - 1;
    let range_end = range_end.unwrap_or(last_byte).min(last_byte);
    if range_end < range_start {
        return Err(Error::range_not_satisfiable(object_size));
    }

    let first_chunk = range_start / chunk_size;
    let last_chunk = range_end / chunk_size;

    let descriptors = (first_chunk..=last_chunk)
        .map(|chunk_index| {
            let chunk_start = chunk_index * chunk_size;
            let chunk_len = chunk_size.min(object_size - chunk_start);

            let offset_in_chunk = if chunk_index == first_chunk {
                range_start - chunk_start
            } else {
                0
            };
            let end_in_chunk = if chunk_index == last_chunk {
                range_end - chunk_start
            } else {
                chunk_len - 1
            };

            FetchDescriptor {
                chunk_index,
                offset_in_chunk,
                length: end_in_chunk - offset_in_chunk + 1,
            }
        })
        .collect();

    Ok(descriptors)
}
