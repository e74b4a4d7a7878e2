//! Chunked compression of typed arrays and request mapping over chunks.

pub mod codec;
pub mod layout;
pub mod mapper;

pub use codec::{ChunkCodec, ChunkDescriptor, CompressedRecord, DEFAULT_CHUNK_SIZE};
pub use layout::{ArrayExtents, ChunkLayout, ChunkWindow};
pub use mapper::{chunks_for_request, map_request, MappedArray};
