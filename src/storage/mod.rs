//! Random-access byte storage backing both reading and writing

mod store;

pub use store::{RandomAccessStore, ReadOutcome, MAX_CHUNK_SIZE};
