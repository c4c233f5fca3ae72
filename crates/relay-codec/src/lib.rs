//! Wire codec for boops and decoding of entry point reverts.
//!
//! The boop encoding packs all fixed-width fields back to back with no
//! padding, followed by the three dynamic fields each behind a 4-byte
//! big-endian length prefix. The boop hash is the keccak256 of this
//! encoding with `validator_data` emptied, so signing data never changes
//! the identity of a boop.

use thiserror::Error;

pub mod boop;
pub mod revert;

pub use boop::{compute_boop_hash, decode_boop, encode_boop};
pub use revert::{
	decode_entry_point_revert, decode_execute_outcome, decode_simulation_unknown,
	execute_failure_from_logs, DecodedRevert, SimulationUnknown,
};

/// Errors that can occur while encoding or decoding a boop.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The input ended before a field could be read.
	#[error("encoding truncated at offset {offset}: wanted {wanted} more bytes")]
	Truncated { offset: usize, wanted: usize },
	/// Bytes remained after the last dynamic field.
	#[error("{0} trailing bytes after the encoding")]
	TrailingBytes(usize),
	/// A dynamic field is too large for its u32 length prefix.
	#[error("dynamic field of {0} bytes does not fit a u32 length prefix")]
	LengthOverflow(usize),
}
