//! Binary encoding of boops and the boop hash.

use crate::CodecError;
use alloy_primitives::{aliases::U192, keccak256, Address, Bytes, B256, I256, U256};
use relay_types::Boop;

/// Length of the fixed-width region: three addresses, value, nonce track
/// (uint192), nonce value (uint64), max fee, submitter fee (int256), four
/// uint32 gas limits, and three zeroable u32 length prefixes.
const STATIC_LEN: usize = 20 * 3 + 32 + 24 + 8 + 32 + 32 + 4 * 4 + 4 * 3;

/// Encodes a boop into its canonical wire format.
pub fn encode_boop(boop: &Boop) -> Result<Bytes, CodecError> {
	let dynamic_len =
		boop.call_data.len() + boop.validator_data.len() + boop.extra_data.len();
	let mut out = Vec::with_capacity(STATIC_LEN + dynamic_len);

	out.extend_from_slice(boop.account.as_slice());
	out.extend_from_slice(boop.dest.as_slice());
	out.extend_from_slice(boop.payer.as_slice());
	out.extend_from_slice(&boop.value.to_be_bytes::<32>());
	out.extend_from_slice(&boop.nonce_track.to_be_bytes::<24>());
	out.extend_from_slice(&boop.nonce_value.to_be_bytes());
	out.extend_from_slice(&boop.max_fee_per_gas.to_be_bytes::<32>());
	out.extend_from_slice(&boop.submitter_fee.to_be_bytes::<32>());
	out.extend_from_slice(&boop.gas_limit.to_be_bytes());
	out.extend_from_slice(&boop.validate_gas_limit.to_be_bytes());
	out.extend_from_slice(&boop.validate_payment_gas_limit.to_be_bytes());
	out.extend_from_slice(&boop.execute_gas_limit.to_be_bytes());

	append_dynamic(&mut out, &boop.call_data)?;
	append_dynamic(&mut out, &boop.validator_data)?;
	append_dynamic(&mut out, &boop.extra_data)?;

	Ok(out.into())
}

fn append_dynamic(out: &mut Vec<u8>, data: &[u8]) -> Result<(), CodecError> {
	let len = u32::try_from(data.len()).map_err(|_| CodecError::LengthOverflow(data.len()))?;
	out.extend_from_slice(&len.to_be_bytes());
	out.extend_from_slice(data);
	Ok(())
}

/// Decodes a boop from its canonical wire format.
///
/// The input must be exactly one encoding: trailing bytes are an error.
pub fn decode_boop(data: &[u8]) -> Result<Boop, CodecError> {
	let mut r = Reader { buf: data, pos: 0 };

	let account = Address::from_slice(r.take(20)?);
	let dest = Address::from_slice(r.take(20)?);
	let payer = Address::from_slice(r.take(20)?);
	let value = U256::from_be_slice(r.take(32)?);
	let nonce_track = U192::from_be_slice(r.take(24)?);
	let nonce_value = u64::from_be_bytes(r.take_array::<8>()?);
	let max_fee_per_gas = U256::from_be_slice(r.take(32)?);
	let submitter_fee = I256::from_be_bytes::<32>(r.take_array::<32>()?);
	let gas_limit = u32::from_be_bytes(r.take_array::<4>()?);
	let validate_gas_limit = u32::from_be_bytes(r.take_array::<4>()?);
	let validate_payment_gas_limit = u32::from_be_bytes(r.take_array::<4>()?);
	let execute_gas_limit = u32::from_be_bytes(r.take_array::<4>()?);

	let call_data = r.take_prefixed()?;
	let validator_data = r.take_prefixed()?;
	let extra_data = r.take_prefixed()?;

	if r.pos != data.len() {
		return Err(CodecError::TrailingBytes(data.len() - r.pos));
	}

	Ok(Boop {
		account,
		dest,
		payer,
		value,
		nonce_track,
		nonce_value,
		max_fee_per_gas,
		submitter_fee,
		gas_limit,
		validate_gas_limit,
		validate_payment_gas_limit,
		execute_gas_limit,
		call_data,
		validator_data,
		extra_data,
	})
}

/// Computes the boop hash: keccak256 of the encoding with
/// `validator_data` emptied. The hash is the boop's identity and must not
/// depend on the signature carried in `validator_data`.
pub fn compute_boop_hash(boop: &Boop) -> Result<B256, CodecError> {
	let unsigned = Boop {
		validator_data: Bytes::new(),
		..boop.clone()
	};
	Ok(keccak256(encode_boop(&unsigned)?))
}

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
		if self.buf.len() - self.pos < n {
			return Err(CodecError::Truncated {
				offset: self.pos,
				wanted: n - (self.buf.len() - self.pos),
			});
		}
		let out = &self.buf[self.pos..self.pos + n];
		self.pos += n;
		Ok(out)
	}

	fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
		let mut out = [0u8; N];
		out.copy_from_slice(self.take(N)?);
		Ok(out)
	}

	fn take_prefixed(&mut self) -> Result<Bytes, CodecError> {
		let len = u32::from_be_bytes(self.take_array::<4>()?) as usize;
		Ok(Bytes::copy_from_slice(self.take(len)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// The fixed-width region shared by the reference encodings below.
	const STATIC_HEX: &str = concat!(
		"1234567890123456789012345678901234567890",
		"2345678901234567890123456789012345678901",
		"3456789012345678901234567890123456789012",
		"0000000000000000000000000000000000000000000000000de0b6b3a7640000",
		"0000000000000000000000000000000000000000000004d2",
		"000000000000162e",
		"0000000000000000000000000000000000000000000000000000000077359400",
		"0000000000000000000000000000000000000000000000000000000005f5e100",
		"000f4240",
		"000c3500",
		"000c3501",
		"000c3502",
	);

	fn reference_boop() -> Boop {
		Boop {
			account: "0x1234567890123456789012345678901234567890"
				.parse()
				.unwrap(),
			dest: "0x2345678901234567890123456789012345678901"
				.parse()
				.unwrap(),
			payer: "0x3456789012345678901234567890123456789012"
				.parse()
				.unwrap(),
			value: U256::from(1_000_000_000_000_000_000u128),
			nonce_track: U192::from(1234u64),
			nonce_value: 5678,
			max_fee_per_gas: U256::from(2_000_000_000u64),
			submitter_fee: I256::try_from(100_000_000i64).unwrap(),
			gas_limit: 1_000_000,
			validate_gas_limit: 800_000,
			validate_payment_gas_limit: 800_001,
			execute_gas_limit: 800_002,
			call_data: Bytes::new(),
			validator_data: Bytes::new(),
			extra_data: Bytes::new(),
		}
	}

	#[test]
	fn encodes_reference_boop_with_empty_dynamic_fields() {
		let expected = format!("{}{}", STATIC_HEX, "000000000000000000000000");
		let encoded = encode_boop(&reference_boop()).unwrap();
		assert_eq!(hex::encode(&encoded), expected);
		assert_eq!(encoded.len(), 216);
	}

	#[test]
	fn encodes_reference_boop_with_dynamic_fields() {
		let mut boop = reference_boop();
		boop.call_data = Bytes::from(hex::decode("0123456789").unwrap());
		boop.validator_data = Bytes::from(hex::decode("09abcd").unwrap());
		boop.extra_data = Bytes::from(hex::decode("def0").unwrap());

		let expected = [
			STATIC_HEX,
			"000000050123456789", // callData
			"0000000309abcd",     // validatorData
			"00000002def0",       // extraData
		]
		.concat();
		let encoded = encode_boop(&boop).unwrap();
		assert_eq!(hex::encode(&encoded), expected);
	}

	#[test]
	fn encodes_all_zero_boop_to_static_zeroes() {
		let boop = Boop {
			account: Address::ZERO,
			dest: Address::ZERO,
			payer: Address::ZERO,
			value: U256::ZERO,
			nonce_track: U192::ZERO,
			nonce_value: 0,
			max_fee_per_gas: U256::ZERO,
			submitter_fee: I256::ZERO,
			gas_limit: 0,
			validate_gas_limit: 0,
			validate_payment_gas_limit: 0,
			execute_gas_limit: 0,
			call_data: Bytes::new(),
			validator_data: Bytes::new(),
			extra_data: Bytes::new(),
		};
		let encoded = encode_boop(&boop).unwrap();
		assert_eq!(hex::encode(&encoded), "0".repeat(432));
	}

	#[test]
	fn round_trips_exactly() {
		let mut boop = reference_boop();
		boop.call_data = Bytes::from(vec![1, 2, 3, 4, 5]);
		boop.validator_data = Bytes::from(vec![9; 65]);
		boop.extra_data = Bytes::from(vec![0xde, 0xf0]);
		boop.submitter_fee = I256::try_from(-42i64).unwrap();

		let encoded = encode_boop(&boop).unwrap();
		let decoded = decode_boop(&encoded).unwrap();
		assert_eq!(decoded, boop);
	}

	#[test]
	fn negative_submitter_fee_is_twos_complement() {
		let mut boop = reference_boop();
		boop.submitter_fee = I256::try_from(-1i64).unwrap();
		let encoded = encode_boop(&boop).unwrap();
		// int256(-1) occupies bytes 156..188 of the static region, after
		// the addresses (60), value (32), nonceTrack (24), nonceValue (8)
		// and maxFeePerGas (32).
		assert_eq!(&encoded[156..188], &[0xffu8; 32]);
		assert_eq!(decode_boop(&encoded).unwrap().submitter_fee, boop.submitter_fee);
	}

	#[test]
	fn rejects_truncated_input() {
		let encoded = encode_boop(&reference_boop()).unwrap();
		let err = decode_boop(&encoded[..encoded.len() - 1]).unwrap_err();
		assert!(matches!(err, CodecError::Truncated { .. }));

		// Also inside the fixed region.
		let err = decode_boop(&encoded[..50]).unwrap_err();
		assert!(matches!(err, CodecError::Truncated { .. }));
	}

	#[test]
	fn rejects_trailing_bytes() {
		let mut encoded = encode_boop(&reference_boop()).unwrap().to_vec();
		encoded.push(0);
		let err = decode_boop(&encoded).unwrap_err();
		assert!(matches!(err, CodecError::TrailingBytes(1)));
	}

	#[test]
	fn hash_ignores_validator_data() {
		let boop = reference_boop();
		let mut signed = boop.clone();
		signed.validator_data = Bytes::from(vec![0xab; 65]);

		assert_eq!(
			compute_boop_hash(&boop).unwrap(),
			compute_boop_hash(&signed).unwrap()
		);

		// But any other field changes the hash.
		let mut other = boop.clone();
		other.nonce_value += 1;
		assert_ne!(
			compute_boop_hash(&boop).unwrap(),
			compute_boop_hash(&other).unwrap()
		);
	}
}
