// Copyright 2018 The Warthog Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire-format parsing for token specifiers, as they appear on the API
//! surface above the mempool: `"asset:<hex>"` or `"liquidity:<hex>"`.

use std::fmt;

/// A parsed token specifier: an asset hash together with whether it names
/// the asset itself or its liquidity-pool share.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSpec {
	pub hash: Vec<u8>,
	pub is_liquidity: bool,
}

impl TokenSpec {
	const ASSET_PREFIX: &'static str = "asset:";
	const LIQUIDITY_PREFIX: &'static str = "liquidity:";

	/// Parse `"asset:<hex>"` or `"liquidity:<hex>"`. Returns `None` on any
	/// malformed input (unknown prefix, odd-length or non-hex payload).
	pub fn parse(s: &str) -> Option<TokenSpec> {
		let (is_liquidity, hex_part) = if let Some(rest) = s.strip_prefix_compat(Self::ASSET_PREFIX) {
			(false, rest)
		} else if let Some(rest) = s.strip_prefix_compat(Self::LIQUIDITY_PREFIX) {
			(true, rest)
		} else {
			return None;
		};
		let hash = decode_hex(hex_part)?;
		Some(TokenSpec { hash, is_liquidity })
	}
}

impl fmt::Display for TokenSpec {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let prefix = if self.is_liquidity {
			Self::LIQUIDITY_PREFIX
		} else {
			Self::ASSET_PREFIX
		};
		write!(f, "{}{}", prefix, encode_hex(&self.hash))
	}
}

/// `str::strip_prefix` equivalent, kept local since the crate targets an
/// edition predating the stabilized standard method.
trait StripPrefixCompat {
	fn strip_prefix_compat<'a>(&'a self, prefix: &str) -> Option<&'a str>;
}

impl StripPrefixCompat for str {
	fn strip_prefix_compat<'a>(&'a self, prefix: &str) -> Option<&'a str> {
		if self.starts_with(prefix) {
			Some(&self[prefix.len()..])
		} else {
			None
		}
	}
}

fn encode_hex(bytes: &[u8]) -> String {
	let mut s = String::with_capacity(bytes.len() * 2);
	for byte in bytes {
		s.push_str(&format!("{:02x}", byte));
	}
	s
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
	if s.len() % 2 != 0 {
		return None;
	}
	let mut out = Vec::with_capacity(s.len() / 2);
	let bytes = s.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		let hi = hex_digit(bytes[i])?;
		let lo = hex_digit(bytes[i + 1])?;
		out.push((hi << 4) | lo);
		i += 2;
	}
	Some(out)
}

fn hex_digit(b: u8) -> Option<u8> {
	match b {
		b'0'..=b'9' => Some(b - b'0'),
		b'a'..=b'f' => Some(b - b'a' + 10),
		b'A'..=b'F' => Some(b - b'A' + 10),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_asset_spec() {
		let spec = TokenSpec::parse("asset:deadbeef").unwrap();
		assert_eq!(spec.hash, vec![0xde, 0xad, 0xbe, 0xef]);
		assert!(!spec.is_liquidity);
	}

	#[test]
	fn parses_liquidity_spec() {
		let spec = TokenSpec::parse("liquidity:0a").unwrap();
		assert_eq!(spec.hash, vec![0x0a]);
		assert!(spec.is_liquidity);
	}

	#[test]
	fn rejects_unknown_prefix_and_odd_hex() {
		assert!(TokenSpec::parse("coin:ab").is_none());
		assert!(TokenSpec::parse("asset:abc").is_none());
		assert!(TokenSpec::parse("asset:zz").is_none());
	}

	#[test]
	fn round_trips_through_to_string() {
		for s in &["asset:deadbeef", "liquidity:00ff10"] {
			let spec = TokenSpec::parse(s).unwrap();
			assert_eq!(spec.to_string(), *s);
		}
	}
}
