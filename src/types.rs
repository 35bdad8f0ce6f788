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

//! Core data types shared across the mempool: transaction identity, fees,
//! account/token keys and the admitted entry itself.

use std::fmt;

/// Account identifier, as assigned by chain state.
pub type AccountId = u64;

/// Block height.
pub type Height = u64;

/// The native currency token is always represented by `TokenId::Wart`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenId {
	/// The native currency.
	Wart,
	/// A user-defined asset or liquidity token, identified by its numeric id.
	Asset(u64),
}

impl TokenId {
	/// Whether this is the native WART token.
	pub fn is_wart(&self) -> bool {
		*self == TokenId::Wart
	}
}

impl fmt::Display for TokenId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			TokenId::Wart => write!(f, "WART"),
			TokenId::Asset(id) => write!(f, "asset#{}", id),
		}
	}
}

/// Composite key under which locked-balance rows and per-account/token
/// indices are tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountToken {
	pub account: AccountId,
	pub token: TokenId,
}

impl AccountToken {
	pub fn new(account: AccountId, token: TokenId) -> Self {
		AccountToken { account, token }
	}

	pub fn wart(account: AccountId) -> Self {
		AccountToken {
			account,
			token: TokenId::Wart,
		}
	}
}

/// Logical identity of a mempool transaction: the account it originates
/// from plus a caller-chosen pin nonce. Unique within the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId {
	pub account_id: AccountId,
	pub pin_nonce: u64,
}

impl TransactionId {
	pub fn new(account_id: AccountId, pin_nonce: u64) -> Self {
		TransactionId {
			account_id,
			pin_nonce,
		}
	}
}

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.account_id, self.pin_nonce)
	}
}

/// A content hash identifying a transaction independent of its pool
/// identity. Opaque to the mempool beyond equality and ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in self.0.iter() {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

/// A totally ordered, lossy fee representation. `next()` gives the
/// smallest strictly-greater value, used to compute a floor that a
/// replacement must clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompactFee(pub u64);

impl CompactFee {
	/// The smallest representable fee.
	pub fn smallest() -> CompactFee {
		CompactFee(0)
	}

	/// The smallest fee strictly greater than this one.
	pub fn next(&self) -> CompactFee {
		CompactFee(self.0.saturating_add(1))
	}
}

impl fmt::Display for CompactFee {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Discriminant for the kind of transaction an entry represents. Only
/// `Cancelation` carries a payload (the targeted transaction id); the rest
/// are plain markers used by sampling and drain filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxVariant {
	WartTransfer,
	AssetTransfer,
	LiquidityTransfer,
	AssetCreation,
	Order,
	Cancelation(TransactionId),
	LiquidityDeposit,
	LiquidityWithdrawal,
}

impl TxVariant {
	/// Whether this variant is a plain native-currency transfer, used by
	/// `sample`'s `only_wart_transfer` filter.
	pub fn is_wart_transfer(&self) -> bool {
		match self {
			TxVariant::WartTransfer => true,
			_ => false,
		}
	}

	/// The transaction this entry cancels, if any.
	pub fn cancels(&self) -> Option<TransactionId> {
		match self {
			TxVariant::Cancelation(target) => Some(*target),
			_ => None,
		}
	}
}

/// An admitted mempool transaction. Immutable once constructed; replacement
/// is modeled as erase-then-insert, never in-place mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
	pub txid: TransactionId,
	pub txhash: TxHash,
	pub fee: CompactFee,
	pub txheight: Height,
	pub pin_height: Height,
	/// Non-native token this entry spends, if any; `TokenId::Wart` if the
	/// transaction spends no alt token.
	pub alt_token: TokenId,
	pub wart_spend: u64,
	pub token_spend: u64,
	pub variant: TxVariant,
}

impl Entry {
	pub fn account(&self) -> AccountId {
		self.txid.account_id
	}

	pub fn spends_token(&self) -> bool {
		!self.alt_token.is_wart()
	}
}

/// Capacity and fee-floor policy for a [`crate::pool::Mempool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
	/// Maximum number of entries retained at once. Must be positive.
	pub max_size: usize,
	/// Minimum fee enforced regardless of capacity pressure.
	pub min_fee: CompactFee,
}

impl PoolConfig {
	/// Default capacity matches production node configuration: 10,000
	/// pending entries.
	pub const DEFAULT_MAX_SIZE: usize = 10_000;

	pub fn new(max_size: usize, min_fee: CompactFee) -> Result<PoolConfig, &'static str> {
		if max_size == 0 {
			return Err("PoolConfig::max_size must be positive");
		}
		Ok(PoolConfig { max_size, min_fee })
	}
}

impl Default for PoolConfig {
	fn default() -> Self {
		PoolConfig {
			max_size: PoolConfig::DEFAULT_MAX_SIZE,
			min_fee: CompactFee::smallest(),
		}
	}
}

/// One mutation recorded since the last drain of the update log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
	Put(Entry),
	Erase(TransactionId),
}
