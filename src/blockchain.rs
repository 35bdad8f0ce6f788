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

//! External collaborators the mempool consults but does not own: the
//! committed chain-state cache and the best-effort event sink.

use types::{AccountToken, Entry, TokenId, TransactionId};

/// An asset record as resolved from an asset hash. `token_id` yields the
/// `TokenId` this asset is addressed by, distinguishing ordinary asset
/// balances from liquidity-pool share balances of the same underlying
/// asset.
pub trait AssetRecord {
	fn token_id(&self, is_liquidity: bool) -> TokenId;
}

/// Read-only view of committed chain state the mempool consults during
/// admission. Implementations must be synchronous and must not re-enter
/// the mempool.
pub trait DBCache {
	type Asset: AssetRecord;

	/// Committed balance for `account_token`, or zero if the account has
	/// never held that token.
	fn balance(&self, account_token: &AccountToken) -> u64;

	/// Resolve an asset by its content hash, as referenced by a
	/// transaction spending a non-native token.
	fn assets_by_hash(&self, hash: &[u8]) -> Option<Self::Asset>;
}

/// Notification fired when an entry is admitted.
#[derive(Clone, Debug)]
pub struct PutEvent<'a> {
	pub entry: &'a Entry,
}

/// Notification fired when an entry is removed, for any reason.
#[derive(Clone, Copy, Debug)]
pub struct EraseEvent {
	pub txid: TransactionId,
}

/// Best-effort observer of mempool admission and eviction. Failures in an
/// implementation must not propagate back into the mempool; callers that
/// need stronger guarantees should buffer and retry out of band.
pub trait EventSink {
	fn on_mempool_add(&self, _event: PutEvent, _new_size: usize) {}
	fn on_mempool_erase(&self, _event: EraseEvent, _new_size: usize) {}
}

/// An [`EventSink`] that does nothing, used as the default when no
/// observer is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

#[cfg(test)]
mod tests {
	use super::*;

	struct RecordingSink {
		adds: ::std::cell::RefCell<usize>,
		erases: ::std::cell::RefCell<usize>,
	}

	impl EventSink for RecordingSink {
		fn on_mempool_add(&self, _event: PutEvent, _new_size: usize) {
			*self.adds.borrow_mut() += 1;
		}
		fn on_mempool_erase(&self, _event: EraseEvent, _new_size: usize) {
			*self.erases.borrow_mut() += 1;
		}
	}

	#[test]
	fn noop_sink_does_not_panic() {
		let sink = NoopEventSink;
		let txid = TransactionId::new(1, 1);
		sink.on_mempool_erase(EraseEvent { txid }, 0);
	}

	#[test]
	fn custom_sink_counts_callbacks() {
		let sink = RecordingSink {
			adds: ::std::cell::RefCell::new(0),
			erases: ::std::cell::RefCell::new(0),
		};
		let txid = TransactionId::new(1, 1);
		sink.on_mempool_erase(EraseEvent { txid }, 0);
		assert_eq!(*sink.erases.borrow(), 1);
		assert_eq!(*sink.adds.borrow(), 0);
	}
}
