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

//! The mempool façade: admission, replacement, eviction, reconciliation,
//! sampling and draining, wired together over the [`LockedBalanceLedger`]
//! and [`TransactionStore`].

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use failure::Fail;

use blockchain::{AssetRecord, DBCache, EraseEvent, EventSink, NoopEventSink, PutEvent};
use ledger::{LockedBalance, LockedBalanceLedger};
use store::TransactionStore;
use types::{
	AccountToken, CompactFee, Entry, Height, PoolConfig, TokenId, TransactionId, TxHash,
	TxVariant, Update,
};

/// Errors admission can report. No state is mutated when any of these is
/// returned.
#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
	/// Duplicate transaction id with a fee that does not clear the
	/// existing entry's fee.
	#[fail(display = "duplicate transaction id with insufficient fee to replace")]
	Nonce,
	/// Insufficient WART balance even after evicting cheaper conflicting
	/// entries.
	#[fail(display = "insufficient WART balance")]
	Balance,
	/// Insufficient alt-token balance even after evicting cheaper
	/// conflicting entries.
	#[fail(display = "insufficient token balance")]
	TokBalance,
	/// The asset hash referenced by the transaction is unknown to the
	/// chain-state cache.
	#[fail(display = "referenced asset hash not found")]
	AssetHashNotFound,
	/// A token specifier could not be parsed or resolved.
	#[fail(display = "invalid token specifier")]
	InvalidToken,
}

/// A non-native token spend accompanying a pending transaction.
#[derive(Clone, Debug)]
pub struct AltTokenSpend {
	pub asset_hash: Vec<u8>,
	pub is_liquidity: bool,
	pub amount: u64,
}

/// The caller-supplied description of a transaction awaiting admission.
/// Distinct from [`Entry`]: an `Entry` is what the store holds once the
/// transaction has actually been admitted.
#[derive(Clone, Debug)]
pub struct PendingTx {
	pub txid: TransactionId,
	pub fee: CompactFee,
	pub pin_height: Height,
	pub wart_spend: u64,
	pub alt_token: Option<AltTokenSpend>,
	pub variant: TxVariant,
}

/// The mempool. Owns the transaction store, the locked-balance ledger and
/// the pending update log; single-writer, single-threaded, no internal
/// locking.
pub struct Mempool {
	config: PoolConfig,
	store: TransactionStore,
	ledger: LockedBalanceLedger,
	updates: Vec<Update>,
	sink: Arc<EventSink>,
}

impl Mempool {
	pub fn new(config: PoolConfig) -> Mempool {
		Mempool::with_sink(config, Arc::new(NoopEventSink))
	}

	pub fn with_sink(config: PoolConfig, sink: Arc<EventSink>) -> Mempool {
		Mempool {
			config,
			store: TransactionStore::new(),
			ledger: LockedBalanceLedger::new(),
			updates: Vec::new(),
			sink,
		}
	}

	pub fn len(&self) -> usize {
		self.store.len()
	}

	pub fn is_empty(&self) -> bool {
		self.store.is_empty()
	}

	pub fn contains(&self, txid: &TransactionId) -> bool {
		self.store.contains(txid)
	}

	pub fn get(&self, txid: &TransactionId) -> Option<&Entry> {
		self.store.get(txid)
	}

	/// The effective minimum fee a new entry must clear right now.
	pub fn min_fee(&self) -> CompactFee {
		self.store.min_fee(self.config.max_size, self.config.min_fee)
	}

	pub fn sample(&self, n: usize, only_wart_transfer: bool) -> Vec<(TransactionId, CompactFee)> {
		self.store.sample(n, only_wart_transfer)
	}

	pub fn filter_new(&self, advertised: &[(TransactionId, CompactFee)]) -> Vec<TransactionId> {
		self.store.filter_new(advertised, self.min_fee())
	}

	pub fn get_transactions(
		&self,
		n: usize,
		height: Height,
		hashes: Option<&[TxHash]>,
	) -> Vec<Entry> {
		self.store.get_transactions(n, height, hashes)
	}

	/// Drain the update log accumulated since the previous drain.
	pub fn pop_updates(&mut self) -> Vec<Update> {
		mem::replace(&mut self.updates, Vec::new())
	}

	/// Admit `pm` into the pool, replacing and evicting cheaper conflicting
	/// entries as needed. Leaves all state untouched on any error.
	pub fn insert<C: DBCache>(
		&mut self,
		pm: PendingTx,
		txheight: Height,
		txhash: TxHash,
		cache: &C,
	) -> Result<(), PoolError> {
		let txid = pm.txid;
		let account = txid.account_id;

		// Step 1: duplicate / replacement check.
		let matched_entry = match self.store.get(&txid) {
			Some(existing) if existing.fee >= pm.fee => {
				debug!(
					"mempool: reject {} (NONCE): existing fee {} >= new fee {}",
					txid, existing.fee, pm.fee
				);
				return Err(PoolError::Nonce);
			}
			Some(existing) => Some(existing.clone()),
			None => None,
		};
		let match_id = matched_entry.as_ref().map(|e| e.txid);

		let mut cleared: HashSet<TransactionId> = HashSet::new();
		if let Some(id) = match_id {
			cleared.insert(id);
		}

		// Step 2: WART balance probe. The matched entry is unconditionally
		// replaced, so its own reservation is released up front and does not
		// count against the new spend.
		let wart_key = AccountToken::wart(account);
		let committed_wart = cache.balance(&wart_key);
		let mut wart_balance = self
			.ledger
			.get(&wart_key)
			.cloned()
			.unwrap_or_else(|| LockedBalance::new(committed_wart));
		if let Some(ref matched) = matched_entry {
			wart_balance.unlock(matched.wart_spend);
		}
		if wart_balance.total() < pm.wart_spend {
			debug!("mempool: reject {} (BALANCE): total < spend", txid);
			return Err(PoolError::Balance);
		}

		// Step 3: token balance simulation. A zero-amount token spend does
		// not resolve the asset hash or materialize a ledger row at all.
		let mut token_ctx: Option<(AccountToken, LockedBalance, u64)> = None;
		if let Some(ref alt) = pm.alt_token {
			if alt.amount > 0 {
				let asset = cache
					.assets_by_hash(&alt.asset_hash)
					.ok_or(PoolError::AssetHashNotFound)?;
				let token_id = asset.token_id(alt.is_liquidity);
				let token_key = AccountToken::new(account, token_id);
				let committed_token = cache.balance(&token_key);
				let mut token_balance = self
					.ledger
					.get(&token_key)
					.cloned()
					.unwrap_or_else(|| LockedBalance::new(committed_token));
				if let Some(ref matched) = matched_entry {
					if matched.alt_token == token_id {
						token_balance.unlock(matched.token_spend);
					}
				}

				if token_balance.total() < alt.amount {
					debug!("mempool: reject {} (TOKBALANCE): total < spend", txid);
					return Err(PoolError::TokBalance);
				}

				if token_balance.free() < alt.amount {
					for entry in self.store.by_account_token_fee_inc(account, token_id) {
						if token_balance.free() >= alt.amount {
							break;
						}
						if Some(entry.txid) == match_id {
							continue;
						}
						if entry.fee >= pm.fee {
							break;
						}
						cleared.insert(entry.txid);
						token_balance.unlock(entry.token_spend);
						wart_balance.unlock(entry.wart_spend);
					}
					if token_balance.free() < alt.amount {
						debug!(
							"mempool: reject {} (TOKBALANCE): insufficient even after eviction",
							txid
						);
						return Err(PoolError::TokBalance);
					}
				}
				token_ctx = Some((token_key, token_balance, alt.amount));
			}
		}

		// Step 4: WART balance simulation.
		if wart_balance.free() < pm.wart_spend {
			for entry in self.store.by_fee_inc_le(account, Some(pm.fee)) {
				if wart_balance.free() >= pm.wart_spend {
					break;
				}
				if Some(entry.txid) == match_id || cleared.contains(&entry.txid) {
					continue;
				}
				cleared.insert(entry.txid);
				wart_balance.unlock(entry.wart_spend);
			}
			if wart_balance.free() < pm.wart_spend {
				debug!(
					"mempool: reject {} (BALANCE): insufficient even after eviction",
					txid
				);
				return Err(PoolError::Balance);
			}
		}

		// Step 5: commit. No rejection path remains past this point.
		for id in cleared.into_iter() {
			self.erase_internal(&id);
		}

		self.ledger.lock(wart_key, committed_wart, pm.wart_spend);
		let alt_token_id = if let Some((token_key, _, amount)) = token_ctx {
			let committed_token = cache.balance(&token_key);
			self.ledger.lock(token_key, committed_token, amount);
			token_key.token
		} else {
			TokenId::Wart
		};

		let entry = Entry {
			txid,
			txhash,
			fee: pm.fee,
			txheight,
			pin_height: pm.pin_height,
			alt_token: alt_token_id,
			wart_spend: pm.wart_spend,
			token_spend: pm.alt_token.as_ref().map(|a| a.amount).unwrap_or(0),
			variant: pm.variant,
		};

		self.store.insert(entry.clone());
		self.updates.push(Update::Put(entry.clone()));
		self.sink.on_mempool_add(PutEvent { entry: &entry }, self.store.len());
		debug!(
			"mempool: admitted {} fee={} size={}",
			txid, entry.fee, self.store.len()
		);

		self.prune();
		Ok(())
	}

	/// Remove `txid`, unlocking its ledger reservations and recording the
	/// erasure in the update log and event sink. Returns `None` if the id
	/// was not present.
	fn erase_internal(&mut self, txid: &TransactionId) -> Option<Entry> {
		let entry = self.store.erase(txid)?;

		let wart_key = AccountToken::wart(entry.account());
		self.ledger.unlock(&wart_key, entry.wart_spend);
		if entry.spends_token() {
			let token_key = AccountToken::new(entry.account(), entry.alt_token);
			self.ledger.unlock(&token_key, entry.token_spend);
		}

		self.updates.push(Update::Erase(*txid));
		self.sink
			.on_mempool_erase(EraseEvent { txid: *txid }, self.store.len());
		trace!("mempool: erased {} size={}", txid, self.store.len());
		Some(entry)
	}

	/// Explicit removal by id, e.g. on confirmation.
	pub fn erase(&mut self, txid: &TransactionId) -> Option<Entry> {
		self.erase_internal(txid)
	}

	/// Remove every entry with `txheight >= from_height`, as on a reorg.
	pub fn erase_from_height(&mut self, from_height: Height) -> usize {
		let ids: Vec<TransactionId> = self
			.store
			.by_txheight_from(from_height)
			.map(|e| e.txid)
			.collect();
		let n = ids.len();
		for id in ids {
			self.erase_internal(&id);
		}
		n
	}

	/// Remove every entry whose pin height is `< before_height`.
	pub fn erase_pinned_before_height(&mut self, before_height: Height) -> usize {
		let ids: Vec<TransactionId> = self
			.store
			.by_pin_height_before(before_height)
			.map(|e| e.txid)
			.collect();
		let n = ids.len();
		for id in ids {
			self.erase_internal(&id);
		}
		n
	}

	/// Called when the policy minimum fee rises. Evicts the weakest
	/// entries until the weakest live fee clears the policy floor. Returns
	/// the number of entries removed.
	pub fn on_constraint_update(&mut self) -> usize {
		let mut n = 0;
		while let Some(weakest_fee) = self.store.weakest_fee() {
			if weakest_fee >= self.config.min_fee {
				break;
			}
			if let Some(txid) = self.store.weakest_txid() {
				self.erase_internal(&txid);
				n += 1;
			} else {
				break;
			}
		}
		if n > 0 {
			warn!("mempool: on_constraint_update evicted {} entries", n);
		}
		n
	}

	/// Evict the weakest entries while over capacity. Called at the tail
	/// of every successful [`Mempool::insert`].
	pub fn prune(&mut self) -> usize {
		let mut n = 0;
		while self.store.len() > self.config.max_size {
			if let Some(txid) = self.store.weakest_txid() {
				self.erase_internal(&txid);
				n += 1;
			} else {
				break;
			}
		}
		n
	}

	/// React to a change in the committed balance for `account_token`.
	/// Evicts entries, cheapest first, until the ledger row can absorb the
	/// new balance, or does nothing if no row currently references it.
	pub fn set_free_balance(&mut self, account_token: AccountToken, new_avail: u64) {
		if !self.ledger.contains(&account_token) {
			return;
		}
		if self.ledger.try_set_avail(&account_token, new_avail) == Some(true) {
			return;
		}

		let account = account_token.account;
		let evicted: Vec<TransactionId> = if account_token.token.is_wart() {
			self.store
				.by_fee_inc_le(account, None)
				.map(|e| e.txid)
				.collect()
		} else {
			self.store
				.by_account_token_fee_inc(account, account_token.token)
				.map(|e| e.txid)
				.collect()
		};

		let mut n = 0;
		for txid in evicted {
			if self.ledger.try_set_avail(&account_token, new_avail) == Some(true) {
				break;
			}
			self.erase_internal(&txid);
			n += 1;
			if !self.ledger.contains(&account_token) {
				// the row went clean (and was removed) before reaching
				// new_avail; nothing left to test against.
				break;
			}
		}
		if n > 0 {
			warn!(
				"mempool: set_free_balance({:?}, {}) evicted {} entries",
				account_token, new_avail, n
			);
		}
		// If a row still exists here it must now accept new_avail, since
		// it became clean or its usage dropped enough on every eviction.
		self.ledger.try_set_avail(&account_token, new_avail);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use blockchain::AssetRecord as AssetRecordTrait;
	use std::collections::HashMap;

	#[derive(Clone)]
	struct TestAsset {
		id: u64,
	}

	impl AssetRecordTrait for TestAsset {
		fn token_id(&self, _is_liquidity: bool) -> TokenId {
			TokenId::Asset(self.id)
		}
	}

	#[derive(Default)]
	struct TestCache {
		balances: HashMap<AccountToken, u64>,
		assets: HashMap<Vec<u8>, TestAsset>,
	}

	impl DBCache for TestCache {
		type Asset = TestAsset;

		fn balance(&self, account_token: &AccountToken) -> u64 {
			*self.balances.get(account_token).unwrap_or(&0)
		}

		fn assets_by_hash(&self, hash: &[u8]) -> Option<TestAsset> {
			self.assets.get(hash).cloned()
		}
	}

	fn hash_of(n: u8) -> TxHash {
		TxHash([n; 32])
	}

	fn basic_pm(account: u64, nonce: u64, fee: u64, wart_spend: u64) -> PendingTx {
		PendingTx {
			txid: TransactionId::new(account, nonce),
			fee: CompactFee(fee),
			pin_height: 1,
			wart_spend,
			alt_token: None,
			variant: TxVariant::WartTransfer,
		}
	}

	#[test]
	fn empty_to_single() {
		let mut cache = TestCache::default();
		cache.balances.insert(AccountToken::wart(7), 200);
		let mut pool: Mempool = Mempool::new(PoolConfig::default());

		pool.insert(basic_pm(7, 1, 10, 100), 1, hash_of(1), &cache)
			.unwrap();

		assert_eq!(pool.len(), 1);
		let row = pool.ledger.get(&AccountToken::wart(7)).unwrap();
		assert_eq!(row.total(), 300);
		assert_eq!(row.used(), 100);
	}

	#[test]
	fn replacement_with_higher_fee() {
		let mut cache = TestCache::default();
		cache.balances.insert(AccountToken::wart(7), 200);
		let mut pool: Mempool = Mempool::new(PoolConfig::default());
		pool.insert(basic_pm(7, 1, 10, 100), 1, hash_of(1), &cache)
			.unwrap();

		pool.insert(basic_pm(7, 1, 11, 150), 2, hash_of(2), &cache)
			.unwrap();

		assert_eq!(pool.len(), 1);
		let entry = pool.get(&TransactionId::new(7, 1)).unwrap();
		assert_eq!(entry.fee, CompactFee(11));
		assert_eq!(entry.wart_spend, 150);
		let row = pool.ledger.get(&AccountToken::wart(7)).unwrap();
		assert_eq!(row.used(), 150);

		let updates = pool.pop_updates();
		assert_eq!(updates.len(), 3);
	}

	#[test]
	fn eviction_on_balance_drop() {
		let mut cache = TestCache::default();
		cache.balances.insert(AccountToken::wart(7), 200);
		let mut pool: Mempool = Mempool::new(PoolConfig::default());
		pool.insert(basic_pm(7, 1, 10, 100), 1, hash_of(1), &cache)
			.unwrap();

		pool.set_free_balance(AccountToken::wart(7), 50);

		assert_eq!(pool.len(), 0);
		assert!(!pool.ledger.contains(&AccountToken::wart(7)));
	}

	#[test]
	fn cross_token_admission() {
		let mut cache = TestCache::default();
		cache.balances.insert(AccountToken::wart(7), 100);
		cache
			.balances
			.insert(AccountToken::new(7, TokenId::Asset(1)), 50);
		cache.assets.insert(vec![0xaa], TestAsset { id: 1 });

		let mut pool: Mempool = Mempool::new(PoolConfig::default());
		let pm = PendingTx {
			txid: TransactionId::new(7, 1),
			fee: CompactFee(5),
			pin_height: 1,
			wart_spend: 10,
			alt_token: Some(AltTokenSpend {
				asset_hash: vec![0xaa],
				is_liquidity: false,
				amount: 30,
			}),
			variant: TxVariant::AssetTransfer,
		};

		pool.insert(pm, 1, hash_of(1), &cache).unwrap();

		assert_eq!(pool.len(), 1);
		let wart_row = pool.ledger.get(&AccountToken::wart(7)).unwrap();
		assert_eq!(wart_row.used(), 10);
		let token_row = pool
			.ledger
			.get(&AccountToken::new(7, TokenId::Asset(1)))
			.unwrap();
		assert_eq!(token_row.used(), 30);
	}

	#[test]
	fn capacity_prune_evicts_weakest() {
		let mut cache = TestCache::default();
		for acct in 1..=3u64 {
			cache.balances.insert(AccountToken::wart(acct), 1000);
		}
		let config = PoolConfig::new(2, CompactFee::smallest()).unwrap();
		let mut pool: Mempool = Mempool::new(config);

		pool.insert(basic_pm(1, 1, 1, 10), 1, hash_of(1), &cache)
			.unwrap();
		pool.insert(basic_pm(2, 1, 2, 10), 1, hash_of(2), &cache)
			.unwrap();
		pool.insert(basic_pm(3, 1, 3, 10), 1, hash_of(3), &cache)
			.unwrap();

		assert_eq!(pool.len(), 2);
		assert!(!pool.contains(&TransactionId::new(1, 1)));
		assert!(pool.contains(&TransactionId::new(2, 1)));
		assert!(pool.contains(&TransactionId::new(3, 1)));
	}

	#[test]
	fn reorg_erases_from_height() {
		let mut cache = TestCache::default();
		for acct in 1..=3u64 {
			cache.balances.insert(AccountToken::wart(acct), 1000);
		}
		let mut pool: Mempool = Mempool::new(PoolConfig::default());

		let mut pm10 = basic_pm(1, 1, 1, 10);
		pm10.pin_height = 10;
		pool.insert(pm10, 10, hash_of(1), &cache).unwrap();

		let mut pm12 = basic_pm(2, 1, 1, 10);
		pm12.pin_height = 12;
		pool.insert(pm12, 12, hash_of(2), &cache).unwrap();

		let mut pm15 = basic_pm(3, 1, 1, 10);
		pm15.pin_height = 15;
		pool.insert(pm15, 15, hash_of(3), &cache).unwrap();

		let removed = pool.erase_from_height(12);

		assert_eq!(removed, 2);
		assert!(pool.contains(&TransactionId::new(1, 1)));
		assert!(!pool.contains(&TransactionId::new(2, 1)));
		assert!(!pool.contains(&TransactionId::new(3, 1)));
	}

	#[test]
	fn duplicate_with_equal_fee_is_rejected() {
		let mut cache = TestCache::default();
		cache.balances.insert(AccountToken::wart(7), 200);
		let mut pool: Mempool = Mempool::new(PoolConfig::default());
		pool.insert(basic_pm(7, 1, 10, 100), 1, hash_of(1), &cache)
			.unwrap();

		let err = pool
			.insert(basic_pm(7, 1, 10, 100), 2, hash_of(2), &cache)
			.unwrap_err();
		assert_eq!(err, PoolError::Nonce);
		assert_eq!(pool.len(), 1);
	}

	#[test]
	fn pop_updates_empties_log() {
		let mut cache = TestCache::default();
		cache.balances.insert(AccountToken::wart(7), 200);
		let mut pool: Mempool = Mempool::new(PoolConfig::default());
		pool.insert(basic_pm(7, 1, 10, 100), 1, hash_of(1), &cache)
			.unwrap();
		let first = pool.pop_updates();
		assert_eq!(first.len(), 1);
		let second = pool.pop_updates();
		assert!(second.is_empty());
	}
}
