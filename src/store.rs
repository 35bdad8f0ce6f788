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

//! The transaction store: a primary keyed collection of [`Entry`] values
//! plus five secondary orderings, kept strictly consistent on every
//! mutation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use types::{AccountId, CompactFee, Entry, Height, TokenId, TransactionId, TxHash};

/// Entries beyond this many (by descending fee) are never considered by
/// `sample`, matching the original collaborator's fixed head window.
const SAMPLE_HEAD_WINDOW: usize = 800;

/// Consensus-compatibility carve-out: `(height_lo, height_hi, account_id)`
/// triples naming a window in which entries from `account_id` are skipped
/// by `get_transactions`. Kept as a table rather than an inline constant so
/// further historical exemptions can be added without touching the drain
/// logic itself.
const HISTORICAL_EXEMPTIONS: &[(Height, Height, AccountId)] = &[(0, 2_598_042, 1910)];

fn is_historically_exempt(account: AccountId, height: Height) -> bool {
	HISTORICAL_EXEMPTIONS
		.iter()
		.any(|&(lo, hi, acc)| acc == account && height >= lo && height <= hi)
}

type FeeKey = (Reverse<CompactFee>, u64, TransactionId);
type AccountFeeKey = (AccountId, CompactFee, TransactionId);
type AccountTokenFeeKey = (AccountId, TokenId, CompactFee, TransactionId);
type HeightKey = (Height, TransactionId);

struct Stored {
	entry: Entry,
	seq: u64,
}

/// Owning multi-index container for admitted mempool entries.
#[derive(Default)]
pub struct TransactionStore {
	primary: BTreeMap<TransactionId, Stored>,
	by_hash: HashMap<TxHash, TransactionId>,
	by_fee: BTreeSet<FeeKey>,
	by_account_fee: BTreeSet<AccountFeeKey>,
	by_account_token_fee: BTreeSet<AccountTokenFeeKey>,
	by_pin_height: BTreeSet<HeightKey>,
	by_txheight: BTreeSet<HeightKey>,
	next_seq: u64,
}

impl TransactionStore {
	pub fn new() -> TransactionStore {
		TransactionStore {
			primary: BTreeMap::new(),
			by_hash: HashMap::new(),
			by_fee: BTreeSet::new(),
			by_account_fee: BTreeSet::new(),
			by_account_token_fee: BTreeSet::new(),
			by_pin_height: BTreeSet::new(),
			by_txheight: BTreeSet::new(),
			next_seq: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.primary.len()
	}

	pub fn is_empty(&self) -> bool {
		self.primary.is_empty()
	}

	pub fn contains(&self, txid: &TransactionId) -> bool {
		self.primary.contains_key(txid)
	}

	pub fn get(&self, txid: &TransactionId) -> Option<&Entry> {
		self.primary.get(txid).map(|s| &s.entry)
	}

	pub fn get_by_hash(&self, hash: &TxHash) -> Option<&Entry> {
		self.by_hash.get(hash).and_then(|txid| self.get(txid))
	}

	/// Insert `entry`, which must not already have an entry with the same
	/// id in the store. Keeps all six indices in lockstep.
	pub fn insert(&mut self, entry: Entry) {
		let txid = entry.txid;
		let seq = self.next_seq;
		self.next_seq += 1;

		let fee_key = (Reverse(entry.fee), seq, txid);
		let account_fee_key = (entry.account(), entry.fee, txid);
		let account_token_fee_key = (entry.account(), entry.alt_token, entry.fee, txid);
		let pin_key = (entry.pin_height, txid);
		let height_key = (entry.txheight, txid);
		let txhash = entry.txhash;

		let prev = self.primary.insert(txid, Stored { entry, seq });
		debug_assert!(prev.is_none(), "duplicate txid inserted into store");

		self.by_hash.insert(txhash, txid);
		self.by_fee.insert(fee_key);
		self.by_account_fee.insert(account_fee_key);
		self.by_account_token_fee.insert(account_token_fee_key);
		self.by_pin_height.insert(pin_key);
		self.by_txheight.insert(height_key);

		self.assert_consistent();
	}

	/// Remove the entry identified by `txid` from every index. Returns the
	/// removed entry, or `None` if it was not present.
	pub fn erase(&mut self, txid: &TransactionId) -> Option<Entry> {
		let stored = self.primary.remove(txid)?;
		let Stored { entry, seq } = stored;

		let removed = self.by_hash.remove(&entry.txhash);
		debug_assert!(removed.is_some());
		let removed = self.by_fee.remove(&(Reverse(entry.fee), seq, *txid));
		debug_assert!(removed);
		let removed = self
			.by_account_fee
			.remove(&(entry.account(), entry.fee, *txid));
		debug_assert!(removed);
		let removed = self
			.by_account_token_fee
			.remove(&(entry.account(), entry.alt_token, entry.fee, *txid));
		debug_assert!(removed);
		let removed = self.by_pin_height.remove(&(entry.pin_height, *txid));
		debug_assert!(removed);
		let removed = self.by_txheight.remove(&(entry.txheight, *txid));
		debug_assert!(removed);

		self.assert_consistent();
		Some(entry)
	}

	fn assert_consistent(&self) {
		let n = self.primary.len();
		debug_assert_eq!(n, self.by_hash.len());
		debug_assert_eq!(n, self.by_fee.len());
		debug_assert_eq!(n, self.by_account_fee.len());
		debug_assert_eq!(n, self.by_account_token_fee.len());
		debug_assert_eq!(n, self.by_pin_height.len());
		debug_assert_eq!(n, self.by_txheight.len());
	}

	/// The fee of the currently weakest (lowest-fee) live entry, if any.
	pub fn weakest_fee(&self) -> Option<CompactFee> {
		self.by_fee.iter().next_back().map(|(Reverse(f), _, _)| *f)
	}

	/// The id of the currently weakest (lowest-fee) live entry, if any.
	pub fn weakest_txid(&self) -> Option<TransactionId> {
		self.by_fee.iter().next_back().map(|(_, _, id)| *id)
	}

	/// Entries of `account` in ascending fee order, optionally stopping
	/// before the first entry whose fee is `>= threshold`.
	pub fn by_fee_inc_le<'a>(
		&'a self,
		account: AccountId,
		threshold: Option<CompactFee>,
	) -> impl Iterator<Item = &'a Entry> + 'a {
		let lo = (account, CompactFee(0), TransactionId::new(0, 0));
		let hi = (
			account,
			CompactFee(u64::max_value()),
			TransactionId::new(u64::max_value(), u64::max_value()),
		);
		self.by_account_fee
			.range(lo..=hi)
			.take_while(move |(_, fee, _)| match threshold {
				Some(t) => *fee < t,
				None => true,
			})
			.map(move |(_, _, txid)| self.get(txid).expect("index/primary desync"))
	}

	/// Entries of `(account, token)` in ascending fee order.
	pub fn by_account_token_fee_inc<'a>(
		&'a self,
		account: AccountId,
		token: TokenId,
	) -> impl Iterator<Item = &'a Entry> + 'a {
		let lo = (account, token, CompactFee(0), TransactionId::new(0, 0));
		let hi = (
			account,
			token,
			CompactFee(u64::max_value()),
			TransactionId::new(u64::max_value(), u64::max_value()),
		);
		self.by_account_token_fee
			.range(lo..=hi)
			.map(move |(_, _, _, txid)| self.get(txid).expect("index/primary desync"))
	}

	/// Entries with `txheight >= from_height`, in ascending height order.
	pub fn by_txheight_from<'a>(&'a self, from_height: Height) -> impl Iterator<Item = &'a Entry> + 'a {
		let lo = (from_height, TransactionId::new(0, 0));
		self.by_txheight
			.range(lo..)
			.map(move |(_, txid)| self.get(txid).expect("index/primary desync"))
	}

	/// Entries with `pin_height < before_height`, in ascending pin-height
	/// order.
	pub fn by_pin_height_before<'a>(
		&'a self,
		before_height: Height,
	) -> impl Iterator<Item = &'a Entry> + 'a {
		self.by_pin_height
			.range(..(before_height, TransactionId::new(0, 0)))
			.map(move |(_, txid)| self.get(txid).expect("index/primary desync"))
	}

	/// The effective minimum fee a new entry must clear: the greater of
	/// `policy_min_fee` and a capacity-driven floor (zero while under
	/// `max_size`, one unit above the current weakest fee once full).
	pub fn min_fee(&self, max_size: usize, policy_min_fee: CompactFee) -> CompactFee {
		let floor = if self.len() < max_size {
			CompactFee::smallest()
		} else {
			self.weakest_fee()
				.map(|f| f.next())
				.unwrap_or_else(CompactFee::smallest)
		};
		if policy_min_fee > floor {
			policy_min_fee
		} else {
			floor
		}
	}

	/// Up to `n` `(txid, fee)` pairs drawn from the first
	/// [`SAMPLE_HEAD_WINDOW`] entries by descending fee, optionally
	/// restricted to native-transfer entries. The variant filter is
	/// applied after the head truncation, so fewer than `n` results can be
	/// returned even when more matching entries exist further down the
	/// fee order.
	pub fn sample(&self, n: usize, only_wart_transfer: bool) -> Vec<(TransactionId, CompactFee)> {
		self.by_fee
			.iter()
			.take(SAMPLE_HEAD_WINDOW)
			.take(n)
			.filter_map(|(fee, _, txid)| {
				let entry = self.get(txid)?;
				if only_wart_transfer && !entry.variant.is_wart_transfer() {
					return None;
				}
				Some((*txid, fee.0))
			})
			.collect()
	}

	/// For each `(txid, fee)` advertised by a peer, return the ids worth
	/// requesting: those unknown locally (and at least `min_fee`), or
	/// known locally at a strictly lower fee than advertised.
	pub fn filter_new(
		&self,
		advertised: &[(TransactionId, CompactFee)],
		min_fee: CompactFee,
	) -> Vec<TransactionId> {
		advertised
			.iter()
			.filter_map(|(txid, fee)| match self.get(txid) {
				None => {
					if *fee >= min_fee {
						Some(*txid)
					} else {
						None
					}
				}
				Some(local) => {
					if local.fee < *fee {
						Some(*txid)
					} else {
						None
					}
				}
			})
			.collect()
	}

	/// Drain up to `n` entries in descending fee order for block assembly,
	/// applying the historical compatibility clause and cancelation
	/// coherence. If `hashes` is given, only entries whose hash appears in
	/// it are considered.
	pub fn get_transactions(
		&self,
		n: usize,
		height: Height,
		hashes: Option<&[TxHash]>,
	) -> Vec<Entry> {
		let hash_filter: Option<HashSet<&TxHash>> = hashes.map(|hs| hs.iter().collect());
		let mut emitted: HashSet<TransactionId> = HashSet::new();
		let mut cancelled_targets: HashSet<TransactionId> = HashSet::new();
		let mut out = Vec::new();

		for (_, _, txid) in self.by_fee.iter() {
			if out.len() >= n {
				break;
			}
			let entry = match self.get(txid) {
				Some(e) => e,
				None => continue,
			};
			if is_historically_exempt(entry.account(), height) {
				continue;
			}
			if let Some(ref filter) = hash_filter {
				if !filter.contains(&entry.txhash) {
					continue;
				}
			}
			if emitted.contains(txid) || cancelled_targets.contains(txid) {
				continue;
			}
			if let Some(target) = entry.variant.cancels() {
				if emitted.contains(&target) {
					continue;
				}
				cancelled_targets.insert(target);
			}
			emitted.insert(*txid);
			out.push(entry.clone());
		}

		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use types::TxVariant;

	fn entry(account: u64, nonce: u64, fee: u64, txheight: u64) -> Entry {
		Entry {
			txid: TransactionId::new(account, nonce),
			txhash: TxHash([account as u8; 32]),
			fee: CompactFee(fee),
			txheight,
			pin_height: txheight,
			alt_token: TokenId::Wart,
			wart_spend: 1,
			token_spend: 0,
			variant: TxVariant::WartTransfer,
		}
	}

	#[test]
	fn insert_and_erase_keep_indices_in_sync() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 10, 5));
		store.insert(entry(2, 1, 20, 6));
		assert_eq!(store.len(), 2);
		let removed = store.erase(&TransactionId::new(1, 1));
		assert!(removed.is_some());
		assert_eq!(store.len(), 1);
		assert!(store.get_by_hash(&TxHash([1u8; 32])).is_none());
	}

	#[test]
	fn weakest_fee_tracks_tail() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 10, 1));
		store.insert(entry(2, 1, 5, 1));
		store.insert(entry(3, 1, 20, 1));
		assert_eq!(store.weakest_fee(), Some(CompactFee(5)));
	}

	#[test]
	fn min_fee_steps_up_once_full() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 10, 1));
		assert_eq!(store.min_fee(5, CompactFee::smallest()), CompactFee::smallest());
		assert_eq!(store.min_fee(1, CompactFee::smallest()), CompactFee(11));
	}

	#[test]
	fn by_fee_inc_le_orders_ascending_within_account() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 5, 1));
		store.insert(entry(1, 2, 15, 1));
		store.insert(entry(1, 3, 25, 1));
		let fees: Vec<u64> = store
			.by_fee_inc_le(1, Some(CompactFee(25)))
			.map(|e| e.fee.0)
			.collect();
		assert_eq!(fees, vec![5, 15]);
	}

	#[test]
	fn sample_respects_only_wart_transfer_filter() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 10, 1));
		let mut cancel = entry(2, 1, 20, 1);
		cancel.variant = TxVariant::Cancelation(TransactionId::new(1, 1));
		store.insert(cancel);
		let sampled = store.sample(10, true);
		assert_eq!(sampled.len(), 1);
		assert_eq!(sampled[0].0, TransactionId::new(1, 1));
	}

	#[test]
	fn sample_filters_after_truncating_to_n_not_before() {
		let mut store = TransactionStore::new();
		let mut cancel = entry(1, 1, 20, 1);
		cancel.variant = TxVariant::Cancelation(TransactionId::new(9, 9));
		store.insert(cancel);
		store.insert(entry(2, 1, 10, 1));
		// n=1 selects only the highest-fee entry (the cancelation) before the
		// variant filter runs, so it comes up short rather than skipping
		// ahead to the WartTransfer entry behind it.
		let sampled = store.sample(1, true);
		assert!(sampled.is_empty());
	}

	#[test]
	fn filter_new_flags_unknown_and_lower_fee() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 10, 1));
		let advertised = vec![
			(TransactionId::new(1, 1), CompactFee(20)),
			(TransactionId::new(1, 1), CompactFee(5)),
			(TransactionId::new(9, 9), CompactFee(1)),
			(TransactionId::new(9, 9), CompactFee(50)),
		];
		let wanted = store.filter_new(&advertised, CompactFee(10));
		assert_eq!(
			wanted,
			vec![TransactionId::new(1, 1), TransactionId::new(9, 9)]
		);
	}

	#[test]
	fn get_transactions_applies_historical_exemption() {
		let mut store = TransactionStore::new();
		store.insert(entry(1910, 1, 100, 1));
		store.insert(entry(2, 1, 1, 1));
		let out = store.get_transactions(10, 1_000, None);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].account(), 2);

		let out = store.get_transactions(10, 3_000_000, None);
		assert_eq!(out.len(), 2);
	}

	#[test]
	fn historical_exemption_boundary_is_inclusive() {
		assert!(is_historically_exempt(1910, 2_598_042));
		assert!(!is_historically_exempt(1910, 2_598_043));
	}

	#[test]
	fn get_transactions_hides_cancelation_target() {
		let mut store = TransactionStore::new();
		store.insert(entry(1, 1, 5, 1));
		let mut cancel = entry(2, 1, 50, 1);
		cancel.variant = TxVariant::Cancelation(TransactionId::new(1, 1));
		store.insert(cancel);
		let out = store.get_transactions(10, 1, None);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].txid, TransactionId::new(2, 1));
	}
}
