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

//! The locked-balance ledger: per-(account, token) bookkeeping of how much
//! of the committed balance is reserved by live mempool entries.

use std::collections::BTreeMap;

use types::AccountToken;

/// Available vs. reserved funds for one account/token pair.
///
/// `avail` mirrors the last committed balance seen from chain state;
/// `used` is the sum of amounts referenced by live mempool entries against
/// this row. The row exists only while `used > 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockedBalance {
	avail: u64,
	used: u64,
}

impl LockedBalance {
	pub fn new(avail: u64) -> LockedBalance {
		LockedBalance { avail, used: 0 }
	}

	/// Funds not currently reserved by any mempool entry.
	pub fn free(&self) -> u64 {
		self.avail.saturating_sub(self.used)
	}

	/// Committed balance plus anything already reserved beyond it (should
	/// not occur in a consistent ledger, but `total` never panics).
	pub fn total(&self) -> u64 {
		self.avail.saturating_add(self.used)
	}

	pub fn used(&self) -> u64 {
		self.used
	}

	pub fn is_clean(&self) -> bool {
		self.used == 0
	}

	/// Reserve `amount` against this row. Caller must ensure
	/// `amount <= free()`; violating this is a programming error.
	pub fn lock(&mut self, amount: u64) {
		debug_assert!(amount <= self.free(), "lock exceeds free balance");
		self.used = self.used.saturating_add(amount);
	}

	/// Release a previous reservation. Caller must ensure
	/// `amount <= used()`.
	pub fn unlock(&mut self, amount: u64) {
		debug_assert!(amount <= self.used, "unlock exceeds used balance");
		self.used = self.used.saturating_sub(amount);
	}

	/// Attempt to update the committed balance. Fails (returns `false`)
	/// when the new balance can no longer cover what is already reserved;
	/// the caller must then evict entries before retrying.
	pub fn try_set_avail(&mut self, new_avail: u64) -> bool {
		if self.used > new_avail {
			return false;
		}
		self.avail = new_avail;
		true
	}
}

/// Ordered collection of [`LockedBalance`] rows, one per referenced
/// `(account, token)` pair. Rows are materialized lazily and removed once
/// clean, so iteration never visits a stale entry.
#[derive(Clone, Debug, Default)]
pub struct LockedBalanceLedger {
	rows: BTreeMap<AccountToken, LockedBalance>,
}

impl LockedBalanceLedger {
	pub fn new() -> LockedBalanceLedger {
		LockedBalanceLedger {
			rows: BTreeMap::new(),
		}
	}

	pub fn get(&self, key: &AccountToken) -> Option<&LockedBalance> {
		self.rows.get(key)
	}

	/// Return the row for `key`, materializing it from `committed` if it
	/// does not yet exist.
	pub fn get_or_create(&mut self, key: AccountToken, committed: u64) -> &mut LockedBalance {
		self.rows
			.entry(key)
			.or_insert_with(|| LockedBalance::new(committed))
	}

	/// Lock `amount` against `key`, materializing the row from `committed`
	/// if necessary.
	pub fn lock(&mut self, key: AccountToken, committed: u64, amount: u64) {
		self.get_or_create(key, committed).lock(amount);
	}

	/// Unlock `amount` from `key`'s row and drop the row if it becomes
	/// clean. Returns `true` if the row was removed.
	pub fn unlock(&mut self, key: &AccountToken, amount: u64) -> bool {
		let clean = match self.rows.get_mut(key) {
			Some(row) => {
				row.unlock(amount);
				row.is_clean()
			}
			None => return false,
		};
		if clean {
			self.rows.remove(key);
		}
		clean
	}

	pub fn try_set_avail(&mut self, key: &AccountToken, new_avail: u64) -> Option<bool> {
		self.rows.get_mut(key).map(|row| row.try_set_avail(new_avail))
	}

	pub fn contains(&self, key: &AccountToken) -> bool {
		self.rows.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use types::TokenId;

	fn key() -> AccountToken {
		AccountToken::wart(1)
	}

	#[test]
	fn lock_and_unlock_round_trip() {
		let mut bal = LockedBalance::new(100);
		bal.lock(40);
		assert_eq!(bal.free(), 60);
		assert!(!bal.is_clean());
		bal.unlock(40);
		assert!(bal.is_clean());
	}

	#[test]
	fn try_set_avail_fails_below_used() {
		let mut bal = LockedBalance::new(100);
		bal.lock(80);
		assert!(!bal.try_set_avail(50));
		assert_eq!(bal.total(), 180);
		assert!(bal.try_set_avail(80));
		assert_eq!(bal.total(), 160);
	}

	#[test]
	fn ledger_materializes_row_on_first_lock() {
		let mut ledger = LockedBalanceLedger::new();
		assert!(!ledger.contains(&key()));
		ledger.lock(key(), 100, 30);
		assert!(ledger.contains(&key()));
		assert_eq!(ledger.get(&key()).unwrap().free(), 70);
	}

	#[test]
	fn ledger_removes_row_when_clean() {
		let mut ledger = LockedBalanceLedger::new();
		ledger.lock(key(), 100, 30);
		let removed = ledger.unlock(&key(), 30);
		assert!(removed);
		assert!(!ledger.contains(&key()));
	}

	#[test]
	fn ledger_keeps_distinct_tokens_separate() {
		let mut ledger = LockedBalanceLedger::new();
		let wart = AccountToken::wart(1);
		let tok = AccountToken::new(1, TokenId::Asset(9));
		ledger.lock(wart, 100, 10);
		ledger.lock(tok, 50, 20);
		assert_eq!(ledger.len(), 2);
		assert_eq!(ledger.get(&wart).unwrap().free(), 90);
		assert_eq!(ledger.get(&tok).unwrap().free(), 30);
	}
}
