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

//! In-memory pending-transaction pool for a Warthog node.
//!
//! Holds admitted-but-unconfirmed transactions, enforcing per-account
//! WART and token balance feasibility, replacing lower-fee duplicates,
//! evicting the cheapest entries under capacity pressure, and handing out
//! ordered batches to block producers. See [`Mempool`] for the public
//! entry point.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod blockchain;
pub mod ledger;
pub mod pool;
pub mod store;
pub mod token;
pub mod types;

pub use blockchain::{AssetRecord, DBCache, EraseEvent, EventSink, NoopEventSink, PutEvent};
pub use ledger::{LockedBalance, LockedBalanceLedger};
pub use pool::{AltTokenSpend, Mempool, PendingTx, PoolError};
pub use store::TransactionStore;
pub use token::TokenSpec;
pub use types::{
	AccountId, AccountToken, CompactFee, Entry, Height, PoolConfig, TokenId, TransactionId,
	TxHash, TxVariant, Update,
};
