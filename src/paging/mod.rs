// SPDX-License-Identifier: Apache-2.0

//! Paged result delivery
//!
//! A submitted query returns its first batch plus a token for the rest.
//! Each fetch consumes the token and hands out a new one while data remains.

pub mod dispatcher;
pub mod token;

pub use dispatcher::{PagedBatch, PagingDispatcher};
pub use token::PagingToken;
