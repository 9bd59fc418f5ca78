//! Tollgate Common - Shared money primitives for the billing engine
//!
//! This crate provides the value objects every billing component agrees on:
//! - Integer minor-unit amounts tagged with a currency
//! - Case-insensitive currency codes
//! - The single rounding policy (half away from zero on minor units)
//! - Error handling
//!
//! # Value Objects
//!
//! Amounts are never floating point. A [`Money`] is an `i64` count of minor
//! units (cents) and can only be combined with another [`Money`] of the same
//! [`Currency`]. Anything that scales an amount by a ratio (exchange rates,
//! tax, percentage discounts) goes through [`apply_ratio`] so rounding happens
//! in exactly one place.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod money;

pub use error::*;
pub use money::*;
