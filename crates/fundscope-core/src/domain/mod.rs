//! Domain types for fund holdings.
//!
//! | Type | Lifecycle |
//! |------|-----------|
//! | [`Holding`] | created by a parser, consumed by enrichment |
//! | [`GoldHolding`] | produced by enrichment, frozen into a versioned snapshot |
//! | [`GoldRecord`] | flat CSV row of a persisted snapshot |
//! | [`Isin`], [`Cik`] | validated identifiers |

pub mod holding;
pub mod identifiers;

pub use holding::{AssetClass, GoldHolding, GoldRecord, Holding};
pub use identifiers::{Cik, Isin};
