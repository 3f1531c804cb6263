//! Shared primitive types used across the ledger.

/// A stable, unique identifier for a user (UUID v4, hyphenated).
pub type UserId = String;

/// Row id of a ledger entry. Monotonic in insertion order.
pub type EntryId = i64;

/// The single logical currency.
pub type Points = i64;

/// Commission axis for referral payouts.
pub type Cents = i64;

/// An identifier from an upstream payment notification.
pub type ExternalEventId = String;
