//! Per-operation time budgets.
//!
//! Timeouts surface as retriable failures; the subscriber loop handles the
//! redelivery.

use std::time::Duration;

/// Broker publish budget.
pub const PUBLISH: Duration = Duration::from_secs(5);

/// Storage round-trip budget.
pub const STORE_QUERY: Duration = Duration::from_secs(10);

/// Vector top-K search budget.
pub const VECTOR_SEARCH: Duration = Duration::from_secs(5);

/// Geometric verification budget, per candidate pair.
pub const GEOMETRY_PER_PAIR: Duration = Duration::from_secs(2);
