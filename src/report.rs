//! Named-filter reporting: a plain-text summary of every named `Filter`'s
//! accept/reject counts, in booking order, logged through `tracing` as it
//! is rendered.

use crate::graph::FilterNode;
use std::fmt::Write as _;
use std::sync::Arc;

/// Render one line per named filter, in the order they were booked.
/// Unnamed filters are skipped — they exist only to gate downstream nodes
/// and have nothing for a human reader to key on.
pub fn render(filters: &[Arc<FilterNode>]) -> String {
    let mut out = String::new();
    for filter in filters {
        let Some(name) = filter.name() else { continue };
        let accepted = filter.total_accepted();
        let rejected = filter.total_rejected();
        tracing::info!(filter = name, accepted, rejected, "booked filter stats");
        let _ = writeln!(out, "{name}: accepted={accepted} rejected={rejected}");
    }
    out
}
