//! Subject names and wildcard matching.
//!
//! Patterns:
//! - `"*"` or `">"` match every subject
//! - a trailing `*` or `>` matches by prefix (`"purchase_order.*"`, `"ddmrp.>"`)
//! - anything else must match exactly

pub const BUFFER_CREATED: &str = "ddmrp.buffer.created";
pub const BUFFER_CALCULATED: &str = "ddmrp.buffer.calculated";
pub const BUFFER_STATUS_CHANGED: &str = "ddmrp.buffer.status_changed";
pub const BUFFER_ALERT_TRIGGERED: &str = "ddmrp.buffer.alert_triggered";
pub const BUFFER_ZONE_CHANGED: &str = "ddmrp.buffer.zone_changed";

pub const FAD_CREATED: &str = "ddmrp.fad.created";
pub const FAD_UPDATED: &str = "ddmrp.fad.updated";
pub const FAD_DELETED: &str = "ddmrp.fad.deleted";
pub const FAD_APPLIED: &str = "ddmrp.fad.applied";

pub const ADU_CALCULATED: &str = "ddmrp.adu.calculated";

pub const REPLENISHMENT_ORDER_CREATED: &str = "execution.replenishment.order_created";

/// Every subject this engine publishes under.
pub const DDMRP_ALL: &str = "ddmrp.>";

pub fn matches(pattern: &str, subject: &str) -> bool {
    if pattern == "*" || pattern == ">" {
        return true;
    }
    match pattern.strip_suffix('*').or_else(|| pattern.strip_suffix('>')) {
        Some(prefix) => subject.starts_with(prefix),
        None => pattern == subject,
    }
}

/// Ranking used to pick one handler when several patterns match.
///
/// Exact patterns beat prefix patterns; longer prefixes beat shorter ones;
/// catch-alls rank last.
pub fn specificity(pattern: &str) -> usize {
    if pattern == "*" || pattern == ">" {
        return 0;
    }
    if pattern.ends_with('*') || pattern.ends_with('>') {
        pattern.len()
    } else {
        usize::MAX
    }
}

/// The most specific of `patterns` that matches `subject`.
pub fn best_match<'a, I>(patterns: I, subject: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    patterns
        .into_iter()
        .filter(|p| matches(p, subject))
        .max_by_key(|p| specificity(p))
}
