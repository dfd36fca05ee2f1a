//! Subscription table with interval gating.
//!
//! A subscription asks for reports on one attribute path, bounded by a
//! minimum and maximum interval: a change is reported no sooner than
//! `min_interval` after the previous report, and silence never lasts
//! past `max_interval`. Change-driven and deadline-driven reporting
//! share the `last_report` stamp, so together the pair bounds the
//! spacing of every report for a healthy subscription.
//!
//! Time is passed in as milliseconds; nothing here reads a clock.

use crate::attributes::AttributePath;
use crate::error::CoreError;

/// Fixed subscription table capacity.
pub const MAX_SUBSCRIPTIONS: usize = 10;

/// One live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Process-unique id, monotone from 1
    pub id: u32,
    /// Session the reports are sealed under
    pub session_id: u16,
    /// Watched attribute path
    pub path: AttributePath,
    /// Floor on inter-report spacing, seconds
    pub min_interval_s: u16,
    /// Ceiling on report silence, seconds
    pub max_interval_s: u16,
    last_report_ms: u64,
}

/// Fixed-capacity subscription table.
///
/// Ids increase monotonically for the lifetime of the process and are
/// never reused, so a stale report can always be told from a report
/// for a replacement subscription.
#[derive(Debug)]
pub struct SubscriptionManager {
    subscriptions: Vec<Subscription>,
    next_id: u32,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Empty table; the first subscription gets id 1.
    #[must_use]
    pub fn new() -> Self {
        Self { subscriptions: Vec::new(), next_id: 1 }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// True if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Look up a subscription by id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.id == id)
    }

    /// Register a subscription.
    ///
    /// Unless `keep_existing`, the session's previous subscriptions are
    /// dropped first (the Matter default for a new subscribe request).
    /// The max interval is raised to the min if the request inverted
    /// them. Returns the new subscription's id.
    ///
    /// # Errors
    ///
    /// [`CoreError::ResourceExhausted`] when the table is full.
    pub fn register(
        &mut self,
        session_id: u16,
        path: AttributePath,
        min_interval_s: u16,
        max_interval_s: u16,
        keep_existing: bool,
        now_ms: u64,
    ) -> Result<u32, CoreError> {
        if !keep_existing {
            self.remove_session(session_id);
        }
        if self.subscriptions.len() >= MAX_SUBSCRIPTIONS {
            return Err(CoreError::ResourceExhausted {
                resource: "subscriptions",
                capacity: MAX_SUBSCRIPTIONS,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            session_id,
            path,
            min_interval_s,
            max_interval_s: max_interval_s.max(min_interval_s),
            last_report_ms: now_ms,
        });
        tracing::debug!(id, session_id, ?path, "subscription registered");
        Ok(id)
    }

    /// Subscriptions due a change report for `path`.
    ///
    /// A subscription is due when its min interval has elapsed since
    /// its last report; due subscriptions are stamped immediately so a
    /// burst of changes cannot double-report.
    pub fn on_change(&mut self, path: AttributePath, now_ms: u64) -> Vec<u32> {
        let mut due = Vec::new();
        for sub in &mut self.subscriptions {
            if sub.path == path
                && now_ms.saturating_sub(sub.last_report_ms)
                    >= u64::from(sub.min_interval_s) * 1000
            {
                sub.last_report_ms = now_ms;
                due.push(sub.id);
            }
        }
        due
    }

    /// Subscriptions whose max interval has elapsed without a report.
    ///
    /// Called periodically from the protocol loop; stamps and returns
    /// the due ids so the caller emits an unchanged-value report.
    pub fn due_max_interval(&mut self, now_ms: u64) -> Vec<u32> {
        let mut due = Vec::new();
        for sub in &mut self.subscriptions {
            if now_ms.saturating_sub(sub.last_report_ms) >= u64::from(sub.max_interval_s) * 1000 {
                sub.last_report_ms = now_ms;
                due.push(sub.id);
            }
        }
        due
    }

    /// Remove one subscription. Returns false if the id is unknown.
    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Drop every subscription riding on a session (session close).
    pub fn remove_session(&mut self, session_id: u16) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.session_id != session_id);
        before - self.subscriptions.len()
    }

    /// Drop everything (device reset).
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> AttributePath {
        AttributePath::new(1, 0x0008, 0)
    }

    fn other_path() -> AttributePath {
        AttributePath::new(1, 0x0402, 0)
    }

    #[test]
    fn ids_are_monotone_from_one() {
        let mut subs = SubscriptionManager::new();
        let a = subs.register(1, path(), 1, 10, true, 0).unwrap();
        let b = subs.register(1, other_path(), 1, 10, true, 0).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        // Ids are never reused, even after removal.
        subs.remove(b);
        let c = subs.register(1, other_path(), 1, 10, true, 0).unwrap();
        assert_eq!(c, 3);
    }

    #[test]
    fn eleventh_subscription_is_rejected() {
        let mut subs = SubscriptionManager::new();
        for i in 0..MAX_SUBSCRIPTIONS {
            subs.register(1, AttributePath::new(1, 0x0008, i as u32), 1, 10, true, 0).unwrap();
        }
        assert!(matches!(
            subs.register(1, path(), 1, 10, true, 0),
            Err(CoreError::ResourceExhausted { resource: "subscriptions", .. })
        ));

        // Removing one frees exactly one slot.
        assert!(subs.remove(1));
        subs.register(1, path(), 1, 10, true, 0).unwrap();
        assert!(matches!(
            subs.register(1, path(), 1, 10, true, 0),
            Err(CoreError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn min_interval_gates_change_reports() {
        let mut subs = SubscriptionManager::new();
        let id = subs.register(1, path(), 1, 10, true, 0).unwrap();

        // 500 ms after registration: too soon.
        assert!(subs.on_change(path(), 500).is_empty());
        // 1s: due.
        assert_eq!(subs.on_change(path(), 1000), vec![id]);
        // 1.5s: only 500ms since last report.
        assert!(subs.on_change(path(), 1500).is_empty());
        // 2s: due again.
        assert_eq!(subs.on_change(path(), 2000), vec![id]);
    }

    #[test]
    fn changes_on_other_paths_do_not_match() {
        let mut subs = SubscriptionManager::new();
        subs.register(1, path(), 0, 10, true, 0).unwrap();
        assert!(subs.on_change(other_path(), 5000).is_empty());
    }

    #[test]
    fn max_interval_fires_without_changes() {
        let mut subs = SubscriptionManager::new();
        let id = subs.register(1, path(), 1, 10, true, 0).unwrap();

        assert!(subs.due_max_interval(9_999).is_empty());
        assert_eq!(subs.due_max_interval(10_000), vec![id]);
        // Stamped: not due again until another max interval passes.
        assert!(subs.due_max_interval(15_000).is_empty());
        assert_eq!(subs.due_max_interval(20_000), vec![id]);
    }

    #[test]
    fn change_report_defers_max_interval() {
        let mut subs = SubscriptionManager::new();
        let id = subs.register(1, path(), 1, 10, true, 0).unwrap();

        assert_eq!(subs.on_change(path(), 8_000), vec![id]);
        // Max deadline now counts from the change report.
        assert!(subs.due_max_interval(10_000).is_empty());
        assert_eq!(subs.due_max_interval(18_000), vec![id]);
    }

    #[test]
    fn new_subscribe_replaces_session_subscriptions() {
        let mut subs = SubscriptionManager::new();
        subs.register(7, path(), 1, 10, true, 0).unwrap();
        subs.register(7, other_path(), 1, 10, false, 0).unwrap();

        assert_eq!(subs.len(), 1);
        assert_eq!(subs.get(2).map(|s| s.path), Some(other_path()));
    }

    #[test]
    fn keep_existing_preserves_session_subscriptions() {
        let mut subs = SubscriptionManager::new();
        subs.register(7, path(), 1, 10, true, 0).unwrap();
        subs.register(7, other_path(), 1, 10, true, 0).unwrap();
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn session_close_drops_its_subscriptions() {
        let mut subs = SubscriptionManager::new();
        subs.register(1, path(), 1, 10, true, 0).unwrap();
        subs.register(2, other_path(), 1, 10, true, 0).unwrap();

        assert_eq!(subs.remove_session(1), 1);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.get(2).map(|s| s.session_id), Some(2));
    }

    #[test]
    fn inverted_intervals_are_clamped() {
        let mut subs = SubscriptionManager::new();
        let id = subs.register(1, path(), 30, 10, true, 0).unwrap();
        assert_eq!(subs.get(id).map(|s| s.max_interval_s), Some(30));
    }

    #[test]
    fn clear_empties_the_table() {
        let mut subs = SubscriptionManager::new();
        subs.register(1, path(), 1, 10, true, 0).unwrap();
        subs.clear();
        assert!(subs.is_empty());
    }
}
