use host::TabChanges;
use models::TabId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct PendingUpdate {
    changes: TabChanges,
    first_seen: Instant,
    flush_at: Instant,
}

/// Coalesces tab metadata churn (url, title, favicon, container) per tab.
///
/// Each event restarts that tab's debounce timer; a tab navigating in a
/// tight loop never flushes until it settles, and an entry pending longer
/// than the max age is discarded outright rather than applied late.
pub struct TabUpdateDebouncer {
    debounce: Duration,
    max_age: Duration,
    pending: HashMap<TabId, PendingUpdate>,
}

impl TabUpdateDebouncer {
    pub fn new(debounce: Duration, max_age: Duration) -> Self {
        Self {
            debounce,
            max_age,
            pending: HashMap::new(),
        }
    }

    pub fn coalesce(&mut self, tab_id: TabId, changes: TabChanges) {
        if changes.is_empty() {
            return;
        }
        let now = Instant::now();

        match self.pending.get_mut(&tab_id) {
            Some(pending) if now.duration_since(pending.first_seen) > self.max_age => {
                tracing::debug!(tab_id, "stale pending metadata discarded, restarting");
                pending.changes = changes;
                pending.first_seen = now;
                pending.flush_at = now + self.debounce;
            }
            Some(pending) => {
                pending.changes = std::mem::take(&mut pending.changes).merge(changes);
                pending.flush_at = now + self.debounce;
            }
            None => {
                self.pending.insert(
                    tab_id,
                    PendingUpdate {
                        changes,
                        first_seen: now,
                        flush_at: now + self.debounce,
                    },
                );
            }
        }
    }

    /// A closed tab's pending metadata is moot.
    pub fn forget(&mut self, tab_id: TabId) {
        self.pending.remove(&tab_id);
    }

    /// The earliest deadline, for the serve loop's timer.
    pub fn next_flush(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.flush_at).min()
    }

    /// Drain entries whose debounce has settled. Entries past the max age
    /// are dropped, not flushed.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TabId, TabChanges)> {
        let due: Vec<TabId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.flush_at <= now)
            .map(|(&tab_id, _)| tab_id)
            .collect();

        let mut flushed = Vec::new();
        for tab_id in due {
            let pending = self.pending.remove(&tab_id).unwrap();
            if now.duration_since(pending.first_seen) > self.max_age {
                tracing::debug!(tab_id, "pending metadata exceeded max age, dropped");
                continue;
            }
            flushed.push((tab_id, pending.changes));
        }
        flushed
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn title(text: &str) -> TabChanges {
        TabChanges {
            title: Some(text.to_string()),
            ..TabChanges::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn events_coalesce_and_the_timer_restarts() {
        let mut debouncer =
            TabUpdateDebouncer::new(Duration::from_millis(500), Duration::from_secs(5));

        debouncer.coalesce(7, title("one"));
        tokio::time::advance(Duration::from_millis(300)).await;
        debouncer.coalesce(
            7,
            TabChanges {
                url: Some("https://two/".to_string()),
                ..TabChanges::default()
            },
        );

        // 300ms after the second event: the restarted timer is still open.
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(debouncer.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(250)).await;
        let flushed = debouncer.take_due(Instant::now());
        assert_eq!(flushed.len(), 1);
        let (tab_id, changes) = &flushed[0];
        assert_eq!(*tab_id, 7);
        // Both events' fields survive the merge.
        assert_eq!(changes.title.as_deref(), Some("one"));
        assert_eq!(changes.url.as_deref(), Some("https://two/"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_past_the_max_age_are_discarded_not_flushed() {
        let mut debouncer =
            TabUpdateDebouncer::new(Duration::from_millis(500), Duration::from_secs(5));

        // Churn that keeps resetting the debounce for longer than max age.
        debouncer.coalesce(7, title("first"));
        for _ in 0..14 {
            tokio::time::advance(Duration::from_millis(400)).await;
            debouncer.coalesce(7, title("again"));
        }

        // The entry restarted once it went stale; only the fresh tail
        // remains and it flushes normally.
        tokio::time::advance(Duration::from_millis(600)).await;
        let flushed = debouncer.take_due(Instant::now());
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].1.title.as_deref(), Some("again"));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_tabs_are_forgotten() {
        let mut debouncer =
            TabUpdateDebouncer::new(Duration::from_millis(500), Duration::from_secs(5));
        debouncer.coalesce(7, title("one"));
        debouncer.forget(7);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(debouncer.take_due(Instant::now()).is_empty());
        assert_eq!(debouncer.next_flush(), None);
    }
}
