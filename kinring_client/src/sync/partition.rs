//! Pure derivations over a mirrored snapshot and the current user's identity.
//! Every function here must be recomputed per snapshot and keep no state of
//! its own; the only "already shown" memory lives in the services' explicit
//! dismiss slots.

use crate::models::Role;
use chrono::{DateTime, Duration, Utc};

/// Items belonging to one role, source order preserved.
pub fn role_subset<T: Clone>(items: &[T], role: Role, role_of: impl Fn(&T) -> Role) -> Vec<T> {
    items
        .iter()
        .filter(|item| role_of(item) == role)
        .cloned()
        .collect()
}

pub fn find_by_role<T>(items: &[T], role: Role, role_of: impl Fn(&T) -> Role) -> Option<&T> {
    items.iter().find(|item| role_of(item) == role)
}

/// The one most relevant unread item: first entry of the newest-first
/// snapshot not authored by the current user whose age is strictly inside the
/// freshness window. An item exactly `window` old is excluded.
pub fn latest_unread<'a, T>(
    items: &'a [T],
    now: DateTime<Utc>,
    window: Duration,
    mine: impl Fn(&T) -> bool,
    timestamp: impl Fn(&T) -> Option<DateTime<Utc>>,
) -> Option<&'a T> {
    items.iter().find(|item| {
        if mine(item) {
            return false;
        }
        match timestamp(item) {
            Some(ts) => now - ts < window,
            None => false,
        }
    })
}

/// First item from another user that has not been viewed yet (photos).
pub fn first_unviewed<'a, T>(
    items: &'a [T],
    mine: impl Fn(&T) -> bool,
    viewed: impl Fn(&T) -> bool,
) -> Option<&'a T> {
    items.iter().find(|item| !mine(item) && !viewed(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: &'static str,
        author: &'static str,
        role: Role,
        sent_at: DateTime<Utc>,
        viewed: bool,
    }

    fn at(now: DateTime<Utc>, millis_ago: i64) -> DateTime<Utc> {
        now - Duration::milliseconds(millis_ago)
    }

    fn sample(now: DateTime<Utc>) -> Vec<Item> {
        vec![
            Item {
                id: "mine",
                author: "me",
                role: Role::Senior,
                sent_at: at(now, 1_000),
                viewed: false,
            },
            Item {
                id: "fresh",
                author: "other",
                role: Role::Relative,
                sent_at: at(now, 59_999),
                viewed: false,
            },
            Item {
                id: "stale",
                author: "other",
                role: Role::Relative,
                sent_at: at(now, 60_000),
                viewed: true,
            },
        ]
    }

    #[test]
    fn freshness_window_boundary_is_exclusive() {
        let now = Utc::now();
        let items = sample(now);
        let window = Duration::seconds(60);

        let hit = latest_unread(
            &items,
            now,
            window,
            |i| i.author == "me",
            |i| Some(i.sent_at),
        );
        // 59.999s old is in, exactly 60.000s old is out, my own item never counts.
        assert_eq!(hit.map(|i| i.id), Some("fresh"));

        let only_boundary = vec![items[2].clone()];
        let miss = latest_unread(
            &only_boundary,
            now,
            window,
            |i| i.author == "me",
            |i| Some(i.sent_at),
        );
        assert!(miss.is_none());
    }

    #[test]
    fn partitioning_is_pure() {
        let now = Utc::now();
        let items = sample(now);

        let first = role_subset(&items, Role::Relative, |i| i.role);
        let second = role_subset(&items, Role::Relative, |i| i.role);
        assert_eq!(first, second);
        // Source order preserved.
        assert_eq!(first[0].id, "fresh");
        assert_eq!(first[1].id, "stale");

        let a = latest_unread(&items, now, Duration::seconds(60), |i| i.author == "me", |i| {
            Some(i.sent_at)
        })
        .map(|i| i.id);
        let b = latest_unread(&items, now, Duration::seconds(60), |i| i.author == "me", |i| {
            Some(i.sent_at)
        })
        .map(|i| i.id);
        assert_eq!(a, b);
    }

    #[test]
    fn first_unviewed_skips_own_and_viewed_items() {
        let now = Utc::now();
        let items = sample(now);
        let hit = first_unviewed(&items, |i| i.author == "me", |i| i.viewed);
        assert_eq!(hit.map(|i| i.id), Some("fresh"));
    }

    #[test]
    fn items_without_timestamp_are_never_fresh() {
        let now = Utc::now();
        let items = sample(now);
        let hit = latest_unread(
            &items,
            now,
            Duration::seconds(60),
            |i| i.author == "me",
            |_| None,
        );
        assert!(hit.is_none());
    }
}
