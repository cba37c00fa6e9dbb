//! Fixed channel naming scheme for domain events.
//!
//! The topic hierarchy is flat and deliberate; business code never builds
//! channel names by hand. Cafe topics carry order flow for a whole cafe,
//! counter topics address a single service counter, order topics follow one
//! order through its lifecycle.

/// Channel for new/changed orders of a cafe: `cafe:{id}:orders`.
pub fn cafe_orders(cafe_id: &str) -> String {
    format!("cafe:{cafe_id}:orders")
}

/// Channel for kitchen tickets of a cafe: `cafe:{id}:kitchen`.
pub fn cafe_kitchen(cafe_id: &str) -> String {
    format!("cafe:{cafe_id}:kitchen")
}

/// Channel for counter notifications: `counter:{id}:notifications`.
pub fn counter_notifications(counter_id: &str) -> String {
    format!("counter:{counter_id}:notifications")
}

/// Channel for counter assignments: `counter:{id}:assignments`.
pub fn counter_assignments(counter_id: &str) -> String {
    format!("counter:{counter_id}:assignments")
}

/// Channel for status updates of one order: `order:{id}:status`.
pub fn order_status(order_id: &str) -> String {
    format!("order:{order_id}:status")
}

/// Channel for assignment changes of one order: `order:{id}:assignment`.
pub fn order_assignment(order_id: &str) -> String {
    format!("order:{order_id}:assignment")
}

/// Prefix matching every topic of a cafe: `cafe:{id}:`.
pub fn cafe_prefix(cafe_id: &str) -> String {
    format!("cafe:{cafe_id}:")
}

/// Prefix matching every topic of a counter: `counter:{id}:`.
pub fn counter_prefix(counter_id: &str) -> String {
    format!("counter:{counter_id}:")
}

/// Prefix matching every topic of an order: `order:{id}:`.
pub fn order_prefix(order_id: &str) -> String {
    format!("order:{order_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_scheme() {
        assert_eq!(cafe_orders("c1"), "cafe:c1:orders");
        assert_eq!(cafe_kitchen("c1"), "cafe:c1:kitchen");
        assert_eq!(counter_notifications("k2"), "counter:k2:notifications");
        assert_eq!(counter_assignments("k2"), "counter:k2:assignments");
        assert_eq!(order_status("o3"), "order:o3:status");
        assert_eq!(order_assignment("o3"), "order:o3:assignment");
    }

    #[test]
    fn test_prefixes_cover_their_topics() {
        assert!(cafe_orders("c1").starts_with(&cafe_prefix("c1")));
        assert!(cafe_kitchen("c1").starts_with(&cafe_prefix("c1")));
        assert!(counter_notifications("k1").starts_with(&counter_prefix("k1")));
        assert!(order_status("o1").starts_with(&order_prefix("o1")));
        // A different id never matches.
        assert!(!cafe_orders("c2").starts_with(&cafe_prefix("c1")));
    }
}
