//! Fan-out publishers for the fixed topic hierarchy.
//!
//! Each helper publishes one logical event to every channel whose audience
//! cares: the per-order topic for direct watchers, the cafe feed for
//! dashboards, the counter topic for staff stations. Channels are attempted
//! independently and the returned count is the sum of per-channel subscriber
//! counts; see [`PubSubEngine::fan_out`].

use tabletap_core::events::topics;

use crate::pubsub::PubSubEngine;

impl PubSubEngine {
    /// Announce a new order on the cafe's order feed and kitchen queue.
    pub async fn publish_order_created(&self, cafe_id: &str, data: serde_json::Value) -> u64 {
        self.fan_out(
            &[topics::cafe_orders(cafe_id), topics::cafe_kitchen(cafe_id)],
            data,
        )
        .await
    }

    /// Announce an order status change on the order topic and the cafe feed.
    pub async fn publish_order_status(
        &self,
        cafe_id: &str,
        order_id: &str,
        data: serde_json::Value,
    ) -> u64 {
        self.fan_out(
            &[topics::order_status(order_id), topics::cafe_orders(cafe_id)],
            data,
        )
        .await
    }

    /// Announce an order being assigned to a counter: the order topic, the
    /// counter's assignment queue and the cafe feed.
    pub async fn publish_order_assignment(
        &self,
        cafe_id: &str,
        order_id: &str,
        counter_id: &str,
        data: serde_json::Value,
    ) -> u64 {
        self.fan_out(
            &[
                topics::order_assignment(order_id),
                topics::counter_assignments(counter_id),
                topics::cafe_orders(cafe_id),
            ],
            data,
        )
        .await
    }

    /// Notify one counter's station.
    pub async fn publish_counter_notification(
        &self,
        counter_id: &str,
        data: serde_json::Value,
    ) -> u64 {
        self.fan_out(&[topics::counter_notifications(counter_id)], data).await
    }
}
