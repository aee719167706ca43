//! Metrics registry for the broadcast layer.
//!
//! Labels are flattened into sorted key vectors to keep rendering
//! deterministic. The publish histogram uses fixed microsecond buckets.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_str(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        if v == 0 {
            return;
        }
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn contains(&self, labels: &[(&str, &str)]) -> bool {
        self.map.contains_key(&label_key(labels))
    }

    /// Number of label combinations seen.
    pub fn series(&self) -> usize {
        self.map.len()
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        let mut rows: Vec<(String, u64)> = self
            .map
            .iter()
            .map(|r| (label_str(r.key()), r.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort();
        for (labels, val) in rows {
            if labels.is_empty() {
                let _ = writeln!(out, "{} {}", name, val);
            } else {
                let _ = writeln!(out, "{}{{{}}} {}", name, labels, val);
            }
        }
    }
}

// 10us, 50us, 100us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms
const BUCKETS_MICROS: [u64; 9] = [10, 50, 100, 500, 1_000, 5_000, 10_000, 50_000, 100_000];

/// Unlabeled histogram, microsecond scale.
#[derive(Default)]
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 9],
}

impl Histogram {
    pub fn observe(&self, d: Duration) {
        let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(micros, Ordering::Relaxed);
        for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= le {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
            let n = self.buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, le, n);
        }
        let count = self.count();
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(out, "{}_sum {}", name, self.sum.load(Ordering::Relaxed));
        let _ = writeln!(out, "{}_count {}", name, count);
    }
}

/// Distinct topic label values tracked before the rest fold into `OTHER_TOPIC`.
pub const MAX_TOPIC_SERIES: usize = 64;
pub const OTHER_TOPIC: &str = "_other";

#[derive(Default)]
pub struct BroadcastMetrics {
    pub ws_upgrades: CounterVec,
    pub handshake_rejections: CounterVec,
    pub connections_closed: CounterVec,
    pub events_published: CounterVec,
    pub deliveries: CounterVec,
    pub publish_duration: Histogram,
}

impl BroadcastMetrics {
    /// Count one published event, keeping the topic label set bounded.
    pub fn record_published(&self, topic: &str) {
        let labels = [("topic", topic)];
        let label = if self.events_published.contains(&labels)
            || self.events_published.series() < MAX_TOPIC_SERIES
        {
            topic
        } else {
            OTHER_TOPIC
        };
        self.events_published.inc(&[("topic", label)]);
    }

    /// Render everything, then append `extra` as plain `name value` lines.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.ws_upgrades.render("sessioncast_ws_upgrades_total", &mut out);
        self.handshake_rejections.render("sessioncast_handshake_rejections_total", &mut out);
        self.connections_closed.render("sessioncast_connections_closed_total", &mut out);
        self.events_published.render("sessioncast_events_published_total", &mut out);
        self.deliveries.render("sessioncast_deliveries_total", &mut out);
        self.publish_duration.render("sessioncast_publish_duration_micros", &mut out);
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_labels_are_order_insensitive() {
        let c = CounterVec::default();
        c.inc(&[("a", "1"), ("b", "2")]);
        c.inc(&[("b", "2"), ("a", "1")]);
        assert_eq!(c.get(&[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn render_contains_labeled_deliveries() {
        let m = BroadcastMetrics::default();
        m.deliveries.add(&[("outcome", "delivered")], 3);
        m.deliveries.add(&[("outcome", "pruned")], 1);
        m.publish_duration.observe(Duration::from_micros(40));
        let text = m.render(&[("sessioncast_connections_active", 2)]);
        assert!(text.contains("sessioncast_deliveries_total{outcome=\"delivered\"} 3"));
        assert!(text.contains("sessioncast_deliveries_total{outcome=\"pruned\"} 1"));
        assert!(text.contains("sessioncast_publish_duration_micros_bucket{le=\"50\"} 1"));
        assert!(text.contains("sessioncast_publish_duration_micros_bucket{le=\"10\"} 0"));
        assert!(text.ends_with("sessioncast_connections_active 2\n"));
    }

    #[test]
    fn topic_series_are_capped() {
        let m = BroadcastMetrics::default();
        for i in 0..(MAX_TOPIC_SERIES * 2) {
            m.record_published(&format!("topic-{i}"));
        }
        m.record_published("topic-0");
        assert_eq!(m.events_published.series(), MAX_TOPIC_SERIES + 1);
        assert_eq!(m.events_published.get(&[("topic", "topic-0")]), 2);
        assert_eq!(m.events_published.get(&[("topic", OTHER_TOPIC)]), MAX_TOPIC_SERIES as u64);
    }

    #[test]
    fn escapes_quotes_in_topic_labels() {
        let m = BroadcastMetrics::default();
        m.record_published("a\"b");
        assert!(m.render(&[]).contains("topic=\"a\\\"b\""));
    }
}
