//! Thread-safe metrics collection
//!
//! Atomic counters for the hot paths (event intake, averages, MQTT) and
//! mutex-protected collections for timing samples and per-step statistics.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_TIMING_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Where an event entered the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Http,
    Queue,
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Event intake
    http_events_received: AtomicU64,
    queue_events_received: AtomicU64,
    events_in_flight: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    events_rejected: AtomicU64,

    // Reads
    averages_served: AtomicU64,
    averages_not_found: AtomicU64,
    contract_violations: AtomicU64,

    // MQTT
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,

    processing_times: Mutex<VecDeque<u64>>, // milliseconds
    step_stats: Mutex<HashMap<String, StepStats>>,

    started_at: AtomicU64,
}

#[derive(Debug, Default)]
struct StepStats {
    executions: u64,
    failures: u64,
    execution_times: VecDeque<u64>, // microseconds
    last_execution: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            http_events_received: AtomicU64::new(0),
            queue_events_received: AtomicU64::new(0),
            events_in_flight: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            averages_served: AtomicU64::new(0),
            averages_not_found: AtomicU64::new(0),
            contract_violations: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            processing_times: Mutex::new(VecDeque::new()),
            step_stats: Mutex::new(HashMap::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Event intake
    pub fn event_received(&self, source: EventSource) {
        match source {
            EventSource::Http => &self.http_events_received,
            EventSource::Queue => &self.queue_events_received,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_processing_started(&self) {
        self.events_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_processed(&self, duration: Duration) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.finish_in_flight(duration);
    }

    pub fn event_failed(&self, duration: Duration) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        self.finish_in_flight(duration);
    }

    /// Event refused before processing (malformed payload, validation)
    pub fn event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn finish_in_flight(&self, duration: Duration) {
        // Saturating so a reset during in-flight work cannot wrap the gauge
        let _ = self
            .events_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });

        if let Ok(mut times) = self.processing_times.lock() {
            times.push_back(duration.as_millis() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.pop_front();
            }
        }
    }

    // Reads
    pub fn average_served(&self) {
        self.averages_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn average_not_found(&self) {
        self.averages_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    // Pipeline steps
    pub fn step_executed(&self, step_name: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.step_stats.lock() {
            let entry = stats.entry(step_name.to_string()).or_default();
            entry.executions += 1;
            entry.last_execution = current_timestamp();
            entry.execution_times.push_back(duration.as_micros() as u64);
            if entry.execution_times.len() > MAX_TIMING_SAMPLES {
                entry.execution_times.pop_front();
            }
            if !success {
                entry.failures += 1;
            }
        }
    }

    // MQTT
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (tests only rely on this)
    pub fn reset(&self) {
        for counter in [
            &self.http_events_received,
            &self.queue_events_received,
            &self.events_in_flight,
            &self.events_processed,
            &self.events_failed,
            &self.events_rejected,
            &self.averages_served,
            &self.averages_not_found,
            &self.contract_violations,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.messages_published,
            &self.publish_failures,
            &self.messages_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.started_at.store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.step_stats.lock() {
            stats.clear();
        }
    }

    /// Average and percentiles of recent processing times (pure function)
    fn processing_time_statistics(samples: &VecDeque<u64>) -> (f64, f64, f64, f64) {
        if samples.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn step_snapshot(stats: &StepStats) -> StepStatsSnapshot {
        let avg_execution_time_us = if stats.execution_times.is_empty() {
            0.0
        } else {
            stats.execution_times.iter().sum::<u64>() as f64 / stats.execution_times.len() as f64
        };
        let success_rate = if stats.executions == 0 {
            0.0
        } else {
            (stats.executions - stats.failures) as f64 / stats.executions as f64
        };

        StepStatsSnapshot {
            executions: stats.executions,
            failures: stats.failures,
            avg_execution_time_us,
            last_execution: stats.last_execution,
            success_rate,
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let (avg, p50, p95, p99) = self
            .processing_times
            .lock()
            .map(|times| Self::processing_time_statistics(&times))
            .unwrap_or((0.0, 0.0, 0.0, 0.0));

        let steps = self
            .step_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(name, s)| (name.clone(), Self::step_snapshot(s)))
                    .collect()
            })
            .unwrap_or_default();

        let http = load(&self.http_events_received);
        let queue = load(&self.queue_events_received);

        MetricsSnapshot {
            events: EventMetrics {
                received: http + queue,
                received_http: http,
                received_queue: queue,
                in_flight: load(&self.events_in_flight),
                processed: load(&self.events_processed),
                failed: load(&self.events_failed),
                rejected: load(&self.events_rejected),
                avg_processing_time_ms: avg,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
                processing_time_p99_ms: p99,
            },
            averages: AverageMetrics {
                served: load(&self.averages_served),
                not_found: load(&self.averages_not_found),
                contract_violations: load(&self.contract_violations),
            },
            steps,
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: load(&self.connection_attempts),
                connections_established: load(&self.connections_established),
                connection_failures: load(&self.connection_failures),
                messages_published: load(&self.messages_published),
                publish_failures: load(&self.publish_failures),
                messages_received: load(&self.messages_received),
            },
            uptime_seconds: now.saturating_sub(load(&self.started_at)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub events: EventMetrics,
    pub averages: AverageMetrics,
    pub steps: HashMap<String, StepStatsSnapshot>,
    pub mqtt: MqttMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct EventMetrics {
    pub received: u64,
    pub received_http: u64,
    pub received_queue: u64,
    pub in_flight: u64,
    pub processed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
    pub processing_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct AverageMetrics {
    pub served: u64,
    pub not_found: u64,
    pub contract_violations: u64,
}

#[derive(Debug, Serialize)]
pub struct StepStatsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub avg_execution_time_us: f64,
    pub last_execution: u64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Linear-interpolated percentile over sorted samples
fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
