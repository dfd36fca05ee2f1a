//! Sensor ingestion: samples in, attribute writes out.
//!
//! The burner reports `{flame, fan, temperature}` roughly once a
//! second. Samples cross from the ingestion context to the protocol
//! context through a fixed-depth queue; when the protocol side falls
//! behind, the oldest queued sample is dropped - the newest reading is
//! always the one worth keeping.
//!
//! The real feed arrives over UART and is parsed elsewhere; this module
//! only defines the sample type, the queue, and a simulator used for
//! bring-up without the burner attached.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, task::JoinHandle};

use hearth_core::attributes::{AttributePath, AttributeStore, AttributeValue};
use hearth_core::clusters;

/// Fixed sample queue depth.
pub const SENSOR_QUEUE_DEPTH: usize = 8;

/// One burner sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSample {
    /// Flame detected
    pub flame: bool,
    /// Fan speed, percent (clamped to 100)
    pub fan: u8,
    /// Boiler temperature, centidegrees Celsius
    pub temp_centi: i16,
}

struct QueueInner {
    samples: Mutex<VecDeque<SensorSample>>,
    notify: Notify,
}

/// Fixed-depth sample queue between the sensor and protocol contexts.
///
/// Clones share the queue: the ingestion side pushes, the coordinator
/// awaits. Overflow drops the oldest sample.
#[derive(Clone)]
pub struct SensorQueue {
    inner: Arc<QueueInner>,
}

impl Default for SensorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                samples: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Push a sample; on overflow the oldest queued sample is dropped.
    pub fn push(&self, sample: SensorSample) {
        {
            let mut samples =
                self.inner.samples.lock().unwrap_or_else(PoisonError::into_inner);
            if samples.len() >= SENSOR_QUEUE_DEPTH {
                samples.pop_front();
                tracing::warn!("sensor queue full, dropped oldest sample");
            }
            samples.push_back(sample);
        }
        self.inner.notify.notify_one();
    }

    /// Non-blocking pop.
    #[must_use]
    pub fn try_pop(&self) -> Option<SensorSample> {
        self.inner.samples.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    /// Await the next sample.
    pub async fn recv(&self) -> SensorSample {
        loop {
            if let Some(sample) = self.try_pop() {
                return sample;
            }
            self.inner.notify.notified().await;
        }
    }
}

/// Apply one sample to the attribute store.
///
/// The store's compare-and-set semantics make this idempotent: a
/// repeated reading writes nothing and notifies nobody.
pub fn apply_sample(store: &AttributeStore, sample: SensorSample) {
    store.set(
        AttributePath::new(clusters::ENDPOINT_SENSOR, clusters::CLUSTER_ON_OFF, clusters::ATTR_ON_OFF),
        AttributeValue::Bool(sample.flame),
    );
    store.set(
        AttributePath::new(
            clusters::ENDPOINT_SENSOR,
            clusters::CLUSTER_LEVEL_CONTROL,
            clusters::ATTR_CURRENT_LEVEL,
        ),
        AttributeValue::U8(sample.fan.min(100)),
    );
    store.set(
        AttributePath::new(
            clusters::ENDPOINT_SENSOR,
            clusters::CLUSTER_TEMPERATURE,
            clusters::ATTR_MEASURED_VALUE,
        ),
        AttributeValue::I16(sample.temp_centi),
    );
}

/// Spawn a 1 Hz simulated burner for bring-up without hardware.
///
/// Produces a slow firing cycle: ignition, ramp to full fan with
/// rising temperature, then cooldown.
pub fn spawn_simulator(queue: SensorQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick: u32 = 0;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let phase = tick % 120;
            let flame = phase >= 10 && phase < 90;
            let fan = match phase {
                0..=9 => 0,
                10..=29 => ((phase - 10) * 5).min(100) as u8,
                30..=89 => 100,
                _ => 0,
            };
            let temp_centi = match phase {
                0..=9 => 2000,
                10..=89 => (2000 + (phase - 10) * 60).min(7000) as i16,
                _ => (7000 - (phase - 90) * 150).max(2000) as i16,
            };
            queue.push(SensorSample { flame, fan, temp_centi });
            tick = tick.wrapping_add(1);
        }
    })
}
