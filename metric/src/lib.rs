//! Counter and histogram primitives, collected by name in a process-wide [`Registry`].
//!
//! A caller registers a [`Metric`] family once (`registry.register_metric("name", "help")`)
//! and pulls out a per-label handle with `recorder()`; the handle is a cheap `Arc` clone, so
//! it can be stashed on whatever struct updates it without holding the Registry open.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self, clippy::clone_on_ref_ptr)]

use parking_lot::Mutex;
use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// The set of label key/value pairs identifying one observer within a [`Metric`] family.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

impl From<&[(&str, &str)]> for Attributes {
    fn from(pairs: &[(&str, &str)]) -> Self {
        Self(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Attributes {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self::from(pairs.as_slice())
    }
}

/// A handle a [`Metric`] family can hand out, cheap to clone and safe to update
/// concurrently.
pub trait Instrument: Default + Clone + Send + Sync + 'static {}

/// A counter that only ever goes up.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Instrument for U64Counter {}

#[derive(Debug, Default)]
struct DurationHistogramState {
    count: u64,
    total: Duration,
}

/// The count and total of every [`Duration`] recorded against it. Trimmed down from a real
/// bucketed histogram to the pair a mean can be computed from -- this crate doesn't carry an
/// exporter to make percentile buckets worth the bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct DurationHistogram(Arc<Mutex<DurationHistogramState>>);

impl DurationHistogram {
    pub fn record(&self, value: Duration) {
        let mut state = self.0.lock();
        state.count += 1;
        state.total += value;
    }

    pub fn count(&self) -> u64 {
        self.0.lock().count
    }

    pub fn total(&self) -> Duration {
        self.0.lock().total
    }

    pub fn mean(&self) -> Duration {
        let state = self.0.lock();
        if state.count == 0 {
            Duration::ZERO
        } else {
            state.total / state.count as u32
        }
    }
}

impl Instrument for DurationHistogram {}

/// A family of same-named instruments, split by [`Attributes`]. Cloning a `Metric` is cheap
/// and shares the same underlying observers.
#[derive(Debug, Clone)]
pub struct Metric<T> {
    name: &'static str,
    description: &'static str,
    observers: Arc<Mutex<HashMap<Attributes, T>>>,
}

impl<T: Instrument> Metric<T> {
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            observers: Arc::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    /// The observer for `attributes`, creating one on first use.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        self.observers.lock().entry(attributes.into()).or_insert_with(T::default).clone()
    }

    /// The observer for `attributes`, if one has ever been recorded against it.
    pub fn get_observer(&self, attributes: &Attributes) -> Option<T> {
        self.observers.lock().get(attributes).cloned()
    }
}

/// A process-wide table of named [`Metric`] families. Instruments are looked up by name and
/// downcast to the caller's expected type; registering the same name twice with the same
/// type returns the existing family, so every caller shares one set of observers.
#[derive(Debug, Default)]
pub struct Registry {
    instruments: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch) the `T`-instrument family named `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` was already registered with a different instrument type -- a
    /// programmer error, not a runtime condition callers need to recover from.
    pub fn register_metric<T: Instrument>(&self, name: &'static str, description: &'static str) -> Metric<T> {
        let mut instruments = self.instruments.lock();
        let entry = instruments
            .entry(name)
            .or_insert_with(|| Box::new(Metric::<T>::new(name, description)));
        entry
            .downcast_ref::<Metric<T>>()
            .unwrap_or_else(|| panic!("metric {name:?} already registered with a different instrument type"))
            .clone()
    }

    /// The `T`-instrument family named `name`, if one has been registered.
    pub fn get_instrument<T: Instrument>(&self, name: &str) -> Option<Metric<T>> {
        self.instruments.lock().get(name).and_then(|entry| entry.downcast_ref::<Metric<T>>()).cloned()
    }
}
