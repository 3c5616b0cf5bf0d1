//! Application context
//!
//! One [`Context`] holds the frozen registry, the bus masters with their
//! presence and directory caches, the value cache, the live timeout and
//! unit settings and the engine counters. Every operation takes it by
//! reference; there is no process-wide state.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use owfs_bus::{BusList, BusMaster};
use owfs_core::{
    Clock, CodecOptions, Encoding, EngineStats, Registry, SystemClock, TemperatureScale, Timeouts,
    ValueCache,
};
use owfs_discovery::Scanner;

#[derive(Debug)]
pub struct Context {
    registry: Arc<Registry>,
    scanner: Scanner,
    values: ValueCache,
    timeouts: Arc<Timeouts>,
    scale: RwLock<TemperatureScale>,
    stats: Arc<EngineStats>,
    clock: Arc<dyn Clock>,
    started: Instant,
    version: String,
}

impl Context {
    pub fn builder(registry: Registry, buses: BusList) -> ContextBuilder {
        ContextBuilder {
            registry,
            buses,
            timeouts: Timeouts::default(),
            clock: Arc::new(SystemClock),
            scale: TemperatureScale::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn buses(&self) -> &BusList {
        self.scanner.buses()
    }

    pub fn bus(&self, index: usize) -> Option<&Arc<BusMaster>> {
        self.scanner.buses().get(index)
    }

    pub fn values(&self) -> &ValueCache {
        &self.values
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn scale(&self) -> TemperatureScale {
        *self.scale.read()
    }

    pub fn set_scale(&self, scale: TemperatureScale) {
        *self.scale.write() = scale;
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn uptime(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Codec settings for a query using `encoding`
    pub fn codec(&self, encoding: Encoding) -> CodecOptions {
        CodecOptions {
            encoding,
            scale: self.scale(),
        }
    }
}

/// Startup configuration of a [`Context`]
pub struct ContextBuilder {
    registry: Registry,
    buses: BusList,
    timeouts: Timeouts,
    clock: Arc<dyn Clock>,
    scale: TemperatureScale,
    version: String,
}

impl ContextBuilder {
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scale(mut self, scale: TemperatureScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn build(self) -> Context {
        let timeouts = Arc::new(self.timeouts);
        let stats = Arc::new(EngineStats::default());
        let scanner = Scanner::new(
            Arc::new(self.buses),
            timeouts.clone(),
            self.clock.clone(),
            stats.clone(),
        );
        Context {
            registry: Arc::new(self.registry),
            scanner,
            values: ValueCache::new(timeouts.clone(), self.clock.clone()),
            timeouts,
            scale: RwLock::new(self.scale),
            stats,
            started: self.clock.now(),
            clock: self.clock,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owfs_core::{catalog, ManualClock, TtlClass};

    #[test]
    fn test_builder_applies_settings() {
        let clock = Arc::new(ManualClock::default());
        let ctx = Context::builder(catalog::registry(), BusList::new())
            .timeouts(Timeouts::new(1, 2, 3, 4))
            .clock(clock.clone())
            .scale(TemperatureScale::Kelvin)
            .version("9.9.9")
            .build();

        assert_eq!(ctx.timeouts().seconds(TtlClass::Directory), 3);
        assert_eq!(ctx.scale(), TemperatureScale::Kelvin);
        assert_eq!(ctx.version(), "9.9.9");
        assert!(ctx.buses().is_empty());

        clock.advance(Duration::from_secs(42));
        assert_eq!(ctx.uptime(), Duration::from_secs(42));
    }

    #[test]
    fn test_scale_is_live() {
        let ctx = Context::builder(catalog::registry(), BusList::new()).build();
        ctx.set_scale(TemperatureScale::Fahrenheit);
        assert_eq!(ctx.codec(Encoding::Text).scale, TemperatureScale::Fahrenheit);
    }
}
