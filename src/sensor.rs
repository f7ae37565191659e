//! Measurement sources and the sensor that packs their readings

use crate::protocol::senml::{Pack, Record};

/// One scalar reading taken from a measurement source
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// Pluggable synchronous sampler
pub trait MeasurementSource: Send + Sync {
    fn sample(&self) -> Measurement;
}

/// Samples a voltage uniformly distributed in `[0, 1)` volts
#[derive(Debug, Default, Clone)]
pub struct RandomVoltageSource;

impl MeasurementSource for RandomVoltageSource {
    fn sample(&self) -> Measurement {
        Measurement::new("voltage", rand::random::<f64>(), "v")
    }
}

/// Always returns the same reading
#[derive(Debug, Clone)]
pub struct FixedSource(pub Measurement);

impl MeasurementSource for FixedSource {
    fn sample(&self) -> Measurement {
        self.0.clone()
    }
}

/// A named sensor family; every record it builds carries its base name
#[derive(Debug, Clone)]
pub struct Sensor {
    base_name: String,
}

impl Sensor {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn record(&self, measurement: &Measurement) -> Record {
        Record::build(
            &measurement.name,
            measurement.value,
            &measurement.unit,
            &self.base_name,
        )
    }

    /// Pack holding exactly one record for `measurement`
    pub fn pack(&self, measurement: &Measurement) -> Pack {
        Pack::from(self.record(measurement))
    }
}
