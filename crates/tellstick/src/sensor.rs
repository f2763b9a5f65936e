//! Sensor wrapper

use tellstick_core::ffi::{
    TELLSTICK_HUMIDITY, TELLSTICK_RAINRATE, TELLSTICK_RAINTOTAL, TELLSTICK_TEMPERATURE,
    TELLSTICK_WINDAVERAGE, TELLSTICK_WINDDIRECTION, TELLSTICK_WINDGUST,
};
use tellstick_core::{CoreLibrary, Result, SensorValue};

/// A sensor telldus-core has received readings from.
///
/// Identity (protocol, model, id) comes from sensor enumeration; readings
/// are fetched per datatype.
#[derive(Debug)]
pub struct Sensor {
    protocol: String,
    model: String,
    id: i32,
    datatypes: i32,
    lib: CoreLibrary,
}

impl Sensor {
    pub(crate) fn new(
        protocol: String,
        model: String,
        id: i32,
        datatypes: i32,
        lib: CoreLibrary,
    ) -> Self {
        Self {
            protocol,
            model,
            id,
            datatypes,
            lib,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Bit mask of TELLSTICK_* datatypes this sensor reports.
    pub fn datatypes(&self) -> i32 {
        self.datatypes
    }

    /// Whether the sensor reports the given datatype.
    pub fn has_value(&self, datatype: i32) -> bool {
        self.datatypes & datatype != 0
    }

    /// The latest reading for a datatype.
    pub fn value(&self, datatype: i32) -> Result<SensorValue> {
        self.lib
            .sensor_value(&self.protocol, &self.model, self.id, datatype)
    }

    pub fn temperature(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_TEMPERATURE)
    }

    pub fn humidity(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_HUMIDITY)
    }

    pub fn rain_rate(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_RAINRATE)
    }

    pub fn rain_total(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_RAINTOTAL)
    }

    pub fn wind_direction(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_WINDDIRECTION)
    }

    pub fn wind_average(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_WINDAVERAGE)
    }

    pub fn wind_gust(&self) -> Result<SensorValue> {
        self.value(TELLSTICK_WINDGUST)
    }
}
