//! Simulated IoT sensors and actuators

use super::ToolError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Sensor,
    Actuator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Sensor => write!(f, "sensor"),
            DeviceKind::Actuator => write!(f, "actuator"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorDevice {
    pub device_id: String,
    pub location: String,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
}

impl SensorDevice {
    /// A simulated reading inside the sensor's range, rounded to 2 places
    pub fn read(&self) -> f64 {
        let raw = rand::rng().random_range(self.min_value..=self.max_value);
        (raw * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActuatorDevice {
    pub device_id: String,
    pub location: String,
    pub states: Vec<String>,
    pub current_state: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Device {
    Sensor(SensorDevice),
    Actuator(ActuatorDevice),
}

impl Device {
    pub fn id(&self) -> &str {
        match self {
            Device::Sensor(s) => &s.device_id,
            Device::Actuator(a) => &a.device_id,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Sensor(_) => DeviceKind::Sensor,
            Device::Actuator(_) => DeviceKind::Actuator,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            Device::Sensor(s) => &s.location,
            Device::Actuator(a) => &a.location,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub device_id: String,
    pub location: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sensor Reading:")?;
        writeln!(f, "  Device ID: {}", self.device_id)?;
        writeln!(f, "  Type: sensor")?;
        writeln!(f, "  Location: {}", self.location)?;
        writeln!(f, "  Value: {} {}", self.value, self.unit)?;
        write!(f, "  Timestamp: {}", self.timestamp.to_rfc3339())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlOutcome {
    pub device_id: String,
    pub location: String,
    pub previous_state: String,
    pub new_state: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for ControlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device Control Successful:")?;
        writeln!(f, "  Device ID: {}", self.device_id)?;
        writeln!(f, "  Type: actuator")?;
        writeln!(f, "  Location: {}", self.location)?;
        writeln!(f, "  Previous State: {}", self.previous_state)?;
        writeln!(f, "  New State: {}", self.new_state)?;
        write!(f, "  Timestamp: {}", self.timestamp.to_rfc3339())
    }
}

/// Registered devices in registration order
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The plant floor used by the demo: two sensors and one valve
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Device::Sensor(SensorDevice {
            device_id: "temp-sensor".into(),
            location: "Production Floor - Zone A".into(),
            unit: "°C".into(),
            min_value: -10.0,
            max_value: 50.0,
        }));
        registry.register(Device::Sensor(SensorDevice {
            device_id: "humidity-sensor".into(),
            location: "Production Floor - Zone A".into(),
            unit: "%".into(),
            min_value: 0.0,
            max_value: 100.0,
        }));
        registry.register(Device::Actuator(ActuatorDevice {
            device_id: "valve-actuator".into(),
            location: "Cooling System - Main Line".into(),
            states: vec!["open".into(), "closed".into(), "partial".into()],
            current_state: "closed".into(),
        }));
        registry
    }

    /// Add a device, replacing any with the same id
    pub fn register(&mut self, device: Device) {
        match self.devices.iter_mut().find(|d| d.id() == device.id()) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == device_id)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id().to_string()).collect()
    }

    fn unknown(&self, device_id: &str) -> ToolError {
        ToolError::UnknownDevice {
            device_id: device_id.to_string(),
            available: self.device_ids(),
        }
    }

    pub fn read_sensor(&self, device_id: &str) -> Result<SensorReading, ToolError> {
        match self.get(device_id) {
            Some(Device::Sensor(sensor)) => Ok(SensorReading {
                device_id: sensor.device_id.clone(),
                location: sensor.location.clone(),
                value: sensor.read(),
                unit: sensor.unit.clone(),
                timestamp: Utc::now(),
            }),
            Some(other) => Err(ToolError::InvalidOperation(format!(
                "Device '{}' is not a sensor. It is a {}.",
                device_id,
                other.kind()
            ))),
            None => Err(self.unknown(device_id)),
        }
    }

    pub fn control_device(
        &mut self,
        device_id: &str,
        action: &str,
    ) -> Result<ControlOutcome, ToolError> {
        let unknown = self.unknown(device_id);
        let actuator = match self.devices.iter_mut().find(|d| d.id() == device_id) {
            Some(Device::Actuator(actuator)) => actuator,
            Some(other) => {
                return Err(ToolError::InvalidOperation(format!(
                    "Device '{}' is not an actuator. It is a {}.",
                    device_id,
                    other.kind()
                )))
            }
            None => return Err(unknown),
        };

        if !actuator.states.iter().any(|s| s == action) {
            return Err(ToolError::InvalidOperation(format!(
                "Invalid action '{}' for device '{}'. Valid actions: {}",
                action,
                device_id,
                actuator.states.join(", ")
            )));
        }

        let previous_state = std::mem::replace(&mut actuator.current_state, action.to_string());
        Ok(ControlOutcome {
            device_id: actuator.device_id.clone(),
            location: actuator.location.clone(),
            previous_state,
            new_state: actuator.current_state.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Human-readable listing of every device
    pub fn describe(&self) -> String {
        if self.devices.is_empty() {
            return "No devices registered in the system.".to_string();
        }

        let rule = "=".repeat(40);
        let mut lines = vec!["Available IoT Devices:".to_string(), rule.clone()];

        for device in &self.devices {
            lines.push(format!("\nDevice ID: {}", device.id()));
            lines.push(format!("  Type: {}", device.kind()));
            lines.push(format!("  Location: {}", device.location()));
            match device {
                Device::Sensor(s) => {
                    lines.push(format!("  Unit: {}", s.unit));
                    lines.push(format!("  Range: {} - {}", s.min_value, s.max_value));
                }
                Device::Actuator(a) => {
                    lines.push(format!("  Valid States: {}", a.states.join(", ")));
                    lines.push(format!("  Current State: {}", a.current_state));
                }
            }
        }

        lines.push(format!("\n{}", rule));
        lines.push(format!("Total: {} device(s)", self.devices.len()));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_reading_in_range() {
        let registry = DeviceRegistry::with_defaults();
        for _ in 0..50 {
            let reading = registry.read_sensor("temp-sensor").unwrap();
            assert!((-10.0..=50.0).contains(&reading.value));
            assert_eq!(reading.unit, "°C");
        }
        let humidity = registry.read_sensor("humidity-sensor").unwrap();
        assert!((0.0..=100.0).contains(&humidity.value));
    }

    #[test]
    fn test_unknown_device_lists_available() {
        let registry = DeviceRegistry::with_defaults();
        match registry.read_sensor("pressure-sensor").unwrap_err() {
            ToolError::UnknownDevice { device_id, available } => {
                assert_eq!(device_id, "pressure-sensor");
                assert_eq!(available, vec!["temp-sensor", "humidity-sensor", "valve-actuator"]);
            }
            other => panic!("Expected UnknownDevice, got {:?}", other),
        }
    }

    #[test]
    fn test_reading_an_actuator_is_invalid() {
        let registry = DeviceRegistry::with_defaults();
        let err = registry.read_sensor("valve-actuator").unwrap_err();
        assert!(matches!(err, ToolError::InvalidOperation(_)));
    }

    #[test]
    fn test_control_valve() {
        let mut registry = DeviceRegistry::with_defaults();
        let outcome = registry.control_device("valve-actuator", "open").unwrap();
        assert_eq!(outcome.previous_state, "closed");
        assert_eq!(outcome.new_state, "open");
        assert!(outcome.to_string().contains("New State: open"));

        let outcome = registry.control_device("valve-actuator", "partial").unwrap();
        assert_eq!(outcome.previous_state, "open");
    }

    #[test]
    fn test_invalid_control_leaves_state() {
        let mut registry = DeviceRegistry::with_defaults();
        let err = registry.control_device("valve-actuator", "explode").unwrap_err();
        assert!(err.to_string().contains("open, closed, partial"));

        let err = registry.control_device("temp-sensor", "open").unwrap_err();
        assert!(matches!(err, ToolError::InvalidOperation(_)));

        match registry.get("valve-actuator") {
            Some(Device::Actuator(a)) => assert_eq!(a.current_state, "closed"),
            other => panic!("Expected valve, got {:?}", other),
        }
    }

    #[test]
    fn test_describe_lists_all() {
        let text = DeviceRegistry::with_defaults().describe();
        assert!(text.contains("Device ID: temp-sensor"));
        assert!(text.contains("Valid States: open, closed, partial"));
        assert!(text.contains("Total: 3 device(s)"));
        assert_eq!(DeviceRegistry::new().describe(), "No devices registered in the system.");
    }
}
