//! Structured metrics from free-text SCADA reports

use super::ToolError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentState {
    Running,
    Stopped,
    Maintenance,
    Fault,
}

impl EquipmentState {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "maintenance" => Some(Self::Maintenance),
            "fault" => Some(Self::Fault),
            _ => None,
        }
    }
}

impl fmt::Display for EquipmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Maintenance => "maintenance",
            Self::Fault => "fault",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlarmSeverity {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    pub sensor_id: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_id: String,
    pub severity: AlarmSeverity,
    pub message: String,
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStatus {
    pub equipment_id: String,
    pub name: String,
    pub status: EquipmentState,
    pub readings: Vec<SensorValue>,
    pub active_alarms: Vec<Alarm>,
}

/// Validated production figures for one line and shift
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionMetrics {
    pub line_id: String,
    pub shift: String,
    pub units_produced: u32,
    pub units_target: u32,
    pub efficiency_percent: f64,
    pub equipment: Vec<EquipmentStatus>,
}

impl fmt::Display for ProductionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "Extracted Production Metrics:")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "  Line ID: {}", self.line_id)?;
        writeln!(f, "  Shift: {}", self.shift)?;
        writeln!(f, "  Units Produced: {}", self.units_produced)?;
        writeln!(f, "  Units Target: {}", self.units_target)?;
        writeln!(f, "  Efficiency: {:.1}%", self.efficiency_percent)?;

        if !self.equipment.is_empty() {
            writeln!(f, "\n  Equipment Status:")?;
            writeln!(f, "  {}", "-".repeat(40))?;
            for equip in &self.equipment {
                writeln!(f, "\n    Equipment: {} - {}", equip.equipment_id, equip.name)?;
                writeln!(f, "      Status: {}", equip.status)?;
                if !equip.readings.is_empty() {
                    writeln!(f, "      Sensor Readings:")?;
                    for r in &equip.readings {
                        writeln!(f, "        - {}: {} {}", r.sensor_id, r.value, r.unit)?;
                    }
                }
                if !equip.active_alarms.is_empty() {
                    writeln!(f, "      Active Alarms:")?;
                    for a in &equip.active_alarms {
                        let ack = if a.acknowledged { "✓" } else { "✗" };
                        writeln!(
                            f,
                            "        - [{}] {}: {} (Ack: {})",
                            a.severity, a.alarm_id, a.message, ack
                        )?;
                    }
                }
            }
        }

        write!(f, "\n{}\nExtraction completed successfully.", rule)
    }
}

/// A required field and the patterns tried for it, in order
struct FieldPatterns {
    name: &'static str,
    patterns: Vec<Regex>,
}

impl FieldPatterns {
    fn new(name: &'static str, sources: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            patterns: sources
                .iter()
                .map(|s| compile(s))
                .collect::<Result<_, _>>()?,
        })
    }

    fn find(&self, text: &str) -> Result<String, ToolError> {
        self.patterns
            .iter()
            .find_map(|re| re.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .ok_or_else(|| {
                ToolError::Extraction(format!(
                    "Could not extract '{}' from report. Please ensure the report contains this field.",
                    self.name
                ))
            })
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Compiled report patterns
pub struct ScadaExtractor {
    line_id: FieldPatterns,
    shift: FieldPatterns,
    units_produced: FieldPatterns,
    units_target: FieldPatterns,
    efficiency: FieldPatterns,
    equipment: Regex,
    sensor: Regex,
    alarm: Regex,
}

impl ScadaExtractor {
    pub fn new() -> Result<Self, ToolError> {
        Self::build().map_err(|e| ToolError::Extraction(format!("bad pattern: {}", e)))
    }

    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            line_id: FieldPatterns::new(
                "line_id",
                &[
                    r"(?:Production\s+)?Line(?:\s+ID)?[:\s]+([A-Za-z0-9_-]+)",
                    r"line_id[:\s]+([A-Za-z0-9_-]+)",
                ],
            )?,
            shift: FieldPatterns::new("shift", &[r"Shift[:\s]+(\w+)"])?,
            units_produced: FieldPatterns::new(
                "units_produced",
                &[
                    r"Units\s+Produced[:\s]+(\d+)",
                    r"Produced[:\s]+(\d+)",
                    r"units_produced[:\s]+(\d+)",
                ],
            )?,
            units_target: FieldPatterns::new(
                "units_target",
                &[r"(?:Units\s+)?Target[:\s]+(\d+)", r"units_target[:\s]+(\d+)"],
            )?,
            efficiency: FieldPatterns::new(
                "efficiency_percent",
                &[
                    r"Efficiency(?:\s+Percent)?[:\s]+(\d+(?:\.\d+)?)\s*%?",
                    r"efficiency_percent[:\s]+(\d+(?:\.\d+)?)",
                ],
            )?,
            equipment: compile(r"Equipment[:\s]+([A-Za-z0-9_-]+)\s*[-–]\s*([^(\n]+?)\s*\((\w+)\)")?,
            sensor: compile(r"Sensor[:\s]+([A-Za-z0-9_-]+)\s*[=:]\s*(\d+(?:\.\d+)?)\s*(\S+)")?,
            alarm: compile(r"Alarm[:\s]+([A-Za-z0-9_-]+)\s*\((\w+)\)\s*[-–:]\s*([^\n]+)")?,
        })
    }

    /// Parse a report. The five production fields are required;
    /// equipment, readings and alarms are collected when present.
    pub fn extract(&self, report: &str) -> Result<ProductionMetrics, ToolError> {
        let text = report.trim();
        if text.is_empty() {
            return Err(ToolError::Extraction(
                "Empty report text provided. Please provide a valid SCADA report.".to_string(),
            ));
        }

        let line_id = self.line_id.find(text)?;
        let shift = self.shift.find(text)?;
        let units_produced = parse_count(&self.units_produced.find(text)?, "units_produced")?;
        let units_target = parse_count(&self.units_target.find(text)?, "units_target")?;
        let efficiency_percent: f64 = self.efficiency.find(text)?.parse().map_err(|_| {
            ToolError::Extraction("efficiency_percent is not a number".to_string())
        })?;

        Ok(ProductionMetrics {
            line_id,
            shift: shift.to_lowercase(),
            units_produced,
            units_target,
            efficiency_percent,
            equipment: self.equipment(text),
        })
    }

    /// Each equipment entry owns the readings and alarms that follow it,
    /// up to the next equipment entry.
    fn equipment(&self, text: &str) -> Vec<EquipmentStatus> {
        let matches: Vec<_> = self.equipment.captures_iter(text).collect();
        let mut out = Vec::new();

        for (i, caps) in matches.iter().enumerate() {
            let (Some(whole), Some(id), Some(name), Some(status)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            let Some(status) = EquipmentState::parse(status.as_str()) else {
                continue;
            };

            let section_end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());
            let section = &text[whole.end()..section_end];

            out.push(EquipmentStatus {
                equipment_id: id.as_str().to_string(),
                name: name.as_str().trim().to_string(),
                status,
                readings: self.readings(section),
                active_alarms: self.alarms(section),
            });
        }

        out
    }

    fn readings(&self, section: &str) -> Vec<SensorValue> {
        self.sensor
            .captures_iter(section)
            .filter_map(|caps| {
                Some(SensorValue {
                    sensor_id: caps.get(1)?.as_str().to_string(),
                    value: caps.get(2)?.as_str().parse().ok()?,
                    unit: caps.get(3)?.as_str().to_string(),
                })
            })
            .collect()
    }

    fn alarms(&self, section: &str) -> Vec<Alarm> {
        self.alarm
            .captures_iter(section)
            .filter_map(|caps| {
                let message = caps.get(3)?.as_str().trim();
                if message.is_empty() {
                    return None;
                }
                Some(Alarm {
                    alarm_id: caps.get(1)?.as_str().to_string(),
                    severity: AlarmSeverity::parse(caps.get(2)?.as_str())?,
                    message: message.to_string(),
                    acknowledged: false,
                })
            })
            .collect()
    }
}

fn parse_count(raw: &str, field: &str) -> Result<u32, ToolError> {
    raw.parse()
        .map_err(|_| ToolError::Extraction(format!("{} is out of range: {}", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Production Line: LINE-001
Shift: Morning
Units Produced: 450
Target: 500
Efficiency: 90%

Equipment: PUMP-01 - Coolant Pump (running)
Sensor: TEMP-01 = 72.5 °C
Sensor: PRES-01 = 3.2 bar
Alarm: ALM-7 (high) - Outlet pressure above setpoint

Equipment: CONV-02 - Main Conveyor (maintenance)
Sensor: SPD-02 = 0 m/s
Equipment: ROB-03 - Palletizer (exploded)
";

    #[test]
    fn test_extract_full_report() {
        let metrics = ScadaExtractor::new().unwrap().extract(REPORT).unwrap();

        assert_eq!(metrics.line_id, "LINE-001");
        assert_eq!(metrics.shift, "morning");
        assert_eq!(metrics.units_produced, 450);
        assert_eq!(metrics.units_target, 500);
        assert_eq!(metrics.efficiency_percent, 90.0);

        assert_eq!(metrics.equipment.len(), 2);
        let pump = &metrics.equipment[0];
        assert_eq!(pump.name, "Coolant Pump");
        assert_eq!(pump.status, EquipmentState::Running);
        assert_eq!(pump.readings.len(), 2);
        assert_eq!(pump.active_alarms[0].severity, AlarmSeverity::High);

        let conveyor = &metrics.equipment[1];
        assert_eq!(conveyor.readings.len(), 1);
        assert!(conveyor.active_alarms.is_empty());
    }

    #[test]
    fn test_minimal_report_without_equipment() {
        let report = "line_id: L7\nshift: night\nunits_produced: 10\nunits_target: 12\nefficiency_percent: 83.3";
        let metrics = ScadaExtractor::new().unwrap().extract(report).unwrap();
        assert_eq!(metrics.line_id, "L7");
        assert!(metrics.equipment.is_empty());
        assert!(metrics.to_string().contains("Efficiency: 83.3%"));
    }

    #[test]
    fn test_missing_field_names_it() {
        let report = "Production Line: LINE-001\nShift: Morning\nUnits Produced: 450";
        let err = ScadaExtractor::new().unwrap().extract(report).unwrap_err();
        assert!(err.to_string().contains("units_target"));
    }

    #[test]
    fn test_empty_report() {
        let err = ScadaExtractor::new().unwrap().extract("   \n").unwrap_err();
        assert!(matches!(err, ToolError::Extraction(_)));
    }

    #[test]
    fn test_display_lists_alarms() {
        let metrics = ScadaExtractor::new().unwrap().extract(REPORT).unwrap();
        let text = metrics.to_string();
        assert!(text.contains("[HIGH] ALM-7: Outlet pressure above setpoint (Ack: ✗)"));
        assert!(text.ends_with("Extraction completed successfully."));
    }
}
