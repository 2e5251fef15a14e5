use anyhow::Result;
use gcs_proto::telemetry::Telemetry;
use serde::Serialize;
use tracing::warn;

/// (id, display name, unit) for the sensors every session starts with.
pub const DEFAULT_SENSORS: &[(&str, &str, &str)] = &[
    ("roll", "Roll", "°"),
    ("pitch", "Pitch", "°"),
    ("yaw", "Yaw", "°"),
    ("altitude", "Altitude", "m"),
    ("groundspeed", "Ground Speed", "m/s"),
    ("airspeed", "Air Speed", "m/s"),
    ("climb", "Climb Rate", "m/s"),
    ("throttle", "Throttle", "%"),
    ("heading", "Heading", "°"),
    ("battery_remaining", "Battery", "%"),
    ("battery_voltage", "Voltage", "V"),
    ("battery_current", "Current", "A"),
    ("gps_lat", "GPS Latitude", "°"),
    ("gps_lon", "GPS Longitude", "°"),
    ("gps_hdop", "GPS HDOP", ""),
    ("gps_satellites", "GPS Satellites", ""),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub value: f64,
}

impl Sensor {
    pub fn formatted_value(&self) -> String {
        format!("{:.2}", self.value)
    }
}

/// Ordered, update-in-place sensor list backing the dashboard.
#[derive(Debug, Clone, Default)]
pub struct SensorTable {
    sensors: Vec<Sensor>,
}

impl SensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_default() -> Self {
        let mut t = Self::new();
        for (id, name, unit) in DEFAULT_SENSORS {
            t.add(id, name, unit);
        }
        t
    }

    /// Adds a sensor at value 0. Returns false if the id already exists.
    pub fn add(&mut self, id: &str, name: &str, unit: &str) -> bool {
        if self.get(id).is_some() {
            return false;
        }
        self.sensors.push(Sensor {
            id: id.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            value: 0.0,
        });
        true
    }

    pub fn update(&mut self, id: &str, value: f64) -> Result<()> {
        if !self.set(id, value) {
            anyhow::bail!("unknown sensor '{}'", id);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Maps one decoded message onto the sensors it feeds. Returns how many
    /// sensors changed.
    pub fn apply(&mut self, t: &Telemetry) -> usize {
        let mut n = 0;
        let mut put = |table: &mut Self, id: &str, v: f64| {
            if table.set(id, v) {
                n += 1;
            }
        };

        match t {
            Telemetry::Attitude(a) => {
                put(self, "roll", round_to((a.roll as f64).to_degrees(), 1));
                put(self, "pitch", round_to((a.pitch as f64).to_degrees(), 1));
                put(self, "yaw", round_to((a.yaw as f64).to_degrees(), 1));
            }
            Telemetry::Position(p) => {
                put(self, "gps_lat", round_to(p.lat, 6));
                put(self, "gps_lon", round_to(p.lon, 6));
                put(self, "altitude", round_to(p.relative_alt_m as f64, 1));
                put(self, "groundspeed", round_to(p.groundspeed as f64, 1));
                if let Some(h) = p.heading {
                    put(self, "heading", round_to(h as f64, 1));
                }
            }
            Telemetry::GpsQuality(g) => {
                if let Some(hdop) = g.hdop {
                    put(self, "gps_hdop", round_to(hdop as f64, 2));
                }
                if let Some(sats) = g.satellites {
                    put(self, "gps_satellites", sats as f64);
                }
            }
            Telemetry::Battery(b) => {
                if let Some(v) = b.voltage {
                    put(self, "battery_voltage", round_to(v as f64, 1));
                }
                if let Some(c) = b.current {
                    put(self, "battery_current", round_to(c as f64, 1));
                }
                if let Some(r) = b.remaining {
                    put(self, "battery_remaining", r as f64);
                }
            }
            Telemetry::VfrHud(h) => {
                put(self, "airspeed", round_to(h.airspeed as f64, 1));
                put(self, "groundspeed", round_to(h.groundspeed as f64, 1));
                put(self, "heading", round_to(h.heading as f64, 1));
                put(self, "throttle", round_to(h.throttle as f64, 0));
                // GPS altitude wins unless HUD has something better than zero
                if h.alt > 0.0 {
                    put(self, "altitude", round_to(h.alt as f64, 1));
                }
                put(self, "climb", round_to(h.climb as f64, 1));
            }
            _ => {}
        }
        n
    }

    fn set(&mut self, id: &str, value: f64) -> bool {
        match self.sensors.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.value = value;
                true
            }
            None => {
                warn!("sensor '{}' not found", id);
                false
            }
        }
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcs_proto::telemetry::{Attitude, Battery, Position, VfrHud};

    #[test]
    fn defaults_are_seeded_at_zero() {
        let t = SensorTable::new_default();
        assert_eq!(t.len(), DEFAULT_SENSORS.len());
        assert!(t.iter().all(|s| s.value == 0.0));
        assert_eq!(t.get("battery_voltage").map(|s| s.unit.as_str()), Some("V"));
    }

    #[test]
    fn add_is_idempotent_by_id() {
        let mut t = SensorTable::new();
        assert!(t.add("rpm", "RPM", ""));
        assert!(!t.add("rpm", "Motor RPM", "1/min"));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("rpm").unwrap().name, "RPM");
    }

    #[test]
    fn update_unknown_sensor_is_an_error() {
        let mut t = SensorTable::new_default();
        assert!(t.update("sonar", 1.0).is_err());
        t.update("roll", 2.5).unwrap();
        assert_eq!(t.get("roll").unwrap().formatted_value(), "2.50");
    }

    #[test]
    fn attitude_is_stored_in_degrees() {
        let mut t = SensorTable::new_default();
        let n = t.apply(&Telemetry::Attitude(Attitude {
            roll: std::f32::consts::FRAC_PI_2,
            pitch: -0.1,
            yaw: 0.0,
        }));
        assert_eq!(n, 3);
        assert_eq!(t.get("roll").unwrap().value, 90.0);
        assert_eq!(t.get("pitch").unwrap().value, -5.7);
    }

    #[test]
    fn position_rounds_and_skips_unknown_heading() {
        let mut t = SensorTable::new_default();
        t.update("heading", 42.0).unwrap();
        t.apply(&Telemetry::Position(Position {
            lat: 52.520_008_4,
            lon: 13.404_954_4,
            alt_m: 120.0,
            relative_alt_m: 99.96,
            groundspeed: 5.04,
            climb: 0.0,
            heading: None,
        }));
        assert_eq!(t.get("gps_lat").unwrap().value, 52.520008);
        assert_eq!(t.get("altitude").unwrap().value, 100.0);
        assert_eq!(t.get("groundspeed").unwrap().value, 5.0);
        assert_eq!(t.get("heading").unwrap().value, 42.0);
    }

    #[test]
    fn battery_only_touches_known_fields() {
        let mut t = SensorTable::new_default();
        let n = t.apply(&Telemetry::Battery(Battery {
            voltage: Some(12.63),
            current: None,
            remaining: Some(75),
        }));
        assert_eq!(n, 2);
        assert_eq!(t.get("battery_voltage").unwrap().value, 12.6);
        assert_eq!(t.get("battery_remaining").unwrap().value, 75.0);
    }

    #[test]
    fn hud_altitude_ignored_when_zero() {
        let mut t = SensorTable::new_default();
        t.update("altitude", 12.0).unwrap();
        t.apply(&Telemetry::VfrHud(VfrHud {
            airspeed: 10.0,
            groundspeed: 9.0,
            heading: 270.0,
            throttle: 41.6,
            alt: 0.0,
            climb: -0.5,
        }));
        assert_eq!(t.get("altitude").unwrap().value, 12.0);
        assert_eq!(t.get("throttle").unwrap().value, 42.0);
        assert_eq!(t.get("climb").unwrap().value, -0.5);
    }
}
