use serde::{Deserialize, Serialize};

pub const PAYLOAD_LEN: usize = 16;

/// Measurements carried after the secondary header, in wire order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryPayload {
    pub temperature: f32, // celsius
    pub battery: f32,     // percent
    pub altitude: f32,    // km
    pub signal: f32,      // dB
}

impl TelemetryPayload {
    pub fn new(temperature: f32, battery: f32, altitude: f32, signal: f32) -> Self {
        Self {
            temperature,
            battery,
            altitude,
            signal,
        }
    }

    // caller guarantees PAYLOAD_LEN bytes
    pub(crate) fn from_be_slice(b: &[u8]) -> Self {
        let f = |at: usize| f32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
        Self {
            temperature: f(0),
            battery: f(4),
            altitude: f(8),
            signal: f(12),
        }
    }

    pub(crate) fn write_be(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.temperature.to_be_bytes());
        out.extend_from_slice(&self.battery.to_be_bytes());
        out.extend_from_slice(&self.altitude.to_be_bytes());
        out.extend_from_slice(&self.signal.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_is_temperature_battery_altitude_signal() {
        let payload = TelemetryPayload::new(1.0, 2.0, 3.0, 4.0);
        let mut out = Vec::new();
        payload.write_be(&mut out);

        assert_eq!(out.len(), PAYLOAD_LEN);
        assert_eq!(&out[0..4], &1.0f32.to_be_bytes());
        assert_eq!(&out[4..8], &2.0f32.to_be_bytes());
        assert_eq!(&out[8..12], &3.0f32.to_be_bytes());
        assert_eq!(&out[12..16], &4.0f32.to_be_bytes());
        assert_eq!(TelemetryPayload::from_be_slice(&out), payload);
    }
}
