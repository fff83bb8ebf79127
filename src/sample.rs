use serde::{Deserialize, Serialize};

/// One observed position of a tracked entity.
///
/// `timestamp` is the server's clock for the observation; only its
/// ordering matters to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "long", alias = "lng", alias = "lon")]
    pub longitude: f64,
    #[serde(alias = "t", alias = "ts")]
    pub timestamp: u64,
}

impl LocationSample {
    /// Create a sample
    pub fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Decode one stream payload.
    ///
    /// Rejects payloads whose coordinates are not finite or out of range.
    pub fn from_payload(payload: &str) -> Result<Self, SampleError> {
        let sample: Self = serde_json::from_str(payload)?;
        if !sample.has_valid_coordinates() {
            return Err(SampleError::OutOfRange {
                latitude: sample.latitude,
                longitude: sample.longitude,
            });
        }
        Ok(sample)
    }

    fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Why a payload could not be turned into a sample
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("malformed sample: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("coordinates out of range: ({latitude}, {longitude})")]
    OutOfRange { latitude: f64, longitude: f64 },
}

/// Outcome of offering a sample to a [`SampleGate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleVerdict {
    /// Newer than anything seen; deliver it
    Accepted,
    /// Same timestamp as the last accepted sample
    Duplicate,
    /// Older than the last accepted sample
    OutOfOrder,
}

impl SampleVerdict {
    /// Whether the sample should be delivered
    pub fn is_accepted(self) -> bool {
        self == SampleVerdict::Accepted
    }
}

/// Enforces strictly increasing timestamps.
///
/// Survives reconnects: a retransmission of an already-delivered sample on
/// a fresh connection is still recognised as a duplicate.
#[derive(Debug, Clone, Default)]
pub struct SampleGate {
    last_timestamp: Option<u64>,
}

impl SampleGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a sample; the gate advances only on acceptance.
    pub fn offer(&mut self, sample: &LocationSample) -> SampleVerdict {
        match self.last_timestamp {
            Some(last) if sample.timestamp == last => SampleVerdict::Duplicate,
            Some(last) if sample.timestamp < last => SampleVerdict::OutOfOrder,
            _ => {
                self.last_timestamp = Some(sample.timestamp);
                SampleVerdict::Accepted
            }
        }
    }

    /// Timestamp of the last accepted sample
    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_aliases() {
        let sample = LocationSample::from_payload(r#"{"lat":12.9,"long":80.2,"t":100}"#).unwrap();
        assert_eq!(sample, LocationSample::new(12.9, 80.2, 100));

        let sample = LocationSample::from_payload(r#"{"lat":1.0,"lng":2.0,"ts":5}"#).unwrap();
        assert_eq!(sample, LocationSample::new(1.0, 2.0, 5));

        let sample = LocationSample::from_payload(
            r#"{"latitude":1.5,"longitude":-2.5,"timestamp":7,"speed":40}"#,
        )
        .unwrap();
        assert_eq!(sample, LocationSample::new(1.5, -2.5, 7));
    }

    #[test]
    fn test_payload_rejects_garbage() {
        assert!(matches!(
            LocationSample::from_payload("not json"),
            Err(SampleError::Malformed(_))
        ));
        assert!(matches!(
            LocationSample::from_payload(r#"{"lat":12.9,"long":80.2}"#),
            Err(SampleError::Malformed(_))
        ));
        assert!(matches!(
            LocationSample::from_payload(r#"{"lat":95.0,"long":80.2,"t":1}"#),
            Err(SampleError::OutOfRange { .. })
        ));
        assert!(matches!(
            LocationSample::from_payload(r#"{"lat":10.0,"long":-181.0,"t":1}"#),
            Err(SampleError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_gate_drops_out_of_order() {
        let mut gate = SampleGate::new();
        let accepted: Vec<u64> = [0u64, 2, 1, 3]
            .iter()
            .map(|&t| LocationSample::new(0.0, 0.0, t))
            .filter(|s| gate.offer(s).is_accepted())
            .map(|s| s.timestamp)
            .collect();

        assert_eq!(accepted, vec![0, 2, 3]);
        assert_eq!(gate.last_timestamp(), Some(3));
    }

    #[test]
    fn test_gate_verdicts() {
        let mut gate = SampleGate::new();
        assert_eq!(gate.offer(&LocationSample::new(0.0, 0.0, 100)), SampleVerdict::Accepted);
        assert_eq!(gate.offer(&LocationSample::new(1.0, 1.0, 100)), SampleVerdict::Duplicate);
        assert_eq!(gate.offer(&LocationSample::new(1.0, 1.0, 99)), SampleVerdict::OutOfOrder);
        assert_eq!(gate.offer(&LocationSample::new(1.0, 1.0, 150)), SampleVerdict::Accepted);
        assert_eq!(gate.last_timestamp(), Some(150));
    }
}
