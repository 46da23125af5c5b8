// Reading domain model
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp format used by the results log unless configured otherwise.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The technique that produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordingMethod {
    #[serde(rename = "Speedtest CLI", alias = "speedtest_cli")]
    SpeedtestCli,
    #[serde(rename = "BT Website", alias = "bt_website")]
    BtWebsite,
    #[serde(rename = "Which? Website", alias = "which_website")]
    WhichWebsite,
}

impl RecordingMethod {
    pub const ALL: [RecordingMethod; 3] = [
        RecordingMethod::SpeedtestCli,
        RecordingMethod::BtWebsite,
        RecordingMethod::WhichWebsite,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RecordingMethod::SpeedtestCli => "Speedtest CLI",
            RecordingMethod::BtWebsite => "BT Website",
            RecordingMethod::WhichWebsite => "Which? Website",
        }
    }

    /// Website methods drive a browser through WebDriver.
    pub fn uses_browser(&self) -> bool {
        matches!(self, RecordingMethod::BtWebsite | RecordingMethod::WhichWebsite)
    }
}

impl fmt::Display for RecordingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RecordingMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.label() == s)
            .or_else(|| match s {
                "speedtest_cli" => Some(RecordingMethod::SpeedtestCli),
                "bt_website" => Some(RecordingMethod::BtWebsite),
                "which_website" => Some(RecordingMethod::WhichWebsite),
                _ => None,
            })
            .ok_or_else(|| UnknownVariant::new("recording method", s))
    }
}

/// Browser used by the website methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Browser {
    #[default]
    #[serde(rename = "Chrome", alias = "chrome")]
    Chrome,
    #[serde(rename = "Edge", alias = "edge")]
    Edge,
}

impl Browser {
    pub fn label(&self) -> &'static str {
        match self {
            Browser::Chrome => "Chrome",
            Browser::Edge => "Edge",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Browser {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(Browser::Chrome),
            "edge" => Ok(Browser::Edge),
            _ => Err(UnknownVariant::new("browser", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidReading {
    #[error("{field} speed must be a finite, non-negative number (got {value})")]
    Speed { field: &'static str, value: f64 },
}

/// One timestamped broadband measurement. Speeds are in megabits per second.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    download: f64,
    upload: f64,
    timestamp: NaiveDateTime,
    method: RecordingMethod,
}

impl Reading {
    pub fn new(
        download: f64,
        upload: f64,
        timestamp: NaiveDateTime,
        method: RecordingMethod,
    ) -> Result<Self, InvalidReading> {
        check_speed("download", download)?;
        check_speed("upload", upload)?;
        Ok(Self {
            download,
            upload,
            timestamp,
            method,
        })
    }

    /// Stamps the reading with the current local time, truncated to whole
    /// seconds so it survives a trip through the results log unchanged.
    pub fn now(download: f64, upload: f64, method: RecordingMethod) -> Result<Self, InvalidReading> {
        let timestamp = chrono::Local::now().naive_local().trunc_subsecs(0);
        Self::new(download, upload, timestamp, method)
    }

    pub fn download(&self) -> f64 {
        self.download
    }

    pub fn upload(&self) -> f64 {
        self.upload
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn method(&self) -> RecordingMethod {
        self.method
    }

    /// Both speeds at zero means the connection is most likely down.
    pub fn is_outage(&self) -> bool {
        self.download <= 0.0 && self.upload <= 0.0
    }
}

fn check_speed(field: &'static str, value: f64) -> Result<(), InvalidReading> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(InvalidReading::Speed { field, value })
    }
}

/// Converts bits per second to megabits per second.
pub fn bits_to_megabits(bps: f64) -> f64 {
    bps / 1_000_000.0
}

/// Outcome of a single measurement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// Speeds the method actually measured, zero included.
    Measured { download: f64, upload: f64 },
    /// Network unreachable, site automation timed out, and the like.
    TransientFailure { reason: String },
    /// A stop request was observed between measurement phases.
    Interrupted,
}

impl Measurement {
    pub fn from_speeds(download: f64, upload: f64) -> Self {
        Measurement::Measured { download, upload }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Measurement::TransientFailure {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_method_parses_labels_and_ids() {
        for method in RecordingMethod::ALL {
            assert_eq!(method.label().parse::<RecordingMethod>(), Ok(method));
        }
        assert_eq!("which_website".parse(), Ok(RecordingMethod::WhichWebsite));
        assert!("Carrier Pigeon".parse::<RecordingMethod>().is_err());
    }

    #[test]
    fn test_only_websites_use_a_browser() {
        assert!(!RecordingMethod::SpeedtestCli.uses_browser());
        assert!(RecordingMethod::BtWebsite.uses_browser());
        assert!(RecordingMethod::WhichWebsite.uses_browser());
    }

    #[test]
    fn test_reading_rejects_bad_speeds() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert!(Reading::new(-1.0, 2.0, ts, RecordingMethod::SpeedtestCli).is_err());
        assert!(Reading::new(1.0, f64::NAN, ts, RecordingMethod::SpeedtestCli).is_err());
        assert!(Reading::new(0.0, 0.0, ts, RecordingMethod::SpeedtestCli).is_ok());
    }

    #[test]
    fn test_zero_speeds_are_an_outage_reading() {
        assert_eq!(
            Measurement::from_speeds(0.0, 0.0),
            Measurement::Measured {
                download: 0.0,
                upload: 0.0
            }
        );
        let down = Reading::now(0.0, 0.0, RecordingMethod::SpeedtestCli).unwrap();
        assert!(down.is_outage());
        let upload_only = Reading::now(bits_to_megabits(0.0), 0.5, RecordingMethod::SpeedtestCli).unwrap();
        assert!(!upload_only.is_outage());
    }

    #[test]
    fn test_now_has_whole_second_precision() {
        let reading = Reading::now(1.0, 1.0, RecordingMethod::BtWebsite).unwrap();
        assert_eq!(reading.timestamp().and_utc().timestamp_subsec_nanos(), 0);
    }
}
