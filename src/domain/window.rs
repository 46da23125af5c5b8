// Time window filter shared by the historical reader and the live graph
use super::reading::Reading;
use chrono::NaiveDateTime;

/// Inclusive bounds on a reading's timestamp. A missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("time window starts ({from}) after it ends ({to})")]
pub struct InvertedWindow {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Result<Self, InvertedWindow> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(InvertedWindow { from, to });
            }
        }
        Ok(Self { from, to })
    }

    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from(&self) -> Option<NaiveDateTime> {
        self.from
    }

    pub fn to(&self) -> Option<NaiveDateTime> {
        self.to
    }

    pub fn admits(&self, reading: &Reading) -> bool {
        let ts = reading.timestamp();
        self.from.is_none_or(|from| from <= ts) && self.to.is_none_or(|to| ts <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reading::RecordingMethod;
    use chrono::NaiveDate;

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 4)
            .unwrap()
            .and_hms_opt(9, 0, second)
            .unwrap()
    }

    fn reading_at(second: u32) -> Reading {
        Reading::new(50.0, 10.0, at(second), RecordingMethod::SpeedtestCli).unwrap()
    }

    #[test]
    fn test_window_is_inclusive() {
        let window = TimeWindow::new(Some(at(15)), Some(at(25))).unwrap();
        let admitted: Vec<u32> = [10, 15, 20, 25, 30]
            .into_iter()
            .filter(|s| window.admits(&reading_at(*s)))
            .collect();
        assert_eq!(admitted, vec![15, 20, 25]);
    }

    #[test]
    fn test_open_bounds() {
        let window = TimeWindow::new(None, Some(at(20))).unwrap();
        assert!(window.admits(&reading_at(0)));
        assert!(!window.admits(&reading_at(21)));
        assert!(TimeWindow::unbounded().admits(&reading_at(59)));
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        assert!(TimeWindow::new(Some(at(30)), Some(at(10))).is_err());
    }
}
