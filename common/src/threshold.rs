use crate::error::HiveError;

/// Threshold value meaning "disabled".
pub const NO_THRESHOLD: f32 = 65535.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    /// Active while the reading is below the threshold (heating, humidifying).
    BelowActivates,
    /// Active while the reading is above the threshold (cooling, venting).
    AboveActivates,
}

impl SwitchType {
    pub fn code(self) -> u8 {
        match self {
            Self::BelowActivates => 0,
            Self::AboveActivates => 1,
        }
    }
}

impl TryFrom<i64> for SwitchType {
    type Error = HiveError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::BelowActivates),
            1 => Ok(Self::AboveActivates),
            other => Err(HiveError::invalid(format!("switch type {other} is not 0 or 1"))),
        }
    }
}

/// Valid range for a threshold, as reported by the sensor feeding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f32,
    pub upper: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSpec {
    pub value: f32,
}

impl ThresholdSpec {
    pub fn disabled() -> Self {
        Self {
            value: NO_THRESHOLD,
        }
    }

    pub fn new(value: f32) -> Self {
        Self { value }
    }

    pub fn is_enabled(&self) -> bool {
        self.value != NO_THRESHOLD
    }

    pub fn crossed(&self, reading: Option<f32>, switch_type: SwitchType) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match (reading, switch_type) {
            (Some(reading), SwitchType::AboveActivates) => reading > self.value,
            (Some(reading), SwitchType::BelowActivates) => reading < self.value,
            (None, _) => false,
        }
    }

    pub fn validate(&self, name: &str, bounds: Bounds) -> Result<(), HiveError> {
        if !self.value.is_finite() || self.value < bounds.lower {
            return Err(HiveError::invalid(format!(
                "{name} {} is below {}",
                self.value, bounds.lower
            )));
        }
        if self.value > bounds.upper && self.is_enabled() {
            return Err(HiveError::invalid(format!(
                "{name} {} is above {}",
                self.value, bounds.upper
            )));
        }
        Ok(())
    }
}

/// Temperature and humidity thresholds sharing one switch direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSet {
    pub temperature: ThresholdSpec,
    pub humidity: ThresholdSpec,
    pub switch_type: SwitchType,
}

impl ThresholdSet {
    /// True when either enabled threshold is crossed in the configured direction.
    pub fn evaluate(&self, temperature: Option<f32>, humidity: Option<f32>) -> bool {
        self.temperature.crossed(temperature, self.switch_type)
            || self.humidity.crossed(humidity, self.switch_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn above_25() -> ThresholdSet {
        ThresholdSet {
            temperature: ThresholdSpec::new(25.0),
            humidity: ThresholdSpec::disabled(),
            switch_type: SwitchType::AboveActivates,
        }
    }

    #[test]
    fn above_activates_scenario() {
        let set = above_25();
        assert!(set.evaluate(Some(26.0), None));
        assert!(!set.evaluate(Some(24.0), None));
        assert!(!set.evaluate(Some(25.0), None));
    }

    #[test]
    fn below_activates_on_either_reading() {
        let set = ThresholdSet {
            temperature: ThresholdSpec::new(18.0),
            humidity: ThresholdSpec::new(40.0),
            switch_type: SwitchType::BelowActivates,
        };
        assert!(set.evaluate(Some(17.5), Some(55.0)));
        assert!(set.evaluate(Some(21.0), Some(35.0)));
        assert!(!set.evaluate(Some(21.0), Some(55.0)));
    }

    #[test]
    fn sentinel_disables_threshold() {
        let set = ThresholdSet {
            temperature: ThresholdSpec::disabled(),
            humidity: ThresholdSpec::disabled(),
            switch_type: SwitchType::BelowActivates,
        };
        assert!(!set.evaluate(Some(-40.0), Some(0.0)));
    }

    #[test]
    fn validation_allows_sentinel_above_bounds() {
        let bounds = Bounds {
            lower: -40.0,
            upper: 80.0,
        };
        assert!(ThresholdSpec::disabled().validate("tThreshold", bounds).is_ok());
        assert!(ThresholdSpec::new(81.0).validate("tThreshold", bounds).is_err());
        assert!(ThresholdSpec::new(-41.0).validate("tThreshold", bounds).is_err());
        assert!(ThresholdSpec::new(f32::NAN).validate("tThreshold", bounds).is_err());
    }
}
