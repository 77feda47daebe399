//! Threshold rules and per-reading evaluation
//!
//! A rule is an ordered list of severity tiers, most severe first. Evaluation
//! walks the list and reports the first tier whose bound the value reaches.
//! Bounds are inclusive on both sides.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Threshold-based monitoring of equipment sensors

use crate::error::RuleError;
use crate::types::Reading;
use plantmon_types::{SensorType, Severity, ThresholdDirection};
use serde::{Deserialize, Serialize};

/// Severity grades relative to the outermost bound: at the bound, 10 %, 25 %
/// and 50 % beyond it.
pub const DEFAULT_GRADES: [(Severity, f64); 4] = [
    (Severity::Info, 1.0),
    (Severity::Warning, 1.10),
    (Severity::High, 1.25),
    (Severity::Critical, 1.50),
];

/// One severity level of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityTier {
    pub severity: Severity,
    /// Violated when `value >= upper`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    /// Violated when `value <= lower`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
}

impl SeverityTier {
    pub fn new(severity: Severity, upper: Option<f64>, lower: Option<f64>) -> Self {
        Self {
            severity,
            upper,
            lower,
        }
    }

    /// Crossed bound and direction, if any.
    pub fn check(&self, value: f64) -> Option<(f64, ThresholdDirection)> {
        if let Some(upper) = self.upper.filter(|&u| value >= u) {
            return Some((upper, ThresholdDirection::Above));
        }
        self.lower
            .filter(|&l| value <= l)
            .map(|lower| (lower, ThresholdDirection::Below))
    }
}

/// Threshold configuration for one sensor. Tiers are kept most severe first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdRule {
    pub sensor_type: SensorType,
    tiers: Vec<SeverityTier>,
}

impl ThresholdRule {
    /// Empty rule; add tiers with [`ThresholdRule::tier`].
    pub fn new(sensor_type: SensorType) -> Self {
        Self {
            sensor_type,
            tiers: Vec::new(),
        }
    }

    /// Add or replace the tier for `severity`, keeping severity order.
    pub fn tier(mut self, severity: Severity, upper: Option<f64>, lower: Option<f64>) -> Self {
        self.tiers.retain(|t| t.severity != severity);
        self.tiers.push(SeverityTier::new(severity, upper, lower));
        self.tiers.sort_by(|a, b| b.severity.cmp(&a.severity));
        self
    }

    /// Build from tiers in any order and validate the result.
    pub fn with_tiers(
        sensor_type: SensorType,
        mut tiers: Vec<SeverityTier>,
    ) -> Result<Self, RuleError> {
        tiers.sort_by(|a, b| b.severity.cmp(&a.severity));
        let rule = Self { sensor_type, tiers };
        rule.validate()?;
        Ok(rule)
    }

    /// Two-tier rule: warning at the bounds, critical `factor` times further out.
    pub fn scaled(
        sensor_type: SensorType,
        upper: Option<f64>,
        lower: Option<f64>,
        critical_factor: f64,
    ) -> Self {
        Self::graded(
            sensor_type,
            upper,
            lower,
            &[(Severity::Warning, 1.0), (Severity::Critical, critical_factor)],
        )
    }

    /// One tier per `(severity, factor)` grade, bounds scaled away from zero.
    ///
    /// A zero lower bound cannot be scaled, so only the factor-1.0 grade keeps it.
    pub fn graded(
        sensor_type: SensorType,
        upper: Option<f64>,
        lower: Option<f64>,
        grades: &[(Severity, f64)],
    ) -> Self {
        grades
            .iter()
            .fold(Self::new(sensor_type), |rule, &(severity, factor)| {
                let tier_upper = upper.map(|u| u + u.abs() * (factor - 1.0));
                let tier_lower = lower
                    .filter(|&l| l != 0.0 || factor == 1.0)
                    .map(|l| l - l.abs() * (factor - 1.0));
                rule.tier(severity, tier_upper, tier_lower)
            })
    }

    pub fn tiers(&self) -> &[SeverityTier] {
        &self.tiers
    }

    /// Least severe upper bound: the edge of the normal range.
    pub fn upper_bound(&self) -> Option<f64> {
        self.tiers
            .iter()
            .filter_map(|t| t.upper)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Least severe lower bound.
    pub fn lower_bound(&self) -> Option<f64> {
        self.tiers
            .iter()
            .filter_map(|t| t.lower)
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.tiers.is_empty() {
            return Err(RuleError::NoTiers);
        }

        for tier in &self.tiers {
            if tier.upper.is_none() && tier.lower.is_none() {
                return Err(RuleError::EmptyTier(tier.severity));
            }
            if tier.upper.is_some_and(|u| !u.is_finite())
                || tier.lower.is_some_and(|l| !l.is_finite())
            {
                return Err(RuleError::NonFiniteBound(tier.severity));
            }
            if let (Some(upper), Some(lower)) = (tier.upper, tier.lower) {
                if lower >= upper {
                    return Err(RuleError::InvertedBounds {
                        severity: tier.severity,
                        lower,
                        upper,
                    });
                }
            }
        }

        for pair in self.tiers.windows(2) {
            let (higher, lower) = (&pair[0], &pair[1]);
            if higher.severity == lower.severity {
                return Err(RuleError::DuplicateSeverity(higher.severity));
            }
            let upper_misordered = matches!((higher.upper, lower.upper), (Some(h), Some(l)) if h < l);
            let lower_misordered = matches!((higher.lower, lower.lower), (Some(h), Some(l)) if h > l);
            if upper_misordered || lower_misordered {
                return Err(RuleError::Misordered {
                    higher: higher.severity,
                    lower: lower.severity,
                });
            }
        }

        Ok(())
    }
}

/// A crossed bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub severity: Severity,
    pub threshold: f64,
    pub direction: ThresholdDirection,
}

/// Result of evaluating one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViolationOutcome {
    /// No rule configured for the sensor; not an anomaly
    NoRule,
    InRange,
    Violation(Violation),
}

pub fn evaluate(reading: &Reading, rule: Option<&ThresholdRule>) -> ViolationOutcome {
    evaluate_value(reading.value, rule)
}

pub fn evaluate_value(value: f64, rule: Option<&ThresholdRule>) -> ViolationOutcome {
    let Some(rule) = rule else {
        return ViolationOutcome::NoRule;
    };

    rule.tiers
        .iter()
        .find_map(|tier| {
            tier.check(value).map(|(threshold, direction)| Violation {
                severity: tier.severity,
                threshold,
                direction,
            })
        })
        .map_or(ViolationOutcome::InRange, ViolationOutcome::Violation)
}

/// Graded default rule for a sensor type.
///
/// Zero minimums are dropped: with inclusive bounds they would flag every
/// idle reading.
pub fn default_rule(sensor_type: SensorType) -> ThresholdRule {
    let (upper, lower) = default_envelope(sensor_type);
    let lower = (lower != 0.0).then_some(lower);
    ThresholdRule::graded(sensor_type, Some(upper), lower, &DEFAULT_GRADES)
}

/// Operating envelope `(max, min)` per sensor type.
pub const fn default_envelope(sensor_type: SensorType) -> (f64, f64) {
    match sensor_type {
        SensorType::Temperature => (80.0, -10.0),
        SensorType::Pressure => (150.0, 0.0),
        SensorType::Vibration => (10.0, 0.0),
        SensorType::FlowRate => (1000.0, 0.0),
        SensorType::Rpm => (5000.0, 0.0),
        SensorType::Voltage => (250.0, 0.0),
        SensorType::Current => (100.0, 0.0),
        SensorType::Humidity => (100.0, 0.0),
    }
}

pub fn default_rules() -> Vec<ThresholdRule> {
    SensorType::ALL.iter().map(|&s| default_rule(s)).collect()
}
