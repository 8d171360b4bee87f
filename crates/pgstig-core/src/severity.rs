//! STIG severity categories

use serde::{Deserialize, Serialize};

/// Severity of a control, as assigned by the benchmark
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No impact score assigned
    #[default]
    None,
    /// CAT III
    Low,
    /// CAT II
    Medium,
    /// CAT I
    High,
}

impl Severity {
    /// Convert a benchmark impact score (0.0 - 1.0) to severity
    pub fn from_impact(impact: f32) -> Self {
        match impact {
            i if i >= 0.7 => Severity::High,
            i if i >= 0.4 => Severity::Medium,
            i if i >= 0.1 => Severity::Low,
            _ => Severity::None,
        }
    }

    /// Canonical impact score for this severity
    pub fn impact(&self) -> f32 {
        match self {
            Severity::None => 0.0,
            Severity::Low => 0.3,
            Severity::Medium => 0.5,
            Severity::High => 0.7,
        }
    }

    /// DISA category label
    pub fn category(&self) -> &'static str {
        match self {
            Severity::High => "CAT I",
            Severity::Medium => "CAT II",
            Severity::Low => "CAT III",
            Severity::None => "-",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Severity::None),
            "low" | "cat3" | "cat iii" => Ok(Severity::Low),
            "medium" | "cat2" | "cat ii" => Ok(Severity::Medium),
            "high" | "cat1" | "cat i" => Ok(Severity::High),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impact_to_severity() {
        assert_eq!(Severity::from_impact(0.7), Severity::High);
        assert_eq!(Severity::from_impact(0.5), Severity::Medium);
        assert_eq!(Severity::from_impact(0.3), Severity::Low);
        assert_eq!(Severity::from_impact(0.0), Severity::None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::None);
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert_eq!("cat ii".parse::<Severity>(), Ok(Severity::Medium));
        assert!("urgent".parse::<Severity>().is_err());
    }
}
