//! Statistical significance testing for A/B experiments
//!
//! This module provides the two-sample tests used to decide whether the
//! difference between control and treatment is real, along with effect
//! size, confidence interval, power and sample size planning.

use experiment_types::{ExperimentError, Result};
use statrs::distribution::{ContinuousCDF, Normal};

/// Statistical test trait
pub trait StatisticalTest {
    /// Perform the test and return p-value
    fn test(&self) -> Result<f64>;

    /// Check if result is significant at given alpha level
    fn is_significant(&self, alpha: f64) -> Result<bool> {
        Ok(self.test()? < alpha)
    }
}

/// Count, mean and unbiased variance of one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSummary {
    pub n: usize,
    pub mean: f64,
    pub variance: f64,
}

impl SampleSummary {
    /// Summarize a sample, `None` below two observations
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let n = samples.len();
        if n < 2 {
            return None;
        }

        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;

        Some(Self { n, mean, variance })
    }
}

/// Welch's unequal-variance t-test for comparing two means
///
/// The p-value uses the standard normal approximation of the t
/// distribution, which is accurate at the per-arm sample sizes the
/// analyzer requires.
#[derive(Debug, Clone)]
pub struct WelchTTest {
    /// Control arm
    pub control: SampleSummary,
    /// Treatment arm
    pub treatment: SampleSummary,
}

impl WelchTTest {
    /// Create a new Welch test from raw samples
    pub fn new(control: &[f64], treatment: &[f64]) -> Result<Self> {
        let summarize = |samples: &[f64], arm: &str| {
            SampleSummary::from_samples(samples).ok_or_else(|| {
                ExperimentError::AnalysisError(format!(
                    "Welch's t-test needs at least 2 {} samples, got {}",
                    arm,
                    samples.len()
                ))
            })
        };

        Ok(Self {
            control: summarize(control, "control")?,
            treatment: summarize(treatment, "treatment")?,
        })
    }

    /// Treatment mean minus control mean
    pub fn difference(&self) -> f64 {
        self.treatment.mean - self.control.mean
    }

    /// Standard error of the mean difference
    pub fn standard_error(&self) -> f64 {
        let (c, t) = (&self.control, &self.treatment);
        (c.variance / c.n as f64 + t.variance / t.n as f64).sqrt()
    }

    /// Calculate t-statistic
    ///
    /// With zero standard error the statistic is 0 for equal means and
    /// saturates at `f64::MAX` with the sign of the difference otherwise.
    pub fn t_statistic(&self) -> f64 {
        let se = self.standard_error();
        let diff = self.difference();
        if se == 0.0 {
            if diff == 0.0 {
                0.0
            } else {
                diff.signum() * f64::MAX
            }
        } else {
            diff / se
        }
    }

    /// Welch-Satterthwaite degrees of freedom
    pub fn degrees_of_freedom(&self) -> f64 {
        let (c, t) = (&self.control, &self.treatment);
        let a = c.variance / c.n as f64;
        let b = t.variance / t.n as f64;
        let denominator = a.powi(2) / (c.n - 1) as f64 + b.powi(2) / (t.n - 1) as f64;

        if denominator == 0.0 {
            (c.n + t.n - 2) as f64
        } else {
            (a + b).powi(2) / denominator
        }
    }

    /// Pooled standard deviation of both arms
    pub fn pooled_std(&self) -> f64 {
        let (c, t) = (&self.control, &self.treatment);
        let pooled_variance = ((c.n - 1) as f64 * c.variance + (t.n - 1) as f64 * t.variance)
            / (c.n + t.n - 2) as f64;
        pooled_variance.sqrt()
    }

    /// Calculate effect size (Cohen's d), 0.0 when both arms are constant
    pub fn cohens_d(&self) -> f64 {
        let pooled = self.pooled_std();
        if pooled == 0.0 {
            0.0
        } else {
            self.difference() / pooled
        }
    }

    /// Calculate confidence interval for the mean difference
    pub fn confidence_interval(&self, confidence: f64) -> Result<(f64, f64)> {
        let margin = self.margin_of_error(confidence)?;
        let diff = self.difference();
        Ok((diff - margin, diff + margin))
    }

    /// Half-width of the confidence interval
    pub fn margin_of_error(&self, confidence: f64) -> Result<f64> {
        Ok(z_for_confidence(confidence)? * self.standard_error())
    }

    /// Probability of detecting the observed effect at this sample size
    pub fn power(&self, alpha: f64) -> Result<f64> {
        let normal = standard_normal()?;
        let (nc, nt) = (self.control.n as f64, self.treatment.n as f64);

        let noncentrality = self.cohens_d().abs() * (nc * nt / (nc + nt)).sqrt();
        let z_alpha = normal.inverse_cdf(1.0 - alpha / 2.0);

        Ok(normal.cdf(noncentrality - z_alpha) + normal.cdf(-noncentrality - z_alpha))
    }
}

impl StatisticalTest for WelchTTest {
    /// Perform two-tailed test and return p-value
    fn test(&self) -> Result<f64> {
        if self.standard_error() == 0.0 {
            return Ok(if self.difference() == 0.0 { 1.0 } else { 0.0 });
        }

        let normal = standard_normal()?;
        let t = self.t_statistic();

        // Two-tailed p-value
        Ok(2.0 * (1.0 - normal.cdf(t.abs())))
    }
}

/// Sample size calculator for mean comparisons
pub struct SampleSizeCalculator {
    /// Baseline metric mean
    pub baseline_mean: f64,
    /// Baseline metric standard deviation
    pub baseline_std: f64,
    /// Minimum detectable effect (relative change of the mean)
    pub min_effect: f64,
    /// Statistical power (1 - beta)
    pub power: f64,
    /// Significance level (alpha)
    pub alpha: f64,
}

impl SampleSizeCalculator {
    /// Create a new sample size calculator
    pub fn new(
        baseline_mean: f64,
        baseline_std: f64,
        min_effect: f64,
        power: f64,
        alpha: f64,
    ) -> Result<Self> {
        if baseline_mean == 0.0 || !baseline_mean.is_finite() {
            return Err(ExperimentError::InvalidConfiguration(
                "Baseline mean must be finite and non-zero".to_string(),
            ));
        }

        if baseline_std <= 0.0 || !baseline_std.is_finite() {
            return Err(ExperimentError::InvalidConfiguration(
                "Baseline standard deviation must be positive".to_string(),
            ));
        }

        if min_effect == 0.0 || !min_effect.is_finite() {
            return Err(ExperimentError::InvalidConfiguration(
                "Minimum detectable effect must be non-zero".to_string(),
            ));
        }

        if power <= 0.0 || power >= 1.0 {
            return Err(ExperimentError::InvalidConfiguration(
                "Power must be between 0 and 1".to_string(),
            ));
        }

        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(ExperimentError::InvalidConfiguration(
                "Alpha must be between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            baseline_mean,
            baseline_std,
            min_effect,
            power,
            alpha,
        })
    }

    /// Calculate required sample size per variant
    pub fn calculate(&self) -> Result<usize> {
        let normal = standard_normal()?;

        let z_alpha = normal.inverse_cdf(1.0 - self.alpha / 2.0);
        let z_beta = normal.inverse_cdf(self.power);

        let delta = (self.baseline_mean * self.min_effect).abs();

        // n = 2 (z_a + z_b)^2 sigma^2 / delta^2
        let n = 2.0 * (z_alpha + z_beta).powi(2) * self.baseline_std.powi(2) / delta.powi(2);

        Ok(n.ceil() as usize)
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| ExperimentError::AnalysisError(e.to_string()))
}

/// Two-sided z critical value for a confidence level
fn z_for_confidence(confidence: f64) -> Result<f64> {
    if confidence <= 0.0 || confidence >= 1.0 {
        return Err(ExperimentError::AnalysisError(format!(
            "Confidence level must be between 0 and 1, got {}",
            confidence
        )));
    }

    let z = match confidence {
        c if (c - 0.90).abs() < 0.001 => 1.645,
        c if (c - 0.95).abs() < 0.001 => 1.96,
        c if (c - 0.99).abs() < 0.001 => 2.576,
        _ => {
            let alpha = 1.0 - confidence;
            standard_normal()?.inverse_cdf(1.0 - alpha / 2.0)
        }
    };
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Deterministic sample with the given mean and a spread of +/- `spread`
    fn sample(mean: f64, spread: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| mean + spread * (((i % 11) as f64 - 5.0) / 5.0))
            .collect()
    }

    #[test]
    fn test_sample_summary() {
        let summary = SampleSummary::from_samples(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(summary.n, 4);
        assert_relative_eq!(summary.mean, 2.5);
        // Unbiased variance of 1..4 is 5/3
        assert_relative_eq!(summary.variance, 5.0 / 3.0, epsilon = 1e-12);

        assert!(SampleSummary::from_samples(&[1.0]).is_none());
    }

    #[test]
    fn test_insufficient_data_error() {
        assert!(WelchTTest::new(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_welch_significant_difference() {
        let test = WelchTTest::new(&sample(0.80, 0.05, 100), &sample(0.90, 0.05, 100)).unwrap();

        assert!(test.t_statistic() > 0.0);
        assert!(test.test().unwrap() < 0.001);
        assert!(test.is_significant(0.05).unwrap());
        assert!(test.power(0.05).unwrap() > 0.99);
    }

    #[test]
    fn test_welch_no_difference() {
        let data = sample(0.5, 0.1, 60);
        let test = WelchTTest::new(&data, &data).unwrap();

        assert_relative_eq!(test.t_statistic(), 0.0);
        assert_relative_eq!(test.test().unwrap(), 1.0);
        assert_relative_eq!(test.cohens_d(), 0.0);
    }

    #[test]
    fn test_zero_variance_arms() {
        let equal = WelchTTest::new(&[0.5; 40], &[0.5; 40]).unwrap();
        assert_eq!(equal.test().unwrap(), 1.0);
        assert_eq!(equal.cohens_d(), 0.0);
        assert_eq!(equal.degrees_of_freedom(), 78.0);

        let different = WelchTTest::new(&[0.5; 40], &[0.6; 40]).unwrap();
        assert_eq!(different.test().unwrap(), 0.0);
        assert_eq!(different.t_statistic(), f64::MAX);
        assert_eq!(different.cohens_d(), 0.0);
    }

    #[test]
    fn test_cohens_d_and_interval_flip_under_arm_swap() {
        let a = sample(10.0, 2.0, 50);
        let b = sample(11.0, 3.0, 70);
        let forward = WelchTTest::new(&a, &b).unwrap();
        let backward = WelchTTest::new(&b, &a).unwrap();

        assert_relative_eq!(forward.cohens_d(), -backward.cohens_d(), epsilon = 1e-12);

        let (lo, hi) = forward.confidence_interval(0.95).unwrap();
        let (lo_b, hi_b) = backward.confidence_interval(0.95).unwrap();
        assert_relative_eq!(lo, -hi_b, epsilon = 1e-12);
        assert_relative_eq!(hi, -lo_b, epsilon = 1e-12);
        assert_relative_eq!(forward.test().unwrap(), backward.test().unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_confidence_interval() {
        let test = WelchTTest::new(&sample(0.80, 0.05, 100), &sample(0.90, 0.05, 100)).unwrap();
        let (lower, upper) = test.confidence_interval(0.95).unwrap();

        // Interval should contain the difference
        assert!(lower < 0.1 && 0.1 < upper);
        assert_relative_eq!(upper - lower, 2.0 * 1.96 * test.standard_error(), epsilon = 1e-12);

        assert!(test.confidence_interval(1.0).is_err());
    }

    #[test]
    fn test_degrees_of_freedom_between_bounds() {
        let test = WelchTTest::new(&sample(1.0, 0.5, 30), &sample(1.2, 2.0, 80)).unwrap();
        let df = test.degrees_of_freedom();
        assert!(df >= 29.0);
        assert!(df <= 108.0);
    }

    #[test]
    fn test_power_without_effect_equals_alpha() {
        let data = sample(3.0, 1.0, 50);
        let test = WelchTTest::new(&data, &data).unwrap();
        assert_relative_eq!(test.power(0.05).unwrap(), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_sample_size_calculator() {
        let calc = SampleSizeCalculator::new(
            0.80, // baseline accuracy
            0.10, // standard deviation
            0.05, // 5% relative improvement (0.80 -> 0.84)
            0.8,  // 80% power
            0.05, // 5% significance
        )
        .unwrap();

        let n = calc.calculate().unwrap();

        // 2 * (1.96 + 0.8416)^2 * 0.01 / 0.0016 ~= 98.1
        assert_eq!(n, 99);
    }

    #[test]
    fn test_sample_size_larger_effect() {
        let small_effect = SampleSizeCalculator::new(0.8, 0.1, 0.02, 0.8, 0.05)
            .unwrap()
            .calculate()
            .unwrap();

        let large_effect = SampleSizeCalculator::new(0.8, 0.1, 0.10, 0.8, 0.05)
            .unwrap()
            .calculate()
            .unwrap();

        // Larger effect requires smaller sample
        assert!(large_effect < small_effect);
    }

    #[test]
    fn test_sample_size_rejects_invalid_input() {
        assert!(SampleSizeCalculator::new(0.0, 0.1, 0.05, 0.8, 0.05).is_err());
        assert!(SampleSizeCalculator::new(0.8, 0.0, 0.05, 0.8, 0.05).is_err());
        assert!(SampleSizeCalculator::new(0.8, 0.1, 0.0, 0.8, 0.05).is_err());
        assert!(SampleSizeCalculator::new(0.8, 0.1, 0.05, 1.0, 0.05).is_err());
        assert!(SampleSizeCalculator::new(0.8, 0.1, 0.05, 0.8, 0.0).is_err());
    }
}
