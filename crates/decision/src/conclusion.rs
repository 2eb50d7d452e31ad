//! Experiment conclusions
//!
//! Turns the final statistics into a winner, a deployment recommendation
//! and the business impact and risk summaries shown to humans.

use experiment_types::{
    Experiment, ExperimentConclusion, ExperimentStatistics, ModelMetrics, Recommendation,
    RiskLevel, Variant, Winner,
};

/// Error rate increase (absolute) that counts as a risk
pub const ERROR_RATE_RISK: f64 = 0.01;
/// Latency increase in seconds that counts as a risk
pub const LATENCY_RISK_SECS: f64 = 0.1;
/// Relative memory increase that counts as a risk
pub const MEMORY_RISK_RATIO: f64 = 0.2;

const NO_RISKS: &str = "No significant risks identified";

/// Conclusion generator
pub struct ConclusionGenerator;

impl ConclusionGenerator {
    /// Conclude an experiment from its final statistics
    pub fn conclude(
        statistics: &ExperimentStatistics,
        experiment: &Experiment,
    ) -> ExperimentConclusion {
        let business_impact = Self::business_impact(statistics, experiment);
        let risk_assessment = Self::risk_assessment(
            &statistics.control_metrics,
            &statistics.treatment_metrics,
            experiment,
        );

        let Some(metric) = experiment.primary_metric() else {
            return ExperimentConclusion {
                winner: Winner::Inconclusive,
                confidence: 0.0,
                summary: "Experiment declares no success metric".to_string(),
                business_impact,
                recommendation: Recommendation::RedesignExperiment,
                risk_assessment,
            };
        };

        let significant = statistics
            .test_for(&metric.name)
            .filter(|test| test.is_significant);

        if let Some(test) = significant {
            let variant = if metric
                .direction
                .prefers(test.treatment_mean, test.control_mean)
            {
                Variant::Treatment
            } else {
                Variant::Control
            };
            let recommendation = match variant {
                Variant::Treatment => Recommendation::DeployTreatment,
                Variant::Control => Recommendation::KeepControl,
            };
            let winner_model = experiment.model(variant);
            let (winning_mean, losing_mean) = match variant {
                Variant::Treatment => (test.treatment_mean, test.control_mean),
                Variant::Control => (test.control_mean, test.treatment_mean),
            };

            return ExperimentConclusion {
                winner: variant.into(),
                confidence: test.confidence(),
                summary: format!(
                    "{} ({} {}) wins on {}: {:.4} vs {:.4} (p = {:.4})",
                    Winner::from(variant),
                    winner_model.name,
                    winner_model.version,
                    metric.name,
                    winning_mean,
                    losing_mean,
                    test.p_value
                ),
                business_impact,
                recommendation,
                risk_assessment,
            };
        }

        let total = statistics.sample_sizes.total();
        let primary_samples = statistics
            .coverage_for(&metric.name)
            .map(|c| c.total())
            .unwrap_or(0);
        let min_total = 2 * experiment.configuration.min_sample_size;

        let (recommendation, summary) = if total > 0 && primary_samples == 0 {
            (
                Recommendation::RedesignExperiment,
                format!(
                    "None of the {} recorded events carried the primary metric {}",
                    total, metric.name
                ),
            )
        } else if total < min_total {
            (
                Recommendation::RunLonger,
                format!(
                    "No significant difference on {} yet after {} of {} required samples",
                    metric.name, total, min_total
                ),
            )
        } else {
            (
                Recommendation::Inconclusive,
                format!(
                    "No statistically significant difference on {} after {} samples",
                    metric.name, total
                ),
            )
        };

        ExperimentConclusion {
            winner: Winner::Inconclusive,
            confidence: 0.0,
            summary,
            business_impact,
            recommendation,
            risk_assessment,
        }
    }

    /// Free-text follow-ups, one line per concern
    pub fn recommendations(
        statistics: &ExperimentStatistics,
        experiment: &Experiment,
        conclusion: &ExperimentConclusion,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        let config = &experiment.configuration;

        match conclusion.recommendation {
            Recommendation::DeployTreatment => lines.push(format!(
                "Roll out {} {} to all users",
                experiment.treatment.name, experiment.treatment.version
            )),
            Recommendation::KeepControl => lines.push(format!(
                "Keep {} {} in production",
                experiment.control.name, experiment.control.version
            )),
            Recommendation::RunLonger => lines.push(format!(
                "Collect at least {} samples per arm before deciding",
                config.min_sample_size
            )),
            Recommendation::RedesignExperiment => lines.push(
                "Check that clients report the primary metric under its configured name".to_string(),
            ),
            Recommendation::Inconclusive => lines.push(
                "Consider a larger expected effect or a more sensitive primary metric".to_string(),
            ),
        }

        if conclusion.risk_assessment != NO_RISKS {
            lines.push(format!("Review risks: {}", conclusion.risk_assessment));
        }

        if !statistics.sample_sizes.adequate_power {
            lines.push(format!(
                "Sample size below the configured minimum of {} per arm ({} control, {} treatment)",
                config.min_sample_size,
                statistics.sample_sizes.control,
                statistics.sample_sizes.treatment
            ));
        }

        for coverage in statistics.coverage.iter().filter(|c| !c.tested) {
            lines.push(format!(
                "Metric {} was not tested: {} control and {} treatment samples",
                coverage.metric_name, coverage.control_samples, coverage.treatment_samples
            ));
        }

        lines
    }

    /// Relative change of the primary metric, bucketed
    fn business_impact(statistics: &ExperimentStatistics, experiment: &Experiment) -> String {
        let Some(metric) = experiment.primary_metric() else {
            return "Impact could not be quantified: no primary metric".to_string();
        };
        let Some(test) = statistics.test_for(&metric.name) else {
            return format!(
                "Impact could not be quantified: {} was not tested",
                metric.name
            );
        };
        if test.control_mean == 0.0 {
            return format!(
                "Impact could not be quantified: control baseline for {} is 0",
                metric.name
            );
        }

        let change = (test.treatment_mean - test.control_mean) / test.control_mean.abs() * 100.0;
        let level = match change.abs() {
            c if c < 1.0 => "Minimal",
            c if c < 5.0 => "Low",
            c if c < 15.0 => "Moderate",
            _ => "High",
        };

        format!("{} impact: {} changed by {:+.2}%", level, metric.name, change)
    }

    fn risk_assessment(
        control: &ModelMetrics,
        treatment: &ModelMetrics,
        experiment: &Experiment,
    ) -> String {
        let mut risks = Vec::new();

        let error_increase = treatment.error_rate - control.error_rate;
        if error_increase > ERROR_RATE_RISK {
            risks.push(format!(
                "error rate up {:.1} percentage points",
                error_increase * 100.0
            ));
        }

        let latency_increase = treatment.latency - control.latency;
        if latency_increase > LATENCY_RISK_SECS {
            risks.push(format!("latency up {:.0} ms", latency_increase * 1000.0));
        }

        if control.memory_usage > 0.0 {
            let memory_increase = (treatment.memory_usage - control.memory_usage) / control.memory_usage;
            if memory_increase > MEMORY_RISK_RATIO {
                risks.push(format!("memory usage up {:.0}%", memory_increase * 100.0));
            }
        }

        if experiment.treatment.risk_level == RiskLevel::High {
            risks.push("treatment model is marked high risk".to_string());
        }

        if risks.is_empty() {
            NO_RISKS.to_string()
        } else {
            format!("Treatment risks: {}", risks.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use experiment_types::{
        ExperimentConfiguration, ExperimentModel, ExperimentSpec, ImprovementDirection,
        MetricCoverage, MetricKind, SampleSizes, StatisticalTestResult, SuccessMetric,
    };

    fn experiment(direction: ImprovementDirection) -> Experiment {
        let spec = ExperimentSpec::new(
            "summarizer",
            ExperimentModel::new("summarizer", "1.0", "sum-1"),
            ExperimentModel::new("summarizer", "1.1", "sum-2"),
        )
        .with_metric(SuccessMetric::new(
            "score",
            MetricKind::Custom,
            direction,
            1.0,
        ));
        Experiment::from_spec(spec, ExperimentConfiguration::default())
    }

    fn stats(control_mean: f64, treatment_mean: f64, p_value: f64, n: usize) -> ExperimentStatistics {
        ExperimentStatistics {
            tests: vec![StatisticalTestResult {
                metric_name: "score".to_string(),
                test_name: "Welch's t-test".to_string(),
                control_mean,
                treatment_mean,
                t_statistic: 3.0,
                degrees_of_freedom: 2.0 * n as f64 - 2.0,
                p_value,
                is_significant: p_value < 0.05,
                power: 0.9,
            }],
            sample_sizes: SampleSizes {
                control: n,
                treatment: n,
                adequate_power: n >= 100,
            },
            coverage: vec![MetricCoverage {
                metric_name: "score".to_string(),
                control_samples: n,
                treatment_samples: n,
                tested: true,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_significant_increase_deploys_treatment() {
        let experiment = experiment(ImprovementDirection::Increase);
        let conclusion = ConclusionGenerator::conclude(&stats(0.80, 0.90, 0.001, 100), &experiment);

        assert_eq!(conclusion.winner, Winner::Treatment);
        assert_eq!(conclusion.recommendation, Recommendation::DeployTreatment);
        assert!((conclusion.confidence - 0.999).abs() < 1e-12);
        assert!(conclusion.business_impact.starts_with("Moderate impact"));
    }

    #[test]
    fn test_decrease_direction_picks_lower_mean() {
        let experiment = experiment(ImprovementDirection::Decrease);
        let conclusion = ConclusionGenerator::conclude(&stats(0.80, 0.90, 0.001, 100), &experiment);

        assert_eq!(conclusion.winner, Winner::Control);
        assert_eq!(conclusion.recommendation, Recommendation::KeepControl);
    }

    #[test]
    fn test_not_significant_with_few_samples_runs_longer() {
        let experiment = experiment(ImprovementDirection::Increase);
        let conclusion = ConclusionGenerator::conclude(&stats(0.80, 0.805, 0.4, 60), &experiment);

        assert_eq!(conclusion.winner, Winner::Inconclusive);
        assert_eq!(conclusion.recommendation, Recommendation::RunLonger);
        assert_eq!(conclusion.confidence, 0.0);
        assert!(conclusion.business_impact.starts_with("Minimal impact"));
    }

    #[test]
    fn test_not_significant_with_enough_samples_is_inconclusive() {
        let experiment = experiment(ImprovementDirection::Increase);
        let conclusion = ConclusionGenerator::conclude(&stats(0.80, 0.805, 0.4, 100), &experiment);
        assert_eq!(conclusion.recommendation, Recommendation::Inconclusive);
    }

    #[test]
    fn test_missing_primary_metric_asks_for_redesign() {
        let experiment = experiment(ImprovementDirection::Increase);
        let statistics = ExperimentStatistics {
            sample_sizes: SampleSizes {
                control: 80,
                treatment: 80,
                adequate_power: false,
            },
            coverage: vec![MetricCoverage {
                metric_name: "score".to_string(),
                control_samples: 0,
                treatment_samples: 0,
                tested: false,
            }],
            ..Default::default()
        };

        let conclusion = ConclusionGenerator::conclude(&statistics, &experiment);
        assert_eq!(conclusion.recommendation, Recommendation::RedesignExperiment);
        assert!(conclusion.business_impact.contains("could not be quantified"));

        let lines = ConclusionGenerator::recommendations(&statistics, &experiment, &conclusion);
        assert!(lines.iter().any(|l| l.contains("Metric score was not tested")));
        assert!(lines.iter().any(|l| l.contains("below the configured minimum")));
    }

    #[test]
    fn test_empty_data_runs_longer() {
        let experiment = experiment(ImprovementDirection::Increase);
        let conclusion = ConclusionGenerator::conclude(&ExperimentStatistics::default(), &experiment);
        assert_eq!(conclusion.recommendation, Recommendation::RunLonger);
    }

    #[test]
    fn test_zero_baseline_impact() {
        let experiment = experiment(ImprovementDirection::Increase);
        let conclusion = ConclusionGenerator::conclude(&stats(0.0, 0.2, 0.001, 100), &experiment);
        assert!(conclusion.business_impact.contains("baseline"));
    }

    #[test]
    fn test_risk_assessment_flags() {
        let experiment = experiment(ImprovementDirection::Increase);
        let control = ModelMetrics {
            error_rate: 0.02,
            latency: 0.30,
            memory_usage: 100.0,
            ..Default::default()
        };
        let risky = ModelMetrics {
            error_rate: 0.04,
            latency: 0.45,
            memory_usage: 130.0,
            ..Default::default()
        };

        let text = ConclusionGenerator::risk_assessment(&control, &risky, &experiment);
        assert!(text.contains("error rate up 2.0 percentage points"));
        assert!(text.contains("latency up 150 ms"));
        assert!(text.contains("memory usage up 30%"));

        let safe = ModelMetrics {
            error_rate: 0.025,
            latency: 0.35,
            memory_usage: 110.0,
            ..Default::default()
        };
        assert_eq!(
            ConclusionGenerator::risk_assessment(&control, &safe, &experiment),
            NO_RISKS
        );
    }

    #[test]
    fn test_deploy_recommendations_mention_treatment() {
        let experiment = experiment(ImprovementDirection::Increase);
        let statistics = stats(0.80, 0.90, 0.001, 100);
        let conclusion = ConclusionGenerator::conclude(&statistics, &experiment);
        let lines = ConclusionGenerator::recommendations(&statistics, &experiment, &conclusion);

        assert_eq!(lines, vec!["Roll out summarizer 1.1 to all users".to_string()]);
    }
}
