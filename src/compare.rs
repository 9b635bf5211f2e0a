use std::fmt::Display;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cost::{estimate_cost, CostEstimate};
use crate::error::FailureKind;
use crate::job::JobResult;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Serverless `runsync` endpoints
    Remote,
    /// Subprocesses on this machine
    Local,
}

/// One side of a comparison.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelRun {
    /// Identifier used for the rate lookup, e.g. `sadtalker`
    pub model_id: String,
    pub label: String,
    pub image_reference: Url,
    pub audio_reference: Url,
    pub result: JobResult,
    /// Present only for successful runs
    pub cost: Option<CostEstimate>,
}

impl ModelRun {
    pub fn new(
        model_id: impl Into<String>,
        label: impl Into<String>,
        image_reference: Url,
        audio_reference: Url,
        result: JobResult,
    ) -> Self {
        let model_id = model_id.into();
        let cost = result
            .is_success()
            .then(|| estimate_cost(result.elapsed_seconds(), &model_id));
        Self {
            model_id,
            label: label.into(),
            image_reference,
            audio_reference,
            result,
            cost,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Verdict {
    pub winner: String,
    /// First minus second. Positive means the second model wins
    pub difference: f64,
    pub margin: f64,
    /// Zero difference. The winner label then defaults to the second model
    pub tie: bool,
}

impl Verdict {
    fn decide(first: &str, second: &str, first_value: f64, second_value: f64) -> Self {
        let difference = first_value - second_value;
        let winner = if difference < 0.0 { first } else { second };
        Self {
            winner: winner.to_string(),
            difference,
            margin: difference.abs(),
            tie: difference == 0.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Comparison {
    pub speed: Verdict,
    pub cost: Verdict,
    /// First elapsed time divided by the second, when the second is positive
    pub speed_ratio: Option<f64>,
    pub first_output_mib: f64,
    pub second_output_mib: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SideFailure {
    pub label: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Compared(Comparison),
    Failed { failures: Vec<SideFailure> },
}

/// Decides speed and cost winners, or lists the failed sides when either run failed.
pub fn compare(first: &ModelRun, second: &ModelRun) -> Outcome {
    let failures: Vec<SideFailure> = [first, second]
        .into_iter()
        .filter_map(|run| match &run.result {
            JobResult::Failure {
                kind, error_message, ..
            } => Some(SideFailure {
                label: run.label.clone(),
                kind: *kind,
                message: error_message.clone(),
            }),
            JobResult::Success { .. } => None,
        })
        .collect();
    if !failures.is_empty() {
        return Outcome::Failed { failures };
    }

    let first_elapsed = first.result.elapsed_seconds();
    let second_elapsed = second.result.elapsed_seconds();
    let first_cost = cost_of(first);
    let second_cost = cost_of(second);

    Outcome::Compared(Comparison {
        speed: Verdict::decide(&first.label, &second.label, first_elapsed, second_elapsed),
        cost: Verdict::decide(&first.label, &second.label, first_cost, second_cost),
        speed_ratio: (second_elapsed > 0.0).then(|| first_elapsed / second_elapsed),
        first_output_mib: output_mib(first),
        second_output_mib: output_mib(second),
    })
}

fn cost_of(run: &ModelRun) -> f64 {
    run.cost
        .unwrap_or_else(|| estimate_cost(run.result.elapsed_seconds(), &run.model_id))
        .computed_cost
}

fn output_mib(run: &ModelRun) -> f64 {
    run.result.output_size_bytes().unwrap_or(0) as f64 / BYTES_PER_MIB
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub generated_at: DateTime<Utc>,
    pub transport: Transport,
    /// Duration of the whole run, both invocations included
    pub total_wall_seconds: f64,
    pub first: ModelRun,
    pub second: ModelRun,
    pub outcome: Outcome,
}

impl ComparisonReport {
    pub fn new(
        transport: Transport,
        first: ModelRun,
        second: ModelRun,
        total_wall_seconds: f64,
    ) -> Self {
        let outcome = compare(&first, &second);
        Self {
            generated_at: Utc::now(),
            transport,
            total_wall_seconds,
            first,
            second,
            outcome,
        }
    }

    pub fn is_compared(&self) -> bool {
        matches!(self.outcome, Outcome::Compared(_))
    }

    pub fn file_name(&self) -> String {
        format!(
            "comparison_results_{}.json",
            self.generated_at
                .with_timezone(&Local)
                .format("%Y%m%d_%H%M%S")
        )
    }

    /// Writes the report as pretty JSON into `dir` and returns the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        let path = dir.join(self.file_name());
        let file = File::create(&path)
            .with_context(|| format!("Failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write report file {}", path.display()))?;
        Ok(path)
    }
}

impl Display for ComparisonReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (first, second) = (&self.first, &self.second);
        writeln!(f, "COMPARISON RESULTS ({:?})", self.transport)?;
        writeln!(f, "{}", "=".repeat(60))?;

        let comparison = match &self.outcome {
            Outcome::Failed { failures } => {
                writeln!(f, "One or both models failed:")?;
                for failure in failures {
                    writeln!(
                        f,
                        "   {} failed ({}): {}",
                        failure.label, failure.kind, failure.message
                    )?;
                }
                return write!(f, "\nTotal test time: {:.2}s", self.total_wall_seconds);
            }
            Outcome::Compared(comparison) => comparison,
        };

        writeln!(f, "PROCESSING TIME:")?;
        writeln!(f, "   {:<10} {:.2}s", first.label, first.result.elapsed_seconds())?;
        writeln!(f, "   {:<10} {:.2}s", second.label, second.result.elapsed_seconds())?;
        writeln!(
            f,
            "   {} is {:.2}s faster{}",
            comparison.speed.winner,
            comparison.speed.margin,
            tie_note(&comparison.speed)
        )?;

        writeln!(f, "\nCOST:")?;
        for run in [first, second] {
            if let Some(cost) = &run.cost {
                writeln!(f, "   {:<10} ${:.4}", run.label, cost.computed_cost)?;
            }
        }
        writeln!(
            f,
            "   {} is ${:.4} cheaper{}",
            comparison.cost.winner,
            comparison.cost.margin,
            tie_note(&comparison.cost)
        )?;

        if comparison.first_output_mib > 0.0 && comparison.second_output_mib > 0.0 {
            writeln!(f, "\nOUTPUT FILE SIZE:")?;
            writeln!(f, "   {:<10} {:.2} MB", first.label, comparison.first_output_mib)?;
            writeln!(f, "   {:<10} {:.2} MB", second.label, comparison.second_output_mib)?;
        }

        writeln!(f, "\nSUMMARY:")?;
        writeln!(f, "   Speed winner: {}", comparison.speed.winner)?;
        writeln!(f, "   Cost winner:  {}", comparison.cost.winner)?;
        if let Some(ratio) = comparison.speed_ratio {
            writeln!(
                f,
                "   {} takes {:.2}x the time of {}",
                first.label, ratio, second.label
            )?;
        }

        writeln!(f, "\nDETAILED COST ANALYSIS:")?;
        for run in [first, second] {
            if let Some(cost) = &run.cost {
                writeln!(f, "   {}:", run.label)?;
                writeln!(f, "     - Processing:  {:.4} hours", cost.gpu_hours())?;
                writeln!(
                    f,
                    "     - GPU cost:    ${:.4} at ${:.2}/hour",
                    cost.gpu_cost, cost.gpu_rate_per_hour
                )?;
                writeln!(f, "     - Service fee: ${:.4}", cost.service_fee)?;
                writeln!(f, "     - Total:       ${:.4}", cost.computed_cost)?;
            }
        }
        write!(f, "\nTotal test time: {:.2}s", self.total_wall_seconds)
    }
}

fn tie_note(verdict: &Verdict) -> &'static str {
    if verdict.tie {
        " (tie)"
    } else {
        ""
    }
}
