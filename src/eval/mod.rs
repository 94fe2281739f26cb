//! Judge pass: grade an execution result against declared criteria.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::EvaluationCriterion;
use crate::error::Result;
use crate::model::{CompletionRequest, ModelCaller};

/// Verdict for a single criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionResult {
    pub name: String,
    pub passed: bool,
    pub required: bool,
    #[serde(default)]
    pub feedback: String,
}

/// Verdict for one evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Zero-based iteration this verdict belongs to.
    pub iteration: u32,
    pub passed: bool,
    /// Fraction of graded criteria that passed, in [0, 1].
    pub score: f64,
    pub feedback: String,
    pub criteria: Vec<CriterionResult>,
}

#[derive(Debug, Default, Deserialize)]
struct Verdict {
    #[serde(default)]
    criteria: Vec<VerdictCriterion>,
    #[serde(default)]
    feedback: String,
}

#[derive(Debug, Deserialize)]
struct VerdictCriterion {
    name: String,
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    feedback: String,
}

/// Grades execution results with a judge-style model pass.
pub struct Evaluator {
    caller: Arc<dyn ModelCaller>,
    model: Option<String>,
}

impl Evaluator {
    pub fn new(caller: Arc<dyn ModelCaller>) -> Self {
        Self {
            caller,
            model: None,
        }
    }

    /// Use a specific judge model instead of the backend default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Run one judge pass.
    ///
    /// `passed` holds when every required criterion passed (every criterion,
    /// when none is marked required); `score` is the passing fraction over
    /// the same set.
    pub async fn evaluate(
        &self,
        result: &str,
        task: &str,
        criteria: &[EvaluationCriterion],
        iteration: u32,
    ) -> Result<EvaluationResult> {
        let prompt = judge_prompt(result, task, criteria);
        let completion = self
            .caller
            .complete(&CompletionRequest {
                model: self.model.clone(),
                system: Some(
                    "You are a strict evaluator. Grade the candidate result against each \
                     criterion and reply with JSON only."
                        .into(),
                ),
                prompt,
            })
            .await?;

        let verdict = extract_verdict(&completion);
        Ok(score_verdict(verdict, criteria, iteration))
    }
}

fn judge_prompt(result: &str, task: &str, criteria: &[EvaluationCriterion]) -> String {
    let mut prompt = format!("Task:\n{task}\n\nCandidate result:\n{result}\n\nCriteria:\n");
    for criterion in criteria {
        let requirement = if criterion.required {
            "required"
        } else {
            "optional"
        };
        prompt.push_str(&format!(
            "- {} ({requirement}): {}\n",
            criterion.name, criterion.description
        ));
    }
    prompt.push_str(
        "\nReply with a single JSON object of the form:\n\
         {\"criteria\": [{\"name\": \"<criterion>\", \"passed\": true, \"feedback\": \"…\"}], \
         \"feedback\": \"overall feedback\"}\n",
    );
    prompt
}

/// Pull a verdict object out of the judge's completion, tolerantly.
fn extract_verdict(completion: &str) -> Verdict {
    let trimmed = completion.trim();
    if let Ok(verdict) = serde_json::from_str::<Verdict>(trimmed) {
        return verdict;
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(verdict) = serde_json::from_str::<Verdict>(&trimmed[start..=end]) {
                return verdict;
            }
        }
    }
    Verdict::default()
}

fn score_verdict(
    verdict: Verdict,
    criteria: &[EvaluationCriterion],
    iteration: u32,
) -> EvaluationResult {
    let results: Vec<CriterionResult> = criteria
        .iter()
        .map(|criterion| {
            match verdict
                .criteria
                .iter()
                .find(|v| v.name == criterion.name)
            {
                Some(graded) => CriterionResult {
                    name: criterion.name.clone(),
                    passed: graded.passed,
                    required: criterion.required,
                    feedback: graded.feedback.clone(),
                },
                None => CriterionResult {
                    name: criterion.name.clone(),
                    passed: false,
                    required: criterion.required,
                    feedback: "not assessed by the judge".into(),
                },
            }
        })
        .collect();

    let graded: Vec<&CriterionResult> = if results.iter().any(|r| r.required) {
        results.iter().filter(|r| r.required).collect()
    } else {
        results.iter().collect()
    };

    let passed = graded.iter().all(|r| r.passed);
    let score = if graded.is_empty() {
        1.0
    } else {
        graded.iter().filter(|r| r.passed).count() as f64 / graded.len() as f64
    };

    let mut unmet: Vec<String> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| format!("criterion '{}': {}", r.name, r.feedback))
        .collect();
    if !verdict.feedback.is_empty() {
        unmet.push(verdict.feedback);
    }
    let feedback = if unmet.is_empty() {
        "all criteria met".to_string()
    } else {
        unmet.join("\n")
    };

    EvaluationResult {
        iteration,
        passed,
        score,
        feedback,
        criteria: results,
    }
}
