use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Display values that never carry a score, whatever the result type.
pub const NOT_EVALUATED_VALUES: [&str; 2] = ["N/A", "Non évalué"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyFramework {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub domains: Vec<Domain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub competencies: Vec<Competency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Competency {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub specific_competencies: Vec<SpecificCompetency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpecificCompetency {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub result_type_config_id: Option<String>,
}

/// Maps symbolic evaluation values onto pivot values in `[0, 10]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", from = "RawResultTypeConfig")]
pub struct ResultTypeConfig {
    pub id: String,
    pub name: String,
    pub values: Vec<ResultTypeValue>,
}

impl ResultTypeConfig {
    pub fn find_value(&self, value: &str) -> Option<&ResultTypeValue> {
        self.values.iter().find(|v| v.value == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultTypeValue {
    pub value: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "pivot_value")]
    pub pivot_value: Option<f64>,
}

// Configs arrive either flat (`values`) or with the stored `config.values` nesting.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResultTypeConfig {
    id: String,
    name: String,
    #[serde(default)]
    values: Option<Vec<ResultTypeValue>>,
    #[serde(default)]
    config: Option<RawResultTypeBody>,
}

#[derive(Deserialize)]
struct RawResultTypeBody {
    #[serde(default)]
    values: Vec<ResultTypeValue>,
}

impl From<RawResultTypeConfig> for ResultTypeConfig {
    fn from(raw: RawResultTypeConfig) -> Self {
        let values = raw
            .values
            .or_else(|| raw.config.map(|c| c.values))
            .unwrap_or_default();
        Self {
            id: raw.id,
            name: raw.name,
            values,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub class_id: Option<String>,
}

impl Student {
    pub fn new(
        id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        class_id: Option<String>,
    ) -> Self {
        let first_name = first_name.into();
        let last_name = last_name.into();
        let display_name = display_name(&first_name, &last_name);
        Self {
            id: id.into(),
            first_name,
            last_name,
            display_name,
            class_id,
        }
    }
}

/// `"{first} {L}."`, or the first name alone when there is no last name.
pub fn display_name(first_name: &str, last_name: &str) -> String {
    let first = first_name.trim();
    match last_name.trim().chars().next() {
        Some(initial) => format!("{} {}.", first, initial.to_uppercase()),
        None => first.to_string(),
    }
}

/// Legacy fixed evaluation scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    A,
    B,
    C,
    D,
    E,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::A => "A",
            Level::B => "B",
            Level::C => "C",
            Level::D => "D",
            Level::E => "E",
            Level::NotApplicable => "N/A",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "A" => Some(Level::A),
            "B" => Some(Level::B),
            "C" => Some(Level::C),
            "D" => Some(Level::D),
            "E" => Some(Level::E),
            "N/A" => Some(Level::NotApplicable),
            _ => None,
        }
    }

    /// Ordinal score for results predating result type configs.
    /// `N/A` has no score; it is excluded from averages rather than counted as 0.
    pub fn legacy_score(self) -> Option<f64> {
        match self {
            Level::A => Some(5.0),
            Level::B => Some(4.0),
            Level::C => Some(3.0),
            Level::D => Some(2.0),
            Level::E => Some(1.0),
            Level::NotApplicable => None,
        }
    }
}

/// The authoritative evaluation value of a result, resolved once at ingestion
/// with the order `value`, then `level`, then nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(String),
    Level(Level),
    Missing,
}

impl Outcome {
    pub fn from_parts(value: Option<String>, level: Option<Level>) -> Self {
        match (value, level) {
            (Some(v), _) if !v.trim().is_empty() => Outcome::Value(v),
            (_, Some(l)) => Outcome::Level(l),
            _ => Outcome::Missing,
        }
    }

    /// Display value: `value ?? level ?? "N/A"`.
    pub fn as_str(&self) -> &str {
        match self {
            Outcome::Value(v) => v.as_str(),
            Outcome::Level(l) => l.as_str(),
            Outcome::Missing => "N/A",
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Outcome::Value(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn level(&self) -> Option<Level> {
        match self {
            Outcome::Level(l) => Some(*l),
            _ => None,
        }
    }

    /// True when the display value names an actual evaluation.
    pub fn is_evaluated(&self) -> bool {
        let s = self.as_str().trim();
        !s.is_empty() && !NOT_EVALUATED_VALUES.contains(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEvaluationResult", into = "RawEvaluationResult")]
pub struct EvaluationResult {
    pub id: String,
    pub evaluation_id: String,
    pub student_id: String,
    pub competency_id: String,
    pub specific_competency_id: Option<String>,
    pub outcome: Outcome,
    pub comment: Option<String>,
    pub evaluated_at: String,
}

impl EvaluationResult {
    /// Key of the upsert invariant within one evaluation: the specific
    /// competency, or the competency itself for legacy rows.
    pub fn result_key(&self) -> &str {
        self.specific_competency_id
            .as_deref()
            .unwrap_or(self.competency_id.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvaluationResult {
    #[serde(default)]
    id: String,
    #[serde(default)]
    evaluation_id: String,
    student_id: String,
    competency_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    specific_competency_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default)]
    evaluated_at: String,
    #[serde(default, skip_deserializing)]
    resolved_value: String,
}

impl From<RawEvaluationResult> for EvaluationResult {
    fn from(raw: RawEvaluationResult) -> Self {
        Self {
            id: raw.id,
            evaluation_id: raw.evaluation_id,
            student_id: raw.student_id,
            competency_id: raw.competency_id,
            specific_competency_id: raw.specific_competency_id,
            outcome: Outcome::from_parts(raw.value, raw.level),
            comment: raw.comment,
            evaluated_at: raw.evaluated_at,
        }
    }
}

impl From<EvaluationResult> for RawEvaluationResult {
    fn from(r: EvaluationResult) -> Self {
        let resolved_value = r.outcome.as_str().to_string();
        let (value, level) = match r.outcome {
            Outcome::Value(v) => (Some(v), None),
            Outcome::Level(l) => (None, Some(l)),
            Outcome::Missing => (None, None),
        };
        Self {
            id: r.id,
            evaluation_id: r.evaluation_id,
            student_id: r.student_id,
            competency_id: r.competency_id,
            specific_competency_id: r.specific_competency_id,
            level,
            value,
            comment: r.comment,
            evaluated_at: r.evaluated_at,
            resolved_value,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub name: String,
    pub description: String,
    pub framework_id: String,
    pub class_id: Option<String>,
    pub created_at: String,
    pub results: Vec<EvaluationResult>,
}

#[derive(Debug, Error, PartialEq)]
pub enum FrameworkError {
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },

    #[error("duplicate {kind} id '{id}' under '{parent}'")]
    DuplicateId {
        kind: &'static str,
        id: String,
        parent: String,
    },

    #[error("specific competency '{specific_id}' references unknown result type config '{config_id}'")]
    UnknownResultType {
        specific_id: String,
        config_id: String,
    },

    #[error("result type config '{config_id}' value '{value}' has pivot value {pivot} outside [0, 10]")]
    PivotOutOfRange {
        config_id: String,
        value: String,
        pivot: f64,
    },

    #[error("result type config '{config_id}' lists value '{value}' more than once")]
    DuplicateValue { config_id: String, value: String },
}

fn check_unique<'a, I>(kind: &'static str, parent: &str, ids: I) -> Result<(), FrameworkError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(FrameworkError::EmptyId { kind });
        }
        if !seen.insert(id) {
            return Err(FrameworkError::DuplicateId {
                kind,
                id: id.to_string(),
                parent: parent.to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_result_type_config(config: &ResultTypeConfig) -> Result<(), FrameworkError> {
    if config.id.trim().is_empty() {
        return Err(FrameworkError::EmptyId {
            kind: "result type config",
        });
    }
    let mut seen = HashSet::new();
    for v in &config.values {
        if !seen.insert(v.value.as_str()) {
            return Err(FrameworkError::DuplicateValue {
                config_id: config.id.clone(),
                value: v.value.clone(),
            });
        }
        if let Some(pivot) = v.pivot_value {
            if !pivot.is_finite() || !(0.0..=10.0).contains(&pivot) {
                return Err(FrameworkError::PivotOutOfRange {
                    config_id: config.id.clone(),
                    value: v.value.clone(),
                    pivot,
                });
            }
        }
    }
    Ok(())
}

/// Checks id uniqueness per collection, specific competency ids across the
/// whole framework, and that every specific competency's result type config
/// is one of `configs`.
pub fn validate_framework(
    framework: &CompetencyFramework,
    configs: &[ResultTypeConfig],
) -> Result<(), FrameworkError> {
    if framework.id.trim().is_empty() {
        return Err(FrameworkError::EmptyId { kind: "framework" });
    }
    let known: HashSet<&str> = configs.iter().map(|c| c.id.as_str()).collect();
    // Results are keyed by specific id, so it must be unique framework-wide.
    let mut specific_ids = HashSet::new();

    check_unique(
        "domain",
        &framework.id,
        framework.domains.iter().map(|d| d.id.as_str()),
    )?;
    for domain in &framework.domains {
        check_unique("field", &domain.id, domain.fields.iter().map(|f| f.id.as_str()))?;
        for field in &domain.fields {
            check_unique(
                "competency",
                &field.id,
                field.competencies.iter().map(|c| c.id.as_str()),
            )?;
            for comp in &field.competencies {
                check_unique(
                    "specific competency",
                    &comp.id,
                    comp.specific_competencies.iter().map(|s| s.id.as_str()),
                )?;
                for spec in &comp.specific_competencies {
                    if !specific_ids.insert(spec.id.as_str()) {
                        return Err(FrameworkError::DuplicateId {
                            kind: "specific competency",
                            id: spec.id.clone(),
                            parent: framework.id.clone(),
                        });
                    }
                    if let Some(config_id) = spec.result_type_config_id.as_deref() {
                        if !known.contains(config_id) {
                            return Err(FrameworkError::UnknownResultType {
                                specific_id: spec.id.clone(),
                                config_id: config_id.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
