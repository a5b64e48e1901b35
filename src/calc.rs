use crate::model::{
    CompetencyFramework, Evaluation, EvaluationResult, Level, ResultTypeConfig, Student,
    NOT_EVALUATED_VALUES,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupLevel {
    Domain,
    Field,
    Competency,
}

impl GroupLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "domain" => Some(Self::Domain),
            "field" => Some(Self::Field),
            "competency" => Some(Self::Competency),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Field => "field",
            Self::Competency => "competency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Day,
    Week,
    Month,
}

impl TimeBucket {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ancestors<'a> {
    domain_id: &'a str,
    field_id: &'a str,
    competency_id: &'a str,
    result_type_config_id: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Specific competency id -> enclosing ids, built with one walk of the tree.
#[derive(Debug, Clone)]
pub struct FrameworkIndex<'a> {
    framework: &'a CompetencyFramework,
    by_specific: HashMap<&'a str, Ancestors<'a>>,
}

impl<'a> FrameworkIndex<'a> {
    pub fn build(framework: &'a CompetencyFramework) -> Self {
        let mut by_specific = HashMap::new();
        for domain in &framework.domains {
            for field in &domain.fields {
                for comp in &field.competencies {
                    for spec in &comp.specific_competencies {
                        by_specific.insert(
                            spec.id.as_str(),
                            Ancestors {
                                domain_id: domain.id.as_str(),
                                field_id: field.id.as_str(),
                                competency_id: comp.id.as_str(),
                                result_type_config_id: spec.result_type_config_id.as_deref(),
                            },
                        );
                    }
                }
            }
        }
        Self {
            framework,
            by_specific,
        }
    }

    pub fn get_ancestor_id(&self, specific_id: &str, level: GroupLevel) -> Option<&'a str> {
        let a = self.by_specific.get(specific_id)?;
        Some(match level {
            GroupLevel::Domain => a.domain_id,
            GroupLevel::Field => a.field_id,
            GroupLevel::Competency => a.competency_id,
        })
    }

    pub fn result_type_config_id(&self, specific_id: &str) -> Option<&'a str> {
        self.by_specific
            .get(specific_id)
            .and_then(|a| a.result_type_config_id)
    }

    /// Framework entities at `level`, in tree order.
    pub fn categories(&self, level: GroupLevel) -> Vec<Category> {
        let mut out = Vec::new();
        for domain in &self.framework.domains {
            if level == GroupLevel::Domain {
                out.push(Category {
                    id: domain.id.clone(),
                    name: domain.name.clone(),
                });
                continue;
            }
            for field in &domain.fields {
                if level == GroupLevel::Field {
                    out.push(Category {
                        id: field.id.clone(),
                        name: field.name.clone(),
                    });
                    continue;
                }
                for comp in &field.competencies {
                    out.push(Category {
                        id: comp.id.clone(),
                        name: comp.name.clone(),
                    });
                }
            }
        }
        out
    }
}

pub fn get_ancestor_id<'a>(
    specific_id: &str,
    framework: &'a CompetencyFramework,
    level: GroupLevel,
) -> Option<&'a str> {
    FrameworkIndex::build(framework).get_ancestor_id(specific_id, level)
}

/// Everything score resolution needs besides the results themselves.
#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub index: FrameworkIndex<'a>,
    configs: HashMap<&'a str, &'a ResultTypeConfig>,
    pub legacy_level_fallback: bool,
}

impl<'a> CalcContext<'a> {
    pub fn new(framework: &'a CompetencyFramework, configs: &'a [ResultTypeConfig]) -> Self {
        Self {
            index: FrameworkIndex::build(framework),
            configs: configs.iter().map(|c| (c.id.as_str(), c)).collect(),
            legacy_level_fallback: true,
        }
    }

    pub fn with_legacy_level_fallback(mut self, enabled: bool) -> Self {
        self.legacy_level_fallback = enabled;
        self
    }

    fn config_for(&self, result: &EvaluationResult) -> Option<&'a ResultTypeConfig> {
        let specific_id = result.specific_competency_id.as_deref()?;
        let config_id = self.index.result_type_config_id(specific_id)?;
        self.configs.get(config_id).copied()
    }
}

/// Pivot value of a result, or `None` when the result carries no score.
pub fn resolve_score(result: &EvaluationResult, ctx: &CalcContext<'_>) -> Option<f64> {
    let resolved = result.outcome.as_str().trim();
    if resolved.is_empty() || NOT_EVALUATED_VALUES.contains(&resolved) {
        return None;
    }
    match ctx.config_for(result) {
        Some(config) => config
            .find_value(resolved)
            .and_then(|v| v.pivot_value)
            .filter(|p| p.is_finite()),
        None if ctx.legacy_level_fallback => Level::parse(resolved).and_then(Level::legacy_score),
        None => None,
    }
}

/// Grouping key of a result at `level`. Legacy rows without a specific
/// competency only group at the competency level, on their own `competency_id`.
pub fn group_key<'x>(
    result: &'x EvaluationResult,
    level: GroupLevel,
    index: &FrameworkIndex<'x>,
) -> Option<&'x str> {
    match result.specific_competency_id.as_deref() {
        Some(specific_id) => index.get_ancestor_id(specific_id, level),
        None if level == GroupLevel::Competency => Some(result.competency_id.as_str()),
        None => None,
    }
}

/// Groups in first-occurrence order; items whose key is `None` are dropped.
pub fn group_by<'r, T, I, K, F>(items: I, mut key_fn: F) -> Vec<(K, Vec<&'r T>)>
where
    T: 'r,
    I: IntoIterator<Item = &'r T>,
    K: Eq + Hash + Clone,
    F: FnMut(&'r T) -> Option<K>,
{
    let mut groups: Vec<(K, Vec<&'r T>)> = Vec::new();
    let mut positions: HashMap<K, usize> = HashMap::new();
    for item in items {
        let Some(key) = key_fn(item) else {
            continue;
        };
        match positions.get(&key) {
            Some(&i) => groups[i].1.push(item),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![item]));
            }
        }
    }
    groups
}

fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Mean of the resolvable scores; `None` when nothing resolves.
pub fn average<'r, I>(results: I, ctx: &CalcContext<'_>) -> Option<f64>
where
    I: IntoIterator<Item = &'r EvaluationResult>,
{
    mean(results.into_iter().filter_map(|r| resolve_score(r, ctx)))
}

/// Per-entity averages at `level`. Entities without a resolvable score are
/// omitted, not zero-filled.
pub fn averages_by_level<'r, I>(
    results: I,
    level: GroupLevel,
    ctx: &CalcContext<'_>,
) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = &'r EvaluationResult>,
{
    let groups = group_by(results, |r: &'r EvaluationResult| {
        let key = group_key(r, level, &ctx.index);
        if key.is_none() {
            debug!(
                result_key = r.result_key(),
                level = level.as_str(),
                "result has no ancestor in framework; dropped from grouping"
            );
        }
        key.map(str::to_string)
    });
    groups
        .into_iter()
        .filter_map(|(key, rows)| average(rows, ctx).map(|avg| (key, avg)))
        .collect()
}

pub fn student_competency_averages(
    student_id: &str,
    results: &[EvaluationResult],
    ctx: &CalcContext<'_>,
) -> BTreeMap<String, f64> {
    averages_by_level(
        results.iter().filter(|r| r.student_id == student_id),
        GroupLevel::Competency,
        ctx,
    )
}

pub fn class_competency_averages(
    results: &[EvaluationResult],
    ctx: &CalcContext<'_>,
) -> BTreeMap<String, f64> {
    averages_by_level(results, GroupLevel::Competency, ctx)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonEntry {
    pub student_id: String,
    pub student_name: String,
    pub scores: Vec<f64>,
    pub average: f64,
}

/// Ranks students by the mean of their individually resolved scores, best
/// first. Students without any resolvable score rank with an average of 0.
/// Ties keep roster order.
pub fn compare_students(
    students: &[Student],
    results: &[EvaluationResult],
    ctx: &CalcContext<'_>,
) -> Vec<ComparisonEntry> {
    let mut scores_by_student: HashMap<&str, Vec<f64>> = HashMap::new();
    for r in results {
        if let Some(score) = resolve_score(r, ctx) {
            scores_by_student
                .entry(r.student_id.as_str())
                .or_default()
                .push(score);
        }
    }

    let mut entries: Vec<ComparisonEntry> = students
        .iter()
        .map(|s| {
            let scores = scores_by_student
                .get(s.id.as_str())
                .cloned()
                .unwrap_or_default();
            let average = mean(scores.iter().copied()).unwrap_or(0.0);
            ComparisonEntry {
                student_id: s.id.clone(),
                student_name: s.display_name.clone(),
                scores,
                average,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.average.partial_cmp(&a.average).unwrap_or(Ordering::Equal));
    entries
}

pub fn top_performers(entries: &[ComparisonEntry], n: usize) -> &[ComparisonEntry] {
    &entries[..n.min(entries.len())]
}

/// The last `n` entries of a ranking, worst first.
pub fn struggling(entries: &[ComparisonEntry], n: usize) -> Vec<ComparisonEntry> {
    let start = entries.len() - n.min(entries.len());
    entries[start..].iter().rev().cloned().collect()
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct PerformanceGaps {
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub mean: f64,
    pub median: f64,
}

/// Spread of the entries' averages. The median is the element at
/// `len / 2` of the ascending averages (lower-middle for even lengths is
/// not averaged).
pub fn performance_gaps(entries: &[ComparisonEntry]) -> PerformanceGaps {
    if entries.is_empty() {
        return PerformanceGaps::default();
    }
    let mut sorted: Vec<f64> = entries.iter().map(|e| e.average).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    PerformanceGaps {
        min,
        max,
        range: max - min,
        mean: mean(sorted.iter().copied()).unwrap_or(0.0),
        median: sorted[sorted.len() / 2],
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PerformanceGroups {
    pub high: Vec<ComparisonEntry>,
    pub medium: Vec<ComparisonEntry>,
    pub low: Vec<ComparisonEntry>,
}

/// High at or above `mean + range/4`, low at or below `mean - range/4`.
pub fn group_by_performance_level(entries: &[ComparisonEntry]) -> PerformanceGroups {
    let gaps = performance_gaps(entries);
    let high_threshold = gaps.mean + 0.25 * gaps.range;
    let low_threshold = gaps.mean - 0.25 * gaps.range;
    let mut groups = PerformanceGroups::default();
    for e in entries {
        if e.average >= high_threshold {
            groups.high.push(e.clone());
        } else if e.average <= low_threshold {
            groups.low.push(e.clone());
        } else {
            groups.medium.push(e.clone());
        }
    }
    groups
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub entries: Vec<ComparisonEntry>,
    pub top_performers: Vec<ComparisonEntry>,
    pub struggling: Vec<ComparisonEntry>,
    pub performance_gaps: PerformanceGaps,
    pub groups: PerformanceGroups,
}

impl ComparisonReport {
    pub fn build(entries: Vec<ComparisonEntry>, top_bottom_count: usize) -> Self {
        Self {
            top_performers: top_performers(&entries, top_bottom_count).to_vec(),
            struggling: struggling(&entries, top_bottom_count),
            performance_gaps: performance_gaps(&entries),
            groups: group_by_performance_level(&entries),
            entries,
        }
    }
}

/// One radar dataset's worth of results: a student, or an evaluation.
#[derive(Debug, Clone)]
pub struct RadarSnapshot<'r> {
    pub id: String,
    pub label: String,
    pub results: Vec<&'r EvaluationResult>,
}

pub fn student_snapshots<'r>(
    students: &[Student],
    results: &'r [EvaluationResult],
) -> Vec<RadarSnapshot<'r>> {
    students
        .iter()
        .map(|s| RadarSnapshot {
            id: s.id.clone(),
            label: s.display_name.clone(),
            results: results.iter().filter(|r| r.student_id == s.id).collect(),
        })
        .collect()
}

/// One snapshot per evaluation, optionally narrowed to one student.
pub fn evaluation_snapshots<'r>(
    evaluations: &'r [Evaluation],
    student_id: Option<&str>,
) -> Vec<RadarSnapshot<'r>> {
    evaluations
        .iter()
        .map(|e| RadarSnapshot {
            id: e.id.clone(),
            label: e.name.clone(),
            results: e
                .results
                .iter()
                .filter(|r| student_id.map(|id| r.student_id == id).unwrap_or(true))
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RadarDataset {
    pub id: String,
    pub label: String,
    pub scores: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RadarSeries {
    pub level: GroupLevel,
    pub categories: Vec<Category>,
    pub datasets: Vec<RadarDataset>,
}

/// One score per framework entity at `level` for every snapshot; entities a
/// snapshot has no score for are filled with 0.
pub fn radar_series(
    snapshots: &[RadarSnapshot<'_>],
    level: GroupLevel,
    ctx: &CalcContext<'_>,
) -> RadarSeries {
    let categories = ctx.index.categories(level);
    let datasets = snapshots
        .iter()
        .map(|snap| {
            let averages = averages_by_level(snap.results.iter().copied(), level, ctx);
            RadarDataset {
                id: snap.id.clone(),
                label: snap.label.clone(),
                scores: categories
                    .iter()
                    .map(|c| averages.get(&c.id).copied().unwrap_or(0.0))
                    .collect(),
            }
        })
        .collect();
    RadarSeries {
        level,
        categories,
        datasets,
    }
}

/// Rescales every score so the largest one maps to `max_scale`.
pub fn normalize_to_scale(series: &RadarSeries, max_scale: f64) -> RadarSeries {
    let max = series
        .datasets
        .iter()
        .flat_map(|d| d.scores.iter().copied())
        .fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return series.clone();
    }
    let factor = max_scale / max;
    RadarSeries {
        level: series.level,
        categories: series.categories.clone(),
        datasets: series
            .datasets
            .iter()
            .map(|d| RadarDataset {
                id: d.id.clone(),
                label: d.label.clone(),
                scores: d.scores.iter().map(|s| s * factor).collect(),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CountSeries {
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
}

impl CountSeries {
    fn from_counts(counts: BTreeMap<String, usize>) -> Self {
        let (labels, counts) = counts.into_iter().unzip();
        Self { labels, counts }
    }
}

/// Results per display value, labels ascending.
pub fn distribution_series(results: &[EvaluationResult]) -> CountSeries {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for r in results {
        *counts.entry(r.outcome.as_str().trim().to_string()).or_insert(0) += 1;
    }
    CountSeries::from_counts(counts)
}

pub fn parse_evaluated_at(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Day: `YYYY-MM-DD`. Week: the preceding (or same) Sunday as `YYYY-MM-DD`.
/// Month: `YYYY-MM`.
pub fn bucket_key(date: NaiveDate, bucket: TimeBucket) -> String {
    match bucket {
        TimeBucket::Day => date.format("%Y-%m-%d").to_string(),
        TimeBucket::Week => {
            let back = i64::from(date.weekday().num_days_from_sunday());
            (date - Duration::days(back)).format("%Y-%m-%d").to_string()
        }
        TimeBucket::Month => date.format("%Y-%m").to_string(),
    }
}

fn result_bucket(result: &EvaluationResult, bucket: TimeBucket) -> Option<String> {
    match parse_evaluated_at(&result.evaluated_at) {
        Some(date) => Some(bucket_key(date, bucket)),
        None => {
            debug!(
                evaluated_at = result.evaluated_at.as_str(),
                "unparseable evaluation timestamp; left out of time series"
            );
            None
        }
    }
}

/// Results per time bucket, labels in chronological order.
pub fn time_series(results: &[EvaluationResult], bucket: TimeBucket) -> CountSeries {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for r in results {
        if let Some(key) = result_bucket(r, bucket) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    CountSeries::from_counts(counts)
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProgressionSeries {
    pub bucket: Option<TimeBucket>,
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
    pub averages: Vec<f64>,
}

/// Time series with the mean resolvable score of each bucket (0 when none).
pub fn progression_series(
    results: &[EvaluationResult],
    bucket: TimeBucket,
    ctx: &CalcContext<'_>,
) -> ProgressionSeries {
    let mut buckets: BTreeMap<String, (usize, Vec<f64>)> = BTreeMap::new();
    for r in results {
        let Some(key) = result_bucket(r, bucket) else {
            continue;
        };
        let entry = buckets.entry(key).or_default();
        entry.0 += 1;
        if let Some(score) = resolve_score(r, ctx) {
            entry.1.push(score);
        }
    }
    let mut out = ProgressionSeries {
        bucket: Some(bucket),
        ..ProgressionSeries::default()
    };
    for (label, (count, scores)) in buckets {
        out.labels.push(label);
        out.counts.push(count);
        out.averages.push(mean(scores).unwrap_or(0.0));
    }
    out
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Completion {
    pub evaluated: usize,
    pub total: usize,
    pub rate: f64,
}

pub fn completion_rate(student_id: &str, results: &[EvaluationResult]) -> Completion {
    let mut evaluated = 0_usize;
    let mut total = 0_usize;
    for r in results.iter().filter(|r| r.student_id == student_id) {
        total += 1;
        if r.outcome.is_evaluated() {
            evaluated += 1;
        }
    }
    let rate = if total > 0 {
        evaluated as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    Completion {
        evaluated,
        total,
        rate,
    }
}
