//! TopKEvaluator: validated configuration plus the `collect` / `evaluate` pair
//! driven by an external evaluation loop.

use crate::config::{Config, MetricsSetting, TopKSetting};
use crate::error::{EvalError, Result};
use crate::eval::accumulator::{concat_batches, ResultAccumulator};
use crate::eval::aggregator::{correctness_matrix, MetricAggregator, MetricResult, RequestedMetric};
use crate::eval::audit::{AuditTarget, RecommendationAuditWriter};
use crate::eval::collector::{RaggedScoreCollector, ScoreBatch, TopKIndexMatrix};
use crate::eval::metrics::MetricRegistry;
use crate::eval::truth::GroundTruth;
use std::fmt;
use std::path::PathBuf;

/// Describes the evaluation pass being scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassContext {
    /// Test pass (as opposed to a validation pass).
    pub is_test: bool,
    /// Caller-maintained pass counter.
    pub index: usize,
}

impl PassContext {
    pub fn validation(index: usize) -> Self {
        Self { is_test: false, index }
    }

    pub fn test(index: usize) -> Self {
        Self { is_test: true, index }
    }
}

/// Decides which passes get an audit file.
pub type AuditTrigger = Box<dyn Fn(&PassContext) -> bool + Send + Sync>;

/// Audit every test pass whose index is a multiple of `every`.
pub fn every_nth_test(every: usize) -> AuditTrigger {
    let every = every.max(1);
    Box::new(move |ctx: &PassContext| ctx.is_test && ctx.index % every == 0)
}

struct AuditHook {
    writer: RecommendationAuditWriter,
    trigger: AuditTrigger,
}

impl fmt::Debug for AuditHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditHook")
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

/// Computes top-K ranking metrics over one evaluation pass at a time.
#[derive(Debug)]
pub struct TopKEvaluator {
    metrics: Vec<RequestedMetric>,
    topk: Vec<usize>,
    collector: RaggedScoreCollector,
    aggregator: MetricAggregator,
    audit: Option<AuditHook>,
}

impl TopKEvaluator {
    /// Validate `metrics` and `topk` against the built-in registry.
    pub fn new(metrics: MetricsSetting, topk: TopKSetting) -> Result<Self> {
        Self::with_registry(metrics, topk, MetricRegistry::builtin())
    }

    pub fn with_registry(
        metrics: MetricsSetting,
        topk: TopKSetting,
        registry: MetricRegistry,
    ) -> Result<Self> {
        let metrics = resolve_metrics(metrics, &registry)?;
        let topk = resolve_topk(topk)?;
        let k_max = topk.iter().copied().max().unwrap_or(1);
        Ok(Self {
            metrics,
            topk,
            collector: RaggedScoreCollector::new(k_max),
            aggregator: MetricAggregator::new(registry),
            audit: None,
        })
    }

    /// Build from a loaded [`Config`], wiring the audit writer when enabled.
    pub fn from_config(config: &Config) -> Result<Self> {
        let evaluator = Self::new(
            config.evaluation.metrics.clone(),
            config.evaluation.topk.clone(),
        )?;
        let audit = &config.audit;
        if !audit.enabled {
            return Ok(evaluator);
        }
        if audit.every == 0 {
            return Err(EvalError::Config("audit.every must be greater than 0".to_string()));
        }
        Ok(evaluator.with_audit(
            AuditTarget {
                output_dir: audit.output_dir.clone(),
                dataset: audit.dataset.clone(),
                model: audit.model.clone(),
            },
            every_nth_test(audit.every),
        ))
    }

    /// Persist recommendations for every pass accepted by `trigger`.
    pub fn with_audit(mut self, target: AuditTarget, trigger: AuditTrigger) -> Self {
        self.audit = Some(AuditHook {
            writer: RecommendationAuditWriter::new(target),
            trigger,
        });
        self
    }

    pub fn metrics(&self) -> &[RequestedMetric] {
        &self.metrics
    }

    pub fn topk(&self) -> &[usize] {
        &self.topk
    }

    pub fn k_max(&self) -> usize {
        self.collector.k_max()
    }

    /// Reduce one batch of scores to its top-K_max index matrix.
    pub fn collect(&self, batch: &ScoreBatch) -> Result<TopKIndexMatrix> {
        self.collector.collect(batch)
    }

    /// Start a pass that accumulates batches until [`EvalPass::finish`].
    pub fn begin_pass(&self) -> EvalPass<'_> {
        EvalPass {
            evaluator: self,
            accumulator: ResultAccumulator::new(self.k_max()),
        }
    }

    /// Score a whole pass. `batches` must be in the order they were collected
    /// and row-aligned with `truth`.
    pub fn evaluate(
        &self,
        batches: &[TopKIndexMatrix],
        truth: &GroundTruth,
        ctx: &PassContext,
    ) -> Result<MetricResult> {
        let topk = concat_batches(batches, self.k_max(), truth.len())?;

        if let Some(path) = self.write_audit(&topk, truth, ctx)? {
            log::debug!("Audit file for pass {} at {}", ctx.index, path.display());
        }

        let empty_users = truth.pos_len().iter().filter(|len| **len == 0).count();
        if empty_users > 0 {
            log::warn!("{} of {} users have no positive items", empty_users, truth.len());
        }

        let correct = correctness_matrix(&topk, truth.positives())?;
        let result = self
            .aggregator
            .aggregate(&self.metrics, &self.topk, truth.pos_len(), &correct)?;
        log::info!(
            "Evaluated {} users over {} batches ({} metrics x {} cutoffs)",
            truth.len(),
            batches.len(),
            self.metrics.len(),
            self.topk.len()
        );
        Ok(result)
    }

    fn write_audit(
        &self,
        topk: &TopKIndexMatrix,
        truth: &GroundTruth,
        ctx: &PassContext,
    ) -> Result<Option<PathBuf>> {
        match &self.audit {
            Some(hook) if (hook.trigger)(ctx) => {
                hook.writer.write(truth.users(), topk, ctx.index).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl fmt::Display for TopKEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics: Vec<&str> = self.metrics.iter().map(|m| m.kind.canonical_name()).collect();
        let topk: Vec<String> = self.topk.iter().map(|k| k.to_string()).collect();
        write!(
            f,
            "The TopK Evaluator Info: [Metrics]: [{}], TopK: [{}]",
            metrics.join(", "),
            topk.join(", ")
        )
    }
}

/// One evaluation pass in progress.
#[derive(Debug)]
pub struct EvalPass<'a> {
    evaluator: &'a TopKEvaluator,
    accumulator: ResultAccumulator,
}

impl EvalPass<'_> {
    pub fn collect(&mut self, batch: &ScoreBatch) -> Result<()> {
        let topk = self.evaluator.collect(batch)?;
        self.accumulator.push(topk)
    }

    /// Rows collected so far.
    pub fn rows(&self) -> usize {
        self.accumulator.rows()
    }

    pub fn finish(self, truth: &GroundTruth, ctx: &PassContext) -> Result<MetricResult> {
        let batches = self.accumulator.into_batches();
        self.evaluator.evaluate(&batches, truth, ctx)
    }
}

fn resolve_metrics(setting: MetricsSetting, registry: &MetricRegistry) -> Result<Vec<RequestedMetric>> {
    let names = match setting {
        MetricsSetting::Single(name) => vec![name],
        MetricsSetting::List(names) if !names.is_empty() => names,
        MetricsSetting::List(_) => {
            return Err(EvalError::Config("metrics must not be an empty list".to_string()))
        }
        MetricsSetting::Invalid(value) => {
            return Err(EvalError::Config(format!(
                "metrics must be a string or a list of strings, got {}",
                value
            )))
        }
    };
    names
        .into_iter()
        .map(|name| {
            let kind = registry.resolve(&name)?;
            Ok(RequestedMetric { kind, label: name.trim().to_string() })
        })
        .collect()
}

fn resolve_topk(setting: TopKSetting) -> Result<Vec<usize>> {
    let values = match setting {
        TopKSetting::Single(k) => vec![k],
        TopKSetting::List(ks) if !ks.is_empty() => ks,
        TopKSetting::List(_) => {
            return Err(EvalError::Config("topk must not be an empty list".to_string()))
        }
        TopKSetting::Invalid(value) => {
            return Err(EvalError::Config(format!(
                "topk must be an integer or a list of integers, got {}",
                value
            )))
        }
    };
    values
        .into_iter()
        .map(|k| {
            usize::try_from(k)
                .ok()
                .filter(|k| *k > 0)
                .ok_or_else(|| EvalError::Config(format!("topk must be a positive integer, got {}", k)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::audit::read_recommendations;
    use crate::eval::collector::PADDING_INDEX;
    use ndarray::array;
    use tempfile::TempDir;

    fn evaluator(metrics: &[&str], topk: Vec<i64>) -> TopKEvaluator {
        TopKEvaluator::new(MetricsSetting::from(metrics.to_vec()), TopKSetting::List(topk)).unwrap()
    }

    fn scenario_truth() -> GroundTruth {
        GroundTruth::new(vec![100, 200], vec![vec![2, 9], vec![4]]).unwrap()
    }

    #[test]
    fn test_rejects_zero_and_negative_k() {
        for k in [0, -1] {
            let err = TopKEvaluator::new(MetricsSetting::from("recall"), TopKSetting::Single(k)).unwrap_err();
            assert!(matches!(err, EvalError::Config(_)), "k = {}", k);
        }
        let err = TopKEvaluator::new(MetricsSetting::from("recall"), TopKSetting::List(vec![5, 0])).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_metric() {
        let err = TopKEvaluator::new(MetricsSetting::from(vec!["Recall", "auc"]), TopKSetting::Single(10))
            .unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        assert!(err.to_string().contains("auc"));
    }

    #[test]
    fn test_rejects_empty_containers() {
        assert!(TopKEvaluator::new(MetricsSetting::List(vec![]), TopKSetting::Single(5)).is_err());
        assert!(TopKEvaluator::new(MetricsSetting::from("ndcg"), TopKSetting::List(vec![])).is_err());
    }

    #[test]
    fn test_rejects_invalid_shapes() {
        let err = TopKEvaluator::new(
            MetricsSetting::Invalid(toml::Value::Integer(3)),
            TopKSetting::Single(5),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        let err = TopKEvaluator::new(
            MetricsSetting::from("recall"),
            TopKSetting::Invalid(toml::Value::Float(2.5)),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_k_max_and_summary() {
        let eval = evaluator(&["recall", "NDCG"], vec![5, 20, 10]);
        assert_eq!(eval.k_max(), 20);
        assert_eq!(
            eval.to_string(),
            "The TopK Evaluator Info: [Metrics]: [Recall, NDCG], TopK: [5, 20, 10]"
        );
    }

    #[test]
    fn test_concrete_scenario_end_to_end() {
        let eval = evaluator(&["Precision"], vec![3]);
        let batches = vec![array![[5, 2, 9], [1, 4, 7]]];
        let result = eval
            .evaluate(&batches, &scenario_truth(), &PassContext::validation(0))
            .unwrap();
        assert_eq!(result.get("Precision@3"), Some(0.5));
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_keys_follow_configured_case_and_order() {
        let eval = evaluator(&["NDCG", "recall"], vec![1, 3]);
        let batches = vec![array![[5, 2, 9], [1, 4, 7]]];
        let result = eval
            .evaluate(&batches, &scenario_truth(), &PassContext::default())
            .unwrap();
        let keys: Vec<&str> = result.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["NDCG@1", "NDCG@3", "recall@1", "recall@3"]);
    }

    #[test]
    fn test_pass_collects_full_sort_batches() {
        let eval = evaluator(&["recall", "precision"], vec![1, 2]);
        let mut pass = eval.begin_pass();
        pass.collect(&ScoreBatch::full(vec![3, 2], vec![0.1, 0.9, 0.5, 0.8, 0.2])).unwrap();
        pass.collect(&ScoreBatch::full(vec![1], vec![0.3])).unwrap();
        assert_eq!(pass.rows(), 3);

        let truth = GroundTruth::new(vec![1, 2, 3], vec![vec![1], vec![1], vec![0, 5]]).unwrap();
        let result = pass.finish(&truth, &PassContext::validation(1)).unwrap();
        // user 1 hits at rank 1; user 2 at rank 2; user 3 at rank 1 of 2 positives
        assert_eq!(result.get("recall@1"), Some(0.5));
        assert_eq!(result.get("recall@2"), Some(0.8333));
        assert_eq!(result.get("precision@1"), Some(0.6667));
    }

    #[test]
    fn test_padding_ranks_never_correct() {
        let eval = evaluator(&["precision"], vec![3]);
        let topk = eval.collect(&ScoreBatch::full(vec![1], vec![0.7])).unwrap();
        assert_eq!(topk, array![[0, PADDING_INDEX, PADDING_INDEX]]);
        // positives include ids the padded columns would occupy if they were real
        let truth = GroundTruth::new(vec![1], vec![vec![0, 1, 2, -1]]).unwrap();
        let result = eval.evaluate(&[topk], &truth, &PassContext::default()).unwrap();
        assert_eq!(result.get("precision@3"), Some(0.3333));
    }

    #[test]
    fn test_row_mismatch_is_fatal() {
        let eval = evaluator(&["recall"], vec![2]);
        let batches = vec![array![[0, 1]]];
        let err = eval
            .evaluate(&batches, &scenario_truth(), &PassContext::default())
            .unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch(_)));
    }

    #[test]
    fn test_empty_pass_is_degenerate() {
        let eval = evaluator(&["recall", "ndcg"], vec![5, 10]);
        let result = eval
            .evaluate(&[], &GroundTruth::default(), &PassContext::default())
            .unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.iter().all(|(_, v)| v == 0.0));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let eval = evaluator(&["recall", "ndcg", "map", "recall2"], vec![1, 2, 3]);
        let batches = vec![array![[5, 2, 9]], array![[1, 4, 7]]];
        let truth = scenario_truth();
        let first = eval.evaluate(&batches, &truth, &PassContext::default()).unwrap();
        let second = eval.evaluate(&batches, &truth, &PassContext::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_audit_only_on_triggered_passes() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("recs");
        let eval = evaluator(&["recall"], vec![3]).with_audit(
            AuditTarget {
                output_dir: out_dir.clone(),
                dataset: "baby".to_string(),
                model: "MF".to_string(),
            },
            every_nth_test(2),
        );
        let batches = vec![array![[5, 2, 9], [1, 4, 7]]];
        let truth = scenario_truth();

        eval.evaluate(&batches, &truth, &PassContext::validation(0)).unwrap();
        eval.evaluate(&batches, &truth, &PassContext::test(1)).unwrap();
        assert!(!out_dir.exists());

        eval.evaluate(&batches, &truth, &PassContext::test(2)).unwrap();
        let files: Vec<_> = std::fs::read_dir(&out_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files.into_iter().next().unwrap().unwrap().path();
        let (users, topk) = read_recommendations(&path).unwrap();
        assert_eq!(users, vec![100, 200]);
        assert_eq!(topk, batches[0]);
    }

    #[test]
    fn test_custom_audit_trigger() {
        let temp_dir = TempDir::new().unwrap();
        let eval = evaluator(&["recall"], vec![1]).with_audit(
            AuditTarget {
                output_dir: temp_dir.path().to_path_buf(),
                dataset: "d".to_string(),
                model: "m".to_string(),
            },
            Box::new(|ctx: &PassContext| ctx.index == 7),
        );
        let batches = vec![array![[5], [1]]];
        eval.evaluate(&batches, &scenario_truth(), &PassContext::validation(7)).unwrap();
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
