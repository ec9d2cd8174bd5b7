//! Top-K evaluation: score collection, batch accumulation, metric aggregation
//! and the optional recommendation audit file.

pub mod accumulator;
pub mod aggregator;
pub mod audit;
pub mod collector;
pub mod evaluator;
pub mod metrics;
pub mod truth;

pub use aggregator::{MetricAggregator, MetricResult, RequestedMetric};
pub use audit::{read_recommendations, AuditTarget, RecommendationAuditWriter};
pub use collector::{RaggedScoreCollector, ScoreBatch, TopKIndexMatrix, PADDING_INDEX};
pub use evaluator::{every_nth_test, AuditTrigger, EvalPass, PassContext, TopKEvaluator};
pub use metrics::{MetricFn, MetricKind, MetricRegistry};
pub use truth::{GroundTruth, GroundTruthRecord};
