//! Self-RAG: per-chunk relevance scoring followed by a sufficiency check.

use crate::models::{
    RetrievedChunk, ScoreFailurePolicy, SelfRagMetrics, SelfRagOptions, SufficiencyVerdict,
};
use crate::traits::RefinementModel;
use tracing::{debug, info, warn};

const MIN_CONTEXT_CHARS: usize = 20;

#[derive(Debug, Clone)]
pub struct SelfRagOutcome {
    /// Every retrieved chunk, in retrieval order, with its relevance flag set.
    pub chunks: Vec<RetrievedChunk>,
    pub metrics: SelfRagMetrics,
}

impl SelfRagOutcome {
    pub fn context(&self) -> Vec<RetrievedChunk> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.relevant)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelfRagRefiner {
    options: SelfRagOptions,
}

impl SelfRagRefiner {
    pub fn new(options: SelfRagOptions) -> Self {
        Self { options }
    }

    pub async fn refine<R>(
        &self,
        model: &R,
        query: &str,
        mut chunks: Vec<RetrievedChunk>,
    ) -> SelfRagOutcome
    where
        R: RefinementModel + ?Sized,
    {
        let initial = chunks.len();

        for chunk in chunks.iter_mut() {
            match model.score_relevance(query, &chunk.chunk.text).await {
                Ok(score) => {
                    chunk.relevance = Some(score);
                    chunk.relevant = score >= self.options.relevance_threshold;
                }
                Err(error) => {
                    chunk.relevance = None;
                    chunk.relevant = self.options.on_score_failure == ScoreFailurePolicy::Keep;
                    warn!(
                        chunk = chunk.chunk.index,
                        policy = ?self.options.on_score_failure,
                        %error,
                        "relevance scoring failed"
                    );
                }
            }
        }

        if self.options.keep_best_when_all_filtered && !chunks.iter().any(|c| c.relevant) {
            let best = chunks
                .iter_mut()
                .filter(|chunk| chunk.relevance.is_some())
                .max_by(|left, right| {
                    left.relevance
                        .partial_cmp(&right.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            if let Some(best) = best {
                info!(
                    chunk = best.chunk.index,
                    score = best.relevance,
                    "no chunk passed the threshold, keeping the best one"
                );
                best.relevant = true;
            }
        }

        let verdict = self.check_sufficiency(model, query, &chunks).await;

        if !verdict.is_sufficient && self.options.expand_when_insufficient {
            let mut admitted = 0;
            for chunk in chunks.iter_mut().filter(|chunk| !chunk.relevant) {
                if admitted == self.options.max_expansion_chunks {
                    break;
                }
                chunk.relevant = true;
                admitted += 1;
            }
            if admitted > 0 {
                info!(admitted, "re-admitted filtered chunks for insufficient context");
            }
        }

        let kept = chunks.iter().filter(|chunk| chunk.relevant).count();
        debug!(initial, kept, sufficient = verdict.is_sufficient, "self-rag refinement done");

        SelfRagOutcome {
            chunks,
            metrics: SelfRagMetrics {
                initial_chunks: initial,
                filtered_chunks: kept,
                filtered_out: initial - kept,
                is_sufficient: verdict.is_sufficient,
                missing_info: if verdict.is_sufficient {
                    String::new()
                } else {
                    verdict.missing_info
                },
            },
        }
    }

    async fn check_sufficiency<R>(
        &self,
        model: &R,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> SufficiencyVerdict
    where
        R: RefinementModel + ?Sized,
    {
        let context = chunks
            .iter()
            .filter(|chunk| chunk.relevant)
            .map(|chunk| chunk.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        if context.trim().chars().count() < MIN_CONTEXT_CHARS {
            return SufficiencyVerdict {
                is_sufficient: false,
                missing_info: "No relevant context was found to answer the question".to_string(),
            };
        }

        match model.judge_sufficiency(query, &context).await {
            Ok(verdict) => verdict,
            Err(error) => {
                warn!(%error, "sufficiency check failed");
                SufficiencyVerdict {
                    is_sufficient: false,
                    missing_info: "Could not determine what information is missing".to_string(),
                }
            }
        }
    }
}
