//! Agentic RAG: query reformulation and a bounded assess / follow-up loop.
//!
//! The loop never fails once it has an initial context. A failing model or
//! retrieval call ends the loop and the context gathered so far is used.

use crate::embeddings::Embedder;
use crate::models::{AgentRagMetrics, AgenticOptions, ContextAssessment, RetrievedChunk};
use crate::retrieval::{retrieve, ChunkIndex};
use crate::traits::RefinementModel;
use crate::RagError;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AgenticOutcome {
    pub search_query: String,
    /// Every chunk the loop considered, flagged by membership in `context`.
    pub candidates: Vec<RetrievedChunk>,
    pub context: Vec<RetrievedChunk>,
    pub metrics: AgentRagMetrics,
}

#[derive(Debug, Clone)]
pub struct AgenticRefiner {
    options: AgenticOptions,
    top_k: usize,
}

impl AgenticRefiner {
    pub fn new(options: AgenticOptions, top_k: usize) -> Self {
        Self { options, top_k }
    }

    pub async fn run<E, R>(
        &self,
        embedder: &E,
        model: &R,
        query: &str,
        index: &ChunkIndex,
    ) -> Result<AgenticOutcome, RagError>
    where
        E: Embedder + ?Sized,
        R: RefinementModel + ?Sized,
    {
        let search_query = match model.reformulate(query).await {
            Ok(reformulated) => {
                info!(original = query, reformulated = %reformulated, "reformulated query");
                reformulated
            }
            Err(error) => {
                warn!(%error, "query reformulation failed, searching with the original query");
                query.to_string()
            }
        };

        let initial = retrieve(embedder, &search_query, index, self.top_k).await?;
        let mut held = initial.clone();
        let mut candidates = initial.clone();
        let mut seen: HashSet<usize> = initial.iter().map(|hit| hit.chunk.index).collect();

        let mut iterations = 0;
        let mut latest: Option<ContextAssessment> = None;
        let mut issued = Vec::new();

        while iterations < self.options.max_iterations {
            let passages: Vec<&str> = held.iter().map(|hit| hit.chunk.text.as_str()).collect();
            let assessment = match model.assess_context(query, &passages).await {
                Ok(assessment) => assessment,
                Err(error) => {
                    warn!(
                        iteration = iterations + 1,
                        %error,
                        "context assessment failed, ending loop"
                    );
                    break;
                }
            };
            iterations += 1;
            info!(
                iteration = iterations,
                quality = assessment.overall_quality,
                held = held.len(),
                "assessed context"
            );

            if assessment.overall_quality >= self.options.quality_threshold {
                latest = Some(assessment);
                break;
            }

            held = prioritize(held, &assessment);

            let follow_ups = match model.follow_up_queries(query, &assessment).await {
                Ok(queries) => queries,
                Err(error) => {
                    warn!(%error, "follow-up generation failed, ending loop");
                    latest = Some(assessment);
                    break;
                }
            };
            latest = Some(assessment);

            let mut added = 0;
            let mut aborted = false;
            for follow_up in follow_ups
                .into_iter()
                .take(self.options.max_follow_up_queries)
            {
                let hits = match retrieve(embedder, &follow_up, index, self.top_k).await {
                    Ok(hits) => hits,
                    Err(error) => {
                        warn!(
                            query = %follow_up,
                            %error,
                            "follow-up retrieval failed, ending loop"
                        );
                        aborted = true;
                        break;
                    }
                };
                issued.push(follow_up);

                for hit in hits {
                    if added == self.options.max_new_chunks_per_iteration {
                        break;
                    }
                    if seen.insert(hit.chunk.index) {
                        candidates.push(hit.clone());
                        held.push(hit);
                        added += 1;
                    }
                }
            }
            if added > 0 {
                info!(added, "added chunks from follow-up queries");
            }
            if aborted {
                break;
            }
        }

        let context = synthesize(held);
        let in_context: HashSet<usize> = context.iter().map(|hit| hit.chunk.index).collect();
        for candidate in candidates.iter_mut() {
            candidate.relevant = in_context.contains(&candidate.chunk.index);
        }

        let filtered_out = initial
            .iter()
            .filter(|hit| !in_context.contains(&hit.chunk.index))
            .count();
        debug!(iterations, used = context.len(), filtered_out, "agentic loop done");

        Ok(AgenticOutcome {
            search_query,
            metrics: AgentRagMetrics {
                initial_chunks: initial.len(),
                used_chunks: context.len(),
                filtered_out,
                iterations,
                context_quality: latest.as_ref().map(|a| a.overall_quality),
                follow_up_queries: issued,
                missing_info: latest
                    .map(|assessment| assessment.missing_information)
                    .unwrap_or_default(),
            },
            candidates,
            context,
        })
    }
}

/// Most-relevant positions first, then the rest in order, minus irrelevant ones.
fn prioritize(held: Vec<RetrievedChunk>, assessment: &ContextAssessment) -> Vec<RetrievedChunk> {
    let count = held.len();
    let to_slot = |position: &usize| (1..=count).contains(position).then(|| position - 1);
    let irrelevant: HashSet<usize> = assessment
        .irrelevant_chunks
        .iter()
        .filter_map(to_slot)
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(count);
    for slot in assessment.most_relevant_chunks.iter().filter_map(to_slot) {
        if !order.contains(&slot) {
            order.push(slot);
        }
    }
    for slot in 0..count {
        if !order.contains(&slot) && !irrelevant.contains(&slot) {
            order.push(slot);
        }
    }

    let mut slots: Vec<Option<RetrievedChunk>> = held.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|slot| slots[slot].take())
        .collect()
}

/// Final context in held order, one entry per chunk.
fn synthesize(held: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    held.into_iter()
        .filter(|hit| seen.insert(hit.chunk.index))
        .map(|mut hit| {
            hit.relevant = true;
            hit
        })
        .collect()
}
