//! The analysis run: a fixed pipeline of stages that share one step log.
//!
//! Stages execute in order (load and analyze trips, retrieve policy
//! passages, extract pricing, calculate costs, decide). Tool failures
//! during retrieval are tolerated and recorded; any other failure aborts
//! the run and is reported through `stopReason = "error"` rather than
//! returned to the caller.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::report::{describe_analysis, describe_pricing, render_justification};
use super::{
    analyze_trips, calculate_costs, extract_pricing, match_field, CostBreakdown, Decision,
    PricingField, ResolvedPricing, Step, StepKind, StepLog, TripAnalysis, TripColumns,
};
use crate::config::{Config, PolicyQuery};
use crate::error::{AppResult, RetrievalResult, ValidationError};
use crate::tools::{sanitize_identifier, Passage, PolicyRetriever, Retrieval, TripRow, TripStore};

/// Input for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub trips: Vec<TripRow>,
    pub policy_url: String,
}

impl AnalysisRequest {
    pub fn new(trips: Vec<TripRow>, policy_url: impl Into<String>) -> Self {
        Self {
            trips,
            policy_url: policy_url.into(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Completed,
    Error,
}

/// Passages a recommendation drew on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub url: String,
    /// When the passages were retrieved.
    pub date: DateTime<Utc>,
    pub passages: Vec<Passage>,
}

/// Everything a caller gets back from a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub decision: Decision,
    pub justification: String,
    /// Absent when the run stopped before costs were calculated.
    pub cost_breakdown: Option<CostBreakdown>,
    pub trip_analysis: Option<TripAnalysis>,
    pub citations: Vec<Citation>,
    pub steps: Vec<Step>,
    pub total_steps: usize,
    /// Wall-clock duration of the run in milliseconds.
    pub total_time: u64,
    pub stop_reason: StopReason,
}

impl AnalysisResult {
    pub fn is_completed(&self) -> bool {
        self.stop_reason == StopReason::Completed
    }
}

/// What the stages produced, kept even when a later stage fails.
#[derive(Default)]
struct RunState {
    analysis: Option<TripAnalysis>,
    citations: Vec<Citation>,
    costs: Option<CostBreakdown>,
    decision: Option<Decision>,
    justification: Option<String>,
}

/// Reasoning agent that recommends membership or pay-per-use.
///
/// The agent holds only configuration and the passage retriever (whose cache
/// is shared across runs). Every run gets its own trip store and step log.
pub struct FareAgent {
    config: Config,
    retriever: Arc<PolicyRetriever>,
}

impl FareAgent {
    /// Create an agent that fetches policy pages over HTTP.
    pub fn new(config: Config) -> AppResult<Self> {
        let retriever = PolicyRetriever::http(&config.request, config.retrieval.clone())?;
        Ok(Self::with_retriever(config, Arc::new(retriever)))
    }

    /// Create an agent around an existing retriever.
    pub fn with_retriever(config: Config, retriever: Arc<PolicyRetriever>) -> Self {
        Self { config, retriever }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<PolicyRetriever> {
        &self.retriever
    }

    /// Run a full analysis.
    ///
    /// Bad input is rejected before any work begins. Once the run starts,
    /// failures end up in the returned result's step trace.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, ValidationError> {
        validate_request(request)?;

        let timer = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, trips = request.trips.len(), url = %request.policy_url, "Analysis started");

        let mut log = StepLog::new();
        let mut state = RunState::default();

        let store = TripStore::new(&self.config.database);
        let outcome = self.run(&store, request, &mut log, &mut state).await;
        store.close().await;

        let stop_reason = match outcome {
            Ok(()) => StopReason::Completed,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "Analysis aborted");
                log.error(err.to_string());
                state.costs = None;
                state.decision = None;
                StopReason::Error
            }
        };

        let justification = match (&state.justification, stop_reason) {
            (Some(text), StopReason::Completed) => text.clone(),
            _ => "The analysis could not be completed; see the step trace for the error.".to_string(),
        };

        let steps = log.into_steps();
        let total_time = timer.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            steps = steps.len(),
            total_time_ms = total_time,
            stop_reason = ?stop_reason,
            "Analysis finished"
        );

        Ok(AnalysisResult {
            run_id,
            started_at,
            decision: state.decision.unwrap_or(Decision::Undetermined),
            justification,
            cost_breakdown: state.costs,
            trip_analysis: state.analysis,
            citations: state.citations,
            total_steps: steps.len(),
            steps,
            total_time,
            stop_reason,
        })
    }

    async fn run(
        &self,
        store: &TripStore,
        request: &AnalysisRequest,
        log: &mut StepLog,
        state: &mut RunState,
    ) -> AppResult<()> {
        let analysis = load_and_analyze(store, &request.trips, log).await?;
        state.analysis = Some(analysis.clone());

        let passages = self.retrieve_policy(&request.policy_url, log).await;
        let citation = cite(&request.policy_url, &passages, self.config.retrieval.max_cited_passages);
        state.citations.extend(citation);

        let pricing = extract(&passages, &self.config, log);

        log.thought("Compare the pay-per-use total against the membership total");
        let costs = calculate_costs(&analysis, &pricing, log)?;

        let decision = Decision::from_savings(costs.savings);
        let justification = render_justification(decision, &analysis, &costs);
        log.final_answer(format!("{}: {}", decision, justification));

        state.costs = Some(costs);
        state.decision = Some(decision);
        state.justification = Some(justification);
        Ok(())
    }

    /// Issue every planned sub-query, recording an Action and an Observation
    /// for each. Failed sub-queries are skipped. Returns the passages in plan
    /// order with duplicate texts removed.
    async fn retrieve_policy(&self, url: &str, log: &mut StepLog) -> Vec<Passage> {
        let plan = &self.config.queries;
        let k = self.config.retrieval.top_k;
        log.thought(format!(
            "Search the pricing policy at {} with {} sub-queries",
            url,
            plan.len()
        ));

        let outcomes: Vec<RetrievalResult<Retrieval>> = if self.config.retrieval.concurrent {
            // Each search stamps its own steps; they are emitted in plan order.
            let searches = join_all(plan.iter().map(|query| async move {
                let action = Step::new(
                    StepKind::Action,
                    search_label(query),
                    Some(search_args(url, query, k)),
                );
                let outcome = self.retriever.retrieve(url, &query.query, k).await;
                let observation =
                    Step::new(StepKind::Observation, describe_outcome(query, &outcome), None);
                (action, observation, outcome)
            }))
            .await;

            let mut outcomes = Vec::with_capacity(searches.len());
            for (action, observation, outcome) in searches {
                log.extend([action, observation]);
                outcomes.push(outcome);
            }
            outcomes
        } else {
            let mut outcomes = Vec::with_capacity(plan.len());
            for query in plan.iter() {
                log.action(search_label(query), search_args(url, query, k));
                let outcome = self.retriever.retrieve(url, &query.query, k).await;
                log.observation(describe_outcome(query, &outcome));
                outcomes.push(outcome);
            }
            outcomes
        };

        let mut passages = Vec::new();
        let mut failures = 0;
        for (query, outcome) in plan.iter().zip(outcomes) {
            match outcome {
                Ok(retrieval) => passages.extend(retrieval.passages),
                Err(err) => {
                    failures += 1;
                    warn!(query = %query.query, error = %err, "Policy sub-query failed");
                }
            }
        }

        if !plan.is_empty() && failures == plan.len() {
            log.thought("Every policy search failed; fall back to default pricing for all fields");
        }

        let mut seen = HashSet::new();
        passages.retain(|p| seen.insert(p.text.clone()));

        info!(
            url = %url,
            passages = passages.len(),
            failures,
            "Policy retrieval completed"
        );
        passages
    }
}

async fn load_and_analyze(
    store: &TripStore,
    rows: &[TripRow],
    log: &mut StepLog,
) -> AppResult<TripAnalysis> {
    log.thought("Load the trip records and summarize riding patterns");
    log.action(
        "Load trip data",
        json!({ "tool": "trip_query", "operation": "load", "rows": rows.len() }),
    );
    store.load(rows).await?;

    let analysis = analyze_trips(store, log).await?;
    log.observation(describe_analysis(&analysis));
    Ok(analysis)
}

fn extract(passages: &[Passage], config: &Config, log: &mut StepLog) -> ResolvedPricing {
    log.thought(format!(
        "Extract pricing facts from {} policy passages",
        passages.len()
    ));
    let facts = extract_pricing(passages);
    let pricing = ResolvedPricing::resolve(&facts, &config.pricing);
    log.observation(describe_pricing(&pricing));

    info!(
        found = facts.found().len(),
        defaulted = pricing.defaulted_fields().len(),
        "Pricing extracted"
    );
    pricing
}

fn search_label(query: &PolicyQuery) -> String {
    format!("Search policy for \"{}\"", query.query)
}

fn search_args(url: &str, query: &PolicyQuery, k: usize) -> serde_json::Value {
    json!({
        "tool": "policy_retriever",
        "url": url,
        "query": query.query,
        "k": k,
        "targets": query.targets,
    })
}

fn describe_outcome(query: &PolicyQuery, outcome: &RetrievalResult<Retrieval>) -> String {
    match outcome {
        Ok(retrieval) => describe_retrieval(query, retrieval),
        Err(err) => format!("Search for \"{}\" failed: {}", query.query, err),
    }
}

/// Summarize a search, noting which of its target fields the passages state.
fn describe_retrieval(query: &PolicyQuery, retrieval: &Retrieval) -> String {
    let targets = join_fields(query.targets.iter().copied());
    let Some(top) = retrieval.passages.first() else {
        return format!("No relevant passages found for {}", targets);
    };

    let stated: Vec<PricingField> = query
        .targets
        .iter()
        .copied()
        .filter(|field| {
            retrieval
                .passages
                .iter()
                .any(|p| match_field(*field, &p.text).is_some())
        })
        .collect();
    let stated = if stated.is_empty() {
        "none".to_string()
    } else {
        join_fields(stated)
    };

    format!(
        "Found {} passages for {} (top score {:.1}; states {}): \"{}\"",
        retrieval.passages.len(),
        targets,
        top.score,
        stated,
        top.text
    )
}

fn join_fields(fields: impl IntoIterator<Item = PricingField>) -> String {
    fields
        .into_iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn cite(url: &str, passages: &[Passage], cap: usize) -> Option<Citation> {
    if passages.is_empty() {
        return None;
    }
    Some(Citation {
        url: url.to_string(),
        date: Utc::now(),
        passages: passages.iter().take(cap).cloned().collect(),
    })
}

/// Reject input no run could succeed on.
pub fn validate_request(request: &AnalysisRequest) -> Result<(), ValidationError> {
    let first = request.trips.first().ok_or(ValidationError::NoRows)?;
    let columns: Vec<String> = first
        .keys()
        .map(|k| sanitize_identifier(k))
        .filter(|c| !c.is_empty())
        .collect();
    if columns.is_empty() {
        return Err(ValidationError::NoRows);
    }
    TripColumns::resolve(&columns)?;

    let url = url::Url::parse(&request.policy_url).map_err(|e| ValidationError::InvalidUrl {
        url: request.policy_url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl {
            url: request.policy_url.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(())
}
