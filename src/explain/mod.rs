//! Explanation generation with a run-scoped single-flight cache.

pub mod cache;
#[cfg(feature = "http")]
pub mod http;
pub mod retry;
pub mod templates;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::types::{Gene, Phenotype, RiskLabel, Severity};

pub use cache::{CacheStats, Lookup, LookupSource, SingleFlight};
pub use retry::{run_with_retry, RetryOutcome, RetryPolicy, RetryState, Sleeper, ThreadSleeper};

/// Set once any key exhausts its retries; later keys in the same run skip the external call.
///
/// One signal per batch run, shared by handle with every worker of that run.
#[derive(Debug, Default)]
pub struct RateLimitSignal {
    tripped: AtomicBool,
}

impl RateLimitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// True for the caller that actually set it
    pub fn trip(&self) -> bool {
        self.tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanationSections {
    pub summary: String,
    pub biological_mechanism: String,
    pub variant_significance: String,
    pub clinical_implications: String,
}

impl ExplanationSections {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.summary.as_str(),
            self.biological_mechanism.as_str(),
            self.variant_significance.as_str(),
            self.clinical_implications.as_str(),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateReason {
    NoNetwork,
    RateLimitSkipped,
    Exhausted,
    Rejected,
    /// No explanation service configured
    Unavailable,
    /// The evaluation unit itself failed
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationOrigin {
    Generated,
    Template(TemplateReason),
}

impl ExplanationOrigin {
    pub fn is_generated(&self) -> bool {
        matches!(self, ExplanationOrigin::Generated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Online,
    /// Never call out; always the deterministic template
    Offline,
}

/// One patient's evidence for one drug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRequest {
    pub drug: String,
    pub gene: Gene,
    pub diplotype: String,
    pub phenotype: Phenotype,
    pub risk_label: RiskLabel,
    pub severity: Severity,
    pub variant_ids: Vec<String>,
}

pub type ExplanationKey = (String, Phenotype);

impl ExplanationRequest {
    pub fn key(&self) -> ExplanationKey {
        (self.drug.clone(), self.phenotype)
    }

    pub fn topic(&self) -> ExplanationTopic {
        ExplanationTopic {
            drug: self.drug.clone(),
            gene: self.gene,
            phenotype: self.phenotype,
            risk_label: self.risk_label,
            severity: self.severity,
        }
    }
}

/// The patient-independent part of a request; all the external service ever sees.
///
/// Generated text is shared by every patient with the same (drug, phenotype), so it must
/// not carry a diplotype or variant identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationTopic {
    pub drug: String,
    pub gene: Gene,
    pub phenotype: Phenotype,
    pub risk_label: RiskLabel,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub patient_id: String,
    pub entries: Vec<ExplanationRequest>,
    pub interaction_alerts: Vec<String>,
}

/// A narrative names the patient and their variants, so its key carries both
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NarrativeKey {
    patient_id: String,
    entries: Vec<(String, Phenotype, String, Vec<String>)>,
    alerts: Vec<String>,
}

impl NarrativeRequest {
    pub fn key(&self) -> NarrativeKey {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.drug.clone(), e.phenotype, e.diplotype.clone(), e.variant_ids.clone()))
            .collect();
        entries.sort();
        entries.dedup();
        let mut alerts = self.interaction_alerts.clone();
        alerts.sort();

        NarrativeKey {
            patient_id: self.patient_id.clone(),
            entries,
            alerts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub sections: ExplanationSections,
    pub origin: ExplanationOrigin,
    pub attempts: u32,
    pub cited_variants: Vec<String>,
}

impl Explanation {
    fn template(request: &ExplanationRequest, reason: TemplateReason, attempts: u32) -> Self {
        Self {
            sections: templates::explanation(request),
            origin: ExplanationOrigin::Template(reason),
            attempts,
            cited_variants: request.variant_ids.clone(),
        }
    }
}

/// What the cache holds per (drug, phenotype); rendered against each caller's own request
#[derive(Debug, Clone, PartialEq)]
struct SharedExplanation {
    /// Only set when the service answered
    generated: Option<ExplanationSections>,
    origin: ExplanationOrigin,
    attempts: u32,
}

impl SharedExplanation {
    fn fallback(reason: TemplateReason, attempts: u32) -> Self {
        Self {
            generated: None,
            origin: ExplanationOrigin::Template(reason),
            attempts,
        }
    }

    fn render(&self, request: &ExplanationRequest) -> Explanation {
        let sections = match &self.generated {
            Some(generic) => templates::with_evidence(generic, request),
            None => templates::explanation(request),
        };
        Explanation {
            sections,
            origin: self.origin,
            attempts: self.attempts,
            cited_variants: request.variant_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub text: String,
    pub origin: ExplanationOrigin,
    pub attempts: u32,
}

/// External text generator. Implementations must be safe to call from many workers.
pub trait ExplanationService: Send + Sync {
    fn generate(&self, topic: &ExplanationTopic) -> Result<ExplanationSections, GenerationError>;

    fn narrate(&self, request: &NarrativeRequest) -> Result<String, GenerationError>;
}

/// Per-drug explanations and patient narratives behind two single-flight caches
pub struct Explainer {
    service: Option<Arc<dyn ExplanationService>>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    explanations: SingleFlight<ExplanationKey, SharedExplanation>,
    narratives: SingleFlight<NarrativeKey, Narrative>,
}

impl Explainer {
    pub fn new(service: Option<Arc<dyn ExplanationService>>, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            sleeper: Arc::new(ThreadSleeper),
            explanations: SingleFlight::new(),
            narratives: SingleFlight::new(),
        }
    }

    /// Template-only explainer
    pub fn offline() -> Self {
        Self::new(None, RetryPolicy::default())
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Fresh signal for a new run; fallbacks from earlier runs are evicted so they get retried
    pub fn begin_run(&self) -> Arc<RateLimitSignal> {
        let evicted = self.explanations.evict_failed() + self.narratives.evict_failed();
        if evicted > 0 {
            debug!("evicted {} fallback explanations from the previous run", evicted);
        }
        Arc::new(RateLimitSignal::new())
    }

    pub fn explain(
        &self,
        request: &ExplanationRequest,
        signal: &RateLimitSignal,
        mode: NetworkMode,
    ) -> Lookup<Explanation> {
        if mode == NetworkMode::Offline {
            return Lookup {
                value: Arc::new(Explanation::template(request, TemplateReason::NoNetwork, 0)),
                source: LookupSource::Bypassed,
                failed: false,
            };
        }

        let shared = self.explanations.get_or_compute(request.key(), || {
            let Some(service) = &self.service else {
                return Err(SharedExplanation::fallback(TemplateReason::Unavailable, 0));
            };

            let topic = request.topic();
            let outcome = run_with_retry(&self.policy, self.sleeper.as_ref(), signal, |attempt| {
                debug!("explaining {} / {} (attempt {})", topic.drug, topic.phenotype, attempt);
                service.generate(&topic)
            });

            match outcome {
                RetryOutcome::Success { value, attempts } => {
                    info!("generated explanation for {} / {}", topic.drug, topic.phenotype);
                    Ok(SharedExplanation {
                        generated: Some(value),
                        origin: ExplanationOrigin::Generated,
                        attempts,
                    })
                }
                RetryOutcome::Skipped { attempts } => Err(SharedExplanation::fallback(
                    TemplateReason::RateLimitSkipped,
                    attempts,
                )),
                RetryOutcome::Exhausted { attempts, last_error } => {
                    warn!(
                        "falling back to template for {} / {}: {}",
                        topic.drug, topic.phenotype, last_error
                    );
                    Err(SharedExplanation::fallback(TemplateReason::Exhausted, attempts))
                }
                RetryOutcome::Rejected { attempts, error } => {
                    warn!(
                        "explanation for {} / {} rejected: {}",
                        topic.drug, topic.phenotype, error
                    );
                    Err(SharedExplanation::fallback(TemplateReason::Rejected, attempts))
                }
            }
        });

        Lookup {
            value: Arc::new(shared.value.render(request)),
            source: shared.source,
            failed: shared.failed,
        }
    }

    pub fn narrate(
        &self,
        request: &NarrativeRequest,
        signal: &RateLimitSignal,
        mode: NetworkMode,
    ) -> Lookup<Narrative> {
        let fallback = |reason: TemplateReason, attempts: u32| Narrative {
            text: templates::narrative(request),
            origin: ExplanationOrigin::Template(reason),
            attempts,
        };

        if mode == NetworkMode::Offline {
            return Lookup {
                value: Arc::new(fallback(TemplateReason::NoNetwork, 0)),
                source: LookupSource::Bypassed,
                failed: false,
            };
        }

        self.narratives.get_or_compute(request.key(), || {
            let Some(service) = &self.service else {
                return Err(fallback(TemplateReason::Unavailable, 0));
            };

            let outcome = run_with_retry(&self.policy, self.sleeper.as_ref(), signal, |attempt| {
                debug!("narrating for {} (attempt {})", request.patient_id, attempt);
                service.narrate(request)
            });

            match outcome {
                RetryOutcome::Success { value, attempts } => Ok(Narrative {
                    text: value,
                    origin: ExplanationOrigin::Generated,
                    attempts,
                }),
                RetryOutcome::Skipped { attempts } => {
                    Err(fallback(TemplateReason::RateLimitSkipped, attempts))
                }
                RetryOutcome::Exhausted { attempts, .. } => {
                    Err(fallback(TemplateReason::Exhausted, attempts))
                }
                RetryOutcome::Rejected { attempts, .. } => {
                    Err(fallback(TemplateReason::Rejected, attempts))
                }
            }
        })
    }

    pub fn explanation_stats(&self) -> CacheStats {
        self.explanations.stats()
    }

    pub fn narrative_stats(&self) -> CacheStats {
        self.narratives.stats()
    }
}
