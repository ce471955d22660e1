//! End-to-end evaluation of one patient against a list of drugs.
//!
//! Parsing, assembly, resolution and classification are pure and run inline. Each
//! requested drug then becomes an isolated unit on the batch runner, which adds the
//! final classification, the recommendation and the explanation.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analysis::{normalize_drug, ClassificationContext, PhenotypeResolver, RiskClassifier};
use crate::batch::{BatchRunner, UnitOutcome};
use crate::diplotype::DiplotypeAssembler;
use crate::error::{BatchError, ConfigurationError, UnitError};
use crate::explain::{
    templates, CacheStats, Explainer, Explanation, ExplanationOrigin, ExplanationRequest,
    LookupSource, Narrative, NarrativeRequest, NetworkMode, RateLimitSignal, TemplateReason,
};
use crate::interactions::{InteractionChecker, InteractionReport};
use crate::parsers::ParsedVariants;
use crate::types::*;

#[derive(Debug, Clone, Serialize)]
pub struct PharmacogenomicProfile {
    pub primary_gene: Gene,
    pub diplotype: String,
    pub phenotype: Phenotype,
    pub phenotype_label: String,
    pub resolved: bool,
    pub detected_variants: Vec<VariantCall>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub vcf_parsing_success: bool,
    pub variants_detected: usize,
    pub genes_analyzed: Vec<Gene>,
    pub parse_errors: usize,
    pub unresolved_genes: Vec<Gene>,
    pub explanation_generated: bool,
    pub explanation_origin: ExplanationOrigin,
    pub explanation_source: LookupSource,
    pub unit_error: Option<String>,
}

/// Everything the presentation layer needs for one drug
#[derive(Debug, Clone, Serialize)]
pub struct DrugReport {
    pub drug: String,
    pub risk_assessment: RiskAssessment,
    /// Classification on the genotype phenotype, present when an inhibitor shifted it
    pub genotype_risk: Option<RiskAssessment>,
    pub profile: Option<PharmacogenomicProfile>,
    pub recommendation: ClinicalRecommendation,
    pub explanation: Explanation,
    pub quality: QualityMetrics,
}

impl DrugReport {
    pub fn is_degraded(&self) -> bool {
        self.quality.unit_error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseSummary {
    pub source: String,
    pub sample_id: Option<String>,
    pub data_lines: usize,
    pub calls: usize,
    pub homozygous_reference: usize,
    pub diagnostics: Vec<String>,
    pub success: bool,
    pub genes_detected: Vec<Gene>,
    pub unresolved_genes: Vec<Gene>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientReport {
    pub patient_id: String,
    pub timestamp: String,
    pub drugs: Vec<DrugReport>,
    pub gene_profiles: Vec<GeneProfile>,
    pub interactions: InteractionReport,
    pub narrative: Narrative,
    pub parse: ParseSummary,
    pub overall_severity: Severity,
    pub explanation_cache: CacheStats,
}

impl PatientReport {
    pub fn drug(&self, name: &str) -> Option<&DrugReport> {
        let name = normalize_drug(name);
        self.drugs.iter().find(|d| d.drug == name)
    }

    pub fn label_counts(&self) -> HashMap<RiskLabel, usize> {
        let mut counts = HashMap::new();
        for report in &self.drugs {
            *counts.entry(report.risk_assessment.risk_label).or_insert(0) += 1;
        }
        counts
    }
}

/// Upper-cased, de-duplicated drug list in first-occurrence order
pub fn normalize_drug_list<S: AsRef<str>>(drugs: &[S]) -> Vec<String> {
    let mut seen = Vec::new();
    for drug in drugs {
        let drug = normalize_drug(drug.as_ref());
        if !drug.is_empty() && !seen.contains(&drug) {
            seen.push(drug);
        }
    }
    seen
}

/// Read-only state shared by the drug units of one evaluation
struct UnitContext {
    profiles: HashMap<Gene, GeneProfile>,
    phenotypes: HashMap<Gene, PhenotypeResult>,
    calls: Vec<VariantCall>,
    initial: HashMap<String, Result<RiskAssessment, ConfigurationError>>,
    interactions: InteractionReport,
    parse: ParseSummary,
    explainer: Arc<Explainer>,
    signal: Arc<RateLimitSignal>,
    network: NetworkMode,
}

impl UnitContext {
    fn phenotype(&self, gene: Gene) -> Phenotype {
        self.phenotypes
            .get(&gene)
            .map(|p| p.phenotype)
            .unwrap_or(Phenotype::Unknown)
    }

    fn profile_for(&self, gene: Gene) -> Option<PharmacogenomicProfile> {
        let result = self.phenotypes.get(&gene)?;
        let profile = self.profiles.get(&gene)?;
        Some(PharmacogenomicProfile {
            primary_gene: gene,
            diplotype: result.diplotype.clone(),
            phenotype: result.phenotype,
            phenotype_label: result.phenotype.label_for(gene).to_string(),
            resolved: result.resolved,
            detected_variants: self.calls.iter().filter(|c| c.gene == gene).cloned().collect(),
            notes: profile.notes.clone(),
        })
    }

    fn variant_ids(&self, gene: Gene) -> Vec<String> {
        self.profiles
            .get(&gene)
            .map(|p| p.variant_ids.clone())
            .unwrap_or_default()
    }

    fn quality(&self, explanation: &Explanation, source: LookupSource, unit_error: Option<String>) -> QualityMetrics {
        QualityMetrics {
            vcf_parsing_success: self.parse.success,
            variants_detected: self.parse.calls,
            genes_analyzed: Gene::ALL.to_vec(),
            parse_errors: self.parse.diagnostics.len(),
            unresolved_genes: self.parse.unresolved_genes.clone(),
            explanation_generated: explanation.origin.is_generated(),
            explanation_origin: explanation.origin,
            explanation_source: source,
            unit_error,
        }
    }

    fn evaluate_drug(&self, drug: &str) -> Result<DrugReport, UnitError> {
        let classifier = RiskClassifier::new();
        let initial = match self.initial.get(drug) {
            Some(result) => result.clone()?,
            None => return Err(ConfigurationError::UnsupportedDrug(drug.to_string()).into()),
        };
        let gene = classifier.primary_gene(drug)?;
        let inferred_gene = self
            .profiles
            .get(&gene)
            .map(|p| p.inferred_gene)
            .unwrap_or(false);

        let shifted = self
            .interactions
            .phenocopy_for(drug)
            .filter(|shift| shift.effective_phenotype != shift.genotype_phenotype);

        let (risk, genotype_risk) = match shifted {
            Some(shift) => {
                let risk = classifier.classify(
                    drug,
                    shift.effective_phenotype,
                    ClassificationContext {
                        inferred_gene,
                        phenocopied_from: Some(shift.genotype_phenotype),
                    },
                )?;
                info!(
                    "{} classified as {} instead of {} because of {}",
                    drug,
                    shift.effective_phenotype,
                    shift.genotype_phenotype,
                    shift.inhibitors.join(", ")
                );
                (risk, Some(initial))
            }
            None => (initial, None),
        };

        let recommendation = classifier.recommend(&risk);
        let request = ExplanationRequest {
            drug: drug.to_string(),
            gene,
            diplotype: self
                .phenotypes
                .get(&gene)
                .map(|p| p.diplotype.clone())
                .unwrap_or_else(|| Diplotype::reference().to_string()),
            phenotype: risk.phenotype,
            risk_label: risk.risk_label,
            severity: risk.severity,
            variant_ids: self.variant_ids(gene),
        };
        let lookup = self.explainer.explain(&request, &self.signal, self.network);
        let explanation = (*lookup.value).clone();

        Ok(DrugReport {
            drug: drug.to_string(),
            quality: self.quality(&explanation, lookup.source, None),
            risk_assessment: risk,
            genotype_risk,
            profile: self.profile_for(gene),
            recommendation,
            explanation,
        })
    }

    fn degraded_report(&self, drug: &str, error: &UnitError) -> DrugReport {
        let gene = RiskClassifier::new().primary_gene(drug).ok();
        let variant_ids = gene.map(|g| self.variant_ids(g)).unwrap_or_default();
        let risk = RiskAssessment {
            drug: drug.to_string(),
            gene,
            phenotype: gene.map(|g| self.phenotype(g)).unwrap_or(Phenotype::Unknown),
            phenocopied_from: None,
            risk_label: RiskLabel::Unknown,
            severity: Severity::Low,
            confidence: 0.0,
            clinical_note: error.to_string(),
        };
        let explanation = Explanation {
            sections: templates::degraded(drug, gene, &error.to_string(), &variant_ids),
            origin: ExplanationOrigin::Template(TemplateReason::Degraded),
            attempts: 0,
            cited_variants: variant_ids,
        };

        DrugReport {
            drug: drug.to_string(),
            recommendation: ClinicalRecommendation {
                guideline: format!("CPIC Guideline for {}", drug),
                dosing: crate::tables::DEFAULT_RECOMMENDATION.to_string(),
                alternative_drugs: Vec::new(),
                monitoring: crate::tables::DEFAULT_MONITORING.to_string(),
                contraindicated: false,
            },
            profile: gene.and_then(|g| self.profile_for(g)),
            quality: self.quality(&explanation, LookupSource::Bypassed, Some(error.to_string())),
            risk_assessment: risk,
            genotype_risk: None,
            explanation,
        }
    }
}

/// Runs the whole pipeline for one patient
pub struct Evaluator {
    explainer: Arc<Explainer>,
    runner: BatchRunner,
    network: NetworkMode,
}

impl Evaluator {
    pub fn new(explainer: Arc<Explainer>, runner: BatchRunner) -> Self {
        Self {
            explainer,
            runner,
            network: NetworkMode::Online,
        }
    }

    /// Template explanations only, no network access
    pub fn offline() -> Self {
        Self::new(Arc::new(Explainer::offline()), BatchRunner::default())
            .with_network(NetworkMode::Offline)
    }

    pub fn with_network(mut self, network: NetworkMode) -> Self {
        self.network = network;
        self
    }

    pub fn explainer(&self) -> &Arc<Explainer> {
        &self.explainer
    }

    /// Evaluate as its own run, with a fresh rate-limit signal
    pub fn evaluate<S: AsRef<str>>(
        &self,
        variants: &ParsedVariants,
        drugs: &[S],
    ) -> Result<PatientReport, BatchError> {
        let signal = self.explainer.begin_run();
        self.evaluate_in_run(variants, drugs, signal)
    }

    /// Evaluate as part of a run that owns `signal`
    pub fn evaluate_in_run<S: AsRef<str>>(
        &self,
        variants: &ParsedVariants,
        drugs: &[S],
        signal: Arc<RateLimitSignal>,
    ) -> Result<PatientReport, BatchError> {
        let drugs = normalize_drug_list(drugs);
        let patient_id = variants
            .sample_id
            .clone()
            .unwrap_or_else(|| "UNKNOWN_PATIENT".to_string());
        info!("Evaluating {} drugs for {}", drugs.len(), patient_id);

        let gene_profiles = DiplotypeAssembler::new().assemble(&variants.calls);
        let resolver = PhenotypeResolver::new();
        let phenotypes: HashMap<Gene, PhenotypeResult> = gene_profiles
            .iter()
            .map(|profile| (profile.gene, resolver.resolve_profile(profile)))
            .collect();
        let unresolved_genes: Vec<Gene> = Gene::ALL
            .iter()
            .copied()
            .filter(|g| phenotypes.get(g).map(|p| !p.resolved).unwrap_or(true))
            .collect();
        for gene in &unresolved_genes {
            warn!("{} diplotype could not be resolved, using Unknown", gene);
        }

        let classifier = RiskClassifier::new();
        let initial: HashMap<String, Result<RiskAssessment, ConfigurationError>> = drugs
            .iter()
            .map(|drug| {
                let result = classifier.primary_gene(drug).and_then(|gene| {
                    let inferred_gene = gene_profiles
                        .iter()
                        .any(|p| p.gene == gene && p.inferred_gene);
                    let phenotype = phenotypes
                        .get(&gene)
                        .map(|p| p.phenotype)
                        .unwrap_or(Phenotype::Unknown);
                    classifier.classify(
                        drug,
                        phenotype,
                        ClassificationContext {
                            inferred_gene,
                            phenocopied_from: None,
                        },
                    )
                });
                (drug.clone(), result)
            })
            .collect();

        let gene_phenotypes: HashMap<Gene, Phenotype> =
            phenotypes.iter().map(|(g, p)| (*g, p.phenotype)).collect();
        let interactions = InteractionChecker::new().analyze(&drugs, &gene_phenotypes);

        let parse = ParseSummary {
            source: variants.source.clone(),
            sample_id: variants.sample_id.clone(),
            data_lines: variants.data_lines,
            calls: variants.calls.len(),
            homozygous_reference: variants.homozygous_reference,
            diagnostics: variants.error_messages(),
            success: variants.parsing_succeeded(),
            genes_detected: variants.detected_genes(),
            unresolved_genes,
        };

        let context = Arc::new(UnitContext {
            profiles: gene_profiles.iter().map(|p| (p.gene, p.clone())).collect(),
            phenotypes,
            calls: variants.calls.clone(),
            initial,
            interactions,
            parse,
            explainer: Arc::clone(&self.explainer),
            signal: Arc::clone(&signal),
            network: self.network,
        });

        let outcomes = {
            let context = Arc::clone(&context);
            self.runner
                .run(drugs.clone(), move |_, drug| context.evaluate_drug(&drug))?
        };

        let reports: Vec<DrugReport> = drugs
            .iter()
            .zip(outcomes)
            .map(|(drug, outcome)| match outcome {
                UnitOutcome::Completed(report) => report,
                UnitOutcome::Failed(error) => context.degraded_report(drug, &error),
                UnitOutcome::TimedOut => context.degraded_report(drug, &UnitError::TimedOut),
            })
            .collect();

        let narrative_request = NarrativeRequest {
            patient_id: patient_id.clone(),
            entries: reports
                .iter()
                .filter(|r| !r.is_degraded())
                .filter_map(|r| {
                    let gene = r.risk_assessment.gene?;
                    Some(ExplanationRequest {
                        drug: r.drug.clone(),
                        gene,
                        diplotype: r
                            .profile
                            .as_ref()
                            .map(|p| p.diplotype.clone())
                            .unwrap_or_default(),
                        phenotype: r.risk_assessment.phenotype,
                        risk_label: r.risk_assessment.risk_label,
                        severity: r.risk_assessment.severity,
                        variant_ids: r.explanation.cited_variants.clone(),
                    })
                })
                .collect(),
            interaction_alerts: context
                .interactions
                .alerts
                .iter()
                .map(|a| a.message.clone())
                .collect(),
        };
        let narrative = (*self
            .explainer
            .narrate(&narrative_request, &signal, self.network)
            .value)
            .clone();

        let overall_severity = reports
            .iter()
            .map(|r| r.risk_assessment.severity)
            .chain(std::iter::once(context.interactions.overall_severity))
            .max()
            .unwrap_or(Severity::None);

        info!(
            "Finished {} for {} drugs, overall severity {}",
            patient_id,
            reports.len(),
            overall_severity
        );

        Ok(PatientReport {
            patient_id,
            timestamp: Utc::now().to_rfc3339(),
            drugs: reports,
            gene_profiles,
            interactions: context.interactions.clone(),
            narrative,
            parse: context.parse.clone(),
            overall_severity,
            explanation_cache: self.explainer.explanation_stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::VcfReader;

    const HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tPATIENT_T\n";

    fn variants(body: &str) -> ParsedVariants {
        VcfReader::new()
            .read_str(&format!("{}{}", HEADER, body), "test.vcf")
            .unwrap()
    }

    fn all_drugs() -> Vec<&'static str> {
        vec!["CODEINE", "WARFARIN", "CLOPIDOGREL", "SIMVASTATIN", "AZATHIOPRINE", "FLUOROURACIL"]
    }

    #[test]
    fn test_wildtype_is_safe_everywhere() {
        let report = Evaluator::offline()
            .evaluate(&variants(""), &all_drugs())
            .unwrap();

        assert_eq!(report.drugs.len(), 6);
        for drug in &report.drugs {
            assert_eq!(drug.risk_assessment.risk_label, RiskLabel::Safe, "{}", drug.drug);
            assert_eq!(drug.profile.as_ref().unwrap().diplotype, "*1/*1");
        }
        assert_eq!(report.overall_severity, Severity::None);
        assert_eq!(report.patient_id, "PATIENT_T");
    }

    #[test]
    fn test_loss_of_function_everywhere() {
        let body = "\
chr22\t42130692\trs3892097\tC\tT\t.\tPASS\tGENE=CYP2D6\tGT\t1/1
chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t1/1
chr10\t94981296\trs1057910\tA\tC\t.\tPASS\tGENE=CYP2C9\tGT\t1/1
chr12\t21178615\trs4149056\tT\tC\t.\tPASS\tGENE=SLCO1B1\tGT\t1/1
chr6\t18130687\trs1142345\tT\tC\t.\tPASS\tGENE=TPMT\tGT\t1/1
chr1\t97450058\trs3918290\tC\tT\t.\tPASS\tGENE=DPYD\tGT\t1/1
";
        let report = Evaluator::offline()
            .evaluate(&variants(body), &all_drugs())
            .unwrap();
        let counts = report.label_counts();

        assert_eq!(counts.get(&RiskLabel::Ineffective), Some(&2));
        assert_eq!(counts.get(&RiskLabel::AdjustDosage), Some(&1));
        assert_eq!(counts.get(&RiskLabel::Toxic), Some(&3));
        assert_eq!(report.overall_severity, Severity::Critical);

        let codeine = report.drug("codeine").unwrap();
        assert!(codeine.explanation.sections.summary.contains("rs3892097"));
    }

    #[test]
    fn test_unsupported_drug_is_degraded_not_dropped() {
        let report = Evaluator::offline()
            .evaluate(&variants(""), &["codeine", "aspirin", " Codeine "])
            .unwrap();

        let names: Vec<&str> = report.drugs.iter().map(|d| d.drug.as_str()).collect();
        assert_eq!(names, vec!["CODEINE", "ASPIRIN"]);

        let aspirin = &report.drugs[1];
        assert!(aspirin.is_degraded());
        assert_eq!(aspirin.risk_assessment.risk_label, RiskLabel::Unknown);
        assert_eq!(aspirin.risk_assessment.severity, Severity::Low);
        assert_eq!(aspirin.risk_assessment.confidence, 0.0);
        assert_eq!(
            aspirin.explanation.origin,
            ExplanationOrigin::Template(TemplateReason::Degraded)
        );
        assert!(!report.drugs[0].is_degraded());
    }

    #[test]
    fn test_inhibitor_shifts_classification_only() {
        let report = Evaluator::offline()
            .evaluate(&variants(""), &["CODEINE", "FLUOXETINE"])
            .unwrap();

        let codeine = report.drug("CODEINE").unwrap();
        assert_eq!(codeine.risk_assessment.phenotype, Phenotype::IM);
        assert_eq!(codeine.risk_assessment.phenocopied_from, Some(Phenotype::NM));
        assert_eq!(codeine.risk_assessment.risk_label, RiskLabel::AdjustDosage);
        assert_eq!(
            codeine.genotype_risk.as_ref().map(|r| r.risk_label),
            Some(RiskLabel::Safe)
        );
        // genotype-derived phenotype is untouched
        assert_eq!(codeine.profile.as_ref().unwrap().phenotype, Phenotype::NM);
        assert!(!report.interactions.alerts.is_empty());
    }

    #[test]
    fn test_parse_diagnostics_reach_quality_metrics() {
        let body = "chr1\tbad\trs1\tA\tT\t.\tPASS\t.\tGT\t0/1\n\
                    chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t0/1\n";
        let report = Evaluator::offline()
            .evaluate(&variants(body), &["CLOPIDOGREL"])
            .unwrap();
        let quality = &report.drugs[0].quality;
        assert_eq!(quality.parse_errors, 1);
        assert!(quality.vcf_parsing_success);
        assert_eq!(quality.variants_detected, 1);
        assert_eq!(report.drugs[0].risk_assessment.phenotype, Phenotype::IM);
    }

    #[test]
    fn test_unresolved_diplotype_degrades_confidence() {
        let body = "chr10\t1\t.\tA\tT\t.\tPASS\tGENE=CYP2C9;STAR=*7\tGT\t0/1\n";
        let report = Evaluator::offline()
            .evaluate(&variants(body), &["WARFARIN"])
            .unwrap();
        let warfarin = &report.drugs[0];
        assert_eq!(warfarin.risk_assessment.phenotype, Phenotype::Unknown);
        assert_eq!(warfarin.risk_assessment.risk_label, RiskLabel::Unknown);
        assert!(warfarin.risk_assessment.confidence <= 0.5);
        assert_eq!(report.parse.unresolved_genes, vec![Gene::Cyp2c9]);
    }
}
