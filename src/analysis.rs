use tracing::debug;

use crate::error::{ConfigurationError, ResolveError};
use crate::tables::{self, DIPLOTYPE_PHENOTYPE, DRUG_RULES};
use crate::types::*;

/// Canonical spelling used for drug lookups and cache keys
pub fn normalize_drug(drug: &str) -> String {
    drug.trim().to_uppercase()
}

/// Diplotype -> phenotype lookup over the static per-gene tables
#[derive(Debug, Default)]
pub struct PhenotypeResolver;

impl PhenotypeResolver {
    pub fn new() -> Self {
        Self
    }

    /// Exact match first, then the pair written the other way round
    pub fn resolve(&self, gene: Gene, diplotype: &str) -> Result<Phenotype, ResolveError> {
        let unresolved = || ResolveError::UnresolvedDiplotype {
            gene,
            diplotype: diplotype.to_string(),
        };
        let table = DIPLOTYPE_PHENOTYPE.get(&gene).ok_or_else(unresolved)?;

        if let Some(phenotype) = table.get(diplotype) {
            return Ok(*phenotype);
        }

        match diplotype.split_once('/') {
            Some((a, b)) if !b.contains('/') => table
                .get(format!("{}/{}", b, a).as_str())
                .copied()
                .ok_or_else(unresolved),
            _ => Err(unresolved()),
        }
    }

    /// Never fails: an unresolved diplotype degrades to `Unknown`
    pub fn resolve_profile(&self, profile: &GeneProfile) -> PhenotypeResult {
        let diplotype = profile.diplotype.to_string();
        match self.resolve(profile.gene, &diplotype) {
            Ok(phenotype) => PhenotypeResult {
                gene: profile.gene,
                diplotype,
                phenotype,
                resolved: true,
            },
            Err(e) => {
                debug!("{}, treating as Unknown", e);
                PhenotypeResult {
                    gene: profile.gene,
                    diplotype,
                    phenotype: Phenotype::Unknown,
                    resolved: false,
                }
            }
        }
    }
}

/// Evidence qualifiers that lower the confidence of a classification
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassificationContext {
    /// A call on the primary gene only got its gene from the rsID table
    pub inferred_gene: bool,
    /// Genotype-derived phenotype, when an inhibitor shifted the one being classified
    pub phenocopied_from: Option<Phenotype>,
}

/// Phenotype x drug -> risk lookup
#[derive(Debug, Default)]
pub struct RiskClassifier;

impl RiskClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn primary_gene(&self, drug: &str) -> Result<Gene, ConfigurationError> {
        DRUG_RULES
            .get(drug)
            .map(|rule| rule.gene)
            .ok_or_else(|| ConfigurationError::UnsupportedDrug(drug.to_string()))
    }

    pub fn classify(
        &self,
        drug: &str,
        phenotype: Phenotype,
        context: ClassificationContext,
    ) -> Result<RiskAssessment, ConfigurationError> {
        let rule = DRUG_RULES
            .get(drug)
            .ok_or_else(|| ConfigurationError::UnsupportedDrug(drug.to_string()))?;

        // Phenotypes the drug has no row for fall back to its Unknown row
        let risk = rule
            .risks
            .get(&phenotype)
            .or_else(|| rule.risks.get(&Phenotype::Unknown))
            .ok_or_else(|| ConfigurationError::MissingRiskRule {
                drug: drug.to_string(),
                phenotype: phenotype.to_string(),
            })?;

        let mut confidence = risk.confidence;
        if context.inferred_gene {
            confidence *= tables::INFERRED_GENE_CONFIDENCE_FACTOR;
        }
        if context.phenocopied_from.is_some() {
            confidence *= tables::PHENOCOPY_CONFIDENCE_FACTOR;
        }

        Ok(RiskAssessment {
            drug: drug.to_string(),
            gene: Some(rule.gene),
            phenotype,
            phenocopied_from: context.phenocopied_from,
            risk_label: risk.label,
            severity: risk.severity,
            confidence: confidence.clamp(0.0, 1.0),
            clinical_note: risk.note.to_string(),
        })
    }

    pub fn recommend(&self, assessment: &RiskAssessment) -> ClinicalRecommendation {
        let drug = assessment.drug.as_str();
        ClinicalRecommendation {
            guideline: format!("CPIC Guideline for {}", drug),
            dosing: tables::cpic_recommendation(drug, assessment.phenotype).to_string(),
            alternative_drugs: tables::alternative_drugs(drug, assessment.phenotype)
                .iter()
                .map(|s| s.to_string())
                .collect(),
            monitoring: tables::monitoring(drug).to_string(),
            contraindicated: assessment.risk_label == RiskLabel::Toxic
                && assessment.severity == Severity::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_order_independent() {
        let resolver = PhenotypeResolver::new();
        for (gene, table) in DIPLOTYPE_PHENOTYPE.iter() {
            for (diplotype, expected) in table.iter() {
                let (a, b) = diplotype.split_once('/').unwrap();
                let reversed = format!("{}/{}", b, a);
                assert_eq!(resolver.resolve(*gene, diplotype), Ok(*expected));
                assert_eq!(resolver.resolve(*gene, &reversed), Ok(*expected));
            }
        }
    }

    #[test]
    fn test_unresolved_diplotype() {
        let resolver = PhenotypeResolver::new();
        assert!(matches!(
            resolver.resolve(Gene::Cyp2c9, "*7/*9"),
            Err(ResolveError::UnresolvedDiplotype { gene: Gene::Cyp2c9, .. })
        ));
        assert!(resolver.resolve(Gene::Cyp2c9, "*1").is_err());
        assert!(resolver.resolve(Gene::Cyp2c9, "*1/*1/*1").is_err());
    }

    #[test]
    fn test_unresolved_profile_degrades_to_unknown() {
        let profile = GeneProfile {
            gene: Gene::Cyp2c9,
            alleles: vec![StarAllele::new("*7"), StarAllele::new("*9")],
            diplotype: Diplotype::new(StarAllele::new("*7"), StarAllele::new("*9")),
            variant_ids: vec![],
            inferred_gene: false,
            notes: vec![],
        };
        let result = PhenotypeResolver::new().resolve_profile(&profile);
        assert_eq!(result.phenotype, Phenotype::Unknown);
        assert!(!result.resolved);
    }

    #[test]
    fn test_clopidogrel_poor_metabolizer() {
        let phenotype = PhenotypeResolver::new()
            .resolve(Gene::Cyp2c19, "*2/*3")
            .unwrap();
        assert_eq!(phenotype, Phenotype::PM);

        let risk = RiskClassifier::new()
            .classify("CLOPIDOGREL", phenotype, ClassificationContext::default())
            .unwrap();
        assert_eq!(risk.risk_label, RiskLabel::Ineffective);
        assert_eq!(risk.severity, Severity::High);
        assert_eq!(risk.gene, Some(Gene::Cyp2c19));
    }

    #[test]
    fn test_codeine_ultrarapid() {
        let phenotype = PhenotypeResolver::new()
            .resolve(Gene::Cyp2d6, "*1xN/*1xN")
            .unwrap();
        assert_eq!(phenotype, Phenotype::URM);

        let classifier = RiskClassifier::new();
        let risk = classifier
            .classify("CODEINE", phenotype, ClassificationContext::default())
            .unwrap();
        assert_eq!(risk.risk_label, RiskLabel::Toxic);
        assert!(classifier.recommend(&risk).contraindicated);
    }

    #[test]
    fn test_missing_row_falls_back_to_unknown() {
        let risk = RiskClassifier::new()
            .classify("WARFARIN", Phenotype::URM, ClassificationContext::default())
            .unwrap();
        assert_eq!(risk.risk_label, RiskLabel::Unknown);
        assert_eq!(risk.confidence, 0.50);
    }

    #[test]
    fn test_unsupported_drug_is_configuration_error() {
        let err = RiskClassifier::new()
            .classify("ASPIRIN", Phenotype::NM, ClassificationContext::default())
            .unwrap_err();
        assert_eq!(err, ConfigurationError::UnsupportedDrug("ASPIRIN".into()));
    }

    #[test]
    fn test_confidence_reductions() {
        let classifier = RiskClassifier::new();
        let base = classifier
            .classify("CODEINE", Phenotype::NM, ClassificationContext::default())
            .unwrap()
            .confidence;
        let inferred = classifier
            .classify(
                "CODEINE",
                Phenotype::NM,
                ClassificationContext {
                    inferred_gene: true,
                    phenocopied_from: None,
                },
            )
            .unwrap()
            .confidence;
        let phenocopied = classifier
            .classify(
                "CODEINE",
                Phenotype::IM,
                ClassificationContext {
                    inferred_gene: false,
                    phenocopied_from: Some(Phenotype::NM),
                },
            )
            .unwrap();

        assert!(inferred < base);
        assert!((inferred - base * tables::INFERRED_GENE_CONFIDENCE_FACTOR).abs() < 1e-9);
        assert_eq!(phenocopied.phenocopied_from, Some(Phenotype::NM));
        assert!((0.0..=1.0).contains(&phenocopied.confidence));
    }

    #[test]
    fn test_recommendation_tables() {
        let classifier = RiskClassifier::new();
        let risk = classifier
            .classify("CLOPIDOGREL", Phenotype::PM, ClassificationContext::default())
            .unwrap();
        let rec = classifier.recommend(&risk);
        assert_eq!(rec.alternative_drugs, vec!["Prasugrel", "Ticagrelor"]);
        assert!(!rec.contraindicated);
        assert!(rec.monitoring.contains("Platelet"));
    }
}
