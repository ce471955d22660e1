//! Drug-drug interaction layer, run once every requested drug has been classified.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::tables::DRUG_RULES;
use crate::types::{Gene, Phenotype, Severity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InhibitionStrength {
    Strong,
    Moderate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    SharedGene,
    KnownCombination,
    InhibitorEffect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionAlert {
    pub kind: InteractionKind,
    pub drugs: Vec<String>,
    pub gene: Option<Gene>,
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
}

/// A substrate whose phenotype is shifted for risk purposes by co-prescribed inhibitors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhenocopyShift {
    pub drug: String,
    pub gene: Gene,
    pub inhibitors: Vec<String>,
    pub genotype_phenotype: Phenotype,
    pub effective_phenotype: Phenotype,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InteractionReport {
    pub alerts: Vec<InteractionAlert>,
    pub phenocopies: Vec<PhenocopyShift>,
    pub overall_severity: Severity,
}

impl InteractionReport {
    pub fn phenocopy_for(&self, drug: &str) -> Option<&PhenocopyShift> {
        self.phenocopies.iter().find(|shift| shift.drug == drug)
    }
}

struct KnownCombination {
    drugs: [&'static str; 2],
    severity: Severity,
    mechanism: &'static str,
    recommendation: &'static str,
}

const GENE_SUBSTRATES: &[(Gene, &[&str])] = &[
    (Gene::Cyp2d6, &["CODEINE", "TRAMADOL", "OXYCODONE", "METOPROLOL", "PAROXETINE", "FLUOXETINE", "HALOPERIDOL"]),
    (Gene::Cyp2c19, &["CLOPIDOGREL", "OMEPRAZOLE", "ESCITALOPRAM", "DIAZEPAM", "VORICONAZOLE"]),
    (Gene::Cyp2c9, &["WARFARIN", "PHENYTOIN", "IBUPROFEN", "CELECOXIB", "FLUVASTATIN"]),
    (Gene::Slco1b1, &["SIMVASTATIN", "ATORVASTATIN", "PRAVASTATIN", "ROSUVASTATIN", "METHOTREXATE"]),
    (Gene::Tpmt, &["AZATHIOPRINE", "MERCAPTOPURINE", "THIOGUANINE"]),
    (Gene::Dpyd, &["FLUOROURACIL", "CAPECITABINE", "TEGAFUR"]),
];

const INHIBITORS: &[(&str, Gene, InhibitionStrength)] = &[
    ("FLUOXETINE", Gene::Cyp2d6, InhibitionStrength::Strong),
    ("PAROXETINE", Gene::Cyp2d6, InhibitionStrength::Strong),
    ("OMEPRAZOLE", Gene::Cyp2c19, InhibitionStrength::Moderate),
    ("VORICONAZOLE", Gene::Cyp2c19, InhibitionStrength::Strong),
    ("VORICONAZOLE", Gene::Cyp2c9, InhibitionStrength::Strong),
    ("FLUVASTATIN", Gene::Cyp2c9, InhibitionStrength::Moderate),
];

const KNOWN_COMBINATIONS: &[KnownCombination] = &[
    KnownCombination {
        drugs: ["CODEINE", "FLUOXETINE"],
        severity: Severity::High,
        mechanism: "Fluoxetine strongly inhibits CYP2D6, reducing codeine to morphine conversion. Risk of inefficacy and unpredictable opioid levels.",
        recommendation: "Avoid combination. Use a non-CYP2D6-dependent opioid.",
    },
    KnownCombination {
        drugs: ["CODEINE", "PAROXETINE"],
        severity: Severity::High,
        mechanism: "Paroxetine is a potent CYP2D6 inhibitor. Combined with codeine it phenocopies poor metabolizer status.",
        recommendation: "Contraindicated. Switch to morphine or hydromorphone.",
    },
    KnownCombination {
        drugs: ["WARFARIN", "FLUOXETINE"],
        severity: Severity::Moderate,
        mechanism: "Fluoxetine moderately inhibits CYP2C9, increasing warfarin plasma levels and bleeding risk.",
        recommendation: "Increase INR monitoring frequency. Consider dose reduction.",
    },
    KnownCombination {
        drugs: ["SIMVASTATIN", "ATORVASTATIN"],
        severity: Severity::Moderate,
        mechanism: "Both statins compete for SLCO1B1-mediated hepatic uptake. Combined use amplifies myopathy risk.",
        recommendation: "Avoid combination. Use a single statin at an appropriate dose.",
    },
    KnownCombination {
        drugs: ["AZATHIOPRINE", "MERCAPTOPURINE"],
        severity: Severity::Critical,
        mechanism: "Both are TPMT substrates. Combination compounds myelosuppression risk.",
        recommendation: "Contraindicated. Never combine.",
    },
    KnownCombination {
        drugs: ["FLUOROURACIL", "CAPECITABINE"],
        severity: Severity::Critical,
        mechanism: "Both are DPYD substrates. Combination massively increases fluoropyrimidine toxicity.",
        recommendation: "Contraindicated. Use only one fluoropyrimidine at a time.",
    },
    KnownCombination {
        drugs: ["CLOPIDOGREL", "OMEPRAZOLE"],
        severity: Severity::High,
        mechanism: "Omeprazole inhibits CYP2C19, reducing clopidogrel activation by up to 45%. Increased risk of cardiovascular events.",
        recommendation: "Use pantoprazole instead of omeprazole.",
    },
];

fn is_substrate(drug: &str, gene: Gene) -> bool {
    GENE_SUBSTRATES
        .iter()
        .any(|(g, drugs)| *g == gene && drugs.contains(&drug))
}

/// Checks every selected drug pair against the interaction tables
#[derive(Debug, Default)]
pub struct InteractionChecker;

impl InteractionChecker {
    pub fn new() -> Self {
        Self
    }

    /// `drugs` are normalized names; `phenotypes` are the genotype-derived phenotypes
    pub fn analyze(&self, drugs: &[String], phenotypes: &HashMap<Gene, Phenotype>) -> InteractionReport {
        let mut alerts = self.shared_gene_alerts(drugs, phenotypes);
        alerts.extend(self.known_combination_alerts(drugs));
        let (inhibitor_alerts, phenocopies) = self.inhibitor_effects(drugs, phenotypes);
        alerts.extend(inhibitor_alerts);

        let overall_severity = alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::None);

        if !alerts.is_empty() {
            info!(
                "{} interaction alerts ({} phenocopied substrates), overall severity {}",
                alerts.len(),
                phenocopies.len(),
                overall_severity
            );
        }

        InteractionReport {
            alerts,
            phenocopies,
            overall_severity,
        }
    }

    fn shared_gene_alerts(
        &self,
        drugs: &[String],
        phenotypes: &HashMap<Gene, Phenotype>,
    ) -> Vec<InteractionAlert> {
        let mut alerts = Vec::new();

        for (gene, _) in GENE_SUBSTRATES {
            let shared: Vec<String> = drugs
                .iter()
                .filter(|d| is_substrate(d, *gene))
                .cloned()
                .collect();
            if shared.len() < 2 {
                continue;
            }

            let phenotype = phenotypes.get(gene).copied().unwrap_or(Phenotype::Unknown);
            let listed = shared.join(", ");
            let (severity, message) = match phenotype {
                Phenotype::PM => (
                    Severity::Critical,
                    format!("Compound risk: poor {} function with multiple dependent drugs ({}). Risk of compounding toxicity or inefficacy.", gene, listed),
                ),
                Phenotype::IM => (
                    Severity::High,
                    format!("Elevated risk: intermediate {} function with multiple substrates ({}). Monitor for cumulative adverse effects.", gene, listed),
                ),
                Phenotype::URM => (
                    Severity::High,
                    format!("Ultrarapid {} activity with multiple substrates ({}). All may be cleared rapidly.", gene, listed),
                ),
                Phenotype::NM => (
                    Severity::Low,
                    format!("Normal {} activity with multiple substrates ({}). Standard monitoring recommended.", gene, listed),
                ),
                Phenotype::RM | Phenotype::Unknown => continue,
            };

            alerts.push(InteractionAlert {
                kind: InteractionKind::SharedGene,
                drugs: shared,
                gene: Some(*gene),
                severity,
                message,
                recommendation: format!(
                    "Consider sequencing or spacing {} substrate drugs. Consult CPIC.",
                    gene
                ),
            });
        }

        alerts
    }

    fn known_combination_alerts(&self, drugs: &[String]) -> Vec<InteractionAlert> {
        KNOWN_COMBINATIONS
            .iter()
            .filter(|combo| combo.drugs.iter().all(|d| drugs.iter().any(|s| s == d)))
            .map(|combo| InteractionAlert {
                kind: InteractionKind::KnownCombination,
                drugs: combo.drugs.iter().map(|d| d.to_string()).collect(),
                gene: None,
                severity: combo.severity,
                message: format!(
                    "Known interaction between {}: {}",
                    combo.drugs.join(" + "),
                    combo.mechanism
                ),
                recommendation: combo.recommendation.to_string(),
            })
            .collect()
    }

    fn inhibitor_effects(
        &self,
        drugs: &[String],
        phenotypes: &HashMap<Gene, Phenotype>,
    ) -> (Vec<InteractionAlert>, Vec<PhenocopyShift>) {
        let mut alerts = Vec::new();
        // substrate -> (gene, inhibitors); one shift per substrate however many inhibitors
        let mut shifts: BTreeMap<&str, (Gene, Vec<String>)> = BTreeMap::new();

        for inhibitor in drugs {
            for (name, gene, strength) in INHIBITORS {
                if inhibitor != name {
                    continue;
                }
                let affected: Vec<String> = drugs
                    .iter()
                    .filter(|d| *d != inhibitor && is_substrate(d, *gene))
                    .cloned()
                    .collect();
                if affected.is_empty() {
                    continue;
                }

                let strength_name = match strength {
                    InhibitionStrength::Strong => "strong",
                    InhibitionStrength::Moderate => "moderate",
                };
                alerts.push(InteractionAlert {
                    kind: InteractionKind::InhibitorEffect,
                    drugs: std::iter::once(inhibitor.clone())
                        .chain(affected.iter().cloned())
                        .collect(),
                    gene: Some(*gene),
                    severity: match strength {
                        InhibitionStrength::Strong => Severity::High,
                        InhibitionStrength::Moderate => Severity::Moderate,
                    },
                    message: format!(
                        "{} is a {} {} inhibitor. This may phenocopy a poorer metabolizer for: {}.",
                        inhibitor,
                        strength_name,
                        gene,
                        affected.join(", ")
                    ),
                    recommendation: format!(
                        "Review {} substrate doses when co-prescribed with {}.",
                        gene, inhibitor
                    ),
                });

                for substrate in drugs.iter().filter(|d| affected.contains(d)) {
                    // Only drugs classified on this gene have a phenotype to shift
                    let classified_on_gene = DRUG_RULES
                        .get(substrate.as_str())
                        .map(|rule| rule.gene == *gene)
                        .unwrap_or(false);
                    if classified_on_gene {
                        shifts
                            .entry(substrate.as_str())
                            .or_insert_with(|| (*gene, Vec::new()))
                            .1
                            .push(inhibitor.clone());
                    }
                }
            }
        }

        let phenocopies = shifts
            .into_iter()
            .map(|(drug, (gene, inhibitors))| {
                let genotype_phenotype = phenotypes.get(&gene).copied().unwrap_or(Phenotype::Unknown);
                PhenocopyShift {
                    drug: drug.to_string(),
                    gene,
                    inhibitors,
                    genotype_phenotype,
                    effective_phenotype: genotype_phenotype.poorer_for(gene),
                }
            })
            .collect();

        (alerts, phenocopies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drugs(names: &[&str]) -> Vec<String> {
        names.iter().map(|d| d.to_string()).collect()
    }

    fn normal_phenotypes() -> HashMap<Gene, Phenotype> {
        Gene::ALL.iter().map(|g| (*g, Phenotype::NM)).collect()
    }

    #[test]
    fn test_no_interactions_for_distinct_genes() {
        let report = InteractionChecker::new().analyze(
            &drugs(&["CODEINE", "WARFARIN", "CLOPIDOGREL", "SIMVASTATIN", "AZATHIOPRINE", "FLUOROURACIL"]),
            &normal_phenotypes(),
        );
        assert!(report.alerts.is_empty());
        assert!(report.phenocopies.is_empty());
        assert_eq!(report.overall_severity, Severity::None);
    }

    #[test]
    fn test_inhibitor_phenocopies_substrate() {
        let report = InteractionChecker::new()
            .analyze(&drugs(&["CODEINE", "FLUOXETINE"]), &normal_phenotypes());

        let shift = report.phenocopy_for("CODEINE").expect("codeine shifted");
        assert_eq!(shift.genotype_phenotype, Phenotype::NM);
        assert_eq!(shift.effective_phenotype, Phenotype::IM);
        assert_eq!(shift.inhibitors, vec!["FLUOXETINE".to_string()]);
        // fluoxetine has no risk table of its own
        assert!(report.phenocopy_for("FLUOXETINE").is_none());

        let kinds: Vec<InteractionKind> = report.alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&InteractionKind::SharedGene));
        assert!(kinds.contains(&InteractionKind::KnownCombination));
        assert!(kinds.contains(&InteractionKind::InhibitorEffect));
        assert_eq!(report.overall_severity, Severity::High);
    }

    #[test]
    fn test_two_inhibitors_shift_once() {
        let mut phenotypes = normal_phenotypes();
        phenotypes.insert(Gene::Cyp2c19, Phenotype::URM);
        let report = InteractionChecker::new().analyze(
            &drugs(&["CLOPIDOGREL", "OMEPRAZOLE", "VORICONAZOLE"]),
            &phenotypes,
        );
        let shift = report.phenocopy_for("CLOPIDOGREL").unwrap();
        assert_eq!(shift.effective_phenotype, Phenotype::RM);
        assert_eq!(shift.inhibitors.len(), 2);
        assert_eq!(report.phenocopies.len(), 1);
    }

    #[test]
    fn test_shared_gene_severity_follows_phenotype() {
        let mut phenotypes = normal_phenotypes();
        phenotypes.insert(Gene::Tpmt, Phenotype::PM);
        let report = InteractionChecker::new()
            .analyze(&drugs(&["AZATHIOPRINE", "MERCAPTOPURINE"]), &phenotypes);

        let shared = report
            .alerts
            .iter()
            .find(|a| a.kind == InteractionKind::SharedGene)
            .unwrap();
        assert_eq!(shared.severity, Severity::Critical);
        assert_eq!(shared.gene, Some(Gene::Tpmt));
        assert_eq!(report.overall_severity, Severity::Critical);
    }

    #[test]
    fn test_ultrarapid_cyp2d6_steps_to_normal() {
        let mut phenotypes = normal_phenotypes();
        phenotypes.insert(Gene::Cyp2d6, Phenotype::URM);
        let report = InteractionChecker::new()
            .analyze(&drugs(&["CODEINE", "FLUOXETINE"]), &phenotypes);
        let shift = report.phenocopy_for("CODEINE").unwrap();
        assert_eq!(shift.genotype_phenotype, Phenotype::URM);
        assert_eq!(shift.effective_phenotype, Phenotype::NM);
    }

    #[test]
    fn test_poor_metabolizer_stays_poor() {
        let mut phenotypes = normal_phenotypes();
        phenotypes.insert(Gene::Cyp2d6, Phenotype::PM);
        let report = InteractionChecker::new()
            .analyze(&drugs(&["PAROXETINE", "CODEINE"]), &phenotypes);
        let shift = report.phenocopy_for("CODEINE").unwrap();
        assert_eq!(shift.effective_phenotype, Phenotype::PM);
    }
}
