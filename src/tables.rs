//! Static clinical rule tables.
//!
//! Loaded once on first use and never mutated afterwards. The data set is closed:
//! six pharmacogenes and one primary drug per gene, following CPIC groupings.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::types::{Gene, Phenotype, RiskLabel, Severity};

/// Applied when any call for the primary gene had its gene inferred from the rsID
pub const INFERRED_GENE_CONFIDENCE_FACTOR: f64 = 0.9;

/// Applied when an inhibitor shifted the phenotype used for the lookup
pub const PHENOCOPY_CONFIDENCE_FACTOR: f64 = 0.85;

pub const DEFAULT_RECOMMENDATION: &str =
    "Consult CPIC guidelines at cpicpgx.org for specific dosing recommendations.";

pub const DEFAULT_MONITORING: &str = "Standard clinical monitoring";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskRule {
    pub label: RiskLabel,
    pub severity: Severity,
    pub confidence: f64,
    pub note: &'static str,
}

#[derive(Debug, Clone)]
pub struct DrugRule {
    pub gene: Gene,
    pub risks: HashMap<Phenotype, RiskRule>,
}

fn rule(label: RiskLabel, severity: Severity, confidence: f64, note: &'static str) -> RiskRule {
    RiskRule {
        label,
        severity,
        confidence,
        note,
    }
}

fn alts(list: &'static [&'static str]) -> &'static [&'static str] {
    list
}

lazy_static! {
    /// rsID -> gene, used when a record carries no gene annotation
    pub static ref RSID_GENE: HashMap<&'static str, Gene> = {
        let mut m = HashMap::new();
        for (gene, rsid, _) in STAR_ALLELE_ROWS {
            m.insert(*rsid, *gene);
        }
        m
    };

    /// (gene, rsID) -> star allele carried by the variant allele
    pub static ref STAR_ALLELES: HashMap<(Gene, &'static str), &'static str> = STAR_ALLELE_ROWS
        .iter()
        .map(|(gene, rsid, star)| ((*gene, *rsid), *star))
        .collect();

    /// Per-gene diplotype -> phenotype. Pairs are unordered; lookups also try the reverse.
    pub static ref DIPLOTYPE_PHENOTYPE: HashMap<Gene, HashMap<&'static str, Phenotype>> = {
        use Phenotype::*;
        let mut m = HashMap::new();
        m.insert(
            Gene::Cyp2d6,
            HashMap::from([
                ("*1/*1", NM), ("*1/*2", NM), ("*2/*2", NM),
                ("*1/*4", IM), ("*1/*5", IM), ("*1/*6", IM),
                ("*4/*4", PM), ("*4/*5", PM), ("*5/*5", PM),
                ("*4/*6", PM), ("*3/*4", PM), ("*3/*5", PM),
                ("*3/*3", PM), ("*6/*6", PM),
                ("*1/*1xN", URM), ("*1xN/*1xN", URM),
                ("*1/*2xN", URM), ("*2xN/*2xN", URM),
                ("*10/*10", IM), ("*41/*41", IM),
                ("*1/*10", NM), ("*1/*41", IM), ("*2/*41", IM),
                ("*4/*41", PM), ("*4/*10", IM),
            ]),
        );
        m.insert(
            Gene::Cyp2c19,
            HashMap::from([
                ("*1/*1", NM), ("*1/*2", IM), ("*1/*3", IM),
                ("*2/*2", PM), ("*2/*3", PM), ("*3/*3", PM),
                ("*1/*17", RM), ("*17/*17", URM),
                ("*2/*17", IM), ("*3/*17", IM),
                ("*1/*4", IM), ("*4/*4", PM), ("*2/*4", PM),
                ("*1/*5", IM), ("*5/*5", PM),
            ]),
        );
        m.insert(
            Gene::Cyp2c9,
            HashMap::from([
                ("*1/*1", NM), ("*1/*2", IM), ("*1/*3", IM),
                ("*2/*2", IM), ("*2/*3", PM), ("*3/*3", PM),
                ("*1/*5", IM), ("*1/*6", IM),
                ("*5/*5", PM), ("*6/*6", PM),
            ]),
        );
        m.insert(
            Gene::Slco1b1,
            HashMap::from([
                ("*1/*1", NM), ("*1/*1b", NM), ("*1b/*1b", NM),
                ("*1/*5", IM), ("*1b/*5", IM), ("*1/*15", IM),
                ("*5/*5", PM), ("*15/*15", PM), ("*5/*15", PM),
            ]),
        );
        m.insert(
            Gene::Tpmt,
            HashMap::from([
                ("*1/*1", NM), ("*1/*2", IM), ("*1/*3A", IM),
                ("*1/*3B", IM), ("*1/*3C", IM), ("*1/*4", IM),
                ("*2/*3A", PM), ("*3A/*3A", PM), ("*3C/*3C", PM),
                ("*3B/*3B", PM), ("*3B/*3C", PM), ("*2/*2", PM),
            ]),
        );
        m.insert(
            Gene::Dpyd,
            HashMap::from([
                ("*1/*1", NM),
                ("*1/*2A", IM), ("*2A/*2A", PM),
                ("*1/*13", IM), ("*13/*13", PM), ("*2A/*13", PM),
                ("*1/HapB3", IM), ("HapB3/HapB3", PM),
                ("*1/c.2846A>T", IM), ("c.2846A>T/c.2846A>T", PM),
            ]),
        );
        m
    };

    /// Drug -> primary gene and phenotype -> risk rows. Every drug carries an Unknown row.
    pub static ref DRUG_RULES: HashMap<&'static str, DrugRule> = {
        use Phenotype::*;
        use RiskLabel::*;
        let mut m = HashMap::new();
        m.insert("CODEINE", DrugRule {
            gene: Gene::Cyp2d6,
            risks: HashMap::from([
                (PM, rule(Ineffective, Severity::Moderate, 0.92, "CYP2D6 poor metabolizers cannot convert codeine to morphine. Pain relief will be absent. Consider an alternative opioid.")),
                (IM, rule(AdjustDosage, Severity::Low, 0.85, "Reduced conversion to morphine. Lower efficacy expected. Monitor pain control closely.")),
                (NM, rule(Safe, Severity::None, 0.95, "Normal codeine metabolism expected. Standard dosing appropriate.")),
                (RM, rule(AdjustDosage, Severity::Moderate, 0.88, "Higher than normal morphine levels possible. Monitor for side effects.")),
                (URM, rule(Toxic, Severity::Critical, 0.97, "Ultrarapid metabolizers convert codeine to morphine dangerously fast. Risk of respiratory depression and death. Contraindicated.")),
                (Phenotype::Unknown, rule(RiskLabel::Unknown, Severity::Low, 0.50, "Insufficient variant data. Genetic testing recommended before prescribing.")),
            ]),
        });
        m.insert("WARFARIN", DrugRule {
            gene: Gene::Cyp2c9,
            risks: HashMap::from([
                (NM, rule(Safe, Severity::None, 0.93, "Normal warfarin metabolism. Standard dosing per INR monitoring.")),
                (IM, rule(AdjustDosage, Severity::Moderate, 0.91, "Reduced warfarin metabolism. Start with a 25-50% lower dose. Frequent INR monitoring required.")),
                (PM, rule(AdjustDosage, Severity::High, 0.95, "Severely reduced metabolism. Very high bleeding risk at standard doses. Start with a 50-75% dose reduction.")),
                (Phenotype::Unknown, rule(RiskLabel::Unknown, Severity::Low, 0.50, "Phenotype unknown. Use standard clinical monitoring protocols.")),
            ]),
        });
        m.insert("CLOPIDOGREL", DrugRule {
            gene: Gene::Cyp2c19,
            risks: HashMap::from([
                (PM, rule(Ineffective, Severity::High, 0.94, "Poor metabolizers cannot activate clopidogrel. Platelet inhibition severely reduced. High risk of cardiovascular events. Use prasugrel or ticagrelor.")),
                (IM, rule(AdjustDosage, Severity::Moderate, 0.87, "Reduced activation. Suboptimal platelet inhibition. Consider alternative antiplatelet therapy.")),
                (NM, rule(Safe, Severity::None, 0.95, "Normal activation of clopidogrel. Standard dosing appropriate.")),
                (RM, rule(Safe, Severity::None, 0.90, "Slightly enhanced activation. Standard dosing appropriate.")),
                (URM, rule(AdjustDosage, Severity::Low, 0.82, "Possibly enhanced activation. Monitor for bleeding risk.")),
                (Phenotype::Unknown, rule(RiskLabel::Unknown, Severity::Low, 0.50, "Phenotype unknown. Genetic testing recommended for high-risk patients.")),
            ]),
        });
        m.insert("SIMVASTATIN", DrugRule {
            gene: Gene::Slco1b1,
            risks: HashMap::from([
                (NM, rule(Safe, Severity::None, 0.93, "Normal hepatic uptake of simvastatin. Standard dosing appropriate.")),
                (IM, rule(AdjustDosage, Severity::Moderate, 0.90, "Reduced hepatic uptake leads to higher plasma simvastatin. Increased myopathy risk. Limit dose to 20mg or consider an alternative statin.")),
                (PM, rule(Toxic, Severity::High, 0.95, "Severely impaired hepatic uptake. Very high risk of myopathy and rhabdomyolysis. Avoid simvastatin.")),
                (Phenotype::Unknown, rule(RiskLabel::Unknown, Severity::Low, 0.50, "Phenotype unknown. Monitor for muscle pain and weakness.")),
            ]),
        });
        m.insert("AZATHIOPRINE", DrugRule {
            gene: Gene::Tpmt,
            risks: HashMap::from([
                (NM, rule(Safe, Severity::None, 0.94, "Normal TPMT activity. Standard azathioprine dosing appropriate.")),
                (IM, rule(AdjustDosage, Severity::Moderate, 0.91, "Reduced TPMT activity. Start at 30-70% of the standard dose. Monitor for myelosuppression.")),
                (PM, rule(Toxic, Severity::Critical, 0.97, "Absent TPMT activity. Standard doses cause life-threatening myelosuppression.")),
                (Phenotype::Unknown, rule(RiskLabel::Unknown, Severity::Low, 0.50, "Phenotype unknown. TPMT testing strongly recommended before initiating therapy.")),
            ]),
        });
        m.insert("FLUOROURACIL", DrugRule {
            gene: Gene::Dpyd,
            risks: HashMap::from([
                (NM, rule(Safe, Severity::None, 0.93, "Normal DPD activity. Standard fluorouracil dosing appropriate.")),
                (IM, rule(AdjustDosage, Severity::High, 0.92, "Reduced DPD activity. Start at a 50% dose reduction and titrate based on toxicity.")),
                (PM, rule(Toxic, Severity::Critical, 0.98, "Absent DPD activity. Standard doses cause severe, potentially fatal toxicity. Fluorouracil is contraindicated.")),
                (Phenotype::Unknown, rule(RiskLabel::Unknown, Severity::Low, 0.50, "Phenotype unknown. DPYD genotyping strongly recommended before fluoropyrimidine chemotherapy.")),
            ]),
        });
        m
    };

    static ref CPIC_RECOMMENDATIONS: HashMap<(&'static str, Phenotype), &'static str> = {
        use Phenotype::*;
        HashMap::from([
            (("CODEINE", PM), "Avoid codeine. Use non-opioid analgesics or opioids not metabolized by CYP2D6 (e.g. morphine, hydromorphone)."),
            (("CODEINE", IM), "Use codeine with caution. Consider a lower starting dose. Monitor for inadequate analgesia."),
            (("CODEINE", NM), "Use label-recommended dosing."),
            (("CODEINE", RM), "Use label-recommended dosing. Monitor for opioid side effects."),
            (("CODEINE", URM), "Avoid codeine. Life-threatening respiratory depression risk. Use a non-opioid or alternative opioid."),
            (("WARFARIN", NM), "Use the standard CPIC dosing algorithm. Target INR 2.0-3.0."),
            (("WARFARIN", IM), "Initiate at a 25-50% lower dose. Increase INR monitoring frequency."),
            (("WARFARIN", PM), "Initiate at a 50-75% lower dose. Very frequent INR monitoring. Consider hematology consult."),
            (("CLOPIDOGREL", PM), "Use an alternative antiplatelet: prasugrel (if no contraindication) or ticagrelor."),
            (("CLOPIDOGREL", IM), "Consider alternative antiplatelet therapy, especially for high-risk ACS/PCI patients."),
            (("CLOPIDOGREL", NM), "Use label-recommended dosing (75mg/day maintenance)."),
            (("CLOPIDOGREL", RM), "Use label-recommended dosing."),
            (("CLOPIDOGREL", URM), "Use label-recommended dosing. Monitor for bleeding."),
            (("SIMVASTATIN", NM), "Use label-recommended dosing. Max 40mg/day."),
            (("SIMVASTATIN", IM), "Limit dose to 20mg/day. Consider switching to pravastatin, rosuvastatin or fluvastatin."),
            (("SIMVASTATIN", PM), "Avoid simvastatin. Use pravastatin 40mg or rosuvastatin 20mg."),
            (("AZATHIOPRINE", NM), "Use standard dosing (2-3 mg/kg/day). Monitor CBC monthly."),
            (("AZATHIOPRINE", IM), "Reduce dose by 30-70%. Monitor CBC every 2 weeks for the first 3 months."),
            (("AZATHIOPRINE", PM), "Reduce dose by 90% or use an alternative. Weekly CBC monitoring mandatory."),
            (("FLUOROURACIL", NM), "Use label-recommended dosing."),
            (("FLUOROURACIL", IM), "Reduce starting dose by 50%. Escalate based on tolerance."),
            (("FLUOROURACIL", PM), "Avoid fluorouracil and capecitabine. Use an alternative chemotherapy regimen."),
        ])
    };

    static ref ALTERNATIVE_DRUGS: HashMap<(&'static str, Phenotype), &'static [&'static str]> = {
        use Phenotype::*;
        HashMap::from([
            (("CODEINE", PM), alts(&["Morphine", "Hydromorphone", "Oxycodone", "Acetaminophen"])),
            (("CODEINE", URM), alts(&["Morphine", "Hydromorphone", "Non-opioid analgesics"])),
            (("CLOPIDOGREL", PM), alts(&["Prasugrel", "Ticagrelor"])),
            (("CLOPIDOGREL", IM), alts(&["Prasugrel", "Ticagrelor"])),
            (("SIMVASTATIN", PM), alts(&["Pravastatin", "Rosuvastatin", "Fluvastatin"])),
            (("SIMVASTATIN", IM), alts(&["Pravastatin 40mg", "Rosuvastatin 20mg"])),
            (("AZATHIOPRINE", PM), alts(&["Mycophenolate mofetil", "Cyclosporine"])),
            (("FLUOROURACIL", PM), alts(&["Gemcitabine", "Oxaliplatin-based regimens"])),
            (("FLUOROURACIL", IM), alts(&["Reduced dose fluorouracil", "Capecitabine with dose reduction"])),
        ])
    };

    static ref MONITORING: HashMap<&'static str, &'static str> = HashMap::from([
        ("WARFARIN", "INR monitoring every 3-5 days until stable, then monthly"),
        ("AZATHIOPRINE", "CBC with differential every 1-2 weeks for the first 3 months"),
        ("SIMVASTATIN", "CK levels at baseline and if muscle symptoms develop"),
        ("FLUOROURACIL", "CBC before each cycle; monitor for mucositis, diarrhea and hand-foot syndrome"),
        ("CLOPIDOGREL", "Platelet function testing if available; monitor for ischemic events"),
        ("CODEINE", "Pain scores, respiratory rate, sedation levels"),
    ]);
}

const STAR_ALLELE_ROWS: &[(Gene, &str, &str)] = &[
    (Gene::Cyp2d6, "rs3892097", "*4"),
    (Gene::Cyp2d6, "rs5030655", "*6"),
    (Gene::Cyp2d6, "rs35742686", "*3"),
    (Gene::Cyp2d6, "rs1065852", "*10"),
    (Gene::Cyp2d6, "rs28371725", "*41"),
    (Gene::Cyp2d6, "rs16947", "*2"),
    (Gene::Cyp2c19, "rs4244285", "*2"),
    (Gene::Cyp2c19, "rs4986893", "*3"),
    (Gene::Cyp2c19, "rs28399504", "*4"),
    (Gene::Cyp2c19, "rs56337013", "*5"),
    (Gene::Cyp2c19, "rs12248560", "*17"),
    (Gene::Cyp2c9, "rs1799853", "*2"),
    (Gene::Cyp2c9, "rs1057910", "*3"),
    (Gene::Cyp2c9, "rs28371686", "*5"),
    (Gene::Cyp2c9, "rs9332131", "*6"),
    (Gene::Slco1b1, "rs4149056", "*5"),
    (Gene::Slco1b1, "rs2306283", "*1b"),
    (Gene::Slco1b1, "rs11045819", "*15"),
    (Gene::Tpmt, "rs1800462", "*2"),
    (Gene::Tpmt, "rs1800460", "*3B"),
    (Gene::Tpmt, "rs1142345", "*3C"),
    (Gene::Tpmt, "rs1800584", "*4"),
    (Gene::Dpyd, "rs3918290", "*2A"),
    (Gene::Dpyd, "rs55886062", "*13"),
    (Gene::Dpyd, "rs67376798", "c.2846A>T"),
    (Gene::Dpyd, "rs75017182", "HapB3"),
];

/// Drugs with a risk table, in display order
pub fn supported_drugs() -> Vec<&'static str> {
    let mut drugs: Vec<_> = DRUG_RULES.keys().copied().collect();
    drugs.sort_unstable();
    drugs
}

// Canonical 'static spelling of a drug name, so tuple keys can be looked up
fn canonical_drug(drug: &str) -> Option<&'static str> {
    DRUG_RULES.get_key_value(drug).map(|(name, _)| *name)
}

/// Star allele carried by the variant allele of `rsid` on `gene`
pub fn star_allele(gene: Gene, rsid: &str) -> Option<&'static str> {
    RSID_GENE
        .get_key_value(rsid)
        .and_then(|(rsid, _)| STAR_ALLELES.get(&(gene, *rsid)))
        .copied()
}

pub fn cpic_recommendation(drug: &str, phenotype: Phenotype) -> &'static str {
    canonical_drug(drug)
        .and_then(|drug| CPIC_RECOMMENDATIONS.get(&(drug, phenotype)))
        .copied()
        .unwrap_or(DEFAULT_RECOMMENDATION)
}

pub fn alternative_drugs(drug: &str, phenotype: Phenotype) -> &'static [&'static str] {
    canonical_drug(drug)
        .and_then(|drug| ALTERNATIVE_DRUGS.get(&(drug, phenotype)))
        .copied()
        .unwrap_or(&[])
}

pub fn monitoring(drug: &str) -> &'static str {
    MONITORING.get(drug).copied().unwrap_or(DEFAULT_MONITORING)
}

/// Short description of what the gene product does, used by the templates
pub fn gene_function(gene: Gene) -> &'static str {
    match gene {
        Gene::Cyp2d6 => "CYP2D6 is the hepatic enzyme that converts codeine into its active metabolite morphine",
        Gene::Cyp2c19 => "CYP2C19 is the hepatic enzyme that bioactivates the clopidogrel prodrug",
        Gene::Cyp2c9 => "CYP2C9 is the main enzyme clearing the more potent S-enantiomer of warfarin",
        Gene::Slco1b1 => "SLCO1B1 encodes the OATP1B1 transporter that carries simvastatin acid into hepatocytes",
        Gene::Tpmt => "TPMT inactivates thiopurines such as azathioprine before they accumulate as cytotoxic nucleotides",
        Gene::Dpyd => "DPYD encodes dihydropyrimidine dehydrogenase, which clears most of an administered fluorouracil dose",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_drug_has_an_unknown_row_and_valid_confidence() {
        for (drug, rule) in DRUG_RULES.iter() {
            assert!(
                rule.risks.contains_key(&Phenotype::Unknown),
                "{} has no Unknown row",
                drug
            );
            for risk in rule.risks.values() {
                assert!((0.0..=1.0).contains(&risk.confidence));
            }
        }
    }

    #[test]
    fn every_drug_covers_its_gene_phenotypes() {
        for (drug, rule) in DRUG_RULES.iter() {
            for phenotype in rule.gene.phenotypes() {
                assert!(
                    rule.risks.contains_key(phenotype),
                    "{} lacks a row for {}",
                    drug,
                    phenotype
                );
            }
        }
    }

    #[test]
    fn rsid_tables_agree() {
        for ((gene, rsid), _) in STAR_ALLELES.iter() {
            assert_eq!(RSID_GENE.get(rsid), Some(gene));
        }
    }
}
