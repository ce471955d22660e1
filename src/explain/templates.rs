//! Static explanation text, used whenever the external service is skipped or fails.
//! Every section names the variant identifiers behind the call.

use super::{ExplanationRequest, ExplanationSections, NarrativeRequest};
use crate::tables;
use crate::types::{Gene, Phenotype, RiskLabel};

fn cite(variant_ids: &[String]) -> String {
    if variant_ids.is_empty() {
        "no variant alleles detected, reference alleles assumed".to_string()
    } else {
        variant_ids.join(", ")
    }
}

fn activity(phenotype: Phenotype) -> &'static str {
    match phenotype {
        Phenotype::PM => "little or no functional activity",
        Phenotype::IM => "reduced activity",
        Phenotype::NM => "normal activity",
        Phenotype::RM => "somewhat increased activity",
        Phenotype::URM => "markedly increased activity",
        Phenotype::Unknown => "activity that cannot be determined from the observed alleles",
    }
}

fn consequence(label: RiskLabel) -> &'static str {
    match label {
        RiskLabel::Safe => "standard dosing is expected to be effective and tolerated",
        RiskLabel::AdjustDosage => "exposure is likely to differ from typical patients, so the dose needs adjusting",
        RiskLabel::Toxic => "drug or metabolite exposure may reach harmful levels",
        RiskLabel::Ineffective => "the drug is unlikely to reach its therapeutic effect",
        RiskLabel::Unknown => "the expected response cannot be predicted from genotype alone",
    }
}

pub fn explanation(request: &ExplanationRequest) -> ExplanationSections {
    let gene = request.gene;
    let label = request.phenotype.label_for(gene);
    let cited = cite(&request.variant_ids);

    ExplanationSections {
        summary: format!(
            "{} diplotype {} indicates a {} ({}). For {} the predicted risk is {} with {} severity: {}. Evidence: {}.",
            gene,
            request.diplotype,
            label,
            request.phenotype,
            request.drug,
            request.risk_label,
            request.severity,
            consequence(request.risk_label),
            cited
        ),
        biological_mechanism: format!(
            "{}. A {} has {} of this gene product, inferred from {}.",
            tables::gene_function(gene),
            label,
            activity(request.phenotype),
            cited
        ),
        variant_significance: format!(
            "The {} diplotype was assembled from {}. Each star allele is assigned from curated allele definitions, and the pair maps to the {} category.",
            request.diplotype, cited, request.phenotype
        ),
        clinical_implications: format!(
            "{} Monitoring: {}. Based on {}.",
            tables::cpic_recommendation(&request.drug, request.phenotype),
            tables::monitoring(&request.drug),
            cited
        ),
    }
}

/// Generated text is phenotype-generic; attach this patient's diplotype and citations
pub fn with_evidence(generic: &ExplanationSections, request: &ExplanationRequest) -> ExplanationSections {
    let evidence = format!(
        "Patient {} diplotype {}, based on {}.",
        request.gene,
        request.diplotype,
        cite(&request.variant_ids)
    );
    let attach = |text: &str| {
        let text = text.trim();
        if text.is_empty() {
            evidence.clone()
        } else {
            format!("{} {}", text, evidence)
        }
    };

    ExplanationSections {
        summary: attach(&generic.summary),
        biological_mechanism: attach(&generic.biological_mechanism),
        variant_significance: attach(&generic.variant_significance),
        clinical_implications: attach(&generic.clinical_implications),
    }
}

pub fn narrative(request: &NarrativeRequest) -> String {
    let mut text = format!(
        "Pharmacogenomic summary for {} covering {} medication(s).",
        request.patient_id,
        request.entries.len()
    );

    let flagged: Vec<&ExplanationRequest> = request
        .entries
        .iter()
        .filter(|e| e.risk_label != RiskLabel::Safe)
        .collect();

    if flagged.is_empty() {
        text.push_str(" No genotype-guided changes are indicated; standard dosing applies to every assessed drug.");
    } else {
        for entry in flagged {
            text.push_str(&format!(
                " {}: {} ({} {}, {} severity) based on {}.",
                entry.drug,
                entry.risk_label,
                entry.gene,
                entry.phenotype,
                entry.severity,
                cite(&entry.variant_ids)
            ));
        }
    }

    if !request.interaction_alerts.is_empty() {
        text.push_str(&format!(
            " {} drug interaction alert(s) also apply: {}",
            request.interaction_alerts.len(),
            request.interaction_alerts.join(" ")
        ));
    }

    text
}

/// Text for a unit that produced no classification
pub fn degraded(drug: &str, gene: Option<Gene>, reason: &str, variant_ids: &[String]) -> ExplanationSections {
    let cited = cite(variant_ids);
    let gene_text = gene
        .map(|g| tables::gene_function(g).to_string())
        .unwrap_or_else(|| format!("No pharmacogene is associated with {} in the supported panel", drug));

    ExplanationSections {
        summary: format!(
            "No genotype-guided risk could be determined for {} ({}). Evidence considered: {}.",
            drug, reason, cited
        ),
        biological_mechanism: format!("{}. Evidence considered: {}.", gene_text, cited),
        variant_significance: format!(
            "The variants ({}) were not interpreted for {} because evaluation did not complete.",
            cited, drug
        ),
        clinical_implications: format!(
            "{} Evidence considered: {}.",
            tables::DEFAULT_RECOMMENDATION,
            cited
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn request(ids: &[&str]) -> ExplanationRequest {
        ExplanationRequest {
            drug: "CLOPIDOGREL".to_string(),
            gene: Gene::Cyp2c19,
            diplotype: "*2/*3".to_string(),
            phenotype: Phenotype::PM,
            risk_label: RiskLabel::Ineffective,
            severity: Severity::High,
            variant_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_every_section_cites_variants() {
        let sections = explanation(&request(&["rs4244285", "rs4986893"]));
        for text in sections.iter() {
            assert!(text.contains("rs4244285"), "missing citation in {:?}", text);
            assert!(text.contains("rs4986893"));
        }
    }

    #[test]
    fn test_template_is_deterministic() {
        let a = explanation(&request(&["rs4244285"]));
        let b = explanation(&request(&["rs4244285"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_wildtype_template_states_reference() {
        let sections = explanation(&request(&[]));
        assert!(sections.summary.contains("reference alleles assumed"));
    }

    #[test]
    fn test_generated_text_gets_callers_evidence() {
        let generic = ExplanationSections {
            summary: "Poor metabolizers cannot activate clopidogrel.".to_string(),
            ..Default::default()
        };
        let sections = with_evidence(&generic, &request(&["rs4986893"]));
        assert!(sections.summary.starts_with("Poor metabolizers"));
        for text in sections.iter() {
            assert!(text.contains("*2/*3"));
            assert!(text.contains("rs4986893"));
        }
    }

    #[test]
    fn test_degraded_template_names_drug() {
        let sections = degraded("ASPIRIN", None, "unsupported drug", &[]);
        assert!(sections.summary.contains("ASPIRIN"));
        assert!(sections.biological_mechanism.contains("supported panel"));
    }

    #[test]
    fn test_narrative_lists_flagged_drugs() {
        let narrative_request = NarrativeRequest {
            patient_id: "PATIENT_001".to_string(),
            entries: vec![request(&["rs4244285"])],
            interaction_alerts: vec![],
        };
        let text = narrative(&narrative_request);
        assert!(text.contains("PATIENT_001"));
        assert!(text.contains("CLOPIDOGREL: Ineffective"));
        assert!(text.contains("rs4244285"));
    }
}
