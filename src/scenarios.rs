//! Built-in patient scenarios, runnable as one batch.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::batch::{BatchRunner, UnitOutcome};
use crate::error::{BatchError, UnitError};
use crate::parsers::VcfReader;
use crate::pipeline::{Evaluator, PatientReport};
use crate::types::RiskLabel;

const VCF_HEADER: &str = "##fileformat=VCFv4.2\n##source=pgx-risk\n##reference=GRCh38\n\
##INFO=<ID=GENE,Number=1,Type=String,Description=\"Gene symbol\">\n\
##INFO=<ID=STAR,Number=1,Type=String,Description=\"Star allele\">\n\
##INFO=<ID=CN,Number=1,Type=Integer,Description=\"Copy number\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n";

const ALL_DRUGS: &[&str] = &[
    "CODEINE",
    "WARFARIN",
    "CLOPIDOGREL",
    "SIMVASTATIN",
    "AZATHIOPRINE",
    "FLUOROURACIL",
];

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub sample: &'static str,
    pub records: &'static str,
    pub drugs: &'static [&'static str],
    pub expected: &'static [(&'static str, RiskLabel)],
}

impl Scenario {
    pub fn vcf(&self) -> String {
        format!(
            "{}#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}\n{}",
            VCF_HEADER, self.sample, self.records
        )
    }

    /// Drugs whose label differs from the expected one
    pub fn mismatches(&self, report: &PatientReport) -> Vec<String> {
        self.expected
            .iter()
            .filter_map(|(drug, expected)| {
                let actual = report.drug(drug).map(|d| d.risk_assessment.risk_label);
                match actual {
                    Some(label) if label == *expected => None,
                    Some(label) => Some(format!("{}: expected {}, got {}", drug, expected, label)),
                    None => Some(format!("{}: missing from report", drug)),
                }
            })
            .collect()
    }
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "wildtype",
        description: "No variant alleles on any panel gene",
        sample: "WILDTYPE_001",
        records: "chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t0/0\n",
        drugs: ALL_DRUGS,
        expected: &[
            ("CODEINE", RiskLabel::Safe),
            ("WARFARIN", RiskLabel::Safe),
            ("CLOPIDOGREL", RiskLabel::Safe),
            ("SIMVASTATIN", RiskLabel::Safe),
            ("AZATHIOPRINE", RiskLabel::Safe),
            ("FLUOROURACIL", RiskLabel::Safe),
        ],
    },
    Scenario {
        name: "loss-of-function",
        description: "Homozygous no-function alleles on all six genes",
        sample: "LOF_002",
        records: "chr22\t42130692\trs3892097\tC\tT\t.\tPASS\tGENE=CYP2D6;STAR=*4\tGT\t1/1\n\
chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19;STAR=*2\tGT\t1/1\n\
chr10\t94981296\trs1057910\tA\tC\t.\tPASS\tGENE=CYP2C9;STAR=*3\tGT\t1/1\n\
chr12\t21178615\trs4149056\tT\tC\t.\tPASS\tGENE=SLCO1B1;STAR=*5\tGT\t1/1\n\
chr6\t18130687\trs1142345\tT\tC\t.\tPASS\tGENE=TPMT;STAR=*3C\tGT\t1/1\n\
chr1\t97450058\trs3918290\tC\tT\t.\tPASS\tGENE=DPYD;STAR=*2A\tGT\t1/1\n",
        drugs: ALL_DRUGS,
        expected: &[
            ("CODEINE", RiskLabel::Ineffective),
            ("WARFARIN", RiskLabel::AdjustDosage),
            ("CLOPIDOGREL", RiskLabel::Ineffective),
            ("SIMVASTATIN", RiskLabel::Toxic),
            ("AZATHIOPRINE", RiskLabel::Toxic),
            ("FLUOROURACIL", RiskLabel::Toxic),
        ],
    },
    Scenario {
        name: "clopidogrel-poor-metabolizer",
        description: "CYP2C19 *2/*3 compound heterozygote",
        sample: "CYP2C19_003",
        records: "chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t0/1\n\
chr10\t94780653\trs4986893\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t0/1\n",
        drugs: &["CLOPIDOGREL"],
        expected: &[("CLOPIDOGREL", RiskLabel::Ineffective)],
    },
    Scenario {
        name: "codeine-ultrarapid",
        description: "CYP2D6 *1 duplication on both copies",
        sample: "CYP2D6_004",
        records: "chr22\t42126611\t.\tG\tG\t.\tPASS\tGENE=CYP2D6;STAR=*1;CN=4\tGT\t1/1\n",
        drugs: &["CODEINE"],
        expected: &[("CODEINE", RiskLabel::Toxic)],
    },
    Scenario {
        name: "fluoxetine-phenocopy",
        description: "Normal CYP2D6 genotype with a strong CYP2D6 inhibitor co-prescribed",
        sample: "PHENOCOPY_005",
        records: "",
        drugs: &["CODEINE", "FLUOXETINE"],
        expected: &[("CODEINE", RiskLabel::AdjustDosage)],
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub outcome: UnitOutcome<PatientReport>,
    pub mismatches: Vec<String>,
}

/// Run scenarios as one batch run sharing a single rate-limit signal
pub fn run_scenarios(
    evaluator: Arc<Evaluator>,
    scenarios: Vec<Scenario>,
    runner: &BatchRunner,
) -> Result<Vec<ScenarioResult>, BatchError> {
    let signal = evaluator.explainer().begin_run();
    info!("Running {} scenarios", scenarios.len());

    let outcomes = runner.run(scenarios.clone(), move |_, scenario| {
        let variants = VcfReader::new()
            .read_str(&scenario.vcf(), scenario.name)
            .map_err(|e| UnitError::Evaluation(e.to_string()))?;
        evaluator
            .evaluate_in_run(&variants, scenario.drugs, Arc::clone(&signal))
            .map_err(|e| UnitError::Evaluation(e.to_string()))
    })?;

    Ok(scenarios
        .into_iter()
        .zip(outcomes)
        .map(|(scenario, outcome)| ScenarioResult {
            name: scenario.name,
            mismatches: outcome
                .completed()
                .map(|report| scenario.mismatches(report))
                .unwrap_or_default(),
            outcome,
        })
        .collect())
}
