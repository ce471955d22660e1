use flate2::write::GzEncoder;
use flate2::Compression;
use pgx_risk::error::GenerationError;
use pgx_risk::explain::{
    Explainer, ExplanationOrigin, ExplanationSections, ExplanationService, ExplanationTopic,
    NarrativeRequest, RetryPolicy, Sleeper, TemplateReason,
};
use pgx_risk::*;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::Builder;

const VCF: &str = "##fileformat=VCFv4.2
##source=integration
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tPATIENT_042
chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t0/1
chr10\t94780653\trs4986893\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t1/0
chr22\t42130692\trs3892097\tC\tT\t.\tPASS\t.\tGT\t0/1
chr1\tnot_a_position\trs1\tA\tT\t.\tPASS\t.\tGT\t0/1
";

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

/// Always rate limited
struct ThrottledService {
    calls: AtomicUsize,
}

impl ExplanationService for ThrottledService {
    fn generate(&self, _topic: &ExplanationTopic) -> Result<ExplanationSections, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GenerationError::RateLimited)
    }

    fn narrate(&self, _request: &NarrativeRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GenerationError::RateLimited)
    }
}

#[test]
fn test_reads_plain_and_gzipped_files() {
    let mut plain = Builder::new().suffix(".vcf").tempfile().unwrap();
    plain.write_all(VCF.as_bytes()).unwrap();

    let gz = Builder::new().suffix(".vcf.gz").tempfile().unwrap();
    let mut encoder = GzEncoder::new(gz.reopen().unwrap(), Compression::default());
    encoder.write_all(VCF.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let reader = VcfReader::new();
    let a = reader.read_path(plain.path()).unwrap();
    let b = reader.read_path(gz.path()).unwrap();

    assert_eq!(a.calls.len(), 3);
    assert_eq!(a.calls, b.calls);
    assert_eq!(a.diagnostics.len(), 1);
    assert_eq!(b.sample_id.as_deref(), Some("PATIENT_042"));
}

#[test]
fn test_end_to_end_offline_report() {
    let variants = VcfReader::new().read_str(VCF, "patient.vcf").unwrap();
    let report = Evaluator::offline()
        .evaluate(&variants, &["clopidogrel", "codeine"])
        .unwrap();

    assert_eq!(report.patient_id, "PATIENT_042");
    let clopidogrel = report.drug("CLOPIDOGREL").unwrap();
    assert_eq!(clopidogrel.risk_assessment.phenotype, Phenotype::PM);
    assert_eq!(clopidogrel.risk_assessment.risk_label, RiskLabel::Ineffective);
    assert_eq!(clopidogrel.risk_assessment.severity, Severity::High);
    assert_eq!(clopidogrel.profile.as_ref().unwrap().diplotype, "*2/*3");

    // gene inferred from the rsID table lowers confidence
    let codeine = report.drug("CODEINE").unwrap();
    assert_eq!(codeine.risk_assessment.phenotype, Phenotype::IM);
    assert!(codeine.risk_assessment.confidence < 0.85);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["drugs"][0]["risk_assessment"]["risk_label"], "Ineffective");
    assert_eq!(json["drugs"][1]["risk_assessment"]["risk_label"], "Adjust Dosage");
    assert_eq!(json["parse"]["diagnostics"].as_array().unwrap().len(), 1);
}

#[test]
fn test_rate_limit_exhaustion_degrades_whole_run() {
    let service = Arc::new(ThrottledService {
        calls: AtomicUsize::new(0),
    });
    let explainer = Explainer::new(
        Some(Arc::clone(&service) as Arc<dyn ExplanationService>),
        RetryPolicy::default(),
    )
    .with_sleeper(Arc::new(NoSleep));
    // a single worker makes the order of external calls deterministic
    let evaluator = Evaluator::new(Arc::new(explainer), BatchRunner::new(1));

    let variants = VcfReader::new().read_str(VCF, "patient.vcf").unwrap();
    let report = evaluator
        .evaluate(&variants, &["CODEINE", "WARFARIN", "CLOPIDOGREL"])
        .unwrap();

    // first key exhausts the first call and all three retries, everything after is skipped
    assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        report.drugs[0].explanation.origin,
        ExplanationOrigin::Template(TemplateReason::Exhausted)
    );
    for drug in &report.drugs[1..] {
        assert_eq!(
            drug.explanation.origin,
            ExplanationOrigin::Template(TemplateReason::RateLimitSkipped)
        );
    }
    assert_eq!(
        report.narrative.origin,
        ExplanationOrigin::Template(TemplateReason::RateLimitSkipped)
    );
    assert!(report.drugs.iter().all(|d| !d.quality.explanation_generated));
}

fn single_call_vcf(patient: &str, rsid: &str, pos: u64) -> String {
    format!(
        "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}\n\
         chr10\t{}\t{}\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t1/1\n",
        patient, pos, rsid
    )
}

#[test]
fn test_patients_in_one_run_keep_their_own_evidence() {
    let explainer = Arc::new(Explainer::new(None, RetryPolicy::default()));
    let evaluator = Evaluator::new(Arc::clone(&explainer), BatchRunner::new(2));
    let signal = explainer.begin_run();

    let a = VcfReader::new()
        .read_str(&single_call_vcf("PAT_A", "rs4244285", 94781859), "a.vcf")
        .unwrap();
    let b = VcfReader::new()
        .read_str(&single_call_vcf("PAT_B", "rs4986893", 94780653), "b.vcf")
        .unwrap();
    let report_a = evaluator
        .evaluate_in_run(&a, &["CLOPIDOGREL"], Arc::clone(&signal))
        .unwrap();
    let report_b = evaluator
        .evaluate_in_run(&b, &["CLOPIDOGREL"], Arc::clone(&signal))
        .unwrap();

    let drug_a = report_a.drug("CLOPIDOGREL").unwrap();
    let drug_b = report_b.drug("CLOPIDOGREL").unwrap();
    assert_eq!(drug_a.risk_assessment.phenotype, drug_b.risk_assessment.phenotype);
    assert_eq!(drug_a.explanation.cited_variants, vec!["rs4244285"]);
    assert_eq!(drug_b.explanation.cited_variants, vec!["rs4986893"]);
    for text in drug_b.explanation.sections.iter() {
        assert!(!text.contains("rs4244285"), "leaked citation in {:?}", text);
    }

    assert!(report_b.narrative.text.contains("PAT_B"));
    assert!(!report_b.narrative.text.contains("PAT_A"));
    assert!(!report_b.narrative.text.contains("rs4244285"));
}

#[test]
fn test_config_drives_batch_runner() {
    let config = Config::from_toml("[batch]\nmax_workers = 1\n[service]\noffline = true\n").unwrap();
    let runner = BatchRunner::new(config.worker_cap()).with_deadline(config.deadline());
    assert_eq!(runner.pool_size(6), 1);
}
