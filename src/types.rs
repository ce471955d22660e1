use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Pharmacogenes covered by the rule tables
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Gene {
    #[serde(rename = "CYP2D6")]
    Cyp2d6,
    #[serde(rename = "CYP2C19")]
    Cyp2c19,
    #[serde(rename = "CYP2C9")]
    Cyp2c9,
    #[serde(rename = "SLCO1B1")]
    Slco1b1,
    #[serde(rename = "TPMT")]
    Tpmt,
    #[serde(rename = "DPYD")]
    Dpyd,
}

impl Gene {
    pub const ALL: [Gene; 6] = [
        Gene::Cyp2d6,
        Gene::Cyp2c19,
        Gene::Cyp2c9,
        Gene::Slco1b1,
        Gene::Tpmt,
        Gene::Dpyd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gene::Cyp2d6 => "CYP2D6",
            Gene::Cyp2c19 => "CYP2C19",
            Gene::Cyp2c9 => "CYP2C9",
            Gene::Slco1b1 => "SLCO1B1",
            Gene::Tpmt => "TPMT",
            Gene::Dpyd => "DPYD",
        }
    }

    /// Case-insensitive lookup of a gene symbol; `None` for genes outside the panel
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let symbol = symbol.trim();
        Gene::ALL
            .iter()
            .copied()
            .find(|gene| gene.as_str().eq_ignore_ascii_case(symbol))
    }

    pub fn reference_allele(&self) -> StarAllele {
        StarAllele::new("*1")
    }

    /// Phenotype categories the diplotype table for this gene can produce
    pub fn phenotypes(&self) -> &'static [Phenotype] {
        use Phenotype::*;
        match self {
            Gene::Cyp2d6 => &[PM, IM, NM, URM],
            Gene::Cyp2c19 => &[PM, IM, NM, RM, URM],
            Gene::Cyp2c9 | Gene::Slco1b1 | Gene::Tpmt | Gene::Dpyd => &[PM, IM, NM],
        }
    }
}

impl fmt::Display for Gene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zygosity of a single genotype call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Zygosity {
    HomRef, // 0/0
    Het,    // 0/1, 1/0
    HomAlt, // 1/1
}

impl Zygosity {
    /// Number of variant allele copies carried by the call
    pub fn variant_copies(&self) -> usize {
        match self {
            Zygosity::HomRef => 0,
            Zygosity::Het => 1,
            Zygosity::HomAlt => 2,
        }
    }
}

/// How the gene of a call was established
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeneSource {
    /// Explicit gene annotation on the record
    Tagged,
    /// Looked up from the identifier table
    Inferred,
}

/// Positional metadata carried through from the record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locus {
    pub chromosome: String,
    pub position: u64,
    pub reference: String,
    pub alternate: String,
}

/// A single genotype call on a panel gene. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantCall {
    pub id: String,
    pub gene: Gene,
    pub zygosity: Zygosity,
    pub gene_source: GeneSource,
    /// Star allele annotation from the record, if any
    pub star: Option<String>,
    /// Explicit copy-number gain evidence on the record
    pub duplication: bool,
    pub functional_status: Option<String>,
    pub locus: Option<Locus>,
}

/// Named haplotype designation, optionally duplicated (`xN`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarAllele {
    pub name: String,
    pub duplicated: bool,
}

impl StarAllele {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duplicated: false,
        }
    }

    pub fn with_duplication(mut self, duplicated: bool) -> Self {
        self.duplicated = duplicated;
        self
    }

    /// Parse a token such as `*4`, `*2xN` or `HapB3`
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        match token.strip_suffix("xN") {
            Some(base) if !base.is_empty() => Some(StarAllele::new(base).with_duplication(true)),
            _ => Some(StarAllele::new(token)),
        }
    }

    // Star alleles first, numeric part compared as a number, then suffix
    fn sort_key(&self) -> (u8, u64, &str, &str, bool) {
        match self.name.strip_prefix('*') {
            Some(rest) => {
                let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
                let number = rest[..digits].parse().unwrap_or(u64::MAX);
                (0, number, &rest[digits..], self.name.as_str(), self.duplicated)
            }
            None => (1, 0, self.name.as_str(), self.name.as_str(), self.duplicated),
        }
    }
}

impl Ord for StarAllele {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for StarAllele {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StarAllele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.duplicated {
            write!(f, "{}xN", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Exactly two allele tokens, stored in allele order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diplotype {
    first: StarAllele,
    second: StarAllele,
}

impl Diplotype {
    pub fn new(a: StarAllele, b: StarAllele) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn reference() -> Self {
        Self::new(StarAllele::new("*1"), StarAllele::new("*1"))
    }

    /// Parse `a/b`; anything that is not exactly two tokens is rejected
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('/');
        let a = StarAllele::parse(parts.next()?)?;
        let b = StarAllele::parse(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(a, b))
    }

    pub fn alleles(&self) -> (&StarAllele, &StarAllele) {
        (&self.first, &self.second)
    }

    /// The same pair written second-allele first
    pub fn reversed_string(&self) -> String {
        format!("{}/{}", self.second, self.first)
    }
}

impl fmt::Display for Diplotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

/// Per-gene allele accumulation, frozen once all calls for the gene are consumed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneProfile {
    pub gene: Gene,
    /// Accumulated variant allele observations, in allele order
    pub alleles: Vec<StarAllele>,
    pub diplotype: Diplotype,
    /// Identifiers of the calls that contributed to this gene
    pub variant_ids: Vec<String>,
    /// At least one contributing call had its gene inferred from the identifier
    pub inferred_gene: bool,
    pub notes: Vec<String>,
}

/// Metabolizer / function categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phenotype {
    PM,
    IM,
    NM,
    RM,
    URM,
    Unknown,
}

impl Phenotype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phenotype::PM => "PM",
            Phenotype::IM => "IM",
            Phenotype::NM => "NM",
            Phenotype::RM => "RM",
            Phenotype::URM => "URM",
            Phenotype::Unknown => "Unknown",
        }
    }

    /// Human readable label; transporter genes report function rather than metabolism
    pub fn label_for(&self, gene: Gene) -> &'static str {
        match (gene, self) {
            (Gene::Slco1b1, Phenotype::NM) => "Normal Function",
            (Gene::Slco1b1, Phenotype::IM) => "Decreased Function",
            (Gene::Slco1b1, Phenotype::PM) => "Poor Function",
            (_, Phenotype::PM) => "Poor Metabolizer",
            (_, Phenotype::IM) => "Intermediate Metabolizer",
            (_, Phenotype::NM) => "Normal Metabolizer",
            (_, Phenotype::RM) => "Rapid Metabolizer",
            (_, Phenotype::URM) => "Ultrarapid Metabolizer",
            (_, Phenotype::Unknown) => "Unknown",
        }
    }

    /// One category toward poorer metabolism. PM and Unknown are fixed points.
    pub fn poorer(&self) -> Phenotype {
        match self {
            Phenotype::URM => Phenotype::RM,
            Phenotype::RM => Phenotype::NM,
            Phenotype::NM => Phenotype::IM,
            Phenotype::IM | Phenotype::PM => Phenotype::PM,
            Phenotype::Unknown => Phenotype::Unknown,
        }
    }

    /// Like `poorer`, but skips categories the gene does not define (CYP2D6 URM goes to NM)
    pub fn poorer_for(&self, gene: Gene) -> Phenotype {
        let mut next = self.poorer();
        while !gene.phenotypes().contains(&next) && !matches!(next, Phenotype::PM | Phenotype::Unknown) {
            next = next.poorer();
        }
        next
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhenotypeResult {
    pub gene: Gene,
    pub diplotype: String,
    pub phenotype: Phenotype,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RiskLabel {
    Safe,
    #[serde(rename = "Adjust Dosage")]
    AdjustDosage,
    Toxic,
    Ineffective,
    Unknown,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Safe => "Safe",
            RiskLabel::AdjustDosage => "Adjust Dosage",
            RiskLabel::Toxic => "Toxic",
            RiskLabel::Ineffective => "Ineffective",
            RiskLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk of one drug for one patient. Recomputed per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub drug: String,
    /// None only for drugs outside the rule tables
    pub gene: Option<Gene>,
    /// Phenotype the rule lookup used (after any phenocopying)
    pub phenotype: Phenotype,
    /// Genotype-derived phenotype when an inhibitor shifted the lookup
    pub phenocopied_from: Option<Phenotype>,
    pub risk_label: RiskLabel,
    pub severity: Severity,
    pub confidence: f64,
    pub clinical_note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalRecommendation {
    pub guideline: String,
    pub dosing: String,
    pub alternative_drugs: Vec<String>,
    pub monitoring: String,
    pub contraindicated: bool,
}
