use thiserror::Error;

use crate::types::Gene;

/// Failure of a whole variant source. Individual bad records never end up here.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read variant source: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or missing format header: {0:?}")]
    UnsupportedFormat(String),
}

/// A malformed or unusable record, collected into the reader diagnostics
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ParseErrorKind {
    #[error("insufficient columns ({0})")]
    InsufficientColumns(usize),

    #[error("invalid position {0:?}")]
    InvalidPosition(String),

    #[error("no GT field in FORMAT column")]
    MissingGenotype,

    #[error("malformed genotype {0:?}")]
    MalformedGenotype(String),

    #[error("no-call genotype for {0}")]
    NoCall(String),

    #[error("gene {gene:?} of {id} is outside the supported panel")]
    OffPanelGene { id: String, gene: String },

    #[error("cannot determine gene for {0}")]
    UnknownGene(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no phenotype rule for {gene} diplotype {diplotype}")]
    UnresolvedDiplotype { gene: Gene, diplotype: String },
}

/// Missing rule-table entry. Fatal to the evaluation unit that hit it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("drug {0} is not in the supported drug table")]
    UnsupportedDrug(String),

    #[error("no risk rule for {drug} and phenotype {phenotype}")]
    MissingRiskRule { drug: String, phenotype: String },
}

/// Failure reported by the external explanation service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("rate limited by explanation service")]
    RateLimited,

    #[error("transient explanation service failure: {0}")]
    Transient(String),

    #[error("explanation service rejected request: {0}")]
    Rejected(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited | GenerationError::Transient(_)
        )
    }
}

/// Why a batch unit produced a degraded result
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("evaluation unit panicked: {0}")]
    Panicked(String),

    #[error("evaluation unit did not finish before the batch deadline")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
