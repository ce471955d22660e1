//! # Pharmacogenomic Risk Toolkit
//!
//! Reads single-sample VCF genotype calls for a fixed panel of pharmacogenes
//! (CYP2D6, CYP2C19, CYP2C9, SLCO1B1, TPMT, DPYD), builds star-allele diplotypes,
//! resolves metabolizer phenotypes and classifies drug risk against CPIC-style tables.
//!
//! ## Features
//!
//! - Order-independent diplotype assembly with explicit duplication evidence
//! - Drug-drug interaction checks, including inhibitor phenocopying
//! - Explanations cached per (drug, phenotype) with single-flight generation
//! - Retry with backoff and a run-scoped rate-limit signal for the external service
//! - Bounded concurrent batch runner with per-unit failure isolation

pub mod analysis;
pub mod batch;
pub mod config;
pub mod diplotype;
pub mod error;
pub mod explain;
pub mod interactions;
pub mod parsers;
pub mod pipeline;
pub mod scenarios;
pub mod tables;
pub mod types;

// Re-export key types
pub use analysis::{normalize_drug, ClassificationContext, PhenotypeResolver, RiskClassifier};
pub use batch::{BatchRunner, UnitOutcome};
pub use config::Config;
pub use diplotype::DiplotypeAssembler;
pub use error::*;
pub use explain::{
    Explainer, Explanation, ExplanationOrigin, ExplanationService, NetworkMode, RateLimitSignal,
    RetryPolicy,
};
pub use interactions::{InteractionChecker, InteractionReport};
pub use parsers::{ParsedVariants, VcfReader};
pub use pipeline::{DrugReport, Evaluator, PatientReport};
pub use types::*;
