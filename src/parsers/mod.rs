pub mod vcf;

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{ParseError, ParseErrorKind, ReadError};
use crate::types::{Gene, VariantCall, Zygosity};

pub use vcf::VcfReader;

/// Result of reading one variant source: best-effort calls plus diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedVariants {
    pub source: String,
    pub sample_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Calls on panel genes in input order; hom-ref calls are never stored
    pub calls: Vec<VariantCall>,
    pub diagnostics: Vec<ParseError>,
    pub data_lines: usize,
    pub homozygous_reference: usize,
}

impl ParsedVariants {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn add_call(&mut self, call: VariantCall) {
        self.calls.push(call);
    }

    pub fn add_diagnostic(&mut self, line: usize, kind: ParseErrorKind) {
        self.diagnostics.push(ParseError { line, kind });
    }

    /// Panel genes with at least one call, in panel order
    pub fn detected_genes(&self) -> Vec<Gene> {
        Gene::ALL
            .iter()
            .copied()
            .filter(|gene| self.calls.iter().any(|call| call.gene == *gene))
            .collect()
    }

    pub fn calls_for(&self, gene: Gene) -> impl Iterator<Item = &VariantCall> {
        self.calls.iter().filter(move |call| call.gene == gene)
    }

    /// Clean parse, or at least something usable despite bad lines
    pub fn parsing_succeeded(&self) -> bool {
        self.diagnostics.is_empty() || !self.calls.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.diagnostics.iter().map(|e| e.to_string()).collect()
    }
}

/// Open a plain or gzip-compressed text file
pub fn open_file(path: &Path) -> Result<Box<dyn BufRead>, ReadError> {
    let file = File::open(path)?;
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Classify a `a/b` (or phased `a|b`) genotype field
pub fn parse_genotype(gt: &str) -> Result<Zygosity, ParseErrorKind> {
    let parts: Vec<&str> = gt.trim().split(['/', '|']).collect();
    if parts.len() != 2 {
        return Err(ParseErrorKind::MalformedGenotype(gt.to_string()));
    }
    if parts.iter().any(|p| *p == ".") {
        return Err(ParseErrorKind::NoCall(gt.to_string()));
    }

    let alleles = parts
        .iter()
        .map(|p| p.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ParseErrorKind::MalformedGenotype(gt.to_string()))?;

    Ok(match (alleles[0], alleles[1]) {
        (0, 0) => Zygosity::HomRef,
        (0, _) | (_, 0) => Zygosity::Het,
        // 1/1 and multi-allelic 1/2 both carry two variant copies
        _ => Zygosity::HomAlt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genotype_policy() {
        assert_eq!(parse_genotype("0/0"), Ok(Zygosity::HomRef));
        assert_eq!(parse_genotype("0/1"), Ok(Zygosity::Het));
        assert_eq!(parse_genotype("1/0"), Ok(Zygosity::Het));
        assert_eq!(parse_genotype("1|0"), Ok(Zygosity::Het));
        assert_eq!(parse_genotype("1/1"), Ok(Zygosity::HomAlt));
    }

    #[test]
    fn test_genotype_rejects() {
        assert!(matches!(
            parse_genotype("./."),
            Err(ParseErrorKind::NoCall(_))
        ));
        assert!(matches!(
            parse_genotype("0/1/1"),
            Err(ParseErrorKind::MalformedGenotype(_))
        ));
        assert!(matches!(
            parse_genotype("A/T"),
            Err(ParseErrorKind::MalformedGenotype(_))
        ));
    }
}
