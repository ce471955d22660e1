use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ParseErrorKind, ReadError};
use crate::parsers::{open_file, parse_genotype, ParsedVariants};
use crate::tables::RSID_GENE;
use crate::types::*;

lazy_static! {
    static ref FILEFORMAT: Regex = Regex::new(r"^##fileformat=VCFv4\.\d+$").unwrap();
}

/// Reader for single-sample VCF v4.x genotype calls on the panel genes
#[derive(Debug, Default)]
pub struct VcfReader;

impl VcfReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read_path(&self, path: &Path) -> Result<ParsedVariants, ReadError> {
        let reader = open_file(path)?;
        self.read(reader, &path.to_string_lossy())
    }

    pub fn read_str(&self, text: &str, source: &str) -> Result<ParsedVariants, ReadError> {
        self.read(text.as_bytes(), source)
    }

    pub fn read<R: BufRead>(&self, mut reader: R, source: &str) -> Result<ParsedVariants, ReadError> {
        let mut data = ParsedVariants::new(source);
        let mut seen_header = false;
        let mut line_number = 0;

        // Annotation fields are not always UTF-8; decode lossily rather than fail the file
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_number += 1;
            let line = String::from_utf8_lossy(&buf);
            if let Cow::Owned(_) = line {
                debug!("Line {} of {} is not valid UTF-8", line_number, source);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);

            if trimmed.trim().is_empty() {
                continue;
            }

            if !seen_header {
                if !FILEFORMAT.is_match(trimmed.trim()) {
                    return Err(ReadError::UnsupportedFormat(trimmed.to_string()));
                }
                seen_header = true;
                self.parse_header_line(trimmed, &mut data);
            } else if trimmed.starts_with('#') {
                self.parse_header_line(trimmed, &mut data);
            } else {
                data.data_lines += 1;
                match self.parse_variant_line(trimmed) {
                    Ok(Some(call)) => data.add_call(call),
                    Ok(None) => data.homozygous_reference += 1,
                    Err(kind) => {
                        debug!("Skipping line {}: {}", line_number, kind);
                        data.add_diagnostic(line_number, kind);
                    }
                }
            }
        }

        if !seen_header {
            return Err(ReadError::UnsupportedFormat(String::new()));
        }

        info!(
            "Read {} calls from {} data lines of {} ({} diagnostics)",
            data.calls.len(),
            data.data_lines,
            source,
            data.diagnostics.len()
        );
        Ok(data)
    }

    fn parse_header_line(&self, line: &str, data: &mut ParsedVariants) {
        if let Some(meta) = line.strip_prefix("##") {
            if let Some((key, value)) = meta.split_once('=') {
                data.metadata.insert(key.to_string(), value.to_string());
            }
        } else if line.starts_with("#CHROM") {
            // Column header line - the 10th column names the sample
            let parts: Vec<&str> = line.trim_start_matches('#').split('\t').collect();
            if parts.len() >= 10 {
                data.sample_id = Some(parts[9].trim().to_string());
            }
        }
    }

    /// `Ok(None)` for hom-ref records, which contribute nothing
    fn parse_variant_line(&self, line: &str) -> Result<Option<VariantCall>, ParseErrorKind> {
        let mut parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 8 {
            parts = line.split_whitespace().collect();
        }
        if parts.len() < 8 {
            return Err(ParseErrorKind::InsufficientColumns(parts.len()));
        }
        if parts.len() < 10 {
            return Err(ParseErrorKind::MissingGenotype);
        }

        let chromosome = parts[0].trim_start_matches("chr").to_string();
        let position: u64 = parts[1]
            .parse()
            .map_err(|_| ParseErrorKind::InvalidPosition(parts[1].to_string()))?;
        let rsid = match parts[2] {
            "." | "" => None,
            id => Some(id.to_string()),
        };
        let id = rsid
            .clone()
            .unwrap_or_else(|| format!("chr{}:{}", chromosome, position));

        let zygosity = self.parse_genotype_field(parts[8], parts[9])?;
        if zygosity == Zygosity::HomRef {
            debug!("{} is homozygous reference, dropped", id);
            return Ok(None);
        }

        let info = self.parse_info_field(parts[7]);

        let tagged = info.get("GENE").or_else(|| info.get("gene"));
        let (gene, gene_source) = match tagged {
            Some(symbol) => {
                let gene = Gene::from_symbol(symbol).ok_or_else(|| ParseErrorKind::OffPanelGene {
                    id: id.clone(),
                    gene: symbol.to_string(),
                })?;
                (gene, GeneSource::Tagged)
            }
            None => {
                let gene = rsid
                    .as_deref()
                    .and_then(|rsid| RSID_GENE.get(rsid))
                    .copied()
                    .ok_or_else(|| ParseErrorKind::UnknownGene(id.clone()))?;
                (gene, GeneSource::Inferred)
            }
        };

        let star = info
            .get("STAR")
            .or_else(|| info.get("star"))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let functional_status = info
            .get("FUNCTION")
            .or_else(|| info.get("function"))
            .map(|s| s.to_string());

        Ok(Some(VariantCall {
            id,
            gene,
            zygosity,
            gene_source,
            star,
            duplication: self.has_duplication_evidence(&info),
            functional_status,
            locus: Some(Locus {
                chromosome,
                position,
                reference: parts[3].to_string(),
                alternate: parts[4].to_string(),
            }),
        }))
    }

    fn parse_info_field<'a>(&self, info_str: &'a str) -> HashMap<&'a str, &'a str> {
        let mut info_map = HashMap::new();
        if info_str == "." {
            return info_map;
        }

        for entry in info_str.split(';') {
            match entry.split_once('=') {
                Some((key, value)) => info_map.insert(key.trim(), value.trim()),
                None => info_map.insert(entry.trim(), ""),
            };
        }

        info_map
    }

    // Copy-number gain must be stated on the record; it is never inferred from counts
    fn has_duplication_evidence(&self, info: &HashMap<&str, &str>) -> bool {
        let copy_number_gain = info
            .get("CN")
            .and_then(|cn| cn.parse::<u32>().ok())
            .map(|cn| cn > 2)
            .unwrap_or(false);
        let dup_type = info
            .get("SVTYPE")
            .map(|t| t.eq_ignore_ascii_case("DUP"))
            .unwrap_or(false);

        copy_number_gain || dup_type || info.contains_key("DUP")
    }

    fn parse_genotype_field(&self, format_str: &str, sample_str: &str) -> Result<Zygosity, ParseErrorKind> {
        let format_fields: Vec<&str> = format_str.split(':').collect();
        let sample_fields: Vec<&str> = sample_str.split(':').collect();

        let gt_index = format_fields
            .iter()
            .position(|&f| f == "GT")
            .ok_or(ParseErrorKind::MissingGenotype)?;
        let gt_value = sample_fields
            .get(gt_index)
            .ok_or(ParseErrorKind::MissingGenotype)?;

        parse_genotype(gt_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "##fileformat=VCFv4.2\n##reference=GRCh38\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tPATIENT_001\n";

    fn read(body: &str) -> ParsedVariants {
        VcfReader::new()
            .read_str(&format!("{}{}", HEADER, body), "test.vcf")
            .expect("valid header")
    }

    #[test]
    fn test_reads_tagged_and_inferred_calls() {
        let data = read(
            "chr10\t94781859\trs4244285\tG\tA\t100\tPASS\tGENE=CYP2C19;STAR=*2\tGT\t0/1\n\
             chr22\t42130692\trs3892097\tC\tT\t100\tPASS\t.\tGT:DP\t1/1:30\n",
        );

        assert_eq!(data.sample_id.as_deref(), Some("PATIENT_001"));
        assert_eq!(data.metadata.get("reference").map(String::as_str), Some("GRCh38"));
        assert_eq!(data.calls.len(), 2);
        assert_eq!(data.calls[0].gene, Gene::Cyp2c19);
        assert_eq!(data.calls[0].gene_source, GeneSource::Tagged);
        assert_eq!(data.calls[0].zygosity, Zygosity::Het);
        assert_eq!(data.calls[0].star.as_deref(), Some("*2"));
        assert_eq!(data.calls[1].gene, Gene::Cyp2d6);
        assert_eq!(data.calls[1].gene_source, GeneSource::Inferred);
        assert_eq!(data.calls[1].zygosity, Zygosity::HomAlt);
        assert!(data.diagnostics.is_empty());
    }

    #[test]
    fn test_malformed_lines_become_diagnostics() {
        let data = read(
            "chr1\tnotapos\trs1\tA\tT\t.\tPASS\t.\tGT\t0/1\n\
             chr1\t100\trs999999\tA\tT\t.\tPASS\t.\tGT\t0/1\n\
             chr1\t100\trs2\tA\tT\n\
             chr1\t100\trs3\tA\tT\t.\tPASS\tGENE=BRCA1\tGT\t0/1\n\
             chr1\t100\trs4\tA\tT\t.\tPASS\tGENE=TPMT\tGT\t./.\n\
             chr6\t18130918\trs1800460\tC\tT\t99\tPASS\tGENE=TPMT\tGT\t0/1\n",
        );

        assert_eq!(data.calls.len(), 1);
        assert_eq!(data.diagnostics.len(), 5);
        assert!(data.parsing_succeeded());
        assert!(matches!(
            data.diagnostics[0].kind,
            ParseErrorKind::InvalidPosition(_)
        ));
        assert!(matches!(
            data.diagnostics[1].kind,
            ParseErrorKind::UnknownGene(_)
        ));
        assert!(matches!(
            data.diagnostics[2].kind,
            ParseErrorKind::InsufficientColumns(5)
        ));
        assert!(matches!(
            data.diagnostics[3].kind,
            ParseErrorKind::OffPanelGene { .. }
        ));
        assert!(matches!(data.diagnostics[4].kind, ParseErrorKind::NoCall(_)));
        // header is three lines, first data line is line 4
        assert_eq!(data.diagnostics[0].line, 4);
    }

    #[test]
    fn test_hom_ref_dropped_without_diagnostic() {
        let data = read("chr1\t100\trs12345\tA\tT\t.\tPASS\tGENE=OFFPANEL\tGT\t0/0\n");
        assert!(data.calls.is_empty());
        assert!(data.diagnostics.is_empty());
        assert_eq!(data.homozygous_reference, 1);
    }

    #[test]
    fn test_duplication_evidence() {
        let data = read(
            "chr22\t42127941\trs16947\tG\tA\t.\tPASS\tGENE=CYP2D6;CN=3\tGT\t1/1\n\
             chr22\t42127941\trs16947\tG\tA\t.\tPASS\tGENE=CYP2D6;SVTYPE=DUP\tGT\t0/1\n\
             chr22\t42127941\trs16947\tG\tA\t.\tPASS\tGENE=CYP2D6;CN=2\tGT\t0/1\n",
        );
        let flags: Vec<bool> = data.calls.iter().map(|c| c.duplication).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn test_missing_identifier_is_synthesised() {
        let data = read("chr1\t97450058\t.\tC\tT\t.\tPASS\tGENE=DPYD\tGT\t0/1\n");
        assert_eq!(data.calls[0].id, "chr1:97450058");
    }

    #[test]
    fn test_latin1_annotation_does_not_fail_the_file() {
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(b"chr10\t94781859\trs4244285\tG\tA\t.\tPASS\tGENE=CYP2C19\tGT\t0/1\n");
        bytes.extend_from_slice(b"chr10\t94780653\trs4986893\tG\tA\t.\tPASS\tGENE=CYP2C19;NOTE=caf\xe9\tGT\t0/1\n");

        let data = VcfReader::new().read(&bytes[..], "latin1.vcf").unwrap();
        assert_eq!(data.data_lines, 2);
        assert_eq!(data.calls[0].id, "rs4244285");
        assert_eq!(data.calls.len(), 2);
        assert_eq!(data.calls[1].id, "rs4986893");
        assert!(data.diagnostics.is_empty());
    }

    #[test]
    fn test_header_is_required() {
        let err = VcfReader::new()
            .read_str("#CHROM\tPOS\n1\t100\n", "bad.vcf")
            .unwrap_err();
        assert!(matches!(err, ReadError::UnsupportedFormat(_)));

        let err = VcfReader::new()
            .read_str("##fileformat=VCFv3.3\n", "old.vcf")
            .unwrap_err();
        assert!(matches!(err, ReadError::UnsupportedFormat(_)));
    }
}
