use tracing::{debug, warn};

use crate::tables;
use crate::types::*;

/// Builds per-gene diplotypes from zygosity-aware variant calls.
///
/// The result for a gene depends only on the multiset of allele observations,
/// never on the order in which the calls arrived.
#[derive(Debug, Default)]
pub struct DiplotypeAssembler;

impl DiplotypeAssembler {
    pub fn new() -> Self {
        Self
    }

    /// One profile per panel gene, in panel order. Genes without calls get the reference pair.
    pub fn assemble(&self, calls: &[VariantCall]) -> Vec<GeneProfile> {
        Gene::ALL
            .iter()
            .map(|gene| self.assemble_gene(*gene, calls.iter().filter(|c| c.gene == *gene)))
            .collect()
    }

    pub fn assemble_gene<'a>(
        &self,
        gene: Gene,
        calls: impl IntoIterator<Item = &'a VariantCall>,
    ) -> GeneProfile {
        let mut observations: Vec<StarAllele> = Vec::new();
        let mut variant_ids = Vec::new();
        let mut notes = Vec::new();
        let mut inferred_gene = false;

        for call in calls {
            if call.gene != gene || call.zygosity == Zygosity::HomRef {
                continue;
            }

            variant_ids.push(call.id.clone());
            inferred_gene |= call.gene_source == GeneSource::Inferred;

            let label = tables::star_allele(gene, &call.id)
                .map(str::to_string)
                .or_else(|| call.star.clone());
            let Some(label) = label else {
                debug!("{} on {} has no star allele mapping", call.id, gene);
                notes.push(format!("{} has no star allele mapping", call.id));
                continue;
            };

            let allele = StarAllele::new(label).with_duplication(call.duplication);
            for _ in 0..call.zygosity.variant_copies() {
                observations.push(allele.clone());
            }
        }

        observations.sort();

        let diplotype = match observations.as_slice() {
            [] => Diplotype::reference(),
            [only] => Diplotype::new(gene.reference_allele(), only.clone()),
            [a, b] => Diplotype::new(a.clone(), b.clone()),
            [a, b, ..] => {
                warn!(
                    "{} has {} allele observations; keeping the first two in allele order",
                    gene,
                    observations.len()
                );
                notes.push(format!(
                    "{} allele observations, kept {} and {}",
                    observations.len(),
                    a,
                    b
                ));
                Diplotype::new(a.clone(), b.clone())
            }
        };

        GeneProfile {
            gene,
            alleles: observations,
            diplotype,
            variant_ids,
            inferred_gene,
            notes,
        }
    }
}
