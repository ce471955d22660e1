//! Explanation service over an OpenAI-compatible chat completions API.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ExplanationSections, ExplanationService, ExplanationTopic, NarrativeRequest};
use crate::config::ServiceConfig;
use crate::error::GenerationError;

const SECTION_HEADERS: [&str; 4] = [
    "SUMMARY:",
    "BIOLOGICAL_MECHANISM:",
    "VARIANT_SIGNIFICANCE:",
    "CLINICAL_IMPLICATIONS:",
];

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct HttpExplanationService {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpExplanationService {
    /// Reads the API key from the configured environment variable
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} is not set", config.api_key_env))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn complete(&self, prompt: String) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_builder() {
                    GenerationError::Rejected(e.to_string())
                } else {
                    GenerationError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        debug!("explanation service answered {}", status);
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        if status.is_server_error() {
            return Err(GenerationError::Transient(status.to_string()));
        }
        if !status.is_success() {
            return Err(GenerationError::Rejected(status.to_string()));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| GenerationError::Transient(format!("unreadable response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Rejected("response had no choices".to_string()))
    }
}

impl ExplanationService for HttpExplanationService {
    fn generate(&self, topic: &ExplanationTopic) -> Result<ExplanationSections, GenerationError> {
        self.complete(explanation_prompt(topic))
            .map(|text| parse_sections(&text))
    }

    fn narrate(&self, request: &NarrativeRequest) -> Result<String, GenerationError> {
        self.complete(narrative_prompt(request))
            .map(|text| text.trim().to_string())
    }
}

/// The answer is reused for every patient with this phenotype, so the prompt stays generic
pub fn explanation_prompt(topic: &ExplanationTopic) -> String {
    format!(
        "You are a clinical pharmacogenomics expert. Explain the following pharmacogenomic risk assessment.\n\n\
         ASSESSMENT:\n\
         - Drug: {drug}\n\
         - Gene: {gene}\n\
         - Phenotype: {phenotype}\n\
         - Risk Assessment: {label} (Severity: {severity})\n\n\
         Answer with exactly these sections, 2-3 sentences each:\n\n\
         SUMMARY:\n\
         BIOLOGICAL_MECHANISM:\n\
         VARIANT_SIGNIFICANCE:\n\
         CLINICAL_IMPLICATIONS:\n\n\
         Describe the phenotype in general terms; patient variants are attached separately. \
         No disclaimers or preambles.",
        drug = topic.drug,
        gene = topic.gene,
        phenotype = topic.phenotype.label_for(topic.gene),
        label = topic.risk_label,
        severity = topic.severity,
    )
}

pub fn narrative_prompt(request: &NarrativeRequest) -> String {
    let mut lines = vec![format!(
        "You are a clinical pharmacogenomics expert. Write one short paragraph summarising the overall medication risk for patient {}.",
        request.patient_id
    )];
    for entry in &request.entries {
        lines.push(format!(
            "- {}: {} {} ({}), {} / {}; variants: {}",
            entry.drug,
            entry.gene,
            entry.diplotype,
            entry.phenotype,
            entry.risk_label,
            entry.severity,
            if entry.variant_ids.is_empty() {
                "none".to_string()
            } else {
                entry.variant_ids.join(", ")
            }
        ));
    }
    for alert in &request.interaction_alerts {
        lines.push(format!("- Interaction: {}", alert));
    }
    lines.join("\n")
}

/// Split a labelled response into its four sections; unlabelled text becomes the summary
pub fn parse_sections(text: &str) -> ExplanationSections {
    let mut buffers: [Vec<&str>; 4] = Default::default();
    let mut current: Option<usize> = None;

    for line in text.lines().map(str::trim) {
        let header = SECTION_HEADERS
            .iter()
            .position(|h| line.starts_with(h));
        match header {
            Some(index) => {
                current = Some(index);
                let rest = line[SECTION_HEADERS[index].len()..].trim();
                if !rest.is_empty() {
                    buffers[index].push(rest);
                }
            }
            None => {
                if let (Some(index), false) = (current, line.is_empty()) {
                    buffers[index].push(line);
                }
            }
        }
    }

    let [summary, mechanism, significance, implications] = buffers.map(|b| b.join(" "));
    let mut sections = ExplanationSections {
        summary,
        biological_mechanism: mechanism,
        variant_significance: significance,
        clinical_implications: implications,
    };
    if sections.iter().all(str::is_empty) {
        sections.summary = text.trim().to_string();
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::ExplanationRequest;
    use crate::types::{Gene, Phenotype, RiskLabel, Severity};

    #[test]
    fn test_parse_labelled_sections() {
        let text = "SUMMARY: Poor metabolizer.\nLikely ineffective.\n\nBIOLOGICAL_MECHANISM:\nNo activation.\nVARIANT_SIGNIFICANCE: rs4244285 is *2.\nCLINICAL_IMPLICATIONS: Use prasugrel.";
        let sections = parse_sections(text);
        assert_eq!(sections.summary, "Poor metabolizer. Likely ineffective.");
        assert_eq!(sections.biological_mechanism, "No activation.");
        assert_eq!(sections.variant_significance, "rs4244285 is *2.");
        assert_eq!(sections.clinical_implications, "Use prasugrel.");
    }

    #[test]
    fn test_unlabelled_text_lands_in_summary() {
        let sections = parse_sections("  just some prose  ");
        assert_eq!(sections.summary, "just some prose");
        assert!(sections.biological_mechanism.is_empty());
    }

    #[test]
    fn test_prompt_carries_no_patient_evidence() {
        let request = ExplanationRequest {
            drug: "CLOPIDOGREL".into(),
            gene: Gene::Cyp2c19,
            diplotype: "*2/*3".into(),
            phenotype: Phenotype::PM,
            risk_label: RiskLabel::Ineffective,
            severity: Severity::High,
            variant_ids: vec!["rs4244285".into(), "rs4986893".into()],
        };
        let prompt = explanation_prompt(&request.topic());
        assert!(prompt.contains("Poor Metabolizer"));
        assert!(prompt.contains("VARIANT_SIGNIFICANCE:"));
        assert!(!prompt.contains("rs4986893"));
        assert!(!prompt.contains("*2/*3"));
    }
}
