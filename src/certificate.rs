//! Certificate field extraction and storage.
//!
//! Tax registration and business license certificates are turned into
//! structured records by one generation call with a strict JSON contract:
//! the model returns a single object, optionally wrapped in a code fence,
//! with empty strings for fields the document does not carry. Unparseable
//! output is an explicit error, never a silently degraded record — a wrong
//! registration number is worse than no record at all.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::extract;
use crate::llm::Generator;

pub const CERTIFICATES_FILE: &str = "certificates.jsonl";

/// One extracted certificate. Fields the document lacks stay empty; the
/// schema covers Corporate Tax and VAT registration certificates plus
/// business licenses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateRecord {
    pub filename: String,
    pub upload_date: String,
    pub document_type: String,
    pub certificate_type: String,
    pub tax_registration_number: String,
    pub legal_name_english: String,
    pub legal_name_arabic: String,
    pub registered_address: String,
    pub contact_number: String,
    pub effective_registration_date: String,
    pub license_number: String,
    pub licensing_authority: String,
    pub issue_date: String,
    pub expiry_date: String,
    pub version_number: String,
    pub first_tax_period_start: String,
    pub first_tax_period_end: String,
    pub first_return_due_date: String,
    pub vat_return_period: String,
    pub vat_return_due_date: String,
    pub tax_periods_schedule: String,
    pub company_type: String,
    pub formation_number: String,
    pub managers: String,
    pub business_activities: String,
    pub activity_codes: String,
    pub issuing_authority: String,
    pub document_reference: String,
    pub additional_notes: String,
}

/// Extract structured fields from a certificate PDF.
///
/// One generation call over the document's full text. The model's output
/// must parse as JSON (code fences are tolerated and stripped); anything
/// else is an error — there is no excerpt fallback for field extraction.
pub async fn extract_certificate(
    generator: &dyn Generator,
    bytes: &[u8],
    filename: &str,
) -> Result<CertificateRecord> {
    let pages = extract::extract_pages(bytes)
        .map_err(|e| anyhow::anyhow!("Could not extract text from the certificate: {}", e))?;
    if pages.is_empty() {
        anyhow::bail!("Could not extract any text from the certificate");
    }
    let full_text = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = extraction_prompt(&full_text);
    let response = generator.complete(&prompt).await?;
    let json_text = strip_code_fences(response.trim());

    let mut record: CertificateRecord = serde_json::from_str(&json_text)
        .with_context(|| "Certificate extraction returned output that is not valid JSON")?;

    record.filename = filename.to_string();
    record.upload_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    Ok(record)
}

fn extraction_prompt(full_text: &str) -> String {
    format!(
        "You are an expert document analyst specializing in Federal Tax Authority certificates \
         and Business License certificates. Analyze this document and extract ALL relevant \
         information with perfect accuracy.\n\n\
         DOCUMENT TYPE IDENTIFICATION:\n\
         First, identify what type of document this is:\n\
         1. \"Tax Registration Certificate - Corporate Tax\"\n\
         2. \"Tax Registration Certificate - VAT\"\n\
         3. \"Business License Certificate\"\n\
         4. \"Other Document\"\n\n\
         COMPREHENSIVE DATA EXTRACTION:\n\
         Extract ALL available information and return a valid JSON object. Use empty string \
         \"\" for missing fields.\n\n\
         REQUIRED JSON STRUCTURE (extract ALL applicable fields):\n\
         {{\n\
             \"document_type\": \"\",\n\
             \"certificate_type\": \"\",\n\
             \"tax_registration_number\": \"\",\n\
             \"legal_name_english\": \"\",\n\
             \"legal_name_arabic\": \"\",\n\
             \"registered_address\": \"\",\n\
             \"contact_number\": \"\",\n\
             \"effective_registration_date\": \"\",\n\
             \"license_number\": \"\",\n\
             \"licensing_authority\": \"\",\n\
             \"issue_date\": \"\",\n\
             \"expiry_date\": \"\",\n\
             \"version_number\": \"\",\n\
             \"first_tax_period_start\": \"\",\n\
             \"first_tax_period_end\": \"\",\n\
             \"first_return_due_date\": \"\",\n\
             \"vat_return_period\": \"\",\n\
             \"vat_return_due_date\": \"\",\n\
             \"tax_periods_schedule\": \"\",\n\
             \"company_type\": \"\",\n\
             \"formation_number\": \"\",\n\
             \"managers\": \"\",\n\
             \"business_activities\": \"\",\n\
             \"activity_codes\": \"\",\n\
             \"issuing_authority\": \"\",\n\
             \"document_reference\": \"\",\n\
             \"additional_notes\": \"\"\n\
         }}\n\n\
         DOCUMENT TEXT:\n{}\n\n\
         Return ONLY the complete JSON object with all applicable fields filled:",
        full_text
    )
}

/// Strip a surrounding Markdown code fence from a model response. Text
/// without a leading fence passes through unchanged.
fn strip_code_fences(response: &str) -> String {
    if !response.trim_start().starts_with("```") {
        return response.to_string();
    }
    let mut in_fence = false;
    let mut kept = Vec::new();
    for line in response.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            kept.push(line);
        }
    }
    kept.join("\n")
}

/// Persistence seam for certificate records.
pub trait CertificateStore: Send + Sync {
    fn append(&self, record: &CertificateRecord) -> Result<()>;

    /// All stored records, oldest first.
    fn load_all(&self) -> Result<Vec<CertificateRecord>>;
}

/// Append-only JSON-lines file, one record per line.
pub struct JsonCertificateStore {
    path: PathBuf,
}

impl JsonCertificateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CertificateStore for JsonCertificateStore {
    fn append(&self, record: &CertificateRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open certificate store: {}", self.path.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<CertificateRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read certificate store: {}", self.path.display()))?;

        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CertificateRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping unparseable certificate line"),
            }
        }
        Ok(records)
    }
}
