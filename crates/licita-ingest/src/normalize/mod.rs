//! Mapping of extracted records onto the canonical [`ContractDto`]

pub mod codes;
pub mod date;
pub mod money;
pub mod region;

pub use codes::{map_contract_type, map_procedure, map_status};
pub use date::{normalize_date, parse_date};
pub use money::parse_decimal;
pub use region::infer_region;

use crate::extract::ExtractedRecord;
use licita_common::{ContractDto, ContractStatus};
use serde::Serialize;

/// Flat record produced by sources that do not publish licitacion documents
///
/// Values are kept as published; the normalizer parses them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawContract {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub budget: Option<String>,
    pub awarded_amount: Option<String>,
    pub contracting_authority: Option<String>,
    pub awarded_to_name: Option<String>,
    pub awarded_to_tax_id: Option<String>,
    pub publication_date: Option<String>,
    pub deadline_date: Option<String>,
    pub award_date: Option<String>,
    pub procedure_type: Option<String>,
    pub contract_type: Option<String>,
    pub status: Option<String>,
    pub region: Option<String>,
    pub municipality: Option<String>,
    pub source_url: Option<String>,
    /// Source-specific classification, e.g. the bulletin item kind
    pub category: Option<String>,
}

/// What a source hands to the normalizer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRecord {
    Licitacion(ExtractedRecord),
    Flat(RawContract),
}

impl SourceRecord {
    /// Identifier used in logs and raw upserts
    pub fn reference(&self) -> Option<&str> {
        match self {
            SourceRecord::Licitacion(record) => non_blank(Some(&record.identifier))
                .or_else(|| non_blank(record.expedition_number.as_deref())),
            SourceRecord::Flat(raw) => non_blank(raw.external_id.as_deref()),
        }
    }
}

/// Source-aware normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    platform: String,
    default_status: ContractStatus,
}

impl Normalizer {
    pub fn new(platform: impl Into<String>, default_status: ContractStatus) -> Self {
        Self {
            platform: platform.into(),
            default_status,
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Canonical record, or `None` when the identifier or title is missing
    pub fn normalize(&self, record: &SourceRecord) -> Option<ContractDto> {
        let dto = match record {
            SourceRecord::Licitacion(licitacion) => self.from_licitacion(licitacion)?,
            SourceRecord::Flat(raw) => self.from_flat(raw)?,
        };
        dto.is_valid().then_some(dto)
    }

    fn from_licitacion(&self, record: &ExtractedRecord) -> Option<ContractDto> {
        let external_id = non_blank(Some(&record.identifier))
            .or_else(|| non_blank(record.expedition_number.as_deref()))?;
        let title = non_blank(record.contract_object.as_deref())?;

        let authority = non_blank(record.contracting_authority.as_deref());
        let first_result = record.results.first();
        let first_company = first_result.and_then(|r| r.companies.first());

        let region = authority
            .map(infer_region)
            .filter(|r| !r.is_empty())
            .or_else(|| record.execution_place_name.as_deref().map(infer_region))
            .unwrap_or_default();

        Some(ContractDto {
            external_id: external_id.to_string(),
            title: title.to_string(),
            description: record.contract_object.clone(),
            budget: record
                .budget_without_taxes
                .clone()
                .or_else(|| record.estimated_value.clone())
                .or_else(|| record.budget_with_taxes.clone()),
            awarded_amount: first_company.and_then(|c| {
                c.amount_without_taxes
                    .clone()
                    .or_else(|| c.amount_with_taxes.clone())
            }),
            contracting_authority: authority.map(str::to_string),
            awarded_to_name: first_company.and_then(|c| non_blank(c.name.as_deref())).map(str::to_string),
            awarded_to_tax_id: first_company
                .and_then(|c| non_blank(c.tax_id.as_deref()))
                .map(str::to_string),
            publication_date: record
                .first_publication_date
                .as_deref()
                .and_then(normalize_date)
                .or_else(|| record.update_date.as_deref().and_then(normalize_date)),
            deadline_date: record.submission_deadline.as_deref().and_then(normalize_date),
            award_date: record
                .results
                .iter()
                .find_map(|r| r.award_date.as_deref().and_then(normalize_date)),
            procedure_type: map_procedure(record.procedure_type.as_deref()),
            contract_type: map_contract_type(record.contract_type.as_deref(), title),
            status: map_status(
                record.status.as_deref().or(record.status_phase.as_deref()),
                self.default_status,
            ),
            cpv_code: non_blank(record.cpv_code.as_deref()).map(str::to_string),
            region,
            municipality: non_blank(record.municipality.as_deref())
                .or_else(|| non_blank(record.execution_place_name.as_deref()))
                .map(str::to_string),
            source_url: non_blank(record.link.as_deref()).map(str::to_string),
            source_platform: self.platform.clone(),
        })
    }

    fn from_flat(&self, raw: &RawContract) -> Option<ContractDto> {
        let external_id = non_blank(raw.external_id.as_deref())?;
        let title = non_blank(raw.title.as_deref())?;
        let authority = non_blank(raw.contracting_authority.as_deref());

        let region = non_blank(raw.region.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| authority.map(infer_region).unwrap_or_default());

        Some(ContractDto {
            external_id: external_id.to_string(),
            title: title.to_string(),
            description: non_blank(raw.description.as_deref()).map(str::to_string),
            budget: raw.budget.as_deref().and_then(parse_decimal),
            awarded_amount: raw.awarded_amount.as_deref().and_then(parse_decimal),
            contracting_authority: authority.map(str::to_string),
            awarded_to_name: non_blank(raw.awarded_to_name.as_deref()).map(str::to_string),
            awarded_to_tax_id: non_blank(raw.awarded_to_tax_id.as_deref()).map(str::to_string),
            publication_date: raw.publication_date.as_deref().and_then(normalize_date),
            deadline_date: raw.deadline_date.as_deref().and_then(normalize_date),
            award_date: raw.award_date.as_deref().and_then(normalize_date),
            procedure_type: map_procedure(raw.procedure_type.as_deref()),
            contract_type: map_contract_type(raw.contract_type.as_deref(), title),
            status: map_status(raw.status.as_deref(), self.default_status),
            cpv_code: None,
            region,
            municipality: non_blank(raw.municipality.as_deref()).map(str::to_string),
            source_url: non_blank(raw.source_url.as_deref()).map(str::to_string),
            source_platform: self.platform.clone(),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
