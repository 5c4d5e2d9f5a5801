//! Field extraction from feed entries
//!
//! Entries arrive in one of two incompatible shapes. Each shape has its own
//! [`FormatHandler`]; the [`FieldExtractor`] asks them in order and uses the
//! first that accepts the entry. A new wire format is one more handler.

pub mod codice;
pub mod legacy;

pub use codice::CodiceHandler;
pub use legacy::LegacyHandler;

use crate::error::Result;
use crate::feed::{FeedEntry, XmlElement};
use crate::normalize::money::parse_decimal;
use bigdecimal::BigDecimal;
use serde::Serialize;
use tracing::{debug, warn};

/// A sub-division of a contract
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Lot {
    pub lot_number: Option<String>,
    pub object: Option<String>,
    pub budget_without_taxes: Option<BigDecimal>,
    pub budget_with_taxes: Option<BigDecimal>,
    pub cpv_code: Option<String>,
    pub execution_place: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AwardedCompany {
    pub name: Option<String>,
    /// NIF, UTE, ...
    pub id_type: Option<String>,
    pub tax_id: Option<String>,
    pub is_sme: Option<bool>,
    pub amount_without_taxes: Option<BigDecimal>,
    pub amount_with_taxes: Option<BigDecimal>,
}

/// Outcome of a lot, or of the whole contract when it has no lots
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AwardResult {
    pub lot_number: Option<String>,
    pub status: Option<String>,
    pub award_date: Option<String>,
    pub offers_received: Option<u32>,
    pub lowest_offer: Option<BigDecimal>,
    pub highest_offer: Option<BigDecimal>,
    pub abnormally_low_excluded: Option<bool>,
    pub contract_number: Option<String>,
    pub formalization_date: Option<String>,
    pub entry_into_force_date: Option<String>,
    pub companies: Vec<AwardedCompany>,
}

/// Everything a single tender notice discloses
///
/// Only `identifier` is always present. A record without lots or results
/// describes a simple contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedRecord {
    pub identifier: String,
    pub link: Option<String>,
    pub update_date: Option<String>,

    pub status: Option<String>,
    pub status_phase: Option<String>,
    pub first_publication_date: Option<String>,
    pub expedition_number: Option<String>,

    pub contract_object: Option<String>,
    pub contract_type: Option<String>,
    pub cpv_code: Option<String>,

    pub estimated_value: Option<BigDecimal>,
    pub budget_without_taxes: Option<BigDecimal>,
    pub budget_with_taxes: Option<BigDecimal>,

    pub execution_place_nuts: Option<String>,
    pub execution_place_name: Option<String>,
    pub postal_code: Option<String>,
    pub municipality: Option<String>,

    pub contracting_authority: Option<String>,
    pub authority_id_placsp: Option<String>,
    pub authority_tax_id: Option<String>,
    pub authority_dir3: Option<String>,
    pub authority_profile_link: Option<String>,
    pub authority_phone: Option<String>,
    pub administration_type: Option<String>,

    pub procedure_type: Option<String>,
    pub system_type: Option<String>,
    pub processing_type: Option<String>,
    pub offer_presentation_form: Option<String>,
    pub applicable_directive: Option<String>,
    pub submission_deadline: Option<String>,

    pub subcontracting_allowed: Option<bool>,
    pub subcontracting_percentage: Option<BigDecimal>,

    pub lots: Vec<Lot>,
    pub results: Vec<AwardResult>,
}

/// One entry wire format
pub trait FormatHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the entry carries this handler's shape
    fn can_handle(&self, entry: &FeedEntry) -> bool;

    /// Extract the record; `Ok(None)` when the payload holds no notice
    fn parse(&self, entry: &FeedEntry) -> Result<Option<ExtractedRecord>>;
}

/// Ordered list of format handlers
pub struct FieldExtractor {
    handlers: Vec<Box<dyn FormatHandler>>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor {
    /// Structured handler first, then the legacy embedded-markup handler
    pub fn new() -> Self {
        Self {
            handlers: vec![Box::new(CodiceHandler), Box::new(LegacyHandler)],
        }
    }

    /// Append a handler, tried after the existing ones
    pub fn with_handler(mut self, handler: Box<dyn FormatHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Extract a record from `entry`
    ///
    /// Entry metadata (id, update time, link) is stamped onto the record. An
    /// entry no handler accepts yields `Ok(None)`.
    pub fn extract(&self, entry: &FeedEntry) -> Result<Option<ExtractedRecord>> {
        let Some(handler) = self.handlers.iter().find(|h| h.can_handle(entry)) else {
            warn!(entry = %entry.entry_id, "No format handler for entry");
            return Ok(None);
        };

        let record = handler.parse(entry)?.map(|mut record| {
            record.identifier = entry.entry_id.clone();
            record.update_date = entry.updated_at.clone();
            if record.link.is_none() {
                record.link = entry.link.clone();
            }
            record
        });

        debug!(
            entry = %entry.entry_id,
            handler = handler.name(),
            extracted = record.is_some(),
            "Extracted entry"
        );
        Ok(record)
    }
}

// Lookup helpers shared by both handlers. Elements are matched by local name;
// prefixes differ between feed generations while local names do not.

pub(crate) fn text_at(scope: &XmlElement, path: &str) -> Option<String> {
    scope.find_text(path).map(str::to_string)
}

pub(crate) fn decimal_at(scope: &XmlElement, path: &str) -> Option<BigDecimal> {
    scope.find_text(path).and_then(parse_decimal)
}

pub(crate) fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "sí" | "si" | "true" | "1" | "s" | "yes"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::feed::EntryContent;
    use std::str::FromStr;

    fn entry(content: Option<EntryContent>) -> FeedEntry {
        FeedEntry {
            entry_id: "urn:entry:1".to_string(),
            title: "Obras de urbanización".to_string(),
            updated_at: Some("2025-03-01T10:00:00+01:00".to_string()),
            link: Some("https://example.org/detalle/1".to_string()),
            summary: None,
            content,
        }
    }

    struct Fixed;

    impl FormatHandler for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn can_handle(&self, entry: &FeedEntry) -> bool {
            entry.content.is_none()
        }

        fn parse(&self, _entry: &FeedEntry) -> Result<Option<ExtractedRecord>> {
            Ok(Some(ExtractedRecord {
                contract_object: Some("fixed".to_string()),
                ..ExtractedRecord::default()
            }))
        }
    }

    #[test]
    fn test_handler_order() {
        let extractor = FieldExtractor::new();
        assert_eq!(extractor.handler_names(), vec!["codice", "legacy"]);
    }

    #[test]
    fn test_entry_without_payload_yields_none() {
        let extractor = FieldExtractor::new();
        assert_eq!(extractor.extract(&entry(None)).unwrap(), None);
    }

    #[test]
    fn test_added_handler_and_metadata_stamp() {
        let extractor = FieldExtractor::new().with_handler(Box::new(Fixed));
        let record = extractor.extract(&entry(None)).unwrap().unwrap();

        assert_eq!(record.identifier, "urn:entry:1");
        assert_eq!(record.update_date.as_deref(), Some("2025-03-01T10:00:00+01:00"));
        assert_eq!(record.link.as_deref(), Some("https://example.org/detalle/1"));
        assert_eq!(record.contract_object.as_deref(), Some("fixed"));
    }

    #[test]
    fn test_legacy_entry_dispatch() {
        let xml = "<licitacion><objetoContrato>Obra</objetoContrato>\
                   <presupuestoSinImpuestos>1.000,50</presupuestoSinImpuestos></licitacion>";
        let extractor = FieldExtractor::new();
        let record = extractor
            .extract(&entry(Some(EntryContent::Embedded(xml.to_string()))))
            .unwrap()
            .unwrap();

        assert_eq!(record.identifier, "urn:entry:1");
        assert_eq!(
            record.budget_without_taxes,
            Some(BigDecimal::from_str("1000.50").unwrap())
        );
    }

    #[test]
    fn test_flag_values() {
        assert!(flag("Sí"));
        assert!(flag("true"));
        assert!(flag(" 1 "));
        assert!(!flag("No"));
        assert!(!flag("false"));
    }
}
