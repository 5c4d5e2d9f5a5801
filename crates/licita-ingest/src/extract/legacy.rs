//! Legacy entries: a licitacion document embedded as text in `<content>`

use super::{flag, text_at, AwardResult, AwardedCompany, ExtractedRecord, FormatHandler, Lot};
use crate::error::{IngestError, Result};
use crate::feed::xml::parse_document;
use crate::feed::{EntryContent, FeedEntry, XmlElement};
use crate::normalize::money::parse_decimal;
use bigdecimal::BigDecimal;

/// Element names that open a nested scope; top-level lookups never descend into them
const NESTED_SCOPES: &[&str] = &["lote", "resultado", "adjudicatario"];

pub struct LegacyHandler;

impl FormatHandler for LegacyHandler {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn can_handle(&self, entry: &FeedEntry) -> bool {
        matches!(&entry.content, Some(EntryContent::Embedded(text)) if !text.trim().is_empty())
    }

    fn parse(&self, entry: &FeedEntry) -> Result<Option<ExtractedRecord>> {
        let Some(EntryContent::Embedded(text)) = &entry.content else {
            return Ok(None);
        };
        let root = parse_document(text.as_bytes()).map_err(|e| {
            IngestError::MalformedEntry(format!("entry {}: {}", entry.entry_id, e))
        })?;
        Ok(Some(extract_licitacion(&root)))
    }
}

/// Field lookup within one scope: direct path first, then the first matching
/// element that is not inside a nested lot/result/company
fn field(scope: &XmlElement, path: &str) -> Option<String> {
    text_at(scope, path).or_else(|| {
        let (head, rest) = path.split_once('/').unwrap_or((path, ""));
        let found = scope.descendant_outside(head, NESTED_SCOPES)?;
        let text = if rest.is_empty() {
            found.text()
        } else {
            found.find_text(rest)
        };
        text.map(str::to_string)
    })
}

fn first_field(scope: &XmlElement, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| field(scope, path))
}

fn amount(scope: &XmlElement, path: &str) -> Option<BigDecimal> {
    field(scope, path).and_then(|v| parse_decimal(&v))
}

fn yes_no(scope: &XmlElement, paths: &[&str]) -> Option<bool> {
    first_field(scope, paths).map(|v| flag(&v))
}

pub(crate) fn extract_licitacion(root: &XmlElement) -> ExtractedRecord {
    ExtractedRecord {
        expedition_number: field(root, "codigoExpediente"),
        contract_object: field(root, "objetoContrato"),
        status: field(root, "estado"),
        status_phase: field(root, "fase"),
        first_publication_date: field(root, "fechaPrimeraPublicacion"),

        estimated_value: amount(root, "valorEstimado"),
        budget_without_taxes: amount(root, "presupuestoSinImpuestos"),
        budget_with_taxes: amount(root, "presupuestoConImpuestos"),

        contract_type: field(root, "tipoContrato"),
        cpv_code: field(root, "cpv"),

        execution_place_nuts: field(root, "lugarEjecucion/codNUTS"),
        execution_place_name: field(root, "lugarEjecucion/denominacion"),
        postal_code: field(root, "codigoPostal"),
        municipality: field(root, "municipio"),

        contracting_authority: field(root, "organoContratacion"),
        authority_id_placsp: field(root, "idOCenPLACSP"),
        authority_tax_id: field(root, "nifOC"),
        authority_dir3: field(root, "dir3OC"),
        authority_profile_link: field(root, "enlacePerfilContratante"),
        administration_type: field(root, "tipoAdministracion"),

        procedure_type: first_field(root, &["tipoProcedimiento", "tipoConvocatoria"]),
        system_type: field(root, "sistemaContratacion"),
        processing_type: field(root, "tramitacion"),
        offer_presentation_form: field(root, "formaPresentacionOferta"),
        applicable_directive: field(root, "directivaAplicable"),
        submission_deadline: field(root, "fechaLimitePresentacion"),

        subcontracting_allowed: yes_no(root, &["subcontratacionPermitida"]),
        subcontracting_percentage: amount(root, "porcentajeSubcontratacion"),

        lots: root.descendants("lote").into_iter().map(extract_lot).collect(),
        results: root
            .descendants("resultado")
            .into_iter()
            .map(extract_result)
            .collect(),

        ..ExtractedRecord::default()
    }
}

fn extract_lot(lote: &XmlElement) -> Lot {
    Lot {
        lot_number: field(lote, "numeroLote"),
        object: field(lote, "objeto"),
        budget_without_taxes: amount(lote, "presupuestoSinImpuestos"),
        budget_with_taxes: amount(lote, "presupuestoConImpuestos"),
        cpv_code: field(lote, "cpv"),
        execution_place: field(lote, "lugarEjecucion"),
    }
}

fn extract_result(resultado: &XmlElement) -> AwardResult {
    AwardResult {
        lot_number: field(resultado, "numeroLote"),
        status: field(resultado, "estado"),
        award_date: field(resultado, "fechaAdjudicacion"),
        offers_received: field(resultado, "numeroOfertasRecibidas")
            .and_then(|v| v.trim().parse().ok()),
        lowest_offer: amount(resultado, "precioOfertaMasBaja"),
        highest_offer: amount(resultado, "precioOfertaMasAlta"),
        abnormally_low_excluded: yes_no(
            resultado,
            &["ofertasExcluidasAnormalmenteBajas", "ofertasExcluidasAbnormementebajas"],
        ),
        contract_number: field(resultado, "numeroContrato"),
        formalization_date: field(resultado, "fechaFormalizacion"),
        entry_into_force_date: field(resultado, "fechaEntradaVigor"),
        companies: resultado
            .descendants("adjudicatario")
            .into_iter()
            .map(extract_company)
            .collect(),
    }
}

fn extract_company(adjudicatario: &XmlElement) -> AwardedCompany {
    AwardedCompany {
        name: field(adjudicatario, "denominacion"),
        id_type: field(adjudicatario, "tipoIdentificador"),
        tax_id: field(adjudicatario, "identificador"),
        is_sme: yes_no(adjudicatario, &["esPyme", "esmenor"]),
        amount_without_taxes: amount(adjudicatario, "importeAdjudicacionSinImpuestos"),
        amount_with_taxes: amount(adjudicatario, "importeAdjudicacionConImpuestos"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const LICITACION: &str = r#"<pcsp:licitacion xmlns:pcsp="http://www.plataforma.es/pcsp">
  <pcsp:codigoExpediente>EXP-2025/014</pcsp:codigoExpediente>
  <pcsp:objetoContrato>Reforma del mercado municipal</pcsp:objetoContrato>
  <pcsp:estado>PUB</pcsp:estado>
  <pcsp:fase>En plazo</pcsp:fase>
  <pcsp:fechaPrimeraPublicacion>03/02/2025</pcsp:fechaPrimeraPublicacion>
  <pcsp:valorEstimado>1.500.000,00</pcsp:valorEstimado>
  <pcsp:presupuestoSinImpuestos>1.234.567,89</pcsp:presupuestoSinImpuestos>
  <pcsp:presupuestoConImpuestos>1.493.827,15</pcsp:presupuestoConImpuestos>
  <pcsp:tipoContrato>Obras</pcsp:tipoContrato>
  <pcsp:cpv>45000000</pcsp:cpv>
  <pcsp:lugarEjecucion>
    <pcsp:codNUTS>ES511</pcsp:codNUTS>
    <pcsp:denominacion>Girona</pcsp:denominacion>
  </pcsp:lugarEjecucion>
  <pcsp:organoContratacion>Ajuntament de Girona</pcsp:organoContratacion>
  <pcsp:nifOC>P1708500B</pcsp:nifOC>
  <pcsp:tipoConvocatoria>1</pcsp:tipoConvocatoria>
  <pcsp:subcontratacionPermitida>Sí</pcsp:subcontratacionPermitida>
  <pcsp:porcentajeSubcontratacion>30</pcsp:porcentajeSubcontratacion>
  <pcsp:lotes>
    <pcsp:lote>
      <pcsp:numeroLote>1</pcsp:numeroLote>
      <pcsp:objeto>Estructura</pcsp:objeto>
      <pcsp:presupuestoSinImpuestos>800.000,00</pcsp:presupuestoSinImpuestos>
      <pcsp:estado>ignored</pcsp:estado>
    </pcsp:lote>
    <pcsp:lote>
      <pcsp:numeroLote>2</pcsp:numeroLote>
      <pcsp:objeto>Instalaciones</pcsp:objeto>
    </pcsp:lote>
  </pcsp:lotes>
  <pcsp:resultados>
    <pcsp:resultado>
      <pcsp:numeroLote>1</pcsp:numeroLote>
      <pcsp:estado>Adjudicado</pcsp:estado>
      <pcsp:fechaAdjudicacion>2025-04-10</pcsp:fechaAdjudicacion>
      <pcsp:numeroOfertasRecibidas>4</pcsp:numeroOfertasRecibidas>
      <pcsp:precioOfertaMasBaja>700.000,00</pcsp:precioOfertaMasBaja>
      <pcsp:adjudicatario>
        <pcsp:denominacion>Construcciones Ter SL</pcsp:denominacion>
        <pcsp:tipoIdentificador>NIF</pcsp:tipoIdentificador>
        <pcsp:identificador>B17000000</pcsp:identificador>
        <pcsp:esPyme>si</pcsp:esPyme>
        <pcsp:importeAdjudicacionSinImpuestos>712.000,00</pcsp:importeAdjudicacionSinImpuestos>
      </pcsp:adjudicatario>
    </pcsp:resultado>
  </pcsp:resultados>
</pcsp:licitacion>"#;

    fn dec(s: &str) -> Option<BigDecimal> {
        Some(BigDecimal::from_str(s).unwrap())
    }

    fn entry(content: &str) -> FeedEntry {
        FeedEntry {
            entry_id: "urn:1".to_string(),
            title: "t".to_string(),
            updated_at: None,
            link: None,
            summary: None,
            content: Some(EntryContent::Embedded(content.to_string())),
        }
    }

    #[test]
    fn test_top_level_fields() {
        let record = LegacyHandler.parse(&entry(LICITACION)).unwrap().unwrap();

        assert_eq!(record.expedition_number.as_deref(), Some("EXP-2025/014"));
        assert_eq!(record.status.as_deref(), Some("PUB"));
        assert_eq!(record.budget_without_taxes, dec("1234567.89"));
        assert_eq!(record.estimated_value, dec("1500000"));
        assert_eq!(record.execution_place_nuts.as_deref(), Some("ES511"));
        assert_eq!(record.execution_place_name.as_deref(), Some("Girona"));
        assert_eq!(record.procedure_type.as_deref(), Some("1"));
        assert_eq!(record.subcontracting_allowed, Some(true));
        assert_eq!(record.subcontracting_percentage, dec("30"));
        assert_eq!(record.authority_dir3, None);
    }

    #[test]
    fn test_lots_and_results_are_scoped() {
        let record = LegacyHandler.parse(&entry(LICITACION)).unwrap().unwrap();

        assert_eq!(record.lots.len(), 2);
        assert_eq!(record.lots[0].budget_without_taxes, dec("800000"));
        assert_eq!(record.lots[1].object.as_deref(), Some("Instalaciones"));
        assert_eq!(record.lots[1].budget_without_taxes, None);

        assert_eq!(record.results.len(), 1);
        let result = &record.results[0];
        assert_eq!(result.status.as_deref(), Some("Adjudicado"));
        assert_eq!(result.offers_received, Some(4));
        assert_eq!(result.lowest_offer, dec("700000"));
        assert_eq!(result.companies.len(), 1);
        assert_eq!(result.companies[0].tax_id.as_deref(), Some("B17000000"));
        assert_eq!(result.companies[0].is_sme, Some(true));
        assert_eq!(result.companies[0].amount_without_taxes, dec("712000"));
    }

    #[test]
    fn test_minimal_document() {
        let record = LegacyHandler
            .parse(&entry("<licitacion><objetoContrato>x</objetoContrato></licitacion>"))
            .unwrap()
            .unwrap();
        assert!(record.lots.is_empty());
        assert!(record.results.is_empty());
        assert_eq!(record.budget_without_taxes, None);
    }

    #[test]
    fn test_broken_markup_is_malformed_entry() {
        let err = LegacyHandler.parse(&entry("<licitacion><a></licitacion>")).unwrap_err();
        assert!(matches!(err, IngestError::MalformedEntry(_)));
    }

    #[test]
    fn test_blank_content_not_handled() {
        assert!(!LegacyHandler.can_handle(&entry("   ")));
        assert!(LegacyHandler.can_handle(&entry("<a/>")));
    }
}
