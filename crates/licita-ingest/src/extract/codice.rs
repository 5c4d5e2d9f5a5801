//! Structured entries: a native `ContractFolderStatus` tree inside the entry
//!
//! The tree is deeper than the legacy document (party, project, lot and
//! result blocks). The entry summary line is parsed as a fallback for the
//! identifier, authority, amount and status.

use super::{decimal_at, flag, text_at, AwardResult, AwardedCompany, ExtractedRecord, FormatHandler, Lot};
use crate::error::Result;
use crate::feed::{EntryContent, FeedEntry, XmlElement};
use crate::normalize::money::parse_decimal;
use bigdecimal::BigDecimal;
use tracing::debug;

const CONTRACT_FOLDER: &str = "ContractFolderStatus";

pub struct CodiceHandler;

impl FormatHandler for CodiceHandler {
    fn name(&self) -> &'static str {
        "codice"
    }

    fn can_handle(&self, entry: &FeedEntry) -> bool {
        matches!(entry.content, Some(EntryContent::Structured(_)))
    }

    fn parse(&self, entry: &FeedEntry) -> Result<Option<ExtractedRecord>> {
        let Some(EntryContent::Structured(tree)) = &entry.content else {
            return Ok(None);
        };
        let Some(folder) = tree.descendant(CONTRACT_FOLDER) else {
            debug!(entry = %entry.entry_id, element = %tree.name, "No ContractFolderStatus in entry");
            return Ok(None);
        };

        let mut record = extract_folder(folder);
        if record.contract_object.is_none() {
            record.contract_object = Some(entry.title.clone());
        }
        if let Some(summary) = entry.summary.as_deref() {
            fill_from_summary(&mut record, &SummaryLine::parse(summary));
        }
        Ok(Some(record))
    }
}

fn extract_folder(folder: &XmlElement) -> ExtractedRecord {
    let mut record = ExtractedRecord {
        expedition_number: text_at(folder, "ContractFolderID"),
        status: text_at(folder, "ContractFolderStatusCode"),
        ..ExtractedRecord::default()
    };

    if let Some(party) = folder.find("LocatedContractingParty") {
        read_contracting_party(party, &mut record);
    }
    if let Some(project) = folder.child("ProcurementProject") {
        read_project(project, &mut record);
    }
    if let Some(process) = folder.child("TenderingProcess") {
        record.procedure_type = text_at(process, "ProcedureCode");
        record.system_type = text_at(process, "ProcurementSystemCode");
        record.processing_type = text_at(process, "UrgencyCode");
        record.offer_presentation_form = text_at(process, "SubmissionMethodCode");
        record.submission_deadline = text_at(process, "TenderSubmissionDeadlinePeriod/EndDate");
    }

    record.lots = folder
        .children_named("ProcurementProjectLot")
        .map(read_lot)
        .collect();
    record.results = folder.children_named("TenderResult").map(read_result).collect();

    record.first_publication_date = folder
        .children_named("ValidNoticeInfo")
        .flat_map(|notice| notice.descendants("IssueDate"))
        .filter_map(XmlElement::text)
        .min()
        .map(str::to_string);

    record
}

fn read_contracting_party(located: &XmlElement, record: &mut ExtractedRecord) {
    record.authority_profile_link = text_at(located, "BuyerProfileURIID");
    record.administration_type = text_at(located, "ContractingPartyTypeCode");

    let Some(party) = located.child("Party") else {
        return;
    };
    record.contracting_authority = text_at(party, "PartyName/Name");
    record.authority_phone = text_at(party, "Contact/Telephone");
    record.postal_code = text_at(party, "PostalAddress/PostalZone");

    for identification in party.children_named("PartyIdentification") {
        let Some(id) = identification.child("ID") else {
            continue;
        };
        let value = id.text().map(str::to_string);
        match id.attr("schemeName") {
            Some("DIR3") => record.authority_dir3 = value,
            Some("NIF") => record.authority_tax_id = value,
            Some("ID_PLATAFORMA") => record.authority_id_placsp = value,
            _ => {},
        }
    }
}

fn read_project(project: &XmlElement, record: &mut ExtractedRecord) {
    record.contract_object = text_at(project, "Name");
    record.contract_type = text_at(project, "TypeCode");
    record.cpv_code = text_at(project, "RequiredCommodityClassification/ItemClassificationCode");

    if let Some(budget) = project.child("BudgetAmount") {
        record.estimated_value = decimal_at(budget, "EstimatedOverallContractAmount");
        record.budget_without_taxes = decimal_at(budget, "TaxExclusiveAmount");
        record.budget_with_taxes = decimal_at(budget, "TotalAmount");
    }

    if let Some(location) = project.child("RealizedLocation") {
        record.execution_place_name = text_at(location, "CountrySubentity");
        record.execution_place_nuts = text_at(location, "CountrySubentityCode");
        record.municipality = text_at(location, "Address/CityName");
        if record.postal_code.is_none() {
            record.postal_code = text_at(location, "Address/PostalZone");
        }
    }
}

fn read_lot(lot: &XmlElement) -> Lot {
    let project = lot.child("ProcurementProject");
    let budget = project.and_then(|p| p.child("BudgetAmount"));

    Lot {
        lot_number: text_at(lot, "ID"),
        object: project.and_then(|p| text_at(p, "Name")),
        budget_without_taxes: budget.and_then(|b| decimal_at(b, "TaxExclusiveAmount")),
        budget_with_taxes: budget.and_then(|b| decimal_at(b, "TotalAmount")),
        cpv_code: project
            .and_then(|p| text_at(p, "RequiredCommodityClassification/ItemClassificationCode")),
        execution_place: project.and_then(|p| text_at(p, "RealizedLocation/CountrySubentity")),
    }
}

fn read_result(result: &XmlElement) -> AwardResult {
    // Amounts of the awarded project apply to every winning party of the result
    let totals = result.find("AwardedTenderedProject/LegalMonetaryTotal");
    let total_without = totals.and_then(|t| decimal_at(t, "TaxExclusiveAmount"));
    let total_with = totals.and_then(|t| decimal_at(t, "PayableAmount"));
    let sme = text_at(result, "SMEAwardedIndicator").map(|v| flag(&v));

    let mut companies: Vec<AwardedCompany> = result
        .children_named("WinningParty")
        .map(|party| AwardedCompany {
            name: text_at(party, "PartyName/Name"),
            id_type: party
                .find("PartyIdentification/ID")
                .and_then(|id| id.attr("schemeName"))
                .map(str::to_string),
            tax_id: text_at(party, "PartyIdentification/ID"),
            is_sme: sme,
            amount_without_taxes: total_without.clone(),
            amount_with_taxes: total_with.clone(),
        })
        .collect();
    companies.extend(result.children_named("AwardedSupplier").map(read_supplier));

    AwardResult {
        lot_number: text_at(result, "AwardedTenderedProject/ProcurementProjectLotID"),
        status: text_at(result, "ResultCode"),
        award_date: text_at(result, "AwardDate"),
        offers_received: text_at(result, "ReceivedTenderQuantity").and_then(|v| v.parse().ok()),
        lowest_offer: decimal_at(result, "LowerTenderAmount"),
        highest_offer: decimal_at(result, "HigherTenderAmount"),
        abnormally_low_excluded: text_at(result, "AbnormallyLowTendersIndicator").map(|v| flag(&v)),
        contract_number: text_at(result, "Contract/ID"),
        formalization_date: text_at(result, "Contract/IssueDate"),
        entry_into_force_date: text_at(result, "StartDate"),
        companies,
    }
}

fn read_supplier(supplier: &XmlElement) -> AwardedCompany {
    let party = supplier.find("SupplierParty/Party");
    let id = party.and_then(|p| p.find("PartyIdentification/ID"));

    AwardedCompany {
        name: party.and_then(|p| text_at(p, "PartyName/Name")),
        id_type: id.and_then(|i| i.attr("schemeName")).map(str::to_string),
        tax_id: id.and_then(XmlElement::text).map(str::to_string),
        is_sme: text_at(supplier, "SMEIndicator").map(|v| flag(&v)),
        amount_without_taxes: decimal_at(supplier, "AwardAmount/TaxExclusiveAmount"),
        amount_with_taxes: decimal_at(supplier, "AwardAmount/TotalAmount"),
    }
}

/// Key fields of the human-readable summary
///
/// `Id licitación: X; Órgano de Contratación: Y; Importe: Z EUR; Estado: W`
#[derive(Debug, Default, PartialEq)]
pub struct SummaryLine {
    pub id: Option<String>,
    pub authority: Option<String>,
    pub amount: Option<BigDecimal>,
    pub status: Option<String>,
}

impl SummaryLine {
    pub fn parse(summary: &str) -> Self {
        let mut line = SummaryLine::default();
        for part in summary.split(';') {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_lowercase().as_str() {
                "id licitación" | "id licitacion" => line.id = Some(value.to_string()),
                "órgano de contratación" | "organo de contratacion" => {
                    line.authority = Some(value.to_string())
                },
                "importe" => line.amount = parse_decimal(value),
                "estado" => line.status = Some(value.to_string()),
                _ => {},
            }
        }
        line
    }
}

fn fill_from_summary(record: &mut ExtractedRecord, line: &SummaryLine) {
    if record.expedition_number.is_none() {
        record.expedition_number = line.id.clone();
    }
    if record.contracting_authority.is_none() {
        record.contracting_authority = line.authority.clone();
    }
    if record.budget_without_taxes.is_none() {
        record.budget_without_taxes = line.amount.clone();
    }
    if record.status.is_none() {
        record.status = line.status.clone();
    }
}
