//! Mapping of source codes and free text onto the canonical enumerations

use licita_common::{ContractStatus, ContractType, ProcedureType};

/// Procedure from a numeric source code or free text; unrecognised → OPEN
pub fn map_procedure(raw: Option<&str>) -> ProcedureType {
    let code = raw.unwrap_or_default().trim().to_lowercase();
    match code.as_str() {
        "" | "1" => return ProcedureType::Open,
        "2" => return ProcedureType::Restricted,
        "3" => return ProcedureType::Negotiated,
        "4" | "5" => return ProcedureType::CompetitiveDialogue,
        _ => {},
    }

    if contains_any(&code, &["abierto", "open"]) {
        ProcedureType::Open
    } else if contains_any(&code, &["restringido", "restricted"]) {
        ProcedureType::Restricted
    } else if contains_any(&code, &["negociado", "negotiated"]) {
        ProcedureType::Negotiated
    } else if contains_any(&code, &["menor", "minor"]) {
        ProcedureType::Minor
    } else if contains_any(&code, &["diálogo", "dialogo", "dialogue"]) {
        ProcedureType::CompetitiveDialogue
    } else {
        ProcedureType::Open
    }
}

/// Status from a source status code or free text
///
/// Empty or unrecognised input yields `default`, which depends on the source.
pub fn map_status(raw: Option<&str>, default: ContractStatus) -> ContractStatus {
    let code = raw.unwrap_or_default().trim().to_uppercase();
    match code.as_str() {
        "" => return default,
        "PUB" | "EV" => return ContractStatus::Published,
        "ADJ" | "RES" => return ContractStatus::Awarded,
        "EJE" => return ContractStatus::InProgress,
        "ANUL" | "FAL" | "CAN" | "REV" => return ContractStatus::Cancelled,
        "PRE" => return ContractStatus::Draft,
        _ => {},
    }

    let text = code.to_lowercase();
    if contains_any(&text, &["cancelled", "cancelado", "anulad", "desiert"]) {
        ContractStatus::Cancelled
    } else if contains_any(&text, &["awarded", "adjudicad", "resuelt", "formalizad"]) {
        ContractStatus::Awarded
    } else if contains_any(&text, &["completed", "finalizad", "cerrad"]) {
        ContractStatus::Completed
    } else if contains_any(&text, &["progress", "ejecución", "ejecucion"]) {
        ContractStatus::InProgress
    } else if contains_any(&text, &["published", "publicad", "en plazo"]) {
        ContractStatus::Published
    } else if contains_any(&text, &["anuncio previo", "draft", "borrador"]) {
        ContractStatus::Draft
    } else {
        default
    }
}

/// Contract type from the type field and the title
///
/// CODICE numeric type codes are honoured first; otherwise keywords are
/// matched across both texts.
pub fn map_contract_type(type_field: Option<&str>, title: &str) -> ContractType {
    let type_field = type_field.unwrap_or_default().trim().to_lowercase();
    match type_field.as_str() {
        "1" => return ContractType::Supplies,
        "2" => return ContractType::Services,
        "3" => return ContractType::Works,
        _ => {},
    }

    let combined = format!("{} {}", type_field, title.to_lowercase());
    if contains_any(&combined, &["mixto", "mixed"]) {
        ContractType::Mixed
    } else if contains_any(&combined, &["obra", "construcción", "construccion", "infraestructura", "work"]) {
        ContractType::Works
    } else if contains_any(&combined, &["servicio", "asistencia", "consultoría", "consultoria", "service"]) {
        ContractType::Services
    } else if contains_any(&combined, &["suministro", "material", "equipo", "supply", "supplies"]) {
        ContractType::Supplies
    } else {
        ContractType::Other
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
