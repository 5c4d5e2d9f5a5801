//! Autonomous community inference from authority names

/// Communities and the place names that identify them, matched in order
const REGION_KEYWORDS: &[(&str, &[&str])] = &[
    ("Andalucía", &["andalucía", "andalucia", "andalusia", "sevilla", "córdoba", "málaga", "cádiz", "huelva", "jaén", "almería", "granada"]),
    ("Aragón", &["aragón", "aragon", "zaragoza", "huesca", "teruel"]),
    ("Asturias", &["asturias", "oviedo", "gijón"]),
    ("Illes Balears", &["balears", "baleares", "balear", "palma de mallorca", "mallorca", "menorca", "ibiza", "eivissa", "formentera"]),
    ("País Vasco", &["país vasco", "pais vasco", "euskadi", "basque", "bilbao", "vizcaya", "bizkaia", "guipúzcoa", "gipuzkoa", "álava", "araba"]),
    ("Canarias", &["canarias", "canary", "tenerife", "lanzarote", "fuerteventura", "la gomera", "el hierro"]),
    ("Cantabria", &["cantabria", "santander"]),
    ("Castilla-La Mancha", &["castilla-la mancha", "castilla la mancha", "cuenca", "guadalajara", "toledo", "ciudad real", "albacete"]),
    ("Castilla y León", &["castilla y león", "castilla y leon", "valladolid", "burgos", "león", "salamanca", "segovia", "soria", "palencia", "zamora", "ávila"]),
    ("Cataluña", &["cataluña", "catalunya", "catalonia", "barcelona", "girona", "lleida", "tarragona"]),
    ("Comunidad de Madrid", &["madrid"]),
    ("Comunidad Foral de Navarra", &["navarra", "navarre", "nafarroa", "pamplona", "iruña"]),
    ("Extremadura", &["extremadura", "badajoz", "cáceres"]),
    ("Galicia", &["galicia", "a coruña", "coruña", "lugo", "ourense", "orense", "pontevedra", "santiago de compostela", "vigo"]),
    ("La Rioja", &["rioja", "logroño"]),
    ("Región de Murcia", &["murcia", "cartagena"]),
    ("Comunitat Valenciana", &["valencia", "valenciana", "valència", "alicante", "alacant", "castellón", "castelló"]),
];

/// Community whose keyword appears in `authority`, or empty when none does
pub fn infer_region(authority: &str) -> String {
    let lowered = authority.to_lowercase();
    REGION_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(region, _)| region.to_string())
        .unwrap_or_default()
}

pub fn regions() -> impl Iterator<Item = &'static str> {
    REGION_KEYWORDS.iter().map(|(region, _)| *region)
}
