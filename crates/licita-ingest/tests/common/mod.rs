//! Shared fixtures for integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use licita_ingest::config::{HttpSettings, IngestConfig};
use std::io::{Cursor, Write};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

pub const ARCHIVE_DIR: &str = "/datosabiertos";

/// Legacy licitacion document as it appears, escaped, inside `<content>`
pub fn licitacion(object: Option<&str>, budget: &str, status: &str, procedure: &str) -> String {
    let object = object
        .map(|o| format!("<objetoContrato>{}</objetoContrato>", o))
        .unwrap_or_default();
    format!(
        "<licitacion>{object}<estado>{status}</estado>\
         <presupuestoSinImpuestos>{budget}</presupuestoSinImpuestos>\
         <tipoProcedimiento>{procedure}</tipoProcedimiento>\
         <organoContratacion>Ayuntamiento de Sevilla</organoContratacion>\
         <fechaPrimeraPublicacion>29/11/2025</fechaPrimeraPublicacion>\
         </licitacion>"
    )
}

fn escape(markup: &str) -> String {
    markup.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// One Atom entry; `None` leaves the element out
pub fn entry(id: Option<&str>, title: Option<&str>, content: &str) -> String {
    let id = id.map(|i| format!("<id>{}</id>", i)).unwrap_or_default();
    let title = title.map(|t| format!("<title>{}</title>", t)).unwrap_or_default();
    format!(
        r#"<entry>{id}{title}<updated>2025-11-29T10:00:00+01:00</updated>
<link href="https://contrataciondelestado.es/wps/poc?uri=deeplink:detalle_licitacion"/>
<content type="text">{}</content></entry>"#,
        escape(content)
    )
}

pub fn feed(id: &str, previous: Option<&str>, entries: &[String]) -> String {
    let link = previous
        .map(|p| format!(r#"<link rel="previous-archive" href="{}"/>"#, p))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><id>{id}</id><title>Licitaciones</title>{link}
{}</feed>"#,
        entries.concat()
    )
}

/// Zip container holding `(name, content)` files
pub fn zip_of(files: &[(&str, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn index_page(files: &[&str]) -> String {
    let links: String = files
        .iter()
        .map(|f| format!(r#"<li><a href="{}">{}</a></li>"#, f, f))
        .collect();
    format!("<html><body><ul>{}<li><a href=\"readme.txt\">readme</a></li></ul></body></html>", links)
}

/// Serve an index page listing `archives` and each archive body
pub async fn serve_listing(server: &MockServer, archives: Vec<(&str, Vec<u8>)>) {
    let names: Vec<&str> = archives.iter().map(|(name, _)| *name).collect();
    Mock::given(method("GET"))
        .and(path(format!("{}/index.html", ARCHIVE_DIR)))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page(&names)))
        .mount(server)
        .await;

    for (name, body) in archives {
        Mock::given(method("GET"))
            .and(path(format!("{}/{}", ARCHIVE_DIR, name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }
}

/// Configuration pointing every URL at the mock server
pub fn config_for(server: &MockServer) -> IngestConfig {
    let listing = format!("{}{}/index.html", server.uri(), ARCHIVE_DIR);
    IngestConfig {
        http: HttpSettings {
            max_retries: 0,
            ..HttpSettings::default()
        },
        syndication_url: listing.clone(),
        listing_url: listing,
        bulletin_url: format!("{}/sumario", server.uri()),
        ..IngestConfig::default()
    }
}
