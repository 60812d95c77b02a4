//! Service-invoice feed scanning
//!
//! Walks the national NFS-e distribution feed cursor by cursor, decodes
//! whatever document payloads each page embeds, and keeps the XML whose
//! competency date falls inside the target period. The feed hides its
//! documents at arbitrary depths of the JSON envelope, sometimes as
//! plain markup, sometimes base64, sometimes base64 over gzip, so the
//! decoder tries each shape in turn.

use std::io::Read;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::FeedFlowConfig;
use crate::error::{Error, Result};
use crate::period::ReportingPeriod;
use crate::types::ArchiveEntry;

/// What one feed scan produced
#[derive(Clone, Debug, Default)]
pub struct ScanOutcome {
    /// Cursors that answered with a parseable page
    pub processed: u64,
    /// Documents whose competency date fell inside the period
    pub matched: u64,
    /// Archive entries: matched documents plus the raw page audits
    pub entries: Vec<ArchiveEntry>,
}

/// Client for one company's view of the distribution feed
pub struct FeedScanner {
    client: Client,
    base: Url,
    start_cursor: u64,
    max_count: u64,
}

impl FeedScanner {
    /// Build a scanner over a certificate-bound client.
    pub fn new(config: &FeedFlowConfig, client: Client) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid feed base url: {e}"),
            key: None,
        })?;
        Ok(Self {
            client,
            base,
            start_cursor: config.start_cursor,
            max_count: config.max_count,
        })
    }

    fn cursor_url(&self, cursor: u64, tax_digits: &str) -> Result<Url> {
        let mut url = self
            .base
            .join(&format!("/contribuintes/DFe/{cursor}"))
            .map_err(|e| Error::Other(format!("invalid feed path: {e}")))?;
        url.query_pairs_mut().append_pair("cnpjConsulta", tax_digits);
        Ok(url)
    }

    /// Scan the feed window for one company.
    ///
    /// The scan stops at the first empty cursor (HTTP 204) or when the
    /// window is exhausted. A cursor that fails for any other reason is
    /// skipped, never retried; the next cycle revisits the whole window
    /// anyway.
    pub async fn scan(&self, tax_digits: &str, period: &ReportingPeriod) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        for cursor in self.start_cursor..self.start_cursor + self.max_count {
            let response = match self
                .client
                .get(self.cursor_url(cursor, tax_digits)?)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(cursor, error = %e, "feed cursor unreachable, skipping");
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::NO_CONTENT {
                debug!(cursor, "feed exhausted");
                break;
            }
            if status.as_u16() >= 400 {
                warn!(cursor, status = status.as_u16(), "feed cursor rejected, skipping");
                continue;
            }
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if !content_type.contains("json") {
                warn!(cursor, %content_type, "feed cursor not JSON, skipping");
                continue;
            }
            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(cursor, error = %e, "feed cursor body unreadable, skipping");
                    continue;
                }
            };
            let envelope: Value = match serde_json::from_str(&body) {
                Ok(v) => v,
                Err(e) => {
                    warn!(cursor, error = %e, "feed cursor unparseable, skipping");
                    continue;
                }
            };

            outcome.processed += 1;
            let audit = serde_json::to_vec_pretty(&envelope).unwrap_or_else(|_| body.into_bytes());
            outcome.entries.push(ArchiveEntry {
                name: format!("nsu_{cursor}_raw.json"),
                bytes: audit,
            });

            let mut documents = Vec::new();
            collect_documents(&envelope, &mut documents);
            let total = documents.len();
            for (i, xml) in documents.into_iter().enumerate() {
                if !document_in_period(&xml, period) {
                    continue;
                }
                outcome.matched += 1;
                outcome.entries.push(ArchiveEntry {
                    name: format!("NFS-e_{cursor}_{}_{total}.xml", i + 1),
                    bytes: xml.into_bytes(),
                });
            }
        }

        info!(
            processed = outcome.processed,
            matched = outcome.matched,
            "feed scan finished"
        );
        Ok(outcome)
    }
}

/// Decode one embedded payload into markup, if it is one.
///
/// Payloads arrive as literal XML, base64 of XML, or base64 of a gzip
/// stream of XML. Anything that decodes to non-UTF-8 is kept lossily,
/// matching how the feed's own viewer treats it.
pub fn decode_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('<') {
        return Some(trimmed.to_string());
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = BASE64.decode(compact.as_bytes()).ok()?;

    if decoded.starts_with(&[0x1f, 0x8b]) {
        let mut inflated = Vec::new();
        let mut decoder = GzDecoder::new(decoded.as_slice());
        if decoder.read_to_end(&mut inflated).is_ok() {
            return Some(String::from_utf8_lossy(&inflated).into_owned());
        }
        return None;
    }

    let text = String::from_utf8_lossy(&decoded);
    if text.trim_start().starts_with('<') {
        Some(text.into_owned())
    } else {
        None
    }
}

/// Walk a feed envelope and collect every decodable document payload.
///
/// Only string values of JSON objects are candidates; strings sitting
/// directly inside arrays are envelope metadata, never documents.
pub fn collect_documents(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for child in map.values() {
                if let Value::String(s) = child {
                    if let Some(xml) = decode_candidate(s) {
                        out.push(xml);
                    }
                } else {
                    collect_documents(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_documents(item, out);
            }
        }
        _ => {}
    }
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.len() < 10 {
        return None;
    }
    NaiveDate::parse_from_str(&trimmed[..10], "%Y-%m-%d").ok()
}

/// Decide whether a document's competency date falls inside the period.
///
/// Every element whose local name mentions a competency or date field
/// is checked; the document matches when any of them parses to a date
/// inside the period. Documents exposing no parseable date at all are
/// discarded.
pub fn document_in_period(xml: &str, period: &ReportingPeriod) -> bool {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut in_date_element = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_lowercase();
                in_date_element = name.contains("compet") || name.contains("data");
            }
            Ok(Event::Text(text)) if in_date_element => {
                if let Some(date) = text.unescape().ok().and_then(|t| parse_date_text(&t)) {
                    if date >= period.start && date <= period.end {
                        return true;
                    }
                }
            }
            Ok(Event::End(_)) => in_date_element = false,
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    false
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn period() -> ReportingPeriod {
        ReportingPeriod {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        }
    }

    const IN_PERIOD: &str =
        "<NFSe><infNFSe><dhProc>2025-01-15T10:00:00</dhProc><competencia>2025-01-15</competencia></infNFSe></NFSe>";
    const OUT_OF_PERIOD: &str =
        "<NFSe><competencia>2024-12-30</competencia></NFSe>";

    fn gzip_b64(text: &str) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        BASE64.encode(encoder.finish().unwrap())
    }

    #[test]
    fn markup_passes_through_untouched() {
        assert_eq!(decode_candidate("  <xml/>  ").unwrap(), "<xml/>");
    }

    #[test]
    fn base64_xml_is_decoded() {
        let encoded = BASE64.encode(IN_PERIOD);
        assert_eq!(decode_candidate(&encoded).unwrap(), IN_PERIOD);
    }

    #[test]
    fn gzipped_base64_xml_is_inflated() {
        assert_eq!(decode_candidate(&gzip_b64(IN_PERIOD)).unwrap(), IN_PERIOD);
    }

    #[test]
    fn non_document_strings_are_rejected() {
        assert!(decode_candidate("").is_none());
        assert!(decode_candidate("plain text").is_none());
        // valid base64 of non-markup bytes
        assert!(decode_candidate(&BASE64.encode("hello world")).is_none());
    }

    #[test]
    fn documents_are_collected_from_nested_objects_only() {
        let envelope = json!({
            "LoteDFe": [
                { "ArquivoXml": BASE64.encode(IN_PERIOD), "NSU": "12" },
                { "outer": { "ArquivoXml": gzip_b64(OUT_OF_PERIOD) } },
            ],
            // a bare string in an array is metadata, never a document
            "avisos": [BASE64.encode(IN_PERIOD)],
        });
        let mut docs = Vec::new();
        collect_documents(&envelope, &mut docs);
        assert_eq!(docs, vec![IN_PERIOD.to_string(), OUT_OF_PERIOD.to_string()]);
    }

    #[test]
    fn competency_date_decides_period_membership() {
        let p = period();
        assert!(document_in_period(IN_PERIOD, &p));
        assert!(!document_in_period(OUT_OF_PERIOD, &p));
        // documents without any date element are discarded
        assert!(!document_in_period("<NFSe><valor>10</valor></NFSe>", &p));
    }

    #[test]
    fn any_date_inside_the_period_matches() {
        // An out-of-range emission date must not veto an in-range
        // competency that appears later in the document.
        let xml = "<NFSe><dataEmissao>2024-12-28</dataEmissao>\
                   <competencia>2025-01-10</competencia></NFSe>";
        assert!(document_in_period(xml, &period()));
    }

    async fn scanner_for(server: &MockServer) -> FeedScanner {
        let config = FeedFlowConfig {
            base_url: server.uri(),
            start_cursor: 0,
            max_count: 400,
            ..Default::default()
        };
        FeedScanner::new(&config, Client::new()).unwrap()
    }

    #[tokio::test]
    async fn scan_stops_at_the_first_empty_cursor() {
        let server = MockServer::start().await;
        for cursor in 0..2 {
            Mock::given(method("GET"))
                .and(path(format!("/contribuintes/DFe/{cursor}")))
                .and(query_param("cnpjConsulta", "12345678000199"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "LoteDFe": [{ "ArquivoXml": BASE64.encode(IN_PERIOD) }],
                })))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/contribuintes/DFe/2"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = scanner_for(&server)
            .await
            .scan("12345678000199", &period())
            .await
            .unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.matched, 2);
        // two raw audits plus two matched documents
        assert_eq!(outcome.entries.len(), 4);
        assert_eq!(outcome.entries[0].name, "nsu_0_raw.json");
        assert_eq!(outcome.entries[1].name, "NFS-e_0_1_1.xml");
    }

    #[tokio::test]
    async fn failing_cursors_are_skipped_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contribuintes/DFe/0"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contribuintes/DFe/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "LoteDFe": [{ "ArquivoXml": BASE64.encode(OUT_OF_PERIOD) }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contribuintes/DFe/2"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = scanner_for(&server)
            .await
            .scan("12345678000199", &period())
            .await
            .unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.matched, 0);
        // the raw audit is kept even when nothing matches
        assert_eq!(outcome.entries.len(), 1);
    }

    #[tokio::test]
    async fn non_json_cursors_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contribuintes/DFe/0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>manutenção</html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contribuintes/DFe/1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = scanner_for(&server)
            .await
            .scan("12345678000199", &period())
            .await
            .unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(outcome.entries.is_empty());
    }
}
