//! Portal page extraction
//!
//! Pure functions from HTML text to structured values. Every selector
//! lookup goes through [`sel`] so a bad pattern surfaces as a
//! [`PageError`] instead of a panic. The portal inlines its download
//! form inside a `$("#bloco_modal").html("...")` script call, so that
//! fragment has to be unescaped before it can be parsed like a page.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

use crate::error::PageError;
use crate::types::ListingRow;

/// Anti-forgery and identity fields scraped from the creation page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreationForm {
    /// Value of the `csrf-token` meta tag
    pub csrf_token: String,
    /// Hidden `token` input inside the form
    pub form_token: String,
    /// Hidden `id_pessoa` input identifying the company on the portal
    pub person_id: String,
    /// Form action URL, relative to the portal base
    pub action: String,
    /// Base64 payload of the inline captcha image
    pub captcha_image_b64: String,
}

/// Captcha challenge extracted from a download modal fragment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadChallenge {
    /// Form action URL, relative to the portal base
    pub action: String,
    /// Hidden `token` input inside the modal form
    pub token: String,
    /// Base64 payload of the inline captcha image
    pub captcha_image_b64: String,
}

fn sel(pattern: &'static str) -> Result<Selector, PageError> {
    Selector::parse(pattern).map_err(|e| PageError::Selector(format!("{pattern}: {e}")))
}

fn inline_image_b64(root: &Html, selector: &Selector) -> Option<String> {
    root.select(selector)
        .filter_map(|img| img.value().attr("src"))
        .find_map(|src| src.strip_prefix("data:image/png;base64,"))
        .map(str::to_string)
}

fn input_value(scope: &Html, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .filter_map(|input| input.value().attr("value"))
        .map(str::to_string)
        .next()
}

/// Extract the creation form from the new-request page.
pub fn extract_creation_form(html: &str) -> Result<CreationForm, PageError> {
    let document = Html::parse_document(html);

    let csrf_token = document
        .select(&sel(r#"meta[name="csrf-token"]"#)?)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::to_string)
        .next()
        .ok_or(PageError::MissingElement("csrf-token meta"))?;

    let form_token = input_value(&document, &sel(r#"input[name="token"]"#)?)
        .ok_or(PageError::MissingElement("token input"))?;
    let person_id = input_value(&document, &sel(r#"input[name="id_pessoa"]"#)?)
        .ok_or(PageError::MissingElement("id_pessoa input"))?;

    let action = document
        .select(&sel("form#frm_solicitacao")?)
        .filter_map(|form| form.value().attr("action"))
        .map(str::to_string)
        .next()
        .ok_or(PageError::MissingElement("creation form"))?;

    let captcha_image_b64 =
        inline_image_b64(&document, &sel(r#"img[src^="data:image/png;base64"]"#)?)
            .ok_or(PageError::MissingElement("captcha image"))?;

    Ok(CreationForm {
        csrf_token,
        form_token,
        person_id,
        action,
        captcha_image_b64,
    })
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

// Both patterns are literals; a parse failure is unreachable.
#[allow(clippy::unwrap_used)]
fn detail_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/solicitacoes/detalhes/(\d+)").unwrap())
}

/// Parse the request listing table.
///
/// The table carries its column layout in the header row; column order
/// is resolved by header text so cosmetic reordering on the portal side
/// does not break the scan. Rows without a detail link are skipped.
pub fn extract_listing(html: &str) -> Result<Vec<ListingRow>, PageError> {
    let document = Html::parse_document(html);
    let table_sel = sel("table.table-hover")?;
    let header_sel = sel("thead th")?;
    let row_sel = sel("tbody tr")?;
    let cell_sel = sel("td")?;
    let link_sel = sel("a[href]")?;

    let table = document
        .select(&table_sel)
        .next()
        .ok_or(PageError::MissingElement("listing table"))?;

    let headers: Vec<String> = table
        .select(&header_sel)
        .map(|th| cell_text(th).to_uppercase())
        .collect();
    let col = |name: &str| headers.iter().position(|h| h.contains(name));
    let (issued_col, kind_col, state_col) = match (col("DATA"), col("DOCUMENTO"), col("ESTADO")) {
        (Some(d), Some(k), Some(s)) => (d, k, s),
        _ => return Err(PageError::MissingHeaders),
    };

    let mut rows = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        if cells.len() <= issued_col.max(kind_col).max(state_col) {
            continue;
        }

        let id = row
            .select(&link_sel)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| detail_id_regex().captures(href))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        let Some(id) = id else { continue };

        rows.push(ListingRow {
            id,
            kind_label: cell_text(cells[kind_col]),
            state_label: cell_text(cells[state_col]),
            issued_label: cell_text(cells[issued_col]),
        });
    }
    Ok(rows)
}

/// Scrape the key/value tables on a request detail page.
///
/// Returns the period label and the company tax document when present;
/// detail pages for some request kinds omit one or both.
pub fn extract_detail(html: &str) -> Result<(Option<String>, Option<String>), PageError> {
    let document = Html::parse_document(html);
    let table_sel = sel(r#"table[class*="table-xxs"]"#)?;
    let row_sel = sel("tr")?;
    let cell_sel = sel("td, th")?;

    let mut period = None;
    let mut tax_document = None;
    for table in document.select(&table_sel) {
        for row in table.select(&row_sel) {
            let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
            if cells.len() < 2 {
                continue;
            }
            let key = cells[0].to_uppercase();
            let value = cells[1].clone();
            if key.contains("PERÍODO") || key.contains("PERIODO") {
                period.get_or_insert(value);
            } else if key.contains("CNPJ") || key.contains("CPF") {
                tax_document.get_or_insert(value);
            }
        }
    }
    Ok((period, tax_document))
}

/// Find the captcha-gated download link on a detail page, if any.
pub fn extract_download_link(html: &str) -> Result<Option<String>, PageError> {
    let document = Html::parse_document(html);
    Ok(document
        .select(&sel(r#"a.link-detalhe[href*="get_captcha_download"]"#)?)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .next())
}

// One pattern per quote style; the regex crate has no backreferences,
// so the closing quote cannot be matched against the opening one.
#[allow(clippy::unwrap_used)]
fn modal_regexes() -> &'static [Regex; 2] {
    static RES: OnceLock<[Regex; 2]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r#"(?s)\$\(["']#bloco_modal["']\)\.html\("((?:[^"\\]|\\.)*)"\)"#).unwrap(),
            Regex::new(r#"(?s)\$\(["']#bloco_modal["']\)\.html\('((?:[^'\\]|\\.)*)'\)"#).unwrap(),
        ]
    })
}

fn unescape_js_fragment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Extract the embedded modal markup from the challenge response.
///
/// The portal answers the download link with a script that injects the
/// captcha form into `#bloco_modal`. If the expected injection call is
/// absent, the body itself is accepted when it already looks like the
/// form, which the portal serves directly on some request kinds.
pub fn extract_modal_fragment(body: &str) -> Result<String, PageError> {
    for re in modal_regexes() {
        if let Some(caps) = re.captures(body) {
            let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Ok(unescape_js_fragment(raw));
        }
    }
    if body.contains("<form") && body.contains("captcha_resposta") {
        return Ok(body.to_string());
    }
    Err(PageError::MalformedModal)
}

/// Parse the download challenge out of an unescaped modal fragment.
pub fn extract_download_challenge(fragment: &str) -> Result<DownloadChallenge, PageError> {
    let document = Html::parse_document(fragment);

    let action = document
        .select(&sel("form[action]")?)
        .filter_map(|form| form.value().attr("action"))
        .map(str::to_string)
        .next()
        .ok_or(PageError::MissingElement("modal form"))?;

    let token = input_value(&document, &sel(r#"input[name="token"]"#)?)
        .ok_or(PageError::MissingElement("modal token input"))?;

    let captcha_image_b64 =
        inline_image_b64(&document, &sel(r#"img[src^="data:image/png;base64"]"#)?)
            .ok_or(PageError::MissingElement("modal captcha image"))?;

    Ok(DownloadChallenge {
        action,
        token,
        captcha_image_b64,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const CREATION_PAGE: &str = r#"
        <html><head><meta name="csrf-token" content="csrf-abc"></head><body>
        <form id="frm_solicitacao" action="/solicitacoes/criar" method="post">
          <input type="hidden" name="token" value="tok-123">
          <input type="hidden" name="id_pessoa" value="9981">
          <img src="data:image/png;base64,aW1hZ2U=" alt="captcha">
        </form>
        </body></html>"#;

    #[test]
    fn creation_form_is_extracted() {
        let form = extract_creation_form(CREATION_PAGE).unwrap();
        assert_eq!(form.csrf_token, "csrf-abc");
        assert_eq!(form.form_token, "tok-123");
        assert_eq!(form.person_id, "9981");
        assert_eq!(form.action, "/solicitacoes/criar");
        assert_eq!(form.captcha_image_b64, "aW1hZ2U=");
    }

    #[test]
    fn creation_form_without_captcha_fails() {
        let html = CREATION_PAGE.replace("data:image/png;base64,aW1hZ2U=", "/static/logo.png");
        let err = extract_creation_form(&html).unwrap_err();
        assert_eq!(err, PageError::MissingElement("captcha image"));
    }

    fn listing_page(rows: &str) -> String {
        format!(
            r#"<table class="table table-hover">
              <thead><tr><th>Data</th><th>Documento</th><th>Estado</th><th>Ações</th></tr></thead>
              <tbody>{rows}</tbody></table>"#
        )
    }

    #[test]
    fn listing_rows_are_parsed_by_header_position() {
        let html = listing_page(
            r#"<tr><td>01/02/2025</td><td>NF-e</td><td>Download Disponível</td>
                 <td><a href="/solicitacoes/detalhes/512">ver</a></td></tr>
               <tr><td>02/02/2025</td><td>CT-e</td><td>Gerando</td>
                 <td><a href="/solicitacoes/detalhes/513">ver</a></td></tr>"#,
        );
        let rows = extract_listing(&html).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 512);
        assert_eq!(rows[0].kind_label, "NF-e");
        assert_eq!(rows[0].state_label, "Download Disponível");
        assert_eq!(rows[1].id, 513);
    }

    #[test]
    fn listing_rows_without_a_detail_link_are_skipped() {
        let html = listing_page(
            r#"<tr><td>01/02/2025</td><td>NF-e</td><td>Gerando</td><td></td></tr>"#,
        );
        assert!(extract_listing(&html).unwrap().is_empty());
    }

    #[test]
    fn listing_with_unknown_headers_fails() {
        let html = r#"<table class="table-hover">
            <thead><tr><th>Foo</th><th>Bar</th></tr></thead><tbody></tbody></table>"#;
        assert_eq!(extract_listing(html).unwrap_err(), PageError::MissingHeaders);
    }

    #[test]
    fn detail_tables_yield_period_and_tax_document() {
        let html = r#"
            <table class="table table-xxs">
              <tr><td>Período</td><td>01/01/2025 a 31/01/2025</td></tr>
              <tr><td>CNPJ</td><td>12.345.678/0001-99</td></tr>
            </table>"#;
        let (period, doc) = extract_detail(html).unwrap();
        assert_eq!(period.as_deref(), Some("01/01/2025 a 31/01/2025"));
        assert_eq!(doc.as_deref(), Some("12.345.678/0001-99"));
    }

    #[test]
    fn detail_fields_may_be_absent() {
        let html = r#"<table class="table-xxs"><tr><td>Situação</td><td>Ok</td></tr></table>"#;
        assert_eq!(extract_detail(html).unwrap(), (None, None));
    }

    #[test]
    fn download_link_is_optional() {
        let with = r#"<a class="btn link-detalhe" href="/solicitacoes/get_captcha_download/512">baixar</a>"#;
        assert_eq!(
            extract_download_link(with).unwrap().as_deref(),
            Some("/solicitacoes/get_captcha_download/512")
        );
        assert_eq!(extract_download_link("<p>nada</p>").unwrap(), None);
    }

    #[test]
    fn modal_fragment_is_unescaped_from_the_script_call() {
        let body = r##"$("#bloco_modal").html("<form action=\"/solicitacoes/download\">\n<input name=\"token\" value=\"t1\">\n<\/form>")"##;
        let fragment = extract_modal_fragment(body).unwrap();
        assert!(fragment.contains(r#"<form action="/solicitacoes/download">"#));
        assert!(fragment.contains("</form>"));
    }

    #[test]
    fn modal_fragment_accepts_single_quoted_injection() {
        let body = r##"$('#bloco_modal').html('<form action="/solicitacoes/download">\n<input name="token" value="t1">\n<\/form>')"##;
        let fragment = extract_modal_fragment(body).unwrap();
        assert!(fragment.contains(r#"<form action="/solicitacoes/download">"#));
        assert!(fragment.contains("</form>"));
    }

    #[test]
    fn raw_form_body_is_accepted_as_a_modal() {
        let body = r#"<form action="/x"><input name="captcha_resposta"></form>"#;
        assert_eq!(extract_modal_fragment(body).unwrap(), body);
    }

    #[test]
    fn non_modal_body_is_rejected() {
        assert_eq!(
            extract_modal_fragment("<html>erro</html>").unwrap_err(),
            PageError::MalformedModal
        );
    }

    #[test]
    fn download_challenge_is_extracted_from_a_fragment() {
        let fragment = r#"
            <form action="/solicitacoes/download/512" method="post">
              <input type="hidden" name="token" value="dl-tok">
              <img src="data:image/png;base64,cGljdHVyZQ==">
              <input type="text" name="captcha_resposta">
            </form>"#;
        let challenge = extract_download_challenge(fragment).unwrap();
        assert_eq!(challenge.action, "/solicitacoes/download/512");
        assert_eq!(challenge.token, "dl-tok");
        assert_eq!(challenge.captcha_image_b64, "cGljdHVyZQ==");
    }
}
