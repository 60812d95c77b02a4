//! Core domain types
//!
//! The three fiscal document kinds, the lifecycle states of remote bundle
//! requests, company profiles loaded from the registry, and the small value
//! types passed between the flows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::{digits_only, norm_text};

/// The three fixed kinds of fiscal document bundle the portal serves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Electronic invoice (NF-e)
    Nfe,
    /// Electronic transport document (CT-e)
    Cte,
    /// Electronic consumer invoice (NFC-e)
    Nfce,
}

impl DocumentKind {
    /// Creation order: new requests are opened in this sequence.
    pub const ALL: [DocumentKind; 3] = [DocumentKind::Nfe, DocumentKind::Cte, DocumentKind::Nfce];

    /// Download order used when draining ready bundles.
    pub const DOWNLOAD_ORDER: [DocumentKind; 3] =
        [DocumentKind::Cte, DocumentKind::Nfce, DocumentKind::Nfe];

    /// Normalize a free-text type label from the listing page.
    ///
    /// Labels vary ("NF-e", "NFE", "Conhecimento de Transporte", ...); an
    /// unrecognized label means the row is dropped from reconciliation.
    /// "NFC" is checked inside the NF-e branch because every NFC-e label
    /// also contains "NF".
    pub fn normalize(label: &str) -> Option<Self> {
        let t = norm_text(label).to_uppercase();
        if t.is_empty() {
            return None;
        }
        if t.contains("CTE") || t.contains("CT-E") || t.contains("CONHECIMENTO") {
            return Some(DocumentKind::Cte);
        }
        if t.contains("NFCE") || t.contains("NFC-E") || t.contains("CONSUMIDOR") {
            return Some(DocumentKind::Nfce);
        }
        if t.contains("NFE") || t.contains("NF-E") || t.contains("NOTA FISCAL") {
            if t.contains("NFC") {
                return Some(DocumentKind::Nfce);
            }
            return Some(DocumentKind::Nfe);
        }
        None
    }

    /// The numeric code the creation form expects for this kind.
    pub fn form_code(self) -> &'static str {
        match self {
            DocumentKind::Nfe => "0",
            DocumentKind::Cte => "1",
            DocumentKind::Nfce => "2",
        }
    }

    /// Canonical short label, used in logs and derived file names.
    pub fn label(self) -> &'static str {
        match self {
            DocumentKind::Nfe => "NFe",
            DocumentKind::Cte => "CTe",
            DocumentKind::Nfce => "NFCe",
        }
    }
}

/// Lifecycle state of a remote bundle request, normalized from free text
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// The bundle is ready and a download can be attempted
    Downloadable,
    /// The portal is generating the bundle
    Generating,
    /// The request is being processed
    Processing,
    /// The request finished without a downloadable artifact
    Finalized,
    /// The request failed on the portal side
    Errored,
    /// Any label that matches none of the known stages
    Other,
}

impl RequestState {
    /// Normalize a free-text state label.
    pub fn parse(raw: &str) -> Self {
        let e = norm_text(raw).to_uppercase();
        if e.contains("DOWNLOAD") {
            RequestState::Downloadable
        } else if e.contains("GERANDO") {
            RequestState::Generating
        } else if e.contains("PROCESS") {
            RequestState::Processing
        } else if e.contains("FINALIZ") || e.contains("FINAL") {
            RequestState::Finalized
        } else if e.contains("ERRO") || e.contains("FALH") {
            RequestState::Errored
        } else {
            RequestState::Other
        }
    }

    /// Completeness weight used by reconciliation.
    ///
    /// Selection maximizes `(weight, id)` lexicographically, so this total
    /// order is the sole tie-break rule and must stay stable:
    /// downloadable > generating > processing > finalized > errored,
    /// with unknown states ranked between finalized and errored.
    pub fn weight(self) -> u8 {
        match self {
            RequestState::Downloadable => 100,
            RequestState::Generating => 80,
            RequestState::Processing => 60,
            RequestState::Finalized => 50,
            RequestState::Other => 30,
            RequestState::Errored => 10,
        }
    }

    /// Whether the bundle behind this request can be fetched right now.
    pub fn is_downloadable(self) -> bool {
        matches!(self, RequestState::Downloadable)
    }
}

/// One row from the portal's request listing page
#[derive(Clone, Debug)]
pub struct ListingRow {
    /// Numeric identifier embedded in the detail link; unique and
    /// monotonically assigned by the portal
    pub id: u64,
    /// Raw document-type label from the listing column
    pub kind_label: String,
    /// Raw lifecycle-state label from the listing column
    pub state_label: String,
    /// Raw date column, kept for logging only
    pub issued_label: String,
}

impl ListingRow {
    /// Suggested file name for the bundle this row would yield.
    pub fn file_name(&self) -> String {
        format!("{}_{}.zip", self.kind_label, self.id)
            .replace(' ', "_")
            .replace('/', "-")
    }
}

/// A remote bundle request after type/state normalization
#[derive(Clone, Debug)]
pub struct DocumentRequest {
    /// Portal-assigned identifier; higher means more recently created
    pub id: u64,
    /// Normalized document kind
    pub kind: DocumentKind,
    /// Normalized lifecycle state
    pub state: RequestState,
    /// Raw state label, kept for logging
    pub state_label: String,
    /// Suggested file name derived from the listing row
    pub file_name: String,
}

/// Fields exposed by a request's detail page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestDetail {
    /// The authoritative period string, e.g. `01/01/2025 a 31/01/2025`
    pub period: Option<String>,
    /// Digits-only tax document, when the detail table exposes one
    pub tax_document: Option<String>,
}

/// Marker value on a profile meaning "do not process this company"
const OPT_OUT_MARKER: &str = "nao";

/// One client company as loaded from the registry
///
/// Immutable for the duration of one cycle; reloaded fresh on the next.
#[derive(Clone, Debug, Default)]
pub struct CompanyProfile {
    /// Display name
    pub name: String,
    /// Owner/user tag, part of every artifact name
    pub user_tag: String,
    /// Numeric company code, part of every artifact name
    pub code: Option<i64>,
    /// Base64-encoded PEM certificate blob
    pub cert_pem_b64: String,
    /// Base64-encoded PEM private-key blob
    pub key_pem_b64: String,
    /// Tax document as stored (may carry formatting)
    pub tax_document: String,
    /// Certificate expiry date, when the registry knows it
    pub expires_on: Option<NaiveDate>,
    /// Raw processing flag column; a negative marker opts the company out
    pub process_flag: Option<String>,
}

impl CompanyProfile {
    /// Digits-only tax document used for comparisons and names.
    pub fn tax_digits(&self) -> String {
        digits_only(&self.tax_document)
    }

    /// Whether the registry flagged this company as do-not-process.
    ///
    /// The marker is matched case-insensitively with surrounding
    /// whitespace ignored; any other value (or absence) means process.
    pub fn is_opted_out(&self) -> bool {
        self.process_flag
            .as_deref()
            .map(|f| norm_text(f).eq_ignore_ascii_case(OPT_OUT_MARKER))
            .unwrap_or(false)
    }

    /// Whether the certificate expired strictly before `today`.
    ///
    /// An absent or unparseable expiry date counts as not expired; the
    /// portal itself rejects truly dead certificates.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        match self.expires_on {
            Some(d) => d < today,
            None => false,
        }
    }
}

/// A named blob destined for the result archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// File name inside the archive
    pub name: String,
    /// File content
    pub bytes: Vec<u8>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_normalization_recognizes_variants() {
        assert_eq!(DocumentKind::normalize("NF-e"), Some(DocumentKind::Nfe));
        assert_eq!(DocumentKind::normalize("NFE"), Some(DocumentKind::Nfe));
        assert_eq!(
            DocumentKind::normalize("Nota Fiscal Eletrônica"),
            Some(DocumentKind::Nfe)
        );
        assert_eq!(DocumentKind::normalize("CT-e"), Some(DocumentKind::Cte));
        assert_eq!(
            DocumentKind::normalize("Conhecimento de Transporte"),
            Some(DocumentKind::Cte)
        );
        assert_eq!(DocumentKind::normalize("NFC-e"), Some(DocumentKind::Nfce));
        assert_eq!(
            DocumentKind::normalize("Nota Fiscal ao Consumidor"),
            Some(DocumentKind::Nfce)
        );
        assert_eq!(DocumentKind::normalize("boleto"), None);
        assert_eq!(DocumentKind::normalize(""), None);
    }

    #[test]
    fn nfc_inside_nfe_branch_resolves_to_nfce() {
        // A label that matches the NF-e keywords but also carries NFC
        assert_eq!(
            DocumentKind::normalize("NOTA FISCAL NFC"),
            Some(DocumentKind::Nfce)
        );
    }

    #[test]
    fn state_parse_matches_portal_labels() {
        assert_eq!(RequestState::parse("DOWNLOAD"), RequestState::Downloadable);
        assert_eq!(RequestState::parse("Gerando"), RequestState::Generating);
        assert_eq!(
            RequestState::parse("em processamento"),
            RequestState::Processing
        );
        assert_eq!(RequestState::parse("Finalizado"), RequestState::Finalized);
        assert_eq!(RequestState::parse("ERRO"), RequestState::Errored);
        assert_eq!(RequestState::parse("Falhou"), RequestState::Errored);
        assert_eq!(RequestState::parse("aguardando"), RequestState::Other);
    }

    #[test]
    fn state_weights_are_strictly_ordered() {
        let ordered = [
            RequestState::Downloadable,
            RequestState::Generating,
            RequestState::Processing,
            RequestState::Finalized,
            RequestState::Other,
            RequestState::Errored,
        ];
        for pair in ordered.windows(2) {
            assert!(
                pair[0].weight() > pair[1].weight(),
                "{:?} must outrank {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn listing_row_file_name_escapes_separators() {
        let row = ListingRow {
            id: 981,
            kind_label: "NF e/Nota".to_string(),
            state_label: "DOWNLOAD".to_string(),
            issued_label: "01/02/2025".to_string(),
        };
        assert_eq!(row.file_name(), "NF_e-Nota_981.zip");
    }

    #[test]
    fn opt_out_marker_ignores_case_and_whitespace() {
        let mut c = CompanyProfile {
            process_flag: Some("  NAO \t".to_string()),
            ..Default::default()
        };
        assert!(c.is_opted_out());

        c.process_flag = Some("Nao".to_string());
        assert!(c.is_opted_out());

        c.process_flag = Some("sim".to_string());
        assert!(!c.is_opted_out());

        c.process_flag = None;
        assert!(!c.is_opted_out());
    }

    #[test]
    fn expiry_is_strictly_before_today() {
        let today = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        let mut c = CompanyProfile {
            expires_on: Some(NaiveDate::from_ymd_opt(2025, 2, 9).unwrap()),
            ..Default::default()
        };
        assert!(c.is_expired(today));

        // Expiring today is still valid
        c.expires_on = Some(today);
        assert!(!c.is_expired(today));

        c.expires_on = None;
        assert!(!c.is_expired(today));
    }
}
