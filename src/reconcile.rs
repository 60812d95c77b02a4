//! Request catalog reconciliation
//!
//! Pure decision logic: given the normalized remote requests and their
//! detail fields, decide which single request represents each document
//! kind for the target period and which kinds have no usable request at
//! all. No I/O happens here; the portal module feeds this with already
//! scraped data so the selection rules stay trivially testable.

use std::collections::HashMap;

use tracing::debug;

use crate::period::ReportingPeriod;
use crate::types::{DocumentKind, DocumentRequest, RequestDetail};
use crate::utils::{digits_only, norm_text};

/// Outcome of reconciling the remote catalog against one target period
#[derive(Clone, Debug, Default)]
pub struct Reconciliation {
    /// Best candidate per document kind, by (state weight, id)
    pub selected: HashMap<DocumentKind, DocumentRequest>,
    /// Kinds with no matching request; these need a creation attempt
    pub missing: Vec<DocumentKind>,
}

impl Reconciliation {
    /// Requests already in a downloadable state, in fixed download order.
    pub fn downloadable(&self) -> Vec<&DocumentRequest> {
        DocumentKind::DOWNLOAD_ORDER
            .iter()
            .filter_map(|kind| self.selected.get(kind))
            .filter(|request| request.state.is_downloadable())
            .collect()
    }
}

fn matches_period(detail: &RequestDetail, period: &ReportingPeriod) -> bool {
    // The detail page renders the span verbatim; anything but the exact
    // "start a end" pair belongs to a different reporting window.
    detail
        .period
        .as_deref()
        .is_some_and(|label| norm_text(label) == period.label())
}

fn matches_company(detail: &RequestDetail, tax_digits: &str) -> bool {
    match detail.tax_document.as_deref() {
        // Some detail layouts omit the document field entirely; those
        // requests are accepted, matching how the catalog behaves when
        // the session is already scoped to one certificate.
        None => true,
        Some(raw) => digits_only(raw) == tax_digits,
    }
}

/// Reconcile the remote request catalog against a target period.
///
/// For every document kind the candidate with the lexicographically
/// greatest `(state weight, id)` pair wins, so a downloadable request
/// always beats a failed one and newer requests break ties.
pub fn reconcile(
    requests: &[(DocumentRequest, RequestDetail)],
    period: &ReportingPeriod,
    tax_digits: &str,
) -> Reconciliation {
    let mut selected: HashMap<DocumentKind, DocumentRequest> = HashMap::new();

    for (request, detail) in requests {
        if !matches_period(detail, period) || !matches_company(detail, tax_digits) {
            continue;
        }
        let better = selected
            .get(&request.kind)
            .is_none_or(|current| {
                (request.state.weight(), request.id) > (current.state.weight(), current.id)
            });
        if better {
            selected.insert(request.kind, request.clone());
        }
    }

    let missing: Vec<DocumentKind> = DocumentKind::ALL
        .iter()
        .copied()
        .filter(|kind| !selected.contains_key(kind))
        .collect();

    debug!(
        selected = selected.len(),
        missing = missing.len(),
        period = %period.label(),
        "catalog reconciled"
    );
    Reconciliation { selected, missing }
}
