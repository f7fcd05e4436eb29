//! `egress check`: validates the egress file without touching the network.

use std::fmt::Write as _;
use std::path::Path;

use revtrust_core::{load_egress, EgressFile, MAX_CREDENTIALS};

/// # Errors
///
/// Returns an error if the file is unreadable, malformed, or fails validation.
pub(crate) fn run_egress_check(path: &Path) -> anyhow::Result<()> {
    let egress = load_egress(path)?;
    print!("{}", format_egress_report(path, &egress));
    Ok(())
}

/// Cookies and proxy URLs carry secrets and are never printed.
pub(crate) fn format_egress_report(path: &Path, egress: &EgressFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: ok", path.display());
    let _ = writeln!(
        out,
        "credentials: {} of {MAX_CREDENTIALS}",
        egress.credentials.len()
    );
    for (index, credential) in egress.credentials.iter().enumerate() {
        let label = credential.label.as_deref().unwrap_or("unlabelled");
        let _ = writeln!(out, "  #{index} {label}");
    }

    if egress.routes.is_empty() {
        let _ = writeln!(out, "routes: none configured, using direct");
    } else {
        let _ = writeln!(out, "routes: {}", egress.routes.len());
    }
    for route in egress.routes_or_direct() {
        let _ = writeln!(
            out,
            "  {:<16} {:<12} reliability {:.2}  cost {:.4}  proxy {}  sticky {}",
            route.name,
            route.kind.to_string(),
            route.reliability,
            route.cost_per_use,
            if route.url.is_some() { "yes" } else { "no" },
            if route.sticky_sessions { "yes" } else { "no" },
        );
    }
    out
}
