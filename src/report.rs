//! Report Builder: assembles an audit-ready export from a compliance score
//! snapshot and the Finding set it was computed from. Deterministic by
//! construction — every collection is sorted by a stable key and the caller
//! supplies one `generated_at` timestamp used throughout, so two builds of
//! the same inputs produce byte-identical output.
//!
//! The PDF writer is hand-rolled rather than pulled in from a rendering
//! crate — a single-page, fixed-layout document is well within reach of the
//! raw PDF object model and keeps the dependency stack aligned with the
//! rest of the crate (DESIGN.md Open Question decision #3).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::findings::{ComplianceScore, Finding};
use crate::db::Organization;

#[derive(Debug, Clone, Serialize)]
pub struct ReportFinding {
    pub control_id: String,
    pub resource_id: Option<String>,
    pub risk_level: Option<String>,
    pub status: String,
    pub remediation_status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub compliance_frameworks: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub compliance_score: f64,
    pub totals: ReportTotals,
    pub failed_controls: Vec<ReportFinding>,
    pub audit_event_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportTotals {
    pub pass: i64,
    pub fail: i64,
    pub fixed: i64,
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

/// Builds the report model. `findings` should be the FAIL-status subset a
/// caller already fetched via `db::findings::list`; callers that want PASS
/// rows in an appendix can extend this later — the export as defined here
/// names failures plus the score summary.
pub fn build_report(
    organization: &Organization,
    score: &ComplianceScore,
    findings: &[Finding],
    generated_at: DateTime<Utc>,
    audit_event_count: i64,
) -> Report {
    let mut failed: Vec<ReportFinding> = findings
        .iter()
        .filter(|f| f.status == "FAIL")
        .map(|f| ReportFinding {
            control_id: f.control_id.clone(),
            resource_id: f.resource_id.clone(),
            risk_level: f.risk_level.clone(),
            status: f.status.clone(),
            remediation_status: f.remediation_status.clone(),
        })
        .collect();
    failed.sort_by(|a, b| {
        a.control_id
            .cmp(&b.control_id)
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });

    let mut frameworks = organization.compliance_frameworks.clone();
    frameworks.sort();

    Report {
        organization_id: organization.id,
        organization_name: organization.name.clone(),
        compliance_frameworks: frameworks,
        generated_at,
        compliance_score: score.score,
        totals: ReportTotals {
            pass: score.pass,
            fail: score.fail,
            fixed: score.fixed,
            critical: score.by_severity.critical,
            high: score.by_severity.high,
            medium: score.by_severity.medium,
            low: score.by_severity.low,
        },
        failed_controls: failed,
        audit_event_count,
    }
}

/// Deterministic JSON rendering: `serde_json` preserves struct field order
/// and we never serialize a `HashMap`, so the same `Report` value always
/// produces the same bytes.
pub fn render_json(report: &Report) -> Vec<u8> {
    serde_json::to_vec_pretty(report).expect("Report contains no non-serializable values")
}

/// Minimal single-page PDF: one Catalog, one Pages tree, one Page, one
/// Content stream drawn with the built-in Helvetica font. No external
/// layout/rendering crate — every byte here is produced by hand so the
/// file is reproducible for identical input.
pub fn render_pdf(report: &Report) -> Vec<u8> {
    let lines = report_lines(report);
    let content = pdf_content_stream(&lines);

    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push("<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string());
    objects.push(
        "<< /Type /Page /Parent 2 0 R /Resources << /Font << /F1 5 0 R >> >> \
         /MediaBox [0 0 612 792] /Contents 4 0 R >>"
            .to_string(),
    );
    objects.push(format!(
        "<< /Length {} >>\nstream\n{}\nendstream",
        content.len(),
        content
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", index + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

fn report_lines(report: &Report) -> Vec<String> {
    let mut lines = vec![
        format!("Compliance Report: {}", report.organization_name),
        format!("Generated: {}", report.generated_at.to_rfc3339()),
        format!("Frameworks: {}", report.compliance_frameworks.join(", ")),
        format!("Score: {:.2}%", report.compliance_score * 100.0),
        format!(
            "Pass {} / Fail {} / Fixed {}",
            report.totals.pass, report.totals.fail, report.totals.fixed
        ),
        format!(
            "Severity - critical {} high {} medium {} low {}",
            report.totals.critical, report.totals.high, report.totals.medium, report.totals.low
        ),
        format!("Audit events: {}", report.audit_event_count),
        "Failed Controls:".to_string(),
    ];
    for finding in &report.failed_controls {
        lines.push(format!(
            "  {} [{}] resource={} remediation={}",
            finding.control_id,
            finding.risk_level.as_deref().unwrap_or("unknown"),
            finding.resource_id.as_deref().unwrap_or("n/a"),
            finding.remediation_status,
        ));
    }
    lines
}

fn escape_pdf_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

fn pdf_content_stream(lines: &[String]) -> String {
    let mut stream = String::from("BT\n/F1 11 Tf\n14 TL\n72 740 Td\n");
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            stream.push_str("T*\n");
        }
        stream.push_str(&format!("({}) Tj\n", escape_pdf_text(line)));
    }
    stream.push_str("ET");
    stream
}

pub fn content_type_for(format: &str) -> &'static str {
    match format {
        "pdf" => "application/pdf",
        _ => "application/json",
    }
}

pub fn file_extension_for(format: &str) -> &'static str {
    match format {
        "pdf" => "pdf",
        _ => "json",
    }
}

/// Degraded-mode payload returned when the Evidence Store is unreachable —
/// the report is never silently dropped; callers inline the bytes directly
/// in the HTTP response instead of a signed URL.
pub fn degraded_response(report: &Report) -> serde_json::Value {
    json!({
        "degraded": true,
        "reason": "evidence store unavailable, returning report inline",
        "report": report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::findings::SeverityBreakdown;

    fn sample_org() -> Organization {
        Organization {
            id: Uuid::new_v4(),
            name: "Acme Corp".to_string(),
            compliance_frameworks: vec!["SOC2".to_string(), "PCI-DSS".to_string()],
            contact_email: "compliance@acme.test".to_string(),
            industry: Some("fintech".to_string()),
            settings: json!({}),
            created_at: Utc::now(),
        }
    }

    fn sample_score() -> ComplianceScore {
        ComplianceScore {
            score: 0.8,
            total: 10,
            pass: 7,
            fail: 2,
            fixed: 1,
            by_severity: SeverityBreakdown {
                critical: 1,
                high: 1,
                medium: 0,
                low: 0,
            },
        }
    }

    #[test]
    fn json_render_is_byte_identical_for_identical_inputs() {
        let org = sample_org();
        let score = sample_score();
        let generated_at = Utc::now();
        let report_a = build_report(&org, &score, &[], generated_at, 3);
        let report_b = build_report(&org, &score, &[], generated_at, 3);
        assert_eq!(render_json(&report_a), render_json(&report_b));
    }

    #[test]
    fn pdf_render_is_byte_identical_for_identical_inputs() {
        let org = sample_org();
        let score = sample_score();
        let generated_at = Utc::now();
        let report = build_report(&org, &score, &[], generated_at, 3);
        assert_eq!(render_pdf(&report), render_pdf(&report));
    }

    #[test]
    fn pdf_bytes_start_with_pdf_header() {
        let org = sample_org();
        let score = sample_score();
        let report = build_report(&org, &score, &[], Utc::now(), 3);
        let bytes = render_pdf(&report);
        assert!(bytes.starts_with(b"%PDF-1.4"));
    }
}
