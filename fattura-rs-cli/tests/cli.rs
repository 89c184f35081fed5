use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn cli_exe() -> &'static str {
    env!("CARGO_BIN_EXE_fattura-rs-cli")
}

fn core_fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("fattura-core")
        .join("tests")
        .join("fixtures")
}

fn invoice_fixture(name: &str) -> PathBuf {
    core_fixtures().join("invoices").join(name)
}

/// Properties file pointing at the fixture schemas, with no verifier.
fn write_config(dir: &Path) -> PathBuf {
    write_config_with(dir, "")
}

fn write_config_with(dir: &Path, extra: &str) -> PathBuf {
    let schemas = core_fixtures().join("schemas");
    let properties = format!(
        "schema.v1.0={}\nschema.v1.1={}\nschema.v1.2={}\n{extra}",
        schemas.join("fatturapa_v1.0.xsd").display(),
        schemas.join("fatturapa_v1.1.xsd").display(),
        schemas.join("fatturapa_v1.2.xsd").display(),
    );
    let path = dir.join("fattura.properties");
    std::fs::write(&path, properties).expect("write config");
    path
}

fn rules_fixture() -> PathBuf {
    core_fixtures().join("rules").join("fattura-rules.sch")
}

fn run(args: &[&str]) -> Output {
    Command::new(cli_exe())
        .args(args)
        .env_remove("FATTURA_VERIFIER_URL")
        .env_remove("FATTURA_LOG")
        .output()
        .expect("run cli")
}

#[test]
fn detect_prints_versions() {
    let plain = invoice_fixture("fattura-v1.1.xml");
    let signed = invoice_fixture("fattura-v1.2-signed.xml");
    let output = run(&[
        "detect",
        "--invoice",
        plain.to_str().unwrap(),
        signed.to_str().unwrap(),
    ]);

    assert!(
        output.status.success(),
        "detect failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("\t1.1"), "{stdout}");
    assert!(lines[1].ends_with("\t1.2-signed"), "{stdout}");
}

#[test]
fn detect_rejects_unknown_dialects() {
    let fixture = invoice_fixture("fattura-ubl.xml");
    let output = run(&["detect", "--invoice", fixture.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fattura-ubl.xml"), "{stderr}");
}

#[test]
fn validate_reports_each_invoice_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let valid = invoice_fixture("fattura-v1.0.xml");
    let invalid = invoice_fixture("fattura-v1.2-missing-progressivo.xml");
    let output = run(&[
        "validate",
        "--config",
        config.to_str().unwrap(),
        "--invoice",
        valid.to_str().unwrap(),
        invalid.to_str().unwrap(),
    ]);

    assert!(!output.status.success(), "an invalid invoice must fail the run");
    let payload = serde_json::from_slice::<serde_json::Value>(&output.stdout)
        .expect("parse json output");
    let reports = payload.as_array().expect("array");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["valid"], true);
    assert_eq!(reports[0]["result"]["version"], "1.0");
    assert_eq!(reports[1]["valid"], false);
    assert!(
        !reports[1]["result"]["violations"]
            .as_array()
            .expect("violations")
            .is_empty()
    );
}

#[test]
fn validate_without_verifier_marks_signature_unchecked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let signed = invoice_fixture("fattura-v1.1-signed.xml");
    let output = run(&[
        "validate",
        "--config",
        config.to_str().unwrap(),
        "--invoice",
        signed.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    let payload = serde_json::from_slice::<serde_json::Value>(&output.stdout)
        .expect("parse json output");
    let signature = &payload[0]["result"]["signature"];
    assert_eq!(signature["certificateOk"], false);
    assert_eq!(signature["signatureOk"], false);
    assert!(signature["error"].is_string(), "{signature}");
    assert_eq!(
        payload[0]["result"]["violations"],
        serde_json::json!([]),
        "structure is still checked"
    );
}

#[test]
fn validate_fails_fast_without_schemas() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = invoice_fixture("fattura-v1.0.xml");
    let output = Command::new(cli_exe())
        .args(["validate", "--invoice", fixture.to_str().unwrap()])
        .current_dir(dir.path())
        .env_remove("FATTURA_VERIFIER_URL")
        .output()
        .expect("run cli");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("set schema.v1.0"), "{stderr}");
}

#[test]
fn rules_fails_fast_with_unusable_transform_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config_with(dir.path(), "transform.command=/nonexistent/xsltproc\n");
    let invoice = invoice_fixture("fattura-v1.2.xml");
    let rules = rules_fixture();
    let output = run(&[
        "rules",
        "--config",
        config.to_str().unwrap(),
        "--invoice",
        invoice.to_str().unwrap(),
        "--rules",
        rules.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/xsltproc"), "{stderr}");
}

#[test]
fn render_rejects_missing_configured_stylesheet() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config_with(dir.path(), "render.v1.1=missing-v11.xsl\n");
    let invoice = invoice_fixture("fattura-v1.1.xml");
    let output = run(&[
        "render",
        "--config",
        config.to_str().unwrap(),
        "--invoice",
        invoice.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing-v11.xsl"), "{stderr}");
}

#[test]
#[ignore = "needs xsltproc"]
fn rules_prints_findings_for_consistent_invoice() {
    let invoice = invoice_fixture("fattura-v1.2.xml");
    let rules = rules_fixture();
    let output = run(&[
        "rules",
        "--invoice",
        invoice.to_str().unwrap(),
        "--rules",
        rules.to_str().unwrap(),
    ]);

    assert!(
        output.status.success(),
        "rules failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let findings = serde_json::from_slice::<serde_json::Value>(&output.stdout)
        .expect("parse json output");
    let findings = findings.as_array().expect("array");
    assert!(!findings.is_empty());
    assert!(findings.iter().all(|f| f["severity"] != "fail"), "{findings:?}");
}

#[test]
#[ignore = "needs xsltproc"]
fn rules_exits_nonzero_on_failed_assertions() {
    let invoice = invoice_fixture("fattura-v1.2-bad-totals.xml");
    let rules = rules_fixture();
    let output = run(&[
        "rules",
        "--invoice",
        invoice.to_str().unwrap(),
        "--rules",
        rules.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    let findings = serde_json::from_slice::<serde_json::Value>(&output.stdout)
        .expect("parse json output");
    let failed: Vec<&str> = findings
        .as_array()
        .expect("array")
        .iter()
        .filter(|f| f["severity"] == "fail")
        .filter_map(|f| f["rule"].as_str())
        .collect();
    assert_eq!(failed, ["BR-DOC-TOTAL", "BR-TAXABLE", "BR-LINE-TOTAL"]);
}

#[test]
#[ignore = "needs xsltproc"]
fn render_writes_html_to_output_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("fattura.html");
    let invoice = invoice_fixture("fattura-v1.2-signed.xml");
    let output = run(&[
        "render",
        "--invoice",
        invoice.to_str().unwrap(),
        "--output",
        target.to_str().unwrap(),
    ]);

    assert!(
        output.status.success(),
        "render failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty());
    let html = std::fs::read_to_string(&target).expect("read html");
    assert!(html.contains("Rossi Forniture S.r.l."), "{html}");
    assert!(html.contains("firmato digitalmente"), "{html}");
}

#[test]
#[ignore = "needs xsltproc"]
fn render_uses_configured_stylesheet() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = core_fixtures().join("stylesheets").join("summary.xsl");
    let config = write_config_with(dir.path(), &format!("render.v1.2={}\n", summary.display()));
    let invoice = invoice_fixture("fattura-v1.2.xml");
    let output = run(&[
        "render",
        "--config",
        config.to_str().unwrap(),
        "--invoice",
        invoice.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "FatturaPA 1.2 n. 2024/001 totale 146.40\n\n"
    );
}
