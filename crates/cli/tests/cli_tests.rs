//! CLI integration tests

use std::process::{Command, Output};

use mockito::Matcher;

fn guardctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_guardctl"))
        .args(args)
        .env_remove("GUARDCTL_API_URL")
        // Keep the user's config file out of the picture
        .env("GUARDCTL_CONFIG", "/nonexistent/guardctl/config.json")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute guardctl")
}

fn guardctl_against(server: &mockito::Server, args: &[&str]) -> Output {
    let url = server.url();
    let mut full = vec!["--api-url", url.as_str()];
    full.extend_from_slice(args);
    guardctl(&full)
}

const INCIDENT_JSON: &str = r#"{
    "id": "3f2b8c1e-9d4a-4e5b-8a7c-1b2c3d4e5f60",
    "type": "dependency_failure",
    "severity": "high",
    "status": "in_progress",
    "title": "Dependency legacy-erp unavailable",
    "target": "legacy-erp",
    "origin": {"kind": "breaker"},
    "created_at": "2024-03-01T12:00:00Z",
    "actions": [
        {"action": "check_dependency", "timestamp": "2024-03-01T12:00:01Z", "outcome": "succeeded"}
    ]
}"#;

#[test]
fn test_cli_help() {
    let output = guardctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("resilience control plane"));
    for command in ["status", "breakers", "transitions", "incidents", "recover", "attempts"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
    assert!(stdout.contains("--format"));
    assert!(stdout.contains("--api-url"));
    assert!(stdout.contains("GUARDCTL_API_URL"));
}

#[test]
fn test_cli_version() {
    let output = guardctl(&["--version"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("guardctl"));
}

#[test]
fn test_incidents_open_help() {
    let output = guardctl(&["incidents", "open", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--type"));
    assert!(stdout.contains("--severity"));
    assert!(stdout.contains("--target"));
}

#[test]
fn test_missing_argument() {
    let output = guardctl(&["breakers", "reset"]);

    assert!(!output.status.success(), "Missing argument should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required") || stderr.contains("error"));
}

#[test]
fn test_breakers_list_table() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/breakers")
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"dependency": "legacy-erp", "state": "open", "failures": 0, "successes": 0,
                 "last_transition": "2024-03-01T12:00:00Z", "probation": false}]"#,
        )
        .create();

    let output = guardctl_against(&server, &["breakers", "list"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success());
    assert!(stdout.contains("legacy-erp"));
    assert!(stdout.contains("open"));
    assert!(stdout.contains("2024-03-01 12:00:00"));
}

#[test]
fn test_breaker_reset_posts() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/breakers/legacy-erp/reset")
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"seq": 4, "dependency": "legacy-erp", "from": "open", "to": "closed",
                "cause": "manual", "at": "2024-03-01T12:05:00Z"}"#,
        )
        .create();

    let output = guardctl_against(&server, &["breakers", "reset", "legacy-erp"]);

    mock.assert();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("open -> closed"));
}

#[test]
fn test_transitions_filter_by_dependency() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/transitions")
        .match_query(Matcher::UrlEncoded("dependency".into(), "geo".into()))
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create();

    let output = guardctl_against(&server, &["transitions", "--dependency", "geo"]);

    mock.assert();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No transitions"));
}

#[test]
fn test_incidents_list_json_passes_through() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/incidents")
        .match_query(Matcher::UrlEncoded("active".into(), "true".into()))
        .with_header("content-type", "application/json")
        .with_body(format!("[{}]", INCIDENT_JSON))
        .create();

    let output = guardctl_against(&server, &["--format", "json", "incidents", "list", "--active"]);

    mock.assert();
    assert!(output.status.success());
    let incidents: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(incidents[0]["type"], "dependency_failure");
    assert_eq!(incidents[0]["target"], "legacy-erp");
}

#[test]
fn test_incident_show_prints_timeline() {
    let mut server = mockito::Server::new();
    let detail = INCIDENT_JSON.trim_end().trim_end_matches('}').to_string()
        + r#", "history": [
            {"seq": 0, "incident_id": "x", "from": null, "to": "open", "at": "2024-03-01T12:00:00Z"},
            {"seq": 1, "incident_id": "x", "from": "open", "to": "in_progress", "at": "2024-03-01T12:00:01Z"}
        ], "attempts": []}"#;
    server
        .mock("GET", "/api/v1/incidents/3f2b8c1e")
        .with_header("content-type", "application/json")
        .with_body(detail)
        .create();

    let output = guardctl_against(&server, &["incidents", "show", "3f2b8c1e"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Dependency legacy-erp unavailable"));
    assert!(stdout.contains("check_dependency"));
    assert!(stdout.contains("open -> in_progress"));
}

#[test]
fn test_incident_open_sends_type_and_severity() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/incidents")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "type": "security-event",
            "severity": "critical"
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(INCIDENT_JSON)
        .create();

    let output = guardctl_against(
        &server,
        &["incidents", "open", "--type", "security-event", "--severity", "critical"],
    );

    mock.assert();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Opened"));
}

#[test]
fn test_resolve_conflict_reports_api_error() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/api/v1/incidents/abc/resolve")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "incident not found: abc"}"#)
        .create();

    let output = guardctl_against(&server, &["incidents", "resolve", "abc"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("404"));
    assert!(stderr.contains("incident not found: abc"));
}

#[test]
fn test_recover_timeout_still_shows_attempt() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/recovery")
        .match_body(Matcher::PartialJson(serde_json::json!({ "incident_id": "inc-7" })))
        .with_status(504)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id": "a1", "incident_id": "inc-7", "procedure": "scale_out",
                "started_at": "2024-03-01T12:00:00Z", "completed_at": "2024-03-01T12:00:30Z",
                "success": false, "automatic": false, "timed_out": true,
                "error": "recovery for incident inc-7 timed out after 30s"}"#,
        )
        .create();

    let output = guardctl_against(&server, &["recover", "--incident", "inc-7"]);

    mock.assert();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));
}

#[test]
fn test_status_overview() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/v1/status")
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "health": {
                    "status": "degraded",
                    "latest": {"timestamp": "2024-03-01T12:00:00Z", "cpu": 0.92, "memory": 0.4,
                               "error_rate": 0.0, "avg_response_time_ms": 12.5, "request_count": 40,
                               "dependencies": {"legacy-erp": {"error_rate": 1.0,
                                   "avg_response_time_ms": 900.0, "request_count": 4}}},
                    "breached": ["cpu"],
                    "ring": {"samples": 1, "capacity": 360, "evicted": 0, "oldest": null, "newest": null}
                },
                "breakers": [],
                "active_incidents": 1,
                "rate_limiter_degraded": true,
                "recovery_attempts": 0
            }"#,
        )
        .create();

    let output = guardctl_against(&server, &["status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("degraded"));
    assert!(stdout.contains("92.0%"));
    assert!(stdout.contains("counter store"));
    assert!(stdout.contains("legacy-erp"));
    assert!(stdout.contains("100.0% errors"));
}

#[test]
fn test_unreachable_agent_fails() {
    let output = guardctl(&["--api-url", "http://127.0.0.1:9", "status"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to send request"));
}
