// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[test]
fn valid_apply_request() {
    let (id, spec) = JobRequest::new("apply", argv(&["tofu", "apply", "-auto-approve"]))
        .id("job-abc")
        .validate(&SpecLimits::default())
        .unwrap();
    assert_eq!(id, Some(JobId::new("job-abc")));
    assert_eq!(spec.kind, JobKind::Apply);
    assert!(spec.deployment.is_none());
}

#[test]
fn plan_only_carries_deployment() {
    let (id, spec) = JobRequest::new("plan-only", argv(&["tofu", "plan"]))
        .deployment("prod-eu")
        .validate(&SpecLimits::default())
        .unwrap();
    assert!(id.is_none());
    assert_eq!(spec.deployment, Some(DeploymentId::new("prod-eu")));
}

#[yare::parameterized(
    unknown_kind  = { JobRequest::new("import", argv(&["x"])),                       ValidationError::UnknownKind("import".into()) },
    empty_command = { JobRequest::new("apply", vec![]),                              ValidationError::EmptyCommand },
    blank_command = { JobRequest::new("apply", argv(&["  "])),                       ValidationError::EmptyCommand },
    bad_id        = { JobRequest::new("apply", argv(&["x"])).id("a b"),              ValidationError::InvalidId("a b".into()) },
    plan_no_dep   = { JobRequest::new("plan-only", argv(&["x"])),                    ValidationError::MissingDeployment },
    bad_dep       = { JobRequest::new("apply", argv(&["x"])).deployment("a/b"),      ValidationError::InvalidDeploymentId("a/b".into()) },
)]
fn rejected_requests(request: JobRequest, expected: ValidationError) {
    assert_eq!(request.validate(&SpecLimits::default()).unwrap_err(), expected);
}

#[test]
fn payload_limit_is_enforced() {
    let limits = SpecLimits { max_payload_bytes: 4, ..SpecLimits::default() };
    let err = JobRequest::new("apply", argv(&["x"]))
        .payload(vec![0; 5])
        .validate(&limits)
        .unwrap_err();
    assert_eq!(err, ValidationError::PayloadTooLarge { size: 5, limit: 4 });
}

#[test]
fn arg_limit_is_enforced() {
    let limits = SpecLimits { max_command_args: 2, ..SpecLimits::default() };
    let err = JobRequest::new("apply", argv(&["a", "b", "c"])).validate(&limits).unwrap_err();
    assert_eq!(err, ValidationError::TooManyArgs { count: 3, limit: 2 });
}

#[yare::parameterized(
    lower      = { "tf_var_region", true },
    leading_us = { "_PRIVATE", true },
    digit      = { "1BAD", false },
    dash       = { "BAD-NAME", false },
    empty      = { "", false },
)]
fn env_names(name: &str, ok: bool) {
    let env = BTreeMap::from([(name.to_string(), "v".to_string())]);
    let result = JobRequest::new("apply", argv(&["x"])).env(env).validate(&SpecLimits::default());
    assert_eq!(result.is_ok(), ok);
}

#[test]
fn request_deserializes_with_defaults() {
    let req: JobRequest = serde_json::from_str(r#"{"kind":"destroy","command":["tofu","destroy"]}"#).unwrap();
    assert!(req.id.is_none());
    assert!(req.payload.is_empty());
    assert!(req.validate(&SpecLimits::default()).is_ok());
}
