use flywall::core::errors::{ErrorKind, FlywallError};
use flywall::core::protocol::{RequestEnvelope, ResponseEnvelope};
use serde_json::json;

#[test]
fn test_every_variant_maps_to_exactly_one_kind() {
    let cases = [
        (FlywallError::Validation("v".into()), ErrorKind::Validation),
        (FlywallError::ConfigParse("p".into()), ErrorKind::Validation),
        (FlywallError::ChecksumMismatch, ErrorKind::Validation),
        (FlywallError::NotFound("n".into()), ErrorKind::NotFound),
        (FlywallError::UnknownMethod("m".into()), ErrorKind::NotFound),
        (FlywallError::Conflict("c".into()), ErrorKind::Conflict),
        (FlywallError::InvalidState("s".into()), ErrorKind::Conflict),
        (FlywallError::Permission("p".into()), ErrorKind::Permission),
        (FlywallError::Unavailable("u".into()), ErrorKind::Unavailable),
        (FlywallError::Timeout("t".into()), ErrorKind::Timeout),
        (FlywallError::Internal("i".into()), ErrorKind::Internal),
        (
            FlywallError::HookFailed {
                name: "h".into(),
                message: "m".into(),
            },
            ErrorKind::Internal,
        ),
    ];
    for (error, kind) in cases {
        assert_eq!(error.kind(), kind, "{error}");
    }
}

#[test]
fn test_error_round_trips_through_wire_form() {
    let original = FlywallError::NotFound("backup 7".into());
    let envelope = ResponseEnvelope::err(3, &original);
    let back = envelope.into_result().unwrap_err();
    assert_eq!(back.kind(), ErrorKind::NotFound);
    assert!(back.to_string().contains("backup 7"));
}

#[test]
fn test_ok_envelope_carries_result() {
    let envelope = ResponseEnvelope::ok(1, json!({ "n": 42 }));
    let value = envelope.into_result().unwrap();
    assert_eq!(value["n"], 42);
}

#[test]
fn test_request_envelope_defaults_missing_args() {
    let request: RequestEnvelope =
        serde_json::from_str(r#"{"id": 5, "method": "status"}"#).unwrap();
    assert_eq!(request.id, 5);
    assert!(request.args.is_null());
}

#[test]
fn test_architecture_mismatch_message_is_greppable() {
    let error = FlywallError::ArchitectureMismatch {
        host: "linux/x86_64".into(),
        binary: "linux/unknown".into(),
    };
    assert!(error.to_string().contains("architecture mismatch"));
    assert_eq!(error.kind(), ErrorKind::Validation);
}
