use super::*;
use serde_json::json;

#[test]
fn test_history_round_trip_preserves_part_order() {
    let history = vec![
        Message::user("create a 20mm cube"),
        Message::assistant(vec![
            Part::text("Here is the cube. "),
            Part::tool_call(ToolCallRequest::new(
                "call_1",
                "create_model",
                json!({"geometrySource": "cube([20,20,20]);"}),
            )),
        ]),
        Message::tool_results(vec![ToolCallResult::success(
            "call_1",
            ModelReference {
                document_id: "doc123".into(),
                url: "https://cad.onshape.com/documents/doc123".into(),
                summary: "Created document".into(),
            },
        )]),
        Message::assistant(vec![Part::text("Done: "), Part::text("https://cad.onshape.com/documents/doc123")]),
    ];

    let encoded = serde_json::to_string(&history).unwrap();
    let decoded: Vec<Message> = serde_json::from_str(&encoded).unwrap();

    assert_eq!(decoded, history);
    let replayed: Vec<String> = decoded.iter().map(Message::text).collect();
    assert_eq!(
        replayed,
        vec![
            "create a 20mm cube".to_string(),
            "Here is the cube. ".to_string(),
            String::new(),
            "Done: https://cad.onshape.com/documents/doc123".to_string(),
        ]
    );
}

#[test]
fn test_tool_definition_creation() {
    let def = ToolDefinition::new("create_model", "Create a CAD model", json!({"type": "object"}));
    assert_eq!(def.name, "create_model");
    assert_eq!(def.parameters["type"], "object");
}

#[test]
fn test_failure_outcome_code() {
    let outcome = ToolOutcome::failure(ErrorCode::Timeout, "took too long");
    assert!(!outcome.is_success());
    assert_eq!(ErrorCode::Timeout.to_string(), "timeout");
}
