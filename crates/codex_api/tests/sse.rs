use codex_api::events::CodexStreamEvent;
use codex_api::SseStreamParser;
use pretty_assertions::assert_eq;

fn text_done(sequence: u64, text: &str) -> String {
    format!(
        "event: response.output_text.done\ndata: {{\"type\":\"response.output_text.done\",\"sequence_number\":{sequence},\"item_id\":\"msg_1\",\"output_index\":0,\"content_index\":0,\"text\":\"{text}\",\"logprobs\":[]}}\n\n"
    )
}

#[test]
fn one_malformed_block_in_ten_yields_nine_events() {
    let mut body = String::new();
    for index in 0..10 {
        if index == 4 {
            body.push_str("event: response.output_text.done\ndata: {not json at all\n\n");
        } else {
            body.push_str(&text_done(index, &format!("t{index}")));
        }
    }

    let mut parser = SseStreamParser::default();
    let events = parser.feed(body.as_bytes());

    assert_eq!(events.len(), 9);
    assert_eq!(parser.skipped(), 1);
    assert!(events.iter().all(|event| matches!(event, CodexStreamEvent::OutputTextDone { .. })));
}

#[test]
fn known_type_with_wrong_shape_is_skipped_not_fatal() {
    let valid = text_done(2, "kept");
    let invalid = valid.replacen("\"content_index\":0,", "", 1);
    let body = format!("{invalid}{valid}");

    let mut parser = SseStreamParser::default();
    let events = parser.feed(body.as_bytes());
    assert_eq!(events.len(), 1);
    assert_eq!(parser.skipped(), 1);
}

#[test]
fn crlf_line_endings_are_accepted() {
    let body = text_done(1, "hi").replace('\n', "\r\n");
    let events = SseStreamParser::parse_frames(&body);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], CodexStreamEvent::OutputTextDone { text, .. } if text == "hi"));
}

#[test]
fn utf8_split_across_chunks_decodes_once_complete() {
    let body = text_done(1, "héllo wörld");
    let bytes = body.as_bytes();
    let split = body.find('é').expect("accent present") + 1;

    let mut parser = SseStreamParser::default();
    let mut events = parser.feed(&bytes[..split]);
    assert!(events.is_empty());
    events.extend(parser.feed(&bytes[split..]));

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], CodexStreamEvent::OutputTextDone { text, .. } if text == "héllo wörld"));
}

#[test]
fn trailing_block_without_blank_line_is_flushed_on_finish() {
    let body = text_done(3, "tail");
    let body = body.trim_end_matches('\n');

    let mut parser = SseStreamParser::default();
    assert!(parser.feed(body.as_bytes()).is_empty());
    let events = parser.finish();
    assert_eq!(events.len(), 1);
}

#[test]
fn done_sentinel_and_comment_lines_are_ignored() {
    let body = format!(": keep-alive\n\n{}data: [DONE]\n\n", text_done(1, "x"));
    let events = SseStreamParser::parse_frames(&body);
    assert_eq!(events.len(), 1);
}

#[test]
fn unknown_event_types_pass_through_as_generic() {
    let events = SseStreamParser::parse_frames(
        "data: {\"type\":\"response.reasoning_text.delta\",\"delta\":\"x\"}\n\n",
    );
    assert_eq!(events.len(), 1);
    match &events[0] {
        CodexStreamEvent::Generic { event_type, payload } => {
            assert_eq!(event_type, "response.reasoning_text.delta");
            assert_eq!(payload["delta"], "x");
        }
        other => panic!("expected generic event, got {other:?}"),
    }
}
