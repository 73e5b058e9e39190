use filament::http::parser::{ParseStatus, RequestParser};
use filament::http::request::Request;

fn parse_all(raw: &[u8]) -> (ParseStatus, usize, Request) {
    let mut parser = RequestParser::new();
    let mut req = Request::new();
    let (status, consumed) = parser.parse(&mut req, raw);
    (status, consumed, req)
}

#[test]
fn test_parse_simple_get_request() {
    let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (status, consumed, req) = parse_all(raw);

    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(consumed, raw.len());
    assert_eq!(req.method, "GET");
    assert_eq!(req.uri, "/");
    assert_eq!(req.http_version_major, 1);
    assert_eq!(req.http_version_minor, 1);
    assert_eq!(req.header("Host"), Some("example.com"));
}

#[test]
fn test_parse_stops_before_body() {
    let raw = b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
    let (status, consumed, req) = parse_all(raw);

    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(&raw[consumed..], b"hello");
    assert!(req.body.is_empty());
    assert_eq!(req.content_length(), Some(5));
}

#[test]
fn test_parse_multiple_headers_keep_order() {
    let raw = b"GET /path HTTP/1.0\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: */*\r\n\r\n";
    let (_, _, req) = parse_all(raw);

    let names: Vec<_> = req.headers.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, ["Host", "User-Agent", "Accept"]);
    assert_eq!(req.header("accept"), Some("*/*"));
    assert_eq!(req.http_version_minor, 0);
}

#[test]
fn test_parse_uri_keeps_query_string() {
    let (_, _, req) = parse_all(b"GET /search?q=rust HTTP/1.1\r\n\r\n");
    assert_eq!(req.uri, "/search?q=rust");
}

#[test]
fn test_parse_incomplete_request_consumes_everything() {
    let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
    let (status, consumed, req) = parse_all(raw);

    assert_eq!(status, ParseStatus::NeedMoreData);
    assert_eq!(consumed, raw.len());
    assert_eq!(req.header("Host"), Some("example.com"));
}

#[test]
fn test_parse_any_split_matches_single_feed() {
    let raw: &[u8] = b"POST /upload?x=1 HTTP/1.1\r\nHost: a.example\r\nX-Folded: one\r\n  two\r\nContent-Length: 0\r\n\r\n";
    let (expected_status, _, expected) = parse_all(raw);
    assert_eq!(expected_status, ParseStatus::Complete);

    for first in 1..raw.len() {
        for second in first..raw.len() {
            let mut parser = RequestParser::new();
            let mut req = Request::new();
            let mut last = ParseStatus::NeedMoreData;
            for chunk in [&raw[..first], &raw[first..second], &raw[second..]] {
                if chunk.is_empty() {
                    continue;
                }
                let (status, consumed) = parser.parse(&mut req, chunk);
                assert_eq!(consumed, chunk.len());
                last = status;
            }
            assert_eq!(last, ParseStatus::Complete, "split at {first}/{second}");
            assert_eq!(req, expected, "split at {first}/{second}");
        }
    }
}

#[test]
fn test_parse_control_char_in_method_is_invalid_immediately() {
    let raw = b"GE\x01T / HTTP/1.1\r\n\r\n";
    let (status, consumed, _) = parse_all(raw);

    assert_eq!(status, ParseStatus::Invalid);
    assert_eq!(consumed, 3);
}

#[test]
fn test_parse_separator_in_method_is_invalid() {
    let (status, _, _) = parse_all(b"G(ET / HTTP/1.1\r\n\r\n");
    assert_eq!(status, ParseStatus::Invalid);
}

#[test]
fn test_parse_malformed_header_line() {
    let (status, _, _) = parse_all(b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n");
    assert_eq!(status, ParseStatus::Invalid);
}

#[test]
fn test_parse_header_needs_space_after_colon() {
    let (status, _, _) = parse_all(b"GET / HTTP/1.1\r\nHost:x\r\n\r\n");
    assert_eq!(status, ParseStatus::Invalid);
}

#[test]
fn test_parse_bad_protocol_name() {
    let (status, _, _) = parse_all(b"GET / HTTX/1.1\r\n\r\n");
    assert_eq!(status, ParseStatus::Invalid);
}

#[test]
fn test_parse_multi_digit_version() {
    let (status, _, req) = parse_all(b"GET / HTTP/12.34\r\n\r\n");

    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(req.http_version_major, 12);
    assert_eq!(req.http_version_minor, 34);
}

#[test]
fn test_parse_missing_final_newline_is_invalid() {
    let (status, _, _) = parse_all(b"GET / HTTP/1.1\r\n\rX");
    assert_eq!(status, ParseStatus::Invalid);
}

#[test]
fn test_parse_folded_continuation_without_header_is_invalid() {
    let (status, _, _) = parse_all(b"GET / HTTP/1.1\r\n continued\r\n\r\n");
    assert_eq!(status, ParseStatus::Invalid);
}

#[test]
fn test_parse_line_folding_appends_to_previous_value() {
    let (status, _, req) = parse_all(b"GET / HTTP/1.1\r\nX-Long: first\r\n\tsecond\r\n\r\n");

    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(req.headers.len(), 1);
    assert_eq!(req.header("X-Long"), Some("firstsecond"));
}

#[test]
fn test_parse_utf8_uri_bytes_survive_chunking() {
    let raw = "GET /caf\u{e9} HTTP/1.1\r\n\r\n".as_bytes();
    let split = raw.iter().position(|&b| b >= 0x80).unwrap() + 1;

    let mut parser = RequestParser::new();
    let mut req = Request::new();
    parser.parse(&mut req, &raw[..split]);
    let (status, _) = parser.parse(&mut req, &raw[split..]);

    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(req.uri, "/caf\u{e9}");
}

#[test]
fn test_parser_reset_starts_over() {
    let mut parser = RequestParser::new();
    let mut req = Request::new();
    parser.parse(&mut req, b"GET /first HTTP/1.1\r\nA: 1\r\n\r\n");

    parser.reset();
    req.reset();
    let (status, _) = parser.parse(&mut req, b"PUT /second HTTP/1.1\r\n\r\n");

    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(req.method, "PUT");
    assert!(req.headers.is_empty());
}
