//! Integration tests for decompose → edit → rebuild round trips.

#![allow(clippy::unwrap_used)]

use mailsplice_mime::encoding::{break_lines, encode_base64};
use mailsplice_mime::{
    Config, Decomposer, Error, LineEnding, MAX_RFC822_DEPTH, Message, MessageBuilder, PartPath,
    PathStep,
};
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn decompose(raw: &[u8]) -> Message {
    init_tracing();
    Decomposer::new().decompose(raw, "").unwrap()
}

fn assert_round_trip(raw: &[u8]) {
    let mut message = decompose(raw);
    let rebuilt = MessageBuilder::new().build(&mut message);
    assert_eq!(
        String::from_utf8_lossy(&rebuilt),
        String::from_utf8_lossy(raw)
    );
}

const MULTIPART: &str = concat!(
    "From: Sender <sender@example.com>\r\n",
    "To: rcpt@example.com\r\n",
    "Subject: Report\r\n",
    "MIME-Version: 1.0\r\n",
    "Content-Type: multipart/mixed;\r\n",
    " boundary=\"==outer==\"\r\n",
    "\r\n",
    "This is a multi-part message in MIME format.\r\n",
    "\r\n",
    "--==outer==\r\n",
    "Content-Type: text/plain; charset=utf-8\r\n",
    "Content-Transfer-Encoding: quoted-printable\r\n",
    "\r\n",
    "Caf=C3=A9 is open.\r\n",
    "\r\n",
    "--==outer==\r\n",
    "Content-Type: multipart/alternative; boundary=inner\r\n",
    "\r\n",
    "--inner\r\n",
    "Content-Type: text/plain\r\n",
    "\r\n",
    "plain\r\n",
    "--inner\r\n",
    "Content-Type: text/html\r\n",
    "\r\n",
    "<p>html</p>\r\n",
    "--inner--\r\n",
    "\r\n",
    "--==outer==\r\n",
    "Content-Type: application/octet-stream; name=\"data.bin\"\r\n",
    "Content-Transfer-Encoding: base64\r\n",
    "\r\n",
    "AAECAwQF\r\n",
    "--==outer==--\r\n",
    "Trailing epilogue text.\r\n",
);

#[test]
fn test_plain_message_round_trip() {
    assert_round_trip(b"From: a@example.com\r\nTo: b@example.com\r\nSubject: Hi\r\n\r\nHello\r\n");
}

#[test]
fn test_folded_header_round_trip() {
    let raw = concat!(
        "Received: from mx.example.com\r\n",
        "\tby relay.example.com with ESMTP;\r\n",
        "    Tue, 1 Jan 2030 00:00:00 +0000\r\n",
        "subject :  Spaced   out  \r\n",
        "\r\n",
        "body\r\n",
    );
    assert_round_trip(raw.as_bytes());

    let message = decompose(raw.as_bytes());
    assert_eq!(
        message.headers().get("Received"),
        Some("from mx.example.com by relay.example.com with ESMTP; Tue, 1 Jan 2030 00:00:00 +0000")
    );
    assert_eq!(message.headers().get("Subject"), Some("Spaced   out"));
    assert_eq!(message.header_order(), ["Received", "subject"]);
}

#[test]
fn test_multipart_round_trip() {
    assert_round_trip(MULTIPART.as_bytes());

    let message = decompose(MULTIPART.as_bytes());
    assert_eq!(message.boundary(), "==outer==");
    assert_eq!(
        message.preamble(),
        b"This is a multi-part message in MIME format.\r\n\r\n"
    );
    assert_eq!(
        message.epilogue(),
        Some(&b"\r\nTrailing epilogue text.\r\n"[..])
    );
    assert_eq!(message.parts().len(), 3);
    assert_eq!(message.parts()[0].body(), b"Caf=C3=A9 is open.\r\n");
    assert_eq!(message.parts()[2].body(), b"AAECAwQF");
}

#[test]
fn test_nested_multipart_structure() {
    let message = decompose(MULTIPART.as_bytes());
    let alternative = &message.parts()[1];

    assert!(alternative.is_multipart());
    assert_eq!(alternative.idx(), "2");
    assert_eq!(alternative.epilogue(), Some(&b"\r\n"[..]));

    let html = &alternative.parts()[1];
    assert_eq!(html.idx(), "2-2");
    assert_eq!(html.body(), b"<p>html</p>");

    let parent = message.resolve(&html.parent().unwrap()).unwrap();
    assert_eq!(parent.boundary(), "inner");

    let structure = message.structure();
    assert!(structure.contains("IDX: 2-2"));
    assert!(structure.contains("Parts: 3"));
}

#[test]
fn test_lf_message_round_trip() {
    let raw = b"Subject: lf\nContent-Type: multipart/mixed; boundary=b\n\n--b\n\none\n--b\nX: 1\n\ntwo\n--b--\n";
    let config = Config::builder().line_ending(LineEnding::Lf).build();

    let mut message = Decomposer::with_config(config).decompose(raw, "").unwrap();
    let rebuilt = MessageBuilder::with_config(config).build(&mut message);
    assert_eq!(rebuilt, raw);
}

#[test]
fn test_nested_base64_rfc822_round_trip() {
    let inner = concat!(
        "From: inner@example.com\r\n",
        "Subject: Forwarded with a subject long enough to wrap the encoding\r\n",
        "Content-Type: multipart/mixed; boundary=fwd\r\n",
        "\r\n",
        "--fwd\r\n",
        "\r\n",
        "forwarded text\r\n",
        "--fwd--\r\n",
    );
    let encoded = break_lines(encode_base64(inner.as_bytes()).as_bytes(), 76, b"\r\n");

    let mut raw = concat!(
        "Subject: Fwd\r\n",
        "Content-Type: multipart/mixed; boundary=top\r\n",
        "\r\n",
        "--top\r\n",
        "Content-Type: message/rfc822\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
    )
    .as_bytes()
    .to_vec();
    raw.extend_from_slice(&encoded);
    raw.extend_from_slice(b"\r\n--top--\r\n");

    assert_round_trip(&raw);

    let message = decompose(&raw);
    let attached = &message.parts()[0];
    assert!(attached.is_rfc822());
    assert!(attached.is_decoded());

    let forwarded = attached.body_message().unwrap();
    assert_eq!(forwarded.idx(), "1-0");
    assert_eq!(forwarded.rfc822_depth(), 1);
    assert_eq!(forwarded.parts()[0].idx(), "1-0-1");
    assert_eq!(forwarded.parts()[0].body(), b"forwarded text");
    assert_eq!(
        forwarded.parts()[0].path(),
        &PartPath::from(vec![
            PathStep::Part(0),
            PathStep::Embedded,
            PathStep::Part(0)
        ])
    );
}

#[test]
fn test_edit_inside_embedded_message() {
    let inner = "Subject: old\r\nX-Keep: yes\r\n\r\ninner";
    let raw = format!(
        "Content-Type: message/rfc822\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
        encode_base64(inner.as_bytes())
    );
    let mut message = decompose(raw.as_bytes());
    let builder = MessageBuilder::new();

    let nested = message.body_message_mut().unwrap();
    builder.set_header_field(nested, "Subject", "new");

    let rebuilt = builder.build(&mut message);
    let reparsed = decompose(&rebuilt);
    let nested = reparsed.body_message().unwrap();
    assert_eq!(
        nested.raw_original_header(),
        b"Subject: new\r\nX-Keep: yes"
    );
    assert_eq!(nested.body(), b"inner");
}

#[test]
fn test_rfc822_depth_bound() {
    let mut raw = b"Subject: innermost\r\n\r\nleaf body".to_vec();
    for level in (0..=MAX_RFC822_DEPTH).rev() {
        let mut wrapped =
            format!("Content-Type: message/rfc822\r\nX-Level: {level}\r\n\r\n").into_bytes();
        wrapped.extend_from_slice(&raw);
        raw = wrapped;
    }

    let message = decompose(&raw);
    let mut node = &message;
    let mut unwrapped = 0;
    while let Some(nested) = node.body_message() {
        unwrapped += 1;
        assert_eq!(nested.rfc822_depth(), unwrapped);
        node = nested;
    }

    assert_eq!(unwrapped, MAX_RFC822_DEPTH);
    assert_eq!(node.headers().get("X-Level"), Some("5"));
    assert!(node.body().starts_with(b"Subject: innermost"));

    assert_round_trip(&raw);
}

#[test]
fn test_three_part_delimiters() {
    let mut message = Message::new();
    message.set_boundary("abc");
    for body in ["one", "two", "three"] {
        let mut part = Message::new();
        part.set_body(body);
        message.add_part(part);
    }

    let built = MessageBuilder::new().build(&mut message);
    let text = String::from_utf8(built).unwrap();
    let lines: Vec<&str> = text.split("\r\n").collect();

    assert_eq!(lines.iter().filter(|line| **line == "--abc").count(), 3);
    assert_eq!(lines.iter().filter(|line| **line == "--abc--").count(), 1);

    let reparsed = decompose(text.as_bytes());
    let bodies: Vec<&[u8]> = reparsed.parts().iter().map(Message::body).collect();
    assert_eq!(bodies, [&b"one"[..], b"two", b"three"]);
}

#[test]
fn test_field_rewrite_first_field() {
    let mut message = decompose(b"A: 1\r\nB: 2\r\n\r\nbody");
    MessageBuilder::new().set_header_field(&mut message, "A", "9");

    assert_eq!(message.headers().get("A"), Some("9"));
    assert_eq!(message.headers().get("B"), Some("2"));
    assert_eq!(message.raw_original_header(), b"A: 9\r\nB: 2");
    assert_eq!(
        MessageBuilder::new().build(&mut message),
        b"A: 9\r\nB: 2\r\n\r\nbody"
    );
}

#[test]
fn test_field_rewrite_last_line_with_terminator() {
    let mut message = decompose(b"A: 1\r\nB: 2\r\n\r\nbody");
    message.set_header_field("b", "3", LineEnding::Crlf);

    assert_eq!(message.raw_original_header(), b"A: 1\r\nb: 3");
    assert_eq!(message.headers().get("B"), Some("3"));
}

#[test]
fn test_field_rewrite_last_line_without_terminator() {
    let mut message = decompose(b"A: 1\r\nB: 2");
    assert_eq!(message.raw_original_header(), b"A: 1\r\nB: 2");

    message.set_header_field("B", "3", LineEnding::Crlf);
    assert_eq!(message.raw_original_header(), b"A: 1\r\nB: 3");
    assert_eq!(message.header_order(), ["A", "B"]);
}

#[test]
fn test_field_rewrite_folded_and_missing() {
    let mut message = decompose(b"To: a,\r\n  b\r\nX-Original-To: c\r\n\r\nbody");
    let builder = MessageBuilder::new();

    builder.set_header_field(&mut message, "To", "d");
    builder.set_header_field(&mut message, "Cc", "e");

    assert_eq!(
        builder.build(&mut message),
        b"To: d\r\nX-Original-To: c\r\nCc: e\r\n\r\nbody"
    );
    assert_eq!(message.header_order(), ["To", "X-Original-To", "Cc"]);
}

#[test]
fn test_edit_one_part_keeps_others() {
    let mut message = decompose(MULTIPART.as_bytes());
    let builder = MessageBuilder::new();

    let part = message.part_mut(2).unwrap();
    builder.set_header_field(part, "Content-Type", "application/pdf");

    let rebuilt = String::from_utf8(builder.build(&mut message)).unwrap();
    let expected = MULTIPART.replace(
        "Content-Type: application/octet-stream; name=\"data.bin\"",
        "Content-Type: application/pdf",
    );
    assert_eq!(rebuilt, expected);
}

#[test]
fn test_merge_replaces_payload() {
    let mut message = decompose(b"Subject: s\r\nX-Old: 1\r\n\r\nold");

    let mut replacement = Message::new();
    replacement.headers_mut().add("X-Old", "");
    replacement.headers_mut().add("X-New", "2");
    replacement.set_body("new");
    message.merge(replacement);

    assert_eq!(
        MessageBuilder::new().build(&mut message),
        b"Subject: s\r\nX-New: 2\r\n\r\nnew"
    );
}

#[test]
fn test_merge_keeps_8bit_fields_untouched() {
    let mut message = decompose(b"Subject: Caf\xe9\r\nX-Old: 1\r\n\r\nbody");

    let mut replacement = Message::new();
    replacement.headers_mut().add("X-Old", "2");
    replacement.set_body("body");
    message.merge(replacement);

    assert_eq!(
        MessageBuilder::new().build(&mut message),
        b"Subject: Caf\xe9\r\nX-Old: 2\r\n\r\nbody"
    );
}

#[test]
fn test_changed_header_keeps_folding_and_8bit_name() {
    let raw = b"Received: from a\r\n\tby b\r\nX-\xe9t\xe9: oui\r\n\r\nbody";
    let mut message = decompose(raw);
    message.set_header_changed(true);

    assert_eq!(MessageBuilder::new().build(&mut message), raw);
}

#[test]
fn test_empty_part_body_round_trip() {
    assert_round_trip(
        b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\nX: 1\r\n\r\n--b--\r\n",
    );
    assert_round_trip(concat!(
        "Content-Type: multipart/mixed; boundary=b\r\n",
        "\r\n",
        "--b\r\n",
        "\r\n",
        "--b\r\n",
        "X: 1\r\n",
        "\r\n",
        "\r\n",
        "--b\r\n",
        "X: 2\r\n",
        "\r\n",
        "--b--\r\n",
    ).as_bytes());
}

#[test]
fn test_malformed_header_preview() {
    let err = Decomposer::new()
        .decompose(b"\tSubject: tab first\r\n\r\nbody", "")
        .unwrap_err();
    assert!(err.is_malformed_header());
    assert!(err.to_string().contains("Subject: tab first"));

    let mut raw = b"\t".to_vec();
    raw.extend(std::iter::repeat_n(b'a', 60));
    raw.extend(std::iter::repeat_n(b'z', 60));
    raw.extend_from_slice(b"\r\n\r\n");

    let err = Decomposer::new().decompose(&raw, "").unwrap_err();
    let Error::Protocol(inner) = err else {
        panic!("expected a protocol error");
    };
    let preview = inner.preview().unwrap();
    assert_eq!(preview.len(), 103);
    assert!(preview.starts_with("\taaa"));
    assert!(preview.ends_with("zzz"));
    assert!(preview.contains("..."));
}

#[test]
fn test_malformed_part_header_aborts() {
    let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\nbad line\r\n\r\nx\r\n--b--\r\n";
    let err = Decomposer::new().decompose(raw, "").unwrap_err();
    assert!(err.is_malformed_header());
}

#[test]
fn test_part_depth_limit() {
    let config = Config::builder().max_part_depth(1).build();
    let raw = concat!(
        "Content-Type: multipart/mixed; boundary=a\r\n",
        "\r\n",
        "--a\r\n",
        "Content-Type: multipart/mixed; boundary=b\r\n",
        "\r\n",
        "--b\r\n",
        "\r\n",
        "deep\r\n",
        "--b--\r\n",
        "--a--\r\n",
    );
    let err = Decomposer::with_config(config)
        .decompose(raw.as_bytes(), "")
        .unwrap_err();
    assert!(matches!(err, Error::NestingTooDeep { depth: 1 }));

    assert_round_trip(raw.as_bytes());
}

fn header_field() -> impl Strategy<Value = (String, String)> {
    (
        "X-[A-Za-z0-9]{1,12}",
        "[!-~]([ -~]{0,30}[!-~])?",
    )
}

proptest! {
    #[test]
    fn prop_unedited_message_round_trips(
        fields in proptest::collection::vec(header_field(), 0..8),
        body in "[ -~\r\n]{0,200}",
    ) {
        let mut raw = String::new();
        for (name, value) in &fields {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        raw.push_str(&body);

        let mut message = Decomposer::new().decompose(raw.as_bytes(), "").unwrap();
        let rebuilt = MessageBuilder::new().build(&mut message);
        prop_assert_eq!(rebuilt, raw.as_bytes());
    }

    #[test]
    fn prop_rebuilt_header_reparses_to_same_fields(
        fields in proptest::collection::vec(header_field(), 1..8),
    ) {
        let mut raw = String::new();
        for (name, value) in &fields {
            raw.push_str(&format!("{name}:   {value}\r\n"));
        }
        raw.push_str("\r\nbody");

        let mut message = Decomposer::new().decompose(raw.as_bytes(), "").unwrap();
        message.set_header_changed(true);
        let rebuilt = MessageBuilder::new().build(&mut message);

        let reparsed = Decomposer::new().decompose(&rebuilt, "").unwrap();
        prop_assert_eq!(reparsed.headers(), message.headers());
        prop_assert_eq!(reparsed.header_order(), message.header_order());
        prop_assert_eq!(reparsed.body(), b"body");
    }
}
