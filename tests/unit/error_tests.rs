//! Unit tests for `AppError` display format and conversions.

use lsp_tcp_bridge::AppError;

#[test]
fn display_prefixes_identify_the_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("pipe".into()), "io: pipe"),
        (AppError::Transport("refused".into()), "transport: refused"),
        (
            AppError::Transition("connected while disconnected".into()),
            "illegal transition: connected while disconnected",
        ),
        (
            AppError::RetriesExhausted("gave up".into()),
            "retries exhausted: gave up",
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout gone");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("stdout gone")));
}

#[test]
fn error_messages_have_no_trailing_period() {
    let err = AppError::Transport("connection refused".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}
