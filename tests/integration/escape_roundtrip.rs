#![allow(missing_docs)]

//! Escape/unescape codec properties and boundary behavior.

use datahub::sample::codec::{json_to_string, string_to_json, unescape_json};
use datahub::HubError;

use proptest::prelude::*;

#[test]
fn zero_destination_writes_nothing() {
    let mut dest: [u8; 0] = [];
    assert!(matches!(
        string_to_json(&mut dest, "anything"),
        Err(HubError::Overflow)
    ));
    assert!(matches!(
        json_to_string(&mut dest, "anything"),
        Err(HubError::Overflow)
    ));
}

#[test]
fn exact_fill_including_terminator_is_ok() {
    let mut dest = [0u8; 6];
    let written = string_to_json(&mut dest, "hello").unwrap();
    assert_eq!(written, 5);
    assert_eq!(&dest, b"hello\0");
}

#[test]
fn newline_escape_overflow_preserves_prefix_and_terminates() {
    let mut dest = [0xaau8; 4];
    let err = string_to_json(&mut dest, "ab\n");
    assert!(matches!(err, Err(HubError::Overflow)));
    assert_eq!(&dest[..3], b"ab\0");
}

#[test]
fn unescape_overflow_truncates_at_whole_character() {
    // "héllo" unescaped needs 6 bytes + NUL; a 7-byte destination takes it,
    // a 4-byte destination must stop before the 2-byte 'é'.
    let mut small = [0u8; 3];
    assert!(matches!(
        json_to_string(&mut small, "héllo"),
        Err(HubError::Overflow)
    ));
    assert_eq!(&small[..2], b"h\0");
}

#[test]
fn control_characters_escape_as_u00xx() {
    let mut dest = [0u8; 16];
    let written = string_to_json(&mut dest, "\u{1f}").unwrap();
    assert_eq!(&dest[..written], b"\\u001f");
}

proptest! {
    /// For every payload that fits, unescaping the escaped form recovers
    /// the original exactly.
    #[test]
    fn escape_then_unescape_recovers_payload(payload in ".{0,64}") {
        let mut escaped = vec![0u8; payload.len() * 6 + 8];
        let n = string_to_json(&mut escaped, &payload).unwrap();
        let escaped_str = std::str::from_utf8(&escaped[..n]).unwrap();

        let mut back = vec![0u8; payload.len() * 4 + 8];
        let m = json_to_string(&mut back, escaped_str).unwrap();
        prop_assert_eq!(std::str::from_utf8(&back[..m]).unwrap(), payload.as_str());

        // The unbounded variant agrees.
        prop_assert_eq!(unescape_json(escaped_str).unwrap(), payload);
    }

    /// Escaped output never contains a raw control character or an
    /// unescaped quote.
    #[test]
    fn escaped_form_is_clean(payload in ".{0,64}") {
        let mut escaped = vec![0u8; payload.len() * 6 + 8];
        let n = string_to_json(&mut escaped, &payload).unwrap();
        let escaped_str = std::str::from_utf8(&escaped[..n]).unwrap();
        let mut previous_backslash = false;
        for c in escaped_str.chars() {
            prop_assert!(c > '\u{1f}', "control character leaked into escaped form");
            if c == '"' {
                prop_assert!(previous_backslash);
            }
            previous_backslash = c == '\\' && !previous_backslash;
        }
    }

    /// Truncation always leaves a NUL-terminated prefix of the full
    /// encoding.
    #[test]
    fn truncation_yields_terminated_prefix(payload in ".{1,32}", size in 1usize..16) {
        let mut full = vec![0u8; payload.len() * 6 + 8];
        let full_len = string_to_json(&mut full, &payload).unwrap();

        let mut dest = vec![0xffu8; size];
        match string_to_json(&mut dest, &payload) {
            Ok(n) => {
                prop_assert_eq!(n, full_len);
                prop_assert_eq!(&dest[..n], &full[..n]);
                prop_assert_eq!(dest[n], 0);
            }
            Err(HubError::Overflow) => {
                let written = dest.iter().position(|&b| b == 0).unwrap();
                prop_assert!(written < size);
                prop_assert_eq!(&dest[..written], &full[..written]);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }
}
