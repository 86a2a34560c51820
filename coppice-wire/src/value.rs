use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use coppice_base::{protocol_error, Result};
use coppice_types::{Id, Path, QName, Value};

use crate::transport::LineReader;

/// Encodes a single value using the one-letter wire tag table: length
/// prefixes count bytes *after* UTF-8 encoding and are followed by the raw
/// payload and a trailing `\n`; scalar tags are a single line.
///
/// `out` is a raw byte buffer rather than a `String` because `Binary` values
/// carry arbitrary bytes that need not be valid UTF-8 (spec.md §8's
/// round-trip property: "binaries preserve raw bytes regardless of utf-8
/// validity") -- going through `String` for every value would force a lossy
/// UTF-8 re-encoding of the one variant that must never be touched.
///
/// `Multiple` and `Undefined` have no direct encoding here -- a multi-valued
/// property is framed by the caller as an `M<name>` block of individually
/// encoded values terminated by a bare `M`, and an undefined value is simply
/// never written (or is represented by the property being absent / a
/// `D<name>` deferred marker).
pub fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::String(s) => {
            out.extend_from_slice(format!("s{}\n", s.len()).as_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(b'\n');
        }
        Value::Binary(bytes) => {
            encode_binary_tag(bytes, out);
        }
        Value::Long(n) => {
            out.extend_from_slice(format!("l{n}\n").as_bytes());
        }
        Value::Double(f) => {
            out.extend_from_slice(format!("f{}\n", f.0).as_bytes());
        }
        Value::Date(dt) => {
            out.extend_from_slice(
                format!("d{}\n", dt.to_rfc3339_opts(SecondsFormat::Millis, true)).as_bytes(),
            );
        }
        Value::Boolean(b) => {
            out.extend_from_slice(if *b { b"btrue\n" } else { b"bfalse\n" });
        }
        Value::Name(n) => {
            out.extend_from_slice(format!("n{n}\n").as_bytes());
        }
        Value::Path(p) => {
            out.extend_from_slice(format!("p{p}\n").as_bytes());
        }
        Value::Reference(id) => {
            out.extend_from_slice(format!("r{id}\n").as_bytes());
        }
        Value::Undefined => {
            return Err(protocol_error("cannot encode an undefined value"));
        }
        Value::Multiple(_) => {
            return Err(protocol_error(
                "multiple-valued properties are framed by the caller, not encode_value",
            ));
        }
    }
    Ok(())
}

/// Writes the `x<len>\n<raw bytes>\n` binary tag verbatim -- the length
/// prefix is the exact byte count and the payload is never UTF-8-validated
/// or re-encoded.
pub fn encode_binary_tag(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("x{}\n", bytes.len()).as_bytes());
    out.extend_from_slice(bytes);
    out.push(b'\n');
}

/// Decodes one value from the line reader. The caller has already consumed
/// whatever prefix identifies that a value follows (e.g. the `P<name>`
/// line); this reads the tag line itself.
pub fn decode_value<T: std::io::Read>(reader: &mut LineReader<T>) -> Result<Value> {
    let line = reader.read_line()?;
    if line.is_empty() {
        return Err(protocol_error("empty value line"));
    }
    let (tag, rest) = line.split_at(1);
    match tag {
        "s" => {
            let len: usize = rest
                .parse()
                .map_err(|_| protocol_error(format!("bad string length: {rest}")))?;
            let payload = reader.read_exact_payload(len)?;
            let s = String::from_utf8(payload)
                .map_err(|e| protocol_error(format!("non-utf8 string value: {e}")))?;
            Ok(Value::String(s))
        }
        "x" => {
            let len: usize = rest
                .parse()
                .map_err(|_| protocol_error(format!("bad binary length: {rest}")))?;
            let payload = reader.read_exact_payload(len)?;
            Ok(Value::Binary(payload.into_boxed_slice()))
        }
        "l" => {
            let n: i64 = rest
                .parse()
                .map_err(|_| protocol_error(format!("bad long value: {rest}")))?;
            Ok(Value::Long(n))
        }
        "f" => {
            let f: f64 = rest
                .parse()
                .map_err(|_| protocol_error(format!("bad double value: {rest}")))?;
            Ok(Value::double(f))
        }
        "d" => Ok(Value::Date(decode_date(rest)?)),
        "b" => match rest {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(protocol_error(format!("bad boolean value: {rest}"))),
        },
        "n" => Ok(Value::Name(QName::new(rest))),
        "p" => Ok(Value::Path(Path::parse(rest))),
        "r" => Ok(Value::Reference(Id::parse(rest)?)),
        other => Err(protocol_error(format!("unknown value tag: {other}"))),
    }
}

/// Parses an ISO8601 timestamp. Non-`Z`/non-UTC offsets are accepted and
/// normalized rather than rejected -- logged at debug level, matching the
/// leniency of the original controller, which logged non-UTC dates instead
/// of refusing them.
fn decode_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        if dt.offset().local_minus_utc() != 0 {
            debug!(target: "coppice", "normalizing non-UTC date {s} to UTC");
        }
        return Ok(dt.with_timezone(&Utc));
    }
    Err(protocol_error(format!("bad date value: {s}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(v: Value) -> Value {
        let mut out = Vec::new();
        encode_value(&v, &mut out).unwrap();
        let mut reader = LineReader::new(Cursor::new(out));
        decode_value(&mut reader).unwrap()
    }

    #[test]
    fn test_string_roundtrip() {
        assert_eq!(roundtrip(Value::from("hello")), Value::from("hello"));
    }

    #[test]
    fn test_long_roundtrip() {
        assert_eq!(roundtrip(Value::from(42i64)), Value::from(42i64));
    }

    #[test]
    fn test_boolean_roundtrip() {
        assert_eq!(roundtrip(Value::from(true)), Value::from(true));
        assert_eq!(roundtrip(Value::from(false)), Value::from(false));
    }

    #[test]
    fn test_binary_roundtrip() {
        let bytes: Box<[u8]> = Box::new([0x41, 0x42, 0x43]);
        assert_eq!(roundtrip(Value::Binary(bytes.clone())), Value::Binary(bytes));
    }

    #[test]
    fn test_binary_roundtrip_non_utf8() {
        // "caf\xe9 babe" from spec.md's seed scenario 4: a raw byte (0xe9)
        // that is not valid UTF-8 on its own. A lossy String-based encoder
        // would replace it with U+FFFD and corrupt both the length prefix
        // and the payload; the byte-buffer encoder must preserve it exactly.
        let bytes: Box<[u8]> = Box::new([b'c', b'a', b'f', 0xe9, b' ', b'b', b'a', b'b', b'e']);
        assert_eq!(bytes.len(), 9);
        assert_eq!(roundtrip(Value::Binary(bytes.clone())), Value::Binary(bytes));
    }

    #[test]
    fn test_name_and_path_roundtrip() {
        assert_eq!(
            roundtrip(Value::Name(QName::new("nt:base"))),
            Value::Name(QName::new("nt:base"))
        );
        assert_eq!(
            roundtrip(Value::Path(Path::parse("/a/b"))),
            Value::Path(Path::parse("/a/b"))
        );
    }

    #[test]
    fn test_reference_roundtrip() {
        assert_eq!(
            roundtrip(Value::Reference(Id::permanent("abc"))),
            Value::Reference(Id::permanent("abc"))
        );
    }

    #[test]
    fn test_date_normalizes_non_utc() {
        let mut reader = LineReader::new(Cursor::new(b"d2020-01-01T12:00:00+02:00\n".to_vec()));
        let v = decode_value(&mut reader).unwrap();
        match v {
            Value::Date(dt) => assert_eq!(dt.to_rfc3339(), "2020-01-01T10:00:00+00:00"),
            _ => panic!("expected a date"),
        }
    }
}
