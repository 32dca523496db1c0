use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_invalid() {
    assert!(matches!(
        decode(b"i-0e"),
        Err(BencodeError::InvalidInteger { .. })
    ));
    assert!(matches!(
        decode(b"i03e"),
        Err(BencodeError::InvalidInteger { .. })
    ));
    assert!(decode(b"ie").is_err());
    assert!(decode(b"i12").is_err());
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Bytes::new()));
    assert_eq!(decode(b"5:spam"), Err(BencodeError::UnexpectedEof(6)));
}

#[test]
fn test_decode_list_and_dict() {
    let list = decode(b"l4:spami42ee").unwrap();
    let items = list.as_list().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1], Value::Integer(42));

    let dict = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    assert_eq!(dict.get_str(b"cow"), Some("moo"));
    assert_eq!(dict.get_str(b"spam"), Some("eggs"));
    assert!(dict.get(b"missing").is_none());
}

#[test]
fn test_dict_key_must_be_string() {
    assert_eq!(decode(b"di1ei2ee"), Err(BencodeError::NonStringKey(1)));
}

#[test]
fn test_trailing_data_error() {
    assert_eq!(decode(b"i42eextra"), Err(BencodeError::TrailingData(4)));
}

#[test]
fn test_decode_prefix_reports_consumed() {
    let (value, consumed) = decode_prefix(b"4:spamtail").unwrap();
    assert_eq!(value.as_str(), Some("spam"));
    assert_eq!(consumed, 6);
}

#[test]
fn test_nesting_limit() {
    let mut data = vec![b'l'; 100];
    data.extend(vec![b'e'; 100]);
    assert_eq!(decode(&data), Err(BencodeError::NestingTooDeep));
}

#[test]
fn test_canonical_reencode() {
    let original = b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee";
    let decoded = decode(original).unwrap();
    assert_eq!(encode(&decoded), original);
}

#[test]
fn test_dict_from_pairs_sorts_keys() {
    let value = Value::from([("peers", Value::string("")), ("interval", Value::Integer(60))]);
    assert_eq!(encode(&value), b"d8:intervali60e5:peers0:e");
}
