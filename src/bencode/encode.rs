use super::value::Value;
use bytes::{BufMut, BytesMut};

/// Encodes a value in canonical form (dictionary keys sorted).
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.to_vec()
}

fn encode_into(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Bytes(b) => put_bytes(b, buf),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(dict) => {
            buf.put_u8(b'd');
            for (key, val) in dict {
                put_bytes(key, buf);
                encode_into(val, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn put_bytes(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}
