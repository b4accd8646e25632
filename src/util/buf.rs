use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

pub fn put_string(buf: &mut impl BufMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let raw = try_get_bytes(buf)?;
    let s = String::from_utf8(raw.to_vec())?;
    Ok(s)
}

/// length-prefixed (varint) byte sequence
pub fn put_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_usize_varint(data.len());
    buf.put_slice(data);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("buffer underflow: length prefix {} exceeds remaining {} bytes", len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(len))
}
