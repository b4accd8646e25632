use std::io::ErrorKind;

use anyhow::bail;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write a single length-prefixed frame and flush it. The length prefix is a u32 in network byte
///  order, counting the payload only.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8], max_frame_size: usize) -> anyhow::Result<()> {
    if payload.len() > max_frame_size {
        bail!("frame of {} bytes exceeds the maximum of {} bytes", payload.len(), max_frame_size);
    }
    let len: u32 = payload.len().try_into()?;

    w.write_all(len.to_be_bytes().as_ref()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read a single frame. `None` signals that the stream was closed by the peer between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R, max_frame_size: usize) -> anyhow::Result<Option<BytesMut>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(len_buf.as_mut()).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let frame_len: usize = u32::from_be_bytes(len_buf).try_into()?;
    if frame_len > max_frame_size {
        bail!("received a frame of {} bytes, exceeding the maximum of {} - the stream is apparently corrupt", frame_len, max_frame_size);
    }

    let mut frame = BytesMut::zeroed(frame_len);
    r.read_exact(frame.as_mut()).await?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::duplex;

    #[rstest]
    #[case::empty(b"", b"\0\0\0\0")]
    #[case::abc(b"abc", b"\0\0\0\x03abc")]
    #[tokio::test]
    async fn test_write_frame(#[case] payload: &[u8], #[case] expected: &[u8]) {
        let mut buf = Vec::new();
        write_frame(&mut buf, payload, 16).await.unwrap();
        assert_eq!(buf.as_slice(), expected);
    }

    #[tokio::test]
    async fn test_write_frame_too_big() {
        let mut buf = Vec::new();
        assert!(write_frame(&mut buf, b"12345", 4).await.is_err());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_frames_until_eof() {
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, b"first", 100).await.unwrap();
        write_frame(&mut a, b"", 100).await.unwrap();
        write_frame(&mut a, b"third", 100).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, 100).await.unwrap().unwrap().as_ref(), b"first");
        assert_eq!(read_frame(&mut b, 100).await.unwrap().unwrap().as_ref(), b"");
        assert_eq!(read_frame(&mut b, 100).await.unwrap().unwrap().as_ref(), b"third");
        assert!(read_frame(&mut b, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_exceeding_max() {
        let mut buf: &[u8] = b"\0\0\x01\0abc";
        assert!(read_frame(&mut buf, 255).await.is_err());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload() {
        let mut buf: &[u8] = b"\0\0\0\x05abc";
        assert!(read_frame(&mut buf, 255).await.is_err());
    }
}
