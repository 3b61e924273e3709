//! Control-plane client: one framed request, one framed response.

use crate::error::{Error, NetworkError, Result};
use crate::net::message::{decode_message, encode_message_into, Message, MAX_CONTROL_FRAME};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Send one request to `addr` and await the response, all within
/// `timeout`. A deadline exceedance maps to [`Error::Timeout`] so callers
/// can distinguish it from transport failures.
pub async fn call(addr: SocketAddr, msg: &Message, timeout: Duration) -> Result<Message> {
    match tokio::time::timeout(timeout, call_inner(addr, msg)).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout),
    }
}

async fn call_inner(addr: SocketAddr, msg: &Message) -> Result<Message> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| NetworkError::ConnectionFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    let mut buf = BytesMut::new();
    encode_message_into(msg, &mut buf)?;
    stream.write_all(&buf).await.map_err(NetworkError::Io)?;

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => NetworkError::ConnectionClosed,
            _ => NetworkError::Io(e),
        })?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_CONTROL_FRAME {
        return Err(NetworkError::FrameTooLarge(len).into());
    }

    let mut data = vec![0u8; len];
    stream
        .read_exact(&mut data)
        .await
        .map_err(NetworkError::Io)?;
    Ok(decode_message(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_refused() {
        // Port 1 is essentially never listening.
        let err = call(
            "127.0.0.1:1".parse().unwrap(),
            &Message::SmapQuery,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Network(NetworkError::ConnectionFailed { .. }) | Error::Timeout
        ));
    }
}
