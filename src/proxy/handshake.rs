//! Protocol handshakes that are written by hand over a raw stream
//!
//! reqwest covers HTTP, HTTPS and SOCKS5 probing. SOCKS4, HTTP CONNECT
//! tunnels and the SMTP greeting are spoken directly here. All functions are
//! generic over the stream so they run the same on a `TcpStream` and on an
//! in-memory duplex.

use crate::proxy::judge::JudgeTarget;
use crate::Result;
use anyhow::{anyhow, bail};
use std::net::SocketAddrV4;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Cap on a response head (status line + headers)
const MAX_HEAD_BYTES: usize = 8192;

/// Cap on a judge response
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS4_CMD_CONNECT: u8 = 0x01;
const SOCKS4_GRANTED: u8 = 0x5A;

/// SOCKS4 CONNECT to an IPv4 target
pub async fn socks4_connect<S>(stream: &mut S, target: SocketAddrV4) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = Vec::with_capacity(9);
    request.push(SOCKS4_VERSION);
    request.push(SOCKS4_CMD_CONNECT);
    request.extend_from_slice(&target.port().to_be_bytes());
    request.extend_from_slice(&target.ip().octets());
    // Empty user id, NUL terminated
    request.push(0x00);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x00 {
        bail!("invalid SOCKS4 reply version {:#04x}", reply[0]);
    }
    if reply[1] != SOCKS4_GRANTED {
        bail!("SOCKS4 request rejected with code {:#04x}", reply[1]);
    }
    Ok(())
}

/// Open an HTTP CONNECT tunnel to `host:port`
pub async fn http_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Proxy-Connection: Keep-Alive\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_head(stream).await?;
    match parse_status(&head) {
        Some(200) => Ok(()),
        Some(status) => bail!("CONNECT failed with status {}", status),
        None => bail!("malformed CONNECT response"),
    }
}

/// Send a request to the judge over an established tunnel and return the body
///
/// HTTP/1.0 keeps the response free of chunked encoding and makes the server
/// close the connection once the body is sent.
pub async fn judge_request<S>(stream: &mut S, target: &JudgeTarget, post: bool) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = if post {
        format!(
            "POST {path} HTTP/1.0\r\n\
             Host: {host}\r\n\
             Accept: */*\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 0\r\n\
             \r\n",
            path = target.path,
            host = target.host_header()
        )
    } else {
        format!(
            "GET {path} HTTP/1.0\r\n\
             Host: {host}\r\n\
             Accept: */*\r\n\
             \r\n",
            path = target.path,
            host = target.host_header()
        )
    };
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    (&mut *stream)
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut response)
        .await?;

    let (head, body) = split_response(&response).ok_or_else(|| anyhow!("incomplete judge response"))?;
    match parse_status(head) {
        Some(status) if (200..300).contains(&status) => Ok(String::from_utf8_lossy(body).into_owned()),
        Some(status) => bail!("judge answered with status {}", status),
        None => bail!("malformed judge response"),
    }
}

/// Expect an SMTP `220` service-ready greeting
pub async fn smtp_greeting<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 512];
    let n = stream.read(&mut buffer).await?;
    if n == 0 {
        bail!("connection closed before SMTP greeting");
    }
    if buffer[..n].starts_with(b"220") {
        Ok(())
    } else {
        let line = String::from_utf8_lossy(&buffer[..n]);
        bail!("unexpected SMTP greeting: {}", line.lines().next().unwrap_or_default())
    }
}

/// Read until the blank line that ends a response head
async fn read_head<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    // Byte-wise so nothing past the head is consumed from the tunnel
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HEAD_BYTES {
            bail!("response head too large");
        }
        if stream.read(&mut byte).await? == 0 {
            bail!("connection closed during response head");
        }
        head.push(byte[0]);
    }
    Ok(head)
}

/// Status code from the first line of a response head
pub fn parse_status(head: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(head).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn split_response(response: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = response.windows(4).position(|w| w == b"\r\n\r\n")?;
    Some((&response[..pos + 4], &response[pos + 4..]))
}
