use std::{io, time::Duration};

use async_trait::async_trait;
use image::ImageFormat;
use spectro_types::{config::StreamConfig, frame::Frame, ConnectError, ReadError};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, info};

use crate::{probe, Endpoint, FrameReader, StreamSource};

/// Upper bound for a single header line or part body.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;
const MAX_HEADER_LINES: usize = 64;

/// Motion-JPEG over HTTP (`multipart/x-mixed-replace`), as served by ESP32-CAM
/// style firmware.
#[derive(Debug, Clone)]
pub struct MjpegSource {
    probe_timeout: Duration,
    read_timeout: Duration,
}

impl MjpegSource {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout(),
            read_timeout: config.read_timeout(),
        }
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> Result<MultipartReader<BufReader<TcpStream>>, String> {
        let stream = timeout(self.probe_timeout, TcpStream::connect(endpoint.authority()))
            .await
            .map_err(|_| "connection timed out".to_string())?
            .map_err(|err| format!("connection failed: {err}"))?;
        let mut reader = BufReader::new(stream);

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: spectro/0.1\r\nAccept: multipart/x-mixed-replace, image/jpeg\r\nConnection: keep-alive\r\n\r\n",
            endpoint.path(),
            endpoint.authority()
        );
        reader
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|err| format!("request write failed: {err}"))?;

        let head = timeout(self.read_timeout, read_response_head(&mut reader))
            .await
            .map_err(|_| "no HTTP response before timeout".to_string())?
            .map_err(|err| format!("malformed HTTP response: {err}"))?;
        if head.status != 200 {
            return Err(format!("HTTP {}", head.status));
        }
        let content_type = head.header("content-type").unwrap_or_default();
        let boundary = parse_boundary(content_type)
            .ok_or_else(|| format!("not a multipart stream (content-type '{content_type}')"))?;
        debug!("MJPEG boundary for {}: {}", endpoint, boundary);

        Ok(MultipartReader::new(reader, boundary))
    }
}

#[async_trait]
impl StreamSource for MjpegSource {
    type Reader = MjpegReader;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MjpegReader, ConnectError> {
        probe(endpoint, self.probe_timeout).await?;
        let parts = self
            .open(endpoint)
            .await
            .map_err(|reason| ConnectError::StreamOpen {
                endpoint: endpoint.to_string(),
                reason,
            })?;
        info!("MJPEG stream open: {}", endpoint);
        Ok(MjpegReader {
            parts: Some(parts),
            read_timeout: self.read_timeout,
            sequence: 0,
        })
    }
}

/// Open MJPEG connection.
pub struct MjpegReader {
    parts: Option<MultipartReader<BufReader<TcpStream>>>,
    read_timeout: Duration,
    sequence: u64,
}

#[async_trait]
impl FrameReader for MjpegReader {
    async fn read_frame(&mut self) -> Result<Frame, ReadError> {
        let Some(parts) = self.parts.as_mut() else {
            return Err(ReadError::Closed);
        };
        let body = match timeout(self.read_timeout, parts.next_part()).await {
            Err(_) => return Err(ReadError::NoFrame("read timed out".into())),
            Ok(Ok(Some(body))) => body,
            Ok(Ok(None)) => return Err(ReadError::Closed),
            Ok(Err(err)) if err.kind() == io::ErrorKind::InvalidData => {
                return Err(ReadError::NoFrame(err.to_string()))
            }
            Ok(Err(err)) => {
                debug!("MJPEG socket error: {err}");
                return Err(ReadError::Closed);
            }
        };
        let frame = decode_jpeg(&body)?;
        self.sequence += 1;
        Ok(frame.with_sequence(self.sequence))
    }

    async fn close(&mut self) {
        if let Some(parts) = self.parts.take() {
            let mut stream = parts.into_inner().into_inner();
            let _ = stream.shutdown().await;
            debug!("MJPEG connection closed");
        }
    }
}

pub(crate) fn decode_jpeg(bytes: &[u8]) -> Result<Frame, ReadError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|err| ReadError::NoFrame(format!("JPEG decode failed: {err}")))?;
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Frame::from_rgb(width, height, rgb.into_raw()).map_err(|err| ReadError::NoFrame(err.to_string()))
}

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) async fn read_response_head<R>(reader: &mut R) -> io::Result<ResponseHead>
where
    R: AsyncBufRead + Unpin,
{
    let status_line = read_text_line(reader)
        .await?
        .ok_or_else(|| invalid_data("connection closed before status line"))?;
    let mut fields = status_line.split_whitespace();
    let version = fields.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(invalid_data(format!("bad status line '{status_line}'")));
    }
    let status = fields
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| invalid_data(format!("bad status line '{status_line}'")))?;
    let headers = read_headers(reader).await?;
    Ok(ResponseHead { status, headers })
}

/// Extract the part boundary from a `multipart/...; boundary=...` content type.
pub(crate) fn parse_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .map(|value| value.strip_prefix("--").unwrap_or(value).to_string())
        .filter(|value| !value.is_empty())
}

/// Splits a multipart body into parts.
///
/// Every call resynchronises on the next boundary line, so a call abandoned
/// midway (read timeout) does not corrupt later reads.
pub(crate) struct MultipartReader<R> {
    reader: R,
    delimiter: Vec<u8>,
    at_part_headers: bool,
}

impl<R> MultipartReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, boundary: String) -> Self {
        Self {
            reader,
            delimiter: format!("--{boundary}").into_bytes(),
            at_part_headers: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Body of the next part, or `None` at end of stream.
    pub async fn next_part(&mut self) -> io::Result<Option<Vec<u8>>> {
        if !self.at_part_headers {
            loop {
                let Some(line) = read_raw_line(&mut self.reader).await? else {
                    return Ok(None);
                };
                match self.delimiter_kind(&line) {
                    Some(Delimiter::Next) => break,
                    Some(Delimiter::Final) => return Ok(None),
                    None => continue,
                }
            }
        }
        self.at_part_headers = false;

        let headers = read_headers(&mut self.reader).await?;
        let content_length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok());

        match content_length {
            Some(len) if len > MAX_PART_BYTES => {
                Err(invalid_data(format!("part of {len} bytes exceeds limit")))
            }
            Some(len) => {
                let mut body = vec![0u8; len];
                match self.reader.read_exact(&mut body).await {
                    Ok(_) => Ok(Some(body)),
                    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
                    Err(err) => Err(err),
                }
            }
            None => self.read_until_delimiter().await,
        }
    }

    async fn read_until_delimiter(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut body = Vec::new();
        loop {
            let Some(line) = read_raw_line(&mut self.reader).await? else {
                return Ok(None);
            };
            match self.delimiter_kind(&line) {
                Some(kind) => {
                    self.at_part_headers = kind == Delimiter::Next;
                    if body.ends_with(b"\r\n") {
                        body.truncate(body.len() - 2);
                    } else if body.ends_with(b"\n") {
                        body.truncate(body.len() - 1);
                    }
                    return Ok(Some(body));
                }
                None => {
                    body.extend_from_slice(&line);
                    if body.len() > MAX_PART_BYTES {
                        return Err(invalid_data("unterminated part exceeds limit"));
                    }
                }
            }
        }
    }

    fn delimiter_kind(&self, line: &[u8]) -> Option<Delimiter> {
        let trimmed = trim_line_end(line);
        let rest = trimmed.strip_prefix(self.delimiter.as_slice())?;
        match rest {
            b"" => Some(Delimiter::Next),
            b"--" => Some(Delimiter::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Next,
    Final,
}

async fn read_headers<R>(reader: &mut R) -> io::Result<Vec<(String, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();
    for _ in 0..MAX_HEADER_LINES {
        let line = read_text_line(reader)
            .await?
            .ok_or_else(|| invalid_data("connection closed inside headers"))?;
        if line.is_empty() {
            return Ok(headers);
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Err(invalid_data("too many header lines"))
}

async fn read_text_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_raw_line(reader)
        .await?
        .map(|line| String::from_utf8_lossy(trim_line_end(&line)).into_owned()))
}

/// One `\n`-terminated chunk including its terminator; `None` at EOF.
/// Chunks longer than `MAX_PART_BYTES` are rejected without buffering the rest.
async fn read_raw_line<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_PART_BYTES as u64 + 1);
    let read = limited.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > MAX_PART_BYTES {
        return Err(invalid_data("line exceeds limit"));
    }
    Ok(Some(line))
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, ColorType};
    use tokio::net::TcpListener;

    const BOUNDARY: &str = "123456789000000000000987654321";

    fn jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let pixels: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 95)
            .encode(&pixels, width, height, ColorType::Rgb8)
            .expect("encode jpeg");
        out
    }

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace;boundary=123456789000000000000987654321")
                .as_deref(),
            Some(BOUNDARY)
        );
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace; boundary=\"--frame\"").as_deref(),
            Some("frame")
        );
        assert_eq!(parse_boundary("image/jpeg"), None);
        assert_eq!(parse_boundary("multipart/x-mixed-replace"), None);
    }

    #[tokio::test]
    async fn parses_response_head() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary=abc\r\nAccess-Control-Allow-Origin: *\r\n\r\n--abc";
        let mut reader = raw;
        let head = read_response_head(&mut reader).await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(
            head.header("CONTENT-TYPE"),
            Some("multipart/x-mixed-replace;boundary=abc")
        );
        assert_eq!(reader, b"--abc");
    }

    #[tokio::test]
    async fn splits_parts_by_content_length() {
        let mut raw = part(b"first\r\nbody");
        raw.extend(part(b"second"));
        let mut parts = MultipartReader::new(raw.as_slice(), BOUNDARY.into());
        assert_eq!(parts.next_part().await.unwrap().unwrap(), b"first\r\nbody");
        assert_eq!(parts.next_part().await.unwrap().unwrap(), b"second");
        assert_eq!(parts.next_part().await.unwrap(), None);
    }

    #[tokio::test]
    async fn splits_parts_without_content_length() {
        let raw = format!(
            "\r\n--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\nline one\nline two\r\n--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\nthird\r\n--{BOUNDARY}--\r\n"
        );
        let mut parts = MultipartReader::new(raw.as_bytes(), BOUNDARY.into());
        assert_eq!(
            parts.next_part().await.unwrap().unwrap(),
            b"line one\nline two"
        );
        assert_eq!(parts.next_part().await.unwrap().unwrap(), b"third");
        assert_eq!(parts.next_part().await.unwrap(), None);
    }

    #[tokio::test]
    async fn skips_garbage_before_first_boundary() {
        let mut raw = b"noise\r\nmore noise\r\n".to_vec();
        raw.extend(part(b"payload"));
        let mut parts = MultipartReader::new(raw.as_slice(), BOUNDARY.into());
        assert_eq!(parts.next_part().await.unwrap().unwrap(), b"payload");
    }

    #[tokio::test]
    async fn oversize_header_line_is_rejected() {
        let mut raw = b"X-Padding: ".to_vec();
        raw.resize(MAX_PART_BYTES + 1024, b'a');
        raw.extend_from_slice(b"\r\n\r\n");
        let mut reader = raw.as_slice();
        let err = read_headers(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversize_preamble_stops_boundary_scan() {
        let mut raw = vec![b'x'; MAX_PART_BYTES + 1];
        raw.extend(part(b"payload"));
        let mut parts = MultipartReader::new(raw.as_slice(), BOUNDARY.into());
        let err = parts.next_part().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let mut raw = vec![b'y'; MAX_PART_BYTES - 2];
        raw.extend_from_slice(b"\r\n");
        let mut reader = raw.as_slice();
        let line = read_raw_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_PART_BYTES);
        assert!(read_raw_line(&mut reader).await.unwrap().is_none());
    }

    #[test]
    fn undecodable_part_is_transient() {
        assert!(matches!(
            decode_jpeg(b"definitely not a jpeg"),
            Err(ReadError::NoFrame(_))
        ));
        let frame = decode_jpeg(&jpeg(16, 8, [200, 100, 50])).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
    }

    async fn serve_once(response: Vec<u8>) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // First accept is the reachability probe.
            let _ = listener.accept().await;
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut chunk = [0u8; 512];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });
        Endpoint::parse(&format!("http://127.0.0.1:{port}/stream")).unwrap()
    }

    fn source() -> MjpegSource {
        MjpegSource::new(&StreamConfig {
            probe_timeout_ms: 1_000,
            read_timeout_ms: 1_000,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn reads_frames_from_http_stream() {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary={BOUNDARY}\r\n\r\n"
        )
        .into_bytes();
        response.extend(part(&jpeg(32, 16, [128, 128, 128])));
        response.extend(part(b"corrupted"));
        response.extend(part(&jpeg(32, 16, [10, 20, 30])));
        let endpoint = serve_once(response).await;

        let mut reader = source().connect(&endpoint).await.expect("connect");
        let first = reader.read_frame().await.expect("first frame");
        assert_eq!((first.width(), first.height()), (32, 16));
        assert_eq!(first.sequence(), 1);
        assert!(matches!(reader.read_frame().await, Err(ReadError::NoFrame(_))));
        let third = reader.read_frame().await.expect("third frame");
        assert_eq!(third.sequence(), 2);
        assert_eq!(reader.read_frame().await.unwrap_err(), ReadError::Closed);

        reader.close().await;
        reader.close().await;
        assert_eq!(reader.read_frame().await.unwrap_err(), ReadError::Closed);
    }

    #[tokio::test]
    async fn non_stream_response_is_open_failure() {
        let endpoint = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()).await;
        match source().connect(&endpoint).await {
            Err(ConnectError::StreamOpen { reason, .. }) => assert!(reason.contains("404")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("404 must not open a stream"),
        }
    }

    #[tokio::test]
    async fn refused_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = Endpoint::parse(&format!("http://127.0.0.1:{port}/stream")).unwrap();
        assert!(matches!(
            source().connect(&endpoint).await,
            Err(ConnectError::Unreachable { .. })
        ));
    }
}
