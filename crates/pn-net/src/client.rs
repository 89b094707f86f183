//! Blocking HTTP/1.1 client for the dashboard origin.

use crate::http::FragmentRequest;
use crate::http::FragmentResponse;
use crate::http::Header;
use crate::http::find_header;
use crate::tls;
use crate::url::Origin;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use pn_core::NavError;
use pn_core::NavResult;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tracing::debug;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const USER_AGENT: &str = concat!("partialnav/", env!("CARGO_PKG_VERSION"));

pub(crate) trait IoStream: Read + Write {}
impl<T> IoStream for T where T: Read + Write {}

pub(crate) type BoxedIoStream = Box<dyn IoStream + Send>;

/// One connection per request, closed after the response.
#[derive(Debug, Clone)]
pub struct Http11Client {
    origin: Origin,
    timeout: Duration,
}

impl Http11Client {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn execute(&self, request: &FragmentRequest) -> NavResult<FragmentResponse> {
        let mut stream = self.open_stream()?;
        write_request(&mut stream, &self.origin, request)?;
        let response = read_response(&mut stream)?;
        debug!(
            target: "partialnav::net",
            method = request.method.as_str(),
            target_path = %request.target,
            status = response.status,
            bytes = response.body.len(),
            "fragment exchange finished"
        );
        Ok(response)
    }

    fn open_stream(&self) -> NavResult<BoxedIoStream> {
        let query = format!("{}:{}", self.origin.host(), self.origin.port());
        let addresses: Vec<SocketAddr> = query
            .to_socket_addrs()
            .map_err(|error| {
                NavError::new(
                    "net.dns.resolve_failed",
                    format!("failed to resolve `{query}`: {error}"),
                )
            })?
            .collect();

        let stream = connect_first_available(&addresses, self.timeout)?;
        if self.origin.scheme().is_secure() {
            tls::connect_tls(stream, self.origin.host())
        } else {
            Ok(Box::new(stream))
        }
    }
}

fn connect_first_available(addresses: &[SocketAddr], timeout: Duration) -> NavResult<TcpStream> {
    let mut last_error: Option<NavError> = None;

    for address in addresses {
        match connect(*address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        NavError::new(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )
    }))
}

fn connect(address: SocketAddr, timeout: Duration) -> NavResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&address, timeout).map_err(|error| {
        NavError::new(
            "net.transport.connect_failed",
            format!("failed to connect to `{address}`: {error}"),
        )
    })?;

    stream
        .set_read_timeout(Some(timeout))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|error| {
            NavError::new(
                "net.transport.timeout_failed",
                format!("failed to set socket timeouts for `{address}`: {error}"),
            )
        })?;

    Ok(stream)
}

fn write_request(
    stream: &mut impl Write,
    origin: &Origin,
    request: &FragmentRequest,
) -> NavResult<()> {
    let body = request.body.as_deref().unwrap_or_default();
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {USER_AGENT}\r\nAccept-Encoding: gzip, deflate, br\r\nConnection: close\r\n",
        request.method.as_str(),
        request.target,
        origin.authority(),
    );
    for header in &request.headers {
        head.push_str(&format!("{}: {}\r\n", header.name, header.value));
    }
    if request.body.is_some() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    stream
        .write_all(head.as_bytes())
        .and_then(|()| stream.write_all(body.as_bytes()))
        .map_err(|error| {
            NavError::new(
                "net.http.write_failed",
                format!("failed to write HTTP request bytes: {error}"),
            )
        })?;
    stream.flush().map_err(|error| {
        NavError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })
}

fn read_response(stream: &mut impl Read) -> NavResult<FragmentResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }

        let read = stream.read(&mut chunk).map_err(|error| {
            NavError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;
        if read == 0 {
            return Err(NavError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(NavError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    };

    let head_text = std::str::from_utf8(&buffer[..header_end]).map_err(|error| {
        NavError::new(
            "net.http.head_invalid_utf8",
            format!("HTTP response head is not valid UTF-8 text: {error}"),
        )
    })?;
    let mut lines = head_text.split("\r\n");
    let status = parse_status_line(lines.next().unwrap_or_default())?;

    let mut headers = Vec::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            NavError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let prefetched = buffer[header_end..].to_vec();
    let body = if status_disallows_body(status) {
        Vec::new()
    } else if header_contains(&headers, "transfer-encoding", "chunked") {
        read_chunked_body(stream, prefetched)?
    } else if let Some(len) = parse_content_length(&headers)? {
        read_sized_body(stream, prefetched, len)?
    } else {
        let mut body = prefetched;
        let remaining = (MAX_BODY_BYTES + 1).saturating_sub(body.len());
        let limit = u64::try_from(remaining).unwrap_or(u64::MAX);
        stream.by_ref().take(limit).read_to_end(&mut body).map_err(|error| {
            NavError::new(
                "net.http.read_body_failed",
                format!("failed while draining connection-close response body: {error}"),
            )
        })?;
        ensure_body_fits(body.len())?;
        body
    };

    let body = decode_content_encoding(&headers, body)?;
    Ok(FragmentResponse {
        status,
        headers,
        body,
    })
}

fn read_sized_body(stream: &mut impl Read, mut body: Vec<u8>, len: usize) -> NavResult<Vec<u8>> {
    ensure_body_fits(len)?;
    if body.len() >= len {
        body.truncate(len);
        return Ok(body);
    }

    let mut rest = vec![0_u8; len - body.len()];
    stream.read_exact(&mut rest).map_err(|error| {
        NavError::new(
            "net.http.read_body_failed",
            format!("failed to read HTTP body bytes: {error}"),
        )
    })?;
    body.extend_from_slice(&rest);
    Ok(body)
}

fn read_chunked_body(stream: &mut impl Read, prefetched: Vec<u8>) -> NavResult<Vec<u8>> {
    let mut reader = Cursor::new(prefetched).chain(stream);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            NavError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            while !read_crlf_line(&mut reader)?.is_empty() {}
            break;
        }

        let start = decoded.len();
        let end = start
            .checked_add(chunk_size)
            .filter(|end| *end <= MAX_BODY_BYTES)
            .ok_or_else(body_too_large)?;
        decoded.resize(end + 2, 0);
        reader.read_exact(&mut decoded[start..]).map_err(|error| {
            NavError::new(
                "net.http.read_body_failed",
                format!("failed while reading chunked HTTP body bytes: {error}"),
            )
        })?;
        if decoded[start + chunk_size..] != *b"\r\n" {
            return Err(NavError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
        decoded.truncate(start + chunk_size);
    }

    Ok(decoded)
}

fn ensure_body_fits(len: usize) -> NavResult<()> {
    if len > MAX_BODY_BYTES {
        return Err(body_too_large());
    }
    Ok(())
}

fn body_too_large() -> NavError {
    NavError::new(
        "net.http.body_too_large",
        format!("response body exceeds {MAX_BODY_BYTES} bytes"),
    )
}

fn read_crlf_line(reader: &mut impl Read) -> NavResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact(&mut byte).map_err(|error| {
            NavError::new(
                "net.http.read_body_failed",
                format!("failed while reading chunked transfer line: {error}"),
            )
        })?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(NavError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return String::from_utf8(line).map_err(|error| {
                NavError::new(
                    "net.http.chunk_line_invalid_utf8",
                    format!("chunk metadata line is not valid UTF-8: {error}"),
                )
            });
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> NavResult<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(NavError::new(
            "net.http.version_unsupported",
            format!("unsupported response version in status line `{line}`"),
        ));
    }

    let code_text = parts.next().unwrap_or_default();
    let code = code_text.parse::<u16>().map_err(|error| {
        NavError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;
    if !(100..=599).contains(&code) {
        return Err(NavError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ));
    }
    Ok(code)
}

fn parse_content_length(headers: &[Header]) -> NavResult<Option<usize>> {
    find_header(headers, "content-length")
        .map(|value| {
            value.trim().parse::<usize>().map_err(|error| {
                NavError::new(
                    "net.http.content_length_invalid",
                    format!("invalid Content-Length `{value}`: {error}"),
                )
            })
        })
        .transpose()
}

fn status_disallows_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn decode_content_encoding(headers: &[Header], body: Vec<u8>) -> NavResult<Vec<u8>> {
    let encodings: Vec<String> = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut decoded = body;
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(decoded)), "gzip")?,
            "deflate" => decode_deflate(decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(decoded), 4096), "brotli")?,
            _ => {
                return Err(NavError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn decode_deflate(body: Vec<u8>) -> NavResult<Vec<u8>> {
    let mut zlib_decoded = Vec::new();
    if ZlibDecoder::new(Cursor::new(&body))
        .read_to_end(&mut zlib_decoded)
        .is_ok()
    {
        return Ok(zlib_decoded);
    }

    read_all(DeflateDecoder::new(Cursor::new(body)), "deflate")
}

fn read_all(mut decoder: impl Read, name: &str) -> NavResult<Vec<u8>> {
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        NavError::new(
            "net.http.decode_failed",
            format!("{name} decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::decode_content_encoding;
    use super::read_chunked_body;
    use super::read_response;
    use super::write_request;
    use crate::http::FragmentRequest;
    use crate::http::Header;
    use crate::url::Origin;
    use brotli::CompressorWriter;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn writes_request_head_and_form_body() {
        let origin = match Origin::parse("https://dash.example") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let request = FragmentRequest::post_form("/manage/1/settings?partial=1", "a=1");

        let mut wire = Vec::new();
        assert!(write_request(&mut wire, &origin, &request).is_ok());
        let text = String::from_utf8_lossy(&wire);

        assert!(text.starts_with("POST /manage/1/settings?partial=1 HTTP/1.1\r\nHost: dash.example\r\n"));
        assert!(text.contains("Cache-Control: no-cache\r\n"));
        assert!(text.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\na=1"));
    }

    #[test]
    fn reads_content_length_response() {
        let raw = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 2\r\n\r\n[]extra";
        let response = match read_response(&mut Cursor::new(raw.to_vec())) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.status, 400);
        assert_eq!(response.body, b"[]");
    }

    #[test]
    fn reads_chunked_and_close_delimited_responses() {
        let chunked = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                        4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let response = read_response(&mut Cursor::new(chunked.to_vec()));
        assert_eq!(response.map(|value| value.body), Ok(b"Wikipedia".to_vec()));

        let closed = b"HTTP/1.0 200 OK\r\nConnection: close\r\n\r\n<p>hi</p>";
        let response = read_response(&mut Cursor::new(closed.to_vec()));
        assert_eq!(response.map(|value| value.body), Ok(b"<p>hi</p>".to_vec()));
    }

    #[test]
    fn chunked_decode_reports_invalid_size() {
        let decoded = read_chunked_body(&mut Cursor::new(Vec::<u8>::new()), b"Z\r\nx\r\n0\r\n\r\n".to_vec());
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "net.http.chunk_size_invalid");
        }
    }

    #[test]
    fn oversized_bodies_are_rejected_before_allocation() {
        let chunked = read_chunked_body(
            &mut std::io::empty(),
            b"ffffffffffffffff\r\nab\r\n0\r\n\r\n".to_vec(),
        );
        assert!(chunked.is_err());
        if let Err(error) = chunked {
            assert_eq!(error.code, "net.http.body_too_large");
        }

        let sized = read_response(&mut Cursor::new(
            b"HTTP/1.1 200 OK\r\nContent-Length: 99999999999\r\n\r\nab".to_vec(),
        ));
        assert!(sized.is_err());
        if let Err(error) = sized {
            assert_eq!(error.code, "net.http.body_too_large");
        }
    }

    #[test]
    fn rejects_malformed_status_lines() {
        let response = read_response(&mut Cursor::new(b"SPDY/3 200 OK\r\n\r\n".to_vec()));
        assert!(response.is_err());
        if let Err(error) = response {
            assert_eq!(error.code, "net.http.version_unsupported");
        }
    }

    #[test]
    fn decodes_gzip_and_brotli_content_encoding() {
        let mut gzip = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut gzip, Compression::default());
            assert!(encoder.write_all(b"hello gzip").is_ok());
            assert!(encoder.finish().is_ok());
        }
        let header = Header {
            name: "Content-Encoding".to_owned(),
            value: "gzip".to_owned(),
        };
        assert_eq!(
            decode_content_encoding(&[header], gzip),
            Ok(b"hello gzip".to_vec())
        );

        let mut br = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut br, 4096, 5, 22);
            assert!(writer.write_all(b"hello br").is_ok());
            assert!(writer.flush().is_ok());
        }
        let header = Header {
            name: "Content-Encoding".to_owned(),
            value: "br".to_owned(),
        };
        assert_eq!(decode_content_encoding(&[header], br), Ok(b"hello br".to_vec()));
    }
}
