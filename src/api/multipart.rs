//! Minimal `multipart/form-data` parser for buffered request bodies.

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl FormPart {
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .map_err(|_| anyhow!("form field '{}' is not valid UTF-8", self.name))
    }
}

/// Boundary parameter from a `Content-Type: multipart/form-data; boundary=...`.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Split `body` into its parts.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut pos = find(body, &delimiter, 0).ok_or_else(|| anyhow!("multipart boundary not found"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        pos = skip_line_break(body, pos)?;
        let headers_end =
            find(body, b"\r\n\r\n", pos).ok_or_else(|| anyhow!("unterminated part headers"))?;
        let headers = std::str::from_utf8(&body[pos..headers_end])
            .map_err(|_| anyhow!("part headers are not valid UTF-8"))?;
        let data_start = headers_end + 4;

        let mut closing = b"\r\n".to_vec();
        closing.extend_from_slice(&delimiter);
        let data_end =
            find(body, &closing, data_start).ok_or_else(|| anyhow!("unterminated form part"))?;

        parts.push(parse_part(headers, body[data_start..data_end].to_vec())?);
        pos = data_end + closing.len();
        if pos >= body.len() {
            return Err(anyhow!("missing closing multipart boundary"));
        }
    }
}

fn parse_part(headers: &str, data: Vec<u8>) -> Result<FormPart> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                match param.trim().split_once('=') {
                    Some((k, v)) if k.trim().eq_ignore_ascii_case("name") => {
                        name = Some(unquote(v));
                    }
                    Some((k, v)) if k.trim().eq_ignore_ascii_case("filename") => {
                        filename = Some(unquote(v));
                    }
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    Ok(FormPart {
        name: name.ok_or_else(|| anyhow!("form part without a name"))?,
        filename,
        content_type,
        data,
    })
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

fn skip_line_break(body: &[u8], pos: usize) -> Result<usize> {
    if body[pos..].starts_with(b"\r\n") {
        Ok(pos + 2)
    } else {
        Err(anyhow!("malformed multipart delimiter line"))
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|idx| idx + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(boundary: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        out.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"bin.jpg\"\r\n",
        );
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        out.extend_from_slice(&[0xff, 0xd8, b'\r', b'\n', 0x00, 0xff, 0xd9]);
        out.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        out.extend_from_slice(b"Content-Disposition: form-data; name=\"detection_zone\"\r\n\r\n");
        out.extend_from_slice(b"[100,100,300,300]");
        out.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        out
    }

    #[test]
    fn extracts_boundary() {
        assert_eq!(
            boundary("multipart/form-data; boundary=----abc123").as_deref(),
            Some("----abc123")
        );
        assert_eq!(
            boundary("Multipart/Form-Data; charset=utf-8; boundary=\"q r\"").as_deref(),
            Some("q r")
        );
        assert_eq!(boundary("application/json"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn parses_file_and_text_fields() -> Result<()> {
        let parts = parse(&body("XyZ"), "XyZ")?;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "file");
        assert_eq!(parts[0].filename.as_deref(), Some("bin.jpg"));
        assert_eq!(parts[0].content_type.as_deref(), Some("image/jpeg"));
        // Embedded CRLF inside binary data survives.
        assert_eq!(parts[0].data, vec![0xff, 0xd8, b'\r', b'\n', 0x00, 0xff, 0xd9]);
        assert_eq!(parts[1].text()?, "[100,100,300,300]");
        assert_eq!(parts[1].filename, None);
        Ok(())
    }

    #[test]
    fn rejects_truncated_body() {
        let full = body("XyZ");
        assert!(parse(&full[..full.len() - 12], "XyZ").is_err());
        assert!(parse(b"no boundary here", "XyZ").is_err());
    }

    #[test]
    fn empty_form_is_ok() -> Result<()> {
        assert!(parse(b"--XyZ--\r\n", "XyZ")?.is_empty());
        Ok(())
    }
}
