use std::collections::HashSet;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Builds the multipart body forwarded to the upstream application.
///
/// Remembers the names of the fields the gateway itself wrote, so client
/// parts can be checked against them.
#[derive(Debug)]
pub struct MultipartWriter {
    boundary: String,
    buf: BytesMut,
    fields: usize,
    written: HashSet<String>,
}

/// Percent-encode the characters that would break a quoted header
/// parameter, the way browsers do for form field names.
fn escape_param(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

impl MultipartWriter {
    pub fn new() -> Self {
        Self {
            boundary: format!("sluice-{}", Uuid::new_v4().simple()),
            buf: BytesMut::new(),
            fields: 0,
            written: HashSet::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value for the finished body.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Parts written so far.
    pub fn field_count(&self) -> usize {
        self.fields
    }

    /// Whether the gateway wrote a field called `name`. Client parts copied
    /// with [`write_value`](Self::write_value) do not count.
    pub fn wrote(&self, name: &str) -> bool {
        self.written.contains(name)
    }

    fn start_part(&mut self) {
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"\r\n");
    }

    pub fn write_field(&mut self, name: &str, value: &str) {
        self.put_value(name, None, value.as_bytes());
        self.written.insert(name.to_string());
    }

    /// Copy a client value part as-is, keeping its declared content type.
    pub fn write_value(&mut self, name: &str, content_type: Option<&str>, value: &[u8]) {
        self.put_value(name, content_type, value);
    }

    fn put_value(&mut self, name: &str, content_type: Option<&str>, value: &[u8]) {
        self.start_part();
        self.buf.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n",
                escape_param(name)
            )
            .as_bytes(),
        );
        if let Some(content_type) = content_type {
            self.buf
                .put_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        self.buf.put_slice(b"\r\n");
        self.buf.put_slice(value);
        self.buf.put_slice(b"\r\n");
        self.fields += 1;
    }

    pub fn write_file(&mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) {
        self.start_part();
        self.buf.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                escape_param(name),
                escape_param(filename),
                content_type
            )
            .as_bytes(),
        );
        self.buf.put_slice(data);
        self.buf.put_slice(b"\r\n");
        self.fields += 1;
        self.written.insert(name.to_string());
    }

    /// Close the body.
    pub fn finish(mut self) -> Bytes {
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"--\r\n");
        self.buf.freeze()
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_body_parses_back() {
        let mut writer = MultipartWriter::new();
        writer.write_field("metadata.path", "/tmp/x");
        writer.write_field("quote\"d", "v");
        writer.write_file("file", "a.zip", "application/zip", b"PK\x03\x04");
        assert_eq!(writer.field_count(), 3);

        let boundary = writer.boundary().to_string();
        let content_type = writer.content_type();
        let body = writer.finish();

        assert_eq!(multer::parse_boundary(&content_type).unwrap(), boundary);

        let mut multipart = multer::Multipart::new(
            stream::once(async move { Ok::<_, std::io::Error>(body) }),
            boundary,
        );

        let field = multipart.next_field().await.unwrap().unwrap();
        assert_eq!(field.name(), Some("metadata.path"));
        assert_eq!(field.text().await.unwrap(), "/tmp/x");

        let field = multipart.next_field().await.unwrap().unwrap();
        assert_eq!(field.name(), Some("quote%22d"));
        field.text().await.unwrap();

        let field = multipart.next_field().await.unwrap().unwrap();
        assert_eq!(field.file_name(), Some("a.zip"));
        assert_eq!(&field.bytes().await.unwrap()[..], b"PK\x03\x04");

        assert!(multipart.next_field().await.unwrap().is_none());
    }

    #[test]
    fn test_tracks_gateway_fields_only() {
        let mut writer = MultipartWriter::new();
        writer.write_value("message", Some("text/plain"), b"hello");
        writer.write_field("metadata.size", "12");

        assert!(writer.wrote("metadata.size"));
        assert!(!writer.wrote("message"));
        assert_eq!(writer.field_count(), 2);
    }
}
