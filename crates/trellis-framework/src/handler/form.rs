//! `multipart/form-data` decoding for the `formData` kind.

use std::convert::Infallible;

use bytes::Bytes;
use http::{StatusCode, header};
use serde::Serialize;
use serde_json::{Map, Value};

use trellis_core::{HttpError, Request};

/// A parsed multipart submission.
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    /// Text fields as one JSON object; repeated names become arrays.
    pub fields: Value,
    pub files: Vec<UploadedFile>,
}

impl FormInput {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The first file uploaded under `field`.
    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field == field)
    }
}

/// One uploaded file.  Serializes without its contents, which is the shape
/// the files schema validates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    #[serde(skip)]
    pub data: Bytes,
}

/// Extracts the multipart boundary, or answers `415`.
pub fn boundary(req: &Request) -> Result<String, HttpError> {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| multer::parse_boundary(content_type).ok())
        .ok_or_else(|| {
            HttpError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                "expected a multipart/form-data body",
            )
        })
}

fn malformed(err: multer::Error) -> HttpError {
    HttpError::bad_request(format!("malformed multipart body: {err}"))
}

fn push_field(fields: &mut Map<String, Value>, name: String, value: String) {
    match fields.get_mut(&name) {
        Some(Value::Array(values)) => values.push(Value::String(value)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(value)]);
        }
        None => {
            fields.insert(name, Value::String(value));
        }
    }
}

/// Parses a buffered multipart body.
pub async fn parse(body: Bytes, boundary: String) -> Result<FormInput, HttpError> {
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Map::new();
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(malformed)?;
                files.push(UploadedFile {
                    field: name,
                    file_name: Some(file_name),
                    content_type,
                    size: data.len(),
                    data,
                });
            }
            None => {
                let text = field.text().await.map_err(malformed)?;
                push_field(&mut fields, name, text);
            }
        }
    }

    Ok(FormInput {
        fields: Value::Object(fields),
        files,
    })
}

/// The files as the JSON array the files schema sees.
pub fn describe_files(files: &[UploadedFile]) -> Value {
    serde_json::to_value(files).unwrap_or(Value::Array(Vec::new()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) const BOUNDARY: &str = "X-TRELLIS-BOUNDARY";

    pub(crate) fn multipart_body() -> Bytes {
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             Quarterly report\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"tag\"\r\n\r\n\
             finance\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"tag\"\r\n\r\n\
             q3\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"attachment\"; filename=\"report.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             a,b\n1,2\r\n\
             --{b}--\r\n",
            b = BOUNDARY
        );
        Bytes::from(body)
    }

    #[tokio::test]
    async fn test_parse_fields_and_files() {
        let form = parse(multipart_body(), BOUNDARY.to_string()).await.unwrap();

        assert_eq!(
            form.fields,
            json!({"title": "Quarterly report", "tag": ["finance", "q3"]})
        );
        let file = form.file("attachment").unwrap();
        assert_eq!(file.file_name.as_deref(), Some("report.csv"));
        assert_eq!(file.content_type.as_deref(), Some("text/csv"));
        assert_eq!(file.data, Bytes::from_static(b"a,b\n1,2"));
        assert_eq!(
            describe_files(&form.files),
            json!([{"field": "attachment", "fileName": "report.csv", "contentType": "text/csv", "size": 7}])
        );
    }

    #[test]
    fn test_non_multipart_is_unsupported() {
        let req = http::Request::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(boundary(&req).unwrap_err().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
