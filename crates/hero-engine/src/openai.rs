use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hero_contracts::config::HeroConfig;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::cancel::CancellationToken;
use crate::provider::{
    ensure_not_cancelled, truncate_text, CreateImageRequest, EditImageRequest, EncodedImage,
    ImageProvider,
};

const ORGANIZATION_HEADER: &str = "OpenAI-Organization";

/// OpenAI Images API client (`/images/generations` and `/images/edits`).
///
/// Built explicitly from configuration and owned by the generator; there is
/// no process-wide client.
pub struct OpenAiImageProvider {
    api_base: String,
    api_key: String,
    organization: Option<String>,
    http: HttpClient,
    transport_retries: usize,
    retry_backoff: Duration,
}

impl OpenAiImageProvider {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed building OpenAI HTTP client")?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            organization: None,
            http,
            transport_retries: 1,
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// `Ok(None)` when no API key is configured for the scope.
    pub fn from_config(config: &HeroConfig, scope: Option<&str>) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key(scope) else {
            return Ok(None);
        };
        let provider = Self::new(
            &config.api_base(scope),
            &api_key,
            config.request_timeout(scope),
        )?
        .with_organization(config.organization_id(scope))
        .with_retries(config.transport_retries(scope), config.retry_backoff(scope));
        Ok(Some(provider))
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn with_retries(mut self, transport_retries: usize, retry_backoff: Duration) -> Self {
        self.transport_retries = transport_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.bearer_auth(&self.api_key);
        match self.organization.as_deref() {
            Some(organization) => builder.header(ORGANIZATION_HEADER, organization),
            None => builder,
        }
    }

    /// Sends the request built by `build`, retrying transient transport
    /// failures with linear backoff. Request-shape and API errors are not retried.
    fn send_with_retries<F>(&self, label: &str, cancel: &CancellationToken, build: F) -> Result<Value>
    where
        F: Fn() -> Result<RequestBuilder>,
    {
        let mut attempt = 0usize;
        loop {
            ensure_not_cancelled(cancel)?;
            let request = self.authorized(build()?);
            match request.send() {
                Ok(response) => return response_json_or_error(label, response),
                Err(raw) => {
                    let err = anyhow::Error::new(raw).context(format!("{label} request failed"));
                    if !is_retryable_transport_error(&err) || attempt >= self.transport_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    log::warn!(
                        "{label} transport retry {attempt}/{} after transient failure: {err:#}",
                        self.transport_retries
                    );
                    thread::sleep(self.retry_backoff * attempt as u32);
                }
            }
        }
    }

    fn extract_image(&self, response_payload: &Value) -> Result<EncodedImage> {
        let first = response_payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_object)
            .context("OpenAI response returned no images")?;
        let revised_prompt = first
            .get("revised_prompt")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(b64) = first
            .get("b64_json")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(EncodedImage {
                b64_json: b64.trim().to_string(),
                revised_prompt,
            });
        }
        if let Some(url) = first.get("url").and_then(Value::as_str) {
            let bytes = self.download_image(url)?;
            return Ok(EncodedImage {
                revised_prompt,
                ..EncodedImage::from_bytes(&bytes)
            });
        }
        bail!("OpenAI image item carried neither b64_json nor url");
    }

    fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading provider image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "provider image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        Ok(response
            .bytes()
            .context("failed reading provider image bytes")?
            .to_vec())
    }
}

impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn create_image(
        &self,
        request: &CreateImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = Value::Object(create_payload(request));
        let response_payload = self.send_with_retries("OpenAI generations", cancel, || {
            Ok(self.http.post(&endpoint).json(&payload))
        })?;
        self.extract_image(&response_payload)
    }

    fn edit_image(
        &self,
        request: &EditImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let image_path = request.image.path();
        // Read once per call; the bytes are dropped when the call returns.
        let bytes = std::fs::read(image_path)
            .with_context(|| format!("failed reading {}", image_path.display()))?;
        let file_name = request.image.file_name();
        let mime = mime_for_path(image_path).unwrap_or("image/png");

        let response_payload = self.send_with_retries("OpenAI edits", cancel, || {
            let mut form = MultipartForm::new();
            for (key, value) in edit_form_fields(request) {
                form = form.text(key, value);
            }
            let part = MultipartPart::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str(mime)
                .with_context(|| {
                    format!("invalid multipart mime '{mime}' for {}", image_path.display())
                })?;
            Ok(self.http.post(&endpoint).multipart(form.part("image", part)))
        })?;
        self.extract_image(&response_payload)
    }
}

fn create_payload(request: &CreateImageRequest) -> Map<String, Value> {
    let mut payload = json!({
        "model": request.model,
        "prompt": request.prompt,
        "n": request.n.max(1),
        "size": request.size,
    })
    .as_object()
    .cloned()
    .unwrap_or_default();
    if let Some(quality) = request.quality.as_deref() {
        payload.insert("quality".to_string(), Value::String(quality.to_string()));
    }
    if request.model.starts_with("dall-e-") {
        payload.insert(
            "response_format".to_string(),
            Value::String("b64_json".to_string()),
        );
    }
    payload
}

fn edit_form_fields(request: &EditImageRequest) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("model", request.model.clone()),
        ("prompt", request.prompt.clone()),
        ("n", request.n.max(1).to_string()),
        ("size", request.size.clone()),
    ];
    if let Some(quality) = request.quality.as_deref() {
        fields.push(("quality", quality.to_string()));
    }
    fields
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::path::{Path, PathBuf};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use hero_contracts::config::{paths, ConfigStore, HeroConfig};
    use serde_json::json;

    use super::{
        create_payload, edit_form_fields, is_retryable_transport_error, mime_for_path,
        OpenAiImageProvider, ORGANIZATION_HEADER,
    };
    use crate::cancel::CancellationToken;
    use crate::provider::{CreateImageRequest, EditImageRequest, ImageProvider};
    use crate::references::ImageSource;

    const IMAGE_BODY: &str = r#"{"created":1,"data":[{"b64_json":"aGVsbG8="}]}"#;

    enum Reply {
        /// Read the request, then close without answering.
        Hangup,
        Json(&'static str),
    }

    /// Serves one scripted reply per accepted connection and hands back the
    /// raw requests it saw.
    fn serve(script: Vec<Reply>) -> anyhow::Result<(String, JoinHandle<Vec<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}/v1", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for reply in script {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                seen.push(read_request(&mut stream));
                if let Reply::Json(body) = reply {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.flush();
                }
            }
            seen
        });
        Ok((base, handle))
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let header_end = raw
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
                .map(|at| at + 4);
            if let Some(end) = header_end {
                let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let complete = if head.contains("transfer-encoding: chunked") {
                    raw.ends_with(b"0\r\n\r\n")
                } else {
                    raw.len() >= end + body_len
                };
                if complete {
                    break;
                }
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => raw.extend_from_slice(&chunk[..read]),
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    fn joined(handle: JoinHandle<Vec<String>>) -> Vec<String> {
        handle
            .join()
            .unwrap_or_else(|_| panic!("test server panicked"))
    }

    fn local_provider(base: &str, retries: usize) -> anyhow::Result<OpenAiImageProvider> {
        Ok(
            OpenAiImageProvider::new(base, "sk-test", Duration::from_secs(5))?
                .with_retries(retries, Duration::from_millis(10)),
        )
    }

    fn provider() -> anyhow::Result<OpenAiImageProvider> {
        OpenAiImageProvider::new("http://127.0.0.1:9/v1/", "sk-test", Duration::from_secs(5))
    }

    fn create_request(model: &str, quality: Option<&str>) -> CreateImageRequest {
        CreateImageRequest {
            model: model.to_string(),
            prompt: "hero".to_string(),
            size: "1024x1024".to_string(),
            quality: quality.map(str::to_string),
            n: 0,
        }
    }

    #[test]
    fn from_config_requires_api_key() -> anyhow::Result<()> {
        assert!(OpenAiImageProvider::from_config(&HeroConfig::default(), None)?.is_none());

        let store = ConfigStore::new()
            .with_default(paths::API_KEY, json!("sk-live"))
            .with_default(paths::ORGANIZATION_ID, json!("org-9"))
            .with_default(paths::API_BASE, json!("https://proxy.local/v1/"));
        let provider = OpenAiImageProvider::from_config(&HeroConfig::new(store), None)?
            .unwrap_or_else(|| panic!("provider expected"));
        assert_eq!(provider.api_base, "https://proxy.local/v1");
        assert_eq!(provider.organization.as_deref(), Some("org-9"));
        assert_eq!(provider.transport_retries, 1);
        Ok(())
    }

    #[test]
    fn requests_carry_bearer_and_optional_organization() -> anyhow::Result<()> {
        let plain = provider()?;
        let request = plain.authorized(plain.http.post("http://127.0.0.1:9/x")).build()?;
        assert_eq!(
            request.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer sk-test")
        );
        assert!(request.headers().get(ORGANIZATION_HEADER).is_none());

        let with_org = provider()?.with_organization(Some(" org-1 ".to_string()));
        let request = with_org
            .authorized(with_org.http.post("http://127.0.0.1:9/x"))
            .build()?;
        assert_eq!(
            request.headers().get(ORGANIZATION_HEADER).and_then(|v| v.to_str().ok()),
            Some("org-1")
        );

        let blank_org = provider()?.with_organization(Some("  ".to_string()));
        assert!(blank_org.organization.is_none());
        Ok(())
    }

    #[test]
    fn create_payload_sets_fixed_params_and_optional_quality() {
        let payload = create_payload(&create_request("gpt-image-1", Some("high")));
        assert_eq!(payload["model"], json!("gpt-image-1"));
        assert_eq!(payload["size"], json!("1024x1024"));
        assert_eq!(payload["quality"], json!("high"));
        assert_eq!(payload["n"], json!(1));
        assert!(payload.get("response_format").is_none());

        let minimal = create_payload(&create_request("dall-e-3", None));
        assert!(minimal.get("quality").is_none());
        assert_eq!(minimal["response_format"], json!("b64_json"));
    }

    #[test]
    fn edit_form_fields_mirror_create_params() {
        let request = EditImageRequest {
            model: "gpt-image-1".to_string(),
            prompt: "hero".to_string(),
            image: ImageSource {
                product_id: 1,
                path: PathBuf::from("/tmp/a.jpg"),
            },
            size: "1024x1024".to_string(),
            quality: Some("high".to_string()),
            n: 1,
        };
        let fields = edit_form_fields(&request);
        assert!(fields.contains(&("quality", "high".to_string())));
        assert!(fields.contains(&("n", "1".to_string())));
        assert_eq!(fields[0], ("model", "gpt-image-1".to_string()));
    }

    #[test]
    fn extract_image_reads_first_b64_item() -> anyhow::Result<()> {
        let provider = provider()?;
        let image = provider.extract_image(&json!({
            "created": 1,
            "data": [
                {"b64_json": " aGVsbG8= ", "revised_prompt": "better"},
                {"b64_json": "ignored"}
            ]
        }))?;
        assert_eq!(image.b64_json, "aGVsbG8=");
        assert_eq!(image.revised_prompt.as_deref(), Some("better"));

        assert!(provider.extract_image(&json!({"data": []})).is_err());
        assert!(provider.extract_image(&json!({"data": [{}]})).is_err());
        Ok(())
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(mime_for_path(Path::new("a/b.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("a/b.png")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("a/b")), None);
    }

    #[test]
    fn api_errors_are_not_transport_retryable() {
        let err = anyhow::anyhow!("OpenAI edits request failed (400): unknown parameter");
        assert!(!is_retryable_transport_error(&err));
    }

    #[test]
    fn transport_failure_is_retried_once() -> anyhow::Result<()> {
        let (base, server) = serve(vec![Reply::Hangup, Reply::Json(IMAGE_BODY)])?;
        let image = local_provider(&base, 1)?.create_image(
            &create_request("gpt-image-1", Some("high")),
            &CancellationToken::new(),
        )?;
        assert_eq!(image.b64_json, "aGVsbG8=");

        let requests = joined(server);
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let lowered = request.to_ascii_lowercase();
            assert!(lowered.starts_with("post /v1/images/generations "));
            assert!(lowered.contains("authorization: bearer sk-test"));
        }
        assert!(requests[1].contains(r#""quality":"high""#));
        Ok(())
    }

    #[test]
    fn transport_failure_without_retries_is_final() -> anyhow::Result<()> {
        let (base, server) = serve(vec![Reply::Hangup])?;
        let result = local_provider(&base, 0)?.create_image(
            &create_request("gpt-image-1", None),
            &CancellationToken::new(),
        );
        let Err(err) = result else {
            panic!("hangup must fail without retries");
        };
        assert!(is_retryable_transport_error(&err));
        assert_eq!(joined(server).len(), 1);
        Ok(())
    }

    #[test]
    fn cancelled_request_never_connects() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let base = format!("http://{}/v1", listener.local_addr()?);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            local_provider(&base, 3)?.create_image(&create_request("gpt-image-1", None), &cancel);
        assert!(result.is_err());
        assert!(matches!(
            listener.accept().map(|_| ()),
            Err(err) if err.kind() == ErrorKind::WouldBlock
        ));
        Ok(())
    }

    #[test]
    fn edit_uploads_reference_as_multipart_image_part() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let reference = temp.path().join("lamp.jpg");
        std::fs::write(&reference, b"reference-bytes")?;
        let (base, server) = serve(vec![Reply::Json(IMAGE_BODY)])?;

        let request = EditImageRequest {
            model: "gpt-image-1".to_string(),
            prompt: "hero".to_string(),
            image: ImageSource {
                product_id: 1,
                path: reference,
            },
            size: "1024x1024".to_string(),
            quality: Some("high".to_string()),
            n: 1,
        };
        let image = local_provider(&base, 0)?.edit_image(&request, &CancellationToken::new())?;
        assert_eq!(image.b64_json, "aGVsbG8=");

        let requests = joined(server);
        assert_eq!(requests.len(), 1);
        let lowered = requests[0].to_ascii_lowercase();
        assert!(lowered.starts_with("post /v1/images/edits "));
        assert!(lowered.contains("content-type: multipart/form-data; boundary="));
        assert!(requests[0].contains(r#"name="image"; filename="lamp.jpg""#));
        assert!(lowered.contains("content-type: image/jpeg"));
        assert!(requests[0].contains("reference-bytes"));
        assert!(requests[0].contains(r#"name="quality""#));
        Ok(())
    }
}
