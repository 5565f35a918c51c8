//! Minimal W3C WebDriver client
//!
//! Speaks the WebDriver JSON wire protocol over HTTP against a local
//! chromedriver-compatible endpoint. Only the commands the registry session
//! needs are implemented. Selectors are CSS by default and XPath when they
//! look like one (`//...`), so prioritized selector lists can mix both.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// W3C element identifier key in wire payloads
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// WebDriver key code for Enter
pub const ENTER_KEY: &str = "\u{e007}";

const HTTP_TIMEOUT_SECS: u64 = 60;

/// WebDriver command errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("WebDriver transport error: {0}")]
    Transport(String),

    /// The window or session behind a handle is gone; callers replace the
    /// handle rather than retry the command
    #[error("WebDriver session closed: {0}")]
    SessionClosed(String),

    #[error("WebDriver error {code}: {message}")]
    Protocol { code: String, message: String },
}

impl From<DriverError> for memrec_common::Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::SessionClosed(m) => memrec_common::Error::SessionClosed(m),
            other => memrec_common::Error::Registry(other.to_string()),
        }
    }
}

/// Map a wire error payload onto the driver error taxonomy.
fn classify(code: &str, message: &str) -> DriverError {
    let closed = matches!(code, "no such window" | "invalid session id")
        || message.contains("chrome not reachable")
        || message.contains("disconnected")
        || message.contains("target closed");
    if closed {
        DriverError::SessionClosed(format!("{code}: {message}"))
    } else {
        DriverError::Protocol {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Reference to a DOM element within the current session
#[derive(Debug, Clone)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.0
    }

    /// JSON form accepted in execute-script arguments.
    pub fn to_arg(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

/// One browser session against a WebDriver endpoint
pub struct WebDriver {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriver {
    /// Launch a browser session. Headless unless told otherwise.
    pub async fn new_session(base_url: &str, headless: bool) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        let mut chrome_args = vec![
            "--window-size=1366,900".to_string(),
            "--disable-gpu".to_string(),
        ];
        if headless {
            chrome_args.insert(0, "--headless=new".to_string());
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": chrome_args }
                }
            }
        });

        let base = base_url.trim_end_matches('/').to_string();
        let response = http
            .post(format!("{base}/session"))
            .json(&capabilities)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        let value = unwrap_value(response).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol {
                code: "session not created".to_string(),
                message: "response carried no sessionId".to_string(),
            })?
            .to_string();

        tracing::debug!(session = %session_id, headless, "WebDriver session created");
        Ok(Self {
            http,
            base_url: base,
            session_id,
        })
    }

    pub async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .get("/url")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// First element matching `selector`, or None when absent.
    pub async fn find(&self, selector: &str) -> Result<Option<ElementRef>, DriverError> {
        let (using, value) = locator(selector);
        match self
            .post("/element", json!({ "using": using, "value": value }))
            .await
        {
            Ok(v) => Ok(element_from(&v)),
            Err(DriverError::Protocol { code, .. }) if code == "no such element" => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The currently focused element, or None when nothing holds focus.
    pub async fn active_element(&self) -> Result<Option<ElementRef>, DriverError> {
        match self.get("/element/active").await {
            Ok(v) => Ok(element_from(&v)),
            Err(DriverError::Protocol { code, .. }) if code == "no such element" => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn find_all(&self, selector: &str) -> Result<Vec<ElementRef>, DriverError> {
        let (using, value) = locator(selector);
        let v = self
            .post("/elements", json!({ "using": using, "value": value }))
            .await?;
        Ok(v.as_array()
            .map(|items| items.iter().filter_map(element_from).collect())
            .unwrap_or_default())
    }

    pub async fn click(&self, el: &ElementRef) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/click", el.0), json!({}))
            .await?;
        Ok(())
    }

    pub async fn clear(&self, el: &ElementRef) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/clear", el.0), json!({}))
            .await?;
        Ok(())
    }

    pub async fn send_keys(&self, el: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/value", el.0), json!({ "text": text }))
            .await?;
        Ok(())
    }

    pub async fn text(&self, el: &ElementRef) -> Result<String, DriverError> {
        Ok(self
            .get(&format!("/element/{}/text", el.0))
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    pub async fn attribute(
        &self,
        el: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let v = self
            .get(&format!("/element/{}/attribute/{name}", el.0))
            .await?;
        Ok(v.as_str().map(|s| s.to_string()))
    }

    /// Element displayedness. Not part of the core protocol, but every
    /// mainstream driver serves the endpoint.
    pub async fn is_displayed(&self, el: &ElementRef) -> Result<bool, DriverError> {
        let v = self.get(&format!("/element/{}/displayed", el.0)).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    /// Handle of the window commands currently target.
    pub async fn window_handle(&self) -> Result<String, DriverError> {
        Ok(self
            .get("/window")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// Open a new tab and return its handle (does not switch to it).
    pub async fn new_window(&self) -> Result<String, DriverError> {
        let v = self.post("/window/new", json!({ "type": "tab" })).await?;
        v.get("handle")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| DriverError::Protocol {
                code: "unknown error".to_string(),
                message: "new window response carried no handle".to_string(),
            })
    }

    pub async fn switch_window(&self, handle: &str) -> Result<(), DriverError> {
        self.post("/window", json!({ "handle": handle })).await?;
        Ok(())
    }

    /// Tear down the browser session.
    pub async fn delete_session(&self) -> Result<(), DriverError> {
        let response = self
            .http
            .delete(self.url(""))
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        unwrap_value(response).await?;
        Ok(())
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, tail)
    }

    async fn post(&self, tail: &str, body: Value) -> Result<Value, DriverError> {
        let response = self
            .http
            .post(self.url(tail))
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        unwrap_value(response).await
    }

    async fn get(&self, tail: &str) -> Result<Value, DriverError> {
        let response = self
            .http
            .get(self.url(tail))
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        unwrap_value(response).await
    }
}

/// Check the HTTP status and peel the `{"value": ...}` envelope.
async fn unwrap_value(response: reqwest::Response) -> Result<Value, DriverError> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| DriverError::Transport(e.to_string()))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let code = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");
        return Err(classify(code, message));
    }
    Ok(value)
}

fn element_from(v: &Value) -> Option<ElementRef> {
    v.get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|s| ElementRef(s.to_string()))
}

/// CSS by default; XPath when the selector looks like one.
fn locator(selector: &str) -> (&'static str, &str) {
    if selector.starts_with("//") || selector.starts_with('(') || selector.starts_with("./") {
        ("xpath", selector)
    } else {
        ("css selector", selector)
    }
}

/// Quote a string as an XPath literal, handling embedded quotes.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
