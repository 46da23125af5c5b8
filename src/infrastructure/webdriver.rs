// W3C WebDriver client - just enough of the protocol to read a speed-test page
use crate::domain::reading::Browser;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, thiserror::Error)]
pub enum WebDriverError {
    #[error("could not reach WebDriver at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("WebDriver request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebDriver {error}: {message}")]
    Command { error: String, message: String },
    #[error("unexpected WebDriver response: {0}")]
    Protocol(String),
}

impl WebDriverError {
    /// The browser or its driver is gone, so the session cannot be reused.
    pub fn is_session_lost(&self) -> bool {
        match self {
            WebDriverError::Command { error, .. } => error == "invalid session id",
            WebDriverError::Unreachable { .. } => true,
            WebDriverError::Http(e) => e.is_connect(),
            WebDriverError::Protocol(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct CommandFailure {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

/// Opaque reference to an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

/// One browser session on a chromedriver or msedgedriver endpoint.
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
}

impl WebDriverSession {
    pub async fn start(
        endpoint: &str,
        browser: Browser,
        headless: bool,
        request_timeout: Duration,
    ) -> Result<Self, WebDriverError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        let response = client
            .post(format!("{endpoint}/session"))
            .json(&capabilities(browser, headless))
            .send()
            .await
            .map_err(|source| WebDriverError::Unreachable {
                endpoint: endpoint.clone(),
                source,
            })?;
        let session: NewSession = unwrap_value(response).await?;
        tracing::debug!(%browser, session = %session.session_id, "webdriver session started");

        Ok(Self {
            client,
            base: format!("{endpoint}/session/{}", session.session_id),
        })
    }

    pub async fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        self.post("url", json!({ "url": url })).await
    }

    pub async fn find_elements(&self, css: &str) -> Result<Vec<ElementRef>, WebDriverError> {
        let found: Vec<Value> = self
            .post("elements", json!({ "using": "css selector", "value": css }))
            .await?;
        found.iter().map(element_ref).collect()
    }

    pub async fn click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.post(&format!("element/{}/click", element.0), json!({})).await
    }

    pub async fn text(&self, element: &ElementRef) -> Result<String, WebDriverError> {
        self.get(&format!("element/{}/text", element.0)).await
    }

    pub async fn is_displayed(&self, element: &ElementRef) -> Result<bool, WebDriverError> {
        self.get(&format!("element/{}/displayed", element.0)).await
    }

    pub async fn delete_cookies(&self) -> Result<(), WebDriverError> {
        self.delete("cookie").await
    }

    /// Ends the session and closes the browser.
    pub async fn quit(self) -> Result<(), WebDriverError> {
        let response = self.client.delete(&self.base).send().await?;
        unwrap_value::<Value>(response).await.map(|_| ())
    }

    async fn post<T: DeserializeOwned>(&self, command: &str, body: Value) -> Result<T, WebDriverError> {
        let response = self
            .client
            .post(format!("{}/{command}", self.base))
            .json(&body)
            .send()
            .await?;
        unwrap_value(response).await
    }

    async fn get<T: DeserializeOwned>(&self, command: &str) -> Result<T, WebDriverError> {
        let response = self.client.get(format!("{}/{command}", self.base)).send().await?;
        unwrap_value(response).await
    }

    async fn delete<T: DeserializeOwned>(&self, command: &str) -> Result<T, WebDriverError> {
        let response = self.client.delete(format!("{}/{command}", self.base)).send().await?;
        unwrap_value(response).await
    }
}

fn capabilities(browser: Browser, headless: bool) -> Value {
    let args: Vec<&str> = if headless {
        vec!["--headless=new", "--disable-gpu"]
    } else {
        Vec::new()
    };
    let always_match = match browser {
        Browser::Chrome => json!({ "browserName": "chrome", "goog:chromeOptions": { "args": args } }),
        Browser::Edge => json!({ "browserName": "MicrosoftEdge", "ms:edgeOptions": { "args": args } }),
    };
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

fn element_ref(value: &Value) -> Result<ElementRef, WebDriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| WebDriverError::Protocol(format!("not an element reference: {value}")))
}

/// Every WebDriver response wraps its payload in `{"value": ...}`; failures
/// carry `{"error", "message"}` there instead.
async fn unwrap_value<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, WebDriverError> {
    let status = response.status();
    let body: Value = response.json().await?;
    parse_envelope(status.is_success(), body)
}

fn parse_envelope<T: DeserializeOwned>(success: bool, body: Value) -> Result<T, WebDriverError> {
    if !success {
        let failure = serde_json::from_value::<Envelope<CommandFailure>>(body)
            .map_err(|e| WebDriverError::Protocol(e.to_string()))?;
        return Err(WebDriverError::Command {
            error: failure.value.error,
            message: failure.value.message,
        });
    }
    serde_json::from_value::<Envelope<T>>(body)
        .map(|envelope| envelope.value)
        .map_err(|e| WebDriverError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_per_browser() {
        let chrome = capabilities(Browser::Chrome, true);
        let always = &chrome["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "chrome");
        assert_eq!(always["goog:chromeOptions"]["args"][0], "--headless=new");

        let edge = capabilities(Browser::Edge, false);
        let always = &edge["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "MicrosoftEdge");
        assert!(always["ms:edgeOptions"]["args"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_envelopes_unwrap_values_and_errors() {
        let session: NewSession =
            parse_envelope(true, json!({ "value": { "sessionId": "abc", "capabilities": {} } })).unwrap();
        assert_eq!(session.session_id, "abc");

        let displayed: bool = parse_envelope(true, json!({ "value": true })).unwrap();
        assert!(displayed);

        let err = parse_envelope::<Value>(
            false,
            json!({ "value": { "error": "no such element", "message": "Unable to locate", "stacktrace": "" } }),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "WebDriver no such element: Unable to locate");
        assert!(!err.is_session_lost());

        let gone = parse_envelope::<Value>(
            false,
            json!({ "value": { "error": "invalid session id", "message": "session deleted because of page crash" } }),
        )
        .unwrap_err();
        assert!(gone.is_session_lost());
    }

    #[test]
    fn test_element_references() {
        let found = json!([{ ELEMENT_KEY: "e1" }, { ELEMENT_KEY: "e2" }]);
        let refs: Vec<_> = found.as_array().unwrap().iter().map(element_ref).collect::<Result<_, _>>().unwrap();
        assert_eq!(refs, vec![ElementRef("e1".to_string()), ElementRef("e2".to_string())]);
        assert!(element_ref(&json!({ "ELEMENT": "legacy" })).is_err());
    }
}
