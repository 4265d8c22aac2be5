//! Fire-and-forget command delivery.
//!
//! Command methods on a device build an envelope synchronously and hand the
//! HTTP exchange to a background task. Delivery failures are logged and
//! swallowed: switch commands are idempotent and the next discovery update
//! reconciles the state.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use super::device::DeviceIdentity;
use crate::crypto;
use crate::transport::CommandTransport;

pub(crate) const SWITCH_PATH: &str = "/zeroconf/switch";
pub(crate) const SWITCHES_PATH: &str = "/zeroconf/switches";

fn switch_value(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Command body for the single-switch endpoint.
pub(crate) fn switch_body(on: bool) -> Value {
    serde_json::json!({ "switch": switch_value(on) })
}

/// Command body for the multi-switch endpoint.
pub(crate) fn switches_body(on: bool, outlet: u8) -> Value {
    serde_json::json!({
        "switches": [{ "switch": switch_value(on), "outlet": outlet }]
    })
}

/// Request envelope for the `/zeroconf` endpoints.
///
/// `data` is always the JSON-serialized command body as a string, encrypted
/// and base64-encoded for non-DIY devices.
#[derive(Debug, Serialize)]
struct CommandEnvelope {
    sequence: String,
    deviceid: String,
    encrypt: bool,
    #[serde(rename = "selfApikey", skip_serializing_if = "Option::is_none")]
    self_apikey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    data: String,
}

fn sequence() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}

/// Shared handle that turns command bodies into envelopes and delivers them
/// in tracked background tasks.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn CommandTransport>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            transport,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Send a command without blocking the caller.
    pub(crate) fn send(&self, identity: &DeviceIdentity, path: &str, body: Value) {
        let data = body.to_string();
        debug!(
            "Sending to \"{}{}\" data \"{}\"",
            identity.url, path, data
        );

        let mut envelope = CommandEnvelope {
            sequence: sequence(),
            deviceid: identity.id.clone(),
            encrypt: identity.encrypt,
            self_apikey: None,
            iv: None,
            data,
        };
        if identity.encrypt {
            if let Some(key) = &identity.key {
                let iv = crypto::generate_iv();
                match crypto::encrypt(&envelope.data, &iv, key) {
                    Ok(ciphertext) => {
                        envelope.self_apikey = Some("123".to_string());
                        envelope.iv = Some(iv);
                        envelope.data = ciphertext;
                    }
                    Err(e) => {
                        error!("Failed to encrypt command for {}: {}", identity.id, e);
                        return;
                    }
                }
            }
        }

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize command for {}: {}", identity.id, e);
                return;
            }
        };
        let url = format!("{}{}", identity.url, path);
        let id = identity.id.clone();
        let transport = Arc::clone(&self.transport);
        self.spawn(async move {
            deliver(transport, id, url, payload).await;
        });
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
    }

    /// Wait for every currently in-flight send to finish.
    pub async fn drain(&self) {
        let handles: Vec<_> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn deliver(transport: Arc<dyn CommandTransport>, id: String, url: String, payload: String) {
    let response = match transport.post(&url, payload).await {
        Ok(response) => response,
        Err(e) => {
            error!("Error sending command to \"{}\": {}", url, e);
            return;
        }
    };

    if response.status != 200 {
        error!(
            "Got HTTP status {} from \"{}\" for device {}",
            response.status, url, id
        );
        return;
    }
    match serde_json::from_str::<Value>(&response.body) {
        Ok(body) => {
            let error_code = body.get("error").and_then(Value::as_i64).unwrap_or(0);
            if error_code != 0 {
                error!("Got error {} from device {}", error_code, id);
            } else {
                debug!("Command sent to {} successfully", id);
            }
        }
        Err(e) => {
            error!(
                "Error processing response from \"{}\": {} ({})",
                url, response.body, e
            );
        }
    }
}
