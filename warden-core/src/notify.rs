//! Outbound notifications for clusters that end without a pull request.

use crate::config::NotifyConfig;
use crate::types::LogCluster;
use crate::{Error, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde_json::json;
use std::fmt::Write;
use std::time::Duration;

/// Notification sender. Failures surface as [`Error::SendFailure`].
pub trait Notifier: Send + Sync {
    fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Subject line for a benign-cluster email.
pub fn benign_subject(environment: &str, cluster: &LogCluster) -> String {
    format!("[Ledger Agent] {}: {} (no fix needed)", environment, cluster.title)
}

/// HTML body explaining why no code change was produced.
pub fn benign_html(environment: &str, cluster: &LogCluster, rationale: &str) -> String {
    let mut samples = String::new();
    for sample in &cluster.sample_messages {
        let _ = write!(samples, "<li><code>{}</code></li>", escape_html(sample));
    }
    let reason = if rationale.trim().is_empty() {
        "No reason provided."
    } else {
        rationale
    };

    format!(
        r#"<html>
<body style="font-family: -apple-system, sans-serif; max-width: 720px; margin: 0 auto;">
  <h2>Ledger Agent Report: {env}</h2>
  <div style="margin-bottom: 24px; padding: 16px; border: 1px solid #ddd; border-radius: 8px;">
    <h3 style="margin-top: 0;">{title}</h3>
    <table style="margin-bottom: 12px;">
      <tr><td><strong>Slug:</strong></td><td>{slug}</td></tr>
      <tr><td><strong>Module:</strong></td><td>{modules}</td></tr>
      <tr><td><strong>Severity:</strong></td><td>{severity}</td></tr>
      <tr><td><strong>Occurrences:</strong></td><td>{count}</td></tr>
    </table>
    <p><strong>Sample messages:</strong></p>
    <ul>{samples}</ul>
    <p><strong>Why no PR was created:</strong></p>
    <p>{reason}</p>
  </div>
  <hr style="margin-top: 32px;">
  <p style="color: #666; font-size: 12px;">Automated report from the ledger agent ({env}).</p>
</body>
</html>"#,
        env = escape_html(environment),
        title = escape_html(&cluster.title),
        slug = escape_html(&cluster.slug),
        modules = escape_html(&cluster.modules.join(", ")),
        severity = cluster.severity,
        count = cluster.occurrence_count,
        samples = samples,
        reason = escape_html(reason),
    )
}

/// Sends email through the Resend HTTP API.
pub struct ResendNotifier {
    endpoint: String,
    from: String,
    api_key: String,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl ResendNotifier {
    pub fn new(config: &NotifyConfig, environment: &str) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| Error::Config("notify.api_key (or RESEND_API_KEY) is required".to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::SendFailure(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::SendFailure(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            from: config.sender(environment),
            api_key,
            runtime,
            http,
        })
    }
}

impl Notifier for ResendNotifier {
    fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::Config(format!("invalid resend api key header: {e}")))?;

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(&self.endpoint)
                .header(AUTHORIZATION, auth)
                .json(&json!({
                    "from": self.from,
                    "to": [to],
                    "subject": subject,
                    "html": html,
                }))
                .send()
                .await
                .map_err(|e| Error::SendFailure(format!("resend request failed: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let body: String = body.chars().take(500).collect();
                return Err(Error::SendFailure(format!(
                    "resend returned {}: {}",
                    status.as_u16(),
                    body
                )));
            }
            tracing::info!(to, subject, "Notification sent");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn cluster() -> LogCluster {
        LogCluster {
            slug: "rpc-peer-timeout".to_string(),
            title: "RPC timeout <peer>".to_string(),
            summary: "Peers time out".to_string(),
            representative_message: "RPC timeout to peer X".to_string(),
            sample_messages: vec!["RPC timeout to peer <X>".to_string()],
            occurrence_count: 50,
            modules: vec!["Overlay".to_string()],
            severity: Severity::Warning,
        }
    }

    #[test]
    fn html_body_escapes_and_includes_details() {
        let html = benign_html("testnet", &cluster(), "Transient network condition & churn");
        assert!(html.contains("RPC timeout &lt;peer&gt;"));
        assert!(html.contains("<code>RPC timeout to peer &lt;X&gt;</code>"));
        assert!(html.contains("<td>50</td>"));
        assert!(html.contains("<td>warning</td>"));
        assert!(html.contains("Transient network condition &amp; churn"));
    }

    #[test]
    fn empty_rationale_has_placeholder() {
        let html = benign_html("testnet", &cluster(), "  ");
        assert!(html.contains("No reason provided."));
    }

    #[test]
    fn subject_names_environment() {
        assert_eq!(
            benign_subject("devnet", &cluster()),
            "[Ledger Agent] devnet: RPC timeout <peer> (no fix needed)"
        );
    }

    #[test]
    fn unreachable_endpoint_is_send_failure() {
        let config = NotifyConfig {
            enabled: true,
            api_key: Some("re_test".to_string()),
            to: Some("ops@example.com".to_string()),
            endpoint: "http://127.0.0.1:9/emails".to_string(),
            timeout_secs: 2,
            ..NotifyConfig::default()
        };
        let notifier = ResendNotifier::new(&config, "testnet").unwrap();
        assert!(matches!(
            notifier.send("ops@example.com", "s", "<p>x</p>"),
            Err(Error::SendFailure(_))
        ));
    }
}
