// Login request against the Preservica access token endpoint

use anyhow::{Context, Result};
use reqwest::Client;

use super::types::{CredentialSet, LoginResponse};

/// Get login URL for a Preservica host
fn get_login_url(base_url: &str) -> String {
    format!("{}/api/accesstoken/login", base_url.trim_end_matches('/'))
}

/// Exchange credentials for an access token
///
/// The HTTP status is not inspected: Preservica answers failed logins with a
/// JSON body carrying `success: false`, which the caller decides how to treat.
pub async fn login(client: &Client, base_url: &str, creds: &CredentialSet) -> Result<LoginResponse> {
    tracing::info!(
        "Requesting Preservica access token for {} on tenant {}...",
        creds.username(),
        creds.tenant()
    );

    let url = get_login_url(base_url);

    let form = [
        ("username", creds.username()),
        ("password", creds.password()),
        ("tenant", creds.tenant()),
    ];

    let response = client
        .post(&url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(&form)
        .send()
        .await
        .context("Failed to send login request")?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read login response")?;

    serde_json::from_str::<LoginResponse>(&body).with_context(|| {
        format!(
            "Failed to parse login response (status {}): {}",
            status,
            body.chars().take(200).collect::<String>()
        )
    })
}
