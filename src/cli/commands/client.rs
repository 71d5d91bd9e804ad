//! Fetch/publish commands - exercise a running gateway over HTTP.

use crate::cli::args::{ClientArgs, FetchArgs, PublishArgs};
use crate::gateway::SESSION_HEADER;
use anyhow::{Context, Result};
use std::io::Read;

pub async fn run_fetch(args: FetchArgs) -> Result<()> {
    let http = reqwest::Client::new();
    let mut request = http.get(feed_url(&args.client));
    if args.atom {
        request = request.header("Accept", "application/atom+xml");
    }
    let response = apply_common(request, &args.client)
        .send()
        .await
        .context("gateway request failed")?;
    report_session(&response);
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        anyhow::bail!("gateway answered {status}: {body}");
    }
    println!("{body}");
    Ok(())
}

pub async fn run_publish(args: PublishArgs) -> Result<()> {
    let content = match args.content {
        Some(content) => content,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading entry content from stdin")?;
            buf.trim_end().to_string()
        }
    };
    let mut payload = serde_json::json!({ "content": content });
    if let Some(title) = &args.title {
        payload["title"] = serde_json::Value::String(title.clone());
    }

    let http = reqwest::Client::new();
    let request = apply_common(http.post(feed_url(&args.client)).json(&payload), &args.client);
    let response = request.send().await.context("gateway request failed")?;
    report_session(&response);
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        anyhow::bail!("gateway answered {status}: {body}");
    }
    println!("{body}");
    Ok(())
}

fn feed_url(client: &ClientArgs) -> String {
    format!(
        "{}/feed/{}/{}",
        client.gateway.trim_end_matches('/'),
        client.service,
        client.node
    )
}

fn apply_common(
    mut request: reqwest::RequestBuilder,
    client: &ClientArgs,
) -> reqwest::RequestBuilder {
    if let Some(session) = &client.session {
        request = request.header(SESSION_HEADER, session.as_str());
    }
    if let (Some(user), Some(password)) = (&client.user, &client.password) {
        request = request.basic_auth(user, Some(password));
    }
    request
}

fn report_session(response: &reqwest::Response) {
    if let Some(id) = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        eprintln!("session id: {id}");
    }
}
