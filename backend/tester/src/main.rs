use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Base URL of a running server.
    #[arg(long, default_value = "http://localhost:1111")]
    base_url: String,

    /// Bearer token issued by the identity platform.
    #[arg(long, env = "UNILIFE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tickets visible to the token.
    List,

    /// Create a ticket, or update it when --id is given.
    Save {
        #[arg(long)]
        id: Option<String>,

        /// Extra fields as key=value.
        #[arg(value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Delete a ticket.
    Delete { id: String },

    /// Bump the visitor counter, then print it.
    Visit,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw}"))
}

fn authorized(request: RequestBuilder, token: &Option<String>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn print(response: Response) -> Result<()> {
    let status = response.status();
    let body: Value = response.json().await?;

    println!("{status}");
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("request failed with {status}");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();
    let base = args.base_url.trim_end_matches('/');

    match args.command {
        Command::List => {
            let request = client.get(format!("{base}/tickets"));
            print(authorized(request, &args.token).send().await?).await
        }
        Command::Save { id, fields } => {
            let mut payload: Map<String, Value> = fields
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            if let Some(id) = id {
                payload.insert("id".to_string(), Value::String(id));
            }

            let request = client.post(format!("{base}/tickets")).json(&payload);
            print(authorized(request, &args.token).send().await?).await
        }
        Command::Delete { id } => {
            let request = client.delete(format!("{base}/tickets/{id}"));
            print(authorized(request, &args.token).send().await?).await
        }
        Command::Visit => {
            print(client.post(format!("{base}/visitors")).send().await?).await?;
            print(client.get(format!("{base}/visitors")).send().await?).await
        }
    }
}
