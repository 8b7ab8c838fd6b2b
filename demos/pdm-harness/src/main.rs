//! Stdio CLI that drives one [`pdm_broker::BrokerContext`] call per
//! invocation — a manual-testing and demo harness, not part of the
//! broker's own external interface (spec §6 reserves only
//! `PDM_SERVER_URL`; everything else here is ambient tooling).

use std::io::{self, Read};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdm_broker::{BrokerContext, PdmConfig};
use pdm_router::{RequestEnvelope, RequestSender};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "pdm-harness", about = "Drives a BrokerContext from the command line", version)]
struct Cli {
    #[arg(long, env = "PDM_ORIGIN", default_value = "https://harness.local", help = "Origin presented to the origin policy for this call")]
    origin: String,

    #[arg(long, help = "Declared sender URL; required unless --host-ui is set")]
    sender_url: Option<String>,

    #[arg(long, help = "Present this call as coming from the host-controlled credential-entry UI")]
    host_ui: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Liveness probe.
    Ping,
    /// Register this origin's allowed action set.
    Connect {
        #[arg(long, value_delimiter = ',')]
        actions: Vec<String>,
    },
    Disconnect,
    Unlock {
        password: String,
    },
    Lock,
    IsUnlocked,
    GetIdentity,
    /// Stores JSON read from stdin under the given collection.
    StoreData {
        #[arg(long)]
        collection_id: String,
    },
    RetrieveData {
        document_id: String,
        #[arg(long)]
        collection_id: String,
    },
    DeleteData {
        document_id: String,
        #[arg(long)]
        collection_id: String,
    },
    GetUserData,
    GrantPermission {
        #[arg(long)]
        data_id: String,
        #[arg(long)]
        collection_id: String,
        #[arg(long)]
        app_did: String,
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,
    },
    RevokePermission {
        #[arg(long)]
        data_id: String,
        #[arg(long)]
        collection_id: String,
        #[arg(long)]
        app_did: String,
        #[arg(long)]
        permission_id: Option<String>,
    },
    ListPermissions,
    /// Writes test credentials directly into the secret store, standing
    /// in for the credential-entry UI the harness doesn't have.
    SeedCredentials {
        passphrase: String,
        api_key: String,
        #[arg(long)]
        private_key: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long, default_value = "pdm-harness")]
        app_id: String,
    },
}

fn action_and_data(command: Command) -> Result<(&'static str, serde_json::Value)> {
    Ok(match command {
        Command::Ping => ("ping", json!({})),
        Command::Connect { actions } => ("connect", json!({ "requestedActions": actions })),
        Command::Disconnect => ("disconnect", json!({})),
        Command::Unlock { password } => ("unlock", json!({ "password": password })),
        Command::Lock => ("lock", json!({})),
        Command::IsUnlocked => ("is_unlocked", json!({})),
        Command::GetIdentity => ("get_identity", json!({})),
        Command::StoreData { collection_id } => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading document JSON from stdin")?;
            let data: serde_json::Value = serde_json::from_str(&buf).context("parsing document JSON from stdin")?;
            ("store_data", json!({ "data": data, "metadata": { "collectionId": collection_id } }))
        }
        Command::RetrieveData { document_id, collection_id } => {
            ("retrieve_data", json!({ "documentId": document_id, "collectionId": collection_id }))
        }
        Command::DeleteData { document_id, collection_id } => {
            ("delete_data", json!({ "documentId": document_id, "collectionId": collection_id }))
        }
        Command::GetUserData => ("get_user_data", json!({})),
        Command::GrantPermission { data_id, collection_id, app_did, permissions } => (
            "grant_permission",
            json!({ "dataId": data_id, "collectionId": collection_id, "appDid": app_did, "permissions": permissions }),
        ),
        Command::RevokePermission { data_id, collection_id, app_did, permission_id } => (
            "revoke_permission",
            json!({ "dataId": data_id, "collectionId": collection_id, "appDid": app_did, "permissionId": permission_id }),
        ),
        Command::ListPermissions => ("list_permissions", json!({})),
        Command::SeedCredentials { .. } => unreachable!("seed-credentials is handled before dispatch"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    pdm_broker::init_tracing();
    let cli = Cli::parse();
    let config = PdmConfig::from_env();
    let ctx = BrokerContext::new(config);

    if ctx.try_restore_session().await {
        tracing::info!("session restored from ephemeral token");
    }

    if let Command::SeedCredentials { passphrase, api_key, private_key, user_id, app_id } = &cli.command {
        ctx.session
            .store_credentials(
                passphrase,
                &pdm_storage_client::CredentialBlob {
                    api_key: api_key.clone(),
                    private_key: private_key.clone(),
                    user_id: user_id.clone(),
                    app_id: app_id.clone(),
                },
            )
            .context("storing credentials")?;
        println!("{}", json!({ "seeded": true }));
        return Ok(());
    }

    let sender = RequestSender { url: cli.sender_url.clone(), is_host_ui: cli.host_ui };
    let (action, data) = action_and_data(cli.command)?;
    let request = RequestEnvelope { id: uuid::Uuid::new_v4().to_string(), action: action.to_string(), data, origin: cli.origin, ts: None };

    let response = ctx.router.handle(request, &sender).await;
    let failed = response.error.is_some();
    println!("{}", serde_json::to_string_pretty(&response)?);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
