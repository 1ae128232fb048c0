use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use log::{debug, info};

use sealed_common::{NONCE_LEN, open, random_password, seal};
use sealed_reports::rpc::coprocessor::CoprocessorClient;
use sealed_reports::rpc::reports::ReportsClient;
use sealed_reports::{
    Authorization, ReportId, ReportStatus, SubmitReport, address_of, encrypt_input,
    open_disclosure, request_disclosure, status_update_digest,
};

/// Submit and read back encrypted reports.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// JSON-RPC endpoint of the report service.
    #[clap(long, env = "SEALED_RPC_URL", default_value = "http://127.0.0.1:3001")]
    rpc_url: String,

    /// Ed25519 signing key seed of the reporter, 32 bytes hex.
    #[clap(long, env = "SEALED_SIGNING_KEY", hide_env_values = true, value_parser = parse_signing_key)]
    key: SigningKey,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the address of the signing key.
    Whoami,
    /// Encrypt a message under a fresh one-time password and submit it.
    Submit {
        #[clap(long)]
        title: String,
        #[clap(long)]
        message: String,
    },
    /// List the ids submitted by the reporter.
    List,
    /// Show metadata of a report.
    Show {
        #[clap(long)]
        id: ReportId,
    },
    /// Decrypt and print a report the reporter may read.
    Read {
        #[clap(long)]
        id: ReportId,
    },
    /// Set the status of one of the reporter's reports.
    Status {
        #[clap(long)]
        id: ReportId,
        #[clap(long)]
        status: ReportStatus,
    },
}

fn parse_signing_key(s: &str) -> anyhow::Result<SigningKey> {
    let mut seed = [0u8; 32];
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut seed)
        .context("signing key must be 32 bytes of hex")?;
    Ok(SigningKey::from_bytes(&seed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("setting default subscriber failed: {e}"))?;

    let args = Args::parse();
    let client = HttpClientBuilder::default()
        .build(&args.rpc_url)
        .with_context(|| format!("invalid rpc url {}", args.rpc_url))?;
    let reporter = address_of(&args.key.verifying_key());
    debug!("Using {} as {reporter}", args.rpc_url);

    match args.command {
        Command::Whoami => println!("{reporter}"),
        Command::Submit { title, message } => {
            let id = submit(&client, &args.key, title, message.as_bytes()).await?;
            println!("{id}");
        }
        Command::List => {
            for id in client.reports_ids_by_reporter(reporter).await? {
                println!("{id}");
            }
        }
        Command::Show { id } => {
            let meta = client.reports_meta(id).await?;
            println!("id:        {id}");
            println!("reporter:  {}", meta.reporter);
            println!("title:     {}", meta.title);
            println!("createdAt: {}", meta.created_at);
            println!("status:    {}", meta.status);
        }
        Command::Read { id } => {
            let plaintext = read(&client, &args.key, id).await?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Command::Status { id, status } => {
            let contract = client.reports_contract().await?;
            let authorization =
                Authorization::sign(&args.key, &status_update_digest(&contract, id, status));
            client
                .reports_update_status(reporter, id, status, authorization)
                .await?;
            info!("Report {id} is now {status}");
        }
    }
    Ok(())
}

async fn submit(
    client: &HttpClient,
    key: &SigningKey,
    title: String,
    message: &[u8],
) -> anyhow::Result<ReportId> {
    if message.is_empty() {
        bail!("refusing to submit an empty message");
    }
    let password = random_password();
    let encrypted_data = seal(&password, message)?;
    let contract = client.reports_contract().await?;
    let network_key = client
        .coprocessor_public_key()
        .await
        .context("fetching coprocessor key")?;
    let (input, proof) = encrypt_input(&network_key.into(), &contract, key, &password)?;
    debug!(
        "Sealed {} byte(s), nonce 0x{}",
        message.len(),
        hex::encode(&encrypted_data[..NONCE_LEN])
    );

    let id = client
        .reports_submit(
            address_of(&key.verifying_key()),
            SubmitReport {
                title,
                encrypted_data,
                input,
                proof,
            },
        )
        .await?;
    info!("Submitted report {id}");
    Ok(id)
}

async fn read(client: &HttpClient, key: &SigningKey, id: ReportId) -> anyhow::Result<Vec<u8>> {
    let data = client.reports_data(id).await?;
    let handle = client.reports_encrypted_key(id).await?;
    let (request, reply_secret) = request_disclosure(key, &handle);
    let reply = client
        .coprocessor_user_decrypt(handle, request)
        .await
        .with_context(|| format!("decrypting key of report {id}"))?;
    let password = open_disclosure(&reply_secret, &reply.0)?;
    Ok(open(&password, &data.0)?)
}
