use chrono::Local;
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use wacore::client::context::{AddressingMode, GroupInfo};
use wacore::proto::whatsapp as wa;
use wacore_binary::jid::Jid;
use whatsapp_relay::loopback::{LoopbackRatchet, LoopbackServer, StaticGroups};
use whatsapp_relay::{Account, RelayClient, RelayConfig, RelayOptions};

/// Relays one text message through an in-process server and prints the
/// stanza that would go on the wire.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON tuning file; every key is optional.
    #[arg(long)]
    config: Option<String>,

    /// Recipient: a user, a group (`...@g.us`) or a newsletter.
    #[arg(long, default_value = "222@s.whatsapp.net")]
    to: String,

    /// Members of the group given in `--to`.
    #[arg(long, value_delimiter = ',', default_value = "222@s.whatsapp.net,333@s.whatsapp.net")]
    members: Vec<String>,

    /// Devices every recipient user has.
    #[arg(long, value_delimiter = ',', default_value = "0,1")]
    devices: Vec<u16>,

    #[arg(long, default_value = "hello from the relay")]
    text: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    let to: Jid = args.to.parse()?;
    let me = Jid::pn("111").with_device(3);

    let server = Arc::new(LoopbackServer::new());
    let groups = Arc::new(StaticGroups::new());
    server.add_devices(&me, &[0, 3]);

    let mut users = vec![to.clone()];
    if to.is_group() {
        let members = args
            .members
            .iter()
            .map(|m| m.parse::<Jid>())
            .collect::<Result<Vec<_>, _>>()?;
        groups.insert(&to, GroupInfo::new(members.clone(), AddressingMode::Pn));
        users = members;
    }
    for user in &users {
        server.add_devices(user, &args.devices);
    }

    let client = RelayClient::builder()
        .with_transport(server.clone())
        .with_signal(Arc::new(LoopbackRatchet::new()))
        .with_groups(groups)
        .with_account(Account::new(me, None, b"device-identity".to_vec()))
        .with_config(config)
        .build()?;

    let message = wa::Message {
        conversation: Some(args.text),
        ..Default::default()
    };
    let id = client.relay_message(&to, &message, RelayOptions::default()).await?;
    info!("relayed {id} to {to}");

    for node in server.sent_nodes() {
        println!("{node}");
    }
    Ok(())
}
