use netman::ssh::{self, SshAuth, SshConfig};
use netman::ClientConfig;

/// Demo NETCONF client: dials a device over SSH, prints the server
/// capabilities and the result of a plain `<get>`.
///
/// Usage: netconf_get <host:port> <username> <password>
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(addr), Some(username), Some(password)) = (args.next(), args.next(), args.next())
    else {
        anyhow::bail!("usage: netconf_get <host:port> <username> <password>");
    };

    let config = SshConfig {
        addr,
        username,
        auth: SshAuth::Password(password),
    };
    let session = ssh::connect(&config, ClientConfig::default()).await?;

    println!("session-id: {:?}", session.session_id());
    for capability in session.server_capabilities() {
        println!("capability: {capability}");
    }

    match session.get(None).await? {
        Some(data) => println!("{data}"),
        None => println!("(empty <data>)"),
    }

    session.close_session().await?;
    Ok(())
}
