use netman::snmp::{Oid, SnmpConfig, SnmpSession};

/// Demo SNMP walker: walks a subtree on an agent and prints each varbind.
///
/// Usage: snmp_walk <host:port> <root-oid> [community]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(target), Some(root)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: snmp_walk <host:port> <root-oid> [community]");
    };
    let root: Oid = root.parse()?;

    let config = SnmpConfig {
        community: args.next().unwrap_or_else(|| "public".to_string()),
        ..SnmpConfig::default()
    };
    let session = SnmpSession::dial(&target, config).await?;

    session
        .walk(&root, &mut |varbind| {
            println!("{} = {}", varbind.oid, varbind.value);
            Ok(())
        })
        .await?;
    Ok(())
}
