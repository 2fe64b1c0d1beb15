use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "pgmcp", version, about = "Expose Postgres objects as MCP endpoints")]
struct Cli {
    /// Path to the bridge configuration file.
    #[arg(long, global = true, env = "PGMCP_CONFIG", default_value = "pgmcp.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, bind every rule and report the resulting endpoints.
    Check {
        /// Print each endpoint's input schema.
        #[arg(long, default_value_t = false)]
        schemas: bool,
    },

    /// Read one page from a resource.
    Read {
        /// Resource id, e.g. public_users
        id: String,

        /// JSON object filter, e.g. '{"status": "open"}'
        #[arg(long)]
        filter: Option<String>,

        /// Sort terms, e.g. "created_at desc, id"
        #[arg(long = "order-by")]
        order_by: Option<String>,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        offset: Option<i64>,
    },

    /// Invoke a tool.
    Call {
        /// Tool id, e.g. api_refresh_stats
        id: String,

        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Print notifications from one or more channels until interrupted.
    Listen {
        #[arg(required = true)]
        channels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Check { schemas } => commands::check::run(&cli.config, schemas).await,
        Command::Read {
            id,
            filter,
            order_by,
            limit,
            offset,
        } => commands::read::run(&cli.config, &id, filter, order_by, limit, offset).await,
        Command::Call { id, args } => commands::call::run(&cli.config, &id, &args).await,
        Command::Listen { channels } => commands::listen::run(&cli.config, &channels).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_read() {
        let cli = Cli::try_parse_from([
            "pgmcp",
            "--config",
            "bridge.yaml",
            "read",
            "public_users",
            "--order-by",
            "id desc",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("bridge.yaml"));
        match cli.cmd {
            Command::Read {
                id,
                order_by,
                limit,
                ..
            } => {
                assert_eq!(id, "public_users");
                assert_eq!(order_by.as_deref(), Some("id desc"));
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_listen_requires_a_channel() {
        assert!(Cli::try_parse_from(["pgmcp", "listen"]).is_err());
    }
}
