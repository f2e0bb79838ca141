use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::ArgAction;
use clap::Parser;
use clap::Subcommand;
use kmtronic_relay::list_available_ports;
use kmtronic_relay::redis_shim::dispatch_relay_states;
use kmtronic_relay::redis_shim::publish_relay_states;
use kmtronic_relay::redis_shim::StreamKeys;
use kmtronic_relay::relay_port::DEFAULT_BAUD_RATE;
use kmtronic_relay::relay_port::DEFAULT_DEVICE;
use kmtronic_relay::ConnectionConfig;
use kmtronic_relay::RelayControl;
use kmtronic_relay::RelayLink;
use kmtronic_relay::RelayState;
use kmtronic_relay::RelayStates;
use log::error;
use log::info;
use log::warn;
use redis::Connection;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kmtronic-relay", version)]
#[command(about = "Control a KMTronic 4-channel USB relay board")]
struct Cli {
    /// Serial device of the relay board
    #[arg(short, long, default_value = DEFAULT_DEVICE, global = true)]
    port: String,

    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE, global = true)]
    baud: u32,

    /// Status read timeout
    #[arg(long, default_value_t = 2500, global = true)]
    timeout_ms: u64,

    /// Increase log verbosity, repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports known to the host
    Ports,

    /// Switch a relay on
    On { channel: i64 },

    /// Switch a relay off
    Off { channel: i64 },

    /// Invert the last known state of a relay
    Toggle { channel: i64 },

    /// Switch all relays on
    AllOn,

    /// Switch all relays off
    AllOff,

    /// Print the state of all relays
    Status,

    /// Print the state of all relays periodically
    Poll {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many polls
        #[arg(long)]
        count: Option<usize>,
    },

    /// Switch relays according to a redis stream and publish their state
    Redis {
        #[arg(long, default_value = "redis://127.0.0.1/")]
        url: String,

        #[arg(long, default_value = "kmtronic")]
        stream: String,

        #[arg(long, default_value = "kmtronic_last_entry_id")]
        last_entry_id_key: String,

        #[arg(long, default_value = "kmtronic_status")]
        status_key: String,

        #[arg(long, default_value_t = 1000)]
        block_ms: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    stderrlog::new()
        .module("kmtronic_relay")
        .quiet(cli.quiet)
        .verbosity(cli.verbose as usize + 2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    if let Command::Ports = cli.command {
        for port in list_available_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let config = ConnectionConfig::new(cli.port.as_str())
        .with_baud_rate(cli.baud)
        .with_read_timeout(Duration::from_millis(cli.timeout_ms));

    match cli.command {
        Command::Ports => Ok(()),
        Command::On { channel } => switch(config, channel, RelayState::On),
        Command::Off { channel } => switch(config, channel, RelayState::Off),
        Command::Toggle { channel } => {
            let mut link = RelayLink::new();
            link.connect(config)?;
            match link.toggle_polled(channel)? {
                Some(state) => {
                    println!("R{}: {}", channel, state);
                    Ok(())
                }
                None => bail!("State of relay {} could not be read, not toggling", channel),
            }
        }
        Command::AllOn => switch_all(config, RelayState::On),
        Command::AllOff => switch_all(config, RelayState::Off),
        Command::Status => {
            let mut link = RelayLink::new();
            link.connect(config)?;
            print_states(&link.query_status());
            Ok(())
        }
        Command::Poll { interval_ms, count } => {
            let (control, _worker) = RelayControl::spawn(RelayLink::new())?;
            control.connect(config)?;
            let mut polls = 0;
            control.poll_status(Duration::from_millis(interval_ms), |states| {
                print_states(&states);
                polls += 1;
                count.map_or(true, |count| polls < count)
            });
            control.disconnect();
            Ok(())
        }
        Command::Redis {
            url,
            stream,
            last_entry_id_key,
            status_key,
            block_ms,
        } => {
            let control = connect_control(config)?;

            let client = redis::Client::open(url.as_str())?;
            let mut redis = client
                .get_connection()
                .with_context(|| format!("Failed to connect to {}", url))?;

            let keys = StreamKeys {
                stream_key: stream,
                last_entry_id_key,
                block_ms,
            };
            info!("Dispatching relay commands from stream '{}'", keys.stream_key);

            let mut handler = |redis: &mut Connection, relay_states: Option<RelayStates>| -> Result<()> {
                for (channel, state) in relay_states.unwrap_or_default() {
                    // retried by the next command on the stream, not here
                    if let Err(e) = control.set(channel.number() as i64, state) {
                        error!("{}", e);
                    }
                }
                publish_relay_states(redis, &status_key, &control.query_status())?;
                Ok(())
            };

            dispatch_relay_states(
                &mut redis,
                &keys,
                |e| {
                    warn!("Skipping {}", e);
                    Ok(())
                },
                &mut handler,
            )?;
            Ok(())
        }
    }
}

fn connect_control(config: ConnectionConfig) -> Result<RelayControl> {
    let (control, _worker) = RelayControl::spawn(RelayLink::new())?;
    control.connect(config)?;
    Ok(control)
}

fn switch(config: ConnectionConfig, channel: i64, state: RelayState) -> Result<()> {
    let mut link = RelayLink::new();
    link.connect(config)?;
    link.set_channel(channel, state)?;
    Ok(())
}

fn switch_all(config: ConnectionConfig, state: RelayState) -> Result<()> {
    let mut link = RelayLink::new();
    link.connect(config)?;
    link.set_all(state)?;
    Ok(())
}

fn print_states(relay_states: &RelayStates) {
    if relay_states.is_empty() {
        warn!("No status reply from relay board");
        return;
    }
    let line: Vec<String> = relay_states
        .iter()
        .map(|(channel, state)| format!("{}: {}", channel, state))
        .collect();
    println!("{}", line.join("  "));
}
