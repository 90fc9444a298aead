//! CLI argument parsing

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "icsprobe")]
#[command(version, about = "ICS memory-effect probing toolkit", long_about = None)]
pub struct Cli {
    /// Verbose output (-v, -vv for increasing verbosity)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Render reports as JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    S7,
    Opcua,
}

/// Target device selection, shared by every device-touching subcommand
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Device transport
    #[arg(short = 'T', long, value_enum, default_value_t = Transport::S7)]
    pub transport: Transport,

    /// PLC hostname or address (S7)
    #[arg(long, required_if_eq("transport", "s7"))]
    pub host: Option<String>,

    /// S7comm TCP port
    #[arg(long, default_value_t = 102)]
    pub port: u16,

    /// CPU rack number (S7)
    #[arg(long, default_value_t = 0)]
    pub rack: u16,

    /// CPU slot number (S7)
    #[arg(long, default_value_t = 0)]
    pub slot: u16,

    /// Endpoint URL, e.g. opc.tcp://host:4840 (OPC-UA)
    #[arg(long, required_if_eq("transport", "opcua"))]
    pub endpoint: Option<String>,

    /// Security policy: None, Basic128Rsa15, Basic256, Basic256Sha256 (OPC-UA)
    #[arg(long, default_value = "None")]
    pub security_policy: String,

    /// Message security mode: None, Sign, SignAndEncrypt (OPC-UA)
    #[arg(long, default_value = "None")]
    pub security_mode: String,

    /// Client certificate in DER form, for signed policies (OPC-UA)
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Client private key in PEM form (OPC-UA)
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Namespace index holding the memory block variables (OPC-UA)
    #[arg(long, default_value_t = 2)]
    pub namespace: u16,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a block offset range, correlating writes with a status feed
    Scan {
        #[command(flatten)]
        target: TargetArgs,

        /// Data block number
        #[arg(short, long)]
        block: u16,

        /// First offset to probe
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// One past the last offset to probe
        #[arg(long)]
        end: u32,

        /// HTTP status endpoint observed before and after each write
        #[arg(long)]
        status_url: String,

        /// Probe payload pattern (all_max, all_min, alternating)
        #[arg(long, default_value = "all_max")]
        pattern: String,

        /// Bytes probed per offset
        #[arg(long, default_value_t = 1)]
        probe_size: u16,

        /// Settle delay between write and observation, in milliseconds
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,

        /// Numeric tolerance when comparing observations
        #[arg(long, default_value_t = 0.0)]
        tolerance: f64,
    },

    /// Re-write a payload into one memory window on a fixed interval
    Sustain {
        #[command(flatten)]
        target: TargetArgs,

        /// Data block number
        #[arg(short, long)]
        block: u16,

        /// Byte offset of the window
        #[arg(long)]
        offset: u32,

        /// Payload as hex bytes, e.g. FF00FF00
        #[arg(long, conflicts_with = "pattern")]
        data: Option<String>,

        /// Or a generated pattern (all_max, all_min, alternating)
        #[arg(long)]
        pattern: Option<String>,

        /// Payload length when --pattern is used
        #[arg(long, default_value_t = 1, requires = "pattern")]
        length: u16,

        /// Total run length in seconds
        #[arg(long, default_value_t = 30)]
        duration_secs: u64,

        /// Pause between writes in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Optional HTTP status endpoint sampled each tick
        #[arg(long)]
        status_url: Option<String>,
    },

    /// Read bytes from device memory
    Read {
        #[command(flatten)]
        target: TargetArgs,

        /// Data block number
        #[arg(short, long)]
        block: u16,

        /// Byte offset to read from
        #[arg(long)]
        offset: u32,

        /// Number of bytes to read
        #[arg(long, default_value_t = 1)]
        length: u16,
    },

    /// Write hex bytes to device memory
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Data block number
        #[arg(short, long)]
        block: u16,

        /// Byte offset to write at
        #[arg(long)]
        offset: u32,

        /// Payload as hex bytes, e.g. DEADBEEF
        #[arg(long)]
        data: String,
    },

    /// Hello/Acknowledge probe of an OPC-UA endpoint
    Probe {
        /// Endpoint URL, e.g. opc.tcp://host:4840
        endpoint: String,
    },

    /// Generate a self-signed OPC-UA client certificate
    GenCert {
        /// Output directory for the certificate and key
        #[arg(long, default_value = "./pki")]
        out_dir: PathBuf,

        /// Application URI placed in the subject alternative names
        #[arg(long, default_value = "urn:icsprobe:client")]
        application_uri: String,

        /// Certificate common name
        #[arg(long, default_value = "icsprobe client")]
        common_name: String,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_args_parse() {
        let cli = Cli::parse_from([
            "icsprobe", "scan", "--host", "10.0.0.5", "--block", "1", "--end", "64",
            "--status-url", "http://10.0.0.6/status",
        ]);
        match cli.command {
            Commands::Scan {
                target,
                block,
                start,
                end,
                ref pattern,
                probe_size,
                settle_ms,
                ..
            } => {
                assert_eq!(target.transport, Transport::S7);
                assert_eq!(target.port, 102);
                assert_eq!((target.rack, target.slot), (0, 0));
                assert_eq!((block, start, end), (1, 0, 64));
                assert_eq!(pattern, "all_max");
                assert_eq!(probe_size, 1);
                assert_eq!(settle_ms, 500);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_s7_requires_host() {
        let result = Cli::try_parse_from([
            "icsprobe", "read", "--block", "1", "--offset", "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_opcua_requires_endpoint() {
        let result = Cli::try_parse_from([
            "icsprobe", "read", "-T", "opcua", "--block", "1", "--offset", "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sustain_data_conflicts_with_pattern() {
        let result = Cli::try_parse_from([
            "icsprobe", "sustain", "--host", "plc", "--block", "1", "--offset", "0",
            "--data", "FF", "--pattern", "all_max",
        ]);
        assert!(result.is_err());
    }
}
